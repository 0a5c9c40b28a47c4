//! Stand-ins for optional collaborators
//!
//! A deployment without ThingsBoard or without Pushover credentials still
//! runs; readings and alerts then only reach the log.

use async_trait::async_trait;
use rasguard_core::alert::{Notification, Priority};
use rasguard_core::cycle::FilteredReading;
use rasguard_core::errors::CollaboratorError;
use rasguard_core::traits::{Notifier, TelemetryPublisher};

/// Logs readings at debug level instead of publishing them
pub struct LogPublisher;

#[async_trait]
impl TelemetryPublisher for LogPublisher {
    async fn publish(&mut self, reading: &FilteredReading) -> Result<(), CollaboratorError> {
        tracing::debug!(sensor = %reading.sensor, value = reading.value, unit = %reading.unit, "reading");
        Ok(())
    }
}

/// Logs notifications instead of pushing them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&mut self, notification: &Notification) -> Result<(), CollaboratorError> {
        match notification.priority {
            Priority::Emergency => tracing::error!(title = %notification.title, "{}", notification.message),
            Priority::Normal => tracing::warn!(title = %notification.title, "{}", notification.message),
        }
        Ok(())
    }
}
