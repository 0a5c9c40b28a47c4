//! Pushover notifier
//!
//! Normal alerts go out at default priority. Emergency notifications (the
//! battery shutdown) use Pushover priority 2, which repeats on the phone
//! every `retry` seconds until acknowledged or `expire` seconds pass.

use async_trait::async_trait;
use rasguard_core::alert::{Notification, Priority};
use rasguard_core::errors::CollaboratorError;
use rasguard_core::traits::Notifier;

use crate::http::{HttpConfig, HttpConnector};
use crate::ConnectionStats;

pub const PUSHOVER_URL: &str = "https://api.pushover.net";

const MESSAGES_PATH: &str = "/1/messages.json";

/// Seconds between repeats of an emergency notification
pub const EMERGENCY_RETRY_SECS: u32 = 30;

/// Seconds after which an unacknowledged emergency stops repeating
pub const EMERGENCY_EXPIRE_SECS: u32 = 300;

pub struct PushoverNotifier {
    http: HttpConnector,
    token: String,
    user: String,
}

impl PushoverNotifier {
    pub fn new(http: HttpConnector, token: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            user: user.into(),
        }
    }

    /// Notifier against the public Pushover API
    pub fn public(token: impl Into<String>, user: impl Into<String>) -> Result<Self, CollaboratorError> {
        let http = HttpConnector::new(HttpConfig::new(PUSHOVER_URL))?;
        Ok(Self::new(http, token, user))
    }

    pub fn stats(&self) -> ConnectionStats {
        self.http.stats()
    }

    /// Form fields for one notification
    pub fn form(&self, notification: &Notification) -> Vec<(String, String)> {
        let mut fields = vec![
            ("token".to_owned(), self.token.clone()),
            ("user".to_owned(), self.user.clone()),
            ("title".to_owned(), notification.title.clone()),
            ("message".to_owned(), notification.message.clone()),
        ];
        if notification.priority == Priority::Emergency {
            fields.push(("priority".to_owned(), "2".to_owned()));
            fields.push(("retry".to_owned(), EMERGENCY_RETRY_SECS.to_string()));
            fields.push(("expire".to_owned(), EMERGENCY_EXPIRE_SECS.to_string()));
        }
        fields
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn send(&mut self, notification: &Notification) -> Result<(), CollaboratorError> {
        let fields = self.form(notification);
        self.http.post_form(MESSAGES_PATH, fields).await?;
        Ok(())
    }
}
