//! Trimmed-mean filter
//!
//! Cheap analog front ends (ADS1115 channels, ultrasonic echoes, 1-Wire
//! probes on long cables) produce the occasional wild sample. Rather than
//! trusting any single read, each cycle takes N reads, sorts them, throws
//! away the K lowest and K highest and averages the rest:
//!
//! ```text
//! raw:     [7, 3, 100, 1, 5, 4, 8, 2, 6, 9]      N = 10, K = 2
//! sorted:  [1, 2, | 3, 4, 5, 6, 7, 8 |, 9, 100]
//! mean of the middle six = 5.5
//! ```
//!
//! Samples live in a fixed-capacity stack buffer, so the hot path never
//! allocates.

use heapless::Vec;

use crate::errors::FilterError;

/// Capacity of the per-sensor sample buffer
pub const MAX_SAMPLES: usize = 64;

/// Fixed-capacity buffer holding one sensor's raw samples for one cycle
pub type SampleBuffer = Vec<f64, MAX_SAMPLES>;

/// Average of `samples` after dropping the `discard` lowest and highest values
///
/// The input order does not matter; the samples are sorted into a private
/// buffer first. The result is clamped into the range of the retained values
/// so accumulated rounding can never push it outside.
///
/// NaN and infinite samples are rejected rather than ordered; callers are
/// expected to count such reads as failures before reducing.
pub fn trimmed_mean(samples: &[f64], discard: usize) -> Result<f64, FilterError> {
    if let Some(index) = samples.iter().position(|sample| !sample.is_finite()) {
        return Err(FilterError::NonFinite { index });
    }

    let required = 2 * discard + 1;
    if samples.len() < required {
        return Err(FilterError::InsufficientSamples {
            required,
            available: samples.len(),
        });
    }

    let mut sorted = SampleBuffer::new();
    sorted
        .extend_from_slice(samples)
        .map_err(|_| FilterError::TooManySamples {
            count: samples.len(),
            capacity: MAX_SAMPLES,
        })?;
    sorted.sort_unstable_by(f64::total_cmp);

    let retained = &sorted[discard..sorted.len() - discard];
    let sum: f64 = retained.iter().sum();
    let mean = sum / retained.len() as f64;

    // retained is non-empty and sorted
    Ok(mean.clamp(retained[0], retained[retained.len() - 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn discards_outliers() {
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 100.0];
        assert_eq!(trimmed_mean(&samples, 2), Ok(5.5));
    }

    #[test]
    fn arrival_order_is_irrelevant() {
        let samples = [7.0, 3.0, 100.0, 1.0, 5.0, 4.0, 8.0, 2.0, 6.0, 9.0];
        assert_eq!(trimmed_mean(&samples, 2), Ok(5.5));
    }

    #[test]
    fn zero_discard_is_plain_mean() {
        assert_eq!(trimmed_mean(&[2.0, 4.0], 0), Ok(3.0));
        assert_eq!(trimmed_mean(&[7.25], 0), Ok(7.25));
    }

    #[test]
    fn surviving_subset_still_trims_k() {
        // 7 of 10 reads survived: sorted [1..7], drop 2 each side -> [3, 4, 5]
        let samples = [5.0, 1.0, 7.0, 3.0, 2.0, 6.0, 4.0];
        assert_eq!(trimmed_mean(&samples, 2), Ok(4.0));
    }

    #[test]
    fn too_few_samples() {
        assert_eq!(
            trimmed_mean(&[1.0, 2.0, 3.0, 4.0], 2),
            Err(FilterError::InsufficientSamples {
                required: 5,
                available: 4
            })
        );
        assert!(trimmed_mean(&[], 0).is_err());
    }

    #[test]
    fn buffer_overflow_is_an_error() {
        let samples = [1.0; MAX_SAMPLES + 1];
        assert_eq!(
            trimmed_mean(&samples, 0),
            Err(FilterError::TooManySamples {
                count: MAX_SAMPLES + 1,
                capacity: MAX_SAMPLES
            })
        );
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        assert_eq!(trimmed_mean(&[f64::NAN], 0), Err(FilterError::NonFinite { index: 0 }));
        assert_eq!(
            trimmed_mean(&[1.0, 2.0, f64::INFINITY, 3.0, 4.0], 1),
            Err(FilterError::NonFinite { index: 2 })
        );
        assert_eq!(
            trimmed_mean(&[f64::NEG_INFINITY, 1.0, 2.0], 1),
            Err(FilterError::NonFinite { index: 0 })
        );
    }

    #[test]
    fn identical_samples_return_that_value() {
        let samples = [0.1; 9];
        assert_eq!(trimmed_mean(&samples, 3), Ok(0.1));
    }

    fn samples_and_discard() -> impl Strategy<Value = (std::vec::Vec<f64>, usize)> {
        (0usize..=10).prop_flat_map(|discard| {
            (
                prop::collection::vec(-1.0e6f64..1.0e6, 2 * discard + 1..=MAX_SAMPLES),
                Just(discard),
            )
        })
    }

    proptest! {
        #[test]
        fn mean_within_retained_range((samples, discard) in samples_and_discard()) {
            let mean = trimmed_mean(&samples, discard).unwrap();

            let mut sorted = samples.clone();
            sorted.sort_by(f64::total_cmp);
            let retained = &sorted[discard..sorted.len() - discard];

            prop_assert!(mean >= retained[0]);
            prop_assert!(mean <= retained[retained.len() - 1]);
        }

        #[test]
        fn permutation_invariant(
            (samples, shuffled, discard) in samples_and_discard().prop_flat_map(|(samples, discard)| {
                (Just(samples.clone()), Just(samples).prop_shuffle(), Just(discard))
            }),
        ) {
            prop_assert_eq!(
                trimmed_mean(&samples, discard).unwrap(),
                trimmed_mean(&shuffled, discard).unwrap()
            );
        }
    }
}
