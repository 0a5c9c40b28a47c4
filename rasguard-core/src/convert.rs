//! Raw-to-engineering-unit conversion
//!
//! Every sensor carries one converter. The common calibrations are plain
//! data ([`Calibration`]) so they can come straight from the config file;
//! anything exotic can be supplied as a closure.
//!
//! ```rust
//! use rasguard_core::convert::{Calibration, Convert};
//!
//! // pH probe on an ADS1115 channel
//! let ph = Calibration::Linear { gain: -6.02987, offset: 21.91 };
//! assert!((ph.convert(2.5) - 6.835325).abs() < 1e-9);
//!
//! // Anything callable works too
//! let fahrenheit = |c: f64| c * 9.0 / 5.0 + 32.0;
//! assert_eq!(fahrenheit.convert(100.0), 212.0);
//! ```

use serde::{Deserialize, Serialize};

/// Total, pure mapping from a filtered raw value to an engineering value
pub trait Convert: Send + Sync {
    /// Convert one filtered raw value
    fn convert(&self, raw: f64) -> f64;
}

impl<F> Convert for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn convert(&self, raw: f64) -> f64 {
        self(raw)
    }
}

/// Built-in calibration formulas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Calibration {
    /// Pass the filtered value through unchanged
    Identity,

    /// `gain * x + offset`
    Linear {
        /// Slope
        gain: f64,
        /// Intercept
        #[serde(default)]
        offset: f64,
    },

    /// `|x - center| * gain`
    ///
    /// Hall-effect current sensors idle at mid-rail; the draw is the distance
    /// from that rest voltage in either direction.
    AbsDeviation {
        /// Rest (zero-current) value
        center: f64,
        /// Scale applied to the deviation
        gain: f64,
    },

    /// `c0 + c1*x + c2*x^2 + ...`
    Polynomial {
        /// Coefficients, lowest order first
        coefficients: Vec<f64>,
    },
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration::Identity
    }
}

impl Convert for Calibration {
    fn convert(&self, raw: f64) -> f64 {
        match self {
            Calibration::Identity => raw,
            Calibration::Linear { gain, offset } => gain * raw + offset,
            Calibration::AbsDeviation { center, gain } => (raw - center).abs() * gain,
            Calibration::Polynomial { coefficients } => coefficients
                .iter()
                .rev()
                .fold(0.0, |acc, c| acc * raw + c),
        }
    }
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_conductivity() {
        let cal = Calibration::Linear { gain: 779.3, offset: -302.46 };
        assert!((cal.convert(1.0) - 476.84).abs() < 1e-9);
    }

    #[test]
    fn abs_deviation_is_symmetric() {
        let pump = Calibration::AbsDeviation { center: 2.57, gain: 6000.0 };
        let above = pump.convert(2.67);
        let below = pump.convert(2.47);
        assert!((above - 600.0).abs() < 1e-6);
        assert!((above - below).abs() < 1e-6);
    }

    #[test]
    fn polynomial_uses_horner() {
        // 1 + 2x + 3x^2 at x = 2 -> 17
        let cal = Calibration::Polynomial { coefficients: vec![1.0, 2.0, 3.0] };
        assert_eq!(cal.convert(2.0), 17.0);

        let empty = Calibration::Polynomial { coefficients: vec![] };
        assert_eq!(empty.convert(5.0), 0.0);
    }

    #[test]
    fn identity_default() {
        assert_eq!(Calibration::default().convert(3.25), 3.25);
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(6.83532, 2), 6.84);
        assert_eq!(round_to(476.84, 0), 477.0);
        assert_eq!(round_to(-1.25, 1), -1.3);
    }
}
