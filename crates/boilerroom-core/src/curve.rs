//! Climate (heating) curves.
//!
//! A curve maps outdoor temperature to a target water temperature by linear
//! interpolation between two configured points. Outside the outdoor range
//! the target is clamped to the nearest end. The same shape is used for
//! boiler supply, floor heating supply and the minimum boiler return.
//!
//! # Example
//!
//! ```
//! use boilerroom_core::ClimateCurve;
//!
//! let curve = ClimateCurve::new(-20.0, 10.0, 80.0, 40.0);
//! assert_eq!(curve.target(-25.0), 80.0);
//! assert_eq!(curve.target(10.0), 40.0);
//! assert_eq!(curve.target(-5.0), 60.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Linear climate curve with clamped ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateCurve {
    /// Coldest outdoor temperature of the curve.
    pub outdoor_min: f64,
    /// Warmest outdoor temperature of the curve.
    pub outdoor_max: f64,
    /// Target at (and below) `outdoor_min`.
    pub target_at_min: f64,
    /// Target at (and above) `outdoor_max`.
    pub target_at_max: f64,
    /// Target used when the outdoor temperature is unknown.
    /// Defaults to the midpoint of the two targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target: Option<f64>,
}

impl ClimateCurve {
    /// Create a curve without an explicit fallback target.
    pub fn new(outdoor_min: f64, outdoor_max: f64, target_at_min: f64, target_at_max: f64) -> Self {
        Self {
            outdoor_min,
            outdoor_max,
            target_at_min,
            target_at_max,
            default_target: None,
        }
    }

    /// Override the fallback target.
    pub fn with_default_target(mut self, target: f64) -> Self {
        self.default_target = Some(target);
        self
    }

    /// Check that the curve can be evaluated.
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.outdoor_min,
            self.outdoor_max,
            self.target_at_min,
            self.target_at_max,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid_config("curve points must be finite"));
        }
        if self.outdoor_min >= self.outdoor_max {
            return Err(Error::invalid_config(format!(
                "outdoor_min ({}) must be below outdoor_max ({})",
                self.outdoor_min, self.outdoor_max
            )));
        }
        if let Some(default) = self.default_target
            && !default.is_finite()
        {
            return Err(Error::invalid_config("default_target must be finite"));
        }
        Ok(())
    }

    /// Target temperature for the given outdoor temperature.
    pub fn target(&self, outdoor: f64) -> f64 {
        if outdoor <= self.outdoor_min {
            return self.target_at_min;
        }
        if outdoor >= self.outdoor_max {
            return self.target_at_max;
        }
        let fraction = (outdoor - self.outdoor_min) / (self.outdoor_max - self.outdoor_min);
        self.target_at_min + fraction * (self.target_at_max - self.target_at_min)
    }

    /// Fallback target when the outdoor temperature is unknown.
    pub fn default_target(&self) -> f64 {
        self.default_target
            .unwrap_or((self.target_at_min + self.target_at_max) / 2.0)
    }

    /// Target for an optional outdoor reading.
    pub fn target_or_default(&self, outdoor: Option<f64>) -> f64 {
        outdoor.map_or_else(|| self.default_target(), |t| self.target(t))
    }

    /// Lowest target the curve can produce.
    pub fn lower_bound(&self) -> f64 {
        self.target_at_min.min(self.target_at_max)
    }

    /// Highest target the curve can produce.
    pub fn upper_bound(&self) -> f64 {
        self.target_at_min.max(self.target_at_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boiler_curve() -> ClimateCurve {
        ClimateCurve::new(-20.0, 10.0, 80.0, 40.0)
    }

    #[test]
    fn test_clamped_below_domain() {
        assert_eq!(boiler_curve().target(-20.0), 80.0);
        assert_eq!(boiler_curve().target(-35.0), 80.0);
    }

    #[test]
    fn test_clamped_above_domain() {
        assert_eq!(boiler_curve().target(10.0), 40.0);
        assert_eq!(boiler_curve().target(25.0), 40.0);
    }

    #[test]
    fn test_midpoint_is_mean_of_bounds() {
        assert_eq!(boiler_curve().target(-5.0), 60.0);
    }

    #[test]
    fn test_default_target() {
        let curve = boiler_curve();
        assert_eq!(curve.target_or_default(None), 60.0);
        assert_eq!(curve.with_default_target(70.0).target_or_default(None), 70.0);
        assert_eq!(curve.target_or_default(Some(10.0)), 40.0);
    }

    #[test]
    fn test_bounds() {
        let curve = boiler_curve();
        assert_eq!(curve.lower_bound(), 40.0);
        assert_eq!(curve.upper_bound(), 80.0);
    }

    #[test]
    fn test_validate() {
        assert!(boiler_curve().validate().is_ok());
        assert!(ClimateCurve::new(10.0, -20.0, 80.0, 40.0).validate().is_err());
        assert!(ClimateCurve::new(0.0, 0.0, 80.0, 40.0).validate().is_err());
        assert!(ClimateCurve::new(f64::NAN, 10.0, 80.0, 40.0).validate().is_err());
        assert!(
            boiler_curve()
                .with_default_target(f64::INFINITY)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_deserialize_without_default() {
        let curve: ClimateCurve = serde_json::from_str(
            r#"{"outdoor_min":-20,"outdoor_max":10,"target_at_min":45,"target_at_max":30}"#,
        )
        .unwrap();
        assert_eq!(curve.default_target, None);
        assert_eq!(curve.default_target(), 37.5);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The target never leaves the band spanned by the two end targets.
        #[test]
        fn target_within_bounds(
            outdoor in -60.0f64..60.0,
            target_at_min in 20.0f64..90.0,
            target_at_max in 20.0f64..90.0,
        ) {
            let curve = ClimateCurve::new(-20.0, 10.0, target_at_min, target_at_max);
            let target = curve.target(outdoor);
            prop_assert!(target >= curve.lower_bound() - 1e-9);
            prop_assert!(target <= curve.upper_bound() + 1e-9);
        }

        /// A falling curve never rises as it gets warmer outside.
        #[test]
        fn falling_curve_is_monotonic(a in -40.0f64..30.0, b in -40.0f64..30.0) {
            let curve = ClimateCurve::new(-20.0, 10.0, 80.0, 40.0);
            let (cold, warm) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(curve.target(cold) >= curve.target(warm) - 1e-9);
        }
    }
}
