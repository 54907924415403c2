//! Raw to engineering value conversion.
use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::CalibrationDef;

/// Engineering value of a decoded parameter.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq, Display)]
pub enum EngValue {
    Number(f64),
    Label(String),
    /// No engineering value available, carries the raw value.
    Uncalibrated(i64),
}

impl EngValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EngValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_label(&self) -> Option<&str> {
        match self {
            EngValue::Label(s) => Some(s),
            _ => None,
        }
    }
}

/// Why [CalibrationEngine::apply_checked] did not produce an exact calibrated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// No entry for the raw value (enum code, empty table).
    Unmapped,
    /// Raw value outside the curve range, clamped to the nearest endpoint.
    Clamped,
    /// The calibration produced NaN or an infinite value.
    NonFinite,
}

/// Applies [CalibrationDef]s. Conversion is total, every raw value gets some [EngValue].
pub struct CalibrationEngine;

impl CalibrationEngine {
    /// Convert `raw` using `def`.
    ///
    /// # Example
    /// ```
    /// use tmtc::{CalibrationDef, CalibrationEngine, EngValue};
    ///
    /// let def = CalibrationDef::curve(vec![(0, 0.0), (10, 100.0)]);
    /// assert_eq!(CalibrationEngine::apply(&def, 5), EngValue::Number(50.0));
    /// assert_eq!(CalibrationEngine::apply(&def, 20), EngValue::Number(100.0));
    /// ```
    #[must_use]
    pub fn apply(def: &CalibrationDef, raw: i64) -> EngValue {
        Self::apply_checked(def, raw).0
    }

    /// Like [CalibrationEngine::apply], also reporting whether the value was degraded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn apply_checked(def: &CalibrationDef, raw: i64) -> (EngValue, Option<Degradation>) {
        let x = raw as f64;
        let (value, degradation) = match def {
            CalibrationDef::Linear { a, b } => (a * x + b, None),
            CalibrationDef::Polynomial { coeffs } => {
                if coeffs.is_empty() {
                    return (EngValue::Uncalibrated(raw), Some(Degradation::Unmapped));
                }
                (coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c), None)
            }
            CalibrationDef::Enum { mapping } => {
                return match mapping.get(&raw) {
                    Some(label) => (EngValue::Label(label.clone()), None),
                    None => (EngValue::Uncalibrated(raw), Some(Degradation::Unmapped)),
                };
            }
            CalibrationDef::Curve { points } => match interpolate(points, raw) {
                Some(zult) => zult,
                None => return (EngValue::Uncalibrated(raw), Some(Degradation::Unmapped)),
            },
        };

        if value.is_finite() {
            (EngValue::Number(value), degradation)
        } else {
            (EngValue::Uncalibrated(raw), Some(Degradation::NonFinite))
        }
    }
}

/// Linear interpolation over sorted `points`, clamping outside the table range.
#[allow(clippy::cast_precision_loss)]
fn interpolate(points: &[(i64, f64)], raw: i64) -> Option<(f64, Option<Degradation>)> {
    let (first, last) = (points.first()?, points.last()?);
    if raw <= first.0 {
        let clamped = (raw < first.0).then_some(Degradation::Clamped);
        return Some((first.1, clamped));
    }
    if raw >= last.0 {
        let clamped = (raw > last.0).then_some(Degradation::Clamped);
        return Some((last.1, clamped));
    }

    match points.binary_search_by_key(&raw, |(x, _)| *x) {
        Ok(idx) => Some((points[idx].1, None)),
        Err(idx) => {
            // first.0 < raw < last.0, so idx is in 1..points.len()
            let (x0, y0) = points[idx - 1];
            let (x1, y1) = points[idx];
            let frac = (raw as f64 - x0 as f64) / (x1 as f64 - x0 as f64);
            Some((y0 + (y1 - y0) * frac, None))
        }
    }
}
