//! Per-parameter distributions (spec §4.2).

use hopt_types::{ParamValue, ValidationError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Dispatch tag for a distribution kind (spec §4.2 "type tag").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistKind {
    Uniform,
    LogUniform,
    Int,
    DiscreteUniform,
    Choice,
}

/// One parameter's distribution spec (spec §3 "SearchSpace spec").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamSpec {
    /// `uniform(lo, hi)`, `lo < hi`, real-valued.
    Uniform { lo: f64, hi: f64 },
    /// `log_uniform(lo, hi)`, `0 < lo < hi`; sampled on `[ln lo, ln hi]`.
    LogUniform { lo: f64, hi: f64 },
    /// `int(lo, hi)` inclusive integer range, `lo <= hi`.
    Int { lo: i64, hi: i64 },
    /// `discrete_uniform(lo, hi, step)`, `step > 0`, yields `lo + k*step`.
    DiscreteUniform { lo: f64, hi: f64, step: f64 },
    /// `choice([v1..vk])`, `k >= 1`, order-preserving.
    Choice { values: Vec<Json> },
}

impl ParamSpec {
    pub fn kind(&self) -> DistKind {
        match self {
            ParamSpec::Uniform { .. } => DistKind::Uniform,
            ParamSpec::LogUniform { .. } => DistKind::LogUniform,
            ParamSpec::Int { .. } => DistKind::Int,
            ParamSpec::DiscreteUniform { .. } => DistKind::DiscreteUniform,
            ParamSpec::Choice { .. } => DistKind::Choice,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ValidationError> {
        match self {
            ParamSpec::Uniform { lo, hi } => {
                if !(lo < hi) {
                    return Err(ValidationError::UniformBounds {
                        name: name.to_string(),
                        lo: *lo,
                        hi: *hi,
                    });
                }
            }
            ParamSpec::LogUniform { lo, hi } => {
                if !(*lo > 0.0 && lo < hi) {
                    return Err(ValidationError::LogUniformBounds {
                        name: name.to_string(),
                        lo: *lo,
                        hi: *hi,
                    });
                }
            }
            ParamSpec::Int { lo, hi } => {
                if lo > hi {
                    return Err(ValidationError::IntBounds {
                        name: name.to_string(),
                        lo: *lo,
                        hi: *hi,
                    });
                }
            }
            ParamSpec::DiscreteUniform { step, .. } => {
                if !(*step > 0.0) {
                    return Err(ValidationError::NonPositiveStep {
                        name: name.to_string(),
                        step: *step,
                    });
                }
            }
            ParamSpec::Choice { values } => {
                if values.is_empty() {
                    return Err(ValidationError::EmptyChoice {
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Draw an independent sample (spec §4.2 `sample(rng)`).
    pub fn sample(&self, rng: &mut impl Rng) -> ParamValue {
        match self {
            ParamSpec::Uniform { lo, hi } => ParamValue::Float(rng.gen_range(*lo..=*hi)),
            ParamSpec::LogUniform { lo, hi } => {
                let (log_lo, log_hi) = (lo.ln(), hi.ln());
                ParamValue::Float(rng.gen_range(log_lo..=log_hi).exp())
            }
            ParamSpec::Int { lo, hi } => ParamValue::Int(rng.gen_range(*lo..=*hi)),
            ParamSpec::DiscreteUniform { lo, hi, step } => {
                let steps = ((hi - lo) / step).floor() as i64;
                let k = rng.gen_range(0..=steps.max(0));
                ParamValue::Float((lo + k as f64 * step).min(*hi))
            }
            ParamSpec::Choice { values } => {
                let idx = rng.gen_range(0..values.len());
                ParamValue::Categorical(values[idx].clone())
            }
        }
    }

    /// Monotone map into `[0, 1]` (spec §4.2 `to_unit`). For `choice`,
    /// returns the bin midpoint of the matched category's slot.
    pub fn to_unit(&self, value: &ParamValue) -> f64 {
        match self {
            ParamSpec::Uniform { lo, hi } => {
                let v = value.as_f64().unwrap_or(*lo);
                ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
            }
            ParamSpec::LogUniform { lo, hi } => {
                let v = value.as_f64().unwrap_or(*lo).max(f64::MIN_POSITIVE);
                ((v.ln() - lo.ln()) / (hi.ln() - lo.ln())).clamp(0.0, 1.0)
            }
            ParamSpec::Int { lo, hi } => {
                let v = value.as_i64().unwrap_or(*lo);
                if hi == lo {
                    0.5
                } else {
                    ((v - lo) as f64 / (hi - lo) as f64).clamp(0.0, 1.0)
                }
            }
            ParamSpec::DiscreteUniform { lo, hi, step } => {
                let v = value.as_f64().unwrap_or(*lo);
                let steps = ((hi - lo) / step).floor().max(0.0);
                if steps == 0.0 {
                    0.5
                } else {
                    let k = ((v - lo) / step).round();
                    (k / steps).clamp(0.0, 1.0)
                }
            }
            ParamSpec::Choice { values } => {
                let idx = self.choice_index(value).unwrap_or(0);
                let k = values.len();
                // Bin midpoint of the matched category's equal-width slot.
                (idx as f64 + 0.5) / k as f64
            }
        }
    }

    /// Inverse of `to_unit`, with clamping to bounds (spec §4.2 `from_unit`).
    pub fn from_unit(&self, u: f64) -> ParamValue {
        let u = u.clamp(0.0, 1.0);
        match self {
            ParamSpec::Uniform { lo, hi } => ParamValue::Float(lo + u * (hi - lo)),
            ParamSpec::LogUniform { lo, hi } => {
                let (log_lo, log_hi) = (lo.ln(), hi.ln());
                ParamValue::Float((log_lo + u * (log_hi - log_lo)).exp())
            }
            ParamSpec::Int { lo, hi } => {
                let span = (hi - lo) as f64;
                let v = (*lo as f64 + u * span).round() as i64;
                ParamValue::Int(v.clamp(*lo, *hi))
            }
            ParamSpec::DiscreteUniform { lo, hi, step } => {
                let steps = ((hi - lo) / step).floor().max(0.0);
                let k = (u * steps).round();
                ParamValue::Float((lo + k * step).min(*hi))
            }
            ParamSpec::Choice { values } => {
                let k = values.len();
                let idx = ((u * k as f64).floor() as usize).min(k - 1);
                ParamValue::Categorical(values[idx].clone())
            }
        }
    }

    /// Log-density at `value`, used by TPE's good/bad KDE ratio (spec
    /// §4.3.3). For distributions without a meaningful parametric density
    /// here (this crate only covers the prior, not a fitted KDE), this
    /// returns the log-density of the uninformative prior over the space —
    /// samplers layer their own fitted densities on top.
    pub fn log_density(&self, value: &ParamValue) -> f64 {
        match self {
            ParamSpec::Uniform { lo, hi } => -((hi - lo).max(f64::MIN_POSITIVE)).ln(),
            ParamSpec::LogUniform { lo, hi } => {
                let v = value.as_f64().unwrap_or(*lo).max(f64::MIN_POSITIVE);
                -((hi.ln() - lo.ln()).max(f64::MIN_POSITIVE)).ln() - v.ln()
            }
            ParamSpec::Int { lo, hi } => -(((hi - lo + 1) as f64).max(1.0)).ln(),
            ParamSpec::DiscreteUniform { lo, hi, step } => {
                let steps = ((hi - lo) / step).floor().max(0.0) + 1.0;
                -steps.ln()
            }
            ParamSpec::Choice { values } => -(values.len().max(1) as f64).ln(),
        }
    }

    fn choice_index(&self, value: &ParamValue) -> Option<usize> {
        if let (ParamSpec::Choice { values }, ParamValue::Categorical(v)) = (self, value) {
            values.iter().position(|candidate| candidate == v)
        } else {
            None
        }
    }

    /// Evenly spaced (or, for `int`/`choice`, exhaustive) grid values used
    /// by `GridSampler` (spec §4.3.2).
    pub fn grid_values(&self, grid_points: usize) -> Vec<ParamValue> {
        match self {
            ParamSpec::Uniform { lo, hi } => {
                linspace(*lo, *hi, grid_points.max(1)).into_iter().map(ParamValue::Float).collect()
            }
            ParamSpec::LogUniform { lo, hi } => {
                linspace(lo.ln(), hi.ln(), grid_points.max(1))
                    .into_iter()
                    .map(|x| ParamValue::Float(x.exp()))
                    .collect()
            }
            ParamSpec::Int { lo, hi } => {
                let span = (hi - lo + 1) as usize;
                if span <= grid_points.max(1) {
                    (*lo..=*hi).map(ParamValue::Int).collect()
                } else {
                    linspace(*lo as f64, *hi as f64, grid_points.max(1))
                        .into_iter()
                        .map(|x| ParamValue::Int(x.round() as i64))
                        .collect()
                }
            }
            ParamSpec::DiscreteUniform { lo, hi, step } => {
                let steps = ((hi - lo) / step).floor() as i64;
                (0..=steps.max(0))
                    .map(|k| ParamValue::Float((lo + k as f64 * step).min(*hi)))
                    .collect()
            }
            ParamSpec::Choice { values } => {
                values.iter().cloned().map(ParamValue::Categorical).collect()
            }
        }
    }
}

fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![(lo + hi) / 2.0];
    }
    (0..n)
        .map(|i| {
            let t = i as f64 / (n - 1) as f64;
            lo + t * (hi - lo)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_round_trip_is_exact() {
        let spec = ParamSpec::Uniform { lo: -5.0, hi: 5.0 };
        let v = ParamValue::Float(2.5);
        let u = spec.to_unit(&v);
        let back = spec.from_unit(u);
        assert!((back.as_f64().unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn log_uniform_round_trip_is_exact() {
        let spec = ParamSpec::LogUniform { lo: 1e-4, hi: 1.0 };
        let v = ParamValue::Float(0.01);
        let u = spec.to_unit(&v);
        let back = spec.from_unit(u);
        assert!((back.as_f64().unwrap() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn int_round_trip_is_close_up_to_rounding() {
        let spec = ParamSpec::Int { lo: 1, hi: 100 };
        for v in [1i64, 50, 100] {
            let u = spec.to_unit(&ParamValue::Int(v));
            let back = spec.from_unit(u).as_i64().unwrap();
            assert!((back - v).abs() <= 1, "v={v} back={back}");
        }
    }

    #[test]
    fn sample_respects_bounds() {
        let mut rng = rand::thread_rng();
        let spec = ParamSpec::Uniform { lo: -1.0, hi: 1.0 };
        for _ in 0..1000 {
            let v = spec.sample(&mut rng).as_f64().unwrap();
            assert!((-1.0..=1.0).contains(&v));
        }

        let log_spec = ParamSpec::LogUniform { lo: 1e-5, hi: 1.0 };
        for _ in 0..1000 {
            let v = log_spec.sample(&mut rng).as_f64().unwrap();
            assert!(v > 0.0 && v <= 1.0);
        }

        let int_spec = ParamSpec::Int { lo: 5, hi: 15 };
        for _ in 0..1000 {
            let v = int_spec.sample(&mut rng).as_i64().unwrap();
            assert!((5..=15).contains(&v));
        }
    }

    #[test]
    fn choice_grid_enumerates_all_categories() {
        let spec = ParamSpec::Choice {
            values: vec![serde_json::json!("a"), serde_json::json!("b")],
        };
        let grid = spec.grid_values(10);
        assert_eq!(grid.len(), 2);
    }

    #[test]
    fn int_grid_is_exhaustive_when_small() {
        let spec = ParamSpec::Int { lo: 1, hi: 3 };
        let grid = spec.grid_values(5);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn validate_rejects_bad_uniform_bounds() {
        let spec = ParamSpec::Uniform { lo: 5.0, hi: 1.0 };
        assert!(spec.validate("x").is_err());
    }

    #[test]
    fn validate_rejects_nonpositive_log_uniform_lo() {
        let spec = ParamSpec::LogUniform { lo: 0.0, hi: 1.0 };
        assert!(spec.validate("x").is_err());
    }
}
