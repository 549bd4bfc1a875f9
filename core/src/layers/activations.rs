//! Activation kinds the KPU's piecewise-linear unit can approximate.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};

/// Leaky slope below zero.
pub const LEAKY_SLOPE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    /// `x` for `x >= 0`, `0.1 x` otherwise.
    Leaky,
    Linear,
}

impl ActivationKind {
    pub fn from_name(name: &str) -> PlanResult<Self> {
        match name {
            "leaky" => Ok(Self::Leaky),
            "linear" => Ok(Self::Linear),
            other => Err(PlanError::config(format!("unsupported activation `{other}`"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Leaky => "leaky",
            Self::Linear => "linear",
        }
    }

    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Self::Leaky if x < 0.0 => LEAKY_SLOPE * x,
            _ => x,
        }
    }

    /// Inverse of [`apply`](Self::apply); both kinds are bijective.
    pub fn inverse(&self, y: f64) -> f64 {
        match self {
            Self::Leaky if y < 0.0 => y / LEAKY_SLOPE,
            _ => y,
        }
    }
}
