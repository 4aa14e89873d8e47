//! Single-field comparisons against a ticker snapshot.
//!
//! Operators and value shapes form a closed set that is checked once when a
//! rule is validated, so evaluation itself never fails. Equality is exact on
//! `f64`: callers that need a tolerance must round before storing values.

use crate::error::{AlertError, AlertResult};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot fields a condition can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    #[serde(alias = "mean_sent")]
    Mean,
    #[serde(alias = "std_sent")]
    StdDev,
    #[serde(alias = "min_sent")]
    Min,
    #[serde(alias = "max_sent")]
    Max,
    Count,
    #[serde(alias = "unc_mean")]
    MeanUncertainty,
    #[serde(alias = "time_decay_mean")]
    TimeDecayedMean,
    Volatility,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Mean,
        Field::StdDev,
        Field::Min,
        Field::Max,
        Field::Count,
        Field::MeanUncertainty,
        Field::TimeDecayedMean,
        Field::Volatility,
    ];

    /// Reads the field from a snapshot. Absent or NaN values mean the data is
    /// not ready yet.
    pub fn read(&self, snapshot: &Snapshot) -> Option<f64> {
        let value = match self {
            Field::Mean => snapshot.mean,
            Field::StdDev => snapshot.std_dev,
            Field::Min => snapshot.min,
            Field::Max => snapshot.max,
            Field::Count => snapshot.count as f64,
            Field::MeanUncertainty => snapshot.mean_uncertainty,
            Field::TimeDecayedMean => snapshot.time_decayed_mean,
            Field::Volatility => snapshot.volatility?,
        };
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Mean => "mean",
            Field::StdDev => "std_dev",
            Field::Min => "min",
            Field::Max => "max",
            Field::Count => "count",
            Field::MeanUncertainty => "mean_uncertainty",
            Field::TimeDecayedMean => "time_decayed_mean",
            Field::Volatility => "volatility",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">", alias = "gt", alias = "greater_than")]
    GreaterThan,
    #[serde(rename = "<", alias = "lt", alias = "less_than")]
    LessThan,
    #[serde(rename = ">=", alias = "gte", alias = "greater_equal")]
    GreaterOrEqual,
    #[serde(rename = "<=", alias = "lte", alias = "less_equal")]
    LessOrEqual,
    #[serde(rename = "==", alias = "eq", alias = "equal")]
    Equal,
    #[serde(rename = "!=", alias = "ne", alias = "not_equal")]
    NotEqual,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "outside")]
    Outside,
    #[serde(rename = "cross_above", alias = "crossed_above")]
    CrossedAbove,
    #[serde(rename = "cross_below", alias = "crossed_below")]
    CrossedBelow,
}

impl Operator {
    pub fn is_crossing(&self) -> bool {
        matches!(self, Operator::CrossedAbove | Operator::CrossedBelow)
    }

    pub fn takes_range(&self) -> bool {
        matches!(self, Operator::Between | Operator::Outside)
    }
}

/// A scalar threshold, or an inclusive `[low, high]` range for
/// `between`/`outside`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Scalar(f64),
    Range([f64; 2]),
}

impl From<f64> for Threshold {
    fn from(value: f64) -> Self {
        Threshold::Scalar(value)
    }
}

impl From<(f64, f64)> for Threshold {
    fn from((low, high): (f64, f64)) -> Self {
        Threshold::Range([low, high])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub operator: Operator,
    pub value: Threshold,
}

impl Condition {
    pub fn new(field: Field, operator: Operator, value: impl Into<Threshold>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }

    /// Checks that the value shape matches the operator.
    pub fn validate(&self) -> AlertResult<()> {
        match (self.operator.takes_range(), self.value) {
            (true, Threshold::Range([low, high])) => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(AlertError::validation(format!(
                        "condition on '{}' has a non-finite range bound",
                        self.field
                    )));
                }
                if low > high {
                    return Err(AlertError::validation(format!(
                        "condition on '{}' has range low {} above high {}",
                        self.field, low, high
                    )));
                }
                Ok(())
            }
            (true, Threshold::Scalar(_)) => Err(AlertError::validation(format!(
                "operator {:?} on '{}' requires a [low, high] range",
                self.operator, self.field
            ))),
            (false, Threshold::Scalar(v)) if v.is_finite() => Ok(()),
            (false, Threshold::Scalar(_)) => Err(AlertError::validation(format!(
                "condition on '{}' has a non-finite threshold",
                self.field
            ))),
            (false, Threshold::Range(_)) => Err(AlertError::validation(format!(
                "operator {:?} on '{}' requires a single numeric value",
                self.operator, self.field
            ))),
        }
    }

    pub fn matches(&self, current: f64, previous: Option<f64>) -> bool {
        evaluate(self.operator, &self.value, current, previous)
    }
}

/// Evaluates one comparison. Pure; a crossing with no previous observation
/// and a NaN current value both evaluate to `false`.
pub fn evaluate(operator: Operator, value: &Threshold, current: f64, previous: Option<f64>) -> bool {
    if current.is_nan() {
        return false;
    }
    match (operator, *value) {
        (Operator::GreaterThan, Threshold::Scalar(v)) => current > v,
        (Operator::LessThan, Threshold::Scalar(v)) => current < v,
        (Operator::GreaterOrEqual, Threshold::Scalar(v)) => current >= v,
        (Operator::LessOrEqual, Threshold::Scalar(v)) => current <= v,
        (Operator::Equal, Threshold::Scalar(v)) => current == v,
        (Operator::NotEqual, Threshold::Scalar(v)) => current != v,
        (Operator::Between, Threshold::Range([low, high])) => low <= current && current <= high,
        (Operator::Outside, Threshold::Range([low, high])) => current < low || current > high,
        (Operator::CrossedAbove, Threshold::Scalar(v)) => {
            previous.is_some_and(|prev| prev <= v && current > v)
        }
        (Operator::CrossedBelow, Threshold::Scalar(v)) => {
            previous.is_some_and(|prev| prev >= v && current < v)
        }
        // Shape mismatches never pass validation.
        _ => false,
    }
}
