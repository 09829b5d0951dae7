use std::fmt;

use serde::Serialize;

/// A reconciliation mismatch, tagged by the level it was detected at.
///
/// Every variant names the offending field; the first mismatch aborts
/// reconciliation of the affected beam or plan, nothing is aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum MismatchError {
    /// The two banks nominally forming one beam disagree, or fail to differ
    /// where they must (side, filename).
    Leafbank {
        plan_uid: String,
        beam_number: u32,
        field: String,
        reason: String,
    },
    /// A beam's log-derived metadata disagrees with the plan's expectation,
    /// or an export-type operation was attempted on an unvalidated beam.
    Beam {
        plan_uid: String,
        beam_number: u32,
        field: String,
        reason: String,
    },
    /// Plan-level count or assignment failure.
    Plan {
        plan_uid: String,
        field: String,
        reason: String,
    },
}

const MUST_BE_IDENTICAL: &str = "must be identical";

impl MismatchError {
    pub fn leafbank(plan_uid: &str, beam_number: u32, field: &str) -> Self {
        Self::leafbank_with(plan_uid, beam_number, field, MUST_BE_IDENTICAL)
    }

    pub fn leafbank_with(plan_uid: &str, beam_number: u32, field: &str, reason: &str) -> Self {
        Self::Leafbank {
            plan_uid: plan_uid.to_string(),
            beam_number,
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn beam(plan_uid: &str, beam_number: u32, field: &str) -> Self {
        Self::beam_with(plan_uid, beam_number, field, MUST_BE_IDENTICAL)
    }

    pub fn beam_with(plan_uid: &str, beam_number: u32, field: &str, reason: &str) -> Self {
        Self::Beam {
            plan_uid: plan_uid.to_string(),
            beam_number,
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn plan(plan_uid: &str, field: &str, reason: &str) -> Self {
        Self::Plan {
            plan_uid: plan_uid.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The field the mismatch was detected on.
    pub fn field(&self) -> &str {
        match self {
            Self::Leafbank { field, .. } | Self::Beam { field, .. } | Self::Plan { field, .. } => {
                field
            }
        }
    }
}

impl fmt::Display for MismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leafbank { plan_uid, beam_number, field, reason } => write!(
                f,
                "plan {plan_uid}, beam {beam_number}: \
                 {field} mismatch between leafbanks A & B: {field} {reason}"
            ),
            Self::Beam { plan_uid, beam_number, field, reason } => write!(
                f,
                "plan {plan_uid}, beam {beam_number}: \
                 {field} mismatch between planned beam and log header: {field} {reason}"
            ),
            Self::Plan { plan_uid, field, reason } => {
                write!(f, "plan {plan_uid}: {field} mismatch: {reason}")
            }
        }
    }
}

impl std::error::Error for MismatchError {}
