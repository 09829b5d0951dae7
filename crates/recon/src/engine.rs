use mlcrecon_core::RtPlan;
use mlcrecon_io::LogBank;

use crate::error::MismatchError;
use crate::plan::LogPlan;

/// Reconcile one plan against its pool of leaf-bank logs in one call:
/// construct, pair and validate. Returns the validated [`LogPlan`] ready for
/// export, or the first mismatch encountered.
///
/// Callers that need staged control (re-validation after inspection, partial
/// construction) use the [`LogPlan`] methods directly.
pub fn reconcile_plan(plan: &RtPlan, banks: Vec<LogBank>) -> Result<LogPlan, MismatchError> {
    let mut log_plan = LogPlan::new(plan.clone());
    log_plan.construct_logbeams(banks)?;
    log_plan.validate()?;
    Ok(log_plan)
}
