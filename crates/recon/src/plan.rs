// Plan reconciliation: pairs a plan's dynamic beams with its pool of leaf
// banks, maintains plan-level validity and regenerates identity at export.

use chrono::NaiveDateTime;
use serde::Serialize;

use mlcrecon_core::{BeamType, PatientName, RtPlan};
use mlcrecon_io::LogBank;

use crate::beam::{BeamExpectation, LogBeam};
use crate::config::{EXPORT_LABEL_PREFIX, PLAN_LABEL_MAX};
use crate::error::MismatchError;
use crate::ReconConfig;

/// Plan-level identity shared with every beam expectation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanIdentity {
    pub plan_uid: String,
    pub patient_id: String,
    pub patient_name: PatientName,
    pub plan_label: String,
}

/// One position in the plan's beam sequence.
#[derive(Debug, Clone)]
pub enum BeamSlot {
    /// Static beam; passes through from the planned record unchanged.
    Static,
    /// Dynamic beam awaiting its pair of log banks.
    Pending,
    /// Dynamic beam joined with its log banks.
    Reconciled(Box<LogBeam>),
}

/// A planned record under reconciliation against its delivery logs.
#[derive(Debug)]
pub struct LogPlan {
    plan: RtPlan,
    identity: PlanIdentity,
    beams: Vec<BeamSlot>,
    arc_count: usize,
    validated: bool,
}

impl LogPlan {
    pub fn new(plan: RtPlan) -> Self {
        let identity = PlanIdentity {
            plan_uid: plan.sop_instance_uid.clone(),
            patient_id: plan.patient_id.clone(),
            patient_name: plan.patient_name.clone(),
            plan_label: plan.plan_label.clone(),
        };
        let beams: Vec<BeamSlot> = plan
            .beams
            .iter()
            .map(|beam| match beam.beam_type {
                BeamType::Dynamic => BeamSlot::Pending,
                BeamType::Static => BeamSlot::Static,
            })
            .collect();
        let arc_count = beams
            .iter()
            .filter(|slot| matches!(slot, BeamSlot::Pending))
            .count();
        Self {
            plan,
            identity,
            beams,
            arc_count,
            validated: false,
        }
    }

    pub fn identity(&self) -> &PlanIdentity {
        &self.identity
    }

    pub fn plan(&self) -> &RtPlan {
        &self.plan
    }

    pub fn beams(&self) -> &[BeamSlot] {
        &self.beams
    }

    pub fn arc_count(&self) -> usize {
        self.arc_count
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Pair the bank pool onto the dynamic beam slots in planned order.
    ///
    /// The pool must hold exactly two banks per dynamic beam; banks are
    /// sorted by their recorded beam number and assigned two at a time.
    /// Every constructed beam is validated immediately.
    pub fn construct_logbeams(&mut self, bank_pool: Vec<LogBank>) -> Result<(), MismatchError> {
        self.validated = false;

        let needed = 2 * self.arc_count;
        if bank_pool.len() != needed {
            return Err(MismatchError::plan(
                &self.identity.plan_uid,
                "beam count",
                &format!(
                    "plan needs {needed} leafbanks for beam construction, {} were passed",
                    bank_pool.len()
                ),
            ));
        }

        let mut sorted = bank_pool;
        sorted.sort_by_key(|bank| bank.header.beam_number);
        let mut pool = sorted.into_iter();

        for (index, slot) in self.beams.iter_mut().enumerate() {
            if matches!(slot, BeamSlot::Static) {
                continue;
            }
            let (Some(first), Some(second)) = (pool.next(), pool.next()) else {
                return Err(MismatchError::plan(
                    &self.identity.plan_uid,
                    "beam count",
                    "leafbank pool exhausted during beam construction",
                ));
            };
            let planned_beam = self.plan.beams[index].clone();
            let expected = BeamExpectation {
                plan_uid: self.identity.plan_uid.clone(),
                beam_number: (index + 1) as u32,
                patient_id: self.identity.patient_id.clone(),
                patient_name: self.identity.patient_name.clone(),
                leaf_count: planned_beam.leaf_pair_count,
                tolerance: None,
                coord_system: None,
            };
            let mut beam = LogBeam::new(first, second, expected, planned_beam);
            beam.validate()?;
            *slot = BeamSlot::Reconciled(Box::new(beam));
        }

        Ok(())
    }

    /// Re-validate every beam, then the plan-level invariants: each dynamic
    /// beam's recorded number must equal its 1-based position, and the slot
    /// count must match the planned record's beam count.
    pub fn validate(&mut self) -> Result<(), MismatchError> {
        self.validated = false;
        let uid = self.identity.plan_uid.clone();

        for (index, slot) in self.beams.iter_mut().enumerate() {
            match slot {
                BeamSlot::Static => {}
                BeamSlot::Pending => {
                    return Err(MismatchError::plan(
                        &uid,
                        "beam assignment",
                        &format!("dynamic beam {} has no leafbanks assigned", index + 1),
                    ))
                }
                BeamSlot::Reconciled(beam) => {
                    beam.validate()?;
                    let recorded = beam.log_header().beam_number as usize;
                    if recorded != index + 1 {
                        return Err(MismatchError::plan(
                            &uid,
                            "beam assignment",
                            &format!(
                                "beam at position {index} of beam list identifies as \
                                 beam {recorded} instead of beam {}",
                                index + 1
                            ),
                        ));
                    }
                }
            }
        }

        if self.beams.len() != self.plan.beams.len() {
            return Err(MismatchError::plan(
                &uid,
                "beam count",
                &format!(
                    "beam list contains {} entries, plan record declares {}",
                    self.beams.len(),
                    self.plan.beams.len()
                ),
            ));
        }

        self.validated = true;
        Ok(())
    }

    /// Clear plan validity and every beam's state. Call before mutating
    /// anything a previous validation depended on.
    pub fn invalidate(&mut self) {
        self.validated = false;
        for slot in &mut self.beams {
            if let BeamSlot::Reconciled(beam) = slot {
                beam.invalidate();
            }
        }
    }

    /// Export with the current local time stamped into the regenerated
    /// identifiers.
    pub fn export(&self, label: &str, config: &ReconConfig) -> Result<RtPlan, MismatchError> {
        self.export_at(label, config, chrono::Local::now().naive_local())
    }

    /// Build the as-delivered plan: every dynamic beam replaced by its
    /// log-derived export, static beams copied through, identity fields
    /// regenerated so the result never collides with the source plan.
    pub fn export_at(
        &self,
        label: &str,
        config: &ReconConfig,
        timestamp: NaiveDateTime,
    ) -> Result<RtPlan, MismatchError> {
        if !self.validated {
            return Err(MismatchError::plan(
                &self.identity.plan_uid,
                "validation",
                "can't export an unvalidated plan",
            ));
        }

        let mut export = self.plan.clone();
        for (index, slot) in self.beams.iter().enumerate() {
            match slot {
                BeamSlot::Static => {}
                BeamSlot::Pending => {
                    return Err(MismatchError::plan(
                        &self.identity.plan_uid,
                        "beam assignment",
                        &format!("dynamic beam {} has no leafbanks assigned", index + 1),
                    ))
                }
                BeamSlot::Reconciled(beam) => {
                    export.beams[index] = beam.export_logbeam(config)?;
                }
            }
        }

        let prefixed = format!("{EXPORT_LABEL_PREFIX}{label}");
        export.plan_label = prefixed.chars().take(PLAN_LABEL_MAX).collect();

        let short_stamp = timestamp.format("%H%M%S").to_string();
        let full_stamp = timestamp.format("%Y%m%d%H%M%S").to_string();
        export.study_instance_uid =
            replace_last_uid_component(&export.study_instance_uid, &short_stamp);
        export.series_instance_uid =
            replace_last_uid_component(&export.series_instance_uid, &full_stamp);
        export.sop_instance_uid =
            replace_last_uid_component(&export.sop_instance_uid, &full_stamp);
        export.study_id = format!("Id{short_stamp}");
        export.approval_status = "UNAPPROVED".to_string();

        Ok(export)
    }
}

fn replace_last_uid_component(uid: &str, stamp: &str) -> String {
    match uid.rfind('.') {
        Some(position) => format!("{}.{stamp}", &uid[..position]),
        None => stamp.to_string(),
    }
}
