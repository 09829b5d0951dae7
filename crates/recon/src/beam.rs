// Beam reconciliation: cross-checks one beam's two leaf banks against each
// other and against the plan's expectation, then resamples and converts the
// log stream onto the planned control points.

use serde::Serialize;

use mlcrecon_core::{LimitingDevice, PatientName, PlannedBeam, RotationDirection};
use mlcrecon_io::{LogBank, LogHeader};

use crate::config::{
    ANGLE_CONVERSION_BASE, DOSE_SCALE, FIELD_MARGIN, LEAF_POSITION_SCALE,
    NEGLIGIBLE_FIELD_WIDTH,
};
use crate::error::MismatchError;
use crate::{PickCriterion, ReconConfig};

/// Gantry angles are logged in tenths of a degree.
const GANTRY_TENTHS_PER_DEGREE: f64 = 10.0;

// ---------------------------------------------------------------------------
// Expected metadata
// ---------------------------------------------------------------------------

/// What the plan says the log header of one beam must contain.
///
/// `tolerance` and `coord_system` are only known to some planning systems;
/// when absent they are exempt from the metadata check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamExpectation {
    pub plan_uid: String,
    pub beam_number: u32,
    pub patient_id: String,
    pub patient_name: PatientName,
    pub leaf_count: u32,
    pub tolerance: Option<i32>,
    pub coord_system: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeamState {
    Unvalidated,
    Validated,
    Failed,
}

// ---------------------------------------------------------------------------
// LogBeam
// ---------------------------------------------------------------------------

/// One beam's pair of leaf banks joined with its planned counterpart.
///
/// Construction only orders and stores; nothing may be exported until
/// [`LogBeam::validate`] has moved the state to `Validated`.
#[derive(Debug, Clone)]
pub struct LogBeam {
    /// Side A first, side B second.
    banks: [LogBank; 2],
    expected: BeamExpectation,
    planned: PlannedBeam,
    log_header: LogHeader,
    log_dose: Vec<f64>,
    /// Degrees, log coordinate convention.
    log_gantry_angle: Vec<f64>,
    state: BeamState,
}

impl LogBeam {
    pub fn new(
        first: LogBank,
        second: LogBank,
        expected: BeamExpectation,
        planned: PlannedBeam,
    ) -> Self {
        let banks = if first.side <= second.side {
            [first, second]
        } else {
            [second, first]
        };
        let log_header = banks[0].header.clone();
        let log_dose = banks[0].dose_fraction.clone();
        let log_gantry_angle = banks[0]
            .gantry_angle
            .iter()
            .map(|tenths| tenths / GANTRY_TENTHS_PER_DEGREE)
            .collect();
        Self {
            banks,
            expected,
            planned,
            log_header,
            log_dose,
            log_gantry_angle,
            state: BeamState::Unvalidated,
        }
    }

    pub fn state(&self) -> BeamState {
        self.state
    }

    pub fn is_validated(&self) -> bool {
        self.state == BeamState::Validated
    }

    /// Header fields shared by both banks (meaningful once validated).
    pub fn log_header(&self) -> &LogHeader {
        &self.log_header
    }

    pub fn log_dose(&self) -> &[f64] {
        &self.log_dose
    }

    pub fn log_gantry_angle(&self) -> &[f64] {
        &self.log_gantry_angle
    }

    pub fn expected(&self) -> &BeamExpectation {
        &self.expected
    }

    pub fn planned(&self) -> &PlannedBeam {
        &self.planned
    }

    pub fn banks(&self) -> &[LogBank; 2] {
        &self.banks
    }

    pub fn invalidate(&mut self) {
        self.state = BeamState::Unvalidated;
    }

    /// Run both cross-checks from the current state. Idempotent; a prior
    /// failure does not stick if the checks now pass.
    pub fn validate(&mut self) -> Result<(), MismatchError> {
        match self.check_banks().and_then(|()| self.check_metadata()) {
            Ok(()) => {
                self.state = BeamState::Validated;
                Ok(())
            }
            Err(e) => {
                self.state = BeamState::Failed;
                Err(e)
            }
        }
    }

    /// The two banks must differ where files differ and agree everywhere the
    /// hardware drives them in lockstep.
    fn check_banks(&self) -> Result<(), MismatchError> {
        let uid = &self.expected.plan_uid;
        let beam_no = self.expected.beam_number;
        let [a, b] = &self.banks;

        for (field, same) in [
            ("filename", a.filename == b.filename),
            ("side", a.side == b.side),
        ] {
            if same {
                return Err(MismatchError::leafbank_with(
                    uid,
                    beam_no,
                    field,
                    "can't be identical for both banks",
                ));
            }
        }

        if a.version != b.version {
            return Err(MismatchError::leafbank(uid, beam_no, "version"));
        }
        if a.header.patient_name != b.header.patient_name {
            return Err(MismatchError::leafbank(uid, beam_no, "patient_name"));
        }
        if a.header.patient_id != b.header.patient_id {
            return Err(MismatchError::leafbank(uid, beam_no, "patient_id"));
        }
        if a.header.plan_uid != b.header.plan_uid {
            return Err(MismatchError::leafbank(uid, beam_no, "plan_uid"));
        }
        if a.header.beam_number != b.header.beam_number {
            return Err(MismatchError::leafbank(uid, beam_no, "beam_number"));
        }
        if a.header.tolerance != b.header.tolerance {
            return Err(MismatchError::leafbank(uid, beam_no, "tolerance"));
        }
        if a.header.leaf_count != b.header.leaf_count {
            return Err(MismatchError::leafbank(uid, beam_no, "leaf_count"));
        }
        if a.header.coord_system != b.header.coord_system {
            return Err(MismatchError::leafbank(uid, beam_no, "coord_system"));
        }

        if a.dose_fraction != b.dose_fraction {
            return Err(MismatchError::leafbank(uid, beam_no, "dose array"));
        }
        if a.gantry_angle != b.gantry_angle {
            return Err(MismatchError::leafbank(uid, beam_no, "gantry angle array"));
        }
        if a.previous_segment != b.previous_segment {
            return Err(MismatchError::leafbank(uid, beam_no, "previous segment array"));
        }

        Ok(())
    }

    /// Every field the plan expects must match the shared log header exactly.
    fn check_metadata(&self) -> Result<(), MismatchError> {
        let exp = &self.expected;
        let log = &self.log_header;
        let uid = &exp.plan_uid;
        let beam_no = exp.beam_number;

        if exp.plan_uid != log.plan_uid {
            return Err(MismatchError::beam(uid, beam_no, "plan_uid"));
        }
        if exp.beam_number != log.beam_number {
            return Err(MismatchError::beam(uid, beam_no, "beam_number"));
        }
        if exp.patient_id != log.patient_id {
            return Err(MismatchError::beam(uid, beam_no, "patient_id"));
        }
        if exp.patient_name != log.patient_name {
            return Err(MismatchError::beam(uid, beam_no, "patient_name"));
        }
        if exp.leaf_count != log.leaf_count {
            return Err(MismatchError::beam(uid, beam_no, "leaf_count"));
        }
        if let Some(tolerance) = exp.tolerance {
            if tolerance != log.tolerance {
                return Err(MismatchError::beam(uid, beam_no, "tolerance"));
            }
        }
        if let Some(coord_system) = exp.coord_system {
            if coord_system != log.coord_system {
                return Err(MismatchError::beam(uid, beam_no, "coord_system"));
            }
        }

        Ok(())
    }

    /// Map every planned control point onto a log sample index.
    ///
    /// Each control point except the last selects the first sample whose
    /// angle/dose has reached or passed the planned target; the last one
    /// always maps to the final sample so the full delivery is covered.
    pub fn pick_controlpoints(
        &self,
        criterion: PickCriterion,
    ) -> Result<Vec<usize>, MismatchError> {
        let uid = &self.expected.plan_uid;
        let beam_no = self.expected.beam_number;
        let cps = &self.planned.control_points;
        if cps.is_empty() {
            return Err(MismatchError::beam_with(
                uid,
                beam_no,
                "control points",
                "planned beam has no control points",
            ));
        }
        let samples = self.log_dose.len();
        if samples == 0 {
            return Err(MismatchError::beam_with(
                uid,
                beam_no,
                "sample count",
                "log contains no samples",
            ));
        }

        let mut indices = Vec::with_capacity(cps.len());
        for cp in &cps[..cps.len() - 1] {
            let index = match criterion {
                PickCriterion::Dose => {
                    let target = cp.cumulative_meterset_weight * DOSE_SCALE;
                    self.log_dose
                        .iter()
                        .position(|&dose| dose >= target)
                        .ok_or_else(|| {
                            MismatchError::beam_with(
                                uid,
                                beam_no,
                                "dose",
                                &format!("no log sample reaches cumulative dose {target}"),
                            )
                        })?
                }
                PickCriterion::Angle => {
                    let target = convert_angle(cp.gantry_angle);
                    let found = match self.planned.rotation_direction {
                        // Log angles decrease over a clockwise sweep.
                        RotationDirection::Clockwise => {
                            self.log_gantry_angle.iter().position(|&deg| deg <= target)
                        }
                        RotationDirection::CounterClockwise => {
                            self.log_gantry_angle.iter().position(|&deg| deg >= target)
                        }
                        RotationDirection::None => {
                            return Err(MismatchError::beam_with(
                                uid,
                                beam_no,
                                "rotation direction",
                                "angle criterion requires an arc beam with a rotation direction",
                            ))
                        }
                    };
                    found.ok_or_else(|| {
                        MismatchError::beam_with(
                            uid,
                            beam_no,
                            "gantry angle",
                            &format!("no log sample reaches gantry angle {target}"),
                        )
                    })?
                }
            };
            indices.push(index);
        }
        indices.push(samples - 1);
        Ok(indices)
    }

    /// Join both banks' leaf positions into per-sample `(x1, x2)` jaw pairs
    /// in physical units, with the negative-width and minimum-gap
    /// corrections applied. Bank B forms the x1 side (negated), bank A the
    /// x2 side.
    pub fn convert_mlc(
        &self,
        export_expected: bool,
        min_leaf_gap: f64,
    ) -> Result<Vec<Vec<(f64, f64)>>, MismatchError> {
        if self.state != BeamState::Validated {
            return Err(MismatchError::beam_with(
                &self.expected.plan_uid,
                self.expected.beam_number,
                "validation",
                "cannot export MLC positions of an unvalidated beam",
            ));
        }

        let (rows_a, rows_b) = if export_expected {
            (&self.banks[0].leaves_expected, &self.banks[1].leaves_expected)
        } else {
            (&self.banks[0].leaves_actual, &self.banks[1].leaves_actual)
        };

        let mut converted = Vec::with_capacity(rows_a.len());
        for (row_a, row_b) in rows_a.iter().zip(rows_b) {
            let mut pairs = Vec::with_capacity(row_a.len());
            for (&leaf_a, &leaf_b) in row_a.iter().zip(row_b) {
                let x2 = round2(leaf_a / LEAF_POSITION_SCALE);
                let x1 = round2(-leaf_b / LEAF_POSITION_SCALE);
                pairs.push(correct_pair(x1, x2, min_leaf_gap));
            }
            converted.push(pairs);
        }
        Ok(converted)
    }

    /// Rewrite a copy of the planned beam with the resampled log values:
    /// MLC positions at every control point, cumulative dose-weight and
    /// dose-reference coefficient at every control point after the first.
    pub fn export_logbeam(&self, config: &ReconConfig) -> Result<PlannedBeam, MismatchError> {
        if self.state != BeamState::Validated {
            return Err(MismatchError::beam_with(
                &self.expected.plan_uid,
                self.expected.beam_number,
                "validation",
                "cannot export an unvalidated beam",
            ));
        }

        let indices = self.pick_controlpoints(config.criterion)?;
        let mlc = self.convert_mlc(config.export_expected, config.min_leaf_gap)?;

        let mut beam = self.planned.clone();
        for (cp_index, cp) in beam.control_points.iter_mut().enumerate() {
            let sample = indices[cp_index];
            let positions = flatten_pairs(&mlc[sample]);
            match cp.positions_for_mut(LimitingDevice::Mlc) {
                Some(slot) => *slot = positions,
                None => {
                    return Err(MismatchError::beam_with(
                        &self.expected.plan_uid,
                        self.expected.beam_number,
                        "mlc positions",
                        &format!("control point {cp_index} has no MLC position set"),
                    ))
                }
            }
            if cp_index > 0 {
                let dose = self.log_dose[sample] / DOSE_SCALE;
                cp.cumulative_meterset_weight = dose;
                cp.dose_reference_coefficient = Some(dose);
            }
        }
        Ok(beam)
    }
}

// ---------------------------------------------------------------------------
// Geometry helpers
// ---------------------------------------------------------------------------

/// Map a gantry angle between the planned and logged conventions (their zero
/// points sit 180° apart). Self-inverse on [0, 360).
pub fn convert_angle(angle: f64) -> f64 {
    (ANGLE_CONVERSION_BASE - angle).rem_euclid(360.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Negative widths collapse to a hairline opening about the midpoint; widths
/// between the closed threshold and the minimum gap widen symmetrically to
/// exactly the minimum gap.
fn correct_pair(x1: f64, x2: f64, min_gap: f64) -> (f64, f64) {
    let (x1, x2) = if x2 - x1 < 0.0 {
        let mid = (x1 + x2) / 2.0;
        (mid - FIELD_MARGIN, mid + FIELD_MARGIN)
    } else {
        (x1, x2)
    };

    let width = x2 - x1;
    if width > NEGLIGIBLE_FIELD_WIDTH && width < min_gap {
        let pad = (min_gap - width) / 2.0;
        (x1 - pad, x2 + pad)
    } else {
        (x1, x2)
    }
}

/// One sample's pairs flattened to the planned-record layout: all x1 values
/// (bank B side) first, then all x2 values.
fn flatten_pairs(pairs: &[(f64, f64)]) -> Vec<f64> {
    pairs
        .iter()
        .map(|&(x1, _)| x1)
        .chain(pairs.iter().map(|&(_, x2)| x2))
        .collect()
}
