use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Patient identity
// ---------------------------------------------------------------------------

/// Placeholder for missing or empty patient name parts.
pub const NAME_PLACEHOLDER: &str = "N/A";

/// Ordered patient name parts (family name first).
///
/// Both the plan document and the delivery logs carry the name as a short
/// list of caret-separated parts. Construction normalizes: empty parts are
/// replaced by [`NAME_PLACEHOLDER`], and the list is padded to at least two
/// parts so records from either source compare field-for-field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientName {
    parts: Vec<String>,
}

impl PatientName {
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts: Vec<String> = parts
            .into_iter()
            .map(|p| {
                let p = p.into();
                if p.is_empty() {
                    NAME_PLACEHOLDER.to_string()
                } else {
                    p
                }
            })
            .collect();
        while parts.len() < 2 {
            parts.push(NAME_PLACEHOLDER.to_string());
        }
        Self { parts }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl std::fmt::Display for PatientName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.parts.join("^"))
    }
}

// ---------------------------------------------------------------------------
// Beam geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeamType {
    /// Delivered while gantry and leaves move continuously (an arc).
    Dynamic,
    /// Delivered from a fixed position; passes through reconciliation as-is.
    Static,
}

/// Gantry rotation direction over a beam's control points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationDirection {
    #[serde(rename = "CW")]
    Clockwise,
    #[serde(rename = "CC")]
    CounterClockwise,
    #[serde(rename = "NONE")]
    None,
}

/// A beam-limiting device whose positions a control point may specify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitingDevice {
    AsymX,
    AsymY,
    Mlc,
}

/// Jaw/leaf positions for one limiting device at one control point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePositionSet {
    pub device: LimitingDevice,
    /// For [`LimitingDevice::Mlc`]: `2 × leaf_pair_count` values, the x1
    /// (negative) side first, then the x2 side.
    pub positions: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Control points
// ---------------------------------------------------------------------------

/// A discrete planned instant in a beam's delivery.
///
/// The first control point of a beam usually carries position sets for the
/// jaws and the MLC; later control points only the MLC. Lookup is by device
/// kind, never by position in the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Cumulative dose-weight fraction, 0.0 at beam start to 1.0 at beam end.
    pub cumulative_meterset_weight: f64,
    /// Gantry angle in degrees, planned coordinate convention.
    pub gantry_angle: f64,
    pub device_positions: Vec<DevicePositionSet>,
    #[serde(default)]
    pub dose_reference_coefficient: Option<f64>,
}

impl ControlPoint {
    pub fn positions_for(&self, device: LimitingDevice) -> Option<&[f64]> {
        self.device_positions
            .iter()
            .find(|set| set.device == device)
            .map(|set| set.positions.as_slice())
    }

    pub fn positions_for_mut(&mut self, device: LimitingDevice) -> Option<&mut Vec<f64>> {
        self.device_positions
            .iter_mut()
            .find(|set| set.device == device)
            .map(|set| &mut set.positions)
    }
}

// ---------------------------------------------------------------------------
// Beams + plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedBeam {
    pub beam_type: BeamType,
    pub leaf_pair_count: u32,
    pub rotation_direction: RotationDirection,
    pub control_points: Vec<ControlPoint>,
}

/// The planned-treatment record as the reconciliation engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtPlan {
    pub sop_instance_uid: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub study_id: String,
    pub patient_id: String,
    pub patient_name: PatientName,
    pub plan_label: String,
    pub approval_status: String,
    pub beams: Vec<PlannedBeam>,
}

impl RtPlan {
    /// Number of dynamic (arc) beams in the plan.
    pub fn arc_count(&self) -> usize {
        self.beams
            .iter()
            .filter(|b| b.beam_type == BeamType::Dynamic)
            .count()
    }
}
