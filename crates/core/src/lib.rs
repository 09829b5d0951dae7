//! `mlcrecon-core` — In-memory model of a planned-treatment record.
//!
//! Pure data crate: the projection of the external hierarchical plan
//! document that the reconciliation engine reads and rewrites. The on-disk
//! format itself lives behind an external library; nothing here does IO.

pub mod plan;

pub use plan::{
    BeamType, ControlPoint, DevicePositionSet, LimitingDevice, PatientName, PlannedBeam,
    RotationDirection, RtPlan,
};
