//! `mlcrecon-recon` — Delivery-log / planned-record reconciliation engine.
//!
//! Pure engine crate: receives a parsed planned record and parsed leaf-bank
//! logs, cross-validates them, resamples the log down to the planned control
//! points and returns a corrected plan — or a structured mismatch telling the
//! caller exactly which field disagreed. No CLI or IO dependencies.

pub mod beam;
pub mod config;
pub mod engine;
pub mod error;
pub mod plan;

pub use beam::{convert_angle, BeamExpectation, BeamState, LogBeam};
pub use config::{ConfigError, PickCriterion, ReconConfig};
pub use engine::reconcile_plan;
pub use error::MismatchError;
pub use plan::{BeamSlot, LogPlan, PlanIdentity};
