//! # fnsched-model
//!
//! Data model shared by the scheduling queue, the scheduling plugins and the
//! scheduler service.
//!
//! ## Contents
//!
//! - Status codes and the `Status` value returned by fallible scheduling steps
//! - Scalar resources (`CPU`, `Memory`, ...) and label maps with value counters
//! - Affinity selectors: label expressions grouped into weighted sub-conditions
//! - Instance and schedule-request payloads, including per-plugin contexts
//! - Read-only resource-view snapshots (resource units and their fragments)
//!
//! Every type here is plain data. Nothing in this crate performs scheduling.

mod affinity;
mod instance;
mod labels;
mod resources;
mod status;
mod unit;

pub use affinity::*;
pub use instance::*;
pub use labels::{LabelMap, ValueCounter};
pub use resources::{Resources, CPU_RESOURCE_NAME, EPSILON, MEMORY_RESOURCE_NAME};
pub use status::{Status, StatusCode};
pub use unit::{ResourceUnit, ResourceViewInfo};
