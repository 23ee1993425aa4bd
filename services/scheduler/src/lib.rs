//! # fnsched-scheduler
//!
//! The scheduling control loop. A [`ScheduleQueueActor`] owns the priority
//! scheduler and serializes every request, resource update and consumer
//! round through its mailbox.
//!
//! ```text
//! stdin ──> driver ──> SchedulerHandle ──> ScheduleQueueActor ──> PriorityScheduler
//!              ^                                  │
//!              └──────── result promises <────────┘
//! ```
//!
//! ## Modules
//!
//! - `actor`: mailbox actor runtime
//! - `queue_actor`: the schedule queue actor and its handle
//! - `source`: resource-view snapshots
//! - `driver`: JSON-lines request front end
//! - `config`: `FNSCHED_*` environment configuration

pub mod actor;
pub mod config;
pub mod driver;
pub mod queue_actor;
pub mod source;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::Config;
pub use queue_actor::{spawn_schedule_queue, GroupSpec, QueueState, ScheduleQueueActor, SchedulerHandle};
pub use source::{ResourceViewSource, StaticResourceView, TomlFileSource};

/// Install the JSON log subscriber. `RUST_LOG` wins over `default_level`.
/// Logs go to stderr; stdout carries results.
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();
}
