//! Task scheduler: queue registry, worker pool supervisor and weighted
//! queue selection.
//!
//! Split into focused submodules:
//! - `core`: handle, shared state, registration and lifecycle
//! - `selection`: kinetic priority (weighted lottery) queue selection
//! - `execution`: producer/consumer paths, worker filling and shutdown

mod core;
mod execution;
mod selection;

pub use self::core::{SchedulerLifecycle, TaskScheduler};
pub(crate) use self::core::SchedulerShared;
