//! Admission control building blocks.
//!
//! The engine's `tick` combines these: pop the [`JobQueue`] head, ask the
//! [`ResourceMonitor`] for the current budget and the job's cost, and take a
//! [`Reservation`] from the [`UnitLedger`] before handing the job to the
//! supervisor.

mod budget;
mod queue;
mod resources;

pub use budget::{Reservation, UnitLedger};
pub use queue::JobQueue;
pub use resources::{
    estimate_units, FixedSampler, HostSample, HostSampler, ResourceMonitor, RuntimeBudget,
    SysinfoSampler, MAX_JOB_UNITS,
};
