//! Batch allocation of provisional groups into real rooms.

extern crate alloc;

pub mod engine;
pub mod plan;

pub use engine::{AllocationEngine, AllocationReport, StudentOutcome};
pub use plan::{plan_allocation, AllocationNote, AllocationPlan, AllocationPolicy};
