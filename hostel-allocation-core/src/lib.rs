//! Room-group formation for the hostel: provisional groups, invites, ranked
//! preferences and the room inventory the allocation run fills.

pub mod error;
pub mod group_formation;
pub mod memory;
pub mod model;
pub mod preferences;
pub mod roster;
pub mod seeder;

pub use error::{DemographicAttribute, HostelError, StoreError};
pub use memory::MemoryRoster;
pub use roster::{AllocationRecord, InviteSelector, RosterStore, RosterTx, TxFuture};
