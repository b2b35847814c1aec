use core::fmt::{self, Display};

use crate::model::{RoomId, StudentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemographicAttribute {
    Gender,
    Year,
}

impl Display for DemographicAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gender => "gender",
            Self::Year => "year",
        })
    }
}

/// Failure of the roster store itself, e.g. a lost connection or a constraint violation.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct StoreError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(error.into())
    }
}

#[allow(clippy::module_name_repetitions)]
#[derive(thiserror::Error, Debug)]
pub enum HostelError {
    #[error("student {0} does not exist")]
    StudentNotFound(StudentId),
    #[error("room {0} does not exist")]
    RoomNotFound(RoomId),
    #[error("You are not in a provisional room.")]
    NotInProvisionalGroup,
    #[error("You are not in a room. Request a provisional room first.")]
    NoRoom,
    #[error("Your group has {occupancy} of {capacity} members, preferences need a full group.")]
    GroupNotFull { occupancy: u32, capacity: u32 },
    #[error("Preferences of this group were submitted by another member.")]
    NotSubmitter,
    #[error("preferences must be a non-empty list of room codes")]
    EmptyPreferences,
    #[error("room {0} appears more than once in the preference list")]
    DuplicateRoomCode(String),
    #[error("unknown room codes: {}", .0.join(", "))]
    InvalidRoomCodes(Vec<String>),
    #[error("This room is restricted to same-{0} roommates.")]
    DemographicMismatch(DemographicAttribute),
    #[error("Room is full now. Try another room.")]
    RoomFull,
    #[error("Invalid invite")]
    InvalidInvite,
    #[error("This student is already in your room.")]
    AlreadyInRoom,
    #[error("You are already in another room. Leave it before accepting this invite.")]
    AlreadyInAnotherRoom,
    #[error("Room policy not configured. Try again.")]
    RoomPolicyUnconfigured,
    #[error("invalid seed plan: {0}")]
    InvalidSeedPlan(String),
    #[error("an allocation run is already in progress")]
    AllocationInProgress,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
