//! Entities of the roster as seen by group formation and allocation.

use core::fmt::{self, Display};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DemographicAttribute, HostelError};

/// Name of the block that holds every provisional room.
pub const PROVISIONAL_BLOCK: &str = "Provisional";

/// Every provisional group has exactly this many seats.
pub const GROUP_CAPACITY: u32 = 4;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i32);

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }
    };
}

id_type!(StudentId);
id_type!(RoomId);
id_type!(BlockId);
id_type!(InviteId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demographics {
    pub gender: String,
    pub year: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub demographics: Demographics,
    pub gpa: f64,
    pub room: Option<RoomId>,
}

/// Demographic lock of a room. Each half is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomLock {
    pub gender: Option<String>,
    pub year: Option<String>,
}

impl RoomLock {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.gender.is_some() && self.year.is_some()
    }

    #[must_use]
    pub const fn is_unset(&self) -> bool {
        self.gender.is_none() && self.year.is_none()
    }

    /// Fills the missing halves from `demographics`, keeping whatever is already set.
    #[must_use]
    pub fn or_from(&self, demographics: &Demographics) -> Self {
        Self {
            gender: self
                .gender
                .clone()
                .or_else(|| Some(demographics.gender.clone())),
            year: self.year.clone().or_else(|| Some(demographics.year.clone())),
        }
    }

    /// Checks the halves that are set. Unset halves admit anybody.
    pub fn admits(&self, demographics: &Demographics) -> Result<(), DemographicAttribute> {
        if self
            .gender
            .as_ref()
            .is_some_and(|gender| *gender != demographics.gender)
        {
            return Err(DemographicAttribute::Gender);
        }
        if self
            .year
            .as_ref()
            .is_some_and(|year| *year != demographics.year)
        {
            return Err(DemographicAttribute::Year);
        }
        Ok(())
    }

    /// Strict variant used when somebody joins: both halves must be configured.
    pub fn enforce(&self, demographics: &Demographics) -> Result<(), HostelError> {
        if !self.is_complete() {
            return Err(HostelError::RoomPolicyUnconfigured);
        }
        self.admits(demographics)
            .map_err(HostelError::DemographicMismatch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomKind {
    /// Created ad hoc while a group forms.
    Provisional,
    /// Seeded inventory, target of allocation runs.
    Real,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub block: BlockId,
    pub block_name: String,
    pub number: String,
    pub capacity: u32,
    pub lock: RoomLock,
}

impl Room {
    #[must_use]
    pub fn kind(&self) -> RoomKind {
        if self.block_name == PROVISIONAL_BLOCK {
            RoomKind::Provisional
        } else {
            RoomKind::Real
        }
    }

    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.kind() == RoomKind::Provisional
    }

    /// The `<Block>-<NNN>` code of a real room.
    #[must_use]
    pub fn code(&self) -> Option<RoomCode> {
        if self.is_provisional() {
            return None;
        }
        format!("{}-{}", self.block_name, self.number).parse().ok()
    }
}

/// A real room together with how many students live in it right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupiedRoom {
    pub room: Room,
    pub occupancy: u32,
}

impl OccupiedRoom {
    #[must_use]
    pub const fn free(&self) -> u32 {
        self.room.capacity.saturating_sub(self.occupancy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    pub name: String,
}

/// Case insensitive room code such as `A-101`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCode {
    block: char,
    number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not a room code of the form <Block>-<NNN>")]
pub struct RoomCodeError(pub String);

impl RoomCode {
    #[must_use]
    pub fn block(&self) -> String {
        self.block.to_string()
    }

    #[must_use]
    pub fn number(&self) -> &str {
        &self.number
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_uppercase();
        let error = || RoomCodeError(input.trim().to_owned());
        let (block, number) = normalized.split_once('-').ok_or_else(error)?;
        let mut letters = block.chars();
        let block = match (letters.next(), letters.next()) {
            (Some(letter), None) if letter.is_ascii_uppercase() => letter,
            _ => return Err(error()),
        };
        if number.len() != 3 || !number.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(error());
        }
        Ok(Self {
            block,
            number: number.to_owned(),
        })
    }
}

impl Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.block, self.number)
    }
}

impl Serialize for RoomCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle of an invite. Every state except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl InviteStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Declined => "DECLINED",
            Self::Expired => "EXPIRED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Guarded transition, only a pending invite may move and only to a terminal state.
    pub const fn transition(self, next: Self) -> Result<Self, HostelError> {
        match (self, next) {
            (Self::Pending, Self::Accepted | Self::Declined | Self::Expired) => Ok(next),
            _ => Err(HostelError::InvalidInvite),
        }
    }
}

impl FromStr for InviteStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "PENDING" => Ok(Self::Pending),
            "ACCEPTED" => Ok(Self::Accepted),
            "DECLINED" => Ok(Self::Declined),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("unknown invite status {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: InviteId,
    pub from: StudentId,
    pub to: StudentId,
    pub room: RoomId,
    pub status: InviteStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteAction {
    Accept,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceEntry {
    /// 1-indexed position in the submitted list.
    pub rank: u32,
    pub room: RoomId,
    pub code: RoomCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceList {
    pub provisional_room: RoomId,
    pub submitted_by: StudentId,
    pub entries: Vec<PreferenceEntry>,
}
