//! The narrow repository interface the services are written against.
//!
//! A [`RosterStore`] hands out transactions. Everything a service does happens
//! through the [`RosterTx`] it is given, and the store commits the transaction
//! only when the operation returns `Ok`. Implementations must make the
//! `lock_*` reads exclusive until commit so that re-checks of occupancy and
//! the seat claim that follows cannot interleave with another transaction.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::error::HostelError;
use crate::model::{
    Block, BlockId, Demographics, Invite, InviteId, InviteStatus, OccupiedRoom, PreferenceList,
    Room, RoomCode, RoomId, RoomLock, Student, StudentId,
};

pub type TxFuture<'t, T> = BoxFuture<'t, Result<T, HostelError>>;

/// Which pending invites an invite query or expiry touches. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InviteSelector {
    pub from: Option<StudentId>,
    pub to: Option<StudentId>,
    pub room: Option<RoomId>,
    pub outside_room: Option<RoomId>,
    pub except: Option<InviteId>,
}

impl InviteSelector {
    #[must_use]
    pub fn sent_by(student: StudentId) -> Self {
        Self {
            from: Some(student),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn addressed_to(student: StudentId) -> Self {
        Self {
            to: Some(student),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_room(room: RoomId) -> Self {
        Self {
            room: Some(room),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn in_room(mut self, room: RoomId) -> Self {
        self.room = Some(room);
        self
    }

    #[must_use]
    pub const fn outside_room(mut self, room: RoomId) -> Self {
        self.outside_room = Some(room);
        self
    }

    #[must_use]
    pub const fn except(mut self, invite: InviteId) -> Self {
        self.except = Some(invite);
        self
    }

    /// Only pending invites ever match.
    #[must_use]
    pub fn matches(&self, invite: &Invite) -> bool {
        invite.status == InviteStatus::Pending
            && self.from.map_or(true, |from| invite.from == from)
            && self.to.map_or(true, |to| invite.to == to)
            && self.room.map_or(true, |room| invite.room == room)
            && self.outside_room.map_or(true, |room| invite.room != room)
            && self.except.map_or(true, |except| invite.id != except)
    }
}

/// One line of the allocation audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRecord {
    pub student: StudentId,
    pub room: Option<RoomId>,
    pub note: String,
}

#[async_trait]
pub trait RosterTx: Send {
    async fn find_student(&mut self, student: StudentId) -> Result<Option<Student>, HostelError>;

    /// Like [`RosterTx::find_student`] but holds the row until commit.
    async fn lock_student(&mut self, student: StudentId) -> Result<Option<Student>, HostelError>;

    async fn find_room(&mut self, room: RoomId) -> Result<Option<Room>, HostelError>;

    /// Like [`RosterTx::find_room`] but holds the row until commit.
    async fn lock_room(&mut self, room: RoomId) -> Result<Option<Room>, HostelError>;

    async fn room_occupancy(&mut self, room: RoomId) -> Result<u32, HostelError>;

    /// Members ordered by id.
    async fn room_members(&mut self, room: RoomId) -> Result<Vec<Student>, HostelError>;

    /// Moves the student into `room`, leaving any previous room.
    async fn claim_seat(&mut self, student: StudentId, room: RoomId) -> Result<(), HostelError>;

    async fn vacate_seat(&mut self, student: StudentId) -> Result<(), HostelError>;

    /// Sets each half of the lock only if it is still unset and returns the lock afterwards.
    async fn stamp_room_lock(
        &mut self,
        room: RoomId,
        demographics: &Demographics,
    ) -> Result<RoomLock, HostelError>;

    /// Returns the block id and whether it had to be created.
    async fn ensure_block(&mut self, name: &str) -> Result<(BlockId, bool), HostelError>;

    /// Inserts the room unless the block already has one with that number. Returns whether it was created.
    async fn ensure_room(
        &mut self,
        block: BlockId,
        number: &str,
        capacity: u32,
    ) -> Result<bool, HostelError>;

    /// Creates an unlocked room numbered `TEMP-<id>`.
    async fn create_provisional_room(
        &mut self,
        block: BlockId,
        capacity: u32,
    ) -> Result<Room, HostelError>;

    async fn list_blocks(&mut self) -> Result<Vec<Block>, HostelError>;

    async fn find_invite(&mut self, invite: InviteId) -> Result<Option<Invite>, HostelError>;

    async fn create_invite(
        &mut self,
        from: StudentId,
        to: StudentId,
        room: RoomId,
    ) -> Result<Invite, HostelError>;

    async fn set_invite_status(
        &mut self,
        invite: InviteId,
        status: InviteStatus,
    ) -> Result<(), HostelError>;

    /// Newest first.
    async fn list_pending_invites(
        &mut self,
        selector: &InviteSelector,
    ) -> Result<Vec<Invite>, HostelError>;

    /// Moves every matching pending invite to `EXPIRED` and returns how many there were.
    async fn expire_pending_invites(&mut self, selector: &InviteSelector)
        -> Result<u64, HostelError>;

    async fn find_real_room(&mut self, code: &RoomCode) -> Result<Option<Room>, HostelError>;

    /// Every real room with its current occupancy, ordered by id.
    async fn list_real_rooms(&mut self) -> Result<Vec<OccupiedRoom>, HostelError>;

    async fn find_preferences(
        &mut self,
        provisional_room: RoomId,
    ) -> Result<Option<PreferenceList>, HostelError>;

    /// Drops the previous list of the room and stores `rooms` ranked by position.
    async fn replace_preferences(
        &mut self,
        provisional_room: RoomId,
        submitted_by: StudentId,
        rooms: &[RoomId],
    ) -> Result<(), HostelError>;

    /// Forgets the room's list and its submitter. Returns whether there was one.
    async fn clear_preferences(&mut self, provisional_room: RoomId) -> Result<bool, HostelError>;

    /// Every non-empty preference list, ordered by provisional room id.
    async fn list_preference_lists(&mut self) -> Result<Vec<PreferenceList>, HostelError>;

    async fn record_allocation(&mut self, record: &AllocationRecord) -> Result<(), HostelError>;

    /// Takes the store wide allocation lock for the rest of the transaction.
    async fn try_lock_allocation(&mut self) -> Result<bool, HostelError>;
}

#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Runs `operation` in one atomic transaction, committing only if it succeeds.
    async fn transaction<T, F>(&self, operation: F) -> Result<T, HostelError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn RosterTx) -> TxFuture<'t, T> + Send + 'static;
}
