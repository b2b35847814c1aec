//! Roster store kept in process memory.
//!
//! A transaction works on a private copy of the whole roster while holding the
//! store mutex and swaps the copy in on success, so transactions are
//! serialized and a failed one leaves no trace.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::HostelError;
use crate::model::{
    Block, BlockId, Demographics, Invite, InviteId, InviteStatus, OccupiedRoom, PreferenceEntry,
    PreferenceList, Room, RoomCode, RoomId, RoomLock, Student, StudentId, PROVISIONAL_BLOCK,
};
use crate::roster::{AllocationRecord, InviteSelector, RosterStore, RosterTx, TxFuture};

#[derive(Debug, Clone)]
struct StoredRoom {
    block: BlockId,
    number: String,
    capacity: u32,
    lock: RoomLock,
}

#[derive(Debug, Clone)]
struct StoredPreferences {
    submitted_by: StudentId,
    rooms: Vec<RoomId>,
}

#[derive(Debug, Clone, Default)]
struct RosterState {
    next_id: i32,
    blocks: BTreeMap<BlockId, String>,
    rooms: BTreeMap<RoomId, StoredRoom>,
    students: BTreeMap<StudentId, Student>,
    invites: BTreeMap<InviteId, Invite>,
    preferences: BTreeMap<RoomId, StoredPreferences>,
    allocations: Vec<AllocationRecord>,
}

impl RosterState {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn room(&self, id: RoomId) -> Option<Room> {
        let stored = self.rooms.get(&id)?;
        Some(Room {
            id,
            block: stored.block,
            block_name: self.blocks.get(&stored.block).cloned().unwrap_or_default(),
            number: stored.number.clone(),
            capacity: stored.capacity,
            lock: stored.lock.clone(),
        })
    }

    fn occupancy(&self, room: RoomId) -> u32 {
        let count = self
            .students
            .values()
            .filter(|student| student.room == Some(room))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn block_named(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|(_, block)| block.as_str() == name)
            .map(|(id, _)| *id)
    }

    fn ensure_block(&mut self, name: &str) -> (BlockId, bool) {
        if let Some(id) = self.block_named(name) {
            return (id, false);
        }
        let id = BlockId(self.next_id());
        self.blocks.insert(id, name.to_owned());
        (id, true)
    }

    fn insert_room(&mut self, block: BlockId, number: &str, capacity: u32, lock: RoomLock) -> RoomId {
        let id = RoomId(self.next_id());
        self.rooms.insert(
            id,
            StoredRoom {
                block,
                number: number.to_owned(),
                capacity,
                lock,
            },
        );
        id
    }

    fn preference_list(&self, room: RoomId) -> Option<PreferenceList> {
        let stored = self.preferences.get(&room)?;
        let entries = stored
            .rooms
            .iter()
            .zip(1..)
            .filter_map(|(desired, rank)| {
                Some(PreferenceEntry {
                    rank,
                    room: *desired,
                    code: self.room(*desired)?.code()?,
                })
            })
            .collect();
        Some(PreferenceList {
            provisional_room: room,
            submitted_by: stored.submitted_by,
            entries,
        })
    }

    fn student_mut(&mut self, student: StudentId) -> Result<&mut Student, HostelError> {
        self.students
            .get_mut(&student)
            .ok_or(HostelError::StudentNotFound(student))
    }
}

/// In-memory [`RosterStore`] used by tests and local demos.
#[derive(Debug, Default)]
pub struct MemoryRoster {
    state: Mutex<RosterState>,
}

impl MemoryRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_student(&self, name: &str, gender: &str, year: &str, gpa: f64) -> StudentId {
        let mut state = self.state.lock().await;
        let id = StudentId(state.next_id());
        state.students.insert(
            id,
            Student {
                id,
                name: name.to_owned(),
                demographics: Demographics {
                    gender: gender.to_owned(),
                    year: year.to_owned(),
                },
                gpa,
                room: None,
            },
        );
        id
    }

    /// Adds a room to the named block, creating the block when needed.
    pub async fn add_room(&self, block: &str, number: &str, capacity: u32, lock: RoomLock) -> RoomId {
        let mut state = self.state.lock().await;
        let (block, _) = state.ensure_block(block);
        state.insert_room(block, number, capacity, lock)
    }

    /// Seats a student directly, bypassing invites. Meant for arranging fixtures.
    pub async fn seat(&self, student: StudentId, room: RoomId) {
        let mut state = self.state.lock().await;
        if let Some(student) = state.students.get_mut(&student) {
            student.room = Some(room);
        }
    }

    pub async fn student(&self, student: StudentId) -> Option<Student> {
        self.state.lock().await.students.get(&student).cloned()
    }

    pub async fn room(&self, room: RoomId) -> Option<Room> {
        self.state.lock().await.room(room)
    }

    pub async fn occupancy(&self, room: RoomId) -> u32 {
        self.state.lock().await.occupancy(room)
    }

    pub async fn invite(&self, invite: InviteId) -> Option<Invite> {
        self.state.lock().await.invites.get(&invite).cloned()
    }

    pub async fn rooms(&self) -> Vec<Room> {
        let state = self.state.lock().await;
        state.rooms.keys().filter_map(|id| state.room(*id)).collect()
    }

    pub async fn blocks(&self) -> Vec<Block> {
        let state = self.state.lock().await;
        state
            .blocks
            .iter()
            .map(|(id, name)| Block {
                id: *id,
                name: name.clone(),
            })
            .collect()
    }

    pub async fn allocations(&self) -> Vec<AllocationRecord> {
        self.state.lock().await.allocations.clone()
    }
}

#[async_trait]
impl RosterStore for MemoryRoster {
    async fn transaction<T, F>(&self, operation: F) -> Result<T, HostelError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn RosterTx) -> TxFuture<'t, T> + Send + 'static,
    {
        let mut committed = self.state.lock().await;
        let mut tx = MemoryTx {
            state: committed.clone(),
        };
        let result = {
            let tx: &mut dyn RosterTx = &mut tx;
            operation(tx).await
        };
        if result.is_ok() {
            *committed = tx.state;
        }
        result
    }
}

struct MemoryTx {
    state: RosterState,
}

#[async_trait]
impl RosterTx for MemoryTx {
    async fn find_student(&mut self, student: StudentId) -> Result<Option<Student>, HostelError> {
        Ok(self.state.students.get(&student).cloned())
    }

    async fn lock_student(&mut self, student: StudentId) -> Result<Option<Student>, HostelError> {
        self.find_student(student).await
    }

    async fn find_room(&mut self, room: RoomId) -> Result<Option<Room>, HostelError> {
        Ok(self.state.room(room))
    }

    async fn lock_room(&mut self, room: RoomId) -> Result<Option<Room>, HostelError> {
        self.find_room(room).await
    }

    async fn room_occupancy(&mut self, room: RoomId) -> Result<u32, HostelError> {
        Ok(self.state.occupancy(room))
    }

    async fn room_members(&mut self, room: RoomId) -> Result<Vec<Student>, HostelError> {
        Ok(self
            .state
            .students
            .values()
            .filter(|student| student.room == Some(room))
            .cloned()
            .collect())
    }

    async fn claim_seat(&mut self, student: StudentId, room: RoomId) -> Result<(), HostelError> {
        if !self.state.rooms.contains_key(&room) {
            return Err(HostelError::RoomNotFound(room));
        }
        self.state.student_mut(student)?.room = Some(room);
        Ok(())
    }

    async fn vacate_seat(&mut self, student: StudentId) -> Result<(), HostelError> {
        self.state.student_mut(student)?.room = None;
        Ok(())
    }

    async fn stamp_room_lock(
        &mut self,
        room: RoomId,
        demographics: &Demographics,
    ) -> Result<RoomLock, HostelError> {
        let stored = self
            .state
            .rooms
            .get_mut(&room)
            .ok_or(HostelError::RoomNotFound(room))?;
        stored.lock = stored.lock.or_from(demographics);
        Ok(stored.lock.clone())
    }

    async fn ensure_block(&mut self, name: &str) -> Result<(BlockId, bool), HostelError> {
        Ok(self.state.ensure_block(name))
    }

    async fn ensure_room(
        &mut self,
        block: BlockId,
        number: &str,
        capacity: u32,
    ) -> Result<bool, HostelError> {
        let exists = self
            .state
            .rooms
            .values()
            .any(|room| room.block == block && room.number == number);
        if !exists {
            self.state
                .insert_room(block, number, capacity, RoomLock::default());
        }
        Ok(!exists)
    }

    async fn create_provisional_room(
        &mut self,
        block: BlockId,
        capacity: u32,
    ) -> Result<Room, HostelError> {
        let id = RoomId(self.state.next_id());
        self.state.rooms.insert(
            id,
            StoredRoom {
                block,
                number: format!("TEMP-{id}"),
                capacity,
                lock: RoomLock::default(),
            },
        );
        self.state.room(id).ok_or(HostelError::RoomNotFound(id))
    }

    async fn list_blocks(&mut self) -> Result<Vec<Block>, HostelError> {
        Ok(self
            .state
            .blocks
            .iter()
            .map(|(id, name)| Block {
                id: *id,
                name: name.clone(),
            })
            .collect())
    }

    async fn find_invite(&mut self, invite: InviteId) -> Result<Option<Invite>, HostelError> {
        Ok(self.state.invites.get(&invite).cloned())
    }

    async fn create_invite(
        &mut self,
        from: StudentId,
        to: StudentId,
        room: RoomId,
    ) -> Result<Invite, HostelError> {
        let invite = Invite {
            id: InviteId(self.state.next_id()),
            from,
            to,
            room,
            status: InviteStatus::Pending,
        };
        self.state.invites.insert(invite.id, invite.clone());
        Ok(invite)
    }

    async fn set_invite_status(
        &mut self,
        invite: InviteId,
        status: InviteStatus,
    ) -> Result<(), HostelError> {
        let stored = self
            .state
            .invites
            .get_mut(&invite)
            .ok_or(HostelError::InvalidInvite)?;
        stored.status = status;
        Ok(())
    }

    async fn list_pending_invites(
        &mut self,
        selector: &InviteSelector,
    ) -> Result<Vec<Invite>, HostelError> {
        Ok(self
            .state
            .invites
            .values()
            .rev()
            .filter(|invite| selector.matches(invite))
            .cloned()
            .collect())
    }

    async fn expire_pending_invites(
        &mut self,
        selector: &InviteSelector,
    ) -> Result<u64, HostelError> {
        let mut expired = 0;
        for invite in self.state.invites.values_mut() {
            if selector.matches(invite) {
                invite.status = InviteStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn find_real_room(&mut self, code: &RoomCode) -> Result<Option<Room>, HostelError> {
        let Some(block) = self.state.block_named(&code.block()) else {
            return Ok(None);
        };
        let id = self
            .state
            .rooms
            .iter()
            .find(|(_, room)| room.block == block && room.number == code.number())
            .map(|(id, _)| *id);
        Ok(id
            .and_then(|id| self.state.room(id))
            .filter(|room| !room.is_provisional()))
    }

    async fn list_real_rooms(&mut self) -> Result<Vec<OccupiedRoom>, HostelError> {
        let state = &self.state;
        Ok(state
            .rooms
            .keys()
            .filter_map(|id| state.room(*id))
            .filter(|room| room.block_name != PROVISIONAL_BLOCK)
            .map(|room| OccupiedRoom {
                occupancy: state.occupancy(room.id),
                room,
            })
            .collect())
    }

    async fn find_preferences(
        &mut self,
        provisional_room: RoomId,
    ) -> Result<Option<PreferenceList>, HostelError> {
        Ok(self.state.preference_list(provisional_room))
    }

    async fn replace_preferences(
        &mut self,
        provisional_room: RoomId,
        submitted_by: StudentId,
        rooms: &[RoomId],
    ) -> Result<(), HostelError> {
        self.state.preferences.insert(
            provisional_room,
            StoredPreferences {
                submitted_by,
                rooms: rooms.to_vec(),
            },
        );
        Ok(())
    }

    async fn clear_preferences(&mut self, provisional_room: RoomId) -> Result<bool, HostelError> {
        Ok(self.state.preferences.remove(&provisional_room).is_some())
    }

    async fn list_preference_lists(&mut self) -> Result<Vec<PreferenceList>, HostelError> {
        let state = &self.state;
        Ok(state
            .preferences
            .keys()
            .filter_map(|room| state.preference_list(*room))
            .filter(|list| !list.entries.is_empty())
            .collect())
    }

    async fn record_allocation(&mut self, record: &AllocationRecord) -> Result<(), HostelError> {
        self.state.allocations.push(record.clone());
        Ok(())
    }

    async fn try_lock_allocation(&mut self) -> Result<bool, HostelError> {
        // the store mutex already keeps every other transaction out
        Ok(true)
    }
}
