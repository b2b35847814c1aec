//! [`RosterStore`] on PostgreSQL.
//!
//! Transactions run at the default READ COMMITTED level. The `lock_*` reads
//! take `FOR UPDATE` row locks, so whoever re-checks occupancy after locking a
//! room sees every seat claimed by transactions that held the lock before.

use std::collections::BTreeMap;

use async_trait::async_trait;
use diesel::dsl::{count_star, now, sql};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Integer};
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncConnection as _, AsyncPgConnection, RunQueryDsl};
use hostel_allocation_core::model::{
    Block, BlockId, Demographics, Invite, InviteId, InviteStatus, OccupiedRoom, PreferenceEntry,
    PreferenceList, Room, RoomCode, RoomId, RoomLock, Student, StudentId, PROVISIONAL_BLOCK,
};
use hostel_allocation_core::{
    AllocationRecord, HostelError, InviteSelector, RosterStore, RosterTx, TxFuture,
};
use tracing::debug;

use crate::error::{DatabaseError, TransactionError};
use crate::models::{
    BlockRow, InviteRow, NewAllocation, NewInvite, NewPreference, NewRoom, NewStudent, RoomRow,
    StudentRow,
};
use crate::schema::{
    allocations, blocks, preference_submissions, room_invites, room_preferences, rooms, students,
};
use crate::Pool;

/// Key of the transaction scoped advisory lock serializing allocation runs.
const ALLOCATION_LOCK_KEY: i64 = 0x686f_7374_656c;

trait OrStoreError<T> {
    fn or_store_error(self) -> Result<T, HostelError>;
}

impl<T, E: Into<DatabaseError>> OrStoreError<T> for Result<T, E> {
    fn or_store_error(self) -> Result<T, HostelError> {
        self.map_err(|error| error.into().into())
    }
}

#[derive(QueryableByName)]
struct AdvisoryLock {
    #[diesel(sql_type = Bool)]
    locked: bool,
}

#[derive(Clone)]
pub struct PgRoster {
    pool: Pool,
}

impl PgRoster {
    #[must_use]
    pub const fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Registers a student. Student records are owned by the surrounding
    /// portal, this exists for fixtures and demos.
    pub async fn add_student(
        &self,
        name: &str,
        demographics: &Demographics,
        gpa: f64,
    ) -> Result<StudentId, DatabaseError> {
        let mut connection = self.pool.get().await?;
        let id = diesel::insert_into(students::table)
            .values(NewStudent {
                name,
                gender: &demographics.gender,
                year: &demographics.year,
                gpa,
            })
            .returning(students::id)
            .get_result(&mut connection)
            .await?;
        Ok(StudentId(id))
    }
}

#[async_trait]
impl RosterStore for PgRoster {
    async fn transaction<T, F>(&self, operation: F) -> Result<T, HostelError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn RosterTx) -> TxFuture<'t, T> + Send + 'static,
    {
        let mut pooled = self.pool.get().await.or_store_error()?;
        let connection: &mut AsyncPgConnection = &mut pooled;
        connection
            .transaction::<T, TransactionError, _>(|connection| {
                async move {
                    let mut tx = PgTx { connection };
                    Ok(operation(&mut tx).await?)
                }
                .scope_boxed()
            })
            .await
            .map_err(HostelError::from)
    }
}

struct PgTx<'c> {
    connection: &'c mut AsyncPgConnection,
}

impl PgTx<'_> {
    async fn attach_block(&mut self, row: Option<RoomRow>) -> Result<Option<Room>, HostelError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let block_name = blocks::table
            .find(row.block_id)
            .select(blocks::name)
            .first::<String>(self.connection)
            .await
            .or_store_error()?;
        row.into_room(block_name).map(Some).or_store_error()
    }

    async fn occupancies(&mut self) -> Result<BTreeMap<i32, u32>, HostelError> {
        let counts: Vec<(Option<i32>, i64)> = students::table
            .filter(students::room_id.is_not_null())
            .group_by(students::room_id)
            .select((students::room_id, count_star()))
            .load(self.connection)
            .await
            .or_store_error()?;
        counts
            .into_iter()
            .filter_map(|(room, count)| Some((room?, count)))
            .map(|(room, count)| Ok((room, u32::try_from(count).or_store_error()?)))
            .collect()
    }
}

#[async_trait]
impl<'c> RosterTx for PgTx<'c> {
    async fn find_student(&mut self, student: StudentId) -> Result<Option<Student>, HostelError> {
        let row = students::table
            .find(student.0)
            .select(StudentRow::as_select())
            .first(self.connection)
            .await
            .optional()
            .or_store_error()?;
        Ok(row.map(Student::from))
    }

    async fn lock_student(&mut self, student: StudentId) -> Result<Option<Student>, HostelError> {
        let row = students::table
            .find(student.0)
            .select(StudentRow::as_select())
            .for_update()
            .first(self.connection)
            .await
            .optional()
            .or_store_error()?;
        Ok(row.map(Student::from))
    }

    async fn find_room(&mut self, room: RoomId) -> Result<Option<Room>, HostelError> {
        let row = rooms::table
            .find(room.0)
            .select(RoomRow::as_select())
            .first(self.connection)
            .await
            .optional()
            .or_store_error()?;
        self.attach_block(row).await
    }

    async fn lock_room(&mut self, room: RoomId) -> Result<Option<Room>, HostelError> {
        // only the room row, the block row is shared by every room of the block
        let row = rooms::table
            .find(room.0)
            .select(RoomRow::as_select())
            .for_update()
            .first(self.connection)
            .await
            .optional()
            .or_store_error()?;
        self.attach_block(row).await
    }

    async fn room_occupancy(&mut self, room: RoomId) -> Result<u32, HostelError> {
        let count: i64 = students::table
            .filter(students::room_id.eq(room.0))
            .count()
            .get_result(self.connection)
            .await
            .or_store_error()?;
        u32::try_from(count).or_store_error()
    }

    async fn room_members(&mut self, room: RoomId) -> Result<Vec<Student>, HostelError> {
        let rows = students::table
            .filter(students::room_id.eq(room.0))
            .order(students::id.asc())
            .select(StudentRow::as_select())
            .load(self.connection)
            .await
            .or_store_error()?;
        Ok(rows.into_iter().map(Student::from).collect())
    }

    async fn claim_seat(&mut self, student: StudentId, room: RoomId) -> Result<(), HostelError> {
        let updated = diesel::update(students::table.find(student.0))
            .set(students::room_id.eq(room.0))
            .execute(self.connection)
            .await
            .or_store_error()?;
        if updated == 0 {
            return Err(HostelError::StudentNotFound(student));
        }
        Ok(())
    }

    async fn vacate_seat(&mut self, student: StudentId) -> Result<(), HostelError> {
        diesel::update(students::table.find(student.0))
            .set(students::room_id.eq(None::<i32>))
            .execute(self.connection)
            .await
            .or_store_error()?;
        Ok(())
    }

    async fn stamp_room_lock(
        &mut self,
        room: RoomId,
        demographics: &Demographics,
    ) -> Result<RoomLock, HostelError> {
        diesel::update(
            rooms::table
                .find(room.0)
                .filter(rooms::group_gender.is_null()),
        )
        .set(rooms::group_gender.eq(demographics.gender.as_str()))
        .execute(self.connection)
        .await
        .or_store_error()?;
        diesel::update(rooms::table.find(room.0).filter(rooms::group_year.is_null()))
            .set(rooms::group_year.eq(demographics.year.as_str()))
            .execute(self.connection)
            .await
            .or_store_error()?;
        let (gender, year) = rooms::table
            .find(room.0)
            .select((rooms::group_gender, rooms::group_year))
            .first::<(Option<String>, Option<String>)>(self.connection)
            .await
            .optional()
            .or_store_error()?
            .ok_or(HostelError::RoomNotFound(room))?;
        Ok(RoomLock { gender, year })
    }

    async fn ensure_block(&mut self, name: &str) -> Result<(BlockId, bool), HostelError> {
        let inserted = diesel::insert_into(blocks::table)
            .values(blocks::name.eq(name))
            .on_conflict(blocks::name)
            .do_nothing()
            .execute(self.connection)
            .await
            .or_store_error()?;
        let id = blocks::table
            .filter(blocks::name.eq(name))
            .select(blocks::id)
            .first::<i32>(self.connection)
            .await
            .or_store_error()?;
        Ok((BlockId(id), inserted > 0))
    }

    async fn ensure_room(
        &mut self,
        block: BlockId,
        number: &str,
        capacity: u32,
    ) -> Result<bool, HostelError> {
        let inserted = diesel::insert_into(rooms::table)
            .values(NewRoom {
                id: None,
                block_id: block.0,
                room_number: number.to_owned(),
                capacity: i32::try_from(capacity).or_store_error()?,
            })
            .on_conflict((rooms::block_id, rooms::room_number))
            .do_nothing()
            .execute(self.connection)
            .await
            .or_store_error()?;
        Ok(inserted > 0)
    }

    async fn create_provisional_room(
        &mut self,
        block: BlockId,
        capacity: u32,
    ) -> Result<Room, HostelError> {
        // the number embeds the id, so draw the id before inserting
        let id: i32 = diesel::select(sql::<Integer>("nextval('rooms_id_seq')::integer"))
            .get_result(self.connection)
            .await
            .or_store_error()?;
        let row = diesel::insert_into(rooms::table)
            .values(NewRoom {
                id: Some(id),
                block_id: block.0,
                room_number: format!("TEMP-{id}"),
                capacity: i32::try_from(capacity).or_store_error()?,
            })
            .returning(RoomRow::as_returning())
            .get_result(self.connection)
            .await
            .or_store_error()?;
        self.attach_block(Some(row))
            .await?
            .ok_or(HostelError::RoomNotFound(RoomId(id)))
    }

    async fn list_blocks(&mut self) -> Result<Vec<Block>, HostelError> {
        let rows = blocks::table
            .order(blocks::id.asc())
            .select(BlockRow::as_select())
            .load(self.connection)
            .await
            .or_store_error()?;
        Ok(rows.into_iter().map(Block::from).collect())
    }

    async fn find_invite(&mut self, invite: InviteId) -> Result<Option<Invite>, HostelError> {
        let row = room_invites::table
            .find(invite.0)
            .select(InviteRow::as_select())
            .first(self.connection)
            .await
            .optional()
            .or_store_error()?;
        row.map(Invite::try_from).transpose().or_store_error()
    }

    async fn create_invite(
        &mut self,
        from: StudentId,
        to: StudentId,
        room: RoomId,
    ) -> Result<Invite, HostelError> {
        let row = diesel::insert_into(room_invites::table)
            .values(NewInvite {
                from_student_id: from.0,
                to_student_id: to.0,
                room_id: room.0,
            })
            .returning(InviteRow::as_returning())
            .get_result(self.connection)
            .await
            .or_store_error()?;
        Invite::try_from(row).or_store_error()
    }

    async fn set_invite_status(
        &mut self,
        invite: InviteId,
        status: InviteStatus,
    ) -> Result<(), HostelError> {
        let updated = diesel::update(room_invites::table.find(invite.0))
            .set(room_invites::status.eq(status.as_str()))
            .execute(self.connection)
            .await
            .or_store_error()?;
        if updated == 0 {
            return Err(HostelError::InvalidInvite);
        }
        Ok(())
    }

    async fn list_pending_invites(
        &mut self,
        selector: &InviteSelector,
    ) -> Result<Vec<Invite>, HostelError> {
        let mut query: room_invites::BoxedQuery<'_, Pg> = room_invites::table
            .filter(room_invites::status.eq(InviteStatus::Pending.as_str()))
            .into_boxed();
        if let Some(from) = selector.from {
            query = query.filter(room_invites::from_student_id.eq(from.0));
        }
        if let Some(to) = selector.to {
            query = query.filter(room_invites::to_student_id.eq(to.0));
        }
        if let Some(room) = selector.room {
            query = query.filter(room_invites::room_id.eq(room.0));
        }
        if let Some(room) = selector.outside_room {
            query = query.filter(room_invites::room_id.ne(room.0));
        }
        if let Some(except) = selector.except {
            query = query.filter(room_invites::id.ne(except.0));
        }
        let rows = query
            .order(room_invites::id.desc())
            .select(InviteRow::as_select())
            .load(self.connection)
            .await
            .or_store_error()?;
        rows.into_iter()
            .map(|row| Invite::try_from(row).or_store_error())
            .collect()
    }

    async fn expire_pending_invites(
        &mut self,
        selector: &InviteSelector,
    ) -> Result<u64, HostelError> {
        let ids: Vec<i32> = self
            .list_pending_invites(selector)
            .await?
            .into_iter()
            .map(|invite| invite.id.0)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let expired = diesel::update(
            room_invites::table
                .filter(room_invites::id.eq_any(ids))
                .filter(room_invites::status.eq(InviteStatus::Pending.as_str())),
        )
        .set(room_invites::status.eq(InviteStatus::Expired.as_str()))
        .execute(self.connection)
        .await
        .or_store_error()?;
        u64::try_from(expired).or_store_error()
    }

    async fn find_real_room(&mut self, code: &RoomCode) -> Result<Option<Room>, HostelError> {
        let row = rooms::table
            .inner_join(blocks::table)
            .filter(blocks::name.eq(code.block()))
            .filter(rooms::room_number.eq(code.number()))
            .select((RoomRow::as_select(), blocks::name))
            .first::<(RoomRow, String)>(self.connection)
            .await
            .optional()
            .or_store_error()?;
        row.map(|(row, block_name)| row.into_room(block_name))
            .transpose()
            .or_store_error()
    }

    async fn list_real_rooms(&mut self) -> Result<Vec<OccupiedRoom>, HostelError> {
        let rows = rooms::table
            .inner_join(blocks::table)
            .filter(blocks::name.ne(PROVISIONAL_BLOCK))
            .order(rooms::id.asc())
            .select((RoomRow::as_select(), blocks::name))
            .load::<(RoomRow, String)>(self.connection)
            .await
            .or_store_error()?;
        let occupancies = self.occupancies().await?;
        rows.into_iter()
            .map(|(row, block_name)| {
                let occupancy = occupancies.get(&row.id).copied().unwrap_or(0);
                Ok(OccupiedRoom {
                    room: row.into_room(block_name).or_store_error()?,
                    occupancy,
                })
            })
            .collect()
    }

    async fn find_preferences(
        &mut self,
        provisional_room: RoomId,
    ) -> Result<Option<PreferenceList>, HostelError> {
        let Some(submitted_by) = preference_submissions::table
            .find(provisional_room.0)
            .select(preference_submissions::submitted_by)
            .first::<i32>(self.connection)
            .await
            .optional()
            .or_store_error()?
        else {
            return Ok(None);
        };
        let rows = room_preferences::table
            .inner_join(rooms::table.inner_join(blocks::table))
            .filter(room_preferences::provisional_room_id.eq(provisional_room.0))
            .order(room_preferences::rank_no.asc())
            .select((room_preferences::rank_no, RoomRow::as_select(), blocks::name))
            .load::<(i32, RoomRow, String)>(self.connection)
            .await
            .or_store_error()?;
        let mut entries = Vec::with_capacity(rows.len());
        for (rank, row, block_name) in rows {
            let room = row.into_room(block_name).or_store_error()?;
            if let Some(code) = room.code() {
                entries.push(PreferenceEntry {
                    rank: u32::try_from(rank).or_store_error()?,
                    room: room.id,
                    code,
                });
            }
        }
        Ok(Some(PreferenceList {
            provisional_room,
            submitted_by: StudentId(submitted_by),
            entries,
        }))
    }

    async fn replace_preferences(
        &mut self,
        provisional_room: RoomId,
        submitted_by: StudentId,
        desired: &[RoomId],
    ) -> Result<(), HostelError> {
        diesel::insert_into(preference_submissions::table)
            .values((
                preference_submissions::provisional_room_id.eq(provisional_room.0),
                preference_submissions::submitted_by.eq(submitted_by.0),
            ))
            .on_conflict(preference_submissions::provisional_room_id)
            .do_update()
            .set((
                preference_submissions::submitted_by.eq(submitted_by.0),
                preference_submissions::submitted_at.eq(now),
            ))
            .execute(self.connection)
            .await
            .or_store_error()?;
        diesel::delete(
            room_preferences::table
                .filter(room_preferences::provisional_room_id.eq(provisional_room.0)),
        )
        .execute(self.connection)
        .await
        .or_store_error()?;
        let ranked = desired
            .iter()
            .zip(1..)
            .map(|(room, rank_no)| NewPreference {
                provisional_room_id: provisional_room.0,
                rank_no,
                room_id: room.0,
            })
            .collect::<Vec<_>>();
        if !ranked.is_empty() {
            diesel::insert_into(room_preferences::table)
                .values(&ranked)
                .execute(self.connection)
                .await
                .or_store_error()?;
        }
        Ok(())
    }

    async fn clear_preferences(&mut self, provisional_room: RoomId) -> Result<bool, HostelError> {
        diesel::delete(
            room_preferences::table
                .filter(room_preferences::provisional_room_id.eq(provisional_room.0)),
        )
        .execute(self.connection)
        .await
        .or_store_error()?;
        let submissions = diesel::delete(
            preference_submissions::table
                .filter(preference_submissions::provisional_room_id.eq(provisional_room.0)),
        )
        .execute(self.connection)
        .await
        .or_store_error()?;
        Ok(submissions > 0)
    }

    async fn list_preference_lists(&mut self) -> Result<Vec<PreferenceList>, HostelError> {
        let groups = preference_submissions::table
            .order(preference_submissions::provisional_room_id.asc())
            .select(preference_submissions::provisional_room_id)
            .load::<i32>(self.connection)
            .await
            .or_store_error()?;
        let mut lists = Vec::with_capacity(groups.len());
        for group in groups {
            if let Some(list) = self.find_preferences(RoomId(group)).await? {
                if !list.entries.is_empty() {
                    lists.push(list);
                }
            }
        }
        Ok(lists)
    }

    async fn record_allocation(&mut self, record: &AllocationRecord) -> Result<(), HostelError> {
        diesel::insert_into(allocations::table)
            .values(NewAllocation {
                student_id: record.student.0,
                room_id: record.room.map(|room| room.0),
                note: &record.note,
            })
            .execute(self.connection)
            .await
            .or_store_error()?;
        Ok(())
    }

    async fn try_lock_allocation(&mut self) -> Result<bool, HostelError> {
        let lock = diesel::sql_query("SELECT pg_try_advisory_xact_lock($1) AS locked")
            .bind::<BigInt, _>(ALLOCATION_LOCK_KEY)
            .get_result::<AdvisoryLock>(self.connection)
            .await
            .or_store_error()?;
        if !lock.locked {
            debug!("allocation lock is held by another session");
        }
        Ok(lock.locked)
    }
}
