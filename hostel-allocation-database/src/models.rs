use diesel::prelude::*;
use hostel_allocation_core::model::{
    Block, BlockId, Demographics, Invite, InviteId, Room, RoomId, RoomLock, Student, StudentId,
};

use crate::error::DatabaseError;
use crate::schema::{allocations, blocks, room_invites, room_preferences, rooms, students};

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = students)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StudentRow {
    pub id: i32,
    pub name: String,
    pub gender: String,
    pub year: String,
    pub gpa: f64,
    pub room_id: Option<i32>,
}

impl From<StudentRow> for Student {
    fn from(row: StudentRow) -> Self {
        Self {
            id: StudentId(row.id),
            name: row.name,
            demographics: Demographics {
                gender: row.gender,
                year: row.year,
            },
            gpa: row.gpa,
            room: row.room_id.map(RoomId),
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = students)]
pub struct NewStudent<'a> {
    pub name: &'a str,
    pub gender: &'a str,
    pub year: &'a str,
    pub gpa: f64,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = blocks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BlockRow {
    pub id: i32,
    pub name: String,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Self {
            id: BlockId(row.id),
            name: row.name,
        }
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = rooms)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RoomRow {
    pub id: i32,
    pub block_id: i32,
    pub room_number: String,
    pub capacity: i32,
    pub group_gender: Option<String>,
    pub group_year: Option<String>,
}

impl RoomRow {
    pub fn into_room(self, block_name: String) -> Result<Room, DatabaseError> {
        Ok(Room {
            id: RoomId(self.id),
            block: BlockId(self.block_id),
            block_name,
            number: self.room_number,
            capacity: u32::try_from(self.capacity)?,
            lock: RoomLock {
                gender: self.group_gender,
                year: self.group_year,
            },
        })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = rooms)]
pub struct NewRoom {
    /// Drawn up front for provisional rooms, left to the sequence otherwise.
    pub id: Option<i32>,
    pub block_id: i32,
    pub room_number: String,
    pub capacity: i32,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = room_invites)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct InviteRow {
    pub id: i32,
    pub from_student_id: i32,
    pub to_student_id: i32,
    pub room_id: i32,
    pub status: String,
}

impl TryFrom<InviteRow> for Invite {
    type Error = DatabaseError;

    fn try_from(row: InviteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: InviteId(row.id),
            from: StudentId(row.from_student_id),
            to: StudentId(row.to_student_id),
            room: RoomId(row.room_id),
            status: row.status.parse().map_err(DatabaseError::Corrupt)?,
        })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = room_invites)]
pub struct NewInvite {
    pub from_student_id: i32,
    pub to_student_id: i32,
    pub room_id: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = room_preferences)]
pub struct NewPreference {
    pub provisional_room_id: i32,
    pub rank_no: i32,
    pub room_id: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = allocations)]
pub struct NewAllocation<'a> {
    pub student_id: i32,
    pub room_id: Option<i32>,
    pub note: &'a str,
}
