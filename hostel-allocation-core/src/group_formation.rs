//! Students pull each other into provisional rooms through invites.

use futures_util::FutureExt as _;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::HostelError;
use crate::model::{
    Invite, InviteAction, InviteId, InviteStatus, Room, RoomId, RoomKind, Student, StudentId,
    GROUP_CAPACITY, PROVISIONAL_BLOCK,
};
use crate::roster::{InviteSelector, RosterStore, RosterTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomClaim {
    pub room_id: RoomId,
    /// The student was already seated and nothing changed.
    pub already_existed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteReceipt {
    pub id: InviteId,
    pub room_id: RoomId,
    pub already_existed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub status: InviteStatus,
    pub room_id: RoomId,
    /// Other pending invites that stopped being meaningful.
    pub expired: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveOutcome {
    pub vacated: Option<RoomId>,
    pub expired: u64,
    /// The leaver had submitted the room's preference list, which went with them.
    pub preferences_cleared: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Roommate {
    pub id: StudentId,
    pub name: String,
}

impl From<Student> for Roommate {
    fn from(student: Student) -> Self {
        Self {
            id: student.id,
            name: student.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCard {
    pub room_id: RoomId,
    pub room_number: String,
    pub block_name: String,
    pub kind: RoomKind,
    pub capacity: u32,
    pub count: u32,
    pub students: Vec<Roommate>,
    /// Students with a pending invite into this room, newest invite first.
    pub pending: Vec<Roommate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedInvite {
    pub invite: Invite,
    pub from: Roommate,
    pub room_number: String,
    pub capacity: u32,
    pub current_occupancy: u32,
}

/// Returns the room the student sits in, or seats them in a fresh provisional room.
pub async fn request_provisional_room<S: RosterStore>(
    store: &S,
    student: StudentId,
) -> Result<RoomClaim, HostelError> {
    let claim = store
        .transaction(move |tx| claim_provisional_room(tx, student).boxed())
        .await?;
    if claim.already_existed {
        debug!(%student, room = %claim.room_id, "student already has a room");
    } else {
        info!(%student, room = %claim.room_id, "created provisional room");
    }
    Ok(claim)
}

async fn claim_provisional_room(
    tx: &mut dyn RosterTx,
    student: StudentId,
) -> Result<RoomClaim, HostelError> {
    // holding the student row makes concurrent requests of the same student queue up here
    let me = tx
        .lock_student(student)
        .await?
        .ok_or(HostelError::StudentNotFound(student))?;
    if let Some(room_id) = me.room {
        return Ok(RoomClaim {
            room_id,
            already_existed: true,
        });
    }
    let (block, _) = tx.ensure_block(PROVISIONAL_BLOCK).await?;
    let room = tx.create_provisional_room(block, GROUP_CAPACITY).await?;
    tx.claim_seat(student, room.id).await?;
    Ok(RoomClaim {
        room_id: room.id,
        already_existed: false,
    })
}

/// Invites `to` into the provisional room of `from`.
pub async fn invite<S: RosterStore>(
    store: &S,
    from: StudentId,
    to: StudentId,
) -> Result<InviteReceipt, HostelError> {
    let receipt = store
        .transaction(move |tx| create_invite(tx, from, to).boxed())
        .await?;
    info!(
        %from,
        %to,
        invite = %receipt.id,
        already_existed = receipt.already_existed,
        "invite sent"
    );
    Ok(receipt)
}

async fn locked_room(tx: &mut dyn RosterTx, room: RoomId) -> Result<Room, HostelError> {
    tx.lock_room(room)
        .await?
        .ok_or(HostelError::RoomNotFound(room))
}

async fn create_invite(
    tx: &mut dyn RosterTx,
    from: StudentId,
    to: StudentId,
) -> Result<InviteReceipt, HostelError> {
    let inviter = tx
        .lock_student(from)
        .await?
        .ok_or(HostelError::StudentNotFound(from))?;
    let room = locked_room(tx, inviter.room.ok_or(HostelError::NoRoom)?).await?;
    if !room.is_provisional() {
        return Err(HostelError::NotInProvisionalGroup);
    }
    if tx.room_occupancy(room.id).await? >= room.capacity {
        return Err(HostelError::RoomFull);
    }

    let target = tx
        .find_student(to)
        .await?
        .ok_or(HostelError::StudentNotFound(to))?;
    if target.room == Some(room.id) {
        return Err(HostelError::AlreadyInRoom);
    }

    // the inviter already lives in the room, so an unset lock is theirs to set
    let lock = if room.lock.is_complete() {
        room.lock
    } else {
        tx.stamp_room_lock(room.id, &inviter.demographics).await?
    };
    lock.admits(&target.demographics)
        .map_err(HostelError::DemographicMismatch)?;

    let selector = InviteSelector::sent_by(from).in_room(room.id);
    let existing = tx.list_pending_invites(&selector).await?;
    if let Some(existing) = existing.into_iter().find(|invite| invite.to == to) {
        return Ok(InviteReceipt {
            id: existing.id,
            room_id: room.id,
            already_existed: true,
        });
    }

    let invite = tx.create_invite(from, to, room.id).await?;
    Ok(InviteReceipt {
        id: invite.id,
        room_id: room.id,
        already_existed: false,
    })
}

/// Accepts or declines an invite addressed to `student`.
pub async fn respond_to_invite<S: RosterStore>(
    store: &S,
    student: StudentId,
    invite: InviteId,
    action: InviteAction,
) -> Result<InviteResponse, HostelError> {
    let response = store
        .transaction(move |tx| respond(tx, student, invite, action).boxed())
        .await?;
    info!(
        %student,
        %invite,
        status = response.status.as_str(),
        expired = response.expired,
        "invite answered"
    );
    Ok(response)
}

async fn respond(
    tx: &mut dyn RosterTx,
    student: StudentId,
    invite_id: InviteId,
    action: InviteAction,
) -> Result<InviteResponse, HostelError> {
    let invite = tx
        .find_invite(invite_id)
        .await?
        .filter(|invite| invite.to == student && invite.status == InviteStatus::Pending)
        .ok_or(HostelError::InvalidInvite)?;

    if action == InviteAction::Decline {
        let status = invite.status.transition(InviteStatus::Declined)?;
        tx.set_invite_status(invite.id, status).await?;
        return Ok(InviteResponse {
            status,
            room_id: invite.room,
            expired: 0,
        });
    }

    let me = tx
        .lock_student(student)
        .await?
        .ok_or(HostelError::StudentNotFound(student))?;
    if me.room.is_some_and(|room| room != invite.room) {
        return Err(HostelError::AlreadyInAnotherRoom);
    }

    let room = locked_room(tx, invite.room).await?;
    // rooms created before locks existed get theirs from whoever joins first
    let lock = if room.lock.is_complete() {
        room.lock
    } else {
        tx.stamp_room_lock(room.id, &me.demographics).await?
    };
    lock.enforce(&me.demographics)?;

    if me.room.is_none() {
        if tx.room_occupancy(room.id).await? >= room.capacity {
            return Err(HostelError::RoomFull);
        }
        tx.claim_seat(student, room.id).await?;
    }

    let status = invite.status.transition(InviteStatus::Accepted)?;
    tx.set_invite_status(invite.id, status).await?;

    let mut expired = tx
        .expire_pending_invites(&InviteSelector::addressed_to(student).except(invite.id))
        .await?;
    expired += tx
        .expire_pending_invites(&InviteSelector::sent_by(student).outside_room(room.id))
        .await?;

    Ok(InviteResponse {
        status,
        room_id: room.id,
        expired,
    })
}

/// Takes the student out of their room. Pending invites the student sent or
/// received for that room expire with it.
pub async fn leave_room<S: RosterStore>(
    store: &S,
    student: StudentId,
) -> Result<LeaveOutcome, HostelError> {
    let outcome = store
        .transaction(move |tx| leave(tx, student).boxed())
        .await?;
    if let Some(room) = outcome.vacated {
        info!(
            %student,
            %room,
            expired = outcome.expired,
            preferences_cleared = outcome.preferences_cleared,
            "student left room"
        );
    }
    Ok(outcome)
}

async fn leave(tx: &mut dyn RosterTx, student: StudentId) -> Result<LeaveOutcome, HostelError> {
    let me = tx
        .lock_student(student)
        .await?
        .ok_or(HostelError::StudentNotFound(student))?;
    let Some(room) = me.room else {
        return Ok(LeaveOutcome {
            vacated: None,
            expired: 0,
            preferences_cleared: false,
        });
    };
    let left = locked_room(tx, room).await?;
    tx.vacate_seat(student).await?;

    let mut expired = tx
        .expire_pending_invites(&InviteSelector::addressed_to(student).in_room(room))
        .await?;
    expired += tx
        .expire_pending_invites(&InviteSelector::sent_by(student).in_room(room))
        .await?;

    let submitted_here = left.is_provisional()
        && tx
            .find_preferences(room)
            .await?
            .is_some_and(|list| list.submitted_by == student);
    let preferences_cleared = submitted_here && tx.clear_preferences(room).await?;

    Ok(LeaveOutcome {
        vacated: Some(room),
        expired,
        preferences_cleared,
    })
}

/// The student's current room with its members and outstanding invites.
pub async fn room_card<S: RosterStore>(
    store: &S,
    student: StudentId,
) -> Result<Option<RoomCard>, HostelError> {
    store
        .transaction(move |tx| {
            async move {
                let me = tx
                    .find_student(student)
                    .await?
                    .ok_or(HostelError::StudentNotFound(student))?;
                let Some(room_id) = me.room else {
                    return Ok(None);
                };
                let Some(room) = tx.find_room(room_id).await? else {
                    return Ok(None);
                };
                let students = tx.room_members(room_id).await?;
                let mut pending = Vec::new();
                for invite in tx
                    .list_pending_invites(&InviteSelector::for_room(room_id))
                    .await?
                {
                    if let Some(invitee) = tx.find_student(invite.to).await? {
                        pending.push(Roommate::from(invitee));
                    }
                }
                Ok(Some(RoomCard {
                    room_id,
                    kind: room.kind(),
                    room_number: room.number,
                    block_name: room.block_name,
                    capacity: room.capacity,
                    count: u32::try_from(students.len()).unwrap_or(u32::MAX),
                    students: students.into_iter().map(Roommate::from).collect(),
                    pending,
                }))
            }
            .boxed()
        })
        .await
}

/// Pending invites addressed to the student, newest first.
pub async fn received_invites<S: RosterStore>(
    store: &S,
    student: StudentId,
) -> Result<Vec<ReceivedInvite>, HostelError> {
    store
        .transaction(move |tx| {
            async move {
                tx.find_student(student)
                    .await?
                    .ok_or(HostelError::StudentNotFound(student))?;
                let mut received = Vec::new();
                for invite in tx
                    .list_pending_invites(&InviteSelector::addressed_to(student))
                    .await?
                {
                    let (Some(from), Some(room)) = (
                        tx.find_student(invite.from).await?,
                        tx.find_room(invite.room).await?,
                    ) else {
                        continue;
                    };
                    let current_occupancy = tx.room_occupancy(room.id).await?;
                    received.push(ReceivedInvite {
                        invite,
                        from: Roommate::from(from),
                        room_number: room.number,
                        capacity: room.capacity,
                        current_occupancy,
                    });
                }
                Ok(received)
            }
            .boxed()
        })
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::DemographicAttribute;
    use crate::memory::MemoryRoster;
    use crate::model::RoomLock;

    async fn students(roster: &MemoryRoster, count: usize) -> Vec<StudentId> {
        let mut ids = Vec::new();
        for index in 0..count {
            ids.push(
                roster
                    .add_student(&format!("student {index}"), "F", "2", 8.0)
                    .await,
            );
        }
        ids
    }

    async fn join(
        roster: &MemoryRoster,
        from: StudentId,
        to: StudentId,
    ) -> Result<InviteResponse, HostelError> {
        let receipt = invite(roster, from, to).await?;
        respond_to_invite(roster, to, receipt.id, InviteAction::Accept).await
    }

    #[tokio::test]
    async fn requesting_a_room_twice_returns_the_same_room() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let alice = roster.add_student("alice", "F", "2", 8.0).await;

        let first = request_provisional_room(&roster, alice).await?;
        let second = request_provisional_room(&roster, alice).await?;

        assert!(!first.already_existed);
        assert!(second.already_existed);
        assert_eq!(first.room_id, second.room_id);
        let room = roster.room(first.room_id).await.unwrap();
        assert!(room.is_provisional());
        assert_eq!(room.capacity, GROUP_CAPACITY);
        assert_eq!(room.number, format!("TEMP-{}", room.id));
        assert!(room.lock.is_unset());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_create_one_room() -> Result<(), HostelError> {
        let roster = Arc::new(MemoryRoster::new());
        let alice = roster.add_student("alice", "F", "2", 8.0).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let roster = Arc::clone(&roster);
                tokio::spawn(async move { request_provisional_room(&*roster, alice).await })
            })
            .collect();
        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap()?.room_id);
        }
        rooms.dedup();

        assert_eq!(rooms.len(), 1);
        let provisional = roster
            .rooms()
            .await
            .into_iter()
            .filter(Room::is_provisional)
            .count();
        assert_eq!(provisional, 1);
        Ok(())
    }

    #[tokio::test]
    async fn inviting_without_a_room_fails() {
        let roster = MemoryRoster::new();
        let ids = students(&roster, 2).await;
        assert!(matches!(
            invite(&roster, ids[0], ids[1]).await,
            Err(HostelError::NoRoom)
        ));
    }

    #[tokio::test]
    async fn duplicate_invites_are_returned_unchanged() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let ids = students(&roster, 2).await;
        request_provisional_room(&roster, ids[0]).await?;

        let first = invite(&roster, ids[0], ids[1]).await?;
        let second = invite(&roster, ids[0], ids[1]).await?;

        assert!(!first.already_existed);
        assert!(second.already_existed);
        assert_eq!(first.id, second.id);
        Ok(())
    }

    #[tokio::test]
    async fn invites_stamp_the_lock_from_the_inviter() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let alice = roster.add_student("alice", "F", "2", 8.0).await;
        let bob = roster.add_student("bob", "M", "2", 8.0).await;
        let carol = roster.add_student("carol", "F", "3", 8.0).await;
        let claim = request_provisional_room(&roster, alice).await?;

        assert!(matches!(
            invite(&roster, alice, bob).await,
            Err(HostelError::DemographicMismatch(DemographicAttribute::Gender))
        ));
        assert!(matches!(
            invite(&roster, alice, carol).await,
            Err(HostelError::DemographicMismatch(DemographicAttribute::Year))
        ));

        // the failed invites rolled back, including the lock they stamped
        assert!(roster.room(claim.room_id).await.unwrap().lock.is_unset());
        Ok(())
    }

    #[tokio::test]
    async fn accepting_moves_the_student_and_expires_other_invites() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let ids = students(&roster, 3).await;
        let (alice, bob, carol) = (ids[0], ids[1], ids[2]);
        let alices = request_provisional_room(&roster, alice).await?;
        request_provisional_room(&roster, carol).await?;
        let from_alice = invite(&roster, alice, bob).await?;
        let from_carol = invite(&roster, carol, bob).await?;

        let response = respond_to_invite(&roster, bob, from_alice.id, InviteAction::Accept).await?;

        assert_eq!(response.status, InviteStatus::Accepted);
        assert_eq!(response.room_id, alices.room_id);
        assert_eq!(response.expired, 1);
        assert_eq!(roster.student(bob).await.unwrap().room, Some(alices.room_id));
        assert_eq!(roster.occupancy(alices.room_id).await, 2);
        assert_eq!(
            roster.invite(from_alice.id).await.unwrap().status,
            InviteStatus::Accepted
        );
        assert_eq!(
            roster.invite(from_carol.id).await.unwrap().status,
            InviteStatus::Expired
        );
        Ok(())
    }

    #[tokio::test]
    async fn accepting_while_seated_elsewhere_changes_nothing() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let ids = students(&roster, 3).await;
        let (alice, bob, carol) = (ids[0], ids[1], ids[2]);
        request_provisional_room(&roster, alice).await?;
        let bobs = request_provisional_room(&roster, bob).await?;
        let bob_invites_carol = invite(&roster, bob, carol).await?;
        let alice_invites_bob = invite(&roster, alice, bob).await?;

        // bob still sits in his own room, so he has to leave first
        assert!(matches!(
            respond_to_invite(&roster, bob, alice_invites_bob.id, InviteAction::Accept).await,
            Err(HostelError::AlreadyInAnotherRoom)
        ));
        assert_eq!(roster.student(bob).await.unwrap().room, Some(bobs.room_id));
        assert_eq!(
            roster.invite(bob_invites_carol.id).await.unwrap().status,
            InviteStatus::Pending
        );
        Ok(())
    }

    #[tokio::test]
    async fn only_the_invitee_can_answer_a_pending_invite() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let ids = students(&roster, 3).await;
        request_provisional_room(&roster, ids[0]).await?;
        let receipt = invite(&roster, ids[0], ids[1]).await?;

        assert!(matches!(
            respond_to_invite(&roster, ids[2], receipt.id, InviteAction::Accept).await,
            Err(HostelError::InvalidInvite)
        ));
        let declined =
            respond_to_invite(&roster, ids[1], receipt.id, InviteAction::Decline).await?;
        assert_eq!(declined.status, InviteStatus::Declined);
        assert!(matches!(
            respond_to_invite(&roster, ids[1], receipt.id, InviteAction::Accept).await,
            Err(HostelError::InvalidInvite)
        ));
        assert_eq!(roster.student(ids[1]).await.unwrap().room, None);
        Ok(())
    }

    #[tokio::test]
    async fn a_full_room_rejects_late_accepts() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let ids = students(&roster, 6).await;
        let claim = request_provisional_room(&roster, ids[0]).await?;
        let mut receipts = Vec::new();
        for invitee in &ids[1..] {
            receipts.push(invite(&roster, ids[0], *invitee).await?);
        }
        for (receipt, invitee) in receipts.iter().zip(&ids[1..4]) {
            respond_to_invite(&roster, *invitee, receipt.id, InviteAction::Accept).await?;
        }
        assert_eq!(roster.occupancy(claim.room_id).await, GROUP_CAPACITY);

        assert!(matches!(
            respond_to_invite(&roster, ids[4], receipts[3].id, InviteAction::Accept).await,
            Err(HostelError::RoomFull)
        ));
        assert!(matches!(
            invite(&roster, ids[0], ids[5]).await,
            Err(HostelError::RoomFull)
        ));
        assert_eq!(roster.occupancy(claim.room_id).await, GROUP_CAPACITY);
        assert_eq!(roster.student(ids[4]).await.unwrap().room, None);
        Ok(())
    }

    #[tokio::test]
    async fn racing_accepts_for_the_last_seat() -> Result<(), HostelError> {
        let roster = Arc::new(MemoryRoster::new());
        let ids = students(&roster, 5).await;
        let claim = request_provisional_room(&*roster, ids[0]).await?;
        join(&roster, ids[0], ids[1]).await?;
        join(&roster, ids[0], ids[2]).await?;
        let last_a = invite(&*roster, ids[0], ids[3]).await?;
        let last_b = invite(&*roster, ids[0], ids[4]).await?;

        let handles: Vec<_> = [(ids[3], last_a.id), (ids[4], last_b.id)]
            .into_iter()
            .map(|(student, invite)| {
                let roster = Arc::clone(&roster);
                tokio::spawn(async move {
                    respond_to_invite(&*roster, student, invite, InviteAction::Accept).await
                })
            })
            .collect();
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(HostelError::RoomFull))));
        assert_eq!(roster.occupancy(claim.room_id).await, GROUP_CAPACITY);
        Ok(())
    }

    #[tokio::test]
    async fn unlocked_rooms_take_the_lock_from_their_occupants() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let alice = roster.add_student("alice", "F", "2", 8.0).await;
        let bob = roster.add_student("bob", "F", "2", 8.0).await;
        let room = roster
            .add_room(PROVISIONAL_BLOCK, "TEMP-LEGACY", GROUP_CAPACITY, RoomLock::default())
            .await;
        roster.seat(alice, room).await;

        join(&roster, alice, bob).await?;

        let lock = roster.room(room).await.unwrap().lock;
        assert_eq!(lock.gender.as_deref(), Some("F"));
        assert_eq!(lock.year.as_deref(), Some("2"));
        Ok(())
    }

    #[tokio::test]
    async fn leaving_frees_a_seat_and_expires_room_invites() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let ids = students(&roster, 4).await;
        let (alice, bob, carol, dave) = (ids[0], ids[1], ids[2], ids[3]);
        let claim = request_provisional_room(&roster, alice).await?;
        join(&roster, alice, bob).await?;
        let from_bob = invite(&roster, bob, carol).await?;
        assert_eq!(roster.occupancy(claim.room_id).await, 2);

        let outcome = leave_room(&roster, bob).await?;

        assert_eq!(outcome.vacated, Some(claim.room_id));
        assert_eq!(outcome.expired, 1);
        assert_eq!(roster.occupancy(claim.room_id).await, 1);
        assert_eq!(
            roster.invite(from_bob.id).await.unwrap().status,
            InviteStatus::Expired
        );
        assert!(matches!(
            respond_to_invite(&roster, carol, from_bob.id, InviteAction::Accept).await,
            Err(HostelError::InvalidInvite)
        ));

        join(&roster, alice, dave).await?;
        assert_eq!(roster.occupancy(claim.room_id).await, 2);

        let noop = leave_room(&roster, bob).await?;
        assert_eq!(noop.vacated, None);
        Ok(())
    }

    #[tokio::test]
    async fn room_card_lists_members_and_pending_invitees() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let ids = students(&roster, 3).await;
        let claim = request_provisional_room(&roster, ids[0]).await?;
        join(&roster, ids[0], ids[1]).await?;
        invite(&roster, ids[0], ids[2]).await?;

        let card = room_card(&roster, ids[1]).await?.unwrap();
        assert_eq!(card.room_id, claim.room_id);
        assert_eq!(card.kind, RoomKind::Provisional);
        assert_eq!(card.count, 2);
        assert_eq!(card.pending.len(), 1);
        assert_eq!(card.pending[0].id, ids[2]);

        let inbox = received_invites(&roster, ids[2]).await?;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].current_occupancy, 2);
        assert!(room_card(&roster, ids[2]).await?.is_none());
        Ok(())
    }
}
