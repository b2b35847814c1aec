//! Ranked room preferences of full provisional groups.

use std::collections::HashSet;

use futures_util::FutureExt as _;
use serde::Serialize;
use tracing::info;

use crate::error::HostelError;
use crate::model::{RoomCode, RoomId, RoomLock, StudentId};
use crate::roster::{RosterStore, RosterTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoom {
    pub id: RoomId,
    pub room_number: String,
    pub capacity: u32,
    pub current_occupancy: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceState {
    pub in_provisional: bool,
    pub temp_room: Option<GroupRoom>,
    /// Whether the group already has a list.
    pub exists: bool,
    pub preference: Vec<RoomCode>,
    pub submitted_by: Option<StudentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedPreferences {
    pub provisional_room_id: RoomId,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRoom {
    pub id: RoomId,
    pub room_number: String,
    pub block_name: String,
    pub room_code: RoomCode,
    pub capacity: u32,
    pub occupancy: u32,
    pub lock: RoomLock,
}

/// What the preference screen needs to know about the student's group.
pub async fn preference_state<S: RosterStore>(
    store: &S,
    student: StudentId,
) -> Result<PreferenceState, HostelError> {
    store
        .transaction(move |tx| read_state(tx, student).boxed())
        .await
}

async fn read_state(
    tx: &mut dyn RosterTx,
    student: StudentId,
) -> Result<PreferenceState, HostelError> {
    let me = tx
        .find_student(student)
        .await?
        .ok_or(HostelError::StudentNotFound(student))?;
    let outside = PreferenceState {
        in_provisional: false,
        temp_room: None,
        exists: false,
        preference: Vec::new(),
        submitted_by: None,
    };
    let Some(room_id) = me.room else {
        return Ok(outside);
    };
    let Some(room) = tx
        .find_room(room_id)
        .await?
        .filter(|room| room.is_provisional())
    else {
        return Ok(outside);
    };
    let current_occupancy = tx.room_occupancy(room.id).await?;
    let list = tx.find_preferences(room.id).await?;
    Ok(PreferenceState {
        in_provisional: true,
        temp_room: Some(GroupRoom {
            id: room.id,
            room_number: room.number,
            capacity: room.capacity,
            current_occupancy,
        }),
        exists: list.is_some(),
        submitted_by: list.as_ref().map(|list| list.submitted_by),
        preference: list
            .map(|list| list.entries.into_iter().map(|entry| entry.code).collect())
            .unwrap_or_default(),
    })
}

/// Replaces the preference list of the student's full provisional group.
///
/// The first submitter owns the list; later submissions from other members are
/// rejected. Codes that do not name a real room fail the whole submission.
pub async fn submit_preferences<S: RosterStore>(
    store: &S,
    student: StudentId,
    codes: Vec<String>,
) -> Result<SubmittedPreferences, HostelError> {
    let submitted = store
        .transaction(move |tx| submit(tx, student, codes).boxed())
        .await?;
    info!(
        %student,
        room = %submitted.provisional_room_id,
        count = submitted.count,
        "preferences saved"
    );
    Ok(submitted)
}

async fn submit(
    tx: &mut dyn RosterTx,
    student: StudentId,
    codes: Vec<String>,
) -> Result<SubmittedPreferences, HostelError> {
    let me = tx
        .find_student(student)
        .await?
        .ok_or(HostelError::StudentNotFound(student))?;
    let room_id = me.room.ok_or(HostelError::NotInProvisionalGroup)?;
    // locked so nobody joins or leaves between the fullness check and the write
    let room = tx
        .lock_room(room_id)
        .await?
        .filter(|room| room.is_provisional())
        .ok_or(HostelError::NotInProvisionalGroup)?;

    let occupancy = tx.room_occupancy(room.id).await?;
    if occupancy != room.capacity {
        return Err(HostelError::GroupNotFull {
            occupancy,
            capacity: room.capacity,
        });
    }

    if let Some(existing) = tx.find_preferences(room.id).await? {
        if existing.submitted_by != student {
            return Err(HostelError::NotSubmitter);
        }
    }

    let targets = resolve_codes(tx, &codes).await?;
    tx.replace_preferences(room.id, student, &targets).await?;
    Ok(SubmittedPreferences {
        provisional_room_id: room.id,
        count: targets.len(),
    })
}

async fn resolve_codes(
    tx: &mut dyn RosterTx,
    codes: &[String],
) -> Result<Vec<RoomId>, HostelError> {
    if codes.is_empty() {
        return Err(HostelError::EmptyPreferences);
    }
    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(codes.len());
    let mut invalid = Vec::new();
    let mut duplicate = None;
    for raw in codes {
        let Ok(code) = raw.parse::<RoomCode>() else {
            invalid.push(raw.trim().to_owned());
            continue;
        };
        if !seen.insert(code.clone()) {
            duplicate.get_or_insert_with(|| code.to_string());
            continue;
        }
        match tx.find_real_room(&code).await? {
            Some(room) => targets.push(room.id),
            None => invalid.push(code.to_string()),
        }
    }
    // unknown codes are reported first, with every one of them listed
    if !invalid.is_empty() {
        return Err(HostelError::InvalidRoomCodes(invalid));
    }
    if let Some(code) = duplicate {
        return Err(HostelError::DuplicateRoomCode(code));
    }
    Ok(targets)
}

/// Real rooms a group may rank. A student only sees rooms open to their year.
pub async fn target_rooms<S: RosterStore>(
    store: &S,
    student: Option<StudentId>,
) -> Result<Vec<TargetRoom>, HostelError> {
    store
        .transaction(move |tx| {
            async move {
                let year = match student {
                    Some(student) => Some(
                        tx.find_student(student)
                            .await?
                            .ok_or(HostelError::StudentNotFound(student))?
                            .demographics
                            .year,
                    ),
                    None => None,
                };
                let mut rooms: Vec<TargetRoom> = tx
                    .list_real_rooms()
                    .await?
                    .into_iter()
                    .filter(|slot| {
                        year.as_ref().map_or(true, |year| {
                            slot.room.lock.year.as_ref().map_or(true, |lock| lock == year)
                        })
                    })
                    .filter_map(|slot| {
                        Some(TargetRoom {
                            room_code: slot.room.code()?,
                            id: slot.room.id,
                            room_number: slot.room.number,
                            block_name: slot.room.block_name,
                            capacity: slot.room.capacity,
                            occupancy: slot.occupancy,
                            lock: slot.room.lock,
                        })
                    })
                    .collect();
                rooms.sort_by(|left, right| left.room_code.cmp(&right.room_code));
                Ok(rooms)
            }
            .boxed()
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group_formation::{invite, leave_room, request_provisional_room, respond_to_invite};
    use crate::memory::MemoryRoster;
    use crate::model::{InviteAction, GROUP_CAPACITY};

    struct Fixture {
        roster: MemoryRoster,
        members: Vec<StudentId>,
        group: RoomId,
    }

    async fn group_of(size: usize) -> Result<Fixture, HostelError> {
        let roster = MemoryRoster::new();
        roster.add_room("A", "101", 4, RoomLock::default()).await;
        roster.add_room("A", "102", 4, RoomLock::default()).await;
        roster
            .add_room(
                "B",
                "101",
                4,
                RoomLock {
                    gender: None,
                    year: Some("3".to_owned()),
                },
            )
            .await;
        let mut members = Vec::new();
        for index in 0..size {
            members.push(
                roster
                    .add_student(&format!("member {index}"), "F", "2", 7.5)
                    .await,
            );
        }
        let group = request_provisional_room(&roster, members[0]).await?.room_id;
        for member in &members[1..] {
            let receipt = invite(&roster, members[0], *member).await?;
            respond_to_invite(&roster, *member, receipt.id, InviteAction::Accept).await?;
        }
        Ok(Fixture {
            roster,
            members,
            group,
        })
    }

    fn codes(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|code| (*code).to_owned()).collect()
    }

    #[tokio::test]
    async fn partial_groups_cannot_submit() -> Result<(), HostelError> {
        let fixture = group_of(3).await?;
        assert!(matches!(
            submit_preferences(&fixture.roster, fixture.members[0], codes(&["A-101"])).await,
            Err(HostelError::GroupNotFull {
                occupancy: 3,
                capacity: GROUP_CAPACITY
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn students_without_a_provisional_room_cannot_submit() -> Result<(), HostelError> {
        let roster = MemoryRoster::new();
        let loner = roster.add_student("loner", "F", "2", 7.5).await;
        assert!(matches!(
            submit_preferences(&roster, loner, codes(&["A-101"])).await,
            Err(HostelError::NotInProvisionalGroup)
        ));

        let real = roster.add_room("A", "101", 4, RoomLock::default()).await;
        roster.seat(loner, real).await;
        assert!(matches!(
            submit_preferences(&roster, loner, codes(&["A-101"])).await,
            Err(HostelError::NotInProvisionalGroup)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn full_group_submits_and_ranks_by_position() -> Result<(), HostelError> {
        let fixture = group_of(4).await?;
        let submitter = fixture.members[2];

        let saved =
            submit_preferences(&fixture.roster, submitter, codes(&["a-102", " A-101"])).await?;
        assert_eq!(saved.count, 2);
        assert_eq!(saved.provisional_room_id, fixture.group);

        let state = preference_state(&fixture.roster, fixture.members[0]).await?;
        assert!(state.in_provisional);
        assert!(state.exists);
        assert_eq!(state.submitted_by, Some(submitter));
        let ranked: Vec<String> = state.preference.iter().map(ToString::to_string).collect();
        assert_eq!(ranked, ["A-102", "A-101"]);
        assert_eq!(state.temp_room.unwrap().current_occupancy, 4);
        Ok(())
    }

    #[tokio::test]
    async fn only_the_submitter_may_replace_the_list() -> Result<(), HostelError> {
        let fixture = group_of(4).await?;
        let (owner, other) = (fixture.members[1], fixture.members[3]);
        submit_preferences(&fixture.roster, owner, codes(&["A-101"])).await?;

        assert!(matches!(
            submit_preferences(&fixture.roster, other, codes(&["A-102"])).await,
            Err(HostelError::NotSubmitter)
        ));

        let saved =
            submit_preferences(&fixture.roster, owner, codes(&["B-101", "A-102", "A-101"])).await?;
        assert_eq!(saved.count, 3);
        let state = preference_state(&fixture.roster, other).await?;
        assert_eq!(state.preference.len(), 3);
        assert_eq!(state.preference[0].to_string(), "B-101");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_codes_reject_the_whole_batch() -> Result<(), HostelError> {
        let fixture = group_of(4).await?;
        let submitter = fixture.members[0];
        submit_preferences(&fixture.roster, submitter, codes(&["A-101"])).await?;

        let Err(HostelError::InvalidRoomCodes(invalid)) = submit_preferences(
            &fixture.roster,
            submitter,
            codes(&["A-102", "Z-999", "nonsense"]),
        )
        .await
        else {
            panic!("unknown codes were accepted");
        };
        assert_eq!(invalid, ["Z-999", "nonsense"]);

        // the earlier list survives the rejected submission
        let state = preference_state(&fixture.roster, submitter).await?;
        assert_eq!(state.preference.len(), 1);
        assert_eq!(state.preference[0].to_string(), "A-101");
        Ok(())
    }

    #[tokio::test]
    async fn provisional_rooms_are_not_valid_targets() -> Result<(), HostelError> {
        let fixture = group_of(4).await?;
        let temp = fixture.roster.room(fixture.group).await.unwrap();
        assert!(matches!(
            submit_preferences(&fixture.roster, fixture.members[0], vec![temp.number]).await,
            Err(HostelError::InvalidRoomCodes(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_and_duplicate_lists_are_rejected() -> Result<(), HostelError> {
        let fixture = group_of(4).await?;
        let submitter = fixture.members[0];
        assert!(matches!(
            submit_preferences(&fixture.roster, submitter, Vec::new()).await,
            Err(HostelError::EmptyPreferences)
        ));
        assert!(matches!(
            submit_preferences(&fixture.roster, submitter, codes(&["A-101", "a-101"])).await,
            Err(HostelError::DuplicateRoomCode(code)) if code == "A-101"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn duplicates_do_not_hide_unknown_codes() -> Result<(), HostelError> {
        let fixture = group_of(4).await?;
        let Err(HostelError::InvalidRoomCodes(invalid)) = submit_preferences(
            &fixture.roster,
            fixture.members[0],
            codes(&["Y-100", "A-101", "a-101", "Z-999"]),
        )
        .await
        else {
            panic!("unknown codes went unreported");
        };
        assert_eq!(invalid, ["Y-100", "Z-999"]);
        Ok(())
    }

    #[tokio::test]
    async fn a_departing_submitter_takes_the_list_along() -> Result<(), HostelError> {
        let fixture = group_of(4).await?;
        let (owner, stayer) = (fixture.members[1], fixture.members[0]);
        submit_preferences(&fixture.roster, owner, codes(&["A-101"])).await?;

        let bystander = leave_room(&fixture.roster, fixture.members[3]).await?;
        assert!(!bystander.preferences_cleared);
        assert!(preference_state(&fixture.roster, stayer).await?.exists);

        let outcome = leave_room(&fixture.roster, owner).await?;
        assert!(outcome.preferences_cleared);
        let state = preference_state(&fixture.roster, stayer).await?;
        assert!(!state.exists);
        assert_eq!(state.submitted_by, None);
        Ok(())
    }

    #[tokio::test]
    async fn target_rooms_respect_year_locks() -> Result<(), HostelError> {
        let fixture = group_of(1).await?;
        let everything = target_rooms(&fixture.roster, None).await?;
        assert_eq!(everything.len(), 3);

        let second_years = target_rooms(&fixture.roster, Some(fixture.members[0])).await?;
        let visible: Vec<String> = second_years
            .iter()
            .map(|room| room.room_code.to_string())
            .collect();
        assert_eq!(visible, ["A-101", "A-102"]);
        Ok(())
    }
}
