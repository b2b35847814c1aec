//! Deterministic placement of provisional groups into real rooms.
//!
//! Works on a snapshot only, the engine feeds it what the roster looked like at
//! the start of the run and applies the resulting plan.

use alloc::collections::{BTreeMap, BTreeSet};
use core::fmt::{self, Display};

use hostel_allocation_core::model::{
    Demographics, OccupiedRoom, PreferenceEntry, RoomCode, RoomId, RoomLock, Student, StudentId,
};
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationPolicy {
    /// A group lands whole in its best available preference, otherwise its
    /// members are spread over whatever space is left.
    #[default]
    PreferenceThenFallback,
    /// A group lands whole in one of its preferences or not at all.
    WholeGroupOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    pub id: StudentId,
    pub gpa: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCandidate {
    pub provisional_room: RoomId,
    pub members: Vec<GroupMember>,
    pub demographics: Demographics,
    pub preferences: Vec<PreferenceEntry>,
}

impl GroupCandidate {
    /// `members` must not be empty. The group's demographics come from the lock
    /// of its provisional room, or from its first member where the lock is unset.
    #[must_use]
    pub fn new(
        provisional_room: RoomId,
        lock: &RoomLock,
        members: &[Student],
        preferences: Vec<PreferenceEntry>,
    ) -> Option<Self> {
        let first = members.first()?;
        let filled = lock.or_from(&first.demographics);
        Some(Self {
            provisional_room,
            members: members
                .iter()
                .map(|member| GroupMember {
                    id: member.id,
                    gpa: member.gpa,
                })
                .collect(),
            demographics: Demographics {
                gender: filled.gender.unwrap_or_default(),
                year: filled.year.unwrap_or_default(),
            },
            preferences,
        })
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        u32::try_from(self.members.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn average_gpa(&self) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = self.members.len() as f64;
        self.members.iter().map(|member| member.gpa).sum::<f64>() / count
    }

    /// Strongest members first so a split group seats them before the rest.
    fn members_by_priority(&self) -> Vec<StudentId> {
        self.members
            .iter()
            .sorted_by(|left, right| {
                right
                    .gpa
                    .total_cmp(&left.gpa)
                    .then(left.id.cmp(&right.id))
            })
            .map(|member| member.id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AllocationNote {
    Preference { rank: u32, code: RoomCode },
    Fallback,
    NoSpaceAvailable,
}

impl Display for AllocationNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preference { rank, code } => write!(f, "Preference rank {rank} ({code})"),
            Self::Fallback => f.write_str("Fallback"),
            Self::NoSpaceAvailable => f.write_str("No space available"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub provisional_room: RoomId,
    pub student: StudentId,
    pub room: Option<RoomId>,
    pub room_code: Option<RoomCode>,
    pub note: AllocationNote,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationPlan {
    /// Groups in the order they were served, members in the order they were seated.
    pub placements: Vec<Placement>,
    /// Demographic locks to stamp on rooms that received somebody.
    pub stamps: Vec<(RoomId, Demographics)>,
}

struct Occupancy {
    rooms: BTreeMap<RoomId, OccupiedRoom>,
    taken: BTreeSet<RoomId>,
    plan: AllocationPlan,
}

impl Occupancy {
    fn seat(&mut self, group: &GroupCandidate, student: StudentId, room: RoomId, note: AllocationNote) {
        let Some(slot) = self.rooms.get_mut(&room) else {
            return;
        };
        slot.occupancy += 1;
        if !slot.room.lock.is_complete() {
            slot.room.lock = slot.room.lock.or_from(&group.demographics);
            self.plan.stamps.push((room, group.demographics.clone()));
        }
        self.plan.placements.push(Placement {
            provisional_room: group.provisional_room,
            student,
            room: Some(room),
            room_code: slot.room.code(),
            note,
        });
    }

    fn unplaced(&mut self, group: &GroupCandidate, student: StudentId) {
        self.plan.placements.push(Placement {
            provisional_room: group.provisional_room,
            student,
            room: None,
            room_code: None,
            note: AllocationNote::NoSpaceAvailable,
        });
    }

    /// First preference, in rank order, that can take the whole group.
    fn preferred_room<'g>(&self, group: &'g GroupCandidate) -> Option<&'g PreferenceEntry> {
        group.preferences.iter().sorted_by_key(|entry| entry.rank).find(|entry| {
            self.rooms.get(&entry.room).is_some_and(|slot| {
                !self.taken.contains(&entry.room)
                    && slot.occupancy + group.size() <= slot.room.capacity
                    && slot.room.lock.admits(&group.demographics).is_ok()
            })
        })
    }

    /// Rooms with space left that admit the group, best first.
    fn fallback_rooms(&self, group: &GroupCandidate) -> Vec<RoomId> {
        self.rooms
            .values()
            .filter(|slot| {
                slot.free() > 0 && slot.room.lock.admits(&group.demographics).is_ok()
            })
            .sorted_by(|left, right| {
                let year_match = |slot: &OccupiedRoom| {
                    slot.room.lock.year.as_deref() == Some(group.demographics.year.as_str())
                };
                year_match(right)
                    .cmp(&year_match(left))
                    .then(right.free().cmp(&left.free()))
                    .then(left.room.id.cmp(&right.room.id))
            })
            .map(|slot| slot.room.id)
            .collect()
    }

    fn free(&self, room: RoomId) -> u32 {
        self.rooms.get(&room).map_or(0, OccupiedRoom::free)
    }
}

/// Serves groups by descending average GPA, ties by provisional room id.
///
/// Each group first gets the highest ranked preference that fits all of it
/// and has not received another group during this run. Without one, the
/// policy decides whether its members are spread over the remaining space.
#[must_use]
pub fn plan_allocation(
    groups: Vec<GroupCandidate>,
    rooms: Vec<OccupiedRoom>,
    policy: AllocationPolicy,
) -> AllocationPlan {
    let mut occupancy = Occupancy {
        rooms: rooms
            .into_iter()
            .map(|slot| (slot.room.id, slot))
            .collect(),
        taken: BTreeSet::new(),
        plan: AllocationPlan::default(),
    };

    let groups = groups
        .into_iter()
        .filter(|group| !group.members.is_empty() && !group.preferences.is_empty())
        .sorted_by(|left, right| {
            right
                .average_gpa()
                .total_cmp(&left.average_gpa())
                .then(left.provisional_room.cmp(&right.provisional_room))
        });

    for group in groups {
        let members = group.members_by_priority();

        if let Some(entry) = occupancy.preferred_room(&group).cloned() {
            occupancy.taken.insert(entry.room);
            for student in members {
                let note = AllocationNote::Preference {
                    rank: entry.rank,
                    code: entry.code.clone(),
                };
                occupancy.seat(&group, student, entry.room, note);
            }
            continue;
        }

        let mut waiting = members.into_iter().peekable();
        if policy == AllocationPolicy::PreferenceThenFallback {
            for room in occupancy.fallback_rooms(&group) {
                while occupancy.free(room) > 0 {
                    let Some(student) = waiting.next() else {
                        break;
                    };
                    occupancy.seat(&group, student, room, AllocationNote::Fallback);
                }
                if waiting.peek().is_none() {
                    break;
                }
            }
        }
        for student in waiting {
            occupancy.unplaced(&group, student);
        }
    }

    occupancy.plan
}

#[cfg(test)]
mod tests {
    use hostel_allocation_core::model::{BlockId, Room};

    use super::*;

    fn room(id: i32, code: &str, capacity: u32, occupancy: u32, year: Option<&str>) -> OccupiedRoom {
        let (block, number) = code.split_once('-').unwrap();
        OccupiedRoom {
            room: Room {
                id: RoomId(id),
                block: BlockId(1),
                block_name: block.to_owned(),
                number: number.to_owned(),
                capacity,
                lock: RoomLock {
                    gender: None,
                    year: year.map(ToOwned::to_owned),
                },
            },
            occupancy,
        }
    }

    fn group(id: i32, gpas: &[f64], preferences: &[(i32, &str)]) -> GroupCandidate {
        GroupCandidate {
            provisional_room: RoomId(id),
            members: gpas
                .iter()
                .zip(0..)
                .map(|(gpa, index)| GroupMember {
                    id: StudentId(id * 100 + index),
                    gpa: *gpa,
                })
                .collect(),
            demographics: Demographics {
                gender: "F".to_owned(),
                year: "2".to_owned(),
            },
            preferences: preferences
                .iter()
                .zip(1..)
                .map(|((room, code), rank)| PreferenceEntry {
                    rank,
                    room: RoomId(*room),
                    code: code.parse().unwrap(),
                })
                .collect(),
        }
    }

    fn rooms_of(plan: &AllocationPlan, group: i32) -> Vec<Option<RoomId>> {
        plan.placements
            .iter()
            .filter(|placement| placement.provisional_room == RoomId(group))
            .map(|placement| placement.room)
            .collect()
    }

    #[test]
    fn first_fitting_preference_wins() {
        let plan = plan_allocation(
            vec![group(10, &[8.0; 4], &[(1, "A-101"), (2, "A-102")])],
            vec![room(1, "A-101", 4, 0, None), room(2, "A-102", 4, 0, None)],
            AllocationPolicy::PreferenceThenFallback,
        );
        assert_eq!(rooms_of(&plan, 10), [Some(RoomId(1)); 4]);
        assert!(plan.placements.iter().all(|placement| placement.note
            == AllocationNote::Preference {
                rank: 1,
                code: "A-101".parse().unwrap()
            }));
        assert_eq!(plan.placements[0].note.to_string(), "Preference rank 1 (A-101)");
        assert_eq!(plan.stamps.len(), 1);
    }

    #[test]
    fn higher_average_gpa_is_served_first() {
        let plan = plan_allocation(
            vec![
                group(10, &[6.0, 6.0], &[(1, "A-101")]),
                group(11, &[9.0, 9.0], &[(1, "A-101")]),
            ],
            vec![room(1, "A-101", 4, 0, None)],
            AllocationPolicy::WholeGroupOnly,
        );
        assert_eq!(rooms_of(&plan, 11), [Some(RoomId(1)); 2]);
        // the room hosts one incoming group per run even with seats left
        assert_eq!(rooms_of(&plan, 10), [None, None]);
        assert_eq!(plan.placements[0].provisional_room, RoomId(11));
    }

    #[test]
    fn equal_averages_fall_back_to_room_id() {
        let plan = plan_allocation(
            vec![
                group(12, &[7.0, 7.0, 7.0, 7.0], &[(1, "A-101")]),
                group(11, &[7.0, 7.0, 7.0, 7.0], &[(1, "A-101")]),
            ],
            vec![room(1, "A-101", 4, 0, None)],
            AllocationPolicy::WholeGroupOnly,
        );
        assert_eq!(rooms_of(&plan, 11), [Some(RoomId(1)); 4]);
        assert_eq!(rooms_of(&plan, 12), [None; 4]);
    }

    #[test]
    fn too_small_preferences_send_the_group_to_fallback() {
        let plan = plan_allocation(
            vec![group(10, &[9.0, 8.0, 7.0, 6.0], &[(1, "A-101")])],
            vec![
                room(1, "A-101", 4, 2, None),
                room(2, "B-101", 4, 1, None),
                room(3, "B-102", 4, 3, Some("2")),
            ],
            AllocationPolicy::PreferenceThenFallback,
        );
        // year match first, then most free seats
        assert_eq!(
            rooms_of(&plan, 10),
            [Some(RoomId(3)), Some(RoomId(2)), Some(RoomId(2)), Some(RoomId(2))]
        );
        assert_eq!(plan.placements[0].student, StudentId(1000));
        assert!(plan
            .placements
            .iter()
            .all(|placement| placement.note == AllocationNote::Fallback));
    }

    #[test]
    fn whole_group_policy_never_splits() {
        let plan = plan_allocation(
            vec![group(10, &[8.0; 4], &[(1, "A-101")])],
            vec![room(1, "A-101", 4, 2, None), room(2, "B-101", 4, 0, None)],
            AllocationPolicy::WholeGroupOnly,
        );
        assert_eq!(rooms_of(&plan, 10), [None; 4]);
        assert!(plan
            .placements
            .iter()
            .all(|placement| placement.note == AllocationNote::NoSpaceAvailable));
        assert!(plan.stamps.is_empty());
    }

    #[test]
    fn members_without_space_are_reported() {
        let plan = plan_allocation(
            vec![group(10, &[8.0; 4], &[(1, "A-101")])],
            vec![room(1, "A-101", 4, 3, None)],
            AllocationPolicy::PreferenceThenFallback,
        );
        assert_eq!(
            rooms_of(&plan, 10),
            [Some(RoomId(1)), None, None, None]
        );
        assert_eq!(plan.placements[3].note.to_string(), "No space available");
    }

    #[test]
    fn locked_rooms_only_take_matching_groups() {
        let mut male_room = room(1, "A-101", 4, 1, None);
        male_room.room.lock.gender = Some("M".to_owned());
        let plan = plan_allocation(
            vec![group(10, &[8.0; 2], &[(1, "A-101"), (2, "A-102")])],
            vec![male_room, room(2, "A-102", 4, 0, None)],
            AllocationPolicy::PreferenceThenFallback,
        );
        assert_eq!(rooms_of(&plan, 10), [Some(RoomId(2)); 2]);
        assert!(matches!(
            plan.placements[0].note,
            AllocationNote::Preference { rank: 2, .. }
        ));
    }

    #[test]
    fn groups_without_preferences_or_members_are_skipped() {
        let plan = plan_allocation(
            vec![group(10, &[8.0; 4], &[]), group(11, &[], &[(1, "A-101")])],
            vec![room(1, "A-101", 4, 0, None)],
            AllocationPolicy::PreferenceThenFallback,
        );
        assert!(plan.placements.is_empty());
    }
}
