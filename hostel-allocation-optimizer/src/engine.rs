use futures_util::FutureExt as _;
use hostel_allocation_core::model::{RoomCode, RoomId, StudentId};
use hostel_allocation_core::{
    AllocationRecord, HostelError, InviteSelector, RosterStore, RosterTx,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::plan::{plan_allocation, AllocationPlan, AllocationPolicy, GroupCandidate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentOutcome {
    pub provisional_room: RoomId,
    pub student: StudentId,
    pub room: Option<RoomId>,
    pub room_code: Option<RoomCode>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationReport {
    pub policy: AllocationPolicy,
    pub groups: usize,
    pub placed: usize,
    pub unplaced: usize,
    pub outcomes: Vec<StudentOutcome>,
}

/// Runs allocation rounds, at most one at a time per process.
///
/// The store wide lock taken inside the transaction keeps other processes out
/// as well.
#[derive(Debug, Default)]
pub struct AllocationEngine {
    policy: AllocationPolicy,
    running: Mutex<()>,
}

impl AllocationEngine {
    #[must_use]
    pub fn new(policy: AllocationPolicy) -> Self {
        Self {
            policy,
            running: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Places every provisional group with a preference list into real rooms.
    ///
    /// The whole run is one transaction, a failure leaves no placement behind.
    pub async fn run<S: RosterStore>(&self, store: &S) -> Result<AllocationReport, HostelError> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("allocation requested while another run is in progress");
            return Err(HostelError::AllocationInProgress);
        };
        let policy = self.policy;
        let report = store
            .transaction(move |tx| allocate(tx, policy).boxed())
            .await?;
        info!(
            ?policy,
            groups = report.groups,
            placed = report.placed,
            unplaced = report.unplaced,
            "allocation finished"
        );
        Ok(report)
    }
}

async fn allocate(
    tx: &mut dyn RosterTx,
    policy: AllocationPolicy,
) -> Result<AllocationReport, HostelError> {
    if !tx.try_lock_allocation().await? {
        return Err(HostelError::AllocationInProgress);
    }

    let mut groups = Vec::new();
    for list in tx.list_preference_lists().await? {
        let Some(room) = tx.find_room(list.provisional_room).await? else {
            continue;
        };
        let members = tx.room_members(room.id).await?;
        let complete = u32::try_from(members.len()).is_ok_and(|size| size == room.capacity);
        if !complete || !members.iter().any(|member| member.id == list.submitted_by) {
            debug!(room = %room.id, "skipping preference list of an incomplete group");
            continue;
        }
        match GroupCandidate::new(room.id, &room.lock, &members, list.entries) {
            Some(group) => groups.push(group),
            None => debug!(room = %room.id, "skipping preference list of an empty group"),
        }
    }
    let group_count = groups.len();
    let provisional_rooms: Vec<RoomId> = groups.iter().map(|group| group.provisional_room).collect();
    let rooms = tx.list_real_rooms().await?;

    let AllocationPlan { placements, stamps } = plan_allocation(groups, rooms, policy);

    for (room, demographics) in &stamps {
        tx.stamp_room_lock(*room, demographics).await?;
    }
    let mut outcomes = Vec::with_capacity(placements.len());
    for placement in placements {
        if let Some(room) = placement.room {
            tx.claim_seat(placement.student, room).await?;
        }
        let note = placement.note.to_string();
        tx.record_allocation(&AllocationRecord {
            student: placement.student,
            room: placement.room,
            note: note.clone(),
        })
        .await?;
        outcomes.push(StudentOutcome {
            provisional_room: placement.provisional_room,
            student: placement.student,
            room: placement.room,
            room_code: placement.room_code,
            note,
        });
    }

    // nobody may join a group once it went through allocation
    for room in provisional_rooms {
        let expired = tx
            .expire_pending_invites(&InviteSelector::for_room(room))
            .await?;
        if expired > 0 {
            debug!(%room, expired, "expired invites into an allocated group");
        }
    }

    let placed = outcomes.iter().filter(|outcome| outcome.room.is_some()).count();
    Ok(AllocationReport {
        policy,
        groups: group_count,
        placed,
        unplaced: outcomes.len() - placed,
        outcomes,
    })
}
