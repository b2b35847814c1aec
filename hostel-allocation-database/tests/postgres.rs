//! Needs a migrated database in `DATABASE_URL`, run with `cargo test -- --ignored`.

use futures_util::FutureExt as _;
use hostel_allocation_core::group_formation::{
    invite, leave_room, request_provisional_room, respond_to_invite,
};
use hostel_allocation_core::model::{Demographics, InviteAction, InviteStatus, StudentId};
use hostel_allocation_core::seeder::{seed_rooms, SeedPlan};
use hostel_allocation_core::{HostelError, RosterStore as _};
use hostel_allocation_database::error::DatabaseError;
use hostel_allocation_database::{get_database_connection_from_env, PgRoster};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn roster() -> Result<PgRoster, Box<dyn std::error::Error + Send + Sync>> {
    Ok(PgRoster::new(get_database_connection_from_env()?))
}

async fn students(roster: &PgRoster, count: usize) -> Result<Vec<StudentId>, DatabaseError> {
    let demographics = Demographics {
        gender: "F".to_owned(),
        year: "1".to_owned(),
    };
    let mut ids = Vec::with_capacity(count);
    for index in 0..count {
        ids.push(
            roster
                .add_student(&format!("student {index}"), &demographics, 7.0)
                .await?,
        );
    }
    Ok(ids)
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn seeding_is_idempotent() -> TestResult {
    let roster = roster()?;
    let plan = SeedPlan {
        blocks: vec!["S".to_owned()],
        first_room: 101,
        last_room: 105,
        capacity: 4,
    };
    seed_rooms(&roster, &plan).await?;
    let again = seed_rooms(&roster, &plan).await?;
    assert_eq!(again.blocks_created, 0);
    assert_eq!(again.rooms_created, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn only_one_of_two_racing_accepts_gets_the_last_seat() -> TestResult {
    let roster = roster()?;
    let ids = students(&roster, 5).await?;
    let (owner, first, second, racer_a, racer_b) = (ids[0], ids[1], ids[2], ids[3], ids[4]);

    request_provisional_room(&roster, owner).await?;
    for member in [first, second] {
        let receipt = invite(&roster, owner, member).await?;
        respond_to_invite(&roster, member, receipt.id, InviteAction::Accept).await?;
    }
    let invite_a = invite(&roster, owner, racer_a).await?;
    let invite_b = invite(&roster, owner, racer_b).await?;

    let (a, b) = tokio::join!(
        respond_to_invite(&roster, racer_a, invite_a.id, InviteAction::Accept),
        respond_to_invite(&roster, racer_b, invite_b.id, InviteAction::Accept),
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|outcome| matches!(outcome, Err(HostelError::RoomFull))));
    Ok(())
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn leaving_expires_the_invites_of_the_room() -> TestResult {
    let roster = roster()?;
    let ids = students(&roster, 2).await?;
    let (owner, guest) = (ids[0], ids[1]);

    let room = request_provisional_room(&roster, owner).await?.room_id;
    let receipt = invite(&roster, owner, guest).await?;
    assert!(invite(&roster, owner, guest).await?.already_existed);

    let outcome = leave_room(&roster, owner).await?;
    assert_eq!(outcome.vacated, Some(room));
    assert_eq!(outcome.expired, 1);

    let invite_id = receipt.id;
    let status = roster
        .transaction(move |tx| {
            async move { Ok(tx.find_invite(invite_id).await?.map(|invite| invite.status)) }.boxed()
        })
        .await?;
    assert_eq!(status, Some(InviteStatus::Expired));
    Ok(())
}
