use futures_util::FutureExt as _;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::HostelError;
use crate::model::GROUP_CAPACITY;
use crate::roster::RosterStore;

/// The room inventory allocation runs place groups into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SeedPlan {
    pub blocks: Vec<String>,
    pub first_room: u16,
    pub last_room: u16,
    pub capacity: u32,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            blocks: vec!["A".to_owned(), "B".to_owned(), "C".to_owned()],
            first_room: 101,
            last_room: 150,
            capacity: GROUP_CAPACITY,
        }
    }
}

impl SeedPlan {
    /// Every seeded room has to be expressible as a `<Block>-<NNN>` code.
    pub fn validate(&self) -> Result<(), HostelError> {
        let invalid = |reason: String| Err(HostelError::InvalidSeedPlan(reason));
        if self.blocks.is_empty() {
            return invalid("no blocks given".to_owned());
        }
        if let Some(block) = self.blocks.iter().find(|block| !is_block_letter(block)) {
            return invalid(format!("block `{block}` is not a single letter A-Z"));
        }
        if self.last_room > 999 || self.first_room > self.last_room {
            return invalid(format!(
                "room range {}-{} is not within 000-999",
                self.first_room, self.last_room
            ));
        }
        if self.capacity == 0 {
            return invalid("rooms need at least one seat".to_owned());
        }
        Ok(())
    }
}

fn is_block_letter(name: &str) -> bool {
    let mut letters = name.chars();
    matches!((letters.next(), letters.next()), (Some(letter), None) if letter.is_ascii_uppercase())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub blocks_created: usize,
    pub rooms_created: usize,
    pub message: String,
}

/// Makes sure every block of the plan owns its full room range. Safe to run repeatedly.
pub async fn seed_rooms<S: RosterStore>(
    store: &S,
    plan: &SeedPlan,
) -> Result<SeedReport, HostelError> {
    plan.validate()?;
    let plan = plan.clone();
    let report = store
        .transaction(move |tx| {
            async move {
                let mut blocks_created = 0;
                let mut rooms_created = 0;
                for name in &plan.blocks {
                    let (block, created) = tx.ensure_block(name).await?;
                    blocks_created += usize::from(created);
                    for number in plan.first_room..=plan.last_room {
                        let created = tx
                            .ensure_room(block, &format!("{number:03}"), plan.capacity)
                            .await?;
                        rooms_created += usize::from(created);
                    }
                }
                Ok(SeedReport {
                    blocks_created,
                    rooms_created,
                    message: format!(
                        "Blocks {} and rooms {}-{} seeded",
                        plan.blocks.join("/"),
                        plan.first_room,
                        plan.last_room
                    ),
                })
            }
            .boxed()
        })
        .await?;
    info!(
        blocks_created = report.blocks_created,
        rooms_created = report.rooms_created,
        "seeded rooms"
    );
    Ok(report)
}
