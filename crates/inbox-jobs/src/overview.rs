//! Overview stages: one per overview room, each keeping a single chat message
//! that lists the open threads of the rooms it watches.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use inbox_core::config::RoutingConfig;
use inbox_core::defaults::NOTIFY_RETRY_DELAY_SECS;
use inbox_core::{NotificationSink, Result, RoomRepository, ThreadRepository};

use crate::stage::{cancellable_sleep, Stage, StageContext, StageWork};

/// The overview stages of every configured overview room.
#[derive(Clone)]
pub struct OverviewStages {
    stages: Arc<BTreeMap<String, Stage>>,
    routing: Arc<RoutingConfig>,
}

impl OverviewStages {
    /// Create one initially queued stage per overview room.
    pub fn new(routing: Arc<RoutingConfig>) -> Self {
        let stages = routing
            .overview_rooms()
            .into_iter()
            .map(|room| {
                let name = format!("Overview[{}]", routing.alias_of(&room));
                (room, Stage::queued(name))
            })
            .collect();
        Self {
            stages: Arc::new(stages),
            routing,
        }
    }

    pub fn get(&self, room_id: &str) -> Option<&Stage> {
        self.stages.get(room_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Stage)> {
        self.stages.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Overview rooms watching any of `touched`.
    fn watching<'a>(&self, touched: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        touched
            .into_iter()
            .flat_map(|room| self.routing.overview_rooms_for(room))
            .collect()
    }

    /// Queue the overview stages watching any of the touched rooms.
    pub fn queue_for<'a>(&self, touched: impl IntoIterator<Item = &'a str>) {
        for room in self.watching(touched) {
            if let Some(stage) = self.stages.get(&room) {
                stage.queue_work();
            }
        }
    }

    /// Like [`OverviewStages::queue_for`], waiting until every queued stage
    /// has run. Returns `false` if any stage was already stopped.
    pub async fn queue_for_blocking<'a>(
        &self,
        touched: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        let stages: Vec<Stage> = self
            .watching(touched)
            .iter()
            .filter_map(|room| self.stages.get(room).cloned())
            .collect();
        wait_all(stages).await
    }

    /// Queue every overview stage and wait for all of them.
    pub async fn queue_all_blocking(&self) -> bool {
        wait_all(self.stages.values().cloned().collect()).await
    }

    pub fn force_stop_all(&self) {
        for stage in self.stages.values() {
            stage.force_stop();
        }
    }
}

async fn wait_all(stages: Vec<Stage>) -> bool {
    let mut tasks = JoinSet::new();
    for stage in stages {
        tasks.spawn(async move { stage.queue_work_blocking().await });
    }
    let mut ok = true;
    while let Some(result) = tasks.join_next().await {
        ok &= result.unwrap_or(false);
    }
    ok
}

/// Rebuilds the overview message of one overview room.
pub struct OverviewWork {
    room_id: String,
    targets: Vec<String>,
    threads: Arc<dyn ThreadRepository>,
    rooms: Arc<dyn RoomRepository>,
    sink: Arc<dyn NotificationSink>,
}

impl OverviewWork {
    pub fn new(
        room_id: String,
        routing: &RoutingConfig,
        threads: Arc<dyn ThreadRepository>,
        rooms: Arc<dyn RoomRepository>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let targets = routing.overview_targets(&room_id);
        Self {
            room_id,
            targets,
            threads,
            rooms,
            sink,
        }
    }

    #[instrument(
        skip(self),
        fields(subsystem = "pipeline", op = "update_overview", room_id = %self.room_id)
    )]
    async fn update(&self) -> Result<()> {
        let previous = self.rooms.overview_message_id(&self.room_id).await?;
        let entries = self.threads.overview_threads(&self.targets).await?;
        let message_id = self
            .sink
            .update_overview(&self.room_id, previous.as_deref(), &entries)
            .await?;
        self.rooms
            .set_overview_message_id(&self.room_id, Some(&message_id))
            .await?;
        debug!(result_count = entries.len(), "Overview updated");
        Ok(())
    }
}

#[async_trait]
impl StageWork for OverviewWork {
    async fn setup(&self, _ctx: &StageContext) {
        info!(room_id = %self.room_id, targets = ?self.targets, "Overview room watches rooms");
    }

    async fn work(&self, ctx: &StageContext) -> bool {
        match self.update().await {
            Ok(()) => true,
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "Failed to update overview");
                let delay = Duration::from_secs(NOTIFY_RETRY_DELAY_SECS);
                cancellable_sleep(&ctx.cancel, delay).await;
                false
            }
        }
    }
}
