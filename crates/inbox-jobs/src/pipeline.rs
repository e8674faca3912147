//! Pipeline wiring.
//!
//! ```text
//! store_mails ─► MessageExtraction ─► ThreadSorting ─► Notification ─► Overview[room]…
//! ```
//!
//! Every arrow is a coalescing [`Stage::queue_work`]; stages never call each
//! other's work directly.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use inbox_core::config::RoutingConfig;
use inbox_core::defaults::MOVE_SETTLE_SECS;
use inbox_core::{
    AppConfig, ExtractionOracle, MailRepository, MailSender, NewMail, NotificationSink, Result,
    RoomRepository, ThreadRepository,
};

use crate::actions::PipelineThreadActions;
use crate::extraction::ExtractionWork;
use crate::ingest::{MailIngest, MailboxActivity};
use crate::notification::NotificationWork;
use crate::overview::{OverviewStages, OverviewWork};
use crate::sorting::{SortingWork, ThreadResolver};
use crate::stage::Stage;

/// External services the pipeline runs against.
#[derive(Clone)]
pub struct PipelineDeps {
    pub mails: Arc<dyn MailRepository>,
    pub threads: Arc<dyn ThreadRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub oracle: Arc<dyn ExtractionOracle>,
    pub sink: Arc<dyn NotificationSink>,
}

impl PipelineDeps {
    /// Use one store for every repository.
    pub fn from_store<S>(
        store: Arc<S>,
        oracle: Arc<dyn ExtractionOracle>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self
    where
        S: MailRepository + ThreadRepository + RoomRepository + 'static,
    {
        Self {
            mails: store.clone(),
            threads: store.clone(),
            rooms: store,
            oracle,
            sink,
        }
    }
}

/// The mail processing pipeline and its stages.
pub struct Pipeline {
    config: Arc<AppConfig>,
    routing: Arc<RoutingConfig>,
    deps: PipelineDeps,
    activity: MailboxActivity,
    ingest: Arc<MailIngest>,
    extraction: Stage,
    sorting: Stage,
    notification: Stage,
    overviews: OverviewStages,
    sort_lock: Arc<Mutex<()>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Create the stages. Notification and overview stages start queued so
    /// anything left over from a previous run is published once started.
    pub fn new(config: AppConfig, deps: PipelineDeps) -> Self {
        let routing = Arc::new(config.routing.clone());
        let activity = MailboxActivity::new();
        let extraction = Stage::new("MessageExtraction");
        let ingest = Arc::new(MailIngest::new(
            deps.mails.clone(),
            activity.clone(),
            extraction.clone(),
        ));
        Self {
            overviews: OverviewStages::new(routing.clone()),
            config: Arc::new(config),
            routing,
            deps,
            activity,
            ingest,
            extraction,
            sorting: Stage::new("ThreadSorting"),
            notification: Stage::queued("Notification"),
            sort_lock: Arc::new(Mutex::new(())),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Spawn every stage loop.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if !tasks.is_empty() {
            warn!("Pipeline already started");
            return;
        }
        let deps = &self.deps;

        tasks.push(self.extraction.spawn(Arc::new(ExtractionWork::new(
            deps.mails.clone(),
            deps.oracle.clone(),
            self.extraction.clone(),
            self.sorting.clone(),
            self.config.extraction.retry_delay(),
        ))));

        let resolver = ThreadResolver::new(
            deps.mails.clone(),
            deps.threads.clone(),
            self.config.threading.clone(),
        );
        tasks.push(self.sorting.spawn(Arc::new(SortingWork::new(
            resolver,
            self.activity.clone(),
            self.extraction.clone(),
            self.sorting.clone(),
            self.notification.clone(),
            self.sort_lock.clone(),
        ))));

        tasks.push(self.notification.spawn(Arc::new(NotificationWork::new(
            deps.mails.clone(),
            deps.threads.clone(),
            deps.rooms.clone(),
            deps.sink.clone(),
            self.routing.clone(),
            self.overviews.clone(),
        ))));

        for (room_id, stage) in self.overviews.iter() {
            tasks.push(stage.spawn(Arc::new(OverviewWork::new(
                room_id.clone(),
                &self.routing,
                deps.threads.clone(),
                deps.rooms.clone(),
                deps.sink.clone(),
            ))));
        }

        info!(
            subsystem = "pipeline",
            oracle = deps.oracle.name(),
            stages = tasks.len(),
            "Pipeline started"
        );
    }

    /// Stop every stage and wait for the loops to end.
    ///
    /// Sorting finishes its pending run; every other stage is cancelled.
    pub async fn shutdown(&self) {
        self.sorting.stop();
        self.extraction.force_stop();
        self.notification.force_stop();
        self.overviews.force_stop_all();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = ?e, "Pipeline stage task panicked");
            }
        }
        info!(subsystem = "pipeline", "Pipeline stopped");
    }

    /// Store a fetched batch and queue extraction for new mail.
    pub async fn store_mails(&self, batch: &[NewMail]) -> Result<u64> {
        self.ingest.store_mails(batch).await
    }

    /// Queue extraction of stored mails.
    pub fn enqueue_new_mail_batch(&self) -> bool {
        self.extraction.queue_work()
    }

    pub fn queue_thread_sorting(&self) -> bool {
        self.sorting.queue_work()
    }

    pub async fn queue_thread_sorting_blocking(&self) -> bool {
        self.sorting.queue_work_blocking().await
    }

    /// Queue the overview stages watching any of `rooms`.
    pub fn queue_overview_update(&self, rooms: &[String]) {
        self.overviews.queue_for(rooms.iter().map(String::as_str));
    }

    /// Operator actions bound to this pipeline.
    pub fn thread_actions(&self, sender: Option<Arc<dyn MailSender>>) -> PipelineThreadActions {
        PipelineThreadActions {
            mails: self.deps.mails.clone(),
            threads: self.deps.threads.clone(),
            rooms: self.deps.rooms.clone(),
            sink: self.deps.sink.clone(),
            sender,
            routing: self.routing.clone(),
            ingest: self.ingest.clone(),
            notification: self.notification.clone(),
            overviews: self.overviews.clone(),
            sort_lock: self.sort_lock.clone(),
            move_settle: Duration::from_secs(MOVE_SETTLE_SECS),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn activity(&self) -> &MailboxActivity {
        &self.activity
    }

    pub fn extraction_stage(&self) -> &Stage {
        &self.extraction
    }

    pub fn sorting_stage(&self) -> &Stage {
        &self.sorting
    }

    pub fn notification_stage(&self) -> &Stage {
        &self.notification
    }

    pub fn overview_stage(&self, room_id: &str) -> Option<&Stage> {
        self.overviews.get(room_id)
    }

    pub fn overview_stages(&self) -> &OverviewStages {
        &self.overviews
    }
}
