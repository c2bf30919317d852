//! Engine bootstrap
//!
//! Wires the stores, the agent network, the job queues with their workers and
//! the recurring schedulers. Nothing here is global: every manager is built
//! explicitly and handed to whoever needs it.

use crate::modules::agents::application::AgentsManager;
use crate::modules::agents::domain::ImageKind;
use crate::modules::agents::infrastructure::adapters::{
    anilist, kitsu, mangadex, mangaupdates, AniListAgent, KitsuAgent, MangaDexAgent,
    MangaUpdatesAgent,
};
use crate::modules::jobs::domain::entities::{Job, JobDescriptor};
use crate::modules::jobs::domain::repository::JobRepository;
use crate::modules::jobs::domain::value_objects::QueueMode;
use crate::modules::jobs::infrastructure::InMemoryJobRepository;
use crate::modules::jobs::queue::{Queue, QueueConfig, QueueManager, QueueSnapshot};
use crate::modules::jobs::recurring::{RecurringInstaller, RecurringUnit};
use crate::modules::jobs::scheduler::{SchedulerManager, SchedulerStats};
use crate::modules::jobs::worker::Worker;
use crate::modules::jobs::workers::{
    ChapterSyncWorker, ImportWorker, MaintenancePayload, MaintenanceWorker, RefreshWorker,
    StatisticsWorker, SyncWorker, CHAPTERS_QUEUE, IMPORT_QUEUE, MAINTENANCE_QUEUE, REFRESH_QUEUE,
    STATISTICS_QUEUE, SYNC_QUEUE,
};
use crate::modules::library::domain::LibraryRepository;
use crate::modules::library::infrastructure::InMemoryLibraryRepository;
use crate::shared::config::EngineConfig;
use crate::shared::errors::{AppError, AppResult};
use crate::{log_info, log_warn};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Workers per on-demand queue
const IMPORT_WORKERS: usize = 2;
const CHAPTER_WORKERS: usize = 2;

pub struct Engine {
    config: EngineConfig,
    jobs: Arc<dyn JobRepository>,
    library: Arc<dyn LibraryRepository>,
    agents: Arc<AgentsManager>,
    queues: Arc<QueueManager>,
    schedulers: Arc<SchedulerManager>,
}

impl Engine {
    /// Engine backed by the in-memory stores and the shipped agents
    pub async fn bootstrap(config: EngineConfig) -> AppResult<Self> {
        let agents = build_agents(&config)?;
        Self::assemble(
            config,
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(InMemoryLibraryRepository::new()),
            agents,
        )
        .await
    }

    /// Engine over caller-supplied stores and agents
    pub async fn assemble(
        config: EngineConfig,
        jobs: Arc<dyn JobRepository>,
        library: Arc<dyn LibraryRepository>,
        agents: AgentsManager,
    ) -> AppResult<Self> {
        let agents = Arc::new(agents);
        let queues = Arc::new(QueueManager::new());
        let schedulers = Arc::new(SchedulerManager::new());

        let engine = Self {
            config,
            jobs,
            library,
            agents,
            queues,
            schedulers,
        };
        engine.install_queues().await?;
        engine.install_recurring().await?;
        Ok(engine)
    }

    async fn install_queues(&self) -> AppResult<()> {
        let config = QueueConfig::from_engine(&self.config, QueueMode::Immediate);

        let import: Vec<Arc<dyn Worker>> = (0..IMPORT_WORKERS)
            .map(|_| {
                Arc::new(
                    ImportWorker::new(Arc::clone(&self.agents), Arc::clone(&self.library))
                        .with_queues(Arc::clone(&self.queues)),
                ) as Arc<dyn Worker>
            })
            .collect();
        let chapters: Vec<Arc<dyn Worker>> = (0..CHAPTER_WORKERS)
            .map(|_| {
                Arc::new(ChapterSyncWorker::new(
                    Arc::clone(&self.agents),
                    Arc::clone(&self.library),
                )) as Arc<dyn Worker>
            })
            .collect();

        for (name, workers) in [(IMPORT_QUEUE, import), (CHAPTERS_QUEUE, chapters)] {
            let queue = Queue::new(name, workers, Some(Arc::clone(&self.jobs)), config.clone())?;
            self.queues.register(queue).await?;
        }
        Ok(())
    }

    async fn install_recurring(&self) -> AppResult<()> {
        let schedules = &self.config.schedules;
        let installer = RecurringInstaller::new(
            &self.queues,
            &self.schedulers,
            Some(Arc::clone(&self.jobs)),
            QueueConfig::from_engine(&self.config, QueueMode::Called),
            schedules.timezone,
        );

        let units = vec![
            RecurringUnit::new(
                REFRESH_QUEUE,
                Arc::new(RefreshWorker::new(Arc::clone(&self.library), Arc::clone(&self.queues))),
                "library-refresh",
                schedules.library_refresh.clone(),
            )
            .with_template(JobDescriptor::new(REFRESH_QUEUE, json!({"scope": "library"})).transient()),
            RecurringUnit::new(
                MAINTENANCE_QUEUE,
                Arc::new(MaintenanceWorker::new(
                    Arc::clone(&self.jobs),
                    Arc::clone(&self.agents),
                    self.config.job_retention,
                )),
                "maintenance",
                schedules.maintenance.clone(),
            )
            .with_template(MaintenancePayload::template()?),
            RecurringUnit::new(
                STATISTICS_QUEUE,
                Arc::new(StatisticsWorker::new(Arc::clone(&self.library), Arc::clone(&self.jobs))),
                "statistics",
                schedules.statistics.clone(),
            )
            .with_template(JobDescriptor::new(STATISTICS_QUEUE, json!({"scope": "all"})).transient()),
            RecurringUnit::new(
                SYNC_QUEUE,
                Arc::new(SyncWorker::new(Arc::clone(&self.agents), Arc::clone(&self.library))),
                "external-sync",
                schedules.external_sync.clone(),
            )
            .with_template(JobDescriptor::new(SYNC_QUEUE, json!({"scope": "pending"}))),
        ];

        for unit in units {
            installer.install(unit).await?;
        }
        Ok(())
    }

    /// Re-load persisted work, then start tick loops and schedulers
    pub async fn start(&self) -> AppResult<()> {
        self.queues.recover_all().await?;
        self.queues.start_all().await;
        self.schedulers.start_all().await?;
        log_info!(
            "Engine started: {} agents, queues {:?}",
            self.agents.len(),
            self.queues.names().await
        );
        Ok(())
    }

    /// Stop schedulers first so no new work arrives, then the tick loops
    pub async fn shutdown(&self) {
        self.schedulers.stop_all().await;
        self.queues.stop_all().await;
        log_info!("Engine stopped");
    }

    pub async fn submit(&self, descriptor: JobDescriptor) -> AppResult<Arc<Job>> {
        self.queues.submit(descriptor).await
    }

    /// Record that an agent's image failed to download and re-pick the display
    /// image. Returns the new URL, if any agent is left.
    pub async fn image_failed(
        &self,
        manga_id: Uuid,
        kind: ImageKind,
        agent_id: &str,
    ) -> AppResult<Option<String>> {
        let mut manga = self
            .library
            .get_manga(manga_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Manga {} not found", manga_id)))?;
        let next = self.agents.merger().image_failed(&mut manga, kind, agent_id);
        self.library.save_manga(&manga).await?;
        log_info!(
            "Manga '{}' {} from '{}' unavailable; now {:?}",
            manga.title,
            kind,
            agent_id,
            next.as_ref().map(|c| c.agent_id.as_str())
        );
        Ok(next.map(|c| c.url))
    }

    pub async fn queue_snapshots(&self) -> Vec<QueueSnapshot> {
        self.queues.snapshots().await
    }

    pub async fn scheduler_stats(&self) -> Vec<SchedulerStats> {
        self.schedulers.stats().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn agents(&self) -> &Arc<AgentsManager> {
        &self.agents
    }

    pub fn library(&self) -> &Arc<dyn LibraryRepository> {
        &self.library
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    pub fn schedulers(&self) -> &Arc<SchedulerManager> {
        &self.schedulers
    }
}

/// The shipped agents the configuration enables
pub fn build_agents(config: &EngineConfig) -> AppResult<AgentsManager> {
    let mut manager = AgentsManager::from_engine(config);
    let ttl = config.agent_cache_ttl;
    let hosts = &config.hosts;

    if config.agent_enabled(mangadex::AGENT_ID) {
        manager.register(Arc::new(MangaDexAgent::new(&hosts.mangadex, ttl)?))?;
    }
    if config.agent_enabled(anilist::AGENT_ID) {
        let agent = AniListAgent::new(&hosts.anilist, ttl, config.anilist_token.clone())?;
        manager.register(Arc::new(agent))?;
    }
    if config.agent_enabled(mangaupdates::AGENT_ID) {
        manager.register(Arc::new(MangaUpdatesAgent::new(&hosts.mangaupdates, ttl)?))?;
    }
    if config.agent_enabled(kitsu::AGENT_ID) {
        manager.register(Arc::new(KitsuAgent::new(&hosts.kitsu, ttl)?))?;
    }
    if manager.is_empty() {
        log_warn!("No agents enabled; imports will find nothing");
    }
    Ok(manager)
}
