//! Fan-out orchestration over the registered agents
//!
//! Every operation builds one call per eligible agent (declared capability,
//! optional allow-list, active circuit), runs them concurrently and waits for
//! all of them. A failing call is retried once after a short delay. Agent
//! errors never escape: they end up in the report next to the successes.

use crate::modules::agents::domain::{
    Capabilities, Capability, ChapterRecord, ImageKind, MangaRecord, PageRecord,
    RecommendationRecord, ScrobbleUpdate, SearchQuery, SourceRecord,
};
use crate::modules::agents::infrastructure::cache::CacheStats;
use crate::modules::agents::infrastructure::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerStats,
};
use crate::modules::agents::infrastructure::ManagedAgent;
use crate::modules::agents::traits::Agent;
use crate::modules::library::domain::services::reconciliation::cluster_search_results;
use crate::modules::library::domain::services::{ImagePriorities, MangaMerger};
use crate::modules::library::domain::UnifiedManga;
use crate::shared::config::EngineConfig;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::{LogContext, TimedOperation};
use crate::{log_debug, log_info};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One agent's successful answer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult<T> {
    pub agent_id: String,
    pub fetched_at: DateTime<Utc>,
    pub value: T,
}

/// One agent's error after its retry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFailure {
    pub agent_id: String,
    pub error: String,
}

/// Outcome of a fan-out: fulfilled results in agent priority order, failures,
/// and agents skipped because their circuit is open
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport<T> {
    pub fulfilled: Vec<AgentResult<T>>,
    pub failed: Vec<AgentFailure>,
    pub skipped: Vec<String>,
}

impl<T> Default for FanOutReport<T> {
    fn default() -> Self {
        Self {
            fulfilled: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> FanOutReport<T> {
    pub fn attempted(&self) -> usize {
        self.fulfilled.len() + self.failed.len()
    }

    pub fn fulfilled_ids(&self) -> Vec<String> {
        self.fulfilled.iter().map(|r| r.agent_id.clone()).collect()
    }

    pub fn value_of(&self, agent_id: &str) -> Option<&T> {
        self.fulfilled
            .iter()
            .find(|r| r.agent_id == agent_id)
            .map(|r| &r.value)
    }
}

impl<T> FanOutReport<Option<T>> {
    /// Records from agents that found something
    pub fn into_found(self) -> Vec<SourceRecord<T>> {
        self.fulfilled
            .into_iter()
            .filter_map(|r| {
                r.value.map(|record| SourceRecord {
                    agent_id: r.agent_id,
                    fetched_at: r.fetched_at,
                    record,
                })
            })
            .collect()
    }
}

impl<T> FanOutReport<Vec<T>> {
    /// Every record of every agent, tagged with its source
    pub fn into_flattened(self) -> Vec<SourceRecord<T>> {
        self.fulfilled
            .into_iter()
            .flat_map(|r| {
                let (agent_id, fetched_at) = (r.agent_id, r.fetched_at);
                r.value.into_iter().map(move |record| SourceRecord {
                    agent_id: agent_id.clone(),
                    fetched_at,
                    record,
                })
            })
            .collect()
    }
}

/// Result of importing one manga
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub manga: UnifiedManga,
    /// Agents whose records went into this merge
    pub sources: Vec<String>,
    pub failures: Vec<AgentFailure>,
    pub skipped: Vec<String>,
}

/// Introspection view of one registered agent
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub id: String,
    pub priority: u32,
    pub capabilities: Capabilities,
    pub active: bool,
    pub breaker: CircuitBreakerStats,
    pub cache: Option<CacheStats>,
}

struct Targets {
    agents: Vec<Arc<ManagedAgent>>,
    skipped: Vec<String>,
}

pub struct AgentsManager {
    /// Sorted by priority (lower first)
    agents: Vec<Arc<ManagedAgent>>,
    breaker: CircuitBreakerConfig,
    retry_delay: Duration,
}

impl Default for AgentsManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), Duration::from_millis(500))
    }
}

impl AgentsManager {
    pub fn new(breaker: CircuitBreakerConfig, retry_delay: Duration) -> Self {
        Self {
            agents: Vec::new(),
            breaker,
            retry_delay,
        }
    }

    pub fn from_engine(config: &EngineConfig) -> Self {
        Self::new(
            CircuitBreakerConfig::from_engine(config),
            config.fanout_retry_delay,
        )
    }

    /// Register an agent; ids are unique
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> AppResult<()> {
        let id = agent.id().to_string();
        if id.trim().is_empty() {
            return Err(AppError::ConfigError("Agent id must not be empty".to_string()));
        }
        if self.agents.iter().any(|a| a.id() == id) {
            return Err(AppError::ConfigError(format!(
                "Agent '{}' is already registered",
                id
            )));
        }

        let managed = Arc::new(ManagedAgent::new(agent, self.breaker.clone()));
        log_info!(
            "Registered agent '{}' (priority {}, capabilities {:?})",
            id,
            managed.priority(),
            managed.capabilities()
        );
        self.agents.push(managed);
        self.agents.sort_by_key(|a| a.priority());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id().to_string()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ManagedAgent>> {
        self.agents.iter().find(|a| a.id() == id).cloned()
    }

    pub fn status(&self) -> Vec<AgentStatus> {
        self.agents
            .iter()
            .map(|a| AgentStatus {
                id: a.id().to_string(),
                priority: a.priority(),
                capabilities: a.capabilities(),
                active: a.is_active(),
                breaker: a.breaker_stats(),
                cache: a.cache_stats(),
            })
            .collect()
    }

    /// Asset type -> agent id -> image priority
    pub fn image_priorities(&self) -> ImagePriorities {
        let mut priorities = ImagePriorities::default();
        for agent in &self.agents {
            for kind in ImageKind::ALL {
                priorities.set(kind, agent.id(), agent.image_priority(kind));
            }
        }
        priorities
    }

    pub fn merger(&self) -> MangaMerger {
        MangaMerger::new(self.image_priorities())
    }

    /// Drop expired cache entries of every agent
    pub fn purge_caches(&self) -> usize {
        self.agents.iter().map(|a| a.purge_cache()).sum()
    }

    // ---- operations ----

    /// Fetch one manga from every agent holding an id for it
    pub async fn fetch_manga(
        &self,
        ids: &BTreeMap<String, String>,
        allow: Option<&[String]>,
    ) -> FanOutReport<Option<MangaRecord>> {
        let targets = self.select(Capability::Metadata, allow, |a| ids.contains_key(a.id()));
        self.fan_out("fetch_manga", targets, |agent| async move {
            let id = Self::id_for(ids, &agent)?;
            agent.try_fetch_manga(id).await
        })
        .await
    }

    pub async fn search_manga(
        &self,
        query: &SearchQuery,
        allow: Option<&[String]>,
    ) -> FanOutReport<Vec<MangaRecord>> {
        LogContext::search_operation(&query.title, None, None);
        let targets = self.select(Capability::Search, allow, |_| true);
        self.fan_out("search_manga", targets, |agent| async move {
            agent.try_search(query).await
        })
        .await
    }

    /// Search every agent and fuse hits describing the same manga
    pub async fn search_unified(
        &self,
        query: &SearchQuery,
        allow: Option<&[String]>,
    ) -> AppResult<Vec<UnifiedManga>> {
        let hits = self.search_manga(query, allow).await.into_flattened();
        let merger = self.merger();

        let unified = cluster_search_results(hits)
            .into_iter()
            .map(|cluster| merger.merge(None, cluster))
            .collect::<AppResult<Vec<_>>>()?;
        LogContext::search_operation(&query.title, None, Some(unified.len()));
        Ok(unified)
    }

    pub async fn fetch_chapters(
        &self,
        ids: &BTreeMap<String, String>,
        lang: Option<&str>,
        allow: Option<&[String]>,
    ) -> FanOutReport<Vec<ChapterRecord>> {
        let targets = self.select(Capability::Chapters, allow, |a| ids.contains_key(a.id()));
        self.fan_out("fetch_chapters", targets, |agent| async move {
            let id = Self::id_for(ids, &agent)?;
            agent.try_fetch_chapters(id, lang).await
        })
        .await
    }

    /// Page lists for one chapter; `chapter_ids` maps agent id -> chapter id
    pub async fn fetch_pages(
        &self,
        chapter_ids: &BTreeMap<String, String>,
        allow: Option<&[String]>,
    ) -> FanOutReport<Vec<PageRecord>> {
        let targets = self.select(Capability::Pages, allow, |a| chapter_ids.contains_key(a.id()));
        self.fan_out("fetch_pages", targets, |agent| async move {
            let id = Self::id_for(chapter_ids, &agent)?;
            agent.try_fetch_pages(id).await
        })
        .await
    }

    pub async fn recommendations(
        &self,
        ids: &BTreeMap<String, String>,
        allow: Option<&[String]>,
    ) -> FanOutReport<Vec<RecommendationRecord>> {
        let targets = self.select(Capability::Recommendations, allow, |a| ids.contains_key(a.id()));
        self.fan_out("recommendations", targets, |agent| async move {
            let id = Self::id_for(ids, &agent)?;
            agent.try_recommendations(id).await
        })
        .await
    }

    /// Push reading progress to every tracking agent holding an id.
    /// A push that failed after reaching the agent is repeated by the retry,
    /// so delivery is at-least-once.
    pub async fn scrobble(
        &self,
        update: &ScrobbleUpdate,
        allow: Option<&[String]>,
    ) -> FanOutReport<bool> {
        let targets = self.select(Capability::Scrobble, allow, |a| update.ids.contains_key(a.id()));
        self.fan_out("scrobble", targets, |agent| async move {
            agent.try_scrobble(update).await
        })
        .await
    }

    /// Fetch a manga from every agent that knows it and reconcile the answers.
    ///
    /// Cross references found in the first round (and in `previous`) are
    /// followed in a second round for agents not asked yet.
    pub async fn import_manga(
        &self,
        ids: &BTreeMap<String, String>,
        previous: Option<&UnifiedManga>,
        allow: Option<&[String]>,
    ) -> AppResult<ImportOutcome> {
        let timer = TimedOperation::new("import_manga");

        let mut known = ids.clone();
        if let Some(previous) = previous {
            for (agent, id) in &previous.external_ids {
                known.entry(agent.clone()).or_insert_with(|| id.clone());
            }
        }

        let first = self.fetch_manga(&known, allow).await;
        let mut failures = first.failed.clone();
        let mut skipped = first.skipped.clone();
        let mut records = first.into_found();

        let mut discovered: BTreeMap<String, String> = BTreeMap::new();
        for record in &records {
            for (agent, id) in &record.record.external_ids {
                if !known.contains_key(agent) && self.get(agent).is_some() {
                    discovered.entry(agent.clone()).or_insert_with(|| id.clone());
                }
            }
        }

        if !discovered.is_empty() {
            log_debug!("import_manga following {} discovered ids", discovered.len());
            let second = self.fetch_manga(&discovered, allow).await;
            failures.extend(second.failed.iter().cloned());
            skipped.extend(second.skipped.iter().cloned());
            records.extend(second.into_found());
        }

        if records.is_empty() && previous.is_none() {
            return Err(AppError::NotFound(format!(
                "No agent returned a record for {:?}",
                ids
            )));
        }

        let sources: Vec<String> = records.iter().map(|r| r.agent_id.clone()).collect();
        let manga = self.merger().merge(previous, records)?;
        timer.finish_with_info(&format!("'{}' from {} sources", manga.title, sources.len()));

        Ok(ImportOutcome {
            manga,
            sources,
            failures,
            skipped,
        })
    }

    // ---- internals ----

    fn id_for<'a>(ids: &'a BTreeMap<String, String>, agent: &ManagedAgent) -> AppResult<&'a str> {
        ids.get(agent.id())
            .map(String::as_str)
            .ok_or_else(|| AppError::InvalidInput(format!("No id for agent {}", agent.id())))
    }

    /// Agents declaring `capability`, allowed and accepted by `filter`;
    /// inactive ones are reported as skipped
    fn select<F>(&self, capability: Capability, allow: Option<&[String]>, filter: F) -> Targets
    where
        F: Fn(&ManagedAgent) -> bool,
    {
        let mut agents = Vec::new();
        let mut skipped = Vec::new();

        for agent in &self.agents {
            if !agent.supports(capability) || !filter(agent.as_ref()) {
                continue;
            }
            if let Some(allow) = allow {
                if !allow.iter().any(|id| id == agent.id()) {
                    continue;
                }
            }
            if agent.is_active() {
                agents.push(agent.clone());
            } else {
                skipped.push(agent.id().to_string());
            }
        }
        Targets { agents, skipped }
    }

    async fn fan_out<T, F, Fut>(&self, operation: &str, targets: Targets, call: F) -> FanOutReport<T>
    where
        F: Fn(Arc<ManagedAgent>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let call = &call;
        let attempts = targets.agents.into_iter().map(|agent| async move {
            let first = call(agent.clone()).await;
            let outcome = match first {
                Ok(value) => Ok(value),
                Err(error) => {
                    log_debug!(
                        "{} on {} failed ({}), retrying in {:?}",
                        operation,
                        agent.id(),
                        error,
                        self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    call(agent.clone()).await
                }
            };
            (agent.id().to_string(), Utc::now(), outcome)
        });

        let mut report = FanOutReport {
            skipped: targets.skipped,
            ..FanOutReport::default()
        };
        for (agent_id, fetched_at, outcome) in join_all(attempts).await {
            match outcome {
                Ok(value) => report.fulfilled.push(AgentResult {
                    agent_id,
                    fetched_at,
                    value,
                }),
                Err(error) => report.failed.push(AgentFailure {
                    agent_id,
                    error: error.to_string(),
                }),
            }
        }

        LogContext::fan_out(
            operation,
            report.fulfilled.len(),
            report.failed.len(),
            report.skipped.len(),
        );
        report
    }
}

impl std::fmt::Debug for AgentsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentsManager")
            .field("agents", &self.ids())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
