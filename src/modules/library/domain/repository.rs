/// Repository trait for the fused library
///
/// Like the job store, the library store is an external collaborator reached
/// only through these contracts; `library::infrastructure` ships an in-memory
/// implementation.
use crate::modules::library::domain::unified::{UnifiedChapter, UnifiedManga};
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LibraryRepository: Send + Sync {
    /// Insert or replace a unified manga
    async fn save_manga(&self, manga: &UnifiedManga) -> AppResult<()>;

    async fn get_manga(&self, id: Uuid) -> AppResult<Option<UnifiedManga>>;

    async fn list_manga(&self) -> AppResult<Vec<UnifiedManga>>;

    /// Manga whose external id map holds `id` for `agent_id`
    async fn find_by_external_id(&self, agent_id: &str, id: &str) -> AppResult<Option<UnifiedManga>>;

    /// Delete a manga together with its chapters and reading progress
    async fn delete_manga(&self, id: Uuid) -> AppResult<bool>;

    /// Replace the chapter list of a manga
    async fn save_chapters(&self, manga_id: Uuid, chapters: &[UnifiedChapter]) -> AppResult<()>;

    /// Chapters of a manga in reading order
    async fn chapters_for(&self, manga_id: Uuid) -> AppResult<Vec<UnifiedChapter>>;

    async fn save_progress(&self, progress: &ReadingProgress) -> AppResult<()>;

    async fn get_progress(&self, manga_id: Uuid) -> AppResult<Option<ReadingProgress>>;

    /// Progress changed since it was last pushed to tracking agents
    async fn pending_scrobbles(&self) -> AppResult<Vec<ReadingProgress>>;

    async fn mark_scrobbled(&self, manga_id: Uuid, at: DateTime<Utc>) -> AppResult<()>;

    /// Live counts over the stored library
    async fn get_statistics(&self) -> AppResult<LibraryStatistics>;

    async fn save_statistics_snapshot(&self, snapshot: &LibraryStatistics) -> AppResult<()>;

    async fn latest_statistics_snapshot(&self) -> AppResult<Option<LibraryStatistics>>;
}

/// Local reading state of one manga
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub manga_id: Uuid,
    pub chapter: f64,
    pub volume: Option<f64>,
    pub status: Option<String>,
    pub score: Option<f64>,
    pub updated_at: DateTime<Utc>,
    /// Last successful push to tracking agents
    pub scrobbled_at: Option<DateTime<Utc>>,
}

impl ReadingProgress {
    pub fn new(manga_id: Uuid, chapter: f64) -> Self {
        Self {
            manga_id,
            chapter,
            volume: None,
            status: None,
            score: None,
            updated_at: Utc::now(),
            scrobbled_at: None,
        }
    }

    pub fn needs_scrobble(&self) -> bool {
        self.scrobbled_at.map_or(true, |at| at < self.updated_at)
    }
}

/// Library statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryStatistics {
    pub manga_count: usize,
    pub chapter_count: usize,
    /// Agent id -> manga carrying an id for that agent
    pub manga_per_agent: std::collections::BTreeMap<String, usize>,
    /// Status -> manga count
    pub manga_per_status: std::collections::BTreeMap<String, usize>,
    pub average_score: Option<f64>,
    pub pending_scrobbles: usize,
    pub computed_at: Option<DateTime<Utc>>,
}

impl LibraryStatistics {
    /// Statistics over a set of manga; chapter and scrobble counts are filled by the caller
    pub fn from_manga<'a>(manga: impl IntoIterator<Item = &'a UnifiedManga>) -> Self {
        let mut stats = Self::default();
        let mut score_sum = 0.0;
        let mut scored = 0usize;

        for entry in manga {
            stats.manga_count += 1;
            for agent in entry.external_ids.keys() {
                *stats.manga_per_agent.entry(agent.clone()).or_default() += 1;
            }
            let status = entry.status.clone().unwrap_or_else(|| "unknown".to_string());
            *stats.manga_per_status.entry(status).or_default() += 1;
            if let Some(score) = entry.score {
                score_sum += score;
                scored += 1;
            }
        }

        if scored > 0 {
            stats.average_score = Some(score_sum / scored as f64);
        }
        stats
    }
}
