/// In-memory implementation of LibraryRepository
use crate::modules::library::domain::repository::{
    LibraryRepository, LibraryStatistics, ReadingProgress,
};
use crate::modules::library::domain::unified::{UnifiedChapter, UnifiedManga};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryLibraryRepository {
    manga: DashMap<Uuid, UnifiedManga>,
    chapters: DashMap<Uuid, Vec<UnifiedChapter>>,
    progress: DashMap<Uuid, ReadingProgress>,
    snapshots: RwLock<Vec<LibraryStatistics>>,
}

impl InMemoryLibraryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manga_count(&self) -> usize {
        self.manga.len()
    }
}

#[async_trait]
impl LibraryRepository for InMemoryLibraryRepository {
    async fn save_manga(&self, manga: &UnifiedManga) -> AppResult<()> {
        self.manga.insert(manga.id, manga.clone());
        Ok(())
    }

    async fn get_manga(&self, id: Uuid) -> AppResult<Option<UnifiedManga>> {
        Ok(self.manga.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_manga(&self) -> AppResult<Vec<UnifiedManga>> {
        let mut manga: Vec<UnifiedManga> = self.manga.iter().map(|e| e.value().clone()).collect();
        manga.sort_by_key(|m| m.created_at);
        Ok(manga)
    }

    async fn find_by_external_id(&self, agent_id: &str, id: &str) -> AppResult<Option<UnifiedManga>> {
        Ok(self
            .manga
            .iter()
            .find(|entry| entry.external_ids.get(agent_id).is_some_and(|known| known == id))
            .map(|entry| entry.value().clone()))
    }

    async fn delete_manga(&self, id: Uuid) -> AppResult<bool> {
        let removed = self.manga.remove(&id).is_some();
        self.chapters.remove(&id);
        self.progress.remove(&id);
        Ok(removed)
    }

    async fn save_chapters(&self, manga_id: Uuid, chapters: &[UnifiedChapter]) -> AppResult<()> {
        if !self.manga.contains_key(&manga_id) {
            return Err(AppError::NotFound(format!("Manga {}", manga_id)));
        }
        self.chapters.insert(manga_id, chapters.to_vec());
        Ok(())
    }

    async fn chapters_for(&self, manga_id: Uuid) -> AppResult<Vec<UnifiedChapter>> {
        Ok(self
            .chapters
            .get(&manga_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn save_progress(&self, progress: &ReadingProgress) -> AppResult<()> {
        if !self.manga.contains_key(&progress.manga_id) {
            return Err(AppError::NotFound(format!("Manga {}", progress.manga_id)));
        }
        self.progress.insert(progress.manga_id, progress.clone());
        Ok(())
    }

    async fn get_progress(&self, manga_id: Uuid) -> AppResult<Option<ReadingProgress>> {
        Ok(self.progress.get(&manga_id).map(|e| e.value().clone()))
    }

    async fn pending_scrobbles(&self) -> AppResult<Vec<ReadingProgress>> {
        let mut pending: Vec<ReadingProgress> = self
            .progress
            .iter()
            .filter(|entry| entry.needs_scrobble())
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|p| p.updated_at);
        Ok(pending)
    }

    async fn mark_scrobbled(&self, manga_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut entry = self
            .progress
            .get_mut(&manga_id)
            .ok_or_else(|| AppError::NotFound(format!("Progress for manga {}", manga_id)))?;
        entry.scrobbled_at = Some(at);
        Ok(())
    }

    async fn get_statistics(&self) -> AppResult<LibraryStatistics> {
        let manga: Vec<UnifiedManga> = self.manga.iter().map(|e| e.value().clone()).collect();
        let mut stats = LibraryStatistics::from_manga(&manga);
        stats.chapter_count = self.chapters.iter().map(|e| e.value().len()).sum();
        stats.pending_scrobbles = self.progress.iter().filter(|e| e.needs_scrobble()).count();
        stats.computed_at = Some(Utc::now());
        Ok(stats)
    }

    async fn save_statistics_snapshot(&self, snapshot: &LibraryStatistics) -> AppResult<()> {
        self.snapshots
            .write()
            .map_err(|e| AppError::InternalError(format!("Snapshot table poisoned: {}", e)))?
            .push(snapshot.clone());
        Ok(())
    }

    async fn latest_statistics_snapshot(&self) -> AppResult<Option<LibraryStatistics>> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|e| AppError::InternalError(format!("Snapshot table poisoned: {}", e)))?;
        Ok(snapshots.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::agents::domain::{MangaRecord, SourceRecord};
    use crate::modules::library::domain::services::MangaMerger;

    fn manga(title: &str, agent: &str, id: &str) -> UnifiedManga {
        MangaMerger::default()
            .merge(
                None,
                vec![SourceRecord::new(
                    agent,
                    MangaRecord {
                        source_id: id.into(),
                        title: Some(title.into()),
                        status: Some("ongoing".into()),
                        score: Some(80.0),
                        ..MangaRecord::default()
                    },
                )],
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_find_by_external_id() {
        let repo = InMemoryLibraryRepository::new();
        let entry = manga("Berserk", "mangadex", "md-1");
        repo.save_manga(&entry).await.unwrap();

        let found = repo.find_by_external_id("mangadex", "md-1").await.unwrap();
        assert_eq!(found.map(|m| m.id), Some(entry.id));
        assert!(repo.find_by_external_id("anilist", "md-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let repo = InMemoryLibraryRepository::new();
        let entry = manga("Berserk", "mangadex", "md-1");
        repo.save_manga(&entry).await.unwrap();
        repo.save_chapters(entry.id, &[]).await.unwrap();
        repo.save_progress(&ReadingProgress::new(entry.id, 3.0)).await.unwrap();

        assert!(repo.delete_manga(entry.id).await.unwrap());
        assert!(repo.get_progress(entry.id).await.unwrap().is_none());
        assert!(repo.chapters_for(entry.id).await.unwrap().is_empty());
        assert!(!repo.delete_manga(entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_scrobble_bookkeeping() {
        let repo = InMemoryLibraryRepository::new();
        let entry = manga("Berserk", "mangadex", "md-1");
        repo.save_manga(&entry).await.unwrap();
        repo.save_progress(&ReadingProgress::new(entry.id, 3.0)).await.unwrap();

        assert_eq!(repo.pending_scrobbles().await.unwrap().len(), 1);
        repo.mark_scrobbled(entry.id, Utc::now()).await.unwrap();
        assert!(repo.pending_scrobbles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_statistics() {
        let repo = InMemoryLibraryRepository::new();
        repo.save_manga(&manga("Berserk", "mangadex", "md-1")).await.unwrap();
        repo.save_manga(&manga("Vagabond", "anilist", "1")).await.unwrap();

        let stats = repo.get_statistics().await.unwrap();
        assert_eq!(stats.manga_count, 2);
        assert_eq!(stats.manga_per_agent["mangadex"], 1);
        assert_eq!(stats.manga_per_status["ongoing"], 2);
        assert_eq!(stats.average_score, Some(80.0));

        repo.save_statistics_snapshot(&stats).await.unwrap();
        assert_eq!(repo.latest_statistics_snapshot().await.unwrap(), Some(stats));
    }
}
