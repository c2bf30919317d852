use super::image_priority::{ImageCandidate, ImagePriorities, ImageSelector};
use super::strategies::{
    highest_numeric, key_value_union, localized_merge, most_frequent, most_frequent_text,
    union_distinct,
};
use crate::modules::agents::domain::services::normalized_key;
use crate::modules::agents::domain::{ImageKind, MangaRecord, SourceRecord};
use crate::modules::library::domain::unified::{preferred_text, UnifiedManga};
use crate::shared::errors::{AppError, AppResult};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Sources and previous state a merge works from
pub struct MergeContext<'a> {
    /// Provenance after folding, in contribution order
    pub sources: &'a [SourceRecord<MangaRecord>],
    pub previous: Option<&'a UnifiedManga>,
}

impl MergeContext<'_> {
    pub fn records(&self) -> impl Iterator<Item = &MangaRecord> {
        self.sources.iter().map(|s| &s.record)
    }
}

/// One category of fields, merged from every source
pub trait FieldMerger {
    fn merge_into(&self, target: &mut UnifiedManga, context: &MergeContext);
}

/// Canonical title, per-language titles and alternates
#[derive(Debug, Clone, Copy)]
pub struct TitleMerger;

impl FieldMerger for TitleMerger {
    fn merge_into(&self, target: &mut UnifiedManga, context: &MergeContext) {
        target.titles = localized_merge(context.records().map(|r| &r.titles));

        let canonical = most_frequent_text(context.records().map(|r| r.title.as_deref()))
            .or_else(|| preferred_text(&target.titles).map(str::to_string))
            .or_else(|| {
                context
                    .records()
                    .flat_map(|r| r.alt_titles.iter())
                    .find(|t| !t.trim().is_empty())
                    .cloned()
            });
        if let Some(title) = canonical {
            target.title = title;
        }

        let canonical_key = normalized_key(&target.title);
        let titles: Vec<String> = context
            .records()
            .flat_map(|r| r.title.iter().chain(r.alt_titles.iter()))
            .cloned()
            .collect();
        target.alt_titles = union_distinct([titles.as_slice()])
            .into_iter()
            .filter(|t| normalized_key(t) != canonical_key)
            .collect();
    }
}

/// Status, type, demographic, year and synopses
#[derive(Debug, Clone, Copy)]
pub struct MetadataMerger;

impl FieldMerger for MetadataMerger {
    fn merge_into(&self, target: &mut UnifiedManga, context: &MergeContext) {
        target.status = most_frequent_text(context.records().map(|r| r.status.as_deref()));
        target.kind = most_frequent_text(context.records().map(|r| r.kind.as_deref()));
        target.demographic = most_frequent_text(context.records().map(|r| r.demographic.as_deref()));
        target.year = most_frequent(context.records().map(|r| r.year));
        target.synopsis = localized_merge(context.records().map(|r| &r.synopsis));
    }
}

/// Genres, tags and credits
#[derive(Debug, Clone, Copy)]
pub struct CollectionMerger;

impl FieldMerger for CollectionMerger {
    fn merge_into(&self, target: &mut UnifiedManga, context: &MergeContext) {
        target.genres = union_distinct(context.records().map(|r| r.genres.as_slice()));
        target.tags = union_distinct(context.records().map(|r| r.tags.as_slice()));
        target.authors = union_distinct(context.records().map(|r| r.authors.as_slice()));
        target.artists = union_distinct(context.records().map(|r| r.artists.as_slice()));
    }
}

/// Score, rank, popularity and counts
#[derive(Debug, Clone, Copy)]
pub struct RatingMerger;

impl FieldMerger for RatingMerger {
    fn merge_into(&self, target: &mut UnifiedManga, context: &MergeContext) {
        target.score = highest_numeric(context.records().map(|r| r.score));
        target.rank = highest_numeric(context.records().map(|r| r.rank));
        target.popularity = highest_numeric(context.records().map(|r| r.popularity));
        target.chapter_count = highest_numeric(context.records().map(|r| r.chapter_count));
        target.volume_count = highest_numeric(context.records().map(|r| r.volume_count));
    }
}

/// External ids and per-source images; both extend the previous record.
/// Images an agent failed to serve stay excluded from the display pick.
pub struct ReferenceMerger<'a> {
    pub images: &'a ImageSelector,
}

impl FieldMerger for ReferenceMerger<'_> {
    fn merge_into(&self, target: &mut UnifiedManga, context: &MergeContext) {
        let (mut ids, mut images, unavailable) = match context.previous {
            Some(previous) => (
                previous.external_ids.clone(),
                previous.images.clone(),
                previous.unavailable_images.clone(),
            ),
            None => (BTreeMap::new(), BTreeMap::new(), BTreeMap::new()),
        };

        for source in context.sources {
            let record = &source.record;
            if !record.source_id.is_empty() {
                ids = key_value_union(&ids, [(&source.agent_id, &record.source_id)]);
            }
            ids = key_value_union(&ids, &record.external_ids);
            for kind in ImageKind::ALL {
                if let Some(url) = record.image(kind).map(str::to_string) {
                    let offered = images.entry(kind).or_default();
                    *offered = key_value_union(offered, [(&source.agent_id, &url)]);
                }
            }
        }

        target.external_ids = ids;
        target.images = images;
        target.unavailable_images = unavailable;
        self.images.apply(target);
    }
}

/// Fuses per-source manga records into one unified record
#[derive(Debug, Clone, Default)]
pub struct MangaMerger {
    images: ImageSelector,
}

impl MangaMerger {
    pub fn new(image_priorities: ImagePriorities) -> Self {
        Self {
            images: ImageSelector::new(image_priorities),
        }
    }

    /// Record that `agent_id` could not serve its `kind` image and re-pick
    /// the display image. Returns the new pick, if any agent is left.
    pub fn image_failed(
        &self,
        manga: &mut UnifiedManga,
        kind: ImageKind,
        agent_id: &str,
    ) -> Option<ImageCandidate> {
        self.images.fallback(manga, kind, agent_id)
    }

    /// Merge `records` into `previous` (if any).
    ///
    /// Records fold into the stored provenance: a newer record from the same
    /// agent replaces the older one in place, new agents are appended. All
    /// strategies then re-run over the whole provenance.
    pub fn merge(
        &self,
        previous: Option<&UnifiedManga>,
        records: Vec<SourceRecord<MangaRecord>>,
    ) -> AppResult<UnifiedManga> {
        let mut sources = previous.map(|p| p.metadata.clone()).unwrap_or_default();
        fold_provenance(&mut sources, records);

        if sources.is_empty() {
            return Err(AppError::ValidationError(
                "Cannot merge a manga without any source record".to_string(),
            ));
        }

        let now = Utc::now();
        let mut merged = UnifiedManga {
            id: previous.map(|p| p.id).unwrap_or_else(Uuid::new_v4),
            title: String::new(),
            alt_titles: Vec::new(),
            titles: BTreeMap::new(),
            synopsis: BTreeMap::new(),
            status: None,
            kind: None,
            demographic: None,
            year: None,
            score: None,
            rank: None,
            popularity: None,
            chapter_count: None,
            volume_count: None,
            genres: Vec::new(),
            tags: Vec::new(),
            authors: Vec::new(),
            artists: Vec::new(),
            external_ids: BTreeMap::new(),
            images: BTreeMap::new(),
            unavailable_images: BTreeMap::new(),
            cover: None,
            poster: None,
            banner: None,
            metadata: Vec::new(),
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };

        let context = MergeContext {
            sources: &sources,
            previous,
        };
        TitleMerger.merge_into(&mut merged, &context);
        MetadataMerger.merge_into(&mut merged, &context);
        CollectionMerger.merge_into(&mut merged, &context);
        RatingMerger.merge_into(&mut merged, &context);
        ReferenceMerger { images: &self.images }.merge_into(&mut merged, &context);

        if merged.title.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "No source of manga {} supplied a title",
                merged.id
            )));
        }

        merged.metadata = sources;
        Ok(merged)
    }
}

/// Fold new records into provenance; same agent: the newer fetch wins
pub(crate) fn fold_provenance<T>(sources: &mut Vec<SourceRecord<T>>, records: Vec<SourceRecord<T>>) {
    for record in records {
        match sources.iter_mut().find(|s| s.agent_id == record.agent_id) {
            Some(existing) if record.fetched_at >= existing.fetched_at => *existing = record,
            Some(_) => {}
            None => sources.push(record),
        }
    }
}
