/// Chapter reconciliation
///
/// Per-source chapter listings are grouped by (chapter number, language).
/// Chapters without a number fall back to their normalized title, and
/// failing that to their source id, so they never collapse into one group.
use super::strategies::{
    highest_numeric, key_value_union, most_frequent_number, most_frequent_text, union_distinct,
};
use crate::modules::agents::domain::services::normalized_key;
use crate::modules::agents::domain::{ChapterRecord, SourceRecord};
use crate::modules::library::domain::locales::language_key;
use crate::modules::library::domain::unified::UnifiedChapter;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Grouping key for one per-source chapter
pub fn chapter_key(agent_id: &str, record: &ChapterRecord) -> String {
    let language = language_key(record.language.as_deref());
    let identity = match (record.number, record.title.as_deref()) {
        (Some(number), _) if number.is_finite() => format!("n:{}", number),
        (_, Some(title)) if !normalized_key(title).is_empty() => format!("t:{}", normalized_key(title)),
        _ => format!("s:{}:{}", agent_id, record.source_id),
    };
    format!("{}|{}", identity, language)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChapterMerger;

impl ChapterMerger {
    /// Merge fresh per-source chapters into the stored chapters of one manga.
    ///
    /// Existing groups keep their id; the result is ordered by number, then
    /// language, with unnumbered chapters last.
    pub fn merge(
        &self,
        manga_id: Uuid,
        existing: &[UnifiedChapter],
        records: Vec<SourceRecord<ChapterRecord>>,
    ) -> Vec<UnifiedChapter> {
        let mut groups: BTreeMap<String, Vec<SourceRecord<ChapterRecord>>> = BTreeMap::new();
        let mut previous: HashMap<&str, &UnifiedChapter> = HashMap::new();

        for chapter in existing {
            previous.insert(chapter.key.as_str(), chapter);
            groups
                .entry(chapter.key.clone())
                .or_default()
                .extend(chapter.metadata.iter().cloned());
        }

        for record in records {
            let key = chapter_key(&record.agent_id, &record.record);
            let group = groups.entry(key).or_default();
            // one entry per (agent, source id); a newer fetch replaces it
            match group.iter_mut().find(|s| {
                s.agent_id == record.agent_id && s.record.source_id == record.record.source_id
            }) {
                Some(slot) if record.fetched_at >= slot.fetched_at => *slot = record,
                Some(_) => {}
                None => group.push(record),
            }
        }

        let mut chapters: Vec<UnifiedChapter> = groups
            .into_iter()
            .map(|(key, sources)| {
                let prev = previous.get(key.as_str()).copied();
                Self::merge_group(manga_id, key, sources, prev)
            })
            .collect();

        chapters.sort_by(|a, b| match (a.number, b.number) {
            (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.language.cmp(&b.language)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.key.cmp(&b.key),
        });
        chapters
    }

    fn merge_group(
        manga_id: Uuid,
        key: String,
        sources: Vec<SourceRecord<ChapterRecord>>,
        previous: Option<&UnifiedChapter>,
    ) -> UnifiedChapter {
        let records = || sources.iter().map(|s| &s.record);
        let now = Utc::now();

        let mut external_ids = previous.map(|p| p.external_ids.clone()).unwrap_or_default();
        let mut urls = previous.map(|p| p.urls.clone()).unwrap_or_default();
        for source in &sources {
            if !source.record.source_id.is_empty() {
                external_ids = key_value_union(&external_ids, [(&source.agent_id, &source.record.source_id)]);
            }
            if let Some(url) = &source.record.url {
                urls = key_value_union(&urls, [(&source.agent_id, url)]);
            }
        }

        let scanlators: Vec<String> = records().filter_map(|r| r.scanlator.clone()).collect();

        UnifiedChapter {
            id: previous.map(|p| p.id).unwrap_or_else(Uuid::new_v4),
            manga_id,
            number: most_frequent_number(records().map(|r| r.number)),
            volume: most_frequent_number(records().map(|r| r.volume)),
            title: most_frequent_text(records().map(|r| r.title.as_deref())),
            language: key.rsplit('|').next().unwrap_or("und").to_string(),
            pages: highest_numeric(records().map(|r| r.pages)),
            published_at: most_frequent_text(records().map(|r| r.published_at.as_deref())),
            scanlators: union_distinct([scanlators.as_slice()]),
            external_ids,
            urls,
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
            key,
            metadata: sources,
        }
    }
}
