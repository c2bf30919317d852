/// Search-result identity across agents
///
/// Two hits are the same manga when their weighted match score exceeds half
/// of the total weight, or when they share a trusted external id.
use crate::modules::agents::domain::services::normalized_key;
use crate::modules::agents::domain::{MangaRecord, SourceRecord};
use std::collections::HashSet;

pub const TITLE_WEIGHT: u32 = 4;
pub const AUTHOR_WEIGHT: u32 = 2;
pub const YEAR_WEIGHT: u32 = 1;
pub const GENRE_WEIGHT: u32 = 1;
pub const TOTAL_WEIGHT: u32 = TITLE_WEIGHT + AUTHOR_WEIGHT + YEAR_WEIGHT + GENRE_WEIGHT;
pub const YEAR_TOLERANCE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub score: u32,
    /// Both records point at the same id in some agent
    pub trusted: bool,
}

impl MatchScore {
    pub fn confidence(&self) -> f64 {
        if self.trusted {
            1.0
        } else {
            self.score as f64 / TOTAL_WEIGHT as f64
        }
    }

    pub fn is_same(&self) -> bool {
        self.confidence() > 0.5
    }
}

fn keys<'a>(values: impl Iterator<Item = &'a str>) -> HashSet<String> {
    values
        .map(normalized_key)
        .filter(|k| !k.is_empty())
        .collect()
}

fn shares_trusted_id(a: &SourceRecord<MangaRecord>, b: &SourceRecord<MangaRecord>) -> bool {
    let ids = |s: &SourceRecord<MangaRecord>| {
        let mut ids = s.record.external_ids.clone();
        if !s.record.source_id.is_empty() {
            ids.entry(s.agent_id.clone())
                .or_insert_with(|| s.record.source_id.clone());
        }
        ids
    };
    let (left, right) = (ids(a), ids(b));
    left.iter()
        .any(|(agent, id)| right.get(agent).is_some_and(|other| other == id))
}

/// Weighted identity score of two search hits
pub fn match_score(a: &SourceRecord<MangaRecord>, b: &SourceRecord<MangaRecord>) -> MatchScore {
    if shares_trusted_id(a, b) {
        return MatchScore {
            score: TOTAL_WEIGHT,
            trusted: true,
        };
    }

    let (ra, rb) = (&a.record, &b.record);
    let mut score = 0;

    let titles_a = keys(ra.all_titles().into_iter());
    let titles_b = keys(rb.all_titles().into_iter());
    if !titles_a.is_disjoint(&titles_b) {
        score += TITLE_WEIGHT;
    }

    let credits = |r: &MangaRecord| keys(r.authors.iter().chain(r.artists.iter()).map(String::as_str));
    if !credits(ra).is_disjoint(&credits(rb)) {
        score += AUTHOR_WEIGHT;
    }

    if let (Some(ya), Some(yb)) = (ra.year, rb.year) {
        if (ya - yb).abs() <= YEAR_TOLERANCE {
            score += YEAR_WEIGHT;
        }
    }

    let genres = |r: &MangaRecord| -> HashSet<String> {
        r.genres.iter().map(|g| g.trim().to_lowercase()).collect()
    };
    if !genres(ra).is_disjoint(&genres(rb)) {
        score += GENRE_WEIGHT;
    }

    MatchScore {
        score,
        trusted: false,
    }
}

/// Cluster search hits from many agents into groups describing one manga.
///
/// Hits are visited in input order and join the first group holding a match.
/// A group never takes two hits from the same agent: one agent's results are
/// distinct entries by definition.
pub fn cluster_search_results(
    results: Vec<SourceRecord<MangaRecord>>,
) -> Vec<Vec<SourceRecord<MangaRecord>>> {
    let mut clusters: Vec<Vec<SourceRecord<MangaRecord>>> = Vec::new();

    for hit in results {
        let target = clusters.iter().position(|cluster| {
            cluster.iter().all(|member| member.agent_id != hit.agent_id)
                && cluster.iter().any(|member| match_score(member, &hit).is_same())
        });
        match target {
            Some(index) => clusters[index].push(hit),
            None => clusters.push(vec![hit]),
        }
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(agent: &str, title: &str, year: Option<i32>, authors: &[&str]) -> SourceRecord<MangaRecord> {
        SourceRecord::new(
            agent,
            MangaRecord {
                source_id: format!("{}-{}", agent, title),
                title: Some(title.into()),
                year,
                authors: authors.iter().map(|a| a.to_string()).collect(),
                ..MangaRecord::default()
            },
        )
    }

    #[test]
    fn test_title_alone_is_not_enough() {
        let score = match_score(&hit("a", "Monster", Some(1994), &[]), &hit("b", "Monster", Some(2010), &[]));
        assert_eq!(score.score, TITLE_WEIGHT);
        assert!(!score.is_same());
    }

    #[test]
    fn test_title_and_year_merge() {
        let score = match_score(&hit("a", "Monster", Some(1994), &[]), &hit("b", "MONSTER", Some(1995), &[]));
        assert_eq!(score.score, TITLE_WEIGHT + YEAR_WEIGHT);
        assert!(score.is_same());
    }

    #[test]
    fn test_trusted_id_short_circuits() {
        let mut a = hit("a", "Monster", None, &[]);
        let mut b = hit("b", "Something else", None, &[]);
        a.record.external_ids.insert("mal".into(), "1".into());
        b.record.external_ids.insert("mal".into(), "1".into());

        let score = match_score(&a, &b);
        assert!(score.trusted);
        assert_eq!(score.confidence(), 1.0);
    }

    #[test]
    fn test_clusters_across_agents_only() {
        let clusters = cluster_search_results(vec![
            hit("mangadex", "Monster", Some(1994), &["Urasawa Naoki"]),
            hit("mangadex", "Monster Musume", Some(2012), &[]),
            hit("anilist", "Monster", Some(1994), &["urasawa naoki"]),
            hit("kitsu", "Monster", Some(1994), &[]),
            hit("anilist", "Monster", Some(1994), &["Urasawa Naoki"]),
        ]);

        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters[0].len(), 3);
        assert_eq!(clusters[1].len(), 1);
        assert_eq!(clusters[2][0].agent_id, "anilist");
    }
}
