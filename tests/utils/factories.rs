/// Test data factories using builder pattern
///
/// `MangaFactory` produces the same manga either as a typed per-source record
/// (for reconciliation tests) or as the raw payload a `FakeAgent` serves.
use kumo_lib::modules::agents::domain::{MangaRecord, SourceRecord};
use kumo_lib::modules::jobs::domain::{JobDescriptor, JobOptions};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone)]
pub struct MangaFactory {
    id: String,
    title: String,
    aliases: Vec<String>,
    status: Option<String>,
    year: Option<i32>,
    score: Option<f64>,
    genres: Vec<String>,
    authors: Vec<String>,
    cover: Option<String>,
    links: BTreeMap<String, String>,
}

impl MangaFactory {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            aliases: Vec::new(),
            status: None,
            year: None,
            score: None,
            genres: Vec::new(),
            authors: Vec::new(),
            cover: None,
            links: BTreeMap::new(),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn genres(mut self, genres: &[&str]) -> Self {
        self.genres = genres.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn authors(mut self, authors: &[&str]) -> Self {
        self.authors = authors.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn cover(mut self, url: &str) -> Self {
        self.cover = Some(url.to_string());
        self
    }

    /// Cross reference to the same manga on another agent
    pub fn link(mut self, agent: &str, id: &str) -> Self {
        self.links.insert(agent.to_string(), id.to_string());
        self
    }

    pub fn record(&self) -> MangaRecord {
        MangaRecord {
            source_id: self.id.clone(),
            title: Some(self.title.clone()),
            alt_titles: self.aliases.clone(),
            status: self.status.clone(),
            year: self.year,
            score: self.score,
            genres: self.genres.clone(),
            authors: self.authors.clone(),
            cover: self.cover.clone(),
            external_ids: self.links.clone(),
            ..MangaRecord::default()
        }
    }

    /// Typed record as fetched from `agent`
    pub fn from_agent(&self, agent: &str) -> SourceRecord<MangaRecord> {
        let mut record = self.record();
        record.external_ids.insert(agent.to_string(), self.id.clone());
        SourceRecord::new(agent, record)
    }

    /// Payload a `FakeAgent` serves for this manga
    pub fn raw(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "aliases": self.aliases,
            "status": self.status,
            "year": self.year,
            "score": self.score,
            "genres": self.genres,
            "authors": self.authors,
            "cover": self.cover,
            "links": self.links,
        })
    }
}

/// Raw chapter payload for a `FakeAgent`
pub fn raw_chapter(id: &str, number: f64, lang: &str) -> Value {
    json!({
        "id": id,
        "chapter": number,
        "name": format!("Chapter {}", number),
        "lang": lang,
        "pages": 20,
    })
}

pub fn options(max_retries: u32, retry_interval_ms: u64, timeout_ms: u64) -> JobOptions {
    JobOptions {
        max_retries,
        retry_interval: Duration::from_millis(retry_interval_ms),
        timeout: Duration::from_millis(timeout_ms),
    }
}

pub fn descriptor(queue: &str) -> JobDescriptor {
    JobDescriptor::new(queue, json!({"task": "test"}))
}
