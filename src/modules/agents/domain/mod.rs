pub mod capability;
pub mod entities;
pub mod schema;
pub mod services;

pub use capability::{Capabilities, Capability};
pub use entities::{
    ChapterRecord, CharacterRecord, EntityKind, ImageKind, MangaRecord, PageRecord,
    RecommendationRecord, ScrobbleUpdate, SearchQuery, SourceRecord,
};
pub use schema::{EntitySchema, FieldSource, Transform};
