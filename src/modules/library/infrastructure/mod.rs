pub mod repository;

pub use repository::InMemoryLibraryRepository;
