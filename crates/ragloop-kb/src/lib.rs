pub mod ingest;
pub mod store;

pub use ingest::{load_folder, split_into_chunks, DocumentChunk};
pub use store::{IngestReport, SqliteKnowledgeBase};
