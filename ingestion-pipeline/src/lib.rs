#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod extract;
pub mod pipeline;

pub use pipeline::{DefaultIngestionServices, IngestReport, IngestionPipeline, IngestionServices};
