pub mod api;
pub mod cli;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod ingest;
pub mod retrieval;
pub mod storage;
