//! External services the pipeline talks to

pub mod query_engine;
pub mod storage;

pub use query_engine::{PrestoClient, QueryEngineClient, QueryRows, RecordingQueryEngine};
pub use storage::{InMemoryObjectStore, LocalObjectStore, StorageClient, StoragePaths};
