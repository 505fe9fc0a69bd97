//! Index Accessor: corpus loading, chunking, the persisted vector store,
//! and the memoized build-or-load query engine.

pub mod chunk;
pub mod engine;
pub mod reader;
pub mod sqlite;
pub mod store;

pub use engine::{IndexAccessor, QueryEngine, QueryResult, ResponseMode, RetrievedPassage, Retriever};
