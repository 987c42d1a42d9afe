//! Search backends
//!
//! Collaborator traits plus two reference implementations: a SQLite FTS5
//! mail index and an in-memory vector store.

mod memory;
mod sqlite;
mod traits;

pub use memory::{cosine_similarity, MemoryVectorStore, StoredVector};
pub use sqlite::{NewMessage, SqliteMailIndex};
pub use traits::{
    Credential, Embedder, RemoteSearch, TextRow, TextSearchBackend, TextSearchPage, VectorHit,
    VectorSearchOptions, VectorStore,
};
