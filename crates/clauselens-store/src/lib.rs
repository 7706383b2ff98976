//! ClauseLens Store — SQLite FTS5 lexical index + int8 vector search,
//! plus clause and entity persistence.

pub mod embedding;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::SqliteStore;
pub use types::*;
