pub mod error;
pub mod memo;
pub mod memory;
pub mod reader;
pub mod sqlite;

pub use error::CacheError;
pub use memo::FetchMemo;
pub use reader::SnapshotCache;
pub use sqlite::SnapshotReader;
