pub mod archive;
pub mod error;
pub mod memory;
pub mod runs;
pub mod situation;

pub use archive::RunArchive;
pub use error::StoreError;
pub use runs::RunStore;
pub use situation::{SimilarSituation, SqliteMemory};
