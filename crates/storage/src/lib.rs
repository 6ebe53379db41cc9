pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod unavailable;

pub use error::StorageError;
pub use sqlite::SqliteStore;
pub use traits::*;
pub use unavailable::{StoreHandle, UnavailableStore, open_store};
