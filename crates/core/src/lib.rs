pub mod clock;
pub mod error;
pub mod ids;
pub mod merge;
pub mod mutation;
pub mod record;

pub use error::CoreError;
pub use ids::*;
pub use merge::merge_records;
pub use mutation::{MutationOp, PendingMutation};
pub use record::{Collection, EntityKind, EntityRecord, SyncStatus};
