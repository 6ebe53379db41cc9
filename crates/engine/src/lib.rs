pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod http;
pub mod queue;
pub mod reactive;
pub mod remote;
pub mod service;
pub mod writer;

pub use config::SyncConfig;
pub use connectivity::{ConnectivityDetector, ConnectivitySource, ConnectivityStatus, PlatformEvent};
pub use coordinator::{SyncCoordinator, SyncReport};
pub use error::EngineError;
pub use events::{ChangeEvent, ChangeFeed, SubscriptionId};
pub use http::HttpRemote;
pub use queue::MutationQueue;
pub use reactive::{CollectionQuery, CollectionState, SyncBadge};
pub use remote::{RemoteApi, RemoteError};
pub use service::SyncService;
pub use writer::{OfflineWriter, WriteOutcome};
