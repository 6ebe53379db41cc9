mod client;
mod server;
mod store;

pub use client::{TestClient, wait_for};
pub use server::{Call, MockServer};
pub use store::FlakyStore;

/// Route engine logs to the test output. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
