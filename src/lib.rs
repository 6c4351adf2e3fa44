// Library exports for integration tests and the CLI binary

#[doc(hidden)]
pub mod config;

pub mod commit;
pub mod context;
pub mod db;
pub mod grouping;
pub mod hashing;
pub mod import;
pub mod lookup;
pub mod package;
pub mod storage;
pub mod systems;

pub use config::ImporterConfig;
pub use context::ImporterContext;
pub use import::{ImportService, ImporterHandle, ItemState};

// Test support (only available with test-utils feature)
#[cfg(feature = "test-utils")]
pub mod test_support;
