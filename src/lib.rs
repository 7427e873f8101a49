pub mod executor;
pub mod index;
pub mod log_store;
pub mod logging;
pub mod model;
pub mod report;
pub mod settings;
pub mod stage;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use log_store::{JsonLinesStore, Level, LogRecord, LogStore, LogStoreError, MemoryStore};
pub use model::*;
pub use report::{StatusNarrative, StatusReporter};
pub use traits::*;
