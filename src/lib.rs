#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod bundle;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod retrieval;
pub mod search;
pub mod storage;

pub use config::Config;
pub use error::{BundleError, MemoryError, Result};
pub use lifecycle::{CapsuleManager, CloseSignals};
pub use retrieval::{RetrievalOrchestrator, RetrievalRequest, RetrievalResult};
pub use search::{LocalSearchProvider, SearchProvider};
pub use storage::SqliteStore;
