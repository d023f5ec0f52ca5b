//! Orchestrator: builds the dispatch chain once and runs logical operations through it.
//!
//! Keep the public surface small: a builder, the dispatcher, and the stats
//! and signals it reports. Implementation details live under `src/client/`.

pub mod builder;
pub mod core;
pub(crate) mod error_classification;
pub mod signals;
pub mod types;

pub use builder::DispatcherBuilder;
pub use core::Dispatcher;
pub use signals::SignalsSnapshot;
pub use types::CallStats;
