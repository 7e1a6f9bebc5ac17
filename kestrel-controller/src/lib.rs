//! Kestrel application controller
//!
//! Bootstraps a controller replica: resolves client configuration, prepares
//! repo server TLS, layers the application state cache, works out which
//! clusters this replica owns and hands everything to the reconciliation
//! engine.

pub mod args;
pub mod bootstrap;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod logging;

pub use bootstrap::{Bootstrap, Collaborators};
pub use config::ControllerSettings;
pub use engine::{EngineContext, EngineFactory, ReconciliationEngine};
