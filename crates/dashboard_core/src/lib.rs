pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod durable_backend;
pub mod error;
pub mod handlers;
pub mod render;
pub mod selectors;
pub mod store;
pub mod validation;

pub use backend::{AnalyticalBackend, BackendCapabilities, BackendError, MissingBackend, RetryingBackend};
pub use config::{load_config, EngineConfig, RenderConfig, RetryPolicy};
pub use dispatcher::{DashboardEngine, DispatchOutcome};
pub use durable_backend::DurableBackend;
pub use error::{CommandError, DispatchError, StateError};
pub use store::DashboardState;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
