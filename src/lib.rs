pub mod catalog;
pub mod config;
pub mod device;
/// Session orchestration shared by every transport.
pub mod engine;
pub mod error;
pub mod http;
pub mod metrics;
pub mod position;
pub mod registry;
/// Dependency-aware tree selection for one asset.
pub mod resolver;
pub mod results;
pub mod session;

pub use catalog::Catalog;
pub use engine::Engine;
pub use error::{CatalogError, EngineError};
pub use session::{Session, SessionDocument, Step};
