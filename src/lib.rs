//! Edge node coordination: liveness tracking, TTL viewer sessions and
//! reconciliation of node cameras into an external stream router.

pub mod application;
pub mod config;
pub mod database;
pub mod errors;
pub mod logging;
pub mod models;
pub mod realtime;
pub mod registry;
pub mod server;
pub mod stream_router;
pub mod sync;
pub mod viewer;

pub use application::Application;
pub use config::AppConfig;
pub use errors::{CoreError, CoreResult, ErrorKind};
pub use registry::NodeRegistry;
pub use sync::{SyncReport, TopologySynchronizer};
pub use viewer::ViewerService;
