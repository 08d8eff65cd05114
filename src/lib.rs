pub mod absences;
pub mod app;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod manager;
pub mod models;
pub mod periods;
pub mod residents;
pub mod state;
pub mod stats;
pub mod storage;
pub mod store;
pub mod sync;

pub use app::router;
pub use config::Config;
pub use errors::{Error, ErrorKind, Result};
pub use manager::{DataManager, ExecuteOptions};
pub use state::AppState;
pub use storage::{FileStore, KeyValueStore, MemoryStore, PersistenceChannel};
pub use sync::CrossSyncChannel;
