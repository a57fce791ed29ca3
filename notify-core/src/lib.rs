pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod memory;
pub mod pg_store;
pub mod schema;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::NotifyContext;
pub use db::DbPool;
pub use error::{DispatchError, DispatchResult};
pub use memory::MemoryStore;
pub use pg_store::PgStore;
pub use store::Repositories;
pub use types::*;
