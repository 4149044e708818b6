pub mod api;
pub mod app_config;
pub mod cache;
pub mod database;
pub mod logging;
pub mod message_queue;
pub mod scheduler;

pub use api::*;
pub use app_config::*;
pub use cache::*;
pub use database::*;
pub use logging::*;
pub use message_queue::*;
pub use scheduler::*;
