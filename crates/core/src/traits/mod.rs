pub mod health;
pub mod server;

pub use health::*;
pub use server::*;
