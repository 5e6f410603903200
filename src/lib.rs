pub mod config;
pub mod logger;
pub mod models;
pub mod server;

pub use config::*;
pub use logger::*;
pub use models::*;
pub use server::EdgeApplicationServer;
pub use server::*;
