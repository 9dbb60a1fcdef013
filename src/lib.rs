pub mod auth;
pub mod config;
pub mod discord;
pub mod gateway;
pub mod lifecycle;
pub mod notify;
pub mod router;
pub mod service;
pub mod worker;

pub use archivist_app::logging;
pub use archivist_core::error;
pub use archivist_core::record;
pub use archivist_storage::db;
