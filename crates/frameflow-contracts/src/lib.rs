pub mod api;
pub mod chain;
pub mod chat;
pub mod error;
pub mod events;
pub mod models;
pub mod session;
pub mod status;
