pub mod autodownload;
pub mod config;
pub mod error;
pub mod extract;
pub mod notify;
pub mod routes;
pub mod state;
