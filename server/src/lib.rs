//! HTTP and websocket server for parley, backed by SQLite.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod directory;
pub mod manage;
pub mod store;
pub mod ws;
