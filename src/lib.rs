pub mod api;
pub mod app;
pub mod catalog;
pub mod config;
pub mod debounce;
pub mod detail;
pub mod dispatch;
pub mod download;
pub mod env_flags;
pub mod filter_store;
pub mod model;
pub mod notice;
pub mod status;
