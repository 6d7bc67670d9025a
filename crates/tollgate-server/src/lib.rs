//! Tollgate server: the token authority endpoints and the gateway behind
//! one listener, plus configuration loading and background maintenance.

pub mod bootstrap;
pub mod config;
pub mod observability;
pub mod server;
pub mod tasks;

pub use config::{AppConfig, load_config};
pub use server::{Services, TollgateServer, build_app};
