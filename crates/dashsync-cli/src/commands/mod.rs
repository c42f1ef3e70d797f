pub mod config;
pub mod snapshot;
pub mod validate;
pub mod watch;
