pub mod builder;
pub mod composer;
pub mod config;
pub mod constants;
pub mod error;
pub mod job;
pub mod logging;
pub mod media;
pub mod notify;
pub mod platform;
pub mod request;
pub mod scheduler;
pub mod server;
pub mod stage;
pub mod tracker;
pub mod tree;

pub use error::VaubanError;
