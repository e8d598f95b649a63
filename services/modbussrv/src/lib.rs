//! Modbus gateway service
//!
//! Loads a module configuration, polls every configured slave through
//! `modbus-master` and publishes the collected values at a fixed interval.

pub mod bootstrap;
pub mod publisher;
pub mod runtime;

pub use bootstrap::{load_configuration, Args};
pub use publisher::{publish_content, stdout_publisher, JsonLinePublisher, Publisher};
pub use runtime::{read_write_commands, Gateway};
