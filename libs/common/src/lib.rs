//! Gateway basic library
//!
//! Provides functions shared by the gateway crates:
//! - logging initialization (console and rolling file)
//! - configuration file loading
//! - shutdown and reload signal handling

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use config_loader::{load_config_from_file, load_config_from_str, ConfigFormat};
pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use shutdown::{SignalEvent, SignalListener};
