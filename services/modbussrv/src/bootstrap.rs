//! Service bootstrap
//!
//! Command-line arguments, logging setup and configuration loading.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};

use common::logging::{LogConfig, LogFormat};
use modbus_master::ModuleConfig;

/// Command-line arguments for modbussrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "modbussrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus TCP/RTU gateway service",
    long_about = None
)]
pub struct Args {
    /// Module configuration file (JSON, YAML or TOML)
    #[arg(short = 'c', long, env = "MODBUS_CONFIG", default_value = "config/modbus.json")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Console log format (bracketed, compact, json)
    #[arg(long, default_value = "bracketed")]
    pub log_format: String,

    /// Also write logs to this file, rotated daily
    #[arg(long)]
    pub log_file: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,

    /// Read write commands as JSON lines from stdin
    #[arg(long)]
    pub accept_writes: bool,
}

impl Args {
    pub fn log_config(&self) -> Result<LogConfig> {
        let format: LogFormat = self
            .log_format
            .parse()
            .with_context(|| format!("Invalid --log-format '{}'", self.log_format))?;
        Ok(LogConfig {
            level: self.log_level.clone(),
            console: true,
            file: self.log_file.clone(),
            format,
            ansi: !self.no_color,
        })
    }
}

/// Load the module configuration and reject it when validation finds errors
pub fn load_configuration(path: &Path) -> Result<ModuleConfig> {
    debug!("Loading configuration from {}", path.display());
    let config: ModuleConfig = common::load_config_from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let report = config.validate();
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if !report.is_ok() {
        for e in &report.errors {
            error!("{}", e);
        }
        bail!(
            "Configuration {} rejected with {} error(s)",
            path.display(),
            report.errors.len()
        );
    }

    let operations: usize = config
        .slave_configs
        .values()
        .map(|slave| slave.operations.len())
        .sum();
    info!(
        "Configuration loaded: {} slave(s), {} operation(s), publish every {}ms",
        config.slave_configs.len(),
        operations,
        config.publish_interval
    );
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["modbussrv"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config/modbus.json"));
        assert!(!args.validate);
        assert!(!args.accept_writes);

        let log = args.log_config().unwrap();
        assert_eq!(log.level, "info");
        assert_eq!(log.format, LogFormat::Bracketed);
        assert!(log.ansi);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::try_parse_from([
            "modbussrv",
            "--config",
            "/etc/gw.yaml",
            "-l",
            "debug",
            "--log-format",
            "json",
            "--no-color",
            "--accept-writes",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/gw.yaml"));
        assert!(args.accept_writes);
        let log = args.log_config().unwrap();
        assert_eq!(log.format, LogFormat::Json);
        assert!(!log.ansi);

        let bad = Args::try_parse_from(["modbussrv", "--log-format", "xml"]).unwrap();
        assert!(bad.log_config().is_err());
    }

    #[test]
    fn test_load_configuration_rejects_errors() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "publishInterval": 0, "slaveConfigs": {{}} }}"#
        )
        .unwrap();
        let err = load_configuration(file.path()).unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }

    #[test]
    fn test_load_configuration_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "publishInterval: 2000\n\
             slaveConfigs:\n  \
               meter:\n    \
                 slaveConnection: 10.0.0.5\n    \
                 hwId: meter-5\n    \
                 operations:\n      \
                   power:\n        \
                     unitId: 1\n        \
                     startAddress: \"40001\"\n        \
                     count: 1\n        \
                     dataType: Int16\n"
        )
        .unwrap();
        let config = load_configuration(file.path()).unwrap();
        assert_eq!(config.publish_interval, 2000);
        assert_eq!(config.slave_configs["meter"].tcp_port, 502);
    }

    #[test]
    fn test_load_configuration_missing_file() {
        assert!(load_configuration(Path::new("/nonexistent/modbus.json")).is_err());
    }
}
