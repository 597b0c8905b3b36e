//! Command-line arguments and settings resolution.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use clusternet_reconcile::{ReconcilerConfig, DEFAULT_VRF};

use crate::client::ClientSettings;
use crate::config::Config;
use crate::output::OutputFormat;

pub const DEFAULT_API_URL: &str = "http://0.0.0.0:8000/api";
pub const DEFAULT_SITES_DIR: &str = "sites";
pub const DEFAULT_API_USERNAME: &str = "admin";
pub const DEFAULT_API_PASSWORD: &str = "admin";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Allocate VLANs for OpenShift clusters and inject MCE network rules
/// into their descriptors.
#[derive(Debug, Clone, Parser)]
#[command(name = "clusternet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Show what would change without writing any file.
    #[arg(long)]
    pub dry_run: bool,

    /// Log level (RUST_LOG overrides when set).
    #[arg(long, value_enum, ignore_case = true, default_value = "INFO")]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Allocator API base URL [default: http://0.0.0.0:8000/api].
    #[arg(long, env = "CLUSTERNET_API_URL")]
    pub api_url: Option<String>,

    /// Root of the descriptor tree [default: sites].
    #[arg(long, env = "CLUSTERNET_SITES_DIR")]
    pub sites_dir: Option<PathBuf>,

    /// VRF to allocate in [default: Network1].
    #[arg(long, env = "CLUSTERNET_VRF")]
    pub vrf: Option<String>,

    /// Allocator API user [default: admin].
    #[arg(long, env = "CLUSTERNET_API_USERNAME")]
    pub api_username: Option<String>,

    /// Allocator API password [default: admin].
    #[arg(long, env = "CLUSTERNET_API_PASSWORD", hide_env_values = true)]
    pub api_password: Option<String>,

    /// Leave clusters under this MCE alone (repeatable).
    #[arg(long = "skip-mce", value_name = "MCE")]
    pub skip_mces: Vec<String>,

    /// Re-check descriptors that already carry vlanId or Networks.
    #[arg(long)]
    pub update_existing: bool,

    /// Summary output format.
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Allocator request timeout in seconds [default: 10].
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Config file (defaults to config.json in the platform config dir).
    #[arg(long, env = "CLUSTERNET_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING", alias = "WARN")]
    Warning,
    #[value(name = "ERROR")]
    Error,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// Fully resolved run settings: flags and env, then config file, then defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub client: ClientSettings,
    pub reconciler: ReconcilerConfig,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: Config) -> Self {
        let timeout_secs = cli
            .timeout_secs
            .or(config.timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let client = ClientSettings {
            api_url: cli
                .api_url
                .clone()
                .or(config.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            username: cli
                .api_username
                .clone()
                .or(config.api_username)
                .unwrap_or_else(|| DEFAULT_API_USERNAME.to_string()),
            password: cli
                .api_password
                .clone()
                .or(config.api_password)
                .unwrap_or_else(|| DEFAULT_API_PASSWORD.to_string()),
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: Duration::from_secs(timeout_secs),
        };

        let mut skip_mces: BTreeSet<String> = config.skip_mces.into_iter().collect();
        skip_mces.extend(cli.skip_mces.iter().cloned());

        let reconciler = ReconcilerConfig {
            sites_dir: cli
                .sites_dir
                .clone()
                .or(config.sites_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SITES_DIR)),
            vrf: cli
                .vrf
                .clone()
                .or(config.vrf)
                .unwrap_or_else(|| DEFAULT_VRF.to_string()),
            dry_run: cli.dry_run,
            update_existing: cli.update_existing,
            skip_mces,
        };

        Self { client, reconciler }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["clusternet"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case("DEBUG", LogLevel::Debug)]
    #[case("info", LogLevel::Info)]
    #[case("WARNING", LogLevel::Warning)]
    #[case("warn", LogLevel::Warning)]
    #[case("ERROR", LogLevel::Error)]
    fn test_log_level_parsing(#[case] raw: &str, #[case] expected: LogLevel) {
        assert_eq!(parse(&["--log-level", raw]).log_level, expected);
    }

    #[test]
    fn test_flags_override_config_file() {
        let cli = parse(&[
            "--dry-run",
            "--vrf",
            "Network9",
            "--skip-mce",
            "mce-a",
            "--skip-mce",
            "mce-b",
            "--timeout-secs",
            "3",
        ]);
        let config = Config {
            api_url: Some("http://ipam.local/api".to_string()),
            vrf: Some("Network2".to_string()),
            skip_mces: vec!["mce-c".to_string()],
            ..Config::default()
        };

        let settings = Settings::resolve(&cli, config);

        assert_eq!(settings.client.api_url, "http://ipam.local/api");
        assert_eq!(settings.client.request_timeout, Duration::from_secs(3));
        assert_eq!(settings.client.connect_timeout, CONNECT_TIMEOUT);
        assert_eq!(settings.reconciler.vrf, "Network9");
        assert!(settings.reconciler.dry_run);
        assert!(!settings.reconciler.update_existing);
        assert_eq!(
            settings.reconciler.skip_mces.iter().collect::<Vec<_>>(),
            ["mce-a", "mce-b", "mce-c"]
        );
    }

    #[test]
    fn test_defaults() {
        let cli = Cli {
            api_url: None,
            sites_dir: None,
            vrf: None,
            api_username: None,
            api_password: None,
            ..parse(&[])
        };
        let settings = Settings::resolve(&cli, Config::default());

        assert_eq!(cli.log_level, LogLevel::Info);
        assert_eq!(cli.format, OutputFormat::Table);
        assert_eq!(settings.client.api_url, DEFAULT_API_URL);
        assert_eq!(settings.client.username, "admin");
        assert_eq!(settings.client.password, "admin");
        assert_eq!(
            settings.client.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(settings.reconciler.sites_dir, PathBuf::from("sites"));
        assert_eq!(settings.reconciler.vrf, "Network1");
    }
}
