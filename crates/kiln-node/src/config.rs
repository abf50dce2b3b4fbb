//! Node configuration.
//!
//! Settings are layered, later sources winning:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. an optional YAML file (`--config`)
//! 3. `KILN_*` environment variables, `__` separating nested keys
//!    (`KILN_GIT__DECODE_MODE=fail_fast`)
//! 4. command line flags

use crate::auth::{CollaboratorRecord, TokenRecord};
use clap::Parser;
use kiln_diff::DEFAULT_MAX_CELLS;
use kiln_git::DecodeMode;
use kiln_merge::DEFAULT_MAX_VISITED;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "KILN";

/// Kiln Node - self-hosted git server
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "kiln-node")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    pub listen_addr: Option<SocketAddr>,

    /// Data directory for filesystem storage
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Storage backend (memory, filesystem)
    #[arg(long)]
    pub storage: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    pub log_format: Option<String>,
}

/// Where repositories are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; lost on restart.
    #[default]
    Memory,
    /// `<data_dir>/<owner>/<name>/.git`.
    Filesystem,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format (for development).
    #[default]
    Pretty,
    /// JSON format (for log aggregation).
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level applied to the `kiln` crates.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Smart HTTP settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// How pushed packs with bad entries are handled.
    pub decode_mode: DecodeMode,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            decode_mode: DecodeMode::BestEffort,
            max_body_bytes: 256 * 1024 * 1024,
            request_timeout_secs: 300,
        }
    }
}

/// Merge engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Commit budget for the merge-base search.
    pub max_visited: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_visited: DEFAULT_MAX_VISITED,
        }
    }
}

/// Diff engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Largest LCS table before a file falls back to a full replacement.
    pub max_cells: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

/// Access control settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Allow unauthenticated reads of public repositories.
    pub anonymous_read: bool,
    /// Access tokens, stored by digest.
    pub tokens: Vec<TokenRecord>,
    /// Collaborator grants.
    pub collaborators: Vec<CollaboratorRecord>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous_read: true,
            tokens: Vec::new(),
            collaborators: Vec::new(),
        }
    }
}

/// Configuration for the Kiln node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Storage backend.
    pub storage: StorageBackend,
    /// Branch `HEAD` points at in new repositories.
    pub default_branch: String,
    /// Logging.
    pub log: LogConfig,
    /// Smart HTTP.
    pub git: GitConfig,
    /// Merge engine.
    pub merge: MergeConfig,
    /// Diff engine.
    pub diff: DiffConfig,
    /// Access control.
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("./data"),
            storage: StorageBackend::Memory,
            default_branch: "main".to_string(),
            log: LogConfig::default(),
            git: GitConfig::default(),
            merge: MergeConfig::default(),
            diff: DiffConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from every layer, reading the process environment.
    pub fn load(cli: &Cli) -> Result<Self, config::ConfigError> {
        Self::load_with_env(cli, config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads configuration using `env` as the environment layer.
    pub fn load_with_env(
        cli: &Cli,
        env: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = &cli.config {
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder
            .add_source(
                env.prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("listen_addr", cli.listen_addr.map(|a| a.to_string()))?
            .set_override_option(
                "data_dir",
                cli.data_dir.as_ref().map(|d| d.display().to_string()),
            )?
            .set_override_option("storage", cli.storage.clone())?
            .set_override_option("log.level", cli.log_level.clone())?
            .set_override_option("log.format", cli.log_format.clone())?;

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX).source(Some(HashMap::new()))
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = Config::load_with_env(&Cli::default(), no_env()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.git.decode_mode, DecodeMode::BestEffort);
        assert!(config.auth.anonymous_read);
    }

    #[test]
    fn test_yaml_file_layer() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "storage: filesystem\ndata_dir: /srv/kiln\ngit:\n  decode_mode: fail_fast\nlog:\n  format: json"
        )
        .unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Cli::default()
        };
        let config = Config::load_with_env(&cli, no_env()).unwrap();
        assert_eq!(config.storage, StorageBackend::Filesystem);
        assert_eq!(config.data_dir, PathBuf::from("/srv/kiln"));
        assert_eq!(config.git.decode_mode, DecodeMode::FailFast);
        assert_eq!(config.log.format, LogFormat::Json);
        // untouched keys keep their defaults
        assert_eq!(config.default_branch, "main");
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        let vars = env(&[
            ("KILN_DEFAULT_BRANCH", "trunk"),
            ("KILN_MERGE__MAX_VISITED", "42"),
            ("KILN_AUTH__ANONYMOUS_READ", "false"),
        ]);
        let config = Config::load_with_env(&Cli::default(), vars).unwrap();
        assert_eq!(config.default_branch, "trunk");
        assert_eq!(config.merge.max_visited, 42);
        assert!(!config.auth.anonymous_read);
    }

    #[test]
    fn test_cli_beats_env() {
        let vars = env(&[("KILN_LOG__LEVEL", "warn")]);
        let cli = Cli {
            log_level: Some("debug".into()),
            listen_addr: Some("0.0.0.0:9999".parse().unwrap()),
            ..Cli::default()
        };
        let config = Config::load_with_env(&cli, vars).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.listen_addr.port(), 9999);
    }

    #[test]
    fn test_missing_config_file_fails() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/kiln.yaml")),
            ..Cli::default()
        };
        assert!(Config::load_with_env(&cli, no_env()).is_err());
    }

    #[test]
    fn test_bad_storage_value_fails() {
        let cli = Cli {
            storage: Some("tape".into()),
            ..Cli::default()
        };
        assert!(Config::load_with_env(&cli, no_env()).is_err());
    }
}
