//! Configuration management for the roundmirror indexer.
//!
//! Configuration is a TOML file. Values may reference environment variables
//! as `${VAR_NAME}`; references inside comments are left alone. Missing
//! sections fall back to defaults and the result is validated on load.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Restrict every sub-indexer to this chain id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_network: Option<u64>,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Iteration snapshot indexer
    #[serde(default)]
    pub iterations: IterationsConfig,

    /// Certificate snapshot indexer
    #[serde(default)]
    pub certs: CertsConfig,

    /// Backoff for failing operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Content gateway
    #[serde(default)]
    pub content: ContentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Networks to index
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://roundmirror.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Iteration snapshot indexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationsConfig {
    /// Seconds between ticks. Must be > 0.
    #[serde(default = "default_iterations_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for IterationsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_iterations_poll_interval_secs(),
        }
    }
}

/// Certificate snapshot indexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertsConfig {
    /// Seconds between ticks. Must be > 0.
    #[serde(default = "default_certs_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Blocks per role event query.
    #[serde(default = "default_log_batch_size")]
    pub log_batch_size: u64,
}

impl Default for CertsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_certs_poll_interval_secs(),
            log_batch_size: default_log_batch_size(),
        }
    }
}

/// Backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay in seconds
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Delay cap in seconds
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetryConfig {
    /// Backoff policy for the retry tracker.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.base_delay_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

/// Content gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Gateway base URL; the content id is appended.
    #[serde(default = "default_gateway")]
    pub gateway: String,

    /// Request timeout in seconds
    #[serde(default = "default_content_timeout_secs")]
    pub timeout_secs: u64,

    /// Largest accepted body
    #[serde(default = "default_content_max_bytes")]
    pub max_bytes: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            gateway: default_gateway(),
            timeout_secs: default_content_timeout_secs(),
            max_bytes: default_content_max_bytes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One network to index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Chain id (e.g., 11155111 for Sepolia)
    pub chain_id: u64,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Iteration registry contract
    pub iteration_registry: Address,

    /// Cert registry contract (cert indexing is off without it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_registry: Option<Address>,

    /// Profile registry contract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_registry: Option<Address>,

    /// First block of the role event scan
    #[serde(default)]
    pub event_start_block: u64,
}

impl NetworkConfig {
    /// Name for logs: the configured name, or the chain id.
    pub fn label(&self) -> String {
        if self.name.trim().is_empty() {
            format!("chain {}", self.chain_id)
        } else {
            self.name.clone()
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_iterations_poll_interval_secs() -> u64 {
    60
}

fn default_certs_poll_interval_secs() -> u64 {
    120
}

fn default_log_batch_size() -> u64 {
    5000
}

fn default_base_delay_secs() -> u64 {
    30
}

fn default_max_delay_secs() -> u64 {
    3600
}

fn default_gateway() -> String {
    "https://ipfs.io/ipfs/".to_string()
}

fn default_content_timeout_secs() -> u64 {
    10
}

fn default_content_max_bytes() -> usize {
    1_000_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Example
    /// ```no_run
    /// # use roundmirror_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)?;

        Self::from_toml_str(&expanded)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load configuration from a TOML string (no env expansion).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.iterations.poll_interval_secs == 0 {
            anyhow::bail!("Iterations poll_interval_secs must be > 0");
        }
        if self.certs.poll_interval_secs == 0 {
            anyhow::bail!("Certs poll_interval_secs must be > 0");
        }
        if self.certs.log_batch_size == 0 {
            anyhow::bail!("Certs log_batch_size must be > 0");
        }

        if self.retry.base_delay_secs == 0 {
            anyhow::bail!("Retry base_delay_secs must be > 0");
        }
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            anyhow::bail!(
                "Retry max_delay_secs ({}) cannot be below base_delay_secs ({})",
                self.retry.max_delay_secs,
                self.retry.base_delay_secs
            );
        }

        let gateway = self.content.gateway.trim();
        if !(gateway.starts_with("https://") || gateway.starts_with("http://")) {
            anyhow::bail!("Content gateway must be an http(s) URL (got '{}')", gateway);
        }
        if self.content.timeout_secs == 0 {
            anyhow::bail!("Content timeout_secs must be > 0");
        }
        if self.content.max_bytes == 0 {
            anyhow::bail!("Content max_bytes must be > 0");
        }

        if self.networks.is_empty() {
            anyhow::bail!("At least one [[networks]] entry is required");
        }

        let mut seen = HashSet::new();
        for network in &self.networks {
            if network.chain_id == 0 {
                anyhow::bail!("Network chain_id must be non-zero");
            }
            if !seen.insert(network.chain_id) {
                anyhow::bail!("Network chain_id {} is configured twice", network.chain_id);
            }
            if network.rpc_url.trim().is_empty() {
                anyhow::bail!("Network {} rpc_url cannot be empty", network.label());
            }
            if network.iteration_registry.is_zero() {
                anyhow::bail!(
                    "Network {} iteration_registry must be a non-zero address",
                    network.label()
                );
            }
            if network.cert_registry.is_some_and(|a| a.is_zero()) {
                anyhow::bail!(
                    "Network {} cert_registry must be a non-zero address when provided",
                    network.label()
                );
            }
            if network.profile_registry.is_some_and(|a| a.is_zero()) {
                anyhow::bail!(
                    "Network {} profile_registry must be a non-zero address when provided",
                    network.label()
                );
            }
        }

        if let Some(chain_id) = self.single_network {
            if !seen.contains(&chain_id) {
                anyhow::bail!("single_network {} is not a configured network", chain_id);
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Iteration indexer tick interval.
    pub fn iterations_interval(&self) -> Duration {
        Duration::from_secs(self.iterations.poll_interval_secs)
    }

    /// Cert indexer tick interval.
    pub fn certs_interval(&self) -> Duration {
        Duration::from_secs(self.certs.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Basic,
    Literal,
    MultiBasic,
    MultiLiteral,
}

/// Expand `${VAR_NAME}` placeholders.
///
/// Placeholders are expanded in values and strings of every TOML quoting
/// style. Text after a `#` that is outside any string is a comment and is
/// copied verbatim.
///
/// # Errors
/// Returns an error if a placeholder is unclosed, empty or names an unset
/// variable.
pub(crate) fn expand_env_vars(input: &str) -> Result<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut quote = Quote::None;
    let mut in_comment = false;
    let mut i = 0;

    let triple = |i: usize, c: char| chars.get(i..i + 3) == Some(&[c, c, c][..]);

    while i < chars.len() {
        let ch = chars[i];

        if in_comment {
            if ch == '\n' {
                in_comment = false;
            }
            out.push(ch);
            i += 1;
            continue;
        }

        match (quote, ch) {
            (Quote::Basic | Quote::MultiBasic, '\\') => {
                out.push(ch);
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                }
                i += 2;
                continue;
            }
            (Quote::None, '#') => in_comment = true,
            (Quote::None, '"') if triple(i, '"') => {
                quote = Quote::MultiBasic;
                out.push_str("\"\"\"");
                i += 3;
                continue;
            }
            (Quote::None, '\'') if triple(i, '\'') => {
                quote = Quote::MultiLiteral;
                out.push_str("'''");
                i += 3;
                continue;
            }
            (Quote::MultiBasic, '"') if triple(i, '"') => {
                quote = Quote::None;
                out.push_str("\"\"\"");
                i += 3;
                continue;
            }
            (Quote::MultiLiteral, '\'') if triple(i, '\'') => {
                quote = Quote::None;
                out.push_str("'''");
                i += 3;
                continue;
            }
            (Quote::None, '"') => quote = Quote::Basic,
            (Quote::None, '\'') => quote = Quote::Literal,
            (Quote::Basic, '"') | (Quote::Literal, '\'') => quote = Quote::None,
            (_, '$') if chars.get(i + 1) == Some(&'{') => {
                let start = i + 2;
                let Some(len) = chars[start..].iter().position(|&c| c == '}') else {
                    anyhow::bail!("Unclosed environment variable placeholder at position {}", i);
                };
                let name: String = chars[start..start + len].iter().collect();
                if name.is_empty() {
                    anyhow::bail!("Empty environment variable name at position {}", i);
                }
                let value = std::env::var(&name).with_context(|| {
                    format!(
                        "Environment variable '{}' is not set (referenced at position {})",
                        name, i
                    )
                })?;
                out.push_str(&value);
                i = start + len + 1;
                continue;
            }
            _ => {}
        }

        out.push(ch);
        i += 1;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[database]
url = "sqlite://roundmirror.db"

[[networks]]
chain_id = 11155111
name = "sepolia"
rpc_url = "https://sepolia.example.com"
iteration_registry = "0x1111111111111111111111111111111111111111"
cert_registry = "0x2222222222222222222222222222222222222222"
"#;

    #[test]
    fn test_default_values() {
        let config = Config::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.single_network, None);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.iterations.poll_interval_secs, 60);
        assert_eq!(config.certs.poll_interval_secs, 120);
        assert_eq!(config.certs.log_batch_size, 5000);
        assert_eq!(config.retry.base_delay_secs, 30);
        assert_eq!(config.retry.max_delay_secs, 3600);
        assert_eq!(config.content.gateway, "https://ipfs.io/ipfs/");
        assert_eq!(config.logging.format, "pretty");

        let network = &config.networks[0];
        assert_eq!(network.label(), "sepolia");
        assert_eq!(network.profile_registry, None);
        assert_eq!(network.event_start_block, 0);
    }

    #[test]
    fn test_validation_requires_networks() {
        let toml = r#"
[database]
url = "sqlite://roundmirror.db"
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("[[networks]]"));
    }

    #[test]
    fn test_validation_unknown_single_network() {
        let toml = format!("single_network = 1\n{}", MINIMAL);
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("single_network 1"));

        let toml = format!("single_network = 11155111\n{}", MINIMAL);
        assert_eq!(
            Config::from_toml_str(&toml).unwrap().single_network,
            Some(11155111)
        );
    }

    #[test]
    fn test_validation_zero_interval() {
        let toml = format!("{}\n[iterations]\npoll_interval_secs = 0\n", MINIMAL);
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_validation_empty_database_url() {
        let toml = MINIMAL.replace("sqlite://roundmirror.db", "");
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("Database URL"));
    }

    #[test]
    fn test_validation_duplicate_chain_id() {
        let second = &MINIMAL[MINIMAL.find("[[networks]]").unwrap()..];
        let toml = format!("{}{}", MINIMAL, second);
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn test_validation_zero_registry() {
        let toml = MINIMAL.replace(
            "0x1111111111111111111111111111111111111111",
            "0x0000000000000000000000000000000000000000",
        );
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("iteration_registry"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        let policy = config.retry.policy();
        assert_eq!(policy.base_delay, Duration::from_secs(30));
        assert_eq!(policy.max_delay, Duration::from_secs(3600));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("RM_TEST_VAR1", "foo");
        std::env::set_var("RM_TEST_VAR2", "bar");

        let result = expand_env_vars("${RM_TEST_VAR1} and ${RM_TEST_VAR2}").unwrap();
        assert_eq!(result, "foo and bar");

        let result = expand_env_vars("no variables here").unwrap();
        assert_eq!(result, "no variables here");

        std::env::remove_var("RM_TEST_VAR1");
        std::env::remove_var("RM_TEST_VAR2");
    }

    #[test]
    fn test_expand_env_vars_errors() {
        let err = expand_env_vars("value = \"${RM_UNDEFINED_VAR_12345}\"").unwrap_err();
        assert!(err.to_string().contains("RM_UNDEFINED_VAR_12345"));

        let err = expand_env_vars("value = \"${}\"").unwrap_err();
        assert!(err.to_string().contains("Empty"));

        let err = expand_env_vars("value = \"${UNCLOSED").unwrap_err();
        assert!(err.to_string().contains("Unclosed"));
    }

    #[test]
    fn test_expand_env_vars_ignores_comments() {
        let input = "# rpc_url = \"${RM_NOT_SET_ANYWHERE}\"\nkey = 1 # ${RM_ALSO_NOT_SET}\n";
        assert_eq!(expand_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_expand_env_vars_hash_inside_strings() {
        std::env::set_var("RM_TEST_HASH", "x");

        let input = "a = \"#${RM_TEST_HASH}\"\nb = '#${RM_TEST_HASH}'\nc = \"\"\"\n# ${RM_TEST_HASH}\n\"\"\"\n";
        let expected = "a = \"#x\"\nb = '#x'\nc = \"\"\"\n# x\n\"\"\"\n";
        assert_eq!(expand_env_vars(input).unwrap(), expected);

        std::env::remove_var("RM_TEST_HASH");
    }

    #[test]
    fn test_expand_env_vars_escaped_quote() {
        std::env::set_var("RM_TEST_ESC", "y");

        let input = "a = \"say \\\"hi\\\" # ${RM_TEST_ESC}\"\n";
        let expected = "a = \"say \\\"hi\\\" # y\"\n";
        assert_eq!(expand_env_vars(input).unwrap(), expected);

        std::env::remove_var("RM_TEST_ESC");
    }

    #[test]
    fn test_config_from_file_with_env_vars() {
        std::env::set_var("RM_TEST_RPC_URL", "https://rpc.example.com");

        let toml = MINIMAL.replace("https://sepolia.example.com", "${RM_TEST_RPC_URL}");
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), toml).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.networks[0].rpc_url, "https://rpc.example.com");

        std::env::remove_var("RM_TEST_RPC_URL");
    }
}
