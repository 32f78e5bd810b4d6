use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable that overrides [`Config::root`].
pub const ROOT_ENV: &str = "GITTO_ROOT";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding every hosted repository as `{root}/{id}/{name}.git`.
    ///
    /// Made absolute by [`load_config`]; `GITTO_ROOT` takes precedence over
    /// the file value.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Socket address for the HTTP listener.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Config file this value was loaded from, if any.  Handed to the
    /// post-receive shim so hook runs see the same settings.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            listen: default_listen(),
            git: GitConfig::default(),
            auth: AuthConfig::default(),
            webhook: WebhookConfig::default(),
            source: None,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("git")
}

fn default_listen() -> String {
    "0.0.0.0:7878".to_string()
}

// ---------------------------------------------------------------------------
// Git executable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitConfig {
    /// Path or name of the `git` executable.
    #[serde(default = "default_git_binary")]
    pub binary: PathBuf,
    /// Primary branch name passed to `git init --initial-branch`.
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            default_branch: default_branch(),
        }
    }
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}

fn default_branch() -> String {
    "main".to_string()
}

// ---------------------------------------------------------------------------
// API auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Name of the environment variable that holds the API bearer token.
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_token_env: default_api_token_env(),
        }
    }
}

fn default_api_token_env() -> String {
    "GITTO_API_TOKEN".to_string()
}

// ---------------------------------------------------------------------------
// Webhook delivery
// ---------------------------------------------------------------------------

/// What a hook run does when the webhook endpoint cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryFailurePolicy {
    /// Log and exit successfully; the push is reported as successful.
    #[default]
    Ignore,
    /// Exit non-zero so git reports the hook failure to the pusher.  Refs
    /// that were already updated stay updated.
    Fail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Name of the environment variable holding the optional HMAC signing
    /// secret for deliveries.
    #[serde(default = "default_webhook_secret_env")]
    pub secret_env: String,
    #[serde(default)]
    pub on_delivery_failure: DeliveryFailurePolicy,
    /// Overall request timeout in seconds.  Unset means the HTTP client
    /// default (no timeout).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret_env: default_webhook_secret_env(),
            on_delivery_failure: DeliveryFailurePolicy::default(),
            timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_webhook_secret_env() -> String {
    "GITTO_WEBHOOK_SECRET".to_string()
}

fn default_user_agent() -> String {
    concat!("gitto/", env!("CARGO_PKG_VERSION")).to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Build the process [`Config`].
///
/// Reads the YAML file at `path` when one is given (otherwise starts from
/// defaults), applies the `GITTO_ROOT` override, resolves the root to an
/// absolute path and validates the result.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let mut config = parse_config(&contents)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?;
            config.source = Some(
                std::path::absolute(path)
                    .with_context(|| format!("unable to resolve {}", path.display()))?,
            );
            config
        }
        None => Config::default(),
    };

    if let Some(root) = std::env::var_os(ROOT_ENV) {
        config.root = PathBuf::from(root);
    }
    config.root = std::path::absolute(&config.root)
        .with_context(|| format!("unable to resolve {ROOT_ENV}: {}", config.root.display()))?;

    validate_config(&config)?;
    Ok(config)
}

fn parse_config(contents: &str) -> Result<Config> {
    // An empty file is a valid "all defaults" config.
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.git.default_branch.trim().is_empty(),
        "git.default_branch must not be empty"
    );
    config
        .listen
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid listen address: {}", config.listen))?;
    anyhow::ensure!(
        config.webhook.timeout_secs != Some(0),
        "webhook.timeout_secs must be greater than zero"
    );
    Ok(())
}

/// Read the shared API bearer token from the environment.
///
/// Only server mode needs it; a missing or empty value is fatal.
pub fn load_api_token(config: &Config) -> Result<String> {
    let name = &config.auth.api_token_env;
    match std::env::var(name) {
        Ok(token) if !token.is_empty() => Ok(token),
        _ => anyhow::bail!("Please specify env variable {name}"),
    }
}
