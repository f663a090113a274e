use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "config/heron.toml";
const DEFAULT_MODEL: &str = "llama3";
const DEFAULT_PROVIDER_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub provider: ProviderConfig,
    pub discovery: DiscoveryPolicy,
    servers: Vec<Arc<ServerSpec>>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

/// How `discover` reacts to a provider that fails to launch, initialize, or
/// list its tools: keep going and report, or abort on the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryPolicy {
    #[default]
    BestEffort,
    FailFast,
}

/// Launch parameters for one MCP tool server. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config at {path:?}: {message}")]
    Invalid { path: PathBuf, message: String },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    model: Option<String>,
    system_prompt: Option<String>,
    discovery: Option<String>,
    provider: Option<RawProvider>,
    #[serde(default)]
    servers: BTreeMap<String, RawServer>,
}

#[derive(Debug, Deserialize, Default)]
struct RawProvider {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    workdir: Option<String>,
}

impl AppConfig {
    /// Loads the configuration file. The file is mandatory: an absent or
    /// structurally invalid file is a fatal error and the process must not
    /// serve without one.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an injectable host-environment
    /// lookup, so env inheritance stays testable without mutating the
    /// process environment.
    pub fn load_with_env(
        path: &Path,
        host_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Reading bridge configuration file");
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let discovery = match parsed.discovery.as_deref() {
            None | Some("best-effort") => DiscoveryPolicy::BestEffort,
            Some("fail-fast") => DiscoveryPolicy::FailFast,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    message: format!(
                        "unknown discovery policy '{other}' (expected 'best-effort' or 'fail-fast')"
                    ),
                });
            }
        };

        let mut servers = Vec::with_capacity(parsed.servers.len());
        for (id, raw) in parsed.servers {
            let command = raw.command.filter(|cmd| !cmd.trim().is_empty()).ok_or_else(|| {
                ConfigError::Invalid {
                    path: path.to_path_buf(),
                    message: format!("server '{id}' is missing the required 'command' field"),
                }
            })?;
            servers.push(Arc::new(ServerSpec {
                id,
                command: shellexpand::tilde(&command).into_owned(),
                args: raw.args,
                env: resolve_env(&raw.env, &host_env),
                workdir: raw
                    .workdir
                    .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned())),
            }));
        }

        let provider = parsed.provider.unwrap_or_default();
        Ok(AppConfig {
            model: parsed.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: parsed.system_prompt,
            provider: ProviderConfig {
                base_url: provider
                    .base_url
                    .unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string()),
                request_timeout_secs: provider
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            },
            discovery,
            servers,
        })
    }

    pub fn server_specs(&self) -> &[Arc<ServerSpec>] {
        &self.servers
    }
}

/// A declared env entry with an empty value asks to inherit the host's
/// variable of the same name; `PATH` is always filled in from the host when
/// the server does not pin its own.
fn resolve_env(
    declared: &BTreeMap<String, String>,
    host_env: &impl Fn(&str) -> Option<String>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for (key, value) in declared {
        if value.is_empty() {
            env.insert(key.clone(), host_env(key).unwrap_or_default());
        } else {
            env.insert(key.clone(), value.clone());
        }
    }
    if !env.contains_key("PATH") {
        if let Some(path) = host_env("PATH") {
            env.insert("PATH".to_string(), path);
        }
    }
    env
}
