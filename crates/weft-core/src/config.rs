use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gateway bind address.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Declared order here is the dispatch fan-out order.
    #[serde(default)]
    pub runners: Vec<RunnerConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Directory holding workflow route files (tenant subdirectories plus
    /// default files).
    #[serde(default = "default_routes_dir")]
    pub routes_dir: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            auth: AuthConfig::default(),
            runners: Vec::new(),
            engine: EngineConfig::default(),
            routes_dir: default_routes_dir(),
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WeftError::ConfigNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| WeftError::Config(format!("{}: {}", path.display(), e)))
    }
}

fn default_listen() -> String {
    "127.0.0.1:6001".to_string()
}

fn default_routes_dir() -> String {
    "routes".to_string()
}

/// Shared-secret and per-tenant credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for default/single-tenant mode.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default)]
    pub tenants: Vec<TenantKey>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            tenants: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Resolve a presented key: shared secret first, then the tenant table.
    pub fn resolve(&self, api_key: &str) -> Option<Principal> {
        if api_key == self.api_key {
            return Some(Principal::Default);
        }
        self.tenants
            .iter()
            .find(|t| t.api_key == api_key)
            .map(|t| Principal::Tenant(t.name.clone()))
    }
}

fn default_api_key() -> String {
    "changeme".to_string()
}

/// One tenant's credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantKey {
    pub name: String,
    pub api_key: String,
}

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// Single-tenant mode: the shared secret matched.
    Default,
    /// Multi-tenant mode: a tenant key matched.
    Tenant(String),
}

impl Principal {
    /// The tenant identifier used for route lookups.
    pub fn tenant(&self) -> &str {
        match self {
            Principal::Default => "default",
            Principal::Tenant(name) => name,
        }
    }
}

/// One runner's address and (optional) supervised child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub name: String,
    #[serde(default = "default_runner_host")]
    pub host: String,
    pub port: u16,
    /// Command line used to spawn this runner as a child process. Empty
    /// means the runner is managed externally and only connected to.
    #[serde(default)]
    pub command: Vec<String>,
    /// Fixed delay before respawning an exited child.
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,
}

impl RunnerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_runner_host() -> String {
    "127.0.0.1".to_string()
}

fn default_restart_delay() -> u64 {
    2000
}

/// Workflow engine policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether a failed command halts the run or traversal continues with
    /// whatever output was produced.
    #[serde(default)]
    pub on_command_error: ErrorPolicy,
    /// Number of times one node may be visited before the run is terminated.
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            on_command_error: ErrorPolicy::default(),
            max_node_visits: default_max_node_visits(),
        }
    }
}

fn default_max_node_visits() -> usize {
    10
}

/// What to do when a workflow command fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Record the failure and advance to the next node.
    #[default]
    Continue,
    /// Stop the run at the failing node.
    Halt,
}

/// Retry policy for runner calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles after every failed attempt.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Optional backoff ceiling. Unset means unbounded growth.
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    /// Client-side timeout for one call attempt.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: None,
            call_timeout_ms: default_call_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_call_timeout() -> u64 {
    5000
}
