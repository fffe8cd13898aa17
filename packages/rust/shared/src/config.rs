//! Application configuration for kbmirror.
//!
//! User config lives at `~/.kbmirror/kbmirror.toml`.
//! CLI flags override environment variables, which override config file
//! values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{KbMirrorError, Result};
use crate::types::AllowList;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbmirror.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbmirror";

/// Environment variable holding the instance host or URL.
pub const INSTANCE_ENV: &str = "SERVICENOW_INSTANCE";

/// Environment variable holding the comma-separated allow-list.
pub const KNOWLEDGE_BASES_ENV: &str = "SERVICENOW_KNOWLEDGE_BASES";

/// Upper bound the Table API accepts for `sysparm_limit`.
const MAX_PAGE_SIZE: u32 = 10_000;

// ---------------------------------------------------------------------------
// Config structs (matching kbmirror.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// ServiceNow connection settings.
    #[serde(default)]
    pub servicenow: ServiceNowConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory the article tree is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Rows requested per Table API page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_output_dir() -> String {
    "articles".into()
}
fn default_page_size() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[servicenow]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNowConfig {
    /// Instance host, URL, or bare instance name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// Name of the env var holding the username.
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Name of the env var holding the password (never store the password itself).
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Knowledge-base display names to export (empty = all).
    #[serde(default)]
    pub knowledge_bases: Vec<String>,

    /// Extra `sysparm_query` applied to `kb_knowledge`.
    #[serde(default)]
    pub article_query: String,
}

impl Default for ServiceNowConfig {
    fn default() -> Self {
        Self {
            instance: None,
            username_env: default_username_env(),
            password_env: default_password_env(),
            knowledge_bases: Vec::new(),
            article_query: String::new(),
        }
    }
}

fn default_username_env() -> String {
    "SERVICENOW_USERNAME".into()
}
fn default_password_env() -> String {
    "SERVICENOW_PASSWORD".into()
}

// ---------------------------------------------------------------------------
// Export config (runtime, merged from config + env + CLI flags)
// ---------------------------------------------------------------------------

/// Basic-auth credential pair.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ExportOverrides {
    pub instance: Option<String>,
    pub username: Option<String>,
    pub knowledge_bases: Vec<String>,
    pub output_dir: Option<PathBuf>,
    pub page_size: Option<u32>,
}

/// Everything one export run needs. Built once at startup.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Instance origin, always ending in `/`.
    pub instance_url: Url,
    pub credentials: Credentials,
    pub allow_list: AllowList,
    pub output_dir: PathBuf,
    pub page_size: u32,
    pub timeout_secs: u64,
    /// `sysparm_query` for articles, if any.
    pub article_query: Option<String>,
    /// Tool version recorded in the export manifest.
    pub tool_version: String,
}

impl ExportConfig {
    /// Merge config file, environment, and CLI overrides.
    ///
    /// `env` looks up an environment variable; the CLI passes
    /// `|k| std::env::var(k).ok()`.
    pub fn resolve(
        app: &AppConfig,
        overrides: ExportOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let instance = non_empty(overrides.instance)
            .or_else(|| non_empty(env(INSTANCE_ENV)))
            .or_else(|| non_empty(app.servicenow.instance.clone()))
            .ok_or_else(|| {
                KbMirrorError::config(format!(
                    "no ServiceNow instance configured. Set {INSTANCE_ENV} or pass --instance"
                ))
            })?;
        let instance_url = instance_url(&instance)?;

        let username_env = &app.servicenow.username_env;
        let username = non_empty(overrides.username)
            .or_else(|| non_empty(env(username_env)))
            .ok_or_else(|| {
                KbMirrorError::config(format!(
                    "no username configured. Set {username_env} or pass --username"
                ))
            })?;

        let password_env = &app.servicenow.password_env;
        let password = non_empty(env(password_env)).ok_or_else(|| {
            KbMirrorError::config(format!("no password configured. Set {password_env}"))
        })?;

        let allow_list = if !overrides.knowledge_bases.is_empty() {
            AllowList::new(&overrides.knowledge_bases)
        } else if let Some(csv) = non_empty(env(KNOWLEDGE_BASES_ENV)) {
            AllowList::parse(&csv)
        } else {
            AllowList::new(&app.servicenow.knowledge_bases)
        };

        let page_size = overrides.page_size.unwrap_or(app.defaults.page_size);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(KbMirrorError::config(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }

        let article_query = Some(app.servicenow.article_query.trim().to_string())
            .filter(|q| !q.is_empty());

        Ok(Self {
            instance_url,
            credentials: Credentials { username, password },
            allow_list,
            output_dir: overrides
                .output_dir
                .unwrap_or_else(|| PathBuf::from(&app.defaults.output_dir)),
            page_size,
            timeout_secs: app.defaults.timeout_secs,
            article_query,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

/// Normalize an instance setting into its origin URL.
///
/// Accepts `https://acme.service-now.com`, `acme.service-now.com`, or just
/// `acme` (expanded to `https://acme.service-now.com`).
pub fn instance_url(raw: &str) -> Result<Url> {
    let raw = raw.trim().trim_end_matches('/');
    if raw.is_empty() {
        return Err(KbMirrorError::config("instance must not be empty"));
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else if raw.contains('.') || raw.contains(':') {
        format!("https://{raw}")
    } else {
        format!("https://{raw}.service-now.com")
    };

    let mut url = Url::parse(&candidate)
        .map_err(|e| KbMirrorError::config(format!("invalid instance '{raw}': {e}")))?;

    if url.host_str().is_none() || !matches!(url.scheme(), "http" | "https") {
        return Err(KbMirrorError::config(format!(
            "invalid instance '{raw}': expected an http(s) host"
        )));
    }

    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbmirror/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| KbMirrorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbmirror/kbmirror.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbMirrorError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| KbMirrorError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbMirrorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KbMirrorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KbMirrorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
