use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

use crate::models::IpcmanConfig;

pub const CONFIG_PATH_VAR: &str = "IPCMAN_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "IPCMAN_CONFIG_JSON";

const CANDIDATES: &[&str] = &[
    "ipcman.toml",
    "ipcman.json",
    "config/ipcman.toml",
    "config/ipcman.json",
];

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => f.write_str("built-in defaults"),
            ConfigSource::EnvPath(path) => write!(f, "${CONFIG_PATH_VAR} ({})", path.display()),
            ConfigSource::EnvInline => write!(f, "${CONFIG_JSON_VAR}"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A validated configuration together with its origin.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: IpcmanConfig,
    pub source: ConfigSource,
}

/// Resolves the configuration from, in order: an explicit path, inline JSON,
/// the first default file found under the search root, or defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    inline_json: Option<String>,
    search_root: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `$IPCMAN_CONFIG_PATH` and `$IPCMAN_CONFIG_JSON`, searching the
    /// working directory for default files.
    pub fn from_env() -> Self {
        let non_empty = |name: &str| env::var(name).ok().filter(|raw| !raw.trim().is_empty());
        Self {
            path: non_empty(CONFIG_PATH_VAR).map(PathBuf::from),
            inline_json: non_empty(CONFIG_JSON_VAR),
            search_root: PathBuf::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_inline_json(mut self, raw: impl Into<String>) -> Self {
        self.inline_json = Some(raw.into());
        self
    }

    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_root = root.into();
        self
    }

    pub fn load(&self) -> anyhow::Result<ConfigLoad> {
        let (config, source) = self.resolve()?;
        config
            .validate()
            .with_context(|| format!("configuration from {source} is invalid"))?;
        tracing::debug!(target: "config", source = %source, devices = config.devices.len(), "configuration loaded");
        Ok(ConfigLoad { config, source })
    }

    fn resolve(&self) -> anyhow::Result<(IpcmanConfig, ConfigSource)> {
        if let Some(path) = &self.path {
            let config = load_from_file(path)?;
            return Ok((config, ConfigSource::EnvPath(path.clone())));
        }

        if let Some(raw) = &self.inline_json {
            let config = parse_json(raw).with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            return Ok((config, ConfigSource::EnvInline));
        }

        if let Some(path) = self.find_default_file() {
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((IpcmanConfig::default(), ConfigSource::Default))
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|candidate| self.search_root.join(candidate))
            .find(|path| path.is_file())
    }
}

pub fn load_from_file(path: &Path) -> anyhow::Result<IpcmanConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            parse_json(&contents).with_context(|| format!("invalid config {}", path.display()))
        }
        Some("toml") => toml::from_str(&contents)
            .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err)),
        _ => parse_from_str(&contents, &path.display().to_string()),
    }
}

/// Tries TOML, then JSON.
pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<IpcmanConfig> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            anyhow!(
                "failed to parse config {}: toml error: {}; json error: {}",
                origin,
                toml_err,
                json_err
            )
        })
    })
}

pub fn parse_json(raw: &str) -> anyhow::Result<IpcmanConfig> {
    serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
}
