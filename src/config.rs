use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{LabError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProfileConfig {
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay: Option<u64>,
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    profiles: Option<HashMap<String, ProfileConfig>>,
}

pub fn load_profile(name: &str) -> Result<ProfileConfig> {
    let path = config_path()?;
    load_profile_from(&path, name)
}

fn load_profile_from(path: &Path, name: &str) -> Result<ProfileConfig> {
    let profiles = read_profiles(path)?;
    profiles.get(name).cloned().ok_or_else(|| {
        LabError::Config(format!(
            "Profile '{}' not found in config file '{}'.",
            name,
            path.display()
        ))
    })
}

fn read_profiles(path: &Path) -> Result<HashMap<String, ProfileConfig>> {
    let raw = fs::read_to_string(path).map_err(|err| {
        LabError::Config(format!(
            "Failed to read config file '{}': {err}",
            path.display()
        ))
    })?;

    let config: ConfigFile = toml::from_str(&raw).map_err(|err| {
        LabError::Config(format!(
            "Failed to parse config file '{}': {err}",
            path.display()
        ))
    })?;

    config.profiles.ok_or_else(|| {
        LabError::Config(format!(
            "Config file '{}' does not contain a [profiles] section.",
            path.display()
        ))
    })
}

/// Checks that the config file parses and, if given, that the profile exists.
pub fn validate_config(profile: Option<&str>) -> Result<PathBuf> {
    let path = config_path()?;
    match profile {
        Some(name) => {
            load_profile_from(&path, name)?;
        }
        None => {
            read_profiles(&path)?;
        }
    }
    Ok(path)
}

pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var("AILAB_CONFIG") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let trimmed = xdg.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed).join("ailab").join("config.toml"));
        }
    }

    let home = env::var("HOME").map_err(|_| {
        LabError::Config(
            "Cannot resolve config path: set AILAB_CONFIG or HOME/XDG_CONFIG_HOME.".to_string(),
        )
    })?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("ailab")
        .join("config.toml"))
}

/// Layered view of the settings a lab reads.
///
/// Lookups go through the process environment first, then the `.env` file,
/// then the `env` table of the selected profile. Nothing is written back into
/// the process environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    layers: Vec<HashMap<String, String>>,
}

impl Environment {
    pub fn load(use_dotenv: bool, profile: Option<&ProfileConfig>) -> Result<Self> {
        let mut layers = vec![env::vars().collect::<HashMap<_, _>>()];

        if use_dotenv {
            layers.push(read_dotenv(Path::new(".env"))?);
        }
        if let Some(profile_env) = profile.and_then(|profile| profile.env.clone()) {
            layers.push(profile_env);
        }

        Ok(Self { layers })
    }

    pub fn from_layers(layers: Vec<HashMap<String, String>>) -> Self {
        Self { layers }
    }

    /// Returns the first non-blank value for `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.layers
            .iter()
            .filter_map(|layer| layer.get(name))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn require(&self, name: &'static str) -> Result<String> {
        self.get(name).ok_or(LabError::MissingEnv { name })
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Reads `KEY=value` pairs from `path` without touching the process env.
/// A missing file yields no values.
fn read_dotenv(path: &Path) -> Result<HashMap<String, String>> {
    let iter = match dotenv::from_path_iter(path) {
        Ok(iter) => iter,
        Err(dotenv::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(HashMap::new());
        }
        Err(err) => return Err(LabError::Config(format!("Failed to load .env file: {err}"))),
    };

    let mut values = HashMap::new();
    for item in iter {
        let (key, value) =
            item.map_err(|err| LabError::Config(format!("Failed to parse .env file: {err}")))?;
        values.insert(key, value);
    }
    debug!(path = %path.display(), count = values.len(), "loaded .env values");
    Ok(values)
}

/// Timeout and retry settings shared by every HTTP client.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    pub timeout_secs: Option<u64>,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout_secs: Some(120),
            retries: 0,
            retry_delay_ms: 500,
        }
    }
}

impl RequestOptions {
    /// Command-line values win over the profile, the profile over defaults.
    pub fn resolve(
        timeout: Option<u64>,
        retries: Option<u32>,
        retry_delay: Option<u64>,
        profile: Option<&ProfileConfig>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            timeout_secs: timeout
                .or_else(|| profile.and_then(|p| p.timeout))
                .or(defaults.timeout_secs),
            retries: retries
                .or_else(|| profile.and_then(|p| p.retries))
                .unwrap_or(defaults.retries),
            retry_delay_ms: retry_delay
                .or_else(|| profile.and_then(|p| p.retry_delay))
                .unwrap_or(defaults.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn earlier_layers_win() {
        let env = Environment::from_layers(vec![
            layer(&[("MODEL_KEY", "from-process")]),
            layer(&[("MODEL_KEY", "from-dotenv"), ("MODEL_DEPLOYMENT", "https://x")]),
        ]);
        assert_eq!(env.get("MODEL_KEY").as_deref(), Some("from-process"));
        assert_eq!(env.get("MODEL_DEPLOYMENT").as_deref(), Some("https://x"));
    }

    #[test]
    fn blank_values_fall_through() {
        let env = Environment::from_layers(vec![
            layer(&[("ENDPOINT_KEY", "  ")]),
            layer(&[("ENDPOINT_KEY", "secret")]),
        ]);
        assert_eq!(env.get("ENDPOINT_KEY").as_deref(), Some("secret"));
    }

    #[test]
    fn require_reports_missing_name() {
        let env = Environment::default();
        let err = env.require("AZURE_AI_CHAT_KEY").unwrap_err();
        assert!(matches!(
            err,
            LabError::MissingEnv {
                name: "AZURE_AI_CHAT_KEY"
            }
        ));
    }

    #[test]
    fn cli_values_override_profile() {
        let profile = ProfileConfig {
            timeout: Some(7),
            retries: Some(2),
            retry_delay: None,
            env: None,
        };
        let options = RequestOptions::resolve(Some(30), None, None, Some(&profile));
        assert_eq!(options.timeout_secs, Some(30));
        assert_eq!(options.retries, 2);
        assert_eq!(options.retry_delay_ms, 500);
    }

    #[test]
    fn dotenv_file_is_read_from_the_given_path() {
        let dir = env::temp_dir().join(format!("ailab-dotenv-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".env");
        fs::write(&path, "MODEL_KEY=from-file\n# comment\nMODEL_DEPLOYMENT=\"https://x\"\n").unwrap();

        let values = read_dotenv(&path).unwrap();
        assert_eq!(values["MODEL_KEY"], "from-file");
        assert_eq!(values["MODEL_DEPLOYMENT"], "https://x");
        assert!(read_dotenv(&dir.join("missing.env")).unwrap().is_empty());
    }

    #[test]
    fn profile_env_table_parses() {
        let raw = "[profiles.lab]\nretries = 1\n[profiles.lab.env]\nMODEL_KEY = \"k\"\n";
        let config: ConfigFile = toml::from_str(raw).unwrap();
        let profile = &config.profiles.unwrap()["lab"];
        assert_eq!(profile.retries, Some(1));
        assert_eq!(profile.env.as_ref().unwrap()["MODEL_KEY"], "k");
    }
}
