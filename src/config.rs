use crate::{bepinex, game};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_MOD_LIST_URL: &str = "https://mxzc.cloud:35249/mod_list.json";
pub const DEFAULT_PRESET_SERVERS_URL: &str = "https://mxzc.cloud:35249/preset_servers.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub game_root: PathBuf,
    #[serde(default)]
    pub user_dir: PathBuf,
    #[serde(default = "default_mod_list_url")]
    pub mod_list_url: String,
    #[serde(default = "default_preset_servers_url")]
    pub preset_servers_url: String,
    #[serde(default)]
    pub download_api_url: String,
    #[serde(default = "default_bepinex_url")]
    pub bepinex_url: String,
    #[serde(default = "default_bepinex_version")]
    pub bepinex_version: String,
    #[serde(default)]
    pub bepinex_sha256: Option<String>,
    #[serde(default)]
    pub suppress_bepinex_prompt: bool,
    #[serde(default)]
    pub github_token: Option<String>,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_in(&base_data_dir()?)
    }

    pub fn load_or_create_in(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let path = data_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.data_dir = data_dir.to_path_buf();
            return Ok(config);
        }

        let mut config = AppConfig::with_data_dir(data_dir);
        if let Ok(paths) = game::detect_paths(None, None) {
            config.game_root = paths.game_root.unwrap_or_default();
            config.user_dir = paths.user_dir.unwrap_or_default();
        }
        config.save()?;
        Ok(config)
    }

    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            game_root: PathBuf::new(),
            user_dir: PathBuf::new(),
            mod_list_url: default_mod_list_url(),
            preset_servers_url: default_preset_servers_url(),
            download_api_url: String::new(),
            bepinex_url: default_bepinex_url(),
            bepinex_version: default_bepinex_version(),
            bepinex_sha256: None,
            suppress_bepinex_prompt: false,
            github_token: None,
        }
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).context("create app data dir")?;
        let path = self.data_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("aulgk.log")
    }

    pub fn game_root(&self) -> Option<&Path> {
        non_empty(&self.game_root)
    }

    pub fn user_dir(&self) -> Option<&Path> {
        non_empty(&self.user_dir)
    }

    pub fn loader_source(&self) -> bepinex::LoaderSource {
        bepinex::LoaderSource {
            url: self.bepinex_url.clone(),
            version: self.bepinex_version.clone(),
            download_api: Some(self.download_api_url.clone()).filter(|url| !url.trim().is_empty()),
            sha256: self.bepinex_sha256.clone(),
        }
    }
}

fn non_empty(path: &Path) -> Option<&Path> {
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

fn default_mod_list_url() -> String {
    DEFAULT_MOD_LIST_URL.to_string()
}

fn default_preset_servers_url() -> String {
    DEFAULT_PRESET_SERVERS_URL.to_string()
}

fn default_bepinex_url() -> String {
    bepinex::DEFAULT_URL.to_string()
}

fn default_bepinex_version() -> String {
    bepinex::DEFAULT_VERSION.to_string()
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("aulgk"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"game_root": "/games/Among Us", "github_token": "ghp_x"}"#,
        )
        .unwrap();

        let config = AppConfig::load_or_create_in(dir.path()).unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.game_root(), Some(Path::new("/games/Among Us")));
        assert_eq!(config.user_dir(), None);
        assert_eq!(config.mod_list_url, DEFAULT_MOD_LIST_URL);
        assert_eq!(config.bepinex_version, bepinex::DEFAULT_VERSION);
        assert!(!config.suppress_bepinex_prompt);
        assert_eq!(config.github_token.as_deref(), Some("ghp_x"));
        assert!(config.loader_source().download_api.is_none());
    }

    #[test]
    fn save_round_trips_without_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::with_data_dir(dir.path());
        config.suppress_bepinex_prompt = true;
        config.download_api_url = "https://dl.test/api/download".to_string();
        config.save().unwrap();

        let raw = fs::read_to_string(dir.path().join("config.json")).unwrap();
        assert!(!raw.contains("data_dir"));
        let loaded = AppConfig::load_or_create_in(dir.path()).unwrap();
        assert!(loaded.suppress_bepinex_prompt);
        assert_eq!(
            loaded.loader_source().download_api.as_deref(),
            Some("https://dl.test/api/download")
        );
    }

    #[test]
    fn rejects_corrupt_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{").unwrap();
        assert!(AppConfig::load_or_create_in(dir.path()).is_err());
    }
}
