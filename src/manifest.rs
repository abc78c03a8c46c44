use crate::error::{FsContext, ModError, ModResult};
use serde::Deserialize;
use std::{collections::HashSet, fs, path::Path};

pub const MANIFEST_ENTRY: &str = "mod.json";
pub const PLUGIN_PREFIX: &str = "BepInEx/plugins/";

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default, alias = "Files")]
    files: Option<Vec<String>>,
    #[serde(default, alias = "Update")]
    update: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModManifest {
    pub files: Vec<String>,
    pub update: Option<Vec<String>>,
}

impl ModManifest {
    pub fn parse(raw: &str) -> ModResult<Self> {
        let raw: RawManifest = serde_json::from_str(raw)
            .map_err(|err| ModError::InvalidManifest(err.to_string()))?;
        let files = raw
            .files
            .ok_or_else(|| ModError::InvalidManifest("missing `files` array".to_string()))?;
        let files = normalize_list(files)?;

        let update = match raw.update {
            Some(update) => {
                let known: HashSet<&str> = files.iter().map(String::as_str).collect();
                let update = normalize_list(update)?
                    .into_iter()
                    .filter(|path| known.contains(path.as_str()))
                    .collect();
                Some(update)
            }
            None => None,
        };

        Ok(Self { files, update })
    }

    pub fn load(path: &Path) -> ModResult<Self> {
        let raw =
            fs::read_to_string(path).with_fs_context(|| format!("read {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn update_files(&self) -> &[String] {
        self.update.as_deref().unwrap_or(&self.files)
    }

    // Only these move when the mod is toggled.
    pub fn plugin_files(&self) -> impl Iterator<Item = &String> {
        self.files.iter().filter(|path| is_plugin_path(path))
    }

    pub fn non_plugin_files(&self) -> impl Iterator<Item = &String> {
        self.files.iter().filter(|path| !is_plugin_path(path))
    }
}

pub fn is_plugin_path(path: &str) -> bool {
    path.len() >= PLUGIN_PREFIX.len()
        && path.is_char_boundary(PLUGIN_PREFIX.len())
        && path[..PLUGIN_PREFIX.len()].eq_ignore_ascii_case(PLUGIN_PREFIX)
}

fn normalize_list(paths: Vec<String>) -> ModResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let path = normalize_path(&path)?;
        if path.is_empty() {
            continue;
        }
        if seen.insert(path.to_ascii_lowercase()) {
            out.push(path);
        }
    }
    Ok(out)
}

pub fn normalize_path(raw: &str) -> ModResult<String> {
    let mut path = raw.trim().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    let path = path.trim_start_matches('/').to_string();

    let escapes = path.split('/').any(|part| part == "..");
    let has_drive = path.chars().nth(1) == Some(':');
    if escapes || has_drive {
        return Err(ModError::InvalidManifest(format!(
            "path escapes the game directory: {raw}"
        )));
    }
    Ok(path)
}
