use crate::error::{FsContext, ModError, ModResult};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct ModPaths {
    pub root: PathBuf,
    pub info_dir: PathBuf,
    pub files_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub status_file: PathBuf,
}

impl ModPaths {
    pub fn new(data_dir: &Path) -> Self {
        let root = data_dir.join("mod");
        Self {
            info_dir: root.join("info"),
            files_dir: root.join("files"),
            tmp_dir: root.join("tmp"),
            status_file: root.join("status.json"),
            root,
        }
    }

    pub fn ensure(&self) -> ModResult<()> {
        for dir in [&self.root, &self.info_dir, &self.files_dir, &self.tmp_dir] {
            fs::create_dir_all(dir).with_fs_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.info_dir.join(format!("{name}.json"))
    }

    pub fn working_dir(&self, name: &str) -> PathBuf {
        self.files_dir.join(name)
    }
}

// `installed`: files are live in the game root. `downloaded`: working copy exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModStatus {
    #[serde(default, alias = "Info")]
    pub info: String,
    #[serde(default, alias = "Downloaded", with = "flag")]
    pub downloaded: bool,
    #[serde(default, alias = "Installed", with = "flag")]
    pub installed: bool,
    #[serde(default, alias = "Version")]
    pub version: String,
    #[serde(default, alias = "FileMatch", skip_serializing_if = "Option::is_none")]
    pub file_match: Option<String>,
}

impl ModStatus {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Self::default()
        }
    }

    pub fn mark_installed(&mut self, info: &Path, version: &str) {
        self.info = info.to_string_lossy().into_owned();
        self.downloaded = true;
        self.installed = true;
        self.version = version.to_string();
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> ModResult<()> {
        if enabled && !self.downloaded {
            return Err(ModError::NotDownloaded(name.to_string()));
        }
        self.installed = enabled;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.info.clear();
        self.downloaded = false;
        self.installed = false;
        self.version.clear();
        self.file_match = None;
    }
}

#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
    statuses: BTreeMap<String, ModStatus>,
}

impl StatusStore {
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            statuses: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> ModResult<Self> {
        if !path.exists() {
            return Ok(Self::empty(path));
        }
        let raw = fs::read_to_string(path).fs_context("read status.json")?;
        let statuses: BTreeMap<String, ModStatus> = serde_json::from_str(&raw)
            .map_err(io::Error::from)
            .fs_context("parse status.json")?;
        Ok(Self {
            path: path.to_path_buf(),
            statuses,
        })
    }

    pub fn load_or_empty(path: &Path) -> (Self, Option<ModError>) {
        match Self::load(path) {
            Ok(store) => (store, None),
            Err(err) => (Self::empty(path), Some(err)),
        }
    }

    pub fn save(&self) -> ModResult<()> {
        let raw = serde_json::to_string_pretty(&self.statuses)
            .map_err(io::Error::from)
            .fs_context("serialize status.json")?;
        write_atomic(&self.path, &raw)
    }

    pub fn get(&self, name: &str) -> Option<&ModStatus> {
        self.statuses.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModStatus> {
        self.statuses.get_mut(name)
    }

    pub fn entry(&mut self, name: &str) -> &mut ModStatus {
        self.statuses.entry(name.to_string()).or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.statuses.contains_key(name)
    }

    pub fn insert(&mut self, name: &str, status: ModStatus) {
        self.statuses.insert(name.to_string(), status);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModStatus)> {
        self.statuses.iter()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn enabled_except(&self, name: &str) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|(key, status)| key.as_str() != name && status.installed)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn is_downloaded(&self, name: &str) -> bool {
        self.get(name).map(|status| status.downloaded).unwrap_or(false)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).map(|status| status.installed).unwrap_or(false)
    }
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> ModResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_fs_context(|| format!("create {}", parent.display()))?;
    }
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, contents).with_fs_context(|| format!("write {}", temp.display()))?;
    fs::rename(&temp, path).with_fs_context(|| format!("finalize {}", path.display()))?;
    Ok(())
}

// 0/1 on disk, booleans accepted on read.
mod flag {
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        deserializer.deserialize_any(FlagVisitor)
    }

    struct FlagVisitor;

    impl<'de> de::Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("0, 1 or a boolean")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<bool, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<bool, E> {
            Ok(value != 0)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<bool, E> {
            Ok(value != 0)
        }
    }
}
