use crate::{
    archive,
    error::{FsContext, ModError, ModResult},
    fsutil::TempFile,
    net::{DownloadApi, Fetcher, PackageKind},
};
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::Read,
    path::Path,
};

pub const LOADER_DIR: &str = "BepInEx";
pub const DEFAULT_VERSION: &str = "5.4.23.3";
pub const DEFAULT_URL: &str =
    "https://github.com/BepInEx/BepInEx/releases/download/v5.4.23.3/BepInEx_win_x64_5.4.23.3.zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderInstall {
    AlreadyInstalled,
    Installed { files: usize },
}

#[derive(Debug, Clone)]
pub struct LoaderSource {
    pub url: String,
    pub version: String,
    pub download_api: Option<String>,
    pub sha256: Option<String>,
}

impl Default for LoaderSource {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            version: DEFAULT_VERSION.to_string(),
            download_api: None,
            sha256: None,
        }
    }
}

impl LoaderSource {
    pub fn resolve_url(&self, fetcher: &dyn Fetcher) -> ModResult<String> {
        match self.download_api.as_deref().filter(|base| !base.trim().is_empty()) {
            Some(base) => Ok(DownloadApi::new(base)
                .resolve(fetcher, PackageKind::BepInEx, None, &self.version)?
                .url),
            None => Ok(self.url.clone()),
        }
    }
}

pub fn is_installed(game_root: &Path) -> bool {
    game_root.join(LOADER_DIR).is_dir()
}

pub fn install(
    fetcher: &dyn Fetcher,
    game_root: &Path,
    temp_root: &Path,
    source: &LoaderSource,
) -> ModResult<LoaderInstall> {
    if !game_root.is_dir() {
        return Err(ModError::GameNotFound);
    }
    if is_installed(game_root) {
        return Ok(LoaderInstall::AlreadyInstalled);
    }

    let url = source.resolve_url(fetcher)?;
    let package = TempFile::new(temp_root, "bepinex.zip")?;
    fetcher.download_to(&url, package.path())?;
    if let Some(expected) = source.sha256.as_deref() {
        verify_sha256(package.path(), expected)?;
    }

    let mut zip = archive::open(package.path())?;
    let files = archive::extract_all(&mut zip, game_root, None)?;
    Ok(LoaderInstall::Installed { files })
}

pub fn uninstall(game_root: &Path) -> ModResult<bool> {
    let dir = game_root.join(LOADER_DIR);
    if !dir.is_dir() {
        return Ok(false);
    }
    fs::remove_dir_all(&dir).with_fs_context(|| format!("remove {}", dir.display()))?;
    Ok(true)
}

fn verify_sha256(path: &Path, expected: &str) -> ModResult<()> {
    let mut file = File::open(path).fs_context("open loader for checksum")?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer).fs_context("read loader for checksum")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected.trim().to_lowercase() {
        return Err(ModError::InvalidPackage(format!(
            "checksum mismatch for {}",
            path.display()
        )));
    }
    Ok(())
}
