use crate::{
    conflict::{self, ConflictResolver},
    error::{FsContext, ModError, ModResult},
    manifest::{ModManifest, PLUGIN_PREFIX},
    plugins,
    status::{ModPaths, StatusStore},
};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct ModEnv {
    pub paths: ModPaths,
    pub game_root: PathBuf,
    pub patterns: HashMap<String, String>,
}

impl ModEnv {
    pub fn new(data_dir: PathBuf, game_root: PathBuf) -> Self {
        Self {
            paths: ModPaths::new(&data_dir),
            game_root,
            patterns: HashMap::new(),
        }
    }

    // Loaded mod list first, then the pattern recorded at install.
    pub fn pattern_for(&self, statuses: &StatusStore, name: &str) -> Option<String> {
        self.patterns
            .get(name)
            .cloned()
            .or_else(|| statuses.get(name).and_then(|status| status.file_match.clone()))
            .filter(|pattern| !pattern.trim().is_empty())
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.game_root.join(PLUGIN_PREFIX.trim_end_matches('/'))
    }

    pub fn require_game_root(&self) -> ModResult<&Path> {
        if self.game_root.is_dir() {
            Ok(&self.game_root)
        } else {
            Err(ModError::GameNotFound)
        }
    }
}

// Paths are manifest-relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModReport {
    pub copied: Vec<String>,
    pub removed: Vec<String>,
    pub skipped: Vec<String>,
    pub disabled_others: Vec<String>,
    pub warnings: Vec<String>,
}

impl ModReport {
    pub fn absorb(&mut self, other: ModReport) {
        self.copied.extend(other.copied);
        self.removed.extend(other.removed);
        self.skipped.extend(other.skipped);
        self.disabled_others.extend(other.disabled_others);
        self.warnings.extend(other.warnings);
    }
}

pub fn stored_manifest(env: &ModEnv, statuses: &StatusStore, name: &str) -> ModResult<ModManifest> {
    let path = statuses
        .get(name)
        .map(|status| status.info.as_str())
        .filter(|info| !info.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| env.paths.manifest_path(name));
    if !path.is_file() {
        return Err(ModError::InvalidManifest(format!(
            "no stored manifest for {name}"
        )));
    }
    ModManifest::load(&path)
}

pub fn enable(
    env: &ModEnv,
    statuses: &mut StatusStore,
    name: &str,
    resolver: &mut dyn ConflictResolver,
) -> ModResult<ModReport> {
    if let Some(pattern) = env.pattern_for(statuses, name) {
        return plugins::enable(env, statuses, name, &pattern, resolver);
    }
    let status = statuses
        .get(name)
        .ok_or_else(|| ModError::UnknownMod(name.to_string()))?;
    if !status.downloaded {
        return Err(ModError::NotDownloaded(name.to_string()));
    }
    let game_root = env.require_game_root()?;
    let manifest = stored_manifest(env, statuses, name)?;

    let mut report = ModReport::default();
    conflict::guard(env, statuses, name, resolver, &mut report)?;

    copy_files(
        &env.paths.working_dir(name),
        game_root,
        manifest.plugin_files(),
        &mut report,
    )?;
    statuses.entry(name).set_enabled(name, true)?;
    statuses.save()?;
    Ok(report)
}

pub fn disable(env: &ModEnv, statuses: &mut StatusStore, name: &str) -> ModResult<ModReport> {
    if let Some(pattern) = env.pattern_for(statuses, name) {
        return plugins::disable(env, statuses, name, &pattern);
    }
    if !statuses.contains(name) {
        return Err(ModError::UnknownMod(name.to_string()));
    }
    let game_root = env.require_game_root()?;
    let manifest = stored_manifest(env, statuses, name)?;

    let mut report = ModReport::default();
    remove_files(game_root, manifest.plugin_files(), &mut report)?;
    statuses.entry(name).set_enabled(name, false)?;
    statuses.save()?;
    Ok(report)
}

pub fn copy_files<'a>(
    source_root: &Path,
    dest_root: &Path,
    files: impl IntoIterator<Item = &'a String>,
    report: &mut ModReport,
) -> ModResult<()> {
    for rel in files {
        let source = source_root.join(rel);
        if !source.is_file() {
            report.skipped.push(rel.clone());
            continue;
        }
        let target = dest_root.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_fs_context(|| format!("create {}", parent.display()))?;
        }
        fs::copy(&source, &target).with_fs_context(|| format!("copy {rel}"))?;
        report.copied.push(rel.clone());
    }
    Ok(())
}

pub fn remove_files<'a>(
    root: &Path,
    files: impl IntoIterator<Item = &'a String>,
    report: &mut ModReport,
) -> ModResult<()> {
    for rel in files {
        match fs::remove_file(root.join(rel)) {
            Ok(()) => report.removed.push(rel.clone()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).with_fs_context(|| format!("delete {rel}")),
        }
    }
    Ok(())
}
