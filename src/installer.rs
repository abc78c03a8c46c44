use crate::{
    archive,
    catalog::ModDescriptor,
    conflict::{self, ConflictResolver},
    error::{FsContext, ModError, ModResult},
    fsutil::{commit_stage, copy_dir, make_stage_dir, prune_empty_dirs, TempFile},
    manifest::ModManifest,
    net::Fetcher,
    plugins,
    status::{write_atomic, StatusStore},
    toggle::{self, copy_files, remove_files, ModEnv, ModReport},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

// Nothing is committed until the conflict guard passes.
pub fn install(
    env: &ModEnv,
    fetcher: &dyn Fetcher,
    statuses: &mut StatusStore,
    descriptor: &ModDescriptor,
    resolver: &mut dyn ConflictResolver,
) -> ModResult<ModReport> {
    let name = validate_name(&descriptor.name)?;
    let game_root = env.require_game_root()?;
    env.paths.ensure()?;

    let url = descriptor.resolve_download_url(fetcher)?;
    let package = TempFile::new(&env.paths.tmp_dir, &format!("{name}.zip"))?;
    fetcher.download_to(&url, package.path())?;

    let mut archive = archive::open(package.path())?;
    let manifest_index = archive::find_manifest(&mut archive)?.ok_or(ModError::ManifestMissing)?;
    let raw_manifest = archive::read_entry_string(&mut archive, manifest_index)?;
    let manifest = ModManifest::parse(&raw_manifest)?;

    let stage = make_stage_dir(&env.paths.tmp_dir, name)?;
    archive::extract_all(&mut archive, stage.path(), Some(manifest_index))?;

    let mut report = ModReport::default();
    conflict::guard(env, statuses, name, resolver, &mut report)?;

    let work = env.paths.working_dir(name);
    commit_stage(stage, &work)?;
    let info = env.paths.manifest_path(name);
    write_atomic(&info, &raw_manifest)?;

    copy_files(&work, game_root, &manifest.files, &mut report)?;
    statuses
        .entry(name)
        .mark_installed(&info, &descriptor.version);
    statuses.save()?;
    Ok(report)
}

// Only the `update` subset is replaced.
pub fn update(
    env: &ModEnv,
    fetcher: &dyn Fetcher,
    statuses: &mut StatusStore,
    descriptor: &ModDescriptor,
) -> ModResult<ModReport> {
    let name = validate_name(&descriptor.name)?;
    if !statuses.is_downloaded(name) {
        return Err(ModError::NotDownloaded(name.to_string()));
    }
    let enabled = statuses.is_enabled(name);
    if enabled {
        env.require_game_root()?;
    }
    env.paths.ensure()?;

    let url = descriptor.resolve_download_url(fetcher)?;
    let package = TempFile::new(&env.paths.tmp_dir, &format!("{name}.zip"))?;
    fetcher.download_to(&url, package.path())?;

    let mut archive = archive::open(package.path())?;
    let manifest_index = archive::find_manifest(&mut archive)?.ok_or(ModError::ManifestMissing)?;
    let raw_manifest = archive::read_entry_string(&mut archive, manifest_index)?;
    let manifest = ModManifest::parse(&raw_manifest)?;

    let mut report = ModReport::default();
    let entries = archive::entry_map(&mut archive)?;
    let stage = make_stage_dir(&env.paths.tmp_dir, name)?;
    let mut refreshed = Vec::new();
    for rel in manifest.update_files() {
        match entries.get(&rel.to_ascii_lowercase()) {
            Some(&index) => {
                archive::extract_entry(&mut archive, index, &stage.path().join(rel))?;
                refreshed.push(rel.clone());
            }
            None => report.skipped.push(rel.clone()),
        }
    }

    let work = env.paths.working_dir(name);
    copy_dir(stage.path(), &work)?;
    drop(stage);
    let info = env.paths.manifest_path(name);
    write_atomic(&info, &raw_manifest)?;

    if enabled {
        copy_files(&work, &env.game_root, &refreshed, &mut report)?;
    }

    let status = statuses.entry(name);
    status.info = info.to_string_lossy().into_owned();
    status.downloaded = true;
    status.version = descriptor.version.clone();
    statuses.save()?;
    Ok(report)
}

pub fn uninstall(env: &ModEnv, statuses: &mut StatusStore, name: &str) -> ModResult<ModReport> {
    if !statuses.contains(name) {
        return Err(ModError::UnknownMod(name.to_string()));
    }
    if let Some(pattern) = env.pattern_for(statuses, name) {
        return plugins::uninstall(env, statuses, name, &pattern);
    }
    let mut report = ModReport::default();

    if statuses.is_enabled(name) {
        match toggle::disable(env, statuses, name) {
            Ok(disabled) => report.absorb(disabled),
            Err(err) => report.warnings.push(format!("disable {name}: {err}")),
        }
    }

    match toggle::stored_manifest(env, statuses, name) {
        Ok(manifest) if env.game_root.is_dir() => {
            if let Err(err) = remove_leftovers(&env.game_root, &manifest, &mut report) {
                report.warnings.push(format!("clean game files of {name}: {err}"));
            }
        }
        Ok(_) => report
            .warnings
            .push("game directory missing, installed files left in place".to_string()),
        Err(err) => report.warnings.push(err.to_string()),
    }

    let work = env.paths.working_dir(name);
    if work.exists() {
        fs::remove_dir_all(&work).with_fs_context(|| format!("remove {}", work.display()))?;
    }
    let mut manifests = vec![env.paths.manifest_path(name)];
    if let Some(status) = statuses.get(name).filter(|status| !status.info.is_empty()) {
        let info = PathBuf::from(&status.info);
        if info.starts_with(&env.paths.info_dir) {
            manifests.push(info);
        }
    }
    for path in manifests {
        if path.is_file() {
            fs::remove_file(&path).with_fs_context(|| format!("remove {}", path.display()))?;
        }
    }

    statuses.entry(name).reset();
    statuses.save()?;
    Ok(report)
}

fn remove_leftovers(game_root: &Path, manifest: &ModManifest, report: &mut ModReport) -> ModResult<()> {
    let leftovers: Vec<&String> = manifest.non_plugin_files().collect();
    remove_files(game_root, leftovers.iter().copied(), report)?;
    for rel in leftovers {
        if let Some(parent) = game_root.join(rel).parent() {
            prune_empty_dirs(parent, game_root);
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> ModResult<&str> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', ':']);
    if bad {
        return Err(ModError::InvalidPackage(format!("unusable mod name {name:?}")));
    }
    Ok(trimmed)
}
