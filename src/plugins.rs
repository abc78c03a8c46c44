use crate::{
    catalog::ModDescriptor,
    conflict::{self, ConflictResolver},
    error::{FsContext, ModError, ModResult},
    net::{latest_release_asset, Fetcher},
    status::StatusStore,
    toggle::{ModEnv, ModReport},
};
use regex::{Regex, RegexBuilder};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub const DISABLED_SUFFIX: &str = ".disabled";

// Literal substring first, then regex syntax or `*`/`?` wildcards. Case-insensitive.
#[derive(Debug, Clone)]
pub struct PluginMatcher {
    literal: String,
    wildcard: Option<Regex>,
    pattern: Option<Regex>,
}

const REGEX_SYNTAX: [char; 10] = ['^', '$', '(', ')', '[', ']', '{', '}', '|', '\\'];

impl PluginMatcher {
    pub fn new(pattern: &str) -> Self {
        let pattern = pattern.trim();
        let is_regex = pattern.contains(REGEX_SYNTAX) || pattern.contains(".*");
        let wildcard = if !is_regex && pattern.contains(['*', '?']) {
            let mut source = String::from("^");
            for ch in pattern.chars() {
                match ch {
                    '*' => source.push_str(".*"),
                    '?' => source.push('.'),
                    other => source.push_str(&regex::escape(&other.to_string())),
                }
            }
            source.push('$');
            case_insensitive(&source)
        } else {
            None
        };
        Self {
            literal: pattern.to_lowercase(),
            wildcard,
            pattern: if is_regex { case_insensitive(pattern) } else { None },
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        let name = strip_disabled(file_name);
        if !self.literal.is_empty() && name.to_lowercase().contains(&self.literal) {
            return true;
        }
        if let Some(wildcard) = &self.wildcard {
            if wildcard.is_match(name) {
                return true;
            }
        }
        self.pattern
            .as_ref()
            .map(|pattern| pattern.is_match(name))
            .unwrap_or(false)
    }
}

fn case_insensitive(source: &str) -> Option<Regex> {
    if source.is_empty() {
        return None;
    }
    RegexBuilder::new(source).case_insensitive(true).build().ok()
}

fn strip_disabled(file_name: &str) -> &str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(DISABLED_SUFFIX) {
        &file_name[..file_name.len() - DISABLED_SUFFIX.len()]
    } else {
        file_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    Missing,
    Enabled(PathBuf),
    Disabled(PathBuf),
}

impl PluginState {
    pub fn path(&self) -> Option<&Path> {
        match self {
            PluginState::Missing => None,
            PluginState::Enabled(path) | PluginState::Disabled(path) => Some(path),
        }
    }
}

// `Foo.dll` enabled, `Foo.dll.disabled` disabled. Enabled wins, then sort order.
pub fn detect(plugin_dir: &Path, matcher: &PluginMatcher) -> ModResult<PluginState> {
    let entries = match fs::read_dir(plugin_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(PluginState::Missing),
        Err(err) => return Err(err).with_fs_context(|| format!("read {}", plugin_dir.display())),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.fs_context("read plugin entry")?;
        if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let mut disabled = None;
    for name in names {
        let lower = name.to_ascii_lowercase();
        if !matcher.matches(&name) {
            continue;
        }
        if lower.ends_with(".dll") {
            return Ok(PluginState::Enabled(plugin_dir.join(name)));
        }
        if disabled.is_none() && lower.ends_with(".dll.disabled") {
            disabled = Some(plugin_dir.join(name));
        }
    }
    Ok(disabled.map(PluginState::Disabled).unwrap_or(PluginState::Missing))
}

pub fn set_enabled(plugin_dir: &Path, matcher: &PluginMatcher, enable: bool) -> ModResult<PluginState> {
    match detect(plugin_dir, matcher)? {
        PluginState::Missing => Err(ModError::NotDownloaded(format!(
            "no plugin in {} matches",
            plugin_dir.display()
        ))),
        PluginState::Disabled(path) if enable => {
            let name = path.to_string_lossy();
            let target = PathBuf::from(strip_disabled(&name));
            fs::rename(&path, &target)
                .with_fs_context(|| format!("enable {}", path.display()))?;
            Ok(PluginState::Enabled(target))
        }
        PluginState::Enabled(path) if !enable => {
            let target = PathBuf::from(format!("{}{DISABLED_SUFFIX}", path.display()));
            if target.exists() {
                fs::remove_file(&target)
                    .with_fs_context(|| format!("remove {}", target.display()))?;
            }
            fs::rename(&path, &target)
                .with_fs_context(|| format!("disable {}", path.display()))?;
            Ok(PluginState::Disabled(target))
        }
        unchanged => Ok(unchanged),
    }
}

pub fn sync_status(statuses: &mut StatusStore, name: &str, pattern: &str, state: &PluginState) {
    let status = statuses.entry(name);
    status.file_match = Some(pattern.to_string());
    status.downloaded = !matches!(state, PluginState::Missing);
    status.installed = matches!(state, PluginState::Enabled(_));
    status.info = state
        .path()
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_default();
}

fn file_label(path: Option<&Path>) -> String {
    path.and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn resolve_plugin_asset(descriptor: &ModDescriptor, fetcher: &dyn Fetcher) -> ModResult<(String, String)> {
    let url = descriptor.download_url.trim();
    if !url.is_empty() {
        let file_name = url
            .split(['?', '#'])
            .next()
            .and_then(|base| base.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.dll", descriptor.name));
        return Ok((url.to_string(), file_name));
    }
    match descriptor.repo.as_deref().filter(|repo| !repo.trim().is_empty()) {
        Some(repo) => {
            let asset = latest_release_asset(fetcher, repo, &[".dll"])?;
            Ok((asset.url, asset.name))
        }
        None => Err(ModError::Network(format!(
            "{} has no download url",
            descriptor.name
        ))),
    }
}

pub fn install(
    env: &ModEnv,
    fetcher: &dyn Fetcher,
    statuses: &mut StatusStore,
    descriptor: &ModDescriptor,
    pattern: &str,
    resolver: &mut dyn ConflictResolver,
) -> ModResult<ModReport> {
    env.require_game_root()?;
    let name = descriptor.name.as_str();
    let matcher = PluginMatcher::new(pattern);
    let (url, file_name) = resolve_plugin_asset(descriptor, fetcher)?;
    if file_name.contains(['/', '\\']) || !matcher.matches(&file_name) {
        return Err(ModError::InvalidPackage(format!(
            "{file_name} does not match {pattern}"
        )));
    }

    let mut report = ModReport::default();
    conflict::guard(env, statuses, name, resolver, &mut report)?;

    let plugin_dir = env.plugin_dir();
    fs::create_dir_all(&plugin_dir).fs_context("create plugin dir")?;
    let target = plugin_dir.join(&file_name);
    let partial = plugin_dir.join(format!("{file_name}.part"));
    if let Err(err) = fetcher.download_to(&url, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    if let Some(previous) = detect(&plugin_dir, &matcher)?.path() {
        fs::remove_file(previous).with_fs_context(|| format!("remove {}", previous.display()))?;
    }
    fs::rename(&partial, &target).with_fs_context(|| format!("write {}", target.display()))?;
    report.copied.push(file_name);

    let state = PluginState::Enabled(target);
    sync_status(statuses, name, pattern, &state);
    statuses.entry(name).version = descriptor.version.clone();
    statuses.save()?;
    Ok(report)
}

pub fn enable(
    env: &ModEnv,
    statuses: &mut StatusStore,
    name: &str,
    pattern: &str,
    resolver: &mut dyn ConflictResolver,
) -> ModResult<ModReport> {
    env.require_game_root()?;
    let matcher = PluginMatcher::new(pattern);
    let plugin_dir = env.plugin_dir();
    if detect(&plugin_dir, &matcher)? == PluginState::Missing {
        return Err(ModError::NotDownloaded(name.to_string()));
    }

    let mut report = ModReport::default();
    conflict::guard(env, statuses, name, resolver, &mut report)?;
    let state = set_enabled(&plugin_dir, &matcher, true)?;
    report.copied.push(file_label(state.path()));
    sync_status(statuses, name, pattern, &state);
    statuses.save()?;
    Ok(report)
}

pub fn disable(
    env: &ModEnv,
    statuses: &mut StatusStore,
    name: &str,
    pattern: &str,
) -> ModResult<ModReport> {
    env.require_game_root()?;
    let matcher = PluginMatcher::new(pattern);
    let state = set_enabled(&env.plugin_dir(), &matcher, false)?;
    let mut report = ModReport::default();
    report.removed.push(file_label(state.path()));
    sync_status(statuses, name, pattern, &state);
    statuses.save()?;
    Ok(report)
}

pub fn uninstall(
    env: &ModEnv,
    statuses: &mut StatusStore,
    name: &str,
    pattern: &str,
) -> ModResult<ModReport> {
    let mut report = ModReport::default();
    if env.game_root.is_dir() {
        let matcher = PluginMatcher::new(pattern);
        if let Some(path) = detect(&env.plugin_dir(), &matcher)?.path() {
            fs::remove_file(path).with_fs_context(|| format!("remove {}", path.display()))?;
            report.removed.push(file_label(Some(path)));
        }
    } else {
        report
            .warnings
            .push("game directory missing, plugin left in place".to_string());
    }
    statuses.entry(name).reset();
    statuses.save()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictChoice, FixedChoice};
    use crate::net::testing::FakeFetcher;

    fn touch(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), name).unwrap();
    }

    #[test]
    fn literal_then_wildcard_then_regex() {
        let literal = PluginMatcher::new("TownOfHost");
        assert!(literal.matches("TownOfHost-v5.dll"));
        assert!(literal.matches("townofhost.dll.disabled"));

        let wildcard = PluginMatcher::new("Sheriff*.dll");
        assert!(wildcard.matches("SheriffMod_1.2.dll"));
        assert!(!wildcard.matches("MySheriff.dll"));

        let regex = PluginMatcher::new(r"^Other(Roles)?\.dll$");
        assert!(regex.matches("OtherRoles.dll"));
        assert!(regex.matches("other.dll"));
        assert!(!regex.matches("OtherRolesExtra.dll"));
    }

    #[test]
    fn enabled_file_wins_over_disabled() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Foo.dll.disabled");
        touch(dir.path(), "Foo.dll");
        touch(dir.path(), "Unrelated.dll");

        let state = detect(dir.path(), &PluginMatcher::new("foo")).unwrap();
        assert_eq!(state, PluginState::Enabled(dir.path().join("Foo.dll")));
    }

    #[test]
    fn toggling_renames_the_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Foo.dll");
        let matcher = PluginMatcher::new("Foo");

        let state = set_enabled(dir.path(), &matcher, false).unwrap();
        assert_eq!(state, PluginState::Disabled(dir.path().join("Foo.dll.disabled")));
        assert!(!dir.path().join("Foo.dll").exists());

        let state = set_enabled(dir.path(), &matcher, true).unwrap();
        assert_eq!(state, PluginState::Enabled(dir.path().join("Foo.dll")));
        assert!(!dir.path().join("Foo.dll.disabled").exists());
    }

    #[test]
    fn missing_plugin_dir_is_missing_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = detect(&dir.path().join("nope"), &PluginMatcher::new("Foo")).unwrap();
        assert_eq!(state, PluginState::Missing);
    }

    #[test]
    fn install_and_toggle_through_env() {
        let root = tempfile::tempdir().unwrap();
        let mut env = ModEnv::new(root.path().join("data"), root.path().join("game"));
        env.patterns.insert("Foo".to_string(), "Foo*.dll".to_string());
        fs::create_dir_all(&env.game_root).unwrap();
        let mut statuses = StatusStore::empty(&env.paths.status_file);
        let fetcher =
            FakeFetcher::default().with("https://x/dl/Foo-2.dll?sig=1", "dll bytes");
        let descriptor = ModDescriptor {
            name: "Foo".to_string(),
            version: "2".to_string(),
            download_url: "https://x/dl/Foo-2.dll?sig=1".to_string(),
            file_match: Some("Foo*.dll".to_string()),
            ..ModDescriptor::default()
        };
        let mut resolver = FixedChoice(ConflictChoice::Abort);

        install(&env, &fetcher, &mut statuses, &descriptor, "Foo*.dll", &mut resolver).unwrap();
        assert!(env.plugin_dir().join("Foo-2.dll").is_file());
        assert!(statuses.is_enabled("Foo"));
        assert_eq!(statuses.get("Foo").unwrap().version, "2");

        crate::toggle::disable(&env, &mut statuses, "Foo").unwrap();
        assert!(env.plugin_dir().join("Foo-2.dll.disabled").is_file());
        assert!(!statuses.is_enabled("Foo"));
        assert!(statuses.is_downloaded("Foo"));

        crate::toggle::enable(&env, &mut statuses, "Foo", &mut resolver).unwrap();
        assert!(env.plugin_dir().join("Foo-2.dll").is_file());

        uninstall(&env, &mut statuses, "Foo", "Foo*.dll").unwrap();
        assert!(!env.plugin_dir().join("Foo-2.dll").exists());
        assert!(!statuses.is_downloaded("Foo"));
    }

    #[test]
    fn recorded_pattern_drives_toggling_without_mod_list() {
        let root = tempfile::tempdir().unwrap();
        let mut env = ModEnv::new(root.path().join("data"), root.path().join("game"));
        env.paths.ensure().unwrap();
        env.patterns.insert("Foo".to_string(), "Foo*.dll".to_string());
        fs::create_dir_all(&env.game_root).unwrap();
        let mut statuses = StatusStore::empty(&env.paths.status_file);
        let fetcher = FakeFetcher::default().with("https://x/Foo-1.dll", "dll bytes");
        let descriptor = ModDescriptor {
            name: "Foo".to_string(),
            version: "1".to_string(),
            download_url: "https://x/Foo-1.dll".to_string(),
            file_match: Some("Foo*.dll".to_string()),
            ..ModDescriptor::default()
        };
        install(
            &env,
            &fetcher,
            &mut statuses,
            &descriptor,
            "Foo*.dll",
            &mut FixedChoice(ConflictChoice::Abort),
        )
        .unwrap();

        env.patterns.clear();
        let mut statuses = StatusStore::load(&env.paths.status_file).unwrap();
        crate::toggle::disable(&env, &mut statuses, "Foo").unwrap();
        assert!(env.plugin_dir().join("Foo-1.dll.disabled").is_file());
        assert!(!env.plugin_dir().join("Foo-1.dll").exists());
        assert!(!statuses.is_enabled("Foo"));

        crate::toggle::enable(
            &env,
            &mut statuses,
            "Foo",
            &mut FixedChoice(ConflictChoice::Abort),
        )
        .unwrap();
        assert!(env.plugin_dir().join("Foo-1.dll").is_file());

        let manifest = serde_json::json!({ "files": ["BepInEx/plugins/Bar.dll"] }).to_string();
        let info = env.paths.manifest_path("Bar");
        crate::status::write_atomic(&info, &manifest).unwrap();
        let work = env.paths.working_dir("Bar").join("BepInEx/plugins");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("Bar.dll"), "bar").unwrap();
        let bar = statuses.entry("Bar");
        bar.mark_installed(&info, "1");
        bar.installed = false;

        let report = crate::toggle::enable(
            &env,
            &mut statuses,
            "Bar",
            &mut FixedChoice(ConflictChoice::DisableOthers),
        )
        .unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(report.disabled_others, vec!["Foo".to_string()]);
        assert!(!statuses.is_enabled("Foo"));
        assert!(statuses.is_enabled("Bar"));
        assert!(env.plugin_dir().join("Foo-1.dll.disabled").is_file());

        let report = crate::installer::uninstall(&env, &mut statuses, "Foo").unwrap();
        assert!(report.warnings.is_empty());
        assert!(!env.plugin_dir().join("Foo-1.dll.disabled").exists());
        assert!(env.plugin_dir().join("Bar.dll").is_file());
        assert!(!statuses.is_downloaded("Foo"));
        assert_eq!(statuses.get("Foo").unwrap().file_match, None);
    }

    #[test]
    fn asset_must_match_pattern() {
        let root = tempfile::tempdir().unwrap();
        let env = ModEnv::new(root.path().join("data"), root.path().join("game"));
        fs::create_dir_all(&env.game_root).unwrap();
        let mut statuses = StatusStore::empty(&env.paths.status_file);
        let descriptor = ModDescriptor {
            name: "Foo".to_string(),
            download_url: "https://x/Bar.dll".to_string(),
            ..ModDescriptor::default()
        };
        let err = install(
            &env,
            &FakeFetcher::default(),
            &mut statuses,
            &descriptor,
            "Foo*.dll",
            &mut FixedChoice(ConflictChoice::Proceed),
        )
        .unwrap_err();
        assert!(matches!(err, ModError::InvalidPackage(_)));
    }
}
