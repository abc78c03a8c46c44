use crate::{
    bepinex::{self, LoaderInstall},
    catalog::{self, ModDescriptor, ModView},
    config::AppConfig,
    conflict::{ConflictChoice, ConflictResolver, FixedChoice},
    error::{ModError, ModResult},
    game::{self, GamePaths},
    installer,
    log::Logger,
    net::{Fetcher, HttpFetcher},
    plugins,
    regions::{self, PresetServer, RegionStore, REGION_WARN_LIMIT},
    status::StatusStore,
    toggle::{self, ModEnv, ModReport},
};
use anyhow::{Context, Result};
use std::{collections::VecDeque, path::PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    StatusChanged(String),
    CatalogRefreshed { mods: usize, dropped: usize },
    ModChanged(String),
    RegionsChanged,
    LoaderChanged { installed: bool },
    GameLaunched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionField {
    Name,
    PingServer,
    Port,
    TranslateName,
}

impl RegionField {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "name" => Some(RegionField::Name),
            "ping" | "ping-server" | "pingserver" | "host" => Some(RegionField::PingServer),
            "port" => Some(RegionField::Port),
            "translate" | "translate-name" | "translatename" => Some(RegionField::TranslateName),
            _ => None,
        }
    }
}

pub struct App {
    pub config: AppConfig,
    pub game: GamePaths,
    pub env: ModEnv,
    pub statuses: StatusStore,
    pub catalog: Vec<ModDescriptor>,
    pub regions: Option<RegionStore>,
    pub presets: Vec<PresetServer>,
    pub status: String,
    pub logger: Logger,
    events: VecDeque<AppEvent>,
    fetcher: Box<dyn Fetcher>,
}

impl App {
    pub fn initialize() -> Result<Self> {
        let config = AppConfig::load_or_create()?;
        let fetcher = HttpFetcher::new(config.github_token.clone());
        Self::with_parts(config, Box::new(fetcher))
    }

    pub fn with_parts(mut config: AppConfig, fetcher: Box<dyn Fetcher>) -> Result<Self> {
        let mut logger = Logger::new(Some(config.log_path()));
        let game = match game::detect_paths(config.game_root(), config.user_dir()) {
            Ok(paths) => paths,
            Err(err) => {
                // Stored paths went stale; fall back to auto-detect.
                logger.warn(format!("{err:#}"));
                let paths = game::detect_paths(None, config.user_dir()).unwrap_or_default();
                config.game_root = paths.game_root.clone().unwrap_or_default();
                config.save().context("save detected game root")?;
                paths
            }
        };

        let env = ModEnv::new(
            config.data_dir.clone(),
            game.game_root.clone().unwrap_or_default(),
        );
        let (statuses, load_error) = StatusStore::load_or_empty(&env.paths.status_file);
        match load_error {
            Some(err) => logger.warn(format!("status.json unreadable, starting empty: {err}")),
            None => logger.info(format!("Loaded {} mod records", statuses.len())),
        }

        let regions = game.region_file().map(|path| {
            let (store, recovered) = RegionStore::load_or_recover(&path);
            if let Some(reason) = recovered {
                logger.warn(format!("regionInfo.json unreadable: {reason}"));
            }
            store
        });

        let status = match &game.game_root {
            Some(root) => format!("{} found at {}", game::GAME_NAME, root.display()),
            None => format!("{} not found; set game_root in config.json", game::GAME_NAME),
        };

        Ok(Self {
            config,
            game,
            env,
            statuses,
            catalog: Vec::new(),
            regions,
            presets: regions::default_presets(),
            status,
            logger,
            events: VecDeque::new(),
            fetcher,
        })
    }

    pub fn drain_events(&mut self) -> Vec<AppEvent> {
        self.events.drain(..).collect()
    }

    fn set_status(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.logger.info(message.clone());
        self.status = message.clone();
        self.events.push_back(AppEvent::StatusChanged(message));
    }

    fn fail(&mut self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.logger.error(message.clone());
        self.status = message.clone();
        self.events.push_back(AppEvent::StatusChanged(message));
        false
    }

    pub fn refresh_catalog(&mut self) -> bool {
        let url = self.config.mod_list_url.clone();
        let (list, dropped) = match catalog::fetch_catalog(self.fetcher.as_ref(), &url) {
            Ok(result) => result,
            Err(err) => return self.fail(format!("Mod list download failed: {err}")),
        };
        if dropped > 0 {
            self.logger
                .warn(format!("Mod list: ignored {dropped} duplicate or nameless entries"));
        }

        self.env.patterns = list
            .iter()
            .filter(|descriptor| descriptor.uses_file_match())
            .filter_map(|descriptor| {
                descriptor
                    .file_match
                    .clone()
                    .map(|pattern| (descriptor.name.clone(), pattern))
            })
            .collect();
        if catalog::reconcile(&mut self.statuses, &list) {
            if let Err(err) = self.statuses.save() {
                self.logger.warn(format!("save status.json: {err}"));
            }
        }

        let mods = list.len();
        self.catalog = list;
        self.events
            .push_back(AppEvent::CatalogRefreshed { mods, dropped });
        self.set_status(format!("Loaded {mods} mods"));
        true
    }

    pub fn mod_views(&self) -> Vec<ModView> {
        catalog::views(&self.statuses, &self.catalog)
    }

    fn descriptor(&mut self, name: &str) -> Option<ModDescriptor> {
        let found = self
            .catalog
            .iter()
            .find(|descriptor| descriptor.name == name)
            .cloned();
        if found.is_none() {
            self.fail(format!("{name} is not in the mod list"));
        }
        found
    }

    fn finish_mod_op(&mut self, verb: &str, name: &str, result: ModResult<ModReport>) -> bool {
        match result {
            Ok(report) => {
                self.log_report(name, &report);
                self.events.push_back(AppEvent::ModChanged(name.to_string()));
                self.set_status(format!("{verb} {name}"));
                true
            }
            Err(ModError::UserCancelled) => {
                self.set_status(format!("{verb} {name}: cancelled"));
                false
            }
            Err(err) => self.fail(format!("{verb} {name} failed: {err}")),
        }
    }

    fn log_report(&mut self, name: &str, report: &ModReport) {
        for other in &report.disabled_others {
            self.logger.info(format!("{name}: disabled {other}"));
        }
        if !report.copied.is_empty() {
            self.logger
                .info(format!("{name}: copied {} file(s)", report.copied.len()));
        }
        if !report.removed.is_empty() {
            self.logger
                .info(format!("{name}: removed {} file(s)", report.removed.len()));
        }
        for skipped in &report.skipped {
            self.logger.warn(format!("{name}: skipped missing file {skipped}"));
        }
        for warning in &report.warnings {
            self.logger.warn(format!("{name}: {warning}"));
        }
    }

    pub fn install_mod(&mut self, name: &str, resolver: &mut dyn ConflictResolver) -> bool {
        let Some(descriptor) = self.descriptor(name) else {
            return false;
        };
        self.logger.info(format!("Installing {name} {}", descriptor.version));
        let result = match descriptor.file_match.as_deref().filter(|_| descriptor.uses_file_match()) {
            Some(pattern) => plugins::install(
                &self.env,
                self.fetcher.as_ref(),
                &mut self.statuses,
                &descriptor,
                pattern,
                resolver,
            ),
            None => installer::install(
                &self.env,
                self.fetcher.as_ref(),
                &mut self.statuses,
                &descriptor,
                resolver,
            ),
        };
        self.finish_mod_op("Installed", name, result)
    }

    pub fn update_mod(&mut self, name: &str) -> bool {
        let Some(descriptor) = self.descriptor(name) else {
            return false;
        };
        self.logger.info(format!("Updating {name} to {}", descriptor.version));
        let result = match descriptor.file_match.as_deref().filter(|_| descriptor.uses_file_match()) {
            Some(pattern) => self.update_plugin(&descriptor, pattern),
            None => installer::update(
                &self.env,
                self.fetcher.as_ref(),
                &mut self.statuses,
                &descriptor,
            ),
        };
        self.finish_mod_op("Updated", name, result)
    }

    fn update_plugin(&mut self, descriptor: &ModDescriptor, pattern: &str) -> ModResult<ModReport> {
        if !self.statuses.is_downloaded(&descriptor.name) {
            return Err(ModError::NotDownloaded(descriptor.name.clone()));
        }
        let was_enabled = self.statuses.is_enabled(&descriptor.name);
        let mut report = plugins::install(
            &self.env,
            self.fetcher.as_ref(),
            &mut self.statuses,
            descriptor,
            pattern,
            &mut FixedChoice(ConflictChoice::Proceed),
        )?;
        if !was_enabled {
            report.absorb(plugins::disable(
                &self.env,
                &mut self.statuses,
                &descriptor.name,
                pattern,
            )?);
        }
        Ok(report)
    }

    pub fn install_or_update(&mut self, name: &str, resolver: &mut dyn ConflictResolver) -> bool {
        let has_update = self
            .mod_views()
            .iter()
            .any(|view| view.name == name && view.has_update);
        if has_update {
            self.update_mod(name)
        } else {
            self.install_mod(name, resolver)
        }
    }

    pub fn enable_mod(&mut self, name: &str, resolver: &mut dyn ConflictResolver) -> bool {
        let result = toggle::enable(&self.env, &mut self.statuses, name, resolver);
        self.finish_mod_op("Enabled", name, result)
    }

    pub fn disable_mod(&mut self, name: &str) -> bool {
        let result = toggle::disable(&self.env, &mut self.statuses, name);
        self.finish_mod_op("Disabled", name, result)
    }

    pub fn toggle_mod(&mut self, name: &str, resolver: &mut dyn ConflictResolver) -> bool {
        if self.statuses.is_enabled(name) {
            self.disable_mod(name)
        } else {
            self.enable_mod(name, resolver)
        }
    }

    pub fn uninstall_mod(&mut self, name: &str) -> bool {
        let result = installer::uninstall(&self.env, &mut self.statuses, name);
        self.finish_mod_op("Uninstalled", name, result)
    }

    pub fn game_root(&self) -> Option<PathBuf> {
        self.game.game_root.clone()
    }

    pub fn loader_installed(&self) -> bool {
        self.game
            .game_root
            .as_deref()
            .map(bepinex::is_installed)
            .unwrap_or(false)
    }

    pub fn should_prompt_loader(&self) -> bool {
        !self.config.suppress_bepinex_prompt
            && self.game.game_root.is_some()
            && !self.loader_installed()
    }

    pub fn install_loader(&mut self) -> bool {
        let Some(root) = self.game_root() else {
            return self.fail(format!("Install BepInEx failed: {}", ModError::GameNotFound));
        };
        let source = self.config.loader_source();
        self.logger
            .info(format!("Installing BepInEx {} into {}", source.version, root.display()));
        match bepinex::install(
            self.fetcher.as_ref(),
            &root,
            &self.env.paths.tmp_dir,
            &source,
        ) {
            Ok(LoaderInstall::AlreadyInstalled) => {
                self.set_status("BepInEx is already installed");
                true
            }
            Ok(LoaderInstall::Installed { files }) => {
                self.events
                    .push_back(AppEvent::LoaderChanged { installed: true });
                self.set_status(format!("Installed BepInEx ({files} files)"));
                true
            }
            Err(err) => self.fail(format!("Install BepInEx failed: {err}")),
        }
    }

    pub fn uninstall_loader(&mut self) -> bool {
        let Some(root) = self.game_root() else {
            return self.fail(format!("Uninstall BepInEx failed: {}", ModError::GameNotFound));
        };
        match bepinex::uninstall(&root) {
            Ok(true) => {
                self.events
                    .push_back(AppEvent::LoaderChanged { installed: false });
                self.set_status("Uninstalled BepInEx");
                true
            }
            Ok(false) => {
                self.set_status("BepInEx is not installed");
                true
            }
            Err(err) => self.fail(format!("Uninstall BepInEx failed: {err}")),
        }
    }

    pub fn launch_game(&mut self) -> bool {
        match game::launch() {
            Ok(opener) => {
                self.logger
                    .info(format!("Opened {} with {opener}", game::launch_uri()));
                self.events.push_back(AppEvent::GameLaunched);
                self.set_status(format!("Launching {}", game::GAME_NAME));
                true
            }
            Err(err) => self.fail(format!("Launch failed: {err:#}")),
        }
    }

    pub fn refresh_presets(&mut self) -> bool {
        let url = self.config.preset_servers_url.clone();
        let (presets, fallback) = regions::fetch_presets(self.fetcher.as_ref(), &url);
        self.presets = presets;
        match fallback {
            Some(reason) => {
                self.logger
                    .warn(format!("Preset servers unavailable, using built-in list: {reason}"));
                false
            }
            None => {
                self.logger
                    .info(format!("Loaded {} preset servers", self.presets.len()));
                true
            }
        }
    }

    fn edit_regions<T>(
        &mut self,
        action: &str,
        edit: impl FnOnce(&mut RegionStore) -> Result<T>,
    ) -> Option<T> {
        let Some(store) = self.regions.as_mut() else {
            self.fail(format!("{action} failed: game user data directory not found"));
            return None;
        };
        let outcome = edit(&mut *store).and_then(|value| store.save().map(|_| value));
        let too_many = store.too_many();
        match outcome {
            Ok(value) => {
                if too_many {
                    self.logger.warn(format!(
                        "More than {REGION_WARN_LIMIT} regions; the game may not list them all"
                    ));
                }
                self.events.push_back(AppEvent::RegionsChanged);
                Some(value)
            }
            Err(err) => {
                self.fail(format!("{action} failed: {err:#}"));
                None
            }
        }
    }

    pub fn add_region(&mut self, name: &str) -> bool {
        let name = if name.trim().is_empty() {
            "New Region"
        } else {
            name.trim()
        };
        match self.edit_regions("Add region", |store| Ok(store.add_default(name))) {
            Some(index) => {
                self.set_status(format!("Added region {name} at {index}"));
                true
            }
            None => false,
        }
    }

    pub fn add_preset_regions(&mut self, indices: &[usize]) -> bool {
        let chosen: Vec<PresetServer> = if indices.is_empty() {
            self.presets.clone()
        } else {
            indices
                .iter()
                .filter_map(|index| self.presets.get(*index).cloned())
                .collect()
        };
        if chosen.is_empty() {
            return self.fail("Add presets failed: no matching preset");
        }
        match self.edit_regions("Add presets", |store| Ok(store.add_presets(&chosen))) {
            Some(count) => {
                self.set_status(format!("Added {count} preset region(s)"));
                true
            }
            None => false,
        }
    }

    pub fn remove_regions(&mut self, indices: &[usize]) -> bool {
        match self.edit_regions("Remove regions", |store| Ok(store.remove(indices))) {
            Some(removed) if removed.is_empty() => {
                self.set_status("No region removed");
                false
            }
            Some(removed) => {
                self.set_status(format!("Removed {}", removed.join(", ")));
                true
            }
            None => false,
        }
    }

    pub fn move_region(&mut self, from: usize, insert_at: usize) -> bool {
        match self.edit_regions("Move region", |store| Ok(store.move_region(from, insert_at)?)) {
            Some(Some(index)) => {
                self.set_status(format!("Moved region {from} to {index}"));
                true
            }
            Some(None) => {
                self.set_status("Region order unchanged");
                true
            }
            None => false,
        }
    }

    pub fn select_region(&mut self, index: usize) -> bool {
        match self.edit_regions("Select region", |store| Ok(store.select(index)?)) {
            Some(()) => {
                self.set_status(format!("Selected region {index}"));
                true
            }
            None => false,
        }
    }

    pub fn set_region_field(&mut self, index: usize, field: RegionField, value: &str) -> bool {
        let applied = self.edit_regions("Edit region", |store| {
            Ok(match field {
                RegionField::Name => {
                    store.set_name(index, value)?;
                    value.trim().to_string()
                }
                RegionField::PingServer => store.set_ping_server(index, value)?,
                RegionField::Port => store.set_port(index, value)?.to_string(),
                RegionField::TranslateName => store.set_translate_name(index, value)?.to_string(),
            })
        });
        match applied {
            Some(value) => {
                self.set_status(format!("Region {index}: {field:?} = {value}"));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{archive::testing::build_zip, net::testing::FakeFetcher};
    use std::{fs, path::Path};

    const LIST_URL: &str = "https://list.test/mod_list.json";

    struct Fixture {
        _root: tempfile::TempDir,
        app: App,
    }

    fn mod_list() -> String {
        r#"[
            {"name": "Foo", "version": "1.0", "description": "", "path": "https://cdn.test/foo.zip"},
            {"name": "Bar", "version": "2.0", "description": "", "path": "https://cdn.test/bar.zip"},
            {"name": "Foo", "version": "0.1", "description": "dup", "path": "https://cdn.test/old.zip"}
        ]"#
        .to_string()
    }

    fn fixture(fetcher: FakeFetcher) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let game = root.path().join("Among Us");
        let user = root.path().join("LocalLow");
        fs::create_dir_all(game.join("Among Us_Data")).unwrap();
        fs::create_dir_all(&user).unwrap();

        let mut config = AppConfig::with_data_dir(&root.path().join("data"));
        config.game_root = game;
        config.user_dir = user;
        config.mod_list_url = LIST_URL.to_string();
        config.preset_servers_url = "https://list.test/presets.json".to_string();
        let app = App::with_parts(config, Box::new(fetcher)).unwrap();
        Fixture { _root: root, app }
    }

    fn package(plugin: &str) -> Vec<u8> {
        let manifest = format!(r#"{{"files": ["{plugin}"]}}"#);
        build_zip(&[("mod.json", manifest.as_str()), (plugin, "dll")])
    }

    fn default_fetcher() -> FakeFetcher {
        FakeFetcher::default()
            .with(LIST_URL, mod_list())
            .with("https://cdn.test/foo.zip", package("BepInEx/plugins/Foo.dll"))
            .with("https://cdn.test/bar.zip", package("BepInEx/plugins/Bar.dll"))
    }

    fn game_root(app: &App) -> &Path {
        app.game.game_root.as_deref().unwrap()
    }

    #[test]
    fn refresh_catalog_reconciles_statuses() {
        let mut fx = fixture(default_fetcher());
        assert!(fx.app.refresh_catalog());
        assert_eq!(fx.app.catalog.len(), 2);
        assert_eq!(fx.app.statuses.get("Foo").unwrap().version, "1.0");
        assert!(fx.app.env.paths.status_file.is_file());
        assert!(fx
            .app
            .drain_events()
            .contains(&AppEvent::CatalogRefreshed { mods: 2, dropped: 1 }));
        assert!(fx.app.drain_events().is_empty());
    }

    #[test]
    fn failed_catalog_download_sets_status() {
        let mut fx = fixture(FakeFetcher::default());
        assert!(!fx.app.refresh_catalog());
        assert!(fx.app.status.starts_with("Mod list download failed"));
        assert!(fx.app.catalog.is_empty());
    }

    #[test]
    fn install_and_toggle_through_app() {
        let mut fx = fixture(default_fetcher());
        fx.app.refresh_catalog();
        let mut resolver = FixedChoice(ConflictChoice::Abort);

        assert!(fx.app.install_or_update("Foo", &mut resolver));
        assert!(game_root(&fx.app).join("BepInEx/plugins/Foo.dll").is_file());

        // Bar conflicts with Foo and the resolver aborts.
        assert!(!fx.app.install_mod("Bar", &mut resolver));
        assert!(fx.app.status.ends_with("cancelled"));
        assert!(!fx.app.statuses.is_downloaded("Bar"));

        assert!(fx.app.toggle_mod("Foo", &mut resolver));
        assert!(!fx.app.statuses.is_enabled("Foo"));
        assert!(!game_root(&fx.app).join("BepInEx/plugins/Foo.dll").exists());

        assert!(fx.app.uninstall_mod("Foo"));
        assert!(!fx.app.statuses.is_downloaded("Foo"));
    }

    #[test]
    fn install_or_update_picks_update_for_stale_mods() {
        let mut fx = fixture(default_fetcher());
        fx.app.refresh_catalog();
        let mut resolver = FixedChoice::default();
        fx.app.install_mod("Foo", &mut resolver);
        fx.app.statuses.entry("Foo").version = "0.5".to_string();

        assert!(fx.app.install_or_update("Foo", &mut resolver));
        assert_eq!(fx.app.status, "Updated Foo");
        assert_eq!(fx.app.statuses.get("Foo").unwrap().version, "1.0");
    }

    #[test]
    fn unknown_mod_is_reported_not_raised() {
        let mut fx = fixture(default_fetcher());
        fx.app.refresh_catalog();
        assert!(!fx.app.install_mod("Nope", &mut FixedChoice::default()));
        assert_eq!(fx.app.status, "Nope is not in the mod list");
        assert!(!fx.app.enable_mod("Nope", &mut FixedChoice::default()));
    }

    #[test]
    fn loader_install_and_prompt() {
        let fetcher = default_fetcher().with(
            bepinex::DEFAULT_URL,
            build_zip(&[("BepInEx/core/BepInEx.dll", "core"), ("winhttp.dll", "proxy")]),
        );
        let mut fx = fixture(fetcher);
        assert!(fx.app.should_prompt_loader());
        assert!(fx.app.install_loader());
        assert!(fx.app.loader_installed());
        assert!(!fx.app.should_prompt_loader());
        assert!(fx.app.uninstall_loader());
        assert!(!fx.app.loader_installed());

        fx.app.config.suppress_bepinex_prompt = true;
        assert!(!fx.app.should_prompt_loader());
    }

    #[test]
    fn region_edits_are_saved_and_validated() {
        let mut fx = fixture(default_fetcher());
        assert!(fx.app.add_region("Home"));
        assert!(fx.app.set_region_field(0, RegionField::PingServer, "https://au.example.org/ping"));
        assert!(!fx.app.set_region_field(0, RegionField::Port, "70000"));
        assert!(fx.app.status.contains("port"));

        let path = fx.app.game.region_file().unwrap();
        let saved = RegionStore::load(&path).unwrap();
        assert_eq!(saved.data.regions[0].ping_server, "au.example.org");
        assert_eq!(saved.data.regions[0].port(), Some(regions::DEFAULT_PORT));
    }

    #[test]
    fn preset_fallback_and_reorder() {
        let mut fx = fixture(default_fetcher());
        assert!(!fx.app.refresh_presets());
        assert_eq!(fx.app.presets, regions::default_presets());

        assert!(fx.app.add_region("A"));
        assert!(fx.app.add_preset_regions(&[]));
        assert!(fx.app.move_region(1, 0));
        let names = fx.app.regions.as_ref().unwrap().display_names();
        assert_eq!(names, vec!["Niko233(CN)".to_string(), "A".to_string()]);
        assert!(fx.app.remove_regions(&[0]));
        assert_eq!(fx.app.regions.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn region_field_names() {
        assert_eq!(RegionField::parse("Port"), Some(RegionField::Port));
        assert_eq!(RegionField::parse("ping-server"), Some(RegionField::PingServer));
        assert_eq!(RegionField::parse("colour"), None);
    }
}
