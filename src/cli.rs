use crate::{
    app::{App, AppEvent, RegionField},
    bepinex,
    catalog::{ModState, ModView},
    conflict::{ConflictChoice, ConflictResolver, FixedChoice, CONFLICT_WARNING},
    game,
    log::LogLevel,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::{
    fs,
    io::{self, BufRead, IsTerminal, Write},
};

const DEFAULT_LOG_LINES: usize = 40;

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConflictMode {
    Ask,
    Fixed(ConflictChoice),
}

struct GlobalOptions {
    format: OutputFormat,
    conflict: ConflictMode,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    ModsList,
    ModsInstall(String),
    ModsUpdate(String),
    ModsEnable(String),
    ModsDisable(String),
    ModsToggle(String),
    ModsUninstall(String),
    RegionsList,
    RegionsPresets,
    RegionsAdd(String),
    RegionsAddPreset(Vec<usize>),
    RegionsRemove(Vec<usize>),
    RegionsMove { from: usize, to: usize },
    RegionsSelect(usize),
    RegionsSet {
        index: usize,
        field: RegionField,
        value: String,
    },
    LoaderStatus,
    LoaderInstall,
    LoaderUninstall,
    Launch,
    Paths,
    Log(usize),
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, tokens) = parse_global_options(&args)?;
    let command = parse_command(&tokens)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("aulgk v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let mut app = App::initialize()?;
            run_command(&mut app, command, &global)
        }
    }
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut conflict = ConflictMode::Ask;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        match flag {
            "--format" => {
                let value = inline
                    .or_else(|| iter.next().cloned())
                    .ok_or_else(|| anyhow!("--format requires a value"))?;
                format = OutputFormat::parse(&value)
                    .ok_or_else(|| anyhow!("Unknown format: {value} (use 'json' or 'text')"))?;
            }
            "--on-conflict" => {
                let value = inline
                    .or_else(|| iter.next().cloned())
                    .ok_or_else(|| anyhow!("--on-conflict requires a value"))?;
                conflict = parse_conflict_mode(&value)?;
            }
            _ => tokens.push(arg.to_string()),
        }
    }
    Ok((GlobalOptions { format, conflict }, tokens))
}

fn parse_conflict_mode(value: &str) -> Result<ConflictMode> {
    if value == "ask" {
        return Ok(ConflictMode::Ask);
    }
    ConflictChoice::parse(value)
        .map(ConflictMode::Fixed)
        .ok_or_else(|| anyhow!("Unknown conflict choice: {value} (use ask, proceed, abort or disable-others)"))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let command = match words.as_slice() {
        [] | ["help" | "--help" | "-h", ..] => CliCommand::Help,
        ["version" | "--version" | "-V", ..] => CliCommand::Version,
        ["mods"] | ["mods", "list"] => CliCommand::ModsList,
        ["mods", action, name] => {
            let name = name.to_string();
            match *action {
                "install" => CliCommand::ModsInstall(name),
                "update" => CliCommand::ModsUpdate(name),
                "enable" => CliCommand::ModsEnable(name),
                "disable" => CliCommand::ModsDisable(name),
                "toggle" => CliCommand::ModsToggle(name),
                "uninstall" => CliCommand::ModsUninstall(name),
                _ => bail!("Unknown mods command: {action}"),
            }
        }
        ["regions"] | ["regions", "list"] => CliCommand::RegionsList,
        ["regions", "presets"] => CliCommand::RegionsPresets,
        ["regions", "add", rest @ ..] => CliCommand::RegionsAdd(rest.join(" ")),
        ["regions", "add-preset", rest @ ..] => CliCommand::RegionsAddPreset(parse_indices(rest)?),
        ["regions", "remove", rest @ ..] if !rest.is_empty() => {
            CliCommand::RegionsRemove(parse_indices(rest)?)
        }
        ["regions", "move", from, to] => CliCommand::RegionsMove {
            from: parse_index(from)?,
            to: parse_index(to)?,
        },
        ["regions", "select", index] => CliCommand::RegionsSelect(parse_index(index)?),
        ["regions", "set", index, field, value @ ..] if !value.is_empty() => CliCommand::RegionsSet {
            index: parse_index(index)?,
            field: RegionField::parse(field)
                .ok_or_else(|| anyhow!("Unknown region field: {field} (use name, ping, port or translate)"))?,
            value: value.join(" "),
        },
        ["bepinex"] | ["bepinex", "status"] => CliCommand::LoaderStatus,
        ["bepinex", "install"] => CliCommand::LoaderInstall,
        ["bepinex", "uninstall"] => CliCommand::LoaderUninstall,
        ["launch"] => CliCommand::Launch,
        ["paths"] => CliCommand::Paths,
        ["log"] => CliCommand::Log(DEFAULT_LOG_LINES),
        ["log", lines] => CliCommand::Log(
            lines
                .parse()
                .map_err(|_| anyhow!("Expected a line count, got {lines:?}"))?,
        ),
        _ => bail!("Unknown command: {} (see 'aulgk help')", words.join(" ")),
    };
    Ok(command)
}

fn parse_index(value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| anyhow!("Expected a region index, got {value:?}"))
}

fn parse_indices(values: &[&str]) -> Result<Vec<usize>> {
    values.iter().map(|value| parse_index(value)).collect()
}

struct PromptResolver;

impl ConflictResolver for PromptResolver {
    fn resolve(&mut self, target: &str, enabled: &[String]) -> Option<ConflictChoice> {
        eprintln!("{CONFLICT_WARNING}");
        eprintln!("Enabled: {}", enabled.join(", "));
        eprint!("Enable {target} anyway? [p]roceed / [a]bort / [d]isable others: ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => ConflictChoice::parse(&line),
        }
    }
}

fn resolver_for(mode: ConflictMode) -> Box<dyn ConflictResolver> {
    match mode {
        ConflictMode::Fixed(choice) => Box::new(FixedChoice(choice)),
        ConflictMode::Ask if io::stdin().is_terminal() => Box::new(PromptResolver),
        ConflictMode::Ask => Box::new(FixedChoice(ConflictChoice::Abort)),
    }
}

fn run_command(app: &mut App, command: CliCommand, global: &GlobalOptions) -> Result<()> {
    let mut resolver = resolver_for(global.conflict);
    let resolver = resolver.as_mut();
    let ok = match command {
        CliCommand::ModsList => return list_mods(app, global.format),
        CliCommand::ModsInstall(name) => {
            require_catalog(app)?;
            app.install_or_update(&name, resolver)
        }
        CliCommand::ModsUpdate(name) => {
            require_catalog(app)?;
            app.update_mod(&name)
        }
        CliCommand::ModsEnable(name) => {
            load_catalog_quietly(app);
            app.enable_mod(&name, resolver)
        }
        CliCommand::ModsDisable(name) => {
            load_catalog_quietly(app);
            app.disable_mod(&name)
        }
        CliCommand::ModsToggle(name) => {
            load_catalog_quietly(app);
            app.toggle_mod(&name, resolver)
        }
        CliCommand::ModsUninstall(name) => {
            load_catalog_quietly(app);
            app.uninstall_mod(&name)
        }
        CliCommand::RegionsList => return list_regions(app, global.format),
        CliCommand::RegionsPresets => {
            app.refresh_presets();
            return list_presets(app, global.format);
        }
        CliCommand::RegionsAdd(name) => app.add_region(&name),
        CliCommand::RegionsAddPreset(indices) => {
            app.refresh_presets();
            app.add_preset_regions(&indices)
        }
        CliCommand::RegionsRemove(indices) => app.remove_regions(&indices),
        CliCommand::RegionsMove { from, to } => app.move_region(from, to),
        CliCommand::RegionsSelect(index) => app.select_region(index),
        CliCommand::RegionsSet {
            index,
            field,
            value,
        } => app.set_region_field(index, field, &value),
        CliCommand::LoaderStatus => return loader_status(app, global.format),
        CliCommand::LoaderInstall => app.install_loader(),
        CliCommand::LoaderUninstall => app.uninstall_loader(),
        CliCommand::Launch => {
            if app.should_prompt_loader() {
                eprintln!("BepInEx is not installed; mods will not load (aulgk bepinex install)");
            }
            app.launch_game()
        }
        CliCommand::Paths => return list_paths(app, global.format),
        CliCommand::Log(lines) => return print_log_tail(app, lines),
        CliCommand::Help | CliCommand::Version => true,
    };

    report_session(app, ok);
    if !ok {
        bail!("{}", app.status);
    }
    Ok(())
}

fn report_session(app: &mut App, ok: bool) {
    let mut messages: Vec<String> = app
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            AppEvent::StatusChanged(message) => Some(message),
            _ => None,
        })
        .collect();
    if !ok {
        messages.pop();
    }
    for message in messages {
        println!("{message}");
    }
    for entry in app.logger.entries() {
        if entry.level == LogLevel::Warn {
            eprintln!("{}: {}", entry.level.label().to_ascii_lowercase(), entry.message);
        }
    }
}

fn print_log_tail(app: &App, lines: usize) -> Result<()> {
    let Some(path) = app.logger.path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }
    let raw = fs::read_to_string(path).context("read log file")?;
    let entries: Vec<&str> = raw.lines().collect();
    let start = entries.len().saturating_sub(lines);
    for line in &entries[start..] {
        println!("{line}");
    }
    Ok(())
}

fn require_catalog(app: &mut App) -> Result<()> {
    if !app.refresh_catalog() {
        bail!("{}", app.status);
    }
    Ok(())
}

// Plugin mods fall back to the pattern recorded in status.json.
fn load_catalog_quietly(app: &mut App) {
    if !app.refresh_catalog() {
        eprintln!("warning: {}", app.status);
    }
}

fn list_mods(app: &mut App, format: OutputFormat) -> Result<()> {
    let views: Vec<ModView> = if app.refresh_catalog() {
        app.mod_views()
    } else {
        eprintln!("warning: {}; showing stored state", app.status);
        app.statuses
            .iter()
            .map(|(name, status)| ModView {
                name: name.clone(),
                version: status.version.clone(),
                installed_version: status.version.clone(),
                description: String::new(),
                state: if status.installed {
                    ModState::Enabled
                } else if status.downloaded {
                    ModState::Disabled
                } else {
                    ModState::NotDownloaded
                },
                has_update: false,
            })
            .collect()
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        OutputFormat::Text => {
            for view in views {
                let version = if view.has_update {
                    format!("{} -> {}", view.installed_version, view.version)
                } else if view.installed_version.is_empty() {
                    view.version.clone()
                } else {
                    view.installed_version.clone()
                };
                println!(
                    "{state:<14} {name:<24} {version}",
                    state = view.state.label(),
                    name = view.name
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RegionListItem {
    index: usize,
    name: String,
    ping_server: String,
    port: Option<u16>,
    translate_name: i64,
    current: bool,
}

fn list_regions(app: &App, format: OutputFormat) -> Result<()> {
    let store = app
        .regions
        .as_ref()
        .ok_or_else(|| anyhow!("{} user data directory not found", game::GAME_NAME))?;
    if store.is_empty() && format == OutputFormat::Text {
        println!("No custom regions in {}", store.path().display());
        return Ok(());
    }
    let names = store.display_names();
    let items: Vec<RegionListItem> = store
        .data
        .regions
        .iter()
        .enumerate()
        .map(|(index, region)| RegionListItem {
            index,
            name: names[index].clone(),
            ping_server: region.ping_server.clone(),
            port: region.port(),
            translate_name: region.translate_name,
            current: store.data.current_region_idx == index as i64,
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            for item in &items {
                let marker = if item.current { "*" } else { " " };
                let port = item
                    .port
                    .map(|value| value.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{marker} {index:>2} {name:<24} {host}:{port}",
                    index = item.index,
                    name = item.name,
                    host = item.ping_server
                );
            }
            if store.too_many() {
                eprintln!("warning: more than {} regions", crate::regions::REGION_WARN_LIMIT);
            }
        }
    }
    Ok(())
}

fn list_presets(app: &App, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&app.presets)?);
        }
        OutputFormat::Text => {
            for (index, preset) in app.presets.iter().enumerate() {
                println!(
                    "{index:>2} {name:<24} {host}:{port}",
                    name = preset.name,
                    host = preset.ping_server,
                    port = preset.port_or_default()
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct LoaderStatusItem {
    installed: bool,
    version: String,
    prompt: bool,
}

fn loader_status(app: &App, format: OutputFormat) -> Result<()> {
    let item = LoaderStatusItem {
        installed: app.loader_installed(),
        version: app.config.bepinex_version.clone(),
        prompt: app.should_prompt_loader(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&item)?),
        OutputFormat::Text => {
            if item.installed {
                println!("{} installed", bepinex::LOADER_DIR);
            } else {
                println!("{} not installed ({} available)", bepinex::LOADER_DIR, item.version);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsItem {
    data_dir: String,
    game_root: Option<String>,
    user_dir: Option<String>,
    region_file: Option<String>,
    log_file: String,
}

fn list_paths(app: &App, format: OutputFormat) -> Result<()> {
    let display = |path: Option<std::path::PathBuf>| path.map(|path| path.display().to_string());
    let item = PathsItem {
        data_dir: app.config.data_dir.display().to_string(),
        game_root: display(app.game.game_root.clone()),
        user_dir: display(app.game.user_dir.clone()),
        region_file: display(app.game.region_file()),
        log_file: app.config.log_path().display().to_string(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&item)?),
        OutputFormat::Text => {
            let missing = || "(not found)".to_string();
            println!("Data dir:     {}", item.data_dir);
            println!("Game root:    {}", item.game_root.unwrap_or_else(missing));
            println!("User dir:     {}", item.user_dir.unwrap_or_else(missing));
            println!("Region file:  {}", item.region_file.unwrap_or_else(missing));
            println!("Log file:     {}", item.log_file);
        }
    }
    Ok(())
}

fn print_help() {
    println!("aulgk v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  aulgk mods list                         List mods from the mod list");
    println!("  aulgk mods install <name>               Install, or update when outdated");
    println!("  aulgk mods update <name>                Refresh a downloaded mod");
    println!("  aulgk mods enable|disable|toggle <name> Switch a downloaded mod on or off");
    println!("  aulgk mods uninstall <name>             Remove a mod and its local copy");
    println!("  aulgk regions list                      List custom server regions");
    println!("  aulgk regions presets                   List preset servers");
    println!("  aulgk regions add [name]                Add a placeholder region");
    println!("  aulgk regions add-preset [index...]     Add preset servers (all by default)");
    println!("  aulgk regions remove <index...>         Remove regions");
    println!("  aulgk regions move <from> <to>          Move a region before position <to>");
    println!("  aulgk regions select <index>            Make a region the current one");
    println!("  aulgk regions set <index> <field> <v>   Edit name, ping, port or translate");
    println!("  aulgk bepinex status|install|uninstall  Manage the BepInEx loader");
    println!("  aulgk launch                            Start the game through Steam");
    println!("  aulgk paths                             Show detected paths");
    println!("  aulgk log [lines]                       Show the end of the log file");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                    Output format for list commands");
    println!("  --on-conflict <choice>                  ask | proceed | abort | disable-others");
    println!("  -h, --help                              Show help");
    println!("  -V, --version                           Show version");
}
