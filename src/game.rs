use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

pub const GAME_NAME: &str = "Among Us";
pub const STEAM_APP_ID: &str = "945360";
pub const REGION_FILE: &str = "regionInfo.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GamePaths {
    pub game_root: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl GamePaths {
    pub fn region_file(&self) -> Option<PathBuf> {
        self.user_dir.as_ref().map(|dir| dir.join(REGION_FILE))
    }
}

pub fn detect_paths(
    game_root_override: Option<&Path>,
    user_dir_override: Option<&Path>,
) -> Result<GamePaths> {
    let game_root = match game_root_override {
        Some(path) => {
            if !looks_like_game_root(path) {
                bail!(
                    "invalid game root: expected {GAME_NAME}.exe or {GAME_NAME}_Data in {}",
                    path.display()
                );
            }
            Some(path.to_path_buf())
        }
        None => find_game_root(&steam_roots()),
    };

    let user_dir = match user_dir_override {
        Some(path) => Some(path.to_path_buf()),
        None => find_user_dir(&steam_roots()),
    };

    Ok(GamePaths {
        game_root,
        user_dir,
    })
}

fn steam_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let home = base.home_dir();
        roots.push(home.join(".local/share/Steam"));
        roots.push(home.join(".steam/steam"));
        roots.push(home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"));
        roots.push(home.join("Library/Application Support/Steam"));
    }
    for var in ["ProgramFiles(x86)", "ProgramFiles"] {
        if let Some(dir) = std::env::var_os(var) {
            roots.push(PathBuf::from(dir).join("Steam"));
        }
    }
    roots
}

fn find_game_root(steam_roots: &[PathBuf]) -> Option<PathBuf> {
    let mut libraries = Vec::new();
    for base in steam_roots {
        libraries.push(base.clone());
        let vdf = base.join("steamapps/libraryfolders.vdf");
        if vdf.exists() {
            if let Ok(paths) = parse_steam_library_paths(&vdf) {
                libraries.extend(paths);
            }
        }
    }

    libraries
        .into_iter()
        .map(|lib| lib.join("steamapps/common").join(GAME_NAME))
        .find(|candidate| looks_like_game_root(candidate))
}

fn find_user_dir(steam_roots: &[PathBuf]) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(base) = BaseDirs::new() {
        // data_local_dir is AppData/Local on Windows; LocalLow sits beside it.
        if let Some(appdata) = base.data_local_dir().parent() {
            candidates.push(appdata.join("LocalLow/Innersloth").join(GAME_NAME));
        }
    }
    for root in steam_roots {
        candidates.push(
            root.join("steamapps/compatdata")
                .join(STEAM_APP_ID)
                .join("pfx/drive_c/users/steamuser/AppData/LocalLow/Innersloth")
                .join(GAME_NAME),
        );
    }
    candidates.into_iter().find(|dir| dir.is_dir())
}

pub fn parse_steam_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).context("read libraryfolders.vdf")?;
    Ok(library_paths_from_vdf(&raw))
}

fn library_paths_from_vdf(raw: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }
    paths
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.join(format!("{GAME_NAME}.exe")).is_file() || path.join(format!("{GAME_NAME}_Data")).is_dir()
}

pub fn launch_uri() -> String {
    format!("steam://rungameid/{STEAM_APP_ID}")
}

pub fn launch() -> Result<&'static str> {
    let target = launch_uri();
    let candidates: &[(&'static str, &[&str])] = if cfg!(windows) {
        &[("cmd", &["/C", "start", ""])]
    } else if cfg!(target_os = "macos") {
        &[("open", &[])]
    } else {
        &[("xdg-open", &[]), ("gio", &["open"]), ("steam", &[])]
    };

    let mut errors = Vec::new();
    for (command, args) in candidates {
        match Command::new(command)
            .args(args.iter())
            .arg(&target)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => return Ok(*command),
            Ok(status) => errors.push(format!("{command} exited {status}")),
            Err(err) => errors.push(format!("{command} failed: {err}")),
        }
    }
    bail!("could not open {target}: {}", errors.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VDF: &str = r#"
"libraryfolders"
{
	"0"
	{
		"path"		"/home/player/.local/share/Steam"
		"apps"
		{
			"945360"		"512000000"
		}
	}
	"1"
	{
		"path"		"D:\\SteamLibrary"
	}
}
"#;

    #[test]
    fn reads_library_paths() {
        let paths = library_paths_from_vdf(VDF);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/home/player/.local/share/Steam"),
                PathBuf::from("D:\\SteamLibrary"),
            ]
        );
    }

    #[test]
    fn finds_game_in_secondary_library() {
        let dir = tempfile::tempdir().unwrap();
        let steam = dir.path().join("Steam");
        let library = dir.path().join("Games");
        fs::create_dir_all(steam.join("steamapps")).unwrap();
        fs::write(
            steam.join("steamapps/libraryfolders.vdf"),
            format!("\"path\"\t\t\"{}\"\n", library.display()),
        )
        .unwrap();
        let game = library.join("steamapps/common/Among Us");
        fs::create_dir_all(game.join("Among Us_Data")).unwrap();

        assert_eq!(find_game_root(&[steam]), Some(game));
    }

    #[test]
    fn finds_proton_user_dir() {
        let dir = tempfile::tempdir().unwrap();
        let steam = dir.path().join("Steam");
        let user = steam
            .join("steamapps/compatdata/945360/pfx/drive_c/users/steamuser/AppData/LocalLow/Innersloth/Among Us");
        fs::create_dir_all(&user).unwrap();

        assert_eq!(find_user_dir(&[steam]), Some(user.clone()));
        let paths = GamePaths {
            game_root: None,
            user_dir: Some(user.clone()),
        };
        assert_eq!(paths.region_file(), Some(user.join("regionInfo.json")));
    }

    #[test]
    fn override_must_look_like_the_game() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_paths(Some(dir.path()), Some(dir.path())).is_err());

        fs::write(dir.path().join("Among Us.exe"), "").unwrap();
        let paths = detect_paths(Some(dir.path()), Some(dir.path())).unwrap();
        assert_eq!(paths.game_root.as_deref(), Some(dir.path()));
    }

    #[test]
    fn launch_uri_targets_the_steam_app() {
        assert_eq!(launch_uri(), "steam://rungameid/945360");
    }
}
