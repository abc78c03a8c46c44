use crate::{net::Fetcher, status::write_atomic};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const REGION_TYPE: &str = "StaticHttpRegionInfo, Assembly-CSharp";
pub const SERVER_NAME: &str = "Http-1";
pub const DEFAULT_PORT: u16 = 22023;
pub const DEFAULT_TRANSLATE_NAME: i64 = 1003;
pub const DEFAULT_CURRENT_REGION: i64 = 3;
pub const REGION_WARN_LIMIT: usize = 14;
const PING_SERVER_MAX: usize = 64;
const COLOR_TAG: &str = r"<color=#[0-9A-Fa-f]{6,8}>(.*?)</color>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionData {
    #[serde(rename = "CurrentRegionIdx", default)]
    pub current_region_idx: i64,
    #[serde(rename = "Regions", default)]
    pub regions: Vec<RegionInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for RegionData {
    fn default() -> Self {
        Self {
            current_region_idx: DEFAULT_CURRENT_REGION,
            regions: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    #[serde(rename = "$type", default = "region_type")]
    pub kind: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "PingServer", default)]
    pub ping_server: String,
    #[serde(rename = "Servers", default)]
    pub servers: Vec<ServerInfo>,
    #[serde(rename = "TargetServer", default)]
    pub target_server: Value,
    #[serde(rename = "TranslateName", default)]
    pub translate_name: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn region_type() -> String {
    REGION_TYPE.to_string()
}

impl RegionInfo {
    pub fn http(name: &str, host: &str, port: u16) -> Self {
        Self {
            kind: region_type(),
            name: name.to_string(),
            ping_server: host.to_string(),
            servers: vec![ServerInfo::http(host, port)],
            target_server: Value::Null,
            translate_name: DEFAULT_TRANSLATE_NAME,
            extra: Map::new(),
        }
    }

    fn primary_server(&mut self) -> &mut ServerInfo {
        if self.servers.is_empty() {
            self.servers.push(ServerInfo::http(&self.ping_server, DEFAULT_PORT));
        }
        &mut self.servers[0]
    }

    pub fn port(&self) -> Option<u16> {
        self.servers.first().map(|server| server.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "Name", default = "server_name")]
    pub name: String,
    #[serde(rename = "Ip", default)]
    pub ip: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "UseDtls", default)]
    pub use_dtls: bool,
    #[serde(rename = "Players", default)]
    pub players: i64,
    #[serde(rename = "ConnectionFailures", default)]
    pub connection_failures: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn server_name() -> String {
    SERVER_NAME.to_string()
}

impl ServerInfo {
    pub fn http(host: &str, port: u16) -> Self {
        Self {
            name: server_name(),
            ip: if host.is_empty() {
                String::new()
            } else {
                format!("https://{host}")
            },
            port,
            use_dtls: false,
            players: 0,
            connection_failures: 0,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    #[error("no region at index {0}")]
    OutOfRange(usize),
    #[error("name must not be empty")]
    EmptyName,
    #[error("server address must not be empty")]
    EmptyPingServer,
    #[error("server address must be 1-64 characters")]
    PingServerLength,
    #[error("port must be a number between 0 and 65535, got {0:?}")]
    InvalidPort(String),
    #[error("translate name must be an integer above 1000, got {0:?}")]
    InvalidTranslateName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetServer {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "pingServer", default)]
    pub ping_server: String,
    #[serde(default, deserialize_with = "port_text")]
    pub port: String,
}

impl PresetServer {
    pub fn port_or_default(&self) -> u16 {
        self.port.trim().parse().unwrap_or(DEFAULT_PORT)
    }
}

fn port_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    })
}

pub fn default_presets() -> Vec<PresetServer> {
    vec![PresetServer {
        name: "Niko233(CN)".to_string(),
        ping_server: "au-cn.niko233.me".to_string(),
        port: "443".to_string(),
    }]
}

pub fn fetch_presets(fetcher: &dyn Fetcher, url: &str) -> (Vec<PresetServer>, Option<String>) {
    match crate::net::get_json::<Vec<PresetServer>>(fetcher, url) {
        Ok(list) if !list.is_empty() => (list, None),
        Ok(_) => (default_presets(), Some("preset list is empty".to_string())),
        Err(err) => (default_presets(), Some(err.to_string())),
    }
}

pub fn strip_color_tags(input: &str) -> String {
    match Regex::new(COLOR_TAG) {
        Ok(re) => re.replace_all(input, "$1").trim().to_string(),
        Err(_) => input.trim().to_string(),
    }
}

pub fn normalize_ping_server(raw: &str) -> Result<String, RegionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RegionError::EmptyPingServer);
    }
    if trimmed.chars().count() > PING_SERVER_MAX {
        return Err(RegionError::PingServerLength);
    }
    let lower = trimmed.to_ascii_lowercase();
    let without_scheme = if lower.starts_with("https://") {
        &trimmed["https://".len()..]
    } else if lower.starts_with("http://") {
        &trimmed["http://".len()..]
    } else {
        trimmed
    };
    let host = without_scheme.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(RegionError::EmptyPingServer);
    }
    Ok(host.to_string())
}

pub fn parse_port(raw: &str) -> Result<u16, RegionError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| RegionError::InvalidPort(raw.trim().to_string()))
}

pub fn parse_translate_name(raw: &str) -> Result<i64, RegionError> {
    match raw.trim().parse::<i64>() {
        Ok(value) if value > 1000 => Ok(value),
        _ => Err(RegionError::InvalidTranslateName(raw.trim().to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct RegionStore {
    path: PathBuf,
    pub data: RegionData,
}

impl RegionStore {
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            data: RegionData::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty(path));
        }
        let raw = fs::read_to_string(path).context("read regionInfo.json")?;
        let data: RegionData =
            serde_json::from_str(raw.trim_start_matches('\u{feff}')).context("parse regionInfo.json")?;
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    // Unreadable files are moved aside to regionInfo.json.bak.
    pub fn load_or_recover(path: &Path) -> (Self, Option<String>) {
        match Self::load(path) {
            Ok(store) => (store, None),
            Err(err) => {
                let backup = path.with_extension("json.bak");
                let moved = fs::rename(path, &backup).is_ok();
                let reason = if moved {
                    format!("{err:#}; kept a copy at {}", backup.display())
                } else {
                    format!("{err:#}")
                };
                (Self::empty(path), Some(reason))
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.data).context("serialize regionInfo.json")?;
        write_atomic(&self.path, &raw).context("write regionInfo.json")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.data.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.regions.is_empty()
    }

    pub fn too_many(&self) -> bool {
        self.len() > REGION_WARN_LIMIT
    }

    pub fn display_names(&self) -> Vec<String> {
        self.data
            .regions
            .iter()
            .map(|region| strip_color_tags(&region.name))
            .collect()
    }

    pub fn get(&self, index: usize) -> Result<&RegionInfo, RegionError> {
        self.data
            .regions
            .get(index)
            .ok_or(RegionError::OutOfRange(index))
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut RegionInfo, RegionError> {
        self.data
            .regions
            .get_mut(index)
            .ok_or(RegionError::OutOfRange(index))
    }

    pub fn select(&mut self, index: usize) -> Result<(), RegionError> {
        self.get(index)?;
        self.data.current_region_idx = index as i64;
        Ok(())
    }

    pub fn add_default(&mut self, name: &str) -> usize {
        self.data
            .regions
            .push(RegionInfo::http(name, "example.com", DEFAULT_PORT));
        self.len() - 1
    }

    pub fn add_presets(&mut self, presets: &[PresetServer]) -> usize {
        for preset in presets {
            self.data.regions.push(RegionInfo::http(
                &preset.name,
                &preset.ping_server,
                preset.port_or_default(),
            ));
        }
        presets.len()
    }

    pub fn remove(&mut self, indices: &[usize]) -> Vec<String> {
        let mut indices: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|index| *index < self.len())
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut removed = Vec::with_capacity(indices.len());
        for index in indices.into_iter().rev() {
            let region = self.data.regions.remove(index);
            removed.push(strip_color_tags(&region.name));
            let current = self.data.current_region_idx;
            if current > index as i64 {
                self.data.current_region_idx = current - 1;
            }
        }
        removed.reverse();

        let last = self.len() as i64 - 1;
        if last >= 0 && self.data.current_region_idx > last {
            self.data.current_region_idx = last;
        }
        removed
    }

    // Lands before the entry now at `insert_at`. `Ok(None)` when nothing moves.
    pub fn move_region(&mut self, from: usize, insert_at: usize) -> Result<Option<usize>, RegionError> {
        let len = self.len();
        if from >= len {
            return Err(RegionError::OutOfRange(from));
        }
        if insert_at > len {
            return Err(RegionError::OutOfRange(insert_at));
        }
        if insert_at == from || insert_at == from + 1 {
            return Ok(None);
        }

        let target = if insert_at > from { insert_at - 1 } else { insert_at };
        let region = self.data.regions.remove(from);
        self.data.regions.insert(target, region);

        let current = self.data.current_region_idx;
        if current >= 0 && (current as usize) < len {
            let mut current = current as usize;
            if current == from {
                current = target;
            } else {
                if current > from {
                    current -= 1;
                }
                if current >= target {
                    current += 1;
                }
            }
            self.data.current_region_idx = current as i64;
        }
        Ok(Some(target))
    }

    pub fn set_name(&mut self, index: usize, name: &str) -> Result<(), RegionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegionError::EmptyName);
        }
        let region = self.get_mut(index)?;
        region.name = name.to_string();
        region.primary_server().name = server_name();
        Ok(())
    }

    pub fn set_ping_server(&mut self, index: usize, raw: &str) -> Result<String, RegionError> {
        let host = normalize_ping_server(raw)?;
        let region = self.get_mut(index)?;
        region.ping_server = host.clone();
        region.primary_server().ip = format!("https://{host}");
        Ok(host)
    }

    pub fn set_port(&mut self, index: usize, raw: &str) -> Result<u16, RegionError> {
        let port = parse_port(raw)?;
        self.get_mut(index)?.primary_server().port = port;
        Ok(port)
    }

    pub fn set_translate_name(&mut self, index: usize, raw: &str) -> Result<i64, RegionError> {
        let value = parse_translate_name(raw)?;
        self.get_mut(index)?.translate_name = value;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::FakeFetcher;

    const GAME_FILE: &str = r#"{
        "CurrentRegionIdx": 1,
        "Regions": [
            {"$type": "StaticHttpRegionInfo, Assembly-CSharp", "Name": "<color=#FF00FF>Modded</color> EU",
             "PingServer": "eu.example.net",
             "Servers": [{"Name": "Http-1", "Ip": "https://eu.example.net", "Port": 443,
                          "UseDtls": false, "Players": 0, "ConnectionFailures": 0}],
             "TargetServer": null, "TranslateName": 1003},
            {"$type": "StaticHttpRegionInfo, Assembly-CSharp", "Name": "B", "PingServer": "b.net",
             "Servers": [], "TargetServer": null, "TranslateName": 1003, "Custom": true},
            {"$type": "StaticHttpRegionInfo, Assembly-CSharp", "Name": "C", "PingServer": "c.net",
             "Servers": [], "TargetServer": null, "TranslateName": 1003}
        ]
    }"#;

    fn store() -> RegionStore {
        RegionStore {
            path: PathBuf::from("regionInfo.json"),
            data: serde_json::from_str(GAME_FILE).unwrap(),
        }
    }

    fn names(store: &RegionStore) -> Vec<String> {
        store.display_names()
    }

    #[test]
    fn color_tags_are_stripped_for_display() {
        assert_eq!(names(&store())[0], "Modded EU");
        assert_eq!(strip_color_tags("<color=#12345678>A</color><color=#abcdef>B</color>"), "AB");
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regionInfo.json");
        let mut original = store();
        original.path = path.clone();
        original.save().unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["Regions"][1]["Custom"], true);
        assert_eq!(raw["Regions"][0]["$type"], REGION_TYPE);
        assert_eq!(RegionStore::load(&path).unwrap().data, original.data);
    }

    #[test]
    fn move_follows_drop_semantics() {
        let mut regions = store();
        // Dropping on itself or directly below is a no-op.
        assert_eq!(regions.move_region(0, 0).unwrap(), None);
        assert_eq!(regions.move_region(0, 1).unwrap(), None);

        // Drag the first entry to the end.
        assert_eq!(regions.move_region(0, 3).unwrap(), Some(2));
        assert_eq!(names(&regions), vec!["B", "C", "Modded EU"]);

        // Drag the last entry to the top.
        assert_eq!(regions.move_region(2, 0).unwrap(), Some(0));
        assert_eq!(names(&regions), vec!["Modded EU", "B", "C"]);

        assert_eq!(regions.move_region(3, 0), Err(RegionError::OutOfRange(3)));
        assert_eq!(regions.move_region(0, 4), Err(RegionError::OutOfRange(4)));
    }

    #[test]
    fn selection_follows_moves_and_removals() {
        let mut regions = store();
        assert_eq!(regions.data.current_region_idx, 1);

        regions.move_region(1, 3).unwrap();
        assert_eq!(names(&regions)[2], "B");
        assert_eq!(regions.data.current_region_idx, 2);

        regions.move_region(0, 2).unwrap();
        assert_eq!(names(&regions), vec!["C", "Modded EU", "B"]);
        assert_eq!(regions.data.current_region_idx, 2);

        let removed = regions.remove(&[0, 0, 9]);
        assert_eq!(removed, vec!["C"]);
        assert_eq!(regions.data.current_region_idx, 1);

        regions.remove(&[1]);
        assert_eq!(regions.data.current_region_idx, 0);
    }

    #[test]
    fn new_regions_use_the_http_template() {
        let mut regions = RegionStore::empty(Path::new("regionInfo.json"));
        let index = regions.add_default("New Server");
        let region = regions.get(index).unwrap();
        assert_eq!(region.ping_server, "example.com");
        assert_eq!(region.servers[0].ip, "https://example.com");
        assert_eq!(region.servers[0].port, DEFAULT_PORT);
        assert_eq!(region.translate_name, DEFAULT_TRANSLATE_NAME);

        let preset = PresetServer {
            name: "P".to_string(),
            ping_server: "p.example".to_string(),
            port: "not a port".to_string(),
        };
        regions.add_presets(&[preset]);
        assert_eq!(regions.get(1).unwrap().port(), Some(DEFAULT_PORT));
    }

    #[test]
    fn field_validation() {
        let mut regions = store();
        assert_eq!(regions.set_name(0, "  "), Err(RegionError::EmptyName));
        assert_eq!(
            regions.set_ping_server(0, "https://play.example.org/api/ping").unwrap(),
            "play.example.org"
        );
        assert_eq!(regions.get(0).unwrap().servers[0].ip, "https://play.example.org");
        assert_eq!(
            regions.set_ping_server(0, &"a".repeat(65)),
            Err(RegionError::PingServerLength)
        );
        assert_eq!(regions.set_port(1, "65535").unwrap(), 65535);
        assert_eq!(regions.get(1).unwrap().servers.len(), 1);
        assert!(matches!(regions.set_port(1, "65536"), Err(RegionError::InvalidPort(_))));
        assert!(matches!(regions.set_port(1, "-1"), Err(RegionError::InvalidPort(_))));
        assert!(matches!(
            regions.set_translate_name(0, "1000"),
            Err(RegionError::InvalidTranslateName(_))
        ));
        assert_eq!(regions.set_translate_name(0, "1001").unwrap(), 1001);
        assert_eq!(regions.set_name(9, "x"), Err(RegionError::OutOfRange(9)));
    }

    #[test]
    fn warns_above_fourteen_regions() {
        let mut regions = RegionStore::empty(Path::new("regionInfo.json"));
        for _ in 0..REGION_WARN_LIMIT {
            regions.add_default("r");
        }
        assert!(!regions.too_many());
        regions.add_default("r");
        assert!(regions.too_many());
    }

    #[test]
    fn presets_fall_back_to_builtin_list() {
        let fetcher = FakeFetcher::default().with(
            "https://presets/ok.json",
            r#"[{"name":"A","pingServer":"a.example","port":22000}]"#,
        );
        let (list, reason) = fetch_presets(&fetcher, "https://presets/ok.json");
        assert_eq!(list[0].port, "22000");
        assert!(reason.is_none());

        let (list, reason) = fetch_presets(&fetcher, "https://presets/missing.json");
        assert_eq!(list, default_presets());
        assert!(reason.is_some());
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regionInfo.json");
        fs::write(&path, "{ broken").unwrap();

        let (regions, reason) = RegionStore::load_or_recover(&path);
        assert!(regions.is_empty());
        assert!(reason.is_some());
        assert!(dir.path().join("regionInfo.json.bak").is_file());
    }
}
