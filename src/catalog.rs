use crate::{
    error::{ModError, ModResult},
    net::{latest_release_asset, Fetcher},
    status::{ModStatus, StatusStore},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "path", alias = "downloadUrl")]
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, rename = "fileMatch", skip_serializing_if = "Option::is_none")]
    pub file_match: Option<String>,
}

impl ModDescriptor {
    pub fn resolve_download_url(&self, fetcher: &dyn Fetcher) -> ModResult<String> {
        if !self.download_url.trim().is_empty() {
            return Ok(self.download_url.trim().to_string());
        }
        match self.repo.as_deref().filter(|repo| !repo.trim().is_empty()) {
            Some(repo) => Ok(latest_release_asset(fetcher, repo, &[".zip"])?.url),
            None => Err(ModError::Network(format!(
                "{} has no download url",
                self.name
            ))),
        }
    }

    pub fn uses_file_match(&self) -> bool {
        self.file_match
            .as_deref()
            .map(|pattern| !pattern.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModState {
    NotDownloaded,
    Disabled,
    Enabled,
}

impl ModState {
    pub fn label(self) -> &'static str {
        match self {
            ModState::NotDownloaded => "not downloaded",
            ModState::Disabled => "disabled",
            ModState::Enabled => "enabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModView {
    pub name: String,
    pub version: String,
    pub installed_version: String,
    pub description: String,
    pub state: ModState,
    pub has_update: bool,
}

impl ModView {
    pub fn new(descriptor: &ModDescriptor, status: Option<&ModStatus>) -> Self {
        let (state, installed_version, has_update) = match status {
            Some(status) if status.downloaded => (
                if status.installed {
                    ModState::Enabled
                } else {
                    ModState::Disabled
                },
                status.version.clone(),
                status.version != descriptor.version,
            ),
            _ => (ModState::NotDownloaded, String::new(), false),
        };
        Self {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            installed_version,
            description: descriptor.description.clone(),
            state,
            has_update,
        }
    }
}

pub fn parse_catalog(raw: &str) -> ModResult<(Vec<ModDescriptor>, usize)> {
    let list: Vec<ModDescriptor> = serde_json::from_str(raw)
        .map_err(|err| ModError::Network(format!("decode mod list: {err}")))?;
    Ok(dedup(list))
}

pub fn fetch_catalog(fetcher: &dyn Fetcher, url: &str) -> ModResult<(Vec<ModDescriptor>, usize)> {
    parse_catalog(&fetcher.get_text(url)?)
}

fn dedup(list: Vec<ModDescriptor>) -> (Vec<ModDescriptor>, usize) {
    let total = list.len();
    let mut seen = HashSet::new();
    let unique: Vec<ModDescriptor> = list
        .into_iter()
        .filter(|descriptor| !descriptor.name.trim().is_empty())
        .filter(|descriptor| seen.insert(descriptor.name.clone()))
        .collect();
    let dropped = total - unique.len();
    (unique, dropped)
}

pub fn reconcile(statuses: &mut StatusStore, catalog: &[ModDescriptor]) -> bool {
    let mut changed = false;
    for descriptor in catalog {
        match statuses.get_mut(&descriptor.name) {
            None => {
                statuses.insert(&descriptor.name, ModStatus::new(&descriptor.version));
                changed = true;
            }
            Some(status) if !status.downloaded && status.version != descriptor.version => {
                status.version = descriptor.version.clone();
                changed = true;
            }
            Some(_) => {}
        }
    }
    changed
}

pub fn views(statuses: &StatusStore, catalog: &[ModDescriptor]) -> Vec<ModView> {
    catalog
        .iter()
        .map(|descriptor| ModView::new(descriptor, statuses.get(&descriptor.name)))
        .collect()
}
