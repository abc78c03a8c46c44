use crate::error::{FsContext, ModError, ModResult};
use serde::Deserialize;
use std::{
    fs::File,
    io,
    path::Path,
    time::Duration,
};

const USER_AGENT: &str = concat!("aulgk/", env!("CARGO_PKG_VERSION"));
const GITHUB_API: &str = "https://api.github.com/repos";

pub trait Fetcher {
    fn get_text(&self, url: &str) -> ModResult<String>;

    fn download_to(&self, url: &str, dest: &Path) -> ModResult<u64>;
}

pub struct HttpFetcher {
    agent: ureq::Agent,
    github_token: Option<String>,
}

impl HttpFetcher {
    pub fn new(github_token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(60))
            .build();
        Self {
            agent,
            github_token: github_token.filter(|token| !token.trim().is_empty()),
        }
    }

    fn request(&self, url: &str) -> ureq::Request {
        let request = self.agent.get(url).set("User-Agent", USER_AGENT);
        match &self.github_token {
            Some(token) if url.starts_with(GITHUB_API) => {
                request.set("Authorization", &format!("Bearer {token}"))
            }
            _ => request,
        }
    }
}

impl Fetcher for HttpFetcher {
    fn get_text(&self, url: &str) -> ModResult<String> {
        let response = self.request(url).call()?;
        response
            .into_string()
            .map_err(|err| ModError::Network(format!("read {url}: {err}")))
    }

    fn download_to(&self, url: &str, dest: &Path) -> ModResult<u64> {
        let response = self.request(url).call()?;
        let mut reader = response.into_reader();
        let mut file =
            File::create(dest).with_fs_context(|| format!("create {}", dest.display()))?;
        io::copy(&mut reader, &mut file).map_err(|err| ModError::Network(err.to_string()))
    }
}

pub fn get_json<T: for<'de> Deserialize<'de>>(fetcher: &dyn Fetcher, url: &str) -> ModResult<T> {
    let body = fetcher.get_text(url)?;
    serde_json::from_str(&body).map_err(|err| ModError::Network(format!("decode {url}: {err}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Game,
    BepInEx,
    Mod,
}

impl PackageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageKind::Game => "game",
            PackageKind::BepInEx => "bepinex",
            PackageKind::Mod => "mod",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    url: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

// GET {base}?type=&name=&version= answers {url, expires_at}.
pub struct DownloadApi {
    base_url: String,
}

impl DownloadApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches(['?', '&', '/']).to_string(),
        }
    }

    pub fn request_url(&self, kind: PackageKind, name: Option<&str>, version: &str) -> String {
        let mut url = format!("{}?type={}", self.base_url, kind.as_str());
        if let Some(name) = name {
            url.push_str("&name=");
            url.push_str(&encode_query(name));
        }
        url.push_str("&version=");
        url.push_str(&encode_query(version));
        url
    }

    pub fn resolve(
        &self,
        fetcher: &dyn Fetcher,
        kind: PackageKind,
        name: Option<&str>,
        version: &str,
    ) -> ModResult<SignedUrl> {
        if kind == PackageKind::Mod && name.is_none() {
            return Err(ModError::Network("a mod download needs a name".to_string()));
        }
        let response: SignedUrlResponse = get_json(fetcher, &self.request_url(kind, name, version))?;
        match response.url {
            Some(url) if !url.is_empty() => Ok(SignedUrl {
                url,
                expires_at: response.expires_at,
            }),
            _ => Err(ModError::Network(
                response
                    .error
                    .unwrap_or_else(|| "response has no `url` field".to_string()),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub tag: String,
    pub name: String,
    pub url: String,
}

pub fn latest_release_asset(
    fetcher: &dyn Fetcher,
    repo: &str,
    extensions: &[&str],
) -> ModResult<ReleaseAsset> {
    let url = format!("{GITHUB_API}/{}/releases/latest", repo.trim_matches('/'));
    let release: Release = get_json(fetcher, &url)?;
    if release.prerelease {
        return Err(ModError::Network(format!(
            "{repo}: latest release {} is a prerelease",
            release.tag_name
        )));
    }

    for ext in extensions {
        if let Some(asset) = release
            .assets
            .iter()
            .find(|asset| asset.name.to_ascii_lowercase().ends_with(ext))
        {
            return Ok(ReleaseAsset {
                tag: release.tag_name.clone(),
                name: asset.name.clone(),
                url: asset.browser_download_url.clone(),
            });
        }
    }

    Err(ModError::Network(format!(
        "{repo}: release {} has no {} asset",
        release.tag_name,
        extensions.join("/")
    )))
}

fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
