use chrono::{DateTime, Local, TimeZone};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::release::{Asset, Release};
use crate::error::{Result, UpdateError};

const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("ghau/", env!("CARGO_PKG_VERSION"));
const PER_PAGE: u32 = 100;

/// Remaining API requests and when the allowance resets.
#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub remaining: u32,
    pub reset: DateTime<Local>,
}

/// Where releases come from.
pub trait ReleaseSource {
    /// Releases of `repo`, newest first.
    fn list_releases(&self, repo: &str, credential: Option<&str>) -> Result<Vec<Release>>;

    fn remaining_quota(&self, credential: Option<&str>) -> Result<Quota>;
}

/// Moves bytes from a URL into a local file.
pub trait Transport {
    fn fetch(&self, url: &str, dest: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<GithubAsset>,
    zipball_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitCore,
}

#[derive(Debug, Deserialize)]
struct RateLimitCore {
    remaining: u32,
    reset: i64,
}

impl From<GithubRelease> for Release {
    fn from(r: GithubRelease) -> Self {
        Self {
            tag: r.tag_name,
            prerelease: r.prerelease,
            assets: r
                .assets
                .into_iter()
                .map(|a| Asset {
                    name: a.name,
                    download_url: a.browser_download_url,
                })
                .collect(),
            archive_url: r.zipball_url.unwrap_or_default(),
        }
    }
}

/// Release source backed by the GitHub REST API.
pub struct GithubSource {
    client: Client,
    api_url: String,
}

impl GithubSource {
    pub fn new() -> Result<Self> {
        Self::with_api_url(GITHUB_API_URL)
    }

    pub fn with_api_url(api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UpdateError::network(GITHUB_API_URL, e))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    fn get(&self, url: &str, credential: Option<&str>) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        match credential {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl GithubSource {
    /// One page of releases plus the URL of the next page, if any.
    fn release_page(
        &self,
        url: &str,
        repo: &str,
        credential: Option<&str>,
    ) -> Result<(Vec<GithubRelease>, Option<String>)> {
        let response = self
            .get(url, credential)
            .send()
            .map_err(|e| UpdateError::network(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(UpdateError::RepositoryNotFound {
                repo: repo.to_string(),
            });
        }
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(reset) = exhausted_quota_reset(&response) {
                return Err(UpdateError::QuotaExhausted { reset });
            }
        }
        if !status.is_success() {
            return Err(UpdateError::network(
                url,
                format!("{} {}", status, response.text().unwrap_or_default()),
            ));
        }

        let next = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_link);
        let releases = response.json().map_err(|e| UpdateError::network(url, e))?;
        Ok((releases, next))
    }
}

impl ReleaseSource for GithubSource {
    fn list_releases(&self, repo: &str, credential: Option<&str>) -> Result<Vec<Release>> {
        let mut url = format!("{}/repos/{}/releases?per_page={}", self.api_url, repo, PER_PAGE);
        let mut releases = Vec::new();
        loop {
            let (page, next) = self.release_page(&url, repo, credential)?;
            tracing::debug!("Fetched {} releases from {}", page.len(), url);
            releases.extend(page.into_iter().filter(|r| !r.draft).map(Release::from));
            match next {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(releases)
    }

    fn remaining_quota(&self, credential: Option<&str>) -> Result<Quota> {
        let url = format!("{}/rate_limit", self.api_url);
        let response = self
            .get(&url, credential)
            .send()
            .map_err(|e| UpdateError::network(&url, e))?;

        if !response.status().is_success() {
            return Err(UpdateError::network(&url, response.status()));
        }

        let body: RateLimitResponse = response.json().map_err(|e| UpdateError::network(&url, e))?;
        Ok(Quota {
            remaining: body.resources.core.remaining,
            reset: reset_time(body.resources.core.reset),
        })
    }
}

fn exhausted_quota_reset(response: &Response) -> Option<DateTime<Local>> {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
    };

    if header("x-ratelimit-remaining")? != 0 {
        return None;
    }
    Some(reset_time(header("x-ratelimit-reset").unwrap_or_default()))
}

/// Target of the `rel="next"` entry in a `Link` header.
fn next_page_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

fn reset_time(epoch_secs: i64) -> DateTime<Local> {
    Local
        .timestamp_opt(epoch_secs, 0)
        .single()
        .unwrap_or_else(Local::now)
}

/// HTTP download with a progress bar.
pub struct HttpTransport {
    client: Client,
    credential: Option<String>,
    verbose: bool,
}

impl HttpTransport {
    pub fn new(credential: Option<String>, verbose: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UpdateError::network(GITHUB_API_URL, e))?;
        Ok(Self {
            client,
            credential,
            verbose,
        })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.credential {
            request = request.bearer_auth(token);
        }
        let mut response = request.send().map_err(|e| UpdateError::network(url, e))?;

        if !response.status().is_success() {
            return Err(UpdateError::network(
                url,
                format!("Download failed: {}", response.status()),
            ));
        }

        let pb = match response.content_length() {
            Some(total) => {
                let pb = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                {
                    pb.set_style(style.progress_chars("#>-"));
                }
                pb
            }
            None => ProgressBar::new_spinner(),
        };

        let verbose = self.verbose;
        let result = write_stream(&mut response, url, dest, |chunk, downloaded| {
            pb.set_position(downloaded);
            if verbose {
                tracing::info!("Wrote chunk {} to {}", chunk, dest.display());
            } else {
                tracing::trace!("Wrote chunk {} to {}", chunk, dest.display());
            }
        });
        let downloaded = match result {
            Ok(downloaded) => downloaded,
            Err(e) => {
                pb.abandon();
                return Err(e);
            }
        };

        pb.finish_and_clear();
        tracing::info!("Downloaded {} bytes to {}", downloaded, dest.display());
        Ok(dest.to_path_buf())
    }
}

/// Copy `reader` into a new file at `dest`, reporting each chunk.
///
/// A failed copy removes whatever was written so far.
fn write_stream(
    reader: &mut impl Read,
    url: &str,
    dest: &Path,
    mut on_chunk: impl FnMut(usize, u64),
) -> Result<u64> {
    let result = copy_chunks(reader, url, dest, &mut on_chunk);
    if result.is_err() && dest.exists() {
        if let Err(e) = std::fs::remove_file(dest) {
            tracing::warn!("Failed to remove partial download {}: {}", dest.display(), e);
        }
    }
    result
}

fn copy_chunks(
    reader: &mut impl Read,
    url: &str,
    dest: &Path,
    on_chunk: &mut impl FnMut(usize, u64),
) -> Result<u64> {
    let mut file = File::create(dest)
        .map_err(|e| UpdateError::io(format!("Failed to create {}", dest.display()), e))?;
    let mut downloaded: u64 = 0;
    let mut chunk = 0usize;
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| UpdateError::network(url, e))?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])
            .map_err(|e| UpdateError::io(format!("Failed to write {}", dest.display()), e))?;
        downloaded += bytes_read as u64;
        chunk += 1;
        on_chunk(chunk, downloaded);
    }
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_from_api_json() {
        let json = r#"[
            {"tag_name": "v2.0", "prerelease": false, "draft": false,
             "zipball_url": "https://api.github.com/repos/o/r/zipball/v2.0",
             "assets": [{"name": "app.exe", "browser_download_url": "https://dl/app.exe", "size": 10}]},
            {"tag_name": "v2.1", "prerelease": true, "draft": true, "zipball_url": null, "assets": []}
        ]"#;
        let parsed: Vec<GithubRelease> = serde_json::from_str(json).unwrap();
        let releases: Vec<Release> = parsed
            .into_iter()
            .filter(|r| !r.draft)
            .map(Release::from)
            .collect();

        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].tag, "v2.0");
        assert_eq!(releases[0].assets[0].download_url, "https://dl/app.exe");
        assert!(releases[0].archive_url.ends_with("zipball/v2.0"));
    }

    #[test]
    fn test_next_page_link() {
        let header = r#"<https://api.github.com/repositories/1/releases?per_page=100&page=2>; rel="next", <https://api.github.com/repositories/1/releases?per_page=100&page=4>; rel="last""#;
        assert_eq!(
            next_page_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/releases?per_page=100&page=2")
        );

        let last_page = r#"<https://api.github.com/repositories/1/releases?page=1>; rel="first", <https://api.github.com/repositories/1/releases?page=3>; rel="prev""#;
        assert_eq!(next_page_link(last_page), None);
        assert_eq!(next_page_link(""), None);
    }

    /// Yields `good` bytes, then fails.
    struct BrokenReader {
        good: usize,
    }

    impl Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.good == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ));
            }
            let n = self.good.min(buf.len());
            buf[..n].fill(b'x');
            self.good -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_interrupted_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("update.zip");
        let mut chunks = 0;

        let err = write_stream(&mut BrokenReader { good: 20_000 }, "https://dl/x", &dest, |_, _| {
            chunks += 1
        })
        .unwrap_err();

        assert!(matches!(err, UpdateError::Network { .. }));
        assert!(chunks > 0);
        assert!(!dest.exists());
    }

    #[test]
    fn test_complete_download_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app.bin");
        let mut data: &[u8] = b"release bytes";

        let written = write_stream(&mut data, "https://dl/app.bin", &dest, |_, _| {}).unwrap();

        assert_eq!(written, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"release bytes");
    }

    #[test]
    fn test_reset_time_from_epoch() {
        let t = reset_time(1_700_000_000);
        assert_eq!(t.timestamp(), 1_700_000_000);
    }
}
