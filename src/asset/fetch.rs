//! Asset transport.
//!
//! - `FileFetcher`: local paths and `file://` URLs, resolved against an
//!   optional asset root
//! - `HttpFetcher`: `http(s)://` via ureq (feature: asset-http)
//! - `RoutingFetcher`: picks one of the above by locator scheme
//!
//! Every fetcher enforces the byte limit while reading, so an oversized or
//! lying server cannot make us buffer more than `max_bytes + 1`.

use anyhow::{anyhow, bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AssetSettings;

/// Raw bytes of a model plus whatever the transport said about them.
#[derive(Clone, Debug)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Where the bytes actually came from (after root resolution).
    pub source: String,
}

pub trait AssetFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn fetch(&self, locator: &str, max_bytes: u64) -> Result<FetchedAsset>;
}

fn read_limited(reader: impl Read, max_bytes: u64, source: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .with_context(|| format!("read asset {}", source))?;
    if bytes.len() as u64 > max_bytes {
        bail!("asset {} exceeds the {} byte limit", source, max_bytes);
    }
    if bytes.is_empty() {
        bail!("asset {} is empty", source);
    }
    Ok(bytes)
}

#[derive(Clone, Debug, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let raw = locator.strip_prefix("file://").unwrap_or(locator);
        let path = Path::new(raw);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl AssetFetcher for FileFetcher {
    fn name(&self) -> &'static str {
        "file"
    }

    fn fetch(&self, locator: &str, max_bytes: u64) -> Result<FetchedAsset> {
        let path = self.resolve(locator);
        let source = path.display().to_string();
        let file = std::fs::File::open(&path).with_context(|| format!("open asset {}", source))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat asset {}", source))?
            .len();
        if len > max_bytes {
            bail!("asset {} is {} bytes, limit is {}", source, len, max_bytes);
        }
        let bytes = read_limited(file, max_bytes, &source)?;
        Ok(FetchedAsset {
            bytes,
            content_type: None,
            source,
        })
    }
}

#[cfg(feature = "asset-http")]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

#[cfg(feature = "asset-http")]
impl HttpFetcher {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

#[cfg(feature = "asset-http")]
impl AssetFetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    fn fetch(&self, locator: &str, max_bytes: u64) -> Result<FetchedAsset> {
        let url = url::Url::parse(locator).context("parse asset url")?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("unsupported asset scheme '{}'; expected http(s)", url.scheme());
        }
        let response = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("fetch asset from {}", url))?;
        if let Some(declared) = response
            .header("Content-Length")
            .and_then(|len| len.parse::<u64>().ok())
        {
            if declared > max_bytes {
                bail!("asset {} is {} bytes, limit is {}", url, declared, max_bytes);
            }
        }
        let content_type = response.header("Content-Type").map(str::to_string);
        let bytes = read_limited(response.into_reader(), max_bytes, url.as_str())?;
        Ok(FetchedAsset {
            bytes,
            content_type,
            source: url.to_string(),
        })
    }
}

/// Dispatches by scheme: `http(s)://` to HTTP, everything else to files.
pub struct RoutingFetcher {
    file: FileFetcher,
    #[cfg(feature = "asset-http")]
    http: HttpFetcher,
}

impl RoutingFetcher {
    pub fn new(settings: &AssetSettings) -> Self {
        Self {
            file: FileFetcher::new(settings.root.clone()),
            #[cfg(feature = "asset-http")]
            http: HttpFetcher::new(settings.timeout),
        }
    }
}

impl AssetFetcher for RoutingFetcher {
    fn name(&self) -> &'static str {
        "routing"
    }

    fn fetch(&self, locator: &str, max_bytes: u64) -> Result<FetchedAsset> {
        let is_http = locator.starts_with("http://") || locator.starts_with("https://");
        if !is_http {
            return self.file.fetch(locator, max_bytes);
        }
        #[cfg(feature = "asset-http")]
        {
            self.http.fetch(locator, max_bytes)
        }
        #[cfg(not(feature = "asset-http"))]
        {
            Err(anyhow!(
                "fetching {} requires the asset-http feature",
                locator
            ))
        }
    }
}

pub fn fetcher_for(settings: &AssetSettings) -> Arc<dyn AssetFetcher> {
    Arc::new(RoutingFetcher::new(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_asset(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn file_fetcher_reads_plain_and_file_urls() -> Result<()> {
        let file = temp_asset(b"glTF....");
        let fetcher = FileFetcher::default();
        let plain = fetcher.fetch(file.path().to_str().unwrap(), 1024)?;
        assert_eq!(plain.bytes, b"glTF....");
        let url = format!("file://{}", file.path().display());
        assert_eq!(fetcher.fetch(&url, 1024)?.bytes.len(), 8);
        Ok(())
    }

    #[test]
    fn file_fetcher_resolves_relative_to_root() -> Result<()> {
        let file = temp_asset(b"{}");
        let dir = file.path().parent().unwrap().to_path_buf();
        let name = file.path().file_name().unwrap().to_str().unwrap().to_string();
        let fetcher = FileFetcher::new(Some(dir));
        assert_eq!(fetcher.fetch(&name, 16)?.bytes, b"{}");
        Ok(())
    }

    #[test]
    fn size_limit_is_enforced() {
        let file = temp_asset(&[7u8; 64]);
        let err = FileFetcher::default()
            .fetch(file.path().to_str().unwrap(), 63)
            .unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(FileFetcher::default()
            .fetch("/nonexistent/watch.glb", 1024)
            .is_err());
    }

    #[test]
    fn read_limited_rejects_empty() {
        assert!(read_limited(&b""[..], 10, "empty").is_err());
    }

    #[cfg(not(feature = "asset-http"))]
    #[test]
    fn http_needs_feature() {
        let fetcher = fetcher_for(&crate::config::TryOnConfig::default().assets);
        let err = fetcher.fetch("https://cdn.example/watch.glb", 1024).unwrap_err();
        assert!(err.to_string().contains("asset-http"));
    }
}
