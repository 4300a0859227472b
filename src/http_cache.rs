use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ETAG, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const CACHE_VERSION: u32 = 2;
const CACHE_DIR: &str = "zone_discipline";
const INDEX_FILE: &str = "http_index.json";
const BODY_DIR: &str = "http";

static INDEX: Mutex<Option<CacheIndex>> = Mutex::new(None);

/// Validators live in one small index; bodies (event files run to several
/// MB) are stored one file per URL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CacheIndex {
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    body_file: String,
    etag: Option<String>,
    last_modified: Option<String>,
    fetched_at: u64,
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

/// GET with conditional revalidation. Serves the stored body on 304.
pub fn fetch_text_cached(client: &Client, url: &str) -> Result<String> {
    let cached = {
        let mut guard = INDEX.lock();
        let index = guard.get_or_insert_with(load_index);
        index.entries.get(url).cloned()
    };
    let cached_body = cached
        .as_ref()
        .and_then(|entry| read_body(&entry.body_file));

    let mut req = client.get(url);
    if let Some(entry) = cached.as_ref()
        && cached_body.is_some()
    {
        if let Some(etag) = entry.etag.as_ref() {
            req = req.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = entry.last_modified.as_ref() {
            req = req.header(IF_MODIFIED_SINCE, last_modified);
        }
    }

    let resp = req.send().with_context(|| format!("GET {url}"))?;
    let status = resp.status();
    if status == StatusCode::NOT_MODIFIED {
        debug!(url, "http cache revalidated");
        return cached_body.ok_or_else(|| anyhow!("received 304 without cached body for {url}"));
    }

    let headers = resp.headers().clone();
    let body = resp.text().context("failed reading body")?;
    if !status.is_success() {
        return Err(anyhow!("http {status} for {url}"));
    }

    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let entry = CacheEntry {
        body_file: body_file_name(url),
        etag: header(ETAG),
        last_modified: header(LAST_MODIFIED),
        fetched_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    };
    if let Err(err) = store(url, entry, &body) {
        warn!(url, error = %err, "http cache write failed");
    }
    Ok(body)
}

fn body_file_name(url: &str) -> String {
    format!("{:x}.body", Sha256::digest(url.as_bytes()))
}

fn read_body(name: &str) -> Option<String> {
    let path = app_cache_dir()?.join(BODY_DIR).join(name);
    fs::read_to_string(path).ok()
}

fn store(url: &str, entry: CacheEntry, body: &str) -> Result<()> {
    let Some(dir) = app_cache_dir() else {
        return Ok(());
    };
    let body_dir = dir.join(BODY_DIR);
    fs::create_dir_all(&body_dir).context("create http cache dir")?;
    let body_path = body_dir.join(&entry.body_file);
    let tmp = body_path.with_extension("body.tmp");
    fs::write(&tmp, body).context("write cached body")?;
    fs::rename(&tmp, &body_path).context("swap cached body")?;

    let mut guard = INDEX.lock();
    let index = guard.get_or_insert_with(load_index);
    index.version = CACHE_VERSION;
    index.entries.insert(url.to_string(), entry);
    save_index(index)
}

fn load_index() -> CacheIndex {
    let Some(path) = app_cache_dir().map(|d| d.join(INDEX_FILE)) else {
        return CacheIndex::default();
    };
    let Ok(raw) = fs::read_to_string(path) else {
        return CacheIndex::default();
    };
    let index = serde_json::from_str::<CacheIndex>(&raw).unwrap_or_default();
    if index.version != CACHE_VERSION {
        return CacheIndex::default();
    }
    index
}

fn save_index(index: &CacheIndex) -> Result<()> {
    let Some(dir) = app_cache_dir() else {
        return Ok(());
    };
    let path = dir.join(INDEX_FILE);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(index).context("serialize http cache index")?;
    fs::write(&tmp, json).context("write http cache index")?;
    fs::rename(&tmp, &path).context("swap http cache index")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_file_name_is_stable_per_url() {
        let a = body_file_name("https://example.org/events/1.json");
        let b = body_file_name("https://example.org/events/1.json");
        let c = body_file_name("https://example.org/events/2.json");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".body"));
        assert_eq!(a.len(), 64 + ".body".len());
    }
}
