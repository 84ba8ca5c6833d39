//! Rule-Text Refresh
//!
//! Fetches rule-list text from HTTP or filesystem sources and keeps an
//! on-disk copy per filter. The disk copy serves two purposes: it skips
//! the network entirely while fresh, and it is the fallback when a refresh
//! fails and the caller accepts stale rules over no rules.
//!
//! # Features
//!
//! * Freshness tracked by the cache file's modification time
//! * Download size capped; oversized and empty bodies are rejected
//! * Cache files written to a temp name and renamed, so a crashed refresh
//!   never leaves a half-written list behind

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use derive_more::{Display, Error, From};
use log::{debug, warn};

use crate::filter::id::FilterId;

#[derive(Debug, Display, Error, From)]
pub enum RefreshError {
    #[display(fmt = "fetching rules: {}", _0)]
    Http(reqwest::Error),
    #[display(fmt = "rule cache io: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "rule source returned status {}", status)]
    #[from(ignore)]
    Status {
        #[error(not(source))]
        status: u16,
    },
    #[display(fmt = "rule text exceeds {} bytes", limit)]
    #[from(ignore)]
    Oversized {
        #[error(not(source))]
        limit: u64,
    },
    #[display(fmt = "rule source returned an empty body")]
    EmptyBody,
}

pub type Result<T> = std::result::Result<T, RefreshError>;

/// Where a rule list's text lives.
#[derive(Debug, Clone)]
pub enum Source {
    Url(String),
    File(PathBuf),
}

/// Fetches and caches rule-list text.
pub struct RuleFetcher {
    client: reqwest::blocking::Client,
    cache_dir: PathBuf,
    max_size: u64,
    max_staleness: Duration,
}

impl RuleFetcher {
    pub fn new(cache_dir: PathBuf, max_size: u64, max_staleness: Duration) -> Result<RuleFetcher> {
        fs::create_dir_all(&cache_dir)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(RuleFetcher {
            client,
            cache_dir,
            max_size,
            max_staleness,
        })
    }

    fn cache_path(&self, id: &FilterId) -> PathBuf {
        // FilterId forbids slashes, so the id is safe as a file name.
        self.cache_dir.join(format!("{}.txt", id))
    }

    fn cached_if_fresh(&self, id: &FilterId) -> Option<String> {
        let path = self.cache_path(id);
        let modified = fs::metadata(&path).ok()?.modified().ok()?;
        let age = modified.elapsed().ok()?;
        if age <= self.max_staleness {
            fs::read_to_string(&path).ok()
        } else {
            None
        }
    }

    fn persist(&self, id: &FilterId, text: &str) -> Result<()> {
        let path = self.cache_path(id);
        let tmp = path.with_extension("txt.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn fetch_url(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RefreshError::Status {
                status: status.as_u16(),
            });
        }

        // Read one byte past the limit to tell "at the limit" from "over".
        let mut text = String::new();
        resp.take(self.max_size + 1).read_to_string(&mut text)?;
        if text.len() as u64 > self.max_size {
            return Err(RefreshError::Oversized {
                limit: self.max_size,
            });
        }
        if text.trim().is_empty() {
            return Err(RefreshError::EmptyBody);
        }
        Ok(text)
    }

    fn fetch_file(&self, path: &PathBuf) -> Result<String> {
        if fs::metadata(path)?.len() > self.max_size {
            return Err(RefreshError::Oversized {
                limit: self.max_size,
            });
        }
        let text = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Err(RefreshError::EmptyBody);
        }
        Ok(text)
    }

    /// Returns the rule text for `id`, from the disk cache while it is
    /// fresh, otherwise from `source`. With `accept_stale`, a failed fetch
    /// falls back to whatever copy is on disk rather than erroring.
    pub fn fetch(&self, id: &FilterId, source: &Source, accept_stale: bool) -> Result<String> {
        if let Some(text) = self.cached_if_fresh(id) {
            debug!("filter {}: using fresh cached rules", id);
            return Ok(text);
        }

        let fetched = match source {
            Source::Url(url) => self.fetch_url(url),
            Source::File(path) => self.fetch_file(path),
        };

        let text = match fetched {
            Ok(text) => text,
            Err(err) => {
                if accept_stale {
                    if let Ok(text) = fs::read_to_string(self.cache_path(id)) {
                        warn!("filter {}: refresh failed ({}), using stale rules", id, err);
                        return Ok(text);
                    }
                }
                return Err(err);
            }
        };

        self.persist(id, &text)?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn fetcher(tag: &str, staleness: Duration) -> (RuleFetcher, PathBuf) {
        let dir = env::temp_dir().join(format!("sift-refresh-{}-{}", tag, std::process::id()));
        let f = RuleFetcher::new(dir.clone(), 1024, staleness).unwrap();
        (f, dir)
    }

    #[test]
    fn test_file_source_roundtrip() {
        let (f, dir) = fetcher("roundtrip", Duration::from_secs(0));
        let src = dir.join("src.txt");
        fs::write(&src, "||blocked.example^\n").unwrap();

        let id = FilterId::new("list_a").unwrap();
        let text = f.fetch(&id, &Source::File(src), false).unwrap();
        assert_eq!(text, "||blocked.example^\n");

        // The fetched copy lands in the cache dir.
        assert!(dir.join("list_a.txt").exists());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_fresh_cache_skips_source() {
        let (f, dir) = fetcher("fresh", Duration::from_secs(3600));
        let id = FilterId::new("list_b").unwrap();
        fs::write(dir.join("list_b.txt"), "cached\n").unwrap();

        // The source path does not exist; a fresh cache must still win.
        let text = f
            .fetch(&id, &Source::File(dir.join("missing.txt")), false)
            .unwrap();
        assert_eq!(text, "cached\n");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_stale_fallback() {
        let (f, dir) = fetcher("stale", Duration::from_secs(0));
        let id = FilterId::new("list_c").unwrap();
        fs::write(dir.join("list_c.txt"), "stale\n").unwrap();

        let missing = Source::File(dir.join("missing.txt"));
        assert!(f.fetch(&id, &missing, false).is_err());
        assert_eq!(f.fetch(&id, &missing, true).unwrap(), "stale\n");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_empty_body_rejected() {
        let (f, dir) = fetcher("empty", Duration::from_secs(0));
        let src = dir.join("empty.txt");
        fs::write(&src, "  \n").unwrap();

        let id = FilterId::new("list_d").unwrap();
        match f.fetch(&id, &Source::File(src), false) {
            Err(RefreshError::EmptyBody) => {}
            other => panic!("expected EmptyBody, got {:?}", other.map(|_| ())),
        }
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_empty_body_falls_back_to_stale() {
        let (f, dir) = fetcher("empty-stale", Duration::from_secs(0));
        let id = FilterId::new("list_f").unwrap();
        fs::write(dir.join("list_f.txt"), "||stale.example^\n").unwrap();

        let src = dir.join("blank.txt");
        fs::write(&src, "  \n").unwrap();

        // An empty body fails like any other fetch error, so the stale
        // on-disk copy still serves when the caller accepts it.
        let blank = Source::File(src);
        match f.fetch(&id, &blank, false) {
            Err(RefreshError::EmptyBody) => {}
            other => panic!("expected EmptyBody, got {:?}", other.map(|_| ())),
        }
        assert_eq!(f.fetch(&id, &blank, true).unwrap(), "||stale.example^\n");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_oversized_rejected() {
        let (f, dir) = fetcher("oversized", Duration::from_secs(0));
        let src = dir.join("big.txt");
        fs::write(&src, "x".repeat(2048)).unwrap();

        let id = FilterId::new("list_e").unwrap();
        match f.fetch(&id, &Source::File(src), false) {
            Err(RefreshError::Oversized { limit: 1024 }) => {}
            other => panic!("expected Oversized, got {:?}", other.map(|_| ())),
        }
        fs::remove_dir_all(dir).unwrap();
    }
}
