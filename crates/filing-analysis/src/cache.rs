//! On-disk filing cache with a time-to-live
//!
//! One human-readable JSON file per `(company_id, data_kind)` key. Each file
//! embeds its `created_at` timestamp; entries older than the TTL are ignored
//! by reads and only removed by [`FilingCache::sweep_expired`].
//!
//! Writes go to a uniquely named temporary file that is then renamed over the
//! entry, so readers see either the old or the new entry and concurrent puts
//! to the same key are last-writer-wins. Different keys never share a file or
//! a lock.

use crate::error::CacheError;
use crate::model::CompanyFilingSnapshot;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cache key, case-insensitive in both parts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub company_id: String,
    pub data_kind: String,
}

impl CacheKey {
    pub fn new(company_id: impl AsRef<str>, data_kind: impl AsRef<str>) -> Self {
        Self {
            company_id: canonical(company_id.as_ref()),
            data_kind: canonical(data_kind.as_ref()),
        }
    }

    /// File name stem, safe on every filesystem
    pub fn file_stem(&self) -> String {
        format!("{}__{}", sanitize(&self.company_id), sanitize(&self.data_kind))
    }
}

fn canonical(part: &str) -> String {
    part.trim().to_lowercase()
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() { "_".to_string() } else { cleaned }
}

/// Stored cache record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
    pub payload: CompanyFilingSnapshot,
}

/// Filesystem-backed snapshot cache
#[derive(Clone)]
pub struct FilingCache {
    dir: PathBuf,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FilingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilingCache")
            .field("dir", &self.dir)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl FilingCache {
    /// Create a cache in `dir` with the given TTL, using the system clock
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry file for a key
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{ENTRY_EXTENSION}", key.file_stem()))
    }

    fn is_stale(&self, created_at: DateTime<Utc>) -> bool {
        self.clock.now().signed_duration_since(created_at) > self.ttl
    }

    /// Fresh snapshot for the key, if any.
    ///
    /// Missing, stale and unreadable entries all yield `None`; only
    /// filesystem failures other than "not found" are errors.
    pub async fn get(
        &self,
        company_id: &str,
        data_kind: &str,
    ) -> Result<Option<CompanyFilingSnapshot>, CacheError> {
        let key = CacheKey::new(company_id, data_kind);
        let path = self.entry_path(&key);

        let Some(entry) = self.read_entry(&path).await? else {
            debug!(company = company_id, data_kind, "Cache miss");
            return Ok(None);
        };

        if entry.key != key {
            warn!(path = %path.display(), "Cache entry key does not match its file; ignoring");
            return Ok(None);
        }
        if self.is_stale(entry.created_at) {
            debug!(company = company_id, data_kind, created_at = %entry.created_at, "Cache entry is stale");
            return Ok(None);
        }

        debug!(company = company_id, data_kind, "Cache hit");
        Ok(Some(entry.payload))
    }

    /// Store a snapshot, replacing any existing entry for the key
    pub async fn put(
        &self,
        company_id: &str,
        data_kind: &str,
        snapshot: &CompanyFilingSnapshot,
    ) -> Result<(), CacheError> {
        let key = CacheKey::new(company_id, data_kind);
        let path = self.entry_path(&key);
        let entry = CacheEntry {
            key,
            created_at: self.clock.now(),
            payload: snapshot.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&entry)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?;
        write_atomically(&path, &bytes).await?;

        debug!(path = %path.display(), "Cached snapshot");
        Ok(())
    }

    /// Delete stale entries; returns how many were removed
    pub async fn sweep_expired(&self) -> Result<usize, CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        let mut removed = 0;
        while let Some(dir_entry) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?
        {
            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(entry) = self.read_entry(&path).await? else {
                continue;
            };
            if self.is_stale(entry.created_at) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::io(&path, e)),
                }
            }
        }

        info!(removed, dir = %self.dir.display(), "Swept expired cache entries");
        Ok(removed)
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable cache entry; treating as absent");
                Ok(None)
            }
        }
    }
}

/// Write to a unique temporary sibling, then rename it over `path`
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("entry");
    let temp = path.with_file_name(format!(".{file_name}.{}.{TEMP_EXTENSION}", uuid::Uuid::new_v4()));

    tokio::fs::write(&temp, bytes)
        .await
        .map_err(|e| CacheError::io(&temp, e))?;

    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(CacheError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilingType, Statements};
    use chrono::{NaiveDate, TimeZone};

    fn snapshot(company: &str) -> CompanyFilingSnapshot {
        CompanyFilingSnapshot {
            company_id: company.to_string(),
            filing_type: FilingType::Form10Q,
            filing_date: NaiveDate::from_ymd_opt(2025, 10, 23).unwrap(),
            accession_id: "0001628280-25-045968".to_string(),
            statements: Statements::default(),
            calculations: Vec::new(),
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 24, 9, 0, 0).unwrap()
    }

    fn cache_with_clock(dir: &Path) -> (FilingCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let cache = FilingCache::new(dir, Duration::from_secs(24 * 60 * 60)).with_clock(clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_with_clock(dir.path());

        assert!(cache.get("Tesla", "10-Q").await.unwrap().is_none());
        cache.put("Tesla", "10-Q", &snapshot("Tesla")).await.unwrap();

        let cached = cache.get("Tesla", "10-Q").await.unwrap().unwrap();
        assert_eq!(cached, snapshot("Tesla"));
        assert!(cache.get("Tesla", "10-K").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_file_is_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_with_clock(dir.path());
        cache.put("Tesla", "10-Q", &snapshot("Tesla")).await.unwrap();

        let path = cache.entry_path(&CacheKey::new("Tesla", "10-Q"));
        assert_eq!(path.file_name().unwrap(), "tesla__10-q.json");
        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["key"]["company_id"], "tesla");
        assert!(raw["created_at"].is_string());

        // No temporary files are left behind.
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_with_manual_clock() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, clock) = cache_with_clock(dir.path());
        cache.put("Tesla", "10-Q", &snapshot("Tesla")).await.unwrap();

        clock.advance(Duration::from_secs(23 * 60 * 60));
        assert!(cache.get("Tesla", "10-Q").await.unwrap().is_some());

        clock.advance(Duration::from_secs(2 * 60 * 60));
        assert!(cache.get("Tesla", "10-Q").await.unwrap().is_none());

        // Stale entries are ignored, not deleted, by reads.
        assert!(cache.entry_path(&CacheKey::new("Tesla", "10-Q")).exists());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, clock) = cache_with_clock(dir.path());
        cache.put("Tesla", "10-Q", &snapshot("Tesla")).await.unwrap();

        clock.advance(Duration::from_secs(25 * 60 * 60));
        let mut updated = snapshot("Tesla");
        updated.accession_id = "0001628280-26-000001".to_string();
        cache.put("Tesla", "10-Q", &updated).await.unwrap();

        let cached = cache.get("Tesla", "10-Q").await.unwrap().unwrap();
        assert_eq!(cached.accession_id, "0001628280-26-000001");
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, clock) = cache_with_clock(dir.path());
        cache.put("Tesla", "10-Q", &snapshot("Tesla")).await.unwrap();

        clock.advance(Duration::from_secs(30 * 60 * 60));
        cache.put("Apple", "10-Q", &snapshot("Apple")).await.unwrap();

        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert!(cache.get("Apple", "10-Q").await.unwrap().is_some());
        assert!(!cache.entry_path(&CacheKey::new("Tesla", "10-Q")).exists());
        assert_eq!(cache.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FilingCache::new(dir.path().join("never-created"), Duration::from_secs(60));
        assert_eq!(cache.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_with_clock(dir.path());
        let path = cache.entry_path(&CacheKey::new("Tesla", "10-Q"));
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(cache.get("Tesla", "10-Q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_puts_to_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_with_clock(dir.path());

        let companies = ["Tesla", "Apple", "Microsoft", "Nvidia"];
        let puts = companies.iter().map(|company| {
            let cache = cache.clone();
            async move { cache.put(company, "10-Q", &snapshot(company)).await }
        });
        for result in futures::future::join_all(puts).await {
            result.unwrap();
        }

        for company in companies {
            assert_eq!(cache.get(company, "10-Q").await.unwrap().unwrap().company_id, company);
        }
    }

    #[tokio::test]
    async fn test_keys_ignore_case() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_with_clock(dir.path());

        cache.put("Tesla", "10-Q", &snapshot("Tesla")).await.unwrap();
        assert!(cache.get("tesla", "10-q").await.unwrap().is_some());

        let mut updated = snapshot("Tesla");
        updated.accession_id = "0001628280-26-000001".to_string();
        cache.put("TESLA", "10-Q", &updated).await.unwrap();

        let cached = cache.get("Tesla", "10-Q").await.unwrap().unwrap();
        assert_eq!(cached.accession_id, "0001628280-26-000001");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_key_sanitization() {
        assert_eq!(CacheKey::new("Procter & Gamble", "10-K").file_stem(), "procter___gamble__10-k");
        assert_eq!(CacheKey::new("../etc", "x").file_stem(), ".._etc__x");
    }
}
