//! Resource sources: where snapshot records come from.
//!
//! A source lists the current records of one kind in one scope. Listing is
//! blocking; the collector runs each call on the blocking pool, so sources
//! must tolerate concurrent calls from several threads.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use itertools::Itertools;
use ruleops_core::{Error, ResourceKind, ResourceRecord, ResourceScope, Result, ResultExt};
use tracing::{debug, warn};

/// Lists cluster resources.
pub trait ResourceSource: Send + Sync {
    /// List every record of `kind` inside `scope`, in the source's order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn list(&self, kind: ResourceKind, scope: &ResourceScope) -> Result<Vec<ResourceRecord>>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "source"
    }
}

fn select(records: &[ResourceRecord], kind: ResourceKind, scope: &ResourceScope) -> Vec<ResourceRecord> {
    records
        .iter()
        .filter(|r| r.kind() == kind && scope.contains(r.namespace()))
        .cloned()
        .collect()
}

/// A source backed by records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryResourceSource {
    records: RwLock<Vec<ResourceRecord>>,
}

impl InMemoryResourceSource {
    /// Create a source holding `records`.
    #[must_use]
    pub const fn new(records: Vec<ResourceRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Replace every record; later listings see the new set.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock was poisoned.
    pub fn replace(&self, records: Vec<ResourceRecord>) -> Result<()> {
        let mut guard = self
            .records
            .write()
            .map_err(|e| Error::source_unavailable(format!("in-memory store poisoned: {e}")))?;
        *guard = records;
        Ok(())
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock was poisoned.
    pub fn push(&self, record: ResourceRecord) -> Result<()> {
        self.records
            .write()
            .map_err(|e| Error::source_unavailable(format!("in-memory store poisoned: {e}")))?
            .push(record);
        Ok(())
    }
}

impl ResourceSource for InMemoryResourceSource {
    fn list(&self, kind: ResourceKind, scope: &ResourceScope) -> Result<Vec<ResourceRecord>> {
        let guard = self
            .records
            .read()
            .map_err(|e| Error::source_unavailable(format!("in-memory store poisoned: {e}")))?;
        Ok(select(&guard, kind, scope))
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Name, modification time and length of every record file.
type Fingerprint = Vec<(PathBuf, Option<SystemTime>, u64)>;

#[derive(Debug)]
struct Loaded {
    fingerprint: Fingerprint,
    records: Arc<Vec<ResourceRecord>>,
}

/// A source reading record files from a directory.
///
/// Every `.yaml`, `.yml` and `.json` file directly inside the directory is
/// read in file name order. YAML files may hold several documents; each
/// document is a record or a list of records tagged by `kind`.
///
/// Parsed records are cached against the files' names, modification times
/// and lengths. Listings only stat the files, and re-parse once something
/// changed, so edits show up in the next run.
#[derive(Debug, Clone)]
pub struct FixtureResourceSource {
    dir: PathBuf,
    cache: Arc<Mutex<Option<Loaded>>>,
}

impl FixtureResourceSource {
    /// Create a source over `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryNotFound`] if `dir` is not a directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::directory_not_found(dir));
        }
        Ok(Self {
            dir,
            cache: Arc::new(Mutex::new(None)),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse every record file in the directory, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns the first read or parse error.
    pub fn load_all(&self) -> Result<Vec<ResourceRecord>> {
        let files = self.record_files()?;
        parse_files(&self.dir, &files)
    }

    /// Every record in the directory, parsed again only if a file changed.
    ///
    /// # Errors
    ///
    /// Returns the first read or parse error.
    pub fn records(&self) -> Result<Arc<Vec<ResourceRecord>>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|e| Error::source_unavailable(format!("fixture cache poisoned: {e}")))?;

        let files = self.record_files()?;
        let fingerprint = fingerprint(&files)?;
        if let Some(loaded) = cache.as_ref().filter(|l| l.fingerprint == fingerprint) {
            return Ok(Arc::clone(&loaded.records));
        }

        let records = Arc::new(parse_files(&self.dir, &files)?);
        *cache = Some(Loaded {
            fingerprint,
            records: Arc::clone(&records),
        });
        Ok(records)
    }

    fn record_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| Error::file_read_failed(&self.dir, e.to_string()))?;

        Ok(entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && record_format(path).is_some())
            .sorted()
            .collect())
    }
}

impl ResourceSource for FixtureResourceSource {
    fn list(&self, kind: ResourceKind, scope: &ResourceScope) -> Result<Vec<ResourceRecord>> {
        self.records().map(|records| select(&records, kind, scope))
    }

    fn name(&self) -> &str {
        "fixtures"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordFormat {
    Yaml,
    Json,
}

fn record_format(path: &Path) -> Option<RecordFormat> {
    match path.extension()?.to_str()? {
        "yaml" | "yml" => Some(RecordFormat::Yaml),
        "json" => Some(RecordFormat::Json),
        _ => None,
    }
}

fn fingerprint(files: &[PathBuf]) -> Result<Fingerprint> {
    files
        .iter()
        .map(|path| {
            let meta = fs::metadata(path).map_err(|e| Error::file_read_failed(path, e.to_string()))?;
            Ok((path.clone(), meta.modified().ok(), meta.len()))
        })
        .collect()
}

fn parse_files(dir: &Path, files: &[PathBuf]) -> Result<Vec<ResourceRecord>> {
    debug!(dir = %dir.display(), files = files.len(), "Loading fixture files");
    files
        .iter()
        .map(|path| {
            load_file(path).inspect_error(|e| {
                warn!(file = %path.display(), error = %e, "Failed to load fixture file");
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(|per_file| per_file.into_iter().flatten().collect())
}

fn load_file(path: &Path) -> Result<Vec<ResourceRecord>> {
    let content = fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    match record_format(path) {
        Some(RecordFormat::Json) => ResourceRecord::parse_json(&content),
        Some(RecordFormat::Yaml) | None => ResourceRecord::parse_yaml_stream(&content),
    }
}
