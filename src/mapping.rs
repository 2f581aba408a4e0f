//! Learned OSC address → controller number mapping
//!
//! The store owns the mapping and the pool of free controller numbers behind a
//! single lock, so looking up and allocating a number is atomic even when
//! events arrive from several tasks at once. The mapping is read from a JSON
//! file at startup and written back in full at shutdown.

use crate::error::{MappingError, PoolExhausted};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// OSC address → controller number
pub type Mapping = BTreeMap<String, u8>;

/// Controller numbers not yet assigned to any address
pub type Pool = BTreeSet<u8>;

/// Address that is mapped to controller 0 unless the file says otherwise
pub const PING_ADDRESS: &str = "/ping";

/// Controller reserved for [`PING_ADDRESS`]
pub const PING_CONTROLLER: u8 = 0;

/// Highest legal controller number. Never handed out by the allocator.
pub const MAX_CONTROLLER: u8 = 127;

/// Lowest and highest numbers the allocator may hand out
const FIRST_LEARNED: u8 = 1;
const LAST_LEARNED: u8 = 126;

/// How many addresses can be learned on top of `/ping`
pub const POOL_CAPACITY: usize = (LAST_LEARNED - FIRST_LEARNED + 1) as usize;

/// The mapping used when no file exists yet
pub fn default_mapping() -> Mapping {
    let mut mapping = Mapping::new();
    mapping.insert(PING_ADDRESS.to_string(), PING_CONTROLLER);
    mapping
}

/// Load a mapping file.
///
/// A missing file yields [`default_mapping`]. A file that exists but cannot be
/// parsed, holds numbers outside 0-127, or maps two addresses to the same
/// number is an error: starting empty would overwrite it on shutdown.
pub fn load(path: impl AsRef<Path>) -> Result<Mapping, MappingError> {
    let path = path.as_ref();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(
                "No mapping file found at {}, starting from scratch",
                path.display()
            );
            return Ok(default_mapping());
        }
        Err(source) => {
            return Err(MappingError::MappingIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mapping = parse(path, &text)?;
    info!(
        "Loaded {} mappings from {}",
        mapping.len(),
        path.display()
    );
    Ok(mapping)
}

fn parse(path: &Path, text: &str) -> Result<Mapping, MappingError> {
    let corrupt = |reason: String| MappingError::MappingFileCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let raw: BTreeMap<String, i64> =
        serde_json::from_str(text).map_err(|e| corrupt(e.to_string()))?;

    let mut mapping = Mapping::new();
    let mut owners: BTreeMap<u8, &str> = BTreeMap::new();
    for (address, value) in &raw {
        let controller = u8::try_from(*value)
            .ok()
            .filter(|c| *c <= MAX_CONTROLLER)
            .ok_or_else(|| corrupt(format!("{address} maps to {value}, outside 0-127")))?;

        if let Some(other) = owners.insert(controller, address) {
            return Err(corrupt(format!(
                "{other} and {address} both map to {controller}"
            )));
        }
        mapping.insert(address.clone(), controller);
    }

    if !mapping.contains_key(PING_ADDRESS) && !owners.contains_key(&PING_CONTROLLER) {
        mapping.insert(PING_ADDRESS.to_string(), PING_CONTROLLER);
    }

    Ok(mapping)
}

/// Free controller numbers for a mapping: 1-126 minus those already used
pub fn init_pool(mapping: &Mapping) -> Pool {
    let used: BTreeSet<u8> = mapping.values().copied().collect();
    (FIRST_LEARNED..=LAST_LEARNED)
        .filter(|c| !used.contains(c))
        .collect()
}

/// Write a mapping as pretty JSON, replacing the file atomically.
///
/// The data goes to a sibling `.tmp` file first and is renamed over `path`,
/// so a crash mid-write leaves the previous file intact.
pub fn save(path: impl AsRef<Path>, mapping: &Mapping) -> Result<(), MappingError> {
    let path = path.as_ref();
    let io_err = |source: std::io::Error| MappingError::MappingIo {
        path: path.to_path_buf(),
        source,
    };

    let mut json = serde_json::to_string_pretty(mapping)
        .map_err(|e| io_err(std::io::Error::new(ErrorKind::InvalidData, e)))?;
    json.push('\n');

    let tmp_path = {
        let mut name = path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    };

    let write_tmp = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()
    };

    if let Err(e) = write_tmp().and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }

    debug!("Mapping written to {}", path.display());
    Ok(())
}

/// Result of a lookup that may learn a new address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Address was already mapped
    Mapped(u8),
    /// Address was unknown and has just been assigned this number
    Learned(u8),
    /// Address is unknown and learning is off
    Unmapped,
}

impl Lookup {
    pub fn controller(self) -> Option<u8> {
        match self {
            Lookup::Mapped(c) | Lookup::Learned(c) => Some(c),
            Lookup::Unmapped => None,
        }
    }
}

struct MappingState {
    mapping: Mapping,
    pool: Pool,
}

impl MappingState {
    fn allocate(&mut self, address: &str) -> Result<u8, PoolExhausted> {
        if let Some(&controller) = self.mapping.get(address) {
            return Ok(controller);
        }
        let controller = self
            .pool
            .pop_first()
            .ok_or_else(|| PoolExhausted {
                address: address.to_string(),
            })?;
        self.mapping.insert(address.to_string(), controller);
        Ok(controller)
    }
}

/// Shared owner of the mapping and the free pool
pub struct MappingStore {
    state: Mutex<MappingState>,
}

impl MappingStore {
    /// Build a store around a loaded mapping
    pub fn new(mapping: Mapping) -> Self {
        let pool = init_pool(&mapping);
        Self {
            state: Mutex::new(MappingState { mapping, pool }),
        }
    }

    /// Load `path` and build a store from it
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        load(path).map(Self::new)
    }

    /// Controller number for a known address
    pub fn resolve(&self, address: &str) -> Option<u8> {
        self.state.lock().mapping.get(address).copied()
    }

    /// Assign a free controller number to `address`.
    ///
    /// Which free number is chosen is unspecified. An address that is already
    /// mapped keeps its number and consumes nothing from the pool. On
    /// [`PoolExhausted`] nothing is changed.
    pub fn allocate(&self, address: &str) -> Result<u8, PoolExhausted> {
        self.state.lock().allocate(address)
    }

    /// Resolve `address`, learning it first when `learn` is set.
    ///
    /// Lookup and allocation happen under one lock acquisition.
    pub fn resolve_or_allocate(&self, address: &str, learn: bool) -> Result<Lookup, PoolExhausted> {
        let mut state = self.state.lock();
        if let Some(&controller) = state.mapping.get(address) {
            return Ok(Lookup::Mapped(controller));
        }
        if !learn {
            return Ok(Lookup::Unmapped);
        }
        state.allocate(address).map(Lookup::Learned)
    }

    /// Copy of the current mapping
    pub fn snapshot(&self) -> Mapping {
        self.state.lock().mapping.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().mapping.is_empty()
    }

    /// Number of controller numbers still free
    pub fn free(&self) -> usize {
        self.state.lock().pool.len()
    }

    /// Save the current mapping to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MappingError> {
        let path = path.as_ref();
        let mapping = self.snapshot();
        save(path, &mapping)?;
        info!("Saved {} mappings to {}", mapping.len(), path.display());
        Ok(())
    }
}

/// Saves the store when the process leaves its main scope.
///
/// Call [`PersistOnExit::finish`] on the normal path to see write errors.
/// Any other way out (early `?` return, panic unwind) saves from `Drop`.
pub struct PersistOnExit {
    store: Arc<MappingStore>,
    path: PathBuf,
    saved: bool,
}

impl PersistOnExit {
    pub fn new(store: Arc<MappingStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
            saved: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save now and disarm the guard. Later calls do nothing.
    pub fn finish(&mut self) -> Result<(), MappingError> {
        if self.saved {
            return Ok(());
        }
        self.saved = true;
        self.store.save(&self.path)
    }
}

impl Drop for PersistOnExit {
    fn drop(&mut self) {
        if self.saved {
            return;
        }
        self.saved = true;
        if let Err(e) = self.store.save(&self.path) {
            error!("Failed to save mapping on exit: {}", e);
        }
    }
}
