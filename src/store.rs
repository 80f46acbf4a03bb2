use fs2::FileExt;

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::config::{Field, Settings};

/// Errors raised while reading or persisting settings
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,

    #[error("failed to read settings from '{path:?}': {error}")]
    Read { path: PathBuf, error: io::Error },

    #[error("failed to parse settings in '{path:?}': {error}")]
    Parse { path: PathBuf, error: toml::de::Error },

    #[error("failed to write settings to '{path:?}': {error}")]
    Write { path: PathBuf, error: io::Error },

    #[error("settings are not representable as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("settings backend is unavailable")]
    Unavailable,
}

/// Persistent key/value storage behind a [ConfigStore]
pub trait Backend: Send + Sync {
    /// Read the persisted document; `None` if nothing has been saved yet
    fn load_persisted(&self) -> Result<Option<toml::Table>, StoreError>;

    /// Replace the persisted document
    fn save_persisted(&self, table: &toml::Table) -> Result<(), StoreError>;

    /// Human-readable location of the storage
    fn location(&self) -> String;

    /// File locked while a sync is in flight, shared by every process using this storage
    fn run_lock_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Settings stored as a TOML file on disk
pub struct TomlFile {
    path: PathBuf,
}

impl TomlFile {
    pub fn new(path: impl Into<PathBuf>) -> TomlFile {
        TomlFile { path: path.into() }
    }

    /// `<config dir>/vaultsync/config.toml` for the current platform
    pub fn default_location() -> Result<TomlFile, StoreError> {
        let dir = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;

        Ok(TomlFile::new(dir.join("vaultsync").join("config.toml")))
    }

    fn write_error(&self, error: io::Error) -> StoreError {
        StoreError::Write { path: self.path.clone(), error }
    }
}

impl Backend for TomlFile {
    fn load_persisted(&self) -> Result<Option<toml::Table>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StoreError::Read { path: self.path.clone(), error }),
        };

        let table = contents
            .parse::<toml::Table>()
            .map_err(|error| StoreError::Parse { path: self.path.clone(), error })?;

        Ok(Some(table))
    }

    fn save_persisted(&self, table: &toml::Table) -> Result<(), StoreError> {
        let contents = toml::to_string(table)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| self.write_error(e))?;

        // write beside the target and rename over it, so readers never see a partial file
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.write_error(e))?;
        file.write_all(contents.as_bytes()).map_err(|e| self.write_error(e))?;
        file.as_file().sync_all().map_err(|e| self.write_error(e))?;
        file.persist(&self.path).map_err(|e| self.write_error(e.error))?;

        log::debug!("wrote settings to {}", self.path.display());

        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn run_lock_path(&self) -> Option<PathBuf> {
        Some(self.path.with_extension("lock"))
    }
}

/// Settings held in memory only
#[derive(Default)]
pub struct Memory {
    table: Mutex<Option<toml::Table>>,
    read_only: bool,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }

    /// Start from an existing document
    pub fn with_table(table: toml::Table) -> Memory {
        Memory { table: Mutex::new(Some(table)), read_only: false }
    }

    /// A backend whose saves always fail
    pub fn read_only() -> Memory {
        Memory { table: Mutex::new(None), read_only: true }
    }
}

impl Backend for Memory {
    fn load_persisted(&self) -> Result<Option<toml::Table>, StoreError> {
        Ok(self.table.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save_persisted(&self, table: &toml::Table) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::Unavailable);
        }

        *self.table.lock().unwrap_or_else(PoisonError::into_inner) = Some(table.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

/// Held while a sync is in flight; dropping it lets the next run start
pub struct RunGuard<'a> {
    _local: tokio::sync::MutexGuard<'a, ()>,
    // the advisory lock is released when the file closes
    _file: Option<File>,
}

/// Owns the application's [Settings]; every edit goes through here and is persisted immediately.
///
/// Also owns the in-flight guard: at most one sync runs per store, and per settings file
/// across processes
pub struct ConfigStore {
    backend: Box<dyn Backend>,
    settings: Mutex<Settings>,
    /// Serialises read-modify-write cycles against the backend
    write: Mutex<()>,
    in_flight: tokio::sync::Mutex<()>,
}

impl ConfigStore {
    /// Open a store over `backend`, loading whatever it currently holds
    pub fn open(backend: impl Backend + 'static) -> ConfigStore {
        let store = ConfigStore {
            backend: Box::new(backend),
            settings: Mutex::new(Settings::default()),
            write: Mutex::new(()),
            in_flight: tokio::sync::Mutex::new(()),
        };

        store.load();
        store
    }

    /// Re-read persisted settings merged over defaults, key by key.
    ///
    /// Never fails: a missing document yields defaults, an unreadable one yields defaults and a
    /// warning, and a malformed key falls back to its default without affecting its neighbours
    pub fn load(&self) -> Settings {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);

        let settings = match self.backend.load_persisted() {
            Ok(Some(table)) => merge(&table),
            Ok(None) => {
                log::debug!("no settings at {}; using defaults", self.backend.location());
                Settings::default()
            }
            Err(e) => {
                log::warn!("{e}; using default settings");
                Settings::default()
            }
        };

        *self.lock() = settings.clone();
        settings
    }

    /// The most recently loaded or saved settings
    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    /// Persist `settings`.
    ///
    /// Only keys whose value differs from what is persisted are rewritten, so malformed keys
    /// the caller did not touch stay as they are. The in-memory copy only changes once the
    /// backend accepts the write
    pub fn save(&self, settings: Settings) -> Result<(), StoreError> {
        self.edit(|current| *current = settings)
    }

    /// Edit one field and persist the result
    pub fn set(&self, field: Field, value: String) -> Result<(), StoreError> {
        self.edit(|current| current.set(field, value))
    }

    fn edit(&self, f: impl FnOnce(&mut Settings)) -> Result<(), StoreError> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);

        // start from the stored document, not the cache, so nothing written since is lost
        let mut table = self.backend.load_persisted()?.unwrap_or_default();
        let current = merge(&table);

        let mut updated = current.clone();
        f(&mut updated);

        for field in Field::ALL {
            if updated.get(field) != current.get(field) {
                put(&mut table, field, updated.get(field));
            }
        }

        self.backend.save_persisted(&table)?;
        log::info!("saved settings to {}", self.backend.location());

        *self.lock() = merge(&table);
        Ok(())
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    /// Claim the right to run a sync; `None` if one is already in flight.
    ///
    /// If the backend's lock file can't be opened the claim only covers this process
    pub fn begin_run(&self) -> Option<RunGuard<'_>> {
        let local = self.in_flight.try_lock().ok()?;

        let file = match self.backend.run_lock_path() {
            Some(path) => match lock_exclusive(&path) {
                Ok(Some(file)) => Some(file),
                Ok(None) => {
                    log::warn!("{} is held by another process", path.display());
                    return None;
                }
                Err(e) => {
                    log::warn!("unable to lock {}: {e}; only guarding this process", path.display());
                    None
                }
            },
            None => None,
        };

        Some(RunGuard { _local: local, _file: file })
    }

    /// Whether a sync is in flight through this store
    pub fn is_running(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `Ok(None)` when another handle holds the lock
fn lock_exclusive(path: &Path) -> io::Result<Option<File>> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let file = OpenOptions::new().create(true).write(true).open(path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Defaults, overridden by every well-formed key in `table`
fn merge(table: &toml::Table) -> Settings {
    let mut settings = Settings::default();

    for field in Field::ALL {
        let (section, key) = field.key();

        let value = match table.get(section) {
            Some(toml::Value::Table(section)) => section.get(key),
            Some(_) | None => None,
        };

        match value {
            Some(toml::Value::String(value)) => settings.set(field, value.clone()),
            Some(other) => log::warn!("ignoring {section}.{key} = {other}; expected a string"),
            None => (),
        }
    }

    if let Some(other) = table.get("sync").filter(|v| !v.is_table()) {
        log::warn!("ignoring sync = {other}; expected a table");
    }
    if let Some(other) = table.get("tool").filter(|v| !v.is_table()) {
        log::warn!("ignoring tool = {other}; expected a table");
    }

    settings
}

fn put(table: &mut toml::Table, field: Field, value: Option<&str>) {
    let (section, key) = field.key();

    let entry = table
        .entry(section)
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    if !entry.is_table() {
        *entry = toml::Value::Table(toml::Table::new());
    }

    if let toml::Value::Table(section) = entry {
        match value {
            Some(value) => {
                section.insert(key.to_string(), toml::Value::String(value.to_string()));
            }
            None => {
                section.remove(key);
            }
        }
    }
}
