use serde::{Deserialize, Serialize};

/// Remote directory the vault is copied into, relative to the remote user's home
pub const DEFAULT_REMOTE_DIR: &str = "~/Obsidian/";

/// Persisted settings document
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// What to sync, and where to
    pub sync: SyncConfig,
    /// How to invoke the synchronization tool
    pub tool: ToolConfig,
}

/// The three user-editable fields describing a sync target.
///
/// A [SyncConfig] is only runnable once it passes [crate::validate::validate]
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// IPv4 address of the backup host
    pub remote_host: String,
    /// Username used to authenticate with the backup host
    pub username: String,
    /// Local directory to copy, as seen by the synchronization tool
    pub source_path: String,
}

/// Synchronization tool settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub program: String,
    /// Launcher the tool is run through, e.g. `wsl`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<String>,
    pub archive_flags: String,
    pub remote_dir: String,
}

impl Default for ToolConfig {
    fn default() -> ToolConfig {
        ToolConfig {
            program: "rsync".to_string(),
            wrapper: None,
            archive_flags: "-av".to_string(),
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
        }
    }
}

/// Names of the settings editable through [crate::store::ConfigStore::set]
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    RemoteHost,
    Username,
    SourcePath,
    Program,
    Wrapper,
    ArchiveFlags,
    RemoteDir,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::RemoteHost,
        Field::Username,
        Field::SourcePath,
        Field::Program,
        Field::Wrapper,
        Field::ArchiveFlags,
        Field::RemoteDir,
    ];

    /// `(table, key)` the field is persisted under
    pub fn key(self) -> (&'static str, &'static str) {
        match self {
            Field::RemoteHost => ("sync", "remote_host"),
            Field::Username => ("sync", "username"),
            Field::SourcePath => ("sync", "source_path"),
            Field::Program => ("tool", "program"),
            Field::Wrapper => ("tool", "wrapper"),
            Field::ArchiveFlags => ("tool", "archive_flags"),
            Field::RemoteDir => ("tool", "remote_dir"),
        }
    }
}

impl Settings {
    /// Current value of a single field; `None` only for an unset `wrapper`
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::RemoteHost => Some(&self.sync.remote_host),
            Field::Username => Some(&self.sync.username),
            Field::SourcePath => Some(&self.sync.source_path),
            Field::Program => Some(&self.tool.program),
            Field::Wrapper => self.tool.wrapper.as_deref(),
            Field::ArchiveFlags => Some(&self.tool.archive_flags),
            Field::RemoteDir => Some(&self.tool.remote_dir),
        }
    }

    /// Overwrite a single field. An empty `wrapper` clears it
    pub fn set(&mut self, field: Field, value: String) {
        match field {
            Field::RemoteHost => self.sync.remote_host = value,
            Field::Username => self.sync.username = value,
            Field::SourcePath => self.sync.source_path = value,
            Field::Program => self.tool.program = value,
            Field::Wrapper => self.tool.wrapper = Some(value).filter(|w| !w.is_empty()),
            Field::ArchiveFlags => self.tool.archive_flags = value,
            Field::RemoteDir => self.tool.remote_dir = value,
        }
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "remote-host:   {}", self.sync.remote_host)?;
        writeln!(f, "username:      {}", self.sync.username)?;
        writeln!(f, "source-path:   {}", self.sync.source_path)?;
        writeln!(f, "program:       {}", self.tool.program)?;
        writeln!(f, "wrapper:       {}", self.tool.wrapper.as_deref().unwrap_or("(none)"))?;
        writeln!(f, "archive-flags: {}", self.tool.archive_flags)?;
        write!(f, "remote-dir:    {}", self.tool.remote_dir)
    }
}
