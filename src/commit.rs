//! Commit log parsing.
//!
//! The pre-push hook hands over one line per pushed commit, newest first:
//!
//! ```text
//! <sha>;<author>;<timestamp>;<message>
//! ```
//!
//! Parsing is all-or-nothing: a single malformed line rejects the whole
//! batch, so evidence is never composed from a partial log. Records come
//! out oldest first, which is the order they are displayed in.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Field separator of a commit log line.
pub const FIELD_SEPARATOR: char = ';';

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures while turning a commit log into records.
#[derive(Debug, Error)]
pub enum CommitLogError {
    #[error("commit log line {line_number} has {fields} fields, expected 4: {line:?}")]
    Format {
        line_number: usize,
        fields: usize,
        line: String,
    },

    /// A failure on a log read from disk, enriched with the file's metadata.
    #[error("{source}. File data: {info}")]
    InFile {
        info: FileInfo,
        #[source]
        source: Box<CommitLogError>,
    },

    #[error(
        "Commits messages file not found. File data: path={}, path_write_permissions={path_write_permissions}",
        .path.display()
    )]
    FileNotFound {
        path: PathBuf,
        path_write_permissions: bool,
    },

    #[error("failed to read commit log file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no commits to record{}", file_suffix(.info))]
    Empty { info: Option<FileInfo> },
}

fn file_suffix(info: &Option<FileInfo>) -> String {
    match info {
        Some(info) => format!(". File data: {info}"),
        None => String::new(),
    }
}

/// Diagnostics about a commit log file, surfaced when a hook invocation
/// hands over something unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub path_write_permissions: bool,
    pub file_permissions: String,
    pub last_access_time: String,
    pub last_modification_time: String,
    pub ctime: String,
}

impl FileInfo {
    /// Gather metadata for `path`. Unavailable values are reported as `unknown`.
    pub fn collect(path: &Path) -> Self {
        let path_write_permissions = dir_writable(path);
        let Ok(meta) = std::fs::metadata(path) else {
            return Self {
                path: path.to_path_buf(),
                path_write_permissions,
                file_permissions: UNKNOWN.to_string(),
                last_access_time: UNKNOWN.to_string(),
                last_modification_time: UNKNOWN.to_string(),
                ctime: UNKNOWN.to_string(),
            };
        };

        Self {
            path: path.to_path_buf(),
            path_write_permissions,
            file_permissions: permission_string(&meta),
            last_access_time: format_time(meta.accessed()),
            last_modification_time: format_time(meta.modified()),
            ctime: change_time(&meta),
        }
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "path={}, path_write_permissions={}, file_permissions={}, \
             file_last_access_time={}, file_last_modification_time={}, file_ctime={}",
            self.path.display(),
            self.path_write_permissions,
            self.file_permissions,
            self.last_access_time,
            self.last_modification_time,
            self.ctime
        )
    }
}

const UNKNOWN: &str = "unknown";

/// Whether this process can create files in the directory holding `path`.
fn dir_writable(path: &Path) -> bool {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tempfile::tempfile_in(dir).is_ok()
}

#[cfg(unix)]
fn permission_string(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:o}", meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_string(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "readonly".to_string()
    } else {
        "readwrite".to_string()
    }
}

#[cfg(unix)]
fn change_time(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::MetadataExt;
    OffsetDateTime::from_unix_timestamp(meta.ctime())
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

#[cfg(not(unix))]
fn change_time(meta: &std::fs::Metadata) -> String {
    format_time(meta.created())
}

fn format_time(time: io::Result<SystemTime>) -> String {
    time.ok()
        .and_then(|t| OffsetDateTime::from(t).format(&Rfc3339).ok())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One pushed commit. Built once from a log line and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    sha: String,
    author: String,
    timestamp: String,
    message: String,
}

impl CommitRecord {
    pub fn new(
        sha: impl Into<String>,
        author: impl Into<String>,
        timestamp: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sha: sha.into(),
            author: author.into(),
            timestamp: timestamp.into(),
            message: message.into(),
        }
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    /// ISO-8601 commit timestamp, as emitted by git.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Evidence lines for this commit: sha, timestamp, author, message.
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.sha, self.timestamp, self.author, self.message
        )
    }

    fn from_line(line_number: usize, line: &str) -> Result<Self, CommitLogError> {
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        match fields.as_slice() {
            [sha, author, timestamp, message] => {
                Ok(Self::new(*sha, *author, *timestamp, *message))
            }
            _ => Err(CommitLogError::Format {
                line_number,
                fields: fields.len(),
                line: line.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Where the hook got its commit log from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    Inline(String),
    File(PathBuf),
}

/// Parse a raw commit log (newest first) into records ordered oldest first.
///
/// Empty lines are skipped. Any other line, whitespace-only ones included,
/// must have exactly four `;`-separated fields; otherwise the whole log is
/// rejected.
pub fn parse(raw_log: &str) -> Result<Vec<CommitRecord>, CommitLogError> {
    let mut records = raw_log
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(index, line)| CommitRecord::from_line(index + 1, line))
        .collect::<Result<Vec<_>, _>>()?;
    records.reverse();
    Ok(records)
}

/// Read a commit log file written by the hook script.
pub fn read_log_file(path: &Path) -> Result<String, CommitLogError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CommitLogError::FileNotFound {
            path: path.to_path_buf(),
            path_write_permissions: dir_writable(path),
        }),
        Err(e) => Err(CommitLogError::Read {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Load the records for one push.
///
/// Unlike [`parse`], an empty log is an error here: there is nothing to
/// record. Failures on a file-backed log carry the file's metadata.
pub fn load(source: &LogSource) -> Result<Vec<CommitRecord>, CommitLogError> {
    match source {
        LogSource::Inline(raw) => {
            let records = parse(raw)?;
            if records.is_empty() {
                return Err(CommitLogError::Empty { info: None });
            }
            Ok(records)
        }
        LogSource::File(path) => {
            let raw = read_log_file(path)?;
            let records = parse(&raw).map_err(|e| CommitLogError::InFile {
                info: FileInfo::collect(path),
                source: Box::new(e),
            })?;
            if records.is_empty() {
                return Err(CommitLogError::Empty {
                    info: Some(FileInfo::collect(path)),
                });
            }
            Ok(records)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
