use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use log::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Entry in the scratch directory that is never swept
pub const SENTINEL_FILE: &str = ".gitkeep";

const DEFAULT_INPUT_EXTENSION: &str = "mp4";
const MAX_EXTENSION_LEN: usize = 8;

/// Identifier namespacing every temp file of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        SessionId(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a scratch file is used for within a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRole {
    /// Downloaded source, keeping the remote file's extension
    Input { extension: Option<String> },
    /// Encoded video note
    Output,
}

/// Scratch directory shared by all sessions.
///
/// Sessions never collide because every path embeds the session id; the sweeper
/// only ever looks at file age.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the scratch directory if it is absent
    pub fn ensure(&self) -> io::Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
            info!("Created scratch directory: {}", self.root.display());
        }
        Ok(())
    }

    /// Path for `role` within `session`. Pure: same inputs, same path.
    pub fn allocate(&self, session: &SessionId, role: &FileRole) -> PathBuf {
        let name = match role {
            FileRole::Input { extension } => {
                format!("{}_input.{}", session, sanitize_extension(extension.as_deref()))
            }
            FileRole::Output => format!("{}_output.mp4", session),
        };
        self.root.join(name)
    }

    /// Remove the given files, ignoring ones that are already gone.
    /// Returns how many files were actually deleted.
    pub fn cleanup<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let mut removed = 0;
        for path in paths {
            let path = path.as_ref();
            match fs::remove_file(path) {
                Ok(()) => {
                    removed += 1;
                    debug!("Cleaned up: {}", display_name(path));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to cleanup {}: {}", path.display(), e),
            }
        }
        removed
    }

    /// Delete every file in the scratch directory whose mtime is older than `max_age`.
    ///
    /// Per-file errors are skipped; only a failure to read the directory itself is returned.
    pub fn sweep_older_than(&self, max_age: Duration) -> io::Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        // An unreadable root is an error, unlike unreadable entries
        fs::read_dir(&self.root)?;

        let now = SystemTime::now();
        let mut cleaned = 0;

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || entry.file_name() == SENTINEL_FILE {
                continue;
            }

            let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(m) => m,
                None => continue,
            };
            // Clock skew into the future counts as fresh
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => cleaned += 1,
                Err(e) => debug!("Sweep skipped {}: {}", entry.path().display(), e),
            }
        }

        if cleaned > 0 {
            info!("Swept {} orphaned file(s) from {}", cleaned, self.root.display());
        }
        Ok(cleaned)
    }
}

fn sanitize_extension(ext: Option<&str>) -> String {
    match ext {
        Some(e)
            if !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            e.to_ascii_lowercase()
        }
        _ => DEFAULT_INPUT_EXTENSION.to_string(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
