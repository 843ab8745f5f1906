//! Volume-relative paths.

use crate::error::{StoreError, StoreResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix reserved for files the stores create for their own bookkeeping.
pub(crate) const RESERVED_PREFIX: &str = ".nullfs";

/// A normalized, `/`-separated path relative to a volume root.
///
/// Paths arrive from remote peers, so parsing is strict: `.` and `..`
/// segments, backslashes, NUL bytes and the reserved `.nullfs` prefix are
/// rejected. Leading, trailing and repeated slashes are collapsed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(String);

impl StorePath {
    /// Parses and normalizes a path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path is empty or contains
    /// a forbidden segment.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let invalid = |reason| StoreError::InvalidPath {
            path: raw.to_string(),
            reason,
        };

        if raw.contains('\\') {
            return Err(invalid("backslash separators are not allowed"));
        }
        if raw.contains('\0') {
            return Err(invalid("NUL bytes are not allowed"));
        }

        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" => continue,
                "." | ".." => return Err(invalid("relative segments are not allowed")),
                s if s.starts_with(RESERVED_PREFIX) => {
                    return Err(invalid("reserved name"));
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(Self(segments.join("/")))
    }

    /// Returns the normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Returns the final segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns true if this path lies at or under `prefix`.
    ///
    /// The prefix is matched on raw characters, like an object-store prefix.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix.trim_start_matches('/'))
    }

    /// Resolves this path under a filesystem root.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.segments() {
            out.push(segment);
        }
        out
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StorePath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
