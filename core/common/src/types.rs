//! Common types used throughout gitvault.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// All sync timestamps (`lastModified`, `deletedAt`, `lastSync`) use this unit.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A repository-relative path, independent of the host file system.
///
/// Stored the way the remote tree lists it: `/` separators, no leading or
/// trailing slash (e.g. `notes/today.md`). The empty path is the vault root.
/// Ordering compares component by component, so a folder sorts next to its
/// contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoPath(String);

fn check_component(part: &str) -> crate::Result<()> {
    let problem = match part {
        "" => "empty component",
        "." | ".." => "relative component",
        _ if part.contains('\\') => "backslash",
        _ if part.contains('\0') => "NUL byte",
        _ => return Ok(()),
    };
    Err(crate::Error::InvalidInput(format!(
        "Invalid path component {:?}: {}",
        part, problem
    )))
}

impl RepoPath {
    /// The vault root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Build a path from individual components.
    pub fn from_components<I, S>(parts: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut joined = String::new();
        for part in parts {
            let part = part.as_ref();
            if part.contains('/') {
                return Err(crate::Error::InvalidInput(format!(
                    "Path component {:?} contains a separator",
                    part
                )));
            }
            check_component(part)?;
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(part);
        }
        Ok(Self(joined))
    }

    /// Parse a `/`-separated path.
    ///
    /// Leading and trailing slashes are ignored, so `/a/b` and `a/b/` are the
    /// same path. `..`, `.` and empty components are rejected.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        trimmed.split('/').try_for_each(check_component)?;
        Ok(Self(trimmed.to_string()))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(at) => Self(self.0[..at].to_string()),
            None => Self::root(),
        })
    }

    /// Last component; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|n| !n.is_empty())
    }

    /// First component, e.g. `.git` for `.git/HEAD`.
    pub fn top_level(&self) -> Option<&str> {
        self.0.split('/').next().filter(|n| !n.is_empty())
    }

    /// Lower-cased extension of the last component, if it has one.
    pub fn extension(&self) -> Option<String> {
        let name = self.name()?;
        let dot = name.rfind('.')?;
        if dot == 0 || dot + 1 == name.len() {
            return None;
        }
        Some(name[dot + 1..].to_ascii_lowercase())
    }

    /// Append one component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        if child.contains('/') {
            return Err(crate::Error::InvalidInput(format!(
                "Cannot join {:?}: contains a separator",
                child
            )));
        }
        check_component(child)?;
        if self.is_root() {
            Ok(Self(child.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, child)))
        }
    }

    /// Whether this path lies strictly inside `dir`.
    pub fn is_inside(&self, dir: &RepoPath) -> bool {
        if dir.is_root() {
            return !self.is_root();
        }
        self.0
            .strip_prefix(dir.0.as_str())
            .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `/`-joined form.
    pub fn to_string_path(&self) -> String {
        self.0.clone()
    }
}

impl Ord for RepoPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.components().cmp(other.components())
    }
}

impl PartialOrd for RepoPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RepoPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<RepoPath> for String {
    fn from(path: RepoPath) -> Self {
        path.0
    }
}
