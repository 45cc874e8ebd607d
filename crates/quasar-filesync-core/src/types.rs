//! Strong type definitions for file sync.
//!
//! Paths and roles are newtypes so that an unvalidated string can never be
//! joined onto the synced root or mistaken for a role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::CoreError;

/// A forward-slash path relative to the synced directory root.
///
/// Always non-empty, never absolute, and free of `.`/`..` segments, so joining
/// it onto a root cannot escape that root.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Validate and wrap a forward-slash relative path.
    pub fn new(path: impl Into<String>) -> Result<Self, CoreError> {
        let path = path.into();
        validate(&path)?;
        Ok(Self(path))
    }

    /// Derive the relative path of `absolute` under `root`.
    pub fn from_path(root: &Path, absolute: &Path) -> Result<Self, CoreError> {
        let stripped = absolute.strip_prefix(root).map_err(|_| {
            CoreError::InvalidPath(format!(
                "{} is not under {}",
                absolute.display(),
                root.display()
            ))
        })?;

        let mut segments = Vec::new();
        for component in stripped.components() {
            match component {
                Component::Normal(segment) => {
                    let segment = segment.to_str().ok_or_else(|| {
                        CoreError::InvalidPath(format!("non UTF-8 path: {}", stripped.display()))
                    })?;
                    segments.push(segment);
                }
                _ => {
                    return Err(CoreError::InvalidPath(format!(
                        "unexpected component in {}",
                        stripped.display()
                    )))
                }
            }
        }

        Self::new(segments.join("/"))
    }

    /// Resolve onto a root directory.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.segments() {
            path.push(segment);
        }
        path
    }

    /// Path segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Whether any segment is a dotfile or dot-directory.
    pub fn is_hidden(&self) -> bool {
        self.segments().any(|s| s.starts_with('.'))
    }

    /// Whether this path lies strictly inside the directory `dir`.
    pub fn is_within(&self, dir: &RelativePath) -> bool {
        self.0
            .strip_prefix(dir.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(path: &str) -> Result<(), CoreError> {
    if path.is_empty() {
        return Err(CoreError::InvalidPath("empty path".into()));
    }
    if path.starts_with('/') {
        return Err(CoreError::InvalidPath(format!("absolute path: {path}")));
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(CoreError::InvalidPath(format!("illegal character in {path}")));
    }
    // Windows drive prefixes like `C:` or `c:/x`
    let bytes = path.as_bytes();
    if bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && bytes.get(2).map_or(true, |b| *b == b'/')
    {
        return Err(CoreError::InvalidPath(format!("absolute path: {path}")));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(CoreError::InvalidPath(format!("empty segment in {path}"))),
            "." | ".." => {
                return Err(CoreError::InvalidPath(format!("relative segment in {path}")))
            }
            _ => {}
        }
    }
    Ok(())
}

impl fmt::Debug for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelativePath({})", self.0)
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for RelativePath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

/// The role a party plays for the lifetime of a session.
///
/// Assigned on the command line; the protocol never negotiates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authoritative on divergence.
    Leader,
    /// Applies every remote write unconditionally.
    Follower,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => f.write_str("leader"),
            Role::Follower => f.write_str("follower"),
        }
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leader" => Ok(Role::Leader),
            "follower" => Ok(Role::Follower),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_relative_path_accepts_nested() {
        let path = RelativePath::new("docs/notes/a.txt").unwrap();
        assert_eq!(path.segments().collect::<Vec<_>>(), vec!["docs", "notes", "a.txt"]);
    }

    #[test]
    fn test_relative_path_rejects_escapes() {
        for bad in ["", "/etc/passwd", "../x", "a/../b", "a//b", "./a", "a\\b", "C:/x", "a/"] {
            assert!(RelativePath::new(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_drive_prefix_only_at_start() {
        for bad in ["C:", "c:/x", "Z:/deep/file"] {
            assert!(RelativePath::new(bad).is_err(), "accepted {bad:?}");
        }
        for ok in ["a:b.txt", "notes/c:", "1:/x", "ab:c"] {
            assert!(RelativePath::new(ok).is_ok(), "rejected {ok:?}");
        }
    }

    #[test]
    fn test_is_within() {
        let dir = RelativePath::new("docs").unwrap();
        assert!(RelativePath::new("docs/a.md").unwrap().is_within(&dir));
        assert!(RelativePath::new("docs/deep/b.md").unwrap().is_within(&dir));
        assert!(!RelativePath::new("docs").unwrap().is_within(&dir));
        assert!(!RelativePath::new("docsx/a.md").unwrap().is_within(&dir));
        assert!(!RelativePath::new("other/docs/a.md").unwrap().is_within(&dir));
    }

    #[test]
    fn test_from_path_strips_root() {
        let root = Path::new("/tmp/sync");
        let path = RelativePath::from_path(root, Path::new("/tmp/sync/dir/file.md")).unwrap();
        assert_eq!(path.as_str(), "dir/file.md");
        assert_eq!(path.to_path(root), PathBuf::from("/tmp/sync/dir/file.md"));
    }

    #[test]
    fn test_from_path_outside_root() {
        let root = Path::new("/tmp/sync");
        assert!(RelativePath::from_path(root, Path::new("/tmp/other/x")).is_err());
        assert!(RelativePath::from_path(root, root).is_err());
    }

    #[test]
    fn test_hidden_detection() {
        assert!(RelativePath::new(".git/config").unwrap().is_hidden());
        assert!(RelativePath::new("a/.swp").unwrap().is_hidden());
        assert!(!RelativePath::new("a/b.txt").unwrap().is_hidden());
    }

    #[test]
    fn test_serde_validates() {
        let ok: RelativePath = serde_json::from_str("\"a/b\"").unwrap();
        assert_eq!(ok.as_str(), "a/b");
        assert!(serde_json::from_str::<RelativePath>("\"../b\"").is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("leader".parse::<Role>().unwrap(), Role::Leader);
        assert_eq!("follower".parse::<Role>().unwrap(), Role::Follower);
        assert!(matches!("boss".parse::<Role>(), Err(CoreError::InvalidRole(_))));
    }

    proptest! {
        #[test]
        fn test_valid_paths_stay_under_root(
            segments in prop::collection::vec("[a-zA-Z0-9_][a-zA-Z0-9_. -]{0,11}", 1..5)
        ) {
            let root = Path::new("/srv/sync");
            let path = RelativePath::new(segments.join("/")).unwrap();
            let resolved = path.to_path(root);

            prop_assert!(resolved.starts_with(root));
            prop_assert_eq!(RelativePath::from_path(root, &resolved).unwrap(), path);
        }

        #[test]
        fn test_parent_segment_always_rejected(
            before in prop::collection::vec("[a-z]{1,6}", 0..3),
            after in prop::collection::vec("[a-z]{1,6}", 0..3),
        ) {
            let mut segments = before;
            segments.push("..".to_string());
            segments.extend(after);
            prop_assert!(RelativePath::new(segments.join("/")).is_err());
        }
    }
}
