//! Path and namespace model
//!
//! Folders only exist as key prefixes. A session sees the bucket through its
//! `NamespaceRoot`: every key it reads or writes starts with `root/`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DriveError, DriveResult};

/// Folder separator inside keys
pub const SEPARATOR: char = '/';

/// Label of the root breadcrumb
pub const ROOT_LABEL: &str = "My Drive";

/// Identity-bound prefix that scopes every key of a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceRoot(String);

impl NamespaceRoot {
    pub fn new(id: impl Into<String>) -> DriveResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(DriveError::InvalidName("namespace root is empty".to_string()));
        }
        if id.contains(SEPARATOR) {
            return Err(DriveError::InvalidName(format!(
                "namespace root '{}' contains '{}'",
                id, SEPARATOR
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `root/`, the prefix shared by every key of the namespace
    pub fn prefix(&self) -> String {
        format!("{}{}", self.0, SEPARATOR)
    }

    /// Strip the namespace prefix from a full key; `None` for foreign keys
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
    }
}

impl fmt::Display for NamespaceRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a single path segment (folder or file name)
pub fn validate_segment(name: &str) -> DriveResult<()> {
    if name.is_empty() {
        return Err(DriveError::InvalidName("name is empty".to_string()));
    }
    if name.contains(SEPARATOR) {
        return Err(DriveError::InvalidName(format!(
            "'{}' contains '{}'",
            name, SEPARATOR
        )));
    }
    Ok(())
}

/// Folder position relative to the namespace root
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderPath {
    segments: Vec<String>,
}

/// One element of the breadcrumb trail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub label: String,
    pub path: FolderPath,
}

impl FolderPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from a typed prefix such as `a/b/`, ignoring empty segments
    pub fn parse(prefix: &str) -> Self {
        Self {
            segments: prefix
                .split(SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` at the root
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Descend into a child folder
    pub fn enter(&mut self, name: &str) -> DriveResult<()> {
        validate_segment(name)?;
        self.segments.push(name.to_string());
        Ok(())
    }

    /// Path of a child folder, leaving `self` unchanged
    pub fn child(&self, name: &str) -> DriveResult<Self> {
        let mut path = self.clone();
        path.enter(name)?;
        Ok(path)
    }

    /// Keep only the first `depth` segments (breadcrumb jump); 0 is the root
    pub fn truncate(&mut self, depth: usize) {
        self.segments.truncate(depth);
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// Relative prefix: empty at the root, otherwise `a/b/`
    pub fn as_prefix(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("{}{}", s, SEPARATOR))
            .collect()
    }

    /// Trail from the root down to this folder
    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        let mut crumbs = vec![Breadcrumb {
            label: ROOT_LABEL.to_string(),
            path: FolderPath::root(),
        }];
        for depth in 1..=self.segments.len() {
            crumbs.push(Breadcrumb {
                label: self.segments[depth - 1].clone(),
                path: FolderPath {
                    segments: self.segments[..depth].to_vec(),
                },
            });
        }
        crumbs
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SEPARATOR, self.as_prefix())
    }
}

/// Full store key of `name` inside `path`, or an empty string without a root.
///
/// `name` may end with the separator to address a folder placeholder. Runs of
/// separators in `name` collapse to one.
pub fn full_path(root: Option<&NamespaceRoot>, path: &FolderPath, name: &str) -> String {
    let Some(root) = root else {
        return String::new();
    };

    let mut relative = name
        .split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if !relative.is_empty() && name.ends_with(SEPARATOR) {
        relative.push(SEPARATOR);
    }
    format!("{}{}{}", root.prefix(), path.as_prefix(), relative)
}

/// Listing prefix of a folder: `root/` followed by the relative prefix
pub fn folder_prefix(root: &NamespaceRoot, path: &FolderPath) -> String {
    format!("{}{}", root.prefix(), path.as_prefix())
}
