//! Listing data model
//!
//! Entries are derived from one folder level of store output: common prefixes
//! become folders, remaining keys become files. Placeholder objects (keys ending
//! in the separator) never show up as files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::namespace::SEPARATOR;
use crate::providers::ListObjectsPage;

/// Identity of an entry within one folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId {
    pub name: String,
    pub is_folder: bool,
}

impl EntryId {
    pub fn folder(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_folder: true }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_folder: false }
    }
}

/// A file as shown in a folder view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    Folder { name: String },
    File {
        name: String,
        size: u64,
        last_modified: Option<DateTime<Utc>>,
    },
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Folder { name } | Entry::File { name, .. } => name,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Entry::Folder { .. })
    }

    pub fn id(&self) -> EntryId {
        EntryId {
            name: self.name().to_string(),
            is_folder: self.is_folder(),
        }
    }

    pub fn kind(&self) -> FileKind {
        match self {
            Entry::Folder { .. } => FileKind::Folder,
            Entry::File { name, .. } => FileKind::from_name(name),
        }
    }
}

impl From<FileEntry> for Entry {
    fn from(file: FileEntry) -> Self {
        Entry::File {
            name: file.name,
            size: file.size,
            last_modified: file.last_modified,
        }
    }
}

/// One fully paginated folder level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Full store prefix that was listed
    pub prefix: String,
    pub folders: Vec<String>,
    pub files: Vec<FileEntry>,
}

impl Listing {
    /// Derive a listing from the pages of a delimited listing of `prefix`.
    ///
    /// Folder names in `hidden` are left out.
    pub fn from_pages<'a>(
        prefix: &str,
        pages: impl IntoIterator<Item = &'a ListObjectsPage>,
        hidden: &[String],
    ) -> Self {
        let mut listing = Listing {
            prefix: prefix.to_string(),
            ..Default::default()
        };

        for page in pages {
            for common_prefix in &page.common_prefixes {
                let Some(rest) = common_prefix.strip_prefix(prefix) else { continue };
                let name = rest.trim_end_matches(SEPARATOR);
                if name.is_empty() || hidden.iter().any(|h| h == name) {
                    continue;
                }
                if !listing.folders.iter().any(|f| f == name) {
                    listing.folders.push(name.to_string());
                }
            }

            for object in &page.objects {
                let Some(name) = object.key.strip_prefix(prefix) else { continue };
                if name.is_empty() || name.ends_with(SEPARATOR) {
                    continue;
                }
                listing.files.push(FileEntry {
                    name: name.to_string(),
                    size: object.size,
                    last_modified: object.last_modified,
                });
            }
        }

        listing
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len()
    }

    /// Folders first, then files, in store order
    pub fn entries(&self) -> Vec<Entry> {
        self.folders
            .iter()
            .map(|name| Entry::Folder { name: name.clone() })
            .chain(self.files.iter().cloned().map(Entry::from))
            .collect()
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.folders
            .iter()
            .map(EntryId::folder)
            .chain(self.files.iter().map(|f| EntryId::file(&f.name)))
            .collect()
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        if id.is_folder {
            self.folders.iter().any(|f| *f == id.name)
        } else {
            self.files.iter().any(|f| f.name == id.name)
        }
    }

    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Icon category of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Folder,
    Image,
    Pdf,
    Document,
    Other,
}

impl FileKind {
    /// Classify a file by its extension
    pub fn from_name(name: &str) -> Self {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "svg" => FileKind::Image,
            "pdf" => FileKind::Pdf,
            "doc" | "docx" => FileKind::Document,
            _ => FileKind::Other,
        }
    }
}

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Human readable size with 1024 steps, e.g. `1.5 KB`
pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let mut text = format!("{:.*}", decimals, value);
    if text.contains('.') {
        text = text.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{} {}", text, SIZE_UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ObjectSummary;

    fn object(key: &str, size: u64) -> ObjectSummary {
        ObjectSummary { key: key.to_string(), size, last_modified: None }
    }

    #[test]
    fn test_from_pages_derives_entries() {
        let page = ListObjectsPage {
            common_prefixes: vec!["alice/docs/".into(), "alice/.thumbnails/".into()],
            objects: vec![object("alice/", 0), object("alice/a.txt", 5)],
            ..Default::default()
        };
        let listing = Listing::from_pages("alice/", [&page], &[".thumbnails".to_string()]);
        assert_eq!(listing.folders, vec!["docs"]);
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "a.txt");
        assert_eq!(listing.files[0].size, 5);
    }

    #[test]
    fn test_from_pages_merges_pages() {
        let first = ListObjectsPage {
            common_prefixes: vec!["alice/docs/".into()],
            objects: vec![object("alice/a.txt", 1)],
            is_truncated: true,
            next_continuation_token: Some("alice/docs/".into()),
        };
        let second = ListObjectsPage {
            objects: vec![object("alice/b.txt", 2)],
            ..Default::default()
        };
        let listing = Listing::from_pages("alice/", [&first, &second], &[]);
        assert_eq!(listing.len(), 3);
        assert!(listing.contains(&EntryId::folder("docs")));
        assert!(listing.contains(&EntryId::file("b.txt")));
        assert!(!listing.contains(&EntryId::file("docs")));
        assert_eq!(listing.entries()[0], Entry::Folder { name: "docs".into() });
    }

    #[test]
    fn test_file_kind() {
        assert_eq!(FileKind::from_name("photo.JPG"), FileKind::Image);
        assert_eq!(FileKind::from_name("report.pdf"), FileKind::Pdf);
        assert_eq!(FileKind::from_name("cv.docx"), FileKind::Document);
        assert_eq!(FileKind::from_name("Makefile"), FileKind::Other);
        assert_eq!(Entry::Folder { name: "x.pdf".into() }.kind(), FileKind::Folder);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0, 2), "0 Bytes");
        assert_eq!(format_bytes(500, 2), "500 Bytes");
        assert_eq!(format_bytes(1024, 2), "1 KB");
        assert_eq!(format_bytes(1536, 2), "1.5 KB");
        assert_eq!(format_bytes(1_048_576, 2), "1 MB");
        assert_eq!(format_bytes(1_234_567_890, 2), "1.15 GB");
        assert_eq!(format_bytes(1536, 0), "2 KB");
    }
}
