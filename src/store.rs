//! Page storage collaborators.
//!
//! The wiki core only needs a narrow view of page storage: read text, check
//! existence, ask for modification times, save, move and delete. [`PageStore`]
//! is that view. Two providers ship with the crate:
//!
//! - [`MemoryPageStore`] -- versioned in-memory pages for tests and embedders
//! - [`FilePageStore`] -- one text file per page with an `OLD/` version history

use crate::error::{Result, WikiError};
use crate::models::{now_millis, PageInfo, Timestamp};
use crate::text::{url_decode, url_encode};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;
use tracing::debug;

pub trait PageStore: Send + Sync {
    /// Text of the given version, or of the latest one when `version` is `None`.
    fn page_text(&self, name: &str, version: Option<u32>) -> Option<String>;

    fn page_exists(&self, name: &str) -> bool;

    /// `path` has the form `Page/file.ext`.
    fn attachment_exists(&self, path: &str) -> bool;

    fn page_info(&self, name: &str) -> Option<PageInfo>;

    fn last_modified(&self, name: &str) -> Option<Timestamp> {
        self.page_info(name).map(|info| info.last_modified)
    }

    fn all_pages(&self) -> Result<Vec<PageInfo>>;

    /// Full attachment names (`Page/file.ext`) filed under `page`.
    fn attachments(&self, page: &str) -> Vec<String>;

    fn save_text(&self, name: &str, text: &str, author: Option<&str>) -> Result<()>;

    /// Moves the text and the whole version history.
    fn move_page(&self, from: &str, to: &str) -> Result<()>;

    fn move_attachments(&self, from: &str, to: &str) -> Result<()>;

    fn delete_page(&self, name: &str) -> Result<()>;
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains(['\n', '\r']) {
        return Err(WikiError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn split_attachment_path(path: &str) -> Option<(&str, &str)> {
    path.split_once('/').filter(|(page, file)| !page.is_empty() && !file.is_empty())
}

#[derive(Debug, Clone)]
struct StoredVersion {
    text: String,
    author: Option<String>,
    modified: Timestamp,
}

#[derive(Default)]
pub struct MemoryPageStore {
    pages: DashMap<String, Vec<StoredVersion>>,
    attachments: DashMap<String, BTreeMap<String, Vec<u8>>>,
    fail_moves: AtomicBool,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_attachment(&self, page: &str, file: &str, content: &[u8]) {
        self.attachments
            .entry(page.to_string())
            .or_default()
            .insert(file.to_string(), content.to_vec());
    }

    /// Makes every subsequent move fail with a provider error.
    pub fn set_fail_moves(&self, fail: bool) {
        self.fail_moves.store(fail, Ordering::Relaxed);
    }

    fn check_move_allowed(&self, what: &str) -> Result<()> {
        if self.fail_moves.load(Ordering::Relaxed) {
            return Err(WikiError::provider(
                what,
                io::Error::other("injected provider failure"),
            ));
        }
        Ok(())
    }
}

impl PageStore for MemoryPageStore {
    fn page_text(&self, name: &str, version: Option<u32>) -> Option<String> {
        let versions = self.pages.get(name)?;
        let stored = match version {
            None => versions.last()?,
            Some(v) => versions.get((v as usize).checked_sub(1)?)?,
        };
        Some(stored.text.clone())
    }

    fn page_exists(&self, name: &str) -> bool {
        self.pages.contains_key(name)
    }

    fn attachment_exists(&self, path: &str) -> bool {
        let Some((page, file)) = split_attachment_path(path) else {
            return false;
        };
        self.attachments
            .get(page)
            .is_some_and(|files| files.contains_key(file))
    }

    fn page_info(&self, name: &str) -> Option<PageInfo> {
        let versions = self.pages.get(name)?;
        let latest = versions.last()?;
        Some(PageInfo {
            name: name.to_string(),
            version: versions.len() as u32,
            last_modified: latest.modified,
            author: latest.author.clone(),
        })
    }

    fn all_pages(&self) -> Result<Vec<PageInfo>> {
        let names: Vec<String> = self.pages.iter().map(|e| e.key().clone()).collect();
        Ok(names.iter().filter_map(|n| self.page_info(n)).collect())
    }

    fn attachments(&self, page: &str) -> Vec<String> {
        self.attachments
            .get(page)
            .map(|files| files.keys().map(|f| format!("{}/{}", page, f)).collect())
            .unwrap_or_default()
    }

    fn save_text(&self, name: &str, text: &str, author: Option<&str>) -> Result<()> {
        validate_name(name)?;
        self.pages.entry(name.to_string()).or_default().push(StoredVersion {
            text: text.to_string(),
            author: author.map(str::to_string),
            modified: now_millis(),
        });
        Ok(())
    }

    fn move_page(&self, from: &str, to: &str) -> Result<()> {
        validate_name(to)?;
        self.check_move_allowed("moving page")?;
        if self.pages.contains_key(to) {
            return Err(WikiError::PageExists(to.to_string()));
        }
        let (_, versions) = self
            .pages
            .remove(from)
            .ok_or_else(|| WikiError::PageNotFound(from.to_string()))?;
        self.pages.insert(to.to_string(), versions);
        Ok(())
    }

    fn move_attachments(&self, from: &str, to: &str) -> Result<()> {
        self.check_move_allowed("moving attachments")?;
        if let Some((_, files)) = self.attachments.remove(from) {
            self.attachments.insert(to.to_string(), files);
        }
        Ok(())
    }

    fn delete_page(&self, name: &str) -> Result<()> {
        self.pages
            .remove(name)
            .ok_or_else(|| WikiError::PageNotFound(name.to_string()))?;
        self.attachments.remove(name);
        Ok(())
    }
}

const PAGE_EXTENSION: &str = "txt";
const HISTORY_DIR: &str = "OLD";
const ATTACHMENT_SUFFIX: &str = "-att";

/// Directory-backed provider: `<root>/<encoded name>.txt` holds the current
/// text, `<root>/OLD/<encoded name>/<n>.txt` the earlier versions and
/// `<root>/<encoded name>-att/` the attachments.
pub struct FilePageStore {
    root: PathBuf,
}

impl FilePageStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(HISTORY_DIR))
            .map_err(|e| WikiError::provider(format!("creating {:?}", root), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn put_attachment(&self, page: &str, file: &str, content: &[u8]) -> Result<()> {
        let dir = self.attachment_dir(page);
        fs::create_dir_all(&dir)
            .and_then(|_| fs::write(dir.join(url_encode(file)), content))
            .map_err(|e| WikiError::provider(format!("storing attachment {}/{}", page, file), e))
    }

    fn page_file(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", url_encode(name), PAGE_EXTENSION))
    }

    fn history_dir(&self, name: &str) -> PathBuf {
        self.root.join(HISTORY_DIR).join(url_encode(name))
    }

    fn attachment_dir(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", url_encode(name), ATTACHMENT_SUFFIX))
    }

    fn history_len(&self, name: &str) -> u32 {
        fs::read_dir(self.history_dir(name))
            .map(|entries| entries.filter_map(|e| e.ok()).count() as u32)
            .unwrap_or(0)
    }

    fn mtime_millis(path: &Path) -> Option<Timestamp> {
        let modified = fs::metadata(path).ok()?.modified().ok()?;
        let since = modified.duration_since(UNIX_EPOCH).ok()?;
        Some(since.as_millis() as Timestamp)
    }
}

/// Writes through a temp file so readers never see a half-written page.
fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)
}

impl PageStore for FilePageStore {
    fn page_text(&self, name: &str, version: Option<u32>) -> Option<String> {
        let current = self.history_len(name) + 1;
        let path = match version {
            Some(v) if v == 0 || v > current => return None,
            Some(v) if v < current => self.history_dir(name).join(format!("{}.{}", v, PAGE_EXTENSION)),
            _ => self.page_file(name),
        };
        fs::read_to_string(path).ok()
    }

    fn page_exists(&self, name: &str) -> bool {
        self.page_file(name).is_file()
    }

    fn attachment_exists(&self, path: &str) -> bool {
        split_attachment_path(path)
            .is_some_and(|(page, file)| self.attachment_dir(page).join(url_encode(file)).is_file())
    }

    fn page_info(&self, name: &str) -> Option<PageInfo> {
        let last_modified = Self::mtime_millis(&self.page_file(name))?;
        Some(PageInfo {
            name: name.to_string(),
            version: self.history_len(name) + 1,
            last_modified,
            author: None,
        })
    }

    fn all_pages(&self) -> Result<Vec<PageInfo>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| WikiError::provider(format!("listing {:?}", self.root), e))?;
        let mut pages = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PAGE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(info) = self.page_info(&url_decode(stem)) {
                pages.push(info);
            }
        }
        Ok(pages)
    }

    fn attachments(&self, page: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.attachment_dir(page)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(url_decode))
            .map(|file| format!("{}/{}", page, file))
            .collect();
        names.sort();
        names
    }

    fn save_text(&self, name: &str, text: &str, _author: Option<&str>) -> Result<()> {
        validate_name(name)?;
        let current = self.page_file(name);
        if current.is_file() {
            let history = self.history_dir(name);
            let archived = history.join(format!("{}.{}", self.history_len(name) + 1, PAGE_EXTENSION));
            fs::create_dir_all(&history)
                .and_then(|_| fs::copy(&current, &archived).map(|_| ()))
                .map_err(|e| WikiError::provider(format!("archiving {}", name), e))?;
        }
        write_atomic(&current, text)
            .map_err(|e| WikiError::provider(format!("saving {}", name), e))?;
        debug!(page = name, "Page saved to disk");
        Ok(())
    }

    fn move_page(&self, from: &str, to: &str) -> Result<()> {
        validate_name(to)?;
        let (src, dst) = (self.page_file(from), self.page_file(to));
        if !src.is_file() {
            return Err(WikiError::PageNotFound(from.to_string()));
        }
        if dst.exists() {
            return Err(WikiError::PageExists(to.to_string()));
        }
        fs::rename(&src, &dst)
            .map_err(|e| WikiError::provider(format!("moving {} to {}", from, to), e))?;
        let history = self.history_dir(from);
        if history.is_dir() {
            fs::rename(&history, self.history_dir(to))
                .map_err(|e| WikiError::provider(format!("moving history of {}", from), e))?;
        }
        Ok(())
    }

    fn move_attachments(&self, from: &str, to: &str) -> Result<()> {
        let src = self.attachment_dir(from);
        if !src.is_dir() {
            return Ok(());
        }
        fs::rename(&src, self.attachment_dir(to))
            .map_err(|e| WikiError::provider(format!("moving attachments of {}", from), e))
    }

    fn delete_page(&self, name: &str) -> Result<()> {
        let file = self.page_file(name);
        if !file.is_file() {
            return Err(WikiError::PageNotFound(name.to_string()));
        }
        fs::remove_file(&file).map_err(|e| WikiError::provider(format!("deleting {}", name), e))?;
        for dir in [self.history_dir(name), self.attachment_dir(name)] {
            if dir.is_dir() {
                fs::remove_dir_all(&dir)
                    .map_err(|e| WikiError::provider(format!("deleting {:?}", dir), e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_store_keeps_versions() {
        let store = MemoryPageStore::new();
        store.save_text("Main", "one", Some("alice")).unwrap();
        store.save_text("Main", "two", None).unwrap();

        assert_eq!(store.page_text("Main", None).as_deref(), Some("two"));
        assert_eq!(store.page_text("Main", Some(1)).as_deref(), Some("one"));
        assert_eq!(store.page_text("Main", Some(3)), None);
        assert_eq!(store.page_text("Main", Some(0)), None);
        assert_eq!(store.page_info("Main").unwrap().version, 2);
    }

    #[test]
    fn memory_store_rejects_empty_name() {
        let store = MemoryPageStore::new();
        assert!(matches!(
            store.save_text("  ", "x", None),
            Err(WikiError::InvalidName(_))
        ));
    }

    #[test]
    fn memory_store_moves_pages_and_attachments() {
        let store = MemoryPageStore::new();
        store.save_text("Old", "text", None).unwrap();
        store.put_attachment("Old", "pic.png", b"png");

        store.move_page("Old", "New").unwrap();
        store.move_attachments("Old", "New").unwrap();

        assert!(!store.page_exists("Old"));
        assert_eq!(store.page_text("New", None).as_deref(), Some("text"));
        assert!(store.attachment_exists("New/pic.png"));
        assert_eq!(store.attachments("New"), vec!["New/pic.png".to_string()]);
    }

    #[test]
    fn memory_store_injected_failure() {
        let store = MemoryPageStore::new();
        store.save_text("Old", "text", None).unwrap();
        store.set_fail_moves(true);
        assert!(matches!(
            store.move_page("Old", "New"),
            Err(WikiError::Provider { .. })
        ));
        assert!(store.page_exists("Old"));
    }

    #[test]
    fn file_store_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let pages = dir.path().join("wiki").join("pages");
        let store = FilePageStore::open(&pages).unwrap();

        assert_eq!(store.root(), pages.as_path());
        assert!(store.root().join(HISTORY_DIR).is_dir());
    }

    #[test]
    fn file_store_round_trip_with_history() {
        let dir = TempDir::new().unwrap();
        let store = FilePageStore::open(dir.path()).unwrap();

        store.save_text("Main Page", "first", None).unwrap();
        store.save_text("Main Page", "second", None).unwrap();

        assert!(store.page_exists("Main Page"));
        assert_eq!(store.page_text("Main Page", None).as_deref(), Some("second"));
        assert_eq!(store.page_text("Main Page", Some(1)).as_deref(), Some("first"));
        assert_eq!(store.page_text("Main Page", Some(2)).as_deref(), Some("second"));
        assert_eq!(store.page_info("Main Page").unwrap().version, 2);

        let names: Vec<String> = store.all_pages().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Main Page".to_string()]);
    }

    #[test]
    fn file_store_move_carries_history_and_attachments() {
        let dir = TempDir::new().unwrap();
        let store = FilePageStore::open(dir.path()).unwrap();
        store.save_text("Old", "v1", None).unwrap();
        store.save_text("Old", "v2", None).unwrap();
        store.put_attachment("Old", "a b.txt", b"data").unwrap();

        store.move_page("Old", "New").unwrap();
        store.move_attachments("Old", "New").unwrap();

        assert!(!store.page_exists("Old"));
        assert_eq!(store.page_text("New", Some(1)).as_deref(), Some("v1"));
        assert!(store.attachment_exists("New/a b.txt"));
        assert_eq!(store.attachments("New"), vec!["New/a b.txt".to_string()]);
    }

    #[test]
    fn file_store_move_onto_existing_fails() {
        let dir = TempDir::new().unwrap();
        let store = FilePageStore::open(dir.path()).unwrap();
        store.save_text("A", "a", None).unwrap();
        store.save_text("B", "b", None).unwrap();
        assert!(matches!(store.move_page("A", "B"), Err(WikiError::PageExists(_))));
        assert_eq!(store.page_text("B", None).as_deref(), Some("b"));
    }

    #[test]
    fn file_store_delete_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = FilePageStore::open(dir.path()).unwrap();
        store.save_text("Gone", "a", None).unwrap();
        store.save_text("Gone", "b", None).unwrap();
        store.put_attachment("Gone", "x.bin", b"x").unwrap();

        store.delete_page("Gone").unwrap();

        assert!(!store.page_exists("Gone"));
        assert!(store.attachments("Gone").is_empty());
        assert!(matches!(store.delete_page("Gone"), Err(WikiError::PageNotFound(_))));
    }
}
