use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Bumped whenever the snapshot layout changes; older snapshots are discarded
pub const SNAPSHOT_VERSION: u32 = 2;

/// File name of the reference graph snapshot inside the work directory
pub const SNAPSHOT_FILE: &str = "refmgr.ser";

/// Minutes an edit lock stays valid unless released
pub const DEFAULT_LOCK_EXPIRY_MINUTES: u64 = 60;

/// Seconds between two sweeps of the lock reaper
pub const LOCK_REAPER_INTERVAL_SECS: u64 = 60;

/// Link targets starting with one of these render as external anchors
pub const EXTERNAL_SCHEMES: &[&str] = &["http:", "https:", "ftp:", "mailto:", "news:"];

/// `%s` is replaced with the url-encoded page name
pub const VIEW_URL_PATTERN: &str = "Wiki.jsp?page=%s";
pub const EDIT_URL_PATTERN: &str = "Edit.jsp?page=%s";

/// Maximum nesting of page inclusions before the include plugin gives up
pub const MAX_INCLUDE_DEPTH: usize = 8;

/// What a rename does when a referrer it must rewrite is locked for editing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum RenameLockPolicy {
    /// Release the user's lock and save the rewritten text anyway
    #[default]
    BreakLocks,
    /// Leave the locked referrer untouched and log it
    SkipLocked,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WikiSettings {
    /// Fall back to the singular/plural form when a page lookup misses
    pub match_plurals: bool,
    /// Treat bare CamelCase words as page links
    pub camel_case_links: bool,
    pub rename_lock_policy: RenameLockPolicy,
    pub lock_expiry_minutes: u64,
    /// Prefix prepended to generated view/edit URLs
    pub base_url: String,
}

impl Default for WikiSettings {
    fn default() -> Self {
        Self {
            match_plurals: false,
            camel_case_links: false,
            rename_lock_policy: RenameLockPolicy::default(),
            lock_expiry_minutes: DEFAULT_LOCK_EXPIRY_MINUTES,
            base_url: String::new(),
        }
    }
}

impl WikiSettings {
    /// Reads settings from a JSON file; absent fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_conservative() {
        let settings = WikiSettings::default();
        assert!(!settings.match_plurals);
        assert!(!settings.camel_case_links);
        assert_eq!(settings.rename_lock_policy, RenameLockPolicy::BreakLocks);
        assert_eq!(settings.lock_expiry_minutes, DEFAULT_LOCK_EXPIRY_MINUTES);
    }

    #[test]
    fn load_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"match_plurals": true, "rename_lock_policy": "SkipLocked"}}"#
        )
        .unwrap();

        let settings = WikiSettings::load(file.path()).unwrap();
        assert!(settings.match_plurals);
        assert!(!settings.camel_case_links);
        assert_eq!(settings.rename_lock_policy, RenameLockPolicy::SkipLocked);
        assert_eq!(settings.base_url, "");
    }

    #[test]
    fn load_rejects_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(WikiSettings::load(file.path()).is_err());
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(WikiSettings::load(Path::new("/nonexistent/settings.json")).is_err());
    }
}
