//! On-disk snapshot of the reference graph.
//!
//! The snapshot is a private cache: a bincode record holding a format
//! version, the time it was taken and both link maps. Anything unreadable is
//! reported as "no snapshot" so the caller rebuilds from page content.

use crate::config::{SNAPSHOT_FILE, SNAPSHOT_VERSION};
use crate::models::Timestamp;
use anyhow::{Context, Result};
use bincode::Options;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub type LinkMap = FxHashMap<String, FxHashSet<String>>;

#[derive(Deserialize)]
struct SnapshotDe {
    version: u32,
    timestamp: Timestamp,
    refers_to: LinkMap,
    referred_by: LinkMap,
}

/// Borrows the live maps so saving never clones the graph.
#[derive(Serialize)]
struct SnapshotSer<'a> {
    version: u32,
    timestamp: Timestamp,
    refers_to: &'a LinkMap,
    referred_by: &'a LinkMap,
}

pub struct Snapshot {
    pub timestamp: Timestamp,
    pub refers_to: LinkMap,
    pub referred_by: LinkMap,
}

pub fn snapshot_path(work_dir: &Path) -> PathBuf {
    work_dir.join(SNAPSHOT_FILE)
}

/// Returns `Ok(None)` when the snapshot is missing, corrupt or from another format version.
pub fn try_load(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let file = File::open(path)
        .with_context(|| format!("Failed to open reference snapshot: {:?}", path))?;
    let reader = BufReader::with_capacity(256 * 1024, file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let snapshot: SnapshotDe = match options.deserialize_from(reader) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Reference snapshot is corrupt or unreadable");
            return Ok(None);
        }
    };

    if snapshot.version != SNAPSHOT_VERSION {
        info!(
            cached = snapshot.version,
            current = SNAPSHOT_VERSION,
            "Reference snapshot version mismatch"
        );
        return Ok(None);
    }

    info!(
        pages = snapshot.refers_to.len(),
        names = snapshot.referred_by.len(),
        timestamp = snapshot.timestamp,
        "Reference snapshot loaded"
    );

    Ok(Some(Snapshot {
        timestamp: snapshot.timestamp,
        refers_to: snapshot.refers_to,
        referred_by: snapshot.referred_by,
    }))
}

/// Writes the snapshot atomically via a temp file and rename.
pub fn save(
    path: &Path,
    timestamp: Timestamp,
    refers_to: &LinkMap,
    referred_by: &LinkMap,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let snapshot = SnapshotSer {
        version: SNAPSHOT_VERSION,
        timestamp,
        refers_to,
        referred_by,
    };

    let tmp_path = path.with_extension("ser.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp snapshot file: {:?}", tmp_path))?;
    let writer = BufWriter::new(file);

    bincode::options()
        .serialize_into(writer, &snapshot)
        .context("Failed to serialize reference snapshot")?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp snapshot to: {:?}", path))?;

    debug!(
        pages = refers_to.len(),
        path = ?path,
        "Reference snapshot saved"
    );

    Ok(())
}

pub fn remove(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove reference snapshot: {:?}", path))?;
        info!(path = ?path, "Reference snapshot removed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample_maps() -> (LinkMap, LinkMap) {
        let mut refers_to = LinkMap::default();
        refers_to.insert("Home".into(), ["About".to_string()].into_iter().collect());
        let mut referred_by = LinkMap::default();
        referred_by.insert("Home".into(), FxHashSet::default());
        referred_by.insert("About".into(), ["Home".to_string()].into_iter().collect());
        (refers_to, referred_by)
    }

    #[test]
    fn snapshot_path_is_inside_work_dir() {
        assert_eq!(
            snapshot_path(Path::new("/work")),
            PathBuf::from("/work/refmgr.ser")
        );
    }

    #[test]
    fn missing_snapshot_loads_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(try_load(&dir.path().join("refmgr.ser")).unwrap().is_none());
    }

    #[test]
    fn save_then_load_keeps_maps_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path());
        let (refers_to, referred_by) = sample_maps();

        save(&path, 1234, &refers_to, &referred_by).unwrap();
        let loaded = try_load(&path).unwrap().unwrap();

        assert_eq!(loaded.timestamp, 1234);
        assert_eq!(loaded.refers_to, refers_to);
        assert_eq!(loaded.referred_by, referred_by);
    }

    #[test]
    fn corrupt_snapshot_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path());
        let mut file = File::create(&path).unwrap();
        file.write_all(b"not valid bincode data").unwrap();

        assert!(try_load(&path).unwrap().is_none());
    }

    #[test]
    fn other_version_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path());
        let (refers_to, referred_by) = sample_maps();
        let stale = SnapshotSer {
            version: SNAPSHOT_VERSION + 1,
            timestamp: 1,
            refers_to: &refers_to,
            referred_by: &referred_by,
        };
        let bytes = bincode::options().serialize(&stale).unwrap();
        fs::write(&path, bytes).unwrap();

        assert!(try_load(&path).unwrap().is_none());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("refmgr.ser");
        let (refers_to, referred_by) = sample_maps();

        save(&path, 1, &refers_to, &referred_by).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn remove_is_ok_when_absent() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path());
        assert!(remove(&path).is_ok());

        let (refers_to, referred_by) = sample_maps();
        save(&path, 1, &refers_to, &referred_by).unwrap();
        remove(&path).unwrap();
        assert!(!path.exists());
    }
}
