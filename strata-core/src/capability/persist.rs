//! On-disk copy of the last capability entry.
//!
//! The file is an accelerator only: anything unreadable, from another
//! format version, or from other hardware is a miss, never an error the
//! caller has to handle.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::CapabilityCacheEntry;
use crate::error::{HalError, HalResult};

pub const FORMAT_VERSION: u32 = 1;

pub const PERSIST_WRITE_FAILED: HalError = HalError::resource(120, "could not write persisted capability entry");
pub const PERSIST_READ_FAILED: HalError = HalError::resource(121, "could not read persisted capability entry");
pub const PERSIST_CORRUPT: HalError = HalError::validation(122, "persisted capability entry is malformed");

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    version: u32,
    entry: CapabilityCacheEntry,
}

/// Writes `entry` atomically (temp file + rename).
pub fn save(path: &Path, entry: &CapabilityCacheEntry) -> HalResult<()> {
    let body = serde_json::to_vec_pretty(&PersistedEntry { version: FORMAT_VERSION, entry: entry.clone() })
        .map_err(|_| PERSIST_CORRUPT)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|_| PERSIST_WRITE_FAILED)?;
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body).map_err(|_| PERSIST_WRITE_FAILED)?;
    fs::rename(&tmp, path).map_err(|_| PERSIST_WRITE_FAILED)?;

    info!("Capability entry persisted to {}", path.display());
    Ok(())
}

/// Reads the persisted entry. `Ok(None)` when there is no file or the
/// format version differs.
pub fn load(path: &Path) -> HalResult<Option<CapabilityCacheEntry>> {
    let body = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(_) => return Err(PERSIST_READ_FAILED),
    };

    let persisted: PersistedEntry = serde_json::from_slice(&body).map_err(|_| PERSIST_CORRUPT)?;
    if persisted.version != FORMAT_VERSION {
        debug!("Persisted capability entry has version {}, expected {}", persisted.version, FORMAT_VERSION);
        return Ok(None);
    }
    Ok(Some(persisted.entry))
}

/// Removes the persisted entry if present.
pub fn discard(path: &Path) -> HalResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(_) => Err(PERSIST_WRITE_FAILED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::model::{CapabilityMask, DetectionSource, PerformanceTier, PlatformInfo};
    use std::collections::BTreeMap;
    use std::time::{Duration, SystemTime};

    fn entry() -> CapabilityCacheEntry {
        CapabilityCacheEntry {
            capabilities: CapabilityMask::THREADING | CapabilityMask::HARDWARE_3D,
            platform_info: PlatformInfo {
                platform_name: "linux".into(),
                architecture: "aarch64".into(),
                total_memory: 4 << 30,
                cpu_cores: 4,
                performance_tier: PerformanceTier::Standard,
                has_fpu: true,
                has_simd: true,
            },
            confidence: BTreeMap::new(),
            detected_at: SystemTime::now(),
            ttl: Some(Duration::from_secs(60)),
            hardware_id: 0xdead_beef,
            memory_bandwidth: Some(3.5e9),
            source: DetectionSource::Probe,
        }
    }

    #[test]
    fn test_missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("caps.json")), Ok(None));
        assert_eq!(discard(&dir.path().join("caps.json")), Ok(()));
    }

    #[test]
    fn test_save_then_load_preserves_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("caps.json");
        let original = entry();

        save(&path, &original).unwrap();
        let loaded = load(&path).unwrap().expect("entry should be present");
        assert_eq!(loaded, original);

        discard(&path).unwrap();
        assert_eq!(load(&path), Ok(None));
    }

    #[test]
    fn test_garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caps.json");
        fs::write(&path, b"{ not json").unwrap();
        assert_eq!(load(&path), Err(PERSIST_CORRUPT));
    }

    #[test]
    fn test_other_format_version_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caps.json");
        let body = serde_json::to_vec(&PersistedEntry { version: FORMAT_VERSION + 1, entry: entry() }).unwrap();
        fs::write(&path, body).unwrap();
        assert_eq!(load(&path), Ok(None));
    }
}
