use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use reflex_core::{DeviceProfile, MemorySnapshot};

/// Persists the memory aggregate and the attached-device table as
/// whole-file JSON overwrites.
///
/// There is no incremental diff and no atomic rename; callers serialize
/// their saves (the binary funnels every save through one task). Failures
/// are surfaced as errors for the caller to log and must never stop the
/// learning loop.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
    memory_path: PathBuf,
    devices_path: PathBuf,
}

impl MemoryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create data dir {:?}", root))?;
        Ok(MemoryStore {
            memory_path: root.join("memory.json"),
            devices_path: root.join("devices.json"),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory_path(&self) -> &Path {
        &self.memory_path
    }

    pub fn save_memory(&self, snapshot: &MemorySnapshot) -> Result<()> {
        let pretty = serde_json::to_string_pretty(snapshot)?;
        fs::write(&self.memory_path, pretty)
            .with_context(|| format!("failed to write {:?}", self.memory_path))?;
        debug!(path = ?self.memory_path, "store.memory_saved");
        Ok(())
    }

    pub fn load_memory(&self) -> Result<Option<MemorySnapshot>> {
        if !self.memory_path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.memory_path)
            .with_context(|| format!("failed to read {:?}", self.memory_path))?;
        let snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {:?}", self.memory_path))?;
        Ok(Some(snapshot))
    }

    pub fn save_devices(&self, profiles: &[DeviceProfile]) -> Result<()> {
        let pretty = serde_json::to_string_pretty(profiles)?;
        fs::write(&self.devices_path, pretty)
            .with_context(|| format!("failed to write {:?}", self.devices_path))?;
        debug!(path = ?self.devices_path, "store.devices_saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reflex_core::Memory;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn memory_snapshot_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = MemoryStore::open(dir.path().join("data")).expect("open store");
        assert!(store.load_memory().expect("load").is_none());

        let mut memory = Memory::new();
        memory.stamp_action("hx.led<1", 1_000);
        memory.reactions.strengthen("tmp>12", "hx.led<1", 2.0);
        memory.consequences.strengthen("hx.led<1", "tmp>12", 0.5);
        store.save_memory(&memory.snapshot()).expect("save");

        let restored = store.load_memory().expect("load").expect("snapshot");
        assert_eq!(restored.actions["hx.led<1"], 1_000);
        assert_eq!(restored.reactions.outputs, ["hx.led<1"]);
        assert_eq!(restored.reactions.inputs["tmp>12"], [2.0]);
        assert_eq!(restored.consequences.inputs["hx.led<1"], [0.5]);
    }

    #[test]
    fn saves_overwrite_the_previous_file() {
        let dir = tempdir().expect("tempdir");
        let store = MemoryStore::open(dir.path()).expect("open store");

        let mut memory = Memory::new();
        store.save_memory(&memory.snapshot()).expect("save");
        memory.stamp_action("hx.buz<8a", 2_000);
        store.save_memory(&memory.snapshot()).expect("save");

        let restored = store.load_memory().expect("load").expect("snapshot");
        assert_eq!(restored.actions.len(), 1);
    }

    #[test]
    fn device_profiles_are_written_as_json() {
        let dir = tempdir().expect("tempdir");
        let store = MemoryStore::open(dir.path()).expect("open store");
        let mut profile = DeviceProfile::new("hx");
        profile.actions.insert("led".into(), vec!["1".into()]);
        store.save_devices(&[profile]).expect("save devices");

        let raw = fs::read_to_string(dir.path().join("devices.json")).expect("read");
        assert!(raw.contains("\"hx\""));
        assert!(raw.contains("led"));
    }
}
