use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};

use super::StorageTier;

/// Durable storage tier backed by one JSON file per key.
pub struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StorageTier for FileTier {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read storage file for key {}", key))?;
        Ok(Some(contents))
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        // Atomic write: unique temp name (PID + counter), then rename. A plain
        // in-place write can leave trailing bytes when a shorter write races
        // a longer previous one.
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let path = self.path_for(key);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, value)
            .with_context(|| format!("Failed to write storage file for key {}", key))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to commit storage file for key {}", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove storage file for key {}", key))?;
        }
        Ok(())
    }
}
