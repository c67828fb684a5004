use std::path::{Path, PathBuf};

/// Abstract key/value file storage injected into every component that
/// persists state (bookmark snapshots, content cache, LLM usage counters).
pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
}

#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(base_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    fn path_for(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path_for(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_for(ident))
    }

    /// Writes go through a temp file plus rename so a crash mid-write never
    /// leaves a truncated snapshot behind.
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(ident);
        let temp_path = self.path_for(&format!("{ident}.{}.tmp", rand::random::<u32>()));

        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &path)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.path_for(ident))
    }
}
