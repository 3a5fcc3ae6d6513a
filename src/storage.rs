use std::path::PathBuf;

use rusty_ulid::Ulid;

pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
}

/// Files under a single base directory.
#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: &str) -> std::io::Result<Self> {
        let path = PathBuf::from(storage_dir);
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    pub fn path_of(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path_of(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_of(ident))
    }

    /// Write through a temp file and rename, so readers never see half a file.
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let temp_path = self.path_of(&format!("{}-{ident}", Ulid::generate()));

        if let Err(err) = std::fs::write(&temp_path, data) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, self.path_of(ident))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path().join("nested").to_str().unwrap()).unwrap();

        assert!(!store.exists("scraped.json"));
        store.write("scraped.json", b"{}").unwrap();
        assert!(store.exists("scraped.json"));
        assert_eq!(store.read("scraped.json").unwrap(), b"{}");

        store.write("scraped.json", b"{\"T1\":\"text\"}").unwrap();
        assert_eq!(store.read("scraped.json").unwrap(), b"{\"T1\":\"text\"}");

        // only the target file remains, no temp leftovers
        let files = std::fs::read_dir(&store.base_dir).unwrap().count();
        assert_eq!(files, 1);
    }
}
