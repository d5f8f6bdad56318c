use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::config::profiles_dir;

#[derive(Debug, Clone)]
pub struct ProfilePictures {
    dir: PathBuf,
}

impl ProfilePictures {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn open_default() -> Self {
        Self::new(profiles_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", token))
    }

    pub fn rename_key(&self, old: &str, new: &str) -> anyhow::Result<()> {
        let from = self.path_for(old);
        let to = self.path_for(new);
        match fs::rename(&from, &to) {
            Ok(()) => {
                debug!(from = %from.display(), to = %to.display(), "moved profile picture");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound && !from.exists() => Ok(()),
            Err(e) => Err(e).with_context(|| format!("moving {} to {}", from.display(), to.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_moves_existing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let pictures = ProfilePictures::new(dir.path());
        fs::write(pictures.path_for("old"), b"img").unwrap();

        pictures.rename_key("old", "new").unwrap();

        assert!(!pictures.path_for("old").exists());
        assert_eq!(fs::read(pictures.path_for("new")).unwrap(), b"img");
    }

    #[test]
    fn rename_without_blob_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let pictures = ProfilePictures::new(dir.path());
        pictures.rename_key("old", "new").unwrap();
        assert!(!pictures.path_for("new").exists());
    }
}
