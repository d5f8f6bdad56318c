use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::db_path;
use crate::core::errors::ApiError;
use crate::models::models::Document;

pub trait RecordStore {
    fn load_all_records(&self) -> anyhow::Result<Document>;

    fn save_all_records(&self, doc: &Document) -> anyhow::Result<()>;

    // Nothing is written when `f` fails
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Document) -> Result<T, E>,
        E: From<anyhow::Error>;
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    // The guarded value is (), so a panic elsewhere leaves nothing half-written
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Transactions refuse to save if the file's revision moved while they ran
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn open_default() -> Self {
        Self::new(db_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> anyhow::Result<Document> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no document yet, starting empty");
                return Ok(Document::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(Document::default());
        }
        let doc: Document = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        debug!(
            revision = doc.revision,
            users = doc.users.len(),
            posts = doc.posts.len(),
            "loaded document"
        );
        Ok(doc)
    }

    fn write(&self, doc: &Document) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "db.json".to_string());
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let body = serde_json::to_vec_pretty(doc)?;
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %cleanup, "could not remove temp file");
            }
            return Err(e).with_context(|| format!("replacing {}", self.path.display()));
        }
        debug!(revision = doc.revision, path = %self.path.display(), "saved document");
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn load_all_records(&self) -> anyhow::Result<Document> {
        self.read()
    }

    fn save_all_records(&self, doc: &Document) -> anyhow::Result<()> {
        let _guard = lock(&self.lock);
        self.write(doc)
    }

    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Document) -> Result<T, E>,
        E: From<anyhow::Error>,
    {
        let _guard = lock(&self.lock);
        let mut doc = self.read()?;
        let base = doc.revision;

        let out = f(&mut doc)?;

        let on_disk = self.read()?.revision;
        if on_disk != base {
            warn!(base, on_disk, "document changed underneath transaction");
            let conflict = ApiError::Conflict(format!(
                "store was modified concurrently (expected revision {}, found {})",
                base, on_disk
            ));
            return Err(anyhow::Error::new(conflict).into());
        }

        doc.revision = base + 1;
        self.write(&doc)?;
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<Document>,
}

impl MemoryStore {
    pub fn new(doc: Document) -> Self {
        Self { doc: Mutex::new(doc) }
    }

    fn guard(&self) -> MutexGuard<'_, Document> {
        self.doc.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for MemoryStore {
    fn load_all_records(&self) -> anyhow::Result<Document> {
        Ok(self.guard().clone())
    }

    fn save_all_records(&self, doc: &Document) -> anyhow::Result<()> {
        *self.guard() = doc.clone();
        Ok(())
    }

    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Document) -> Result<T, E>,
        E: From<anyhow::Error>,
    {
        let mut current = self.guard();
        let mut draft = current.clone();
        let out = f(&mut draft)?;
        draft.revision = current.revision + 1;
        *current = draft;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::models::Post;

    fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            user_id: "u".to_string(),
            content: "c".to_string(),
            location: None,
            likes: vec![],
            replies: vec![],
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            username: None,
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/db.json"));
        assert_eq!(store.load_all_records().unwrap(), Document::default());
    }

    #[test]
    fn transaction_bumps_revision_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("db.json"));

        store
            .transaction(|doc| -> anyhow::Result<()> {
                doc.posts.push(post("1"));
                Ok(())
            })
            .unwrap();
        store
            .transaction(|doc| -> anyhow::Result<()> {
                doc.posts.push(post("2"));
                Ok(())
            })
            .unwrap();

        let doc = store.load_all_records().unwrap();
        assert_eq!(doc.revision, 2);
        assert_eq!(doc.posts.len(), 2);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(raw["winds"].is_array());
        assert!(raw["users"].is_array());
    }

    #[test]
    fn failed_transaction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("db.json"));

        let result: Result<(), ApiError> = store.transaction(|doc| {
            doc.posts.push(post("1"));
            Err(ApiError::BadRequest("nope".to_string()))
        });
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert!(!store.path().exists());
    }

    #[test]
    fn foreign_write_during_transaction_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let store = JsonFileStore::new(&path);
        let other = JsonFileStore::new(&path);

        let result: Result<(), ApiError> = store.transaction(|doc| {
            doc.posts.push(post("mine"));
            let mut theirs = other.load_all_records()?;
            theirs.revision += 1;
            theirs.posts.push(post("theirs"));
            other.save_all_records(&theirs)?;
            Ok(())
        });

        assert!(matches!(result, Err(ApiError::Conflict(_))));
        let doc = store.load_all_records().unwrap();
        assert_eq!(doc.posts.len(), 1);
        assert_eq!(doc.posts[0].id, "theirs");
    }

    #[test]
    fn legacy_document_without_revision_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(
            &path,
            r#"{"users": [], "winds": [{"id": "1", "userId": "ab", "content": "cd",
                "location": null, "likes": [], "replies": [{"id": "2", "userId": "ab",
                "content": "ef", "timestamp": "2024-01-01T00:00:00Z"}],
                "timestamp": "2024-01-01T00:00:00Z", "username": "ab"}]}"#,
        )
        .unwrap();

        let doc = JsonFileStore::new(&path).load_all_records().unwrap();
        assert_eq!(doc.revision, 0);
        assert_eq!(doc.posts[0].replies[0].likes, Vec::<String>::new());
    }

    #[test]
    fn memory_store_rolls_back_on_error() {
        let store = MemoryStore::default();
        let _: Result<(), ApiError> = store.transaction(|doc| {
            doc.posts.push(post("1"));
            Err(ApiError::Forbidden)
        });
        let doc = store.load_all_records().unwrap();
        assert!(doc.posts.is_empty());
        assert_eq!(doc.revision, 0);
    }
}
