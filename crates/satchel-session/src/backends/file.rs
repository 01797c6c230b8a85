//! Sessions as one file each.
//!
//! Files live at `<root>/<cookie_name><backend_key>`. Writes go to a sibling
//! temp file that is renamed over the target, so readers never see a partial
//! record. An empty file is a placeholder for a session with no data yet.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace};

use crate::SessionData;
use crate::backend::{LoadOutcome, SessionBackend};
use crate::codec::SessionCodec;
use crate::context::StoreContext;
use crate::error::{Result, SessionError};
use crate::expiry::{Expiry, expiry_date};
use crate::key::is_valid_key_chars;

/// Store keeping each session in its own file.
#[derive(Debug)]
pub struct FileStore {
    ctx: StoreContext,
    codec: SessionCodec,
    root: PathBuf,
    prefix: String,
}

impl FileStore {
    /// Create a store rooted at the configured path, or the system temp dir.
    pub fn new(ctx: StoreContext) -> Result<Self> {
        let root = ctx
            .settings()
            .file_path
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        if !root.is_dir() {
            return Err(SessionError::Config(format!(
                "session file path {:?} is not a directory",
                root
            )));
        }

        info!(root = %root.display(), "File session store ready");
        Ok(Self {
            codec: SessionCodec::new(&ctx, "FileStore"),
            prefix: ctx.settings().cookie_name.clone(),
            ctx,
            root,
        })
    }

    /// Directory holding the session files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file for a backend key.
    pub fn key_to_file(&self, backend_key: &str) -> Result<PathBuf> {
        if backend_key.is_empty() || !is_valid_key_chars(backend_key) {
            return Err(SessionError::InvalidKey(
                "invalid characters in session key".to_string(),
            ));
        }
        Ok(self.root.join(format!("{}{}", self.prefix, backend_key)))
    }

    fn last_modification(path: &Path) -> io::Result<DateTime<Utc>> {
        Ok(fs::metadata(path)?.modified()?.into())
    }

    /// Write `contents` next to `path`, then rename it into place.
    fn stage(path: &Path, contents: &[u8]) -> io::Result<()> {
        Self::stage_with(path, |file| file.write_all(contents))
    }

    /// Fill a sibling temp file with `write`, then rename it over `path`.
    ///
    /// On any failure the temp file is removed and `path` is left as it was.
    fn stage_with<F>(path: &Path, write: F) -> io::Result<()>
    where
        F: FnOnce(&mut fs::File) -> io::Result<()>,
    {
        let dir = path.parent().unwrap_or(Path::new("."));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut temp = tempfile::Builder::new()
            .prefix(&format!("{}_out_", name))
            .tempfile_in(dir)?;
        write(temp.as_file_mut())?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Whether an undecodable file has outlived the default age since its
    /// last write.
    fn corrupted_is_stale(&self, path: &Path) -> Result<bool> {
        match Self::last_modification(path) {
            Ok(modified) => Ok(expiry_date(None, modified, self.ctx.cookie_age()) <= Utc::now()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, path: &Path) -> Result<LoadOutcome> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
            Err(e) if e.kind() == ErrorKind::InvalidData => return Ok(LoadOutcome::Corrupted),
            Err(e) => return Err(e.into()),
        };

        if contents.is_empty() {
            return Ok(LoadOutcome::Loaded(SessionData::new()));
        }

        let Ok(data) = self.codec.try_decode(&contents) else {
            return Ok(LoadOutcome::Corrupted);
        };

        let modified = Self::last_modification(path)?;
        let deadline = expiry_date(Expiry::from_data(&data), modified, self.ctx.cookie_age());
        if deadline <= Utc::now() {
            return Ok(LoadOutcome::Expired);
        }

        Ok(LoadOutcome::Loaded(data))
    }
}

impl SessionBackend for FileStore {
    fn name(&self) -> &'static str {
        "FileStore"
    }

    fn context(&self) -> &StoreContext {
        &self.ctx
    }

    fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    fn exists(&self, backend_key: &str) -> Result<bool> {
        Ok(self.key_to_file(backend_key)?.exists())
    }

    fn load_data(&self, backend_key: &str) -> Result<LoadOutcome> {
        match self.key_to_file(backend_key) {
            Ok(path) => self.read(&path),
            Err(SessionError::InvalidKey(reason)) => {
                debug!(%reason, "Rejected session key");
                Ok(LoadOutcome::Missing)
            }
            Err(e) => Err(e),
        }
    }

    fn save(&self, backend_key: &str, data: &SessionData, must_create: bool) -> Result<()> {
        let path = self.key_to_file(backend_key)?;

        let mut options = OpenOptions::new();
        options.write(true);
        if must_create {
            options.create_new(true);
        }
        match options.open(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SessionError::AlreadyExists);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(SessionError::DoesNotExist),
            Err(e) => return Err(e.into()),
        }

        let encoded = self.codec.encode(data)?;
        Self::stage(&path, encoded.as_bytes())?;
        trace!(path = %path.display(), "Session file written");
        Ok(())
    }

    fn delete(&self, backend_key: &str) -> Result<()> {
        match fs::remove_file(self.key_to_file(backend_key)?) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(key) = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(self.prefix.as_str()))
            else {
                continue;
            };
            // Skips temp files and anything else that is not a session
            if key.is_empty() || !is_valid_key_chars(key) {
                continue;
            }

            let path = entry.path();
            let expired = match self.read(&path)? {
                LoadOutcome::Expired => true,
                // No readable expiry: fall back to the default age
                LoadOutcome::Corrupted => self.corrupted_is_stale(&path)?,
                _ => false,
            };
            if expired {
                self.delete(key)?;
                removed += 1;
            }
        }

        info!(removed, root = %self.root.display(), "Cleared expired session files");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::Session;
    use crate::expiry::ExpirySetting;
    use satchel_config::SessionSettings;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<FileStore> {
        let settings = SessionSettings {
            file_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let ctx = StoreContext::new(settings, "file-secret").unwrap();
        Arc::new(FileStore::new(ctx).unwrap())
    }

    fn session_files(dir: &TempDir) -> Vec<String> {
        fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_missing_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let settings = SessionSettings {
            file_path: Some(dir.path().join("absent")),
            ..Default::default()
        };
        let ctx = StoreContext::new(settings, "file-secret").unwrap();
        assert!(matches!(FileStore::new(ctx), Err(SessionError::Config(_))));
    }

    #[test]
    fn test_save_writes_prefixed_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut session = Session::new(Arc::clone(&store), None);
        session.set("a", 1).unwrap();
        session.save(false).unwrap();

        let key = session.session_key().unwrap();
        assert_eq!(session_files(&dir), vec![format!("sessionid{key}")]);

        let mut reopened = Session::new(store, Some(key));
        assert_eq!(reopened.get("a").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_invalid_key_chars() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.key_to_file("../../etc/passwd"),
            Err(SessionError::InvalidKey(_))
        ));
        assert!(matches!(
            store.key_to_file("ABCDEFGH"),
            Err(SessionError::InvalidKey(_))
        ));
        assert_eq!(store.load_data("../escape").unwrap(), LoadOutcome::Missing);
    }

    #[test]
    fn test_create_and_update_semantics() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let data = SessionData::new();

        assert!(matches!(
            store.save("abcdefgh1234", &data, false),
            Err(SessionError::DoesNotExist)
        ));
        store.save("abcdefgh1234", &data, true).unwrap();
        assert!(matches!(
            store.save("abcdefgh1234", &data, true),
            Err(SessionError::AlreadyExists)
        ));
        store.save("abcdefgh1234", &data, false).unwrap();
    }

    #[test]
    fn test_empty_file_is_placeholder() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(dir.path().join("sessionidabcdefgh1234"), "").unwrap();
        assert_eq!(
            store.load_data("abcdefgh1234").unwrap(),
            LoadOutcome::Loaded(SessionData::new())
        );
    }

    #[test]
    fn test_corrupted_file_recreates_session() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(dir.path().join("sessionidabcdefgh1234"), "garbage").unwrap();

        let mut session = Session::new(Arc::clone(&store), Some("abcdefgh1234"));
        assert!(session.keys().unwrap().is_empty());
        let new_key = session.session_key().unwrap();
        assert_ne!(new_key, "abcdefgh1234");
        assert!(session.is_modified());
    }

    #[test]
    fn test_expired_file_replaced() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut session = Session::new(Arc::clone(&store), None);
        session.set_expiry(Some(ExpirySetting::Seconds(-1))).unwrap();
        session.save(false).unwrap();
        let old_key = session.session_key().unwrap().to_string();

        let mut reopened = Session::new(Arc::clone(&store), Some(&old_key));
        assert!(reopened.keys().unwrap().is_empty());
        assert_ne!(reopened.session_key().unwrap(), old_key);
        assert!(!store.exists(&old_key).unwrap());
    }

    #[test]
    fn test_clear_expired_sweeps_only_expired() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut live = Session::new(Arc::clone(&store), None);
        live.set("a", 1).unwrap();
        live.save(false).unwrap();

        let mut dead = Session::new(Arc::clone(&store), None);
        dead.set_expiry(Some(ExpirySetting::Seconds(-1))).unwrap();
        dead.save(false).unwrap();

        // Not session files
        fs::write(dir.path().join("sessionidabc_out_xyz"), "partial").unwrap();
        fs::write(dir.path().join("unrelated"), "x").unwrap();

        assert_eq!(store.clear_expired().unwrap(), 1);
        assert!(store.exists(live.session_key().unwrap()).unwrap());
        assert!(!store.exists(dead.session_key().unwrap()).unwrap());
        assert_eq!(session_files(&dir).len(), 3);
    }

    fn set_age(path: &Path, age: std::time::Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_clear_expired_sweeps_stale_corrupted_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let year = std::time::Duration::from_secs(365 * 24 * 60 * 60);

        let stale = dir.path().join("sessionidabcdefgh12345678");
        fs::write(&stale, "garbage-not-a-token").unwrap();
        set_age(&stale, year);

        let fresh = dir.path().join("sessionidzyxwvuts87654321");
        fs::write(&fresh, "garbage-not-a-token").unwrap();

        assert_eq!(store.clear_expired().unwrap(), 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert_eq!(store.clear_expired().unwrap(), 0);
    }

    #[test]
    fn test_failed_write_leaves_original_intact() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut session = Session::new(Arc::clone(&store), None);
        session.set("user_id", 42).unwrap();
        session.save(false).unwrap();
        let key = session.session_key().unwrap().to_string();
        let path = store.key_to_file(&key).unwrap();
        let original = fs::read(&path).unwrap();

        // Dies halfway through writing the replacement
        let result = FileStore::stage_with(&path, |file| {
            file.write_all(b"half-written")?;
            Err(io::Error::other("interrupted"))
        });
        assert!(result.is_err());

        assert_eq!(fs::read(&path).unwrap(), original);
        assert_eq!(session_files(&dir), vec![format!("sessionid{key}")]);
        let mut reopened = Session::new(store, Some(&key));
        assert_eq!(reopened.get("user_id").unwrap(), Some(json!(42)));
    }

    #[test]
    fn test_failed_rename_cleans_up_temp_file() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory cannot be replaced by a file
        let target = dir.path().join("sessionidabcdefgh1234");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "original").unwrap();

        assert!(FileStore::stage(&target, b"replacement").is_err());

        assert!(target.is_dir());
        assert_eq!(fs::read_to_string(target.join("keep")).unwrap(), "original");
        assert_eq!(session_files(&dir), vec!["sessionidabcdefgh1234".to_string()]);
    }

    #[test]
    fn test_delete_missing_is_fine() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.delete("abcdefgh1234").unwrap();
    }
}
