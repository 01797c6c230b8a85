//! End-to-end session lifecycle across every backend.

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use satchel_config::SessionSettings;
use satchel_session::{
    CacheStore, CachedDbStore, DbStore, Expiry, ExpiryQuery, ExpirySetting, FileStore, KeyCodec,
    LoadOutcome, MemoryCache, Result, Session, SessionBackend, SessionCodec, SessionData,
    SessionError, SignedCookieStore, StoreContext,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

const SECRET: &str = "integration-secret";

fn settings(dir: &TempDir) -> SessionSettings {
    SessionSettings {
        file_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    }
}

fn ctx(settings: SessionSettings) -> StoreContext {
    StoreContext::new(settings, SECRET).unwrap()
}

/// One instance of every server-side backend.
fn server_stores(dir: &TempDir, settings: SessionSettings) -> Vec<Arc<dyn SessionBackend>> {
    vec![
        Arc::new(DbStore::open(ctx(settings.clone()), dir.path().join("db.sqlite")).unwrap()),
        Arc::new(
            CachedDbStore::open(
                ctx(settings.clone()),
                dir.path().join("cached.sqlite"),
                Arc::new(MemoryCache::new(100)),
            )
            .unwrap(),
        ),
        Arc::new(FileStore::new(ctx(settings.clone())).unwrap()),
        Arc::new(CacheStore::new(
            ctx(settings),
            Arc::new(MemoryCache::new(100)),
        )),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_save_then_reload_in_new_instance() {
    let dir = TempDir::new().unwrap();
    for store in server_stores(&dir, settings(&dir)) {
        let mut session: Session = Session::new(Arc::clone(&store), None);
        session.set("user_id", 42).unwrap();
        session.save(false).unwrap();
        let key = session.session_key().unwrap().to_string();

        let mut reopened: Session = Session::new(Arc::clone(&store), Some(&key));
        assert_eq!(
            reopened.get_as::<i64>("user_id").unwrap(),
            Some(42),
            "{}",
            store.name()
        );
    }
}

#[test]
fn test_flush_removes_record() {
    let dir = TempDir::new().unwrap();
    for store in server_stores(&dir, settings(&dir)) {
        let mut session: Session = Session::new(Arc::clone(&store), None);
        session.set("a", 1).unwrap();
        session.save(false).unwrap();
        let old_key = session.session_key().unwrap().to_string();
        assert!(session.exists(Some(&old_key)).unwrap());

        session.flush().unwrap();
        assert!(!session.exists(Some(&old_key)).unwrap(), "{}", store.name());
        assert_eq!(session.session_key(), None);
    }
}

#[test]
fn test_cycle_key_keeps_data() {
    let dir = TempDir::new().unwrap();
    for store in server_stores(&dir, settings(&dir)) {
        let mut session: Session = Session::new(Arc::clone(&store), None);
        session.set("cart", json!(["apple"])).unwrap();
        session.save(false).unwrap();
        let old_key = session.session_key().unwrap().to_string();

        session.cycle_key().unwrap();
        session.save(false).unwrap();
        let new_key = session.session_key().unwrap().to_string();
        assert_ne!(old_key, new_key);
        assert!(!session.exists(Some(&old_key)).unwrap(), "{}", store.name());

        let mut reopened: Session = Session::new(Arc::clone(&store), Some(&new_key));
        assert_eq!(reopened.get("cart").unwrap(), Some(json!(["apple"])));
    }
}

#[test]
fn test_must_create_conflicts() {
    let dir = TempDir::new().unwrap();
    for store in server_stores(&dir, settings(&dir)) {
        let data = SessionData::new();
        let key = KeyCodec::generate_candidate_key();

        assert!(
            matches!(store.save(&key, &data, false), Err(SessionError::DoesNotExist)),
            "{}",
            store.name()
        );
        store.save(&key, &data, true).unwrap();
        assert!(
            matches!(store.save(&key, &data, true), Err(SessionError::AlreadyExists)),
            "{}",
            store.name()
        );
    }
}

#[test]
fn test_hashed_keys_across_backends() {
    let dir = TempDir::new().unwrap();
    let settings = SessionSettings {
        store_key_hash: true,
        require_key_hash: true,
        ..settings(&dir)
    };
    for store in server_stores(&dir, settings) {
        let mut session: Session = Session::new(Arc::clone(&store), None);
        session.set("a", 1).unwrap();
        session.save(false).unwrap();

        let frontend = session.session_key().unwrap().to_string();
        let backend = session.backend_key().unwrap();
        assert!(frontend.starts_with("sha256$"));
        assert!(store.exists(&backend).unwrap(), "{}", store.name());

        // The plain key alone no longer passes validation
        let plain = frontend.trim_start_matches("sha256$");
        let unhashed: Session = Session::new(Arc::clone(&store), Some(plain));
        assert_eq!(unhashed.session_key(), None);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Create retries
// ─────────────────────────────────────────────────────────────────────────────

/// Wraps a store so every other insert loses a race to a competing writer.
struct RacingStore {
    inner: DbStore,
    inserts: Mutex<usize>,
    stolen: Mutex<Vec<String>>,
}

impl RacingStore {
    fn competitor_data() -> SessionData {
        let mut data = SessionData::new();
        data.insert("owner".to_string(), json!("competitor"));
        data
    }
}

impl SessionBackend for RacingStore {
    fn name(&self) -> &'static str {
        "RacingStore"
    }

    fn context(&self) -> &StoreContext {
        self.inner.context()
    }

    fn codec(&self) -> &SessionCodec {
        self.inner.codec()
    }

    fn exists(&self, backend_key: &str) -> Result<bool> {
        self.inner.exists(backend_key)
    }

    fn load_data(&self, backend_key: &str) -> Result<LoadOutcome> {
        self.inner.load_data(backend_key)
    }

    fn save(&self, backend_key: &str, data: &SessionData, must_create: bool) -> Result<()> {
        if must_create {
            let mut inserts = self.inserts.lock().unwrap();
            *inserts += 1;
            if *inserts % 2 == 1 {
                // Another writer claims the key between check and insert
                self.inner
                    .save(backend_key, &Self::competitor_data(), true)?;
                self.stolen.lock().unwrap().push(backend_key.to_string());
            }
        }
        self.inner.save(backend_key, data, must_create)
    }

    fn delete(&self, backend_key: &str) -> Result<()> {
        self.inner.delete(backend_key)
    }
}

#[test]
fn test_create_never_settles_on_conflicting_key() {
    let store = Arc::new(RacingStore {
        inner: DbStore::open_in_memory(ctx(SessionSettings::default())).unwrap(),
        inserts: Mutex::new(0),
        stolen: Mutex::new(Vec::new()),
    });

    let mut keys = HashSet::new();
    for _ in 0..5 {
        let mut session = Session::new(Arc::clone(&store), None);
        session.create().unwrap();
        let key = session.session_key().unwrap().to_string();

        // The record exists, with an empty payload, as soon as create returns
        assert_eq!(
            store.load_data(&key).unwrap(),
            LoadOutcome::Loaded(SessionData::new())
        );
        assert!(keys.insert(key));
    }

    let stolen = store.stolen.lock().unwrap();
    assert_eq!(stolen.len(), 5);
    for key in stolen.iter() {
        assert!(!keys.contains(key));
        // The competitor's record was not overwritten
        assert_eq!(
            store.load_data(key).unwrap(),
            LoadOutcome::Loaded(RacingStore::competitor_data())
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expiry
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_expiry_age_from_absolute_time() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(ctx(settings(&dir))).unwrap());
    let mut session = Session::new(store, None);

    let t0 = Utc::now();
    let query = ExpiryQuery::new()
        .modified_at(t0 - Duration::seconds(10))
        .with_expiry(Some(Expiry::At(t0)));
    assert_eq!(session.get_expiry_age(query).unwrap(), 10);
}

#[test]
fn test_browser_close_expiry() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(ctx(settings(&dir))).unwrap());
    let mut session = Session::new(store, None);

    session.set_expiry(Some(ExpirySetting::Seconds(0))).unwrap();
    assert!(session.get_expire_at_browser_close().unwrap());

    session.set_expiry(None).unwrap();
    assert!(!session.get_expire_at_browser_close().unwrap());
    assert_eq!(
        session.get_expiry_age(ExpiryQuery::new()).unwrap(),
        session.cookie_age()
    );
}

#[test]
fn test_absolute_expiry_survives_storage() {
    let dir = TempDir::new().unwrap();
    for store in server_stores(&dir, settings(&dir)) {
        let at = Utc::now() + Duration::hours(3);
        let mut session: Session = Session::new(Arc::clone(&store), None);
        session.set_expiry(Some(ExpirySetting::At(at))).unwrap();
        session.save(false).unwrap();
        let key = session.session_key().unwrap().to_string();

        let mut reopened: Session = Session::new(Arc::clone(&store), Some(&key));
        let date = reopened.get_expiry_date(ExpiryQuery::new()).unwrap();
        assert_eq!(date.timestamp(), at.timestamp(), "{}", store.name());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweeping
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_clear_expired_is_selective_and_idempotent() {
    let dir = TempDir::new().unwrap();
    let stores: Vec<Arc<dyn SessionBackend>> = vec![
        Arc::new(DbStore::open(ctx(settings(&dir)), dir.path().join("sweep.sqlite")).unwrap()),
        Arc::new(FileStore::new(ctx(settings(&dir))).unwrap()),
    ];

    for store in stores {
        let mut live: Session = Session::new(Arc::clone(&store), None);
        live.set("a", 1).unwrap();
        live.save(false).unwrap();

        let mut dead: Session = Session::new(Arc::clone(&store), None);
        dead.set_expiry(Some(ExpirySetting::At(Utc::now() - Duration::seconds(5))))
            .unwrap();
        dead.save(false).unwrap();

        assert_eq!(store.clear_expired().unwrap(), 1, "{}", store.name());
        assert_eq!(store.clear_expired().unwrap(), 0, "{}", store.name());
        assert!(live.exists(None).unwrap());
        assert!(!dead.exists(None).unwrap());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tampering
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_tampered_file_never_leaks_data() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(ctx(settings(&dir))).unwrap());
    let mut session = Session::new(Arc::clone(&store), None);
    session.set("is_admin", false).unwrap();
    session.save(false).unwrap();
    let key = session.session_key().unwrap().to_string();

    let path = store.key_to_file(&key).unwrap();
    let original = fs::read_to_string(&path).unwrap();
    for i in 0..original.len() {
        let mut bytes = original.clone().into_bytes();
        bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
        fs::write(&path, &bytes).unwrap();

        let mut reopened = Session::new(Arc::clone(&store), Some(&key));
        assert_eq!(reopened.get("is_admin").unwrap(), None, "byte {i}");
    }
}

#[test]
fn test_legacy_records_still_load() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(DbStore::open_in_memory(ctx(settings(&dir))).unwrap());
    let mut session = Session::new(Arc::clone(&store), None);
    session.save(false).unwrap();
    let key = session.session_key().unwrap().to_string();

    let mut data = SessionData::new();
    data.insert("user_id".to_string(), json!(7));
    let mut row = store.load_row(&key).unwrap().unwrap();
    row.session_data = store.codec().encode_legacy(&data).unwrap();
    satchel_session::SessionTable::update(store.table().as_ref(), &row).unwrap();

    let mut reopened = Session::new(Arc::clone(&store), Some(&key));
    assert_eq!(reopened.get("user_id").unwrap(), Some(json!(7)));
}

// ─────────────────────────────────────────────────────────────────────────────
// File durability
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_file_update_replaces_record_without_leftovers() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(ctx(settings(&dir))).unwrap());
    let mut session = Session::new(Arc::clone(&store), None);
    session.set("step", 1).unwrap();
    session.save(false).unwrap();
    let key = session.session_key().unwrap().to_string();
    let path = store.key_to_file(&key).unwrap();
    let before = fs::read(&path).unwrap();

    session.set("step", 2).unwrap();
    session.save(false).unwrap();

    assert_ne!(fs::read(&path).unwrap(), before);
    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![format!("sessionid{key}")]);

    let mut reopened = Session::new(Arc::clone(&store), Some(&key));
    assert_eq!(reopened.get("step").unwrap(), Some(json!(2)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Signed cookies
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_signed_cookie_roundtrip() {
    let store = Arc::new(SignedCookieStore::new(ctx(SessionSettings::default())));
    let mut session = Session::new(Arc::clone(&store), None);
    session.set("user_id", 42).unwrap();
    session.save(false).unwrap();

    let token = session.session_key().unwrap().to_string();
    let mut reopened = Session::new(Arc::clone(&store), Some(&token));
    assert_eq!(reopened.get_as::<i64>("user_id").unwrap(), Some(42));

    // Another backend's salt does not accept it
    let other = SessionCodec::new(store.context(), "DbStore");
    assert!(other.decode(&token).is_empty());
}
