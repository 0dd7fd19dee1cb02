//! SQLite engine.
//!
//! Indexed attributes live in their own columns (and tags in their own table)
//! so that searches run as SQL; the full record is kept alongside as JSON.
//! Every mutation runs in a single `IMMEDIATE` transaction.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::models::{normalize_locator, normalize_query_tags, BaseModelType, ModelConfig, ModelType};
use rusqlite::{params, Connection, OptionalExtension, ToSql, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{ModelConfigStore, MISSING_VERSION};

const SCHEMA_VERSION_KEY: &str = "schema_version";


const SELECT_CONFIG: &str = "SELECT config_json FROM model_config";

/// SQLite-backed store.
///
/// Uses WAL mode for file databases and a `Mutex<Connection>` for thread
/// safety within a process.
pub struct SqliteStore {
    db_path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// Fails with `VersionMismatch` if the database was stamped with another
    /// schema version.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| RegistryError::Io {
                    message: format!("Failed to create directory {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(&db_path)?;
        let store = Self::init(conn, Some(db_path))?;

        debug!("Opened SQLite model config store at {:?}", store.db_path);
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    /// Database file location; `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn init(mut conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        Self::configure_connection(&conn)?;

        // Nothing is written until the version has been accepted.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::check_or_stamp_version(&tx)?;
        Self::ensure_schema(&tx)?;
        tx.commit()?;

        if db_path.is_some() {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        }

        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout={};\n\
             PRAGMA temp_store=MEMORY;\n\
             PRAGMA foreign_keys=ON;",
            RegistryConfig::BUSY_TIMEOUT_MS,
        ))?;
        Ok(())
    }

    /// Compare the recorded schema version before any record is read.
    ///
    /// Only a database without tables is stamped with the current version; one
    /// that already holds tables but no version row is a mismatch.
    fn check_or_stamp_version(conn: &Connection) -> Result<()> {
        let has_meta: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'store_meta'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let found: Option<String> = match has_meta {
            Some(_) => conn
                .query_row(
                    "SELECT value FROM store_meta WHERE key = ?1",
                    params![SCHEMA_VERSION_KEY],
                    |row| row.get(0),
                )
                .optional()?,
            None => None,
        };

        if let Some(version) = found {
            return super::check_version(&version);
        }

        let other_tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != 'store_meta'",
            [],
            |row| row.get(0),
        )?;
        if other_tables > 0 {
            return super::check_version(MISSING_VERSION);
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        conn.execute(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
            params![SCHEMA_VERSION_KEY, RegistryConfig::CONFIG_FILE_VERSION],
        )?;
        info!(
            "Stamped model config store with schema version {}",
            RegistryConfig::CONFIG_FILE_VERSION
        );
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS model_config (
                key TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_model TEXT NOT NULL,
                model_type TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                config_json TEXT NOT NULL,
                created_at TEXT,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS model_tags (
                key TEXT NOT NULL REFERENCES model_config(key) ON DELETE CASCADE,
                tag TEXT NOT NULL,
                PRIMARY KEY (key, tag)
            );

            CREATE INDEX IF NOT EXISTS idx_model_config_name ON model_config(name);
            CREATE INDEX IF NOT EXISTS idx_model_config_base ON model_config(base_model);
            CREATE INDEX IF NOT EXISTS idx_model_config_type ON model_config(model_type);
            CREATE INDEX IF NOT EXISTS idx_model_tags_tag ON model_tags(tag);",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RegistryError::Lock("sqlite connection".to_string()))
    }

    fn path_owner(conn: &Connection, path: &str) -> Result<Option<String>> {
        let owner = conn
            .query_row(
                "SELECT key FROM model_config WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    fn fetch(conn: &Connection, key: &str) -> Result<Option<ModelConfig>> {
        let json: Option<String> = conn
            .query_row(
                &format!("{} WHERE key = ?1", SELECT_CONFIG),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|json| decode(&json)).transpose()
    }

    fn write_tags(conn: &Connection, config: &ModelConfig) -> Result<()> {
        conn.execute("DELETE FROM model_tags WHERE key = ?1", params![config.key])?;
        let mut stmt = conn.prepare("INSERT INTO model_tags (key, tag) VALUES (?1, ?2)")?;
        for tag in &config.tags {
            stmt.execute(params![config.key, tag])?;
        }
        Ok(())
    }

    fn query_configs(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<ModelConfig>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;

        let mut configs = Vec::new();
        for row in rows {
            configs.push(decode(&row?)?);
        }
        Ok(configs)
    }
}

impl ModelConfigStore for SqliteStore {
    fn version(&self) -> &str {
        RegistryConfig::CONFIG_FILE_VERSION
    }

    fn add_model(&self, config: ModelConfig) -> Result<ModelConfig> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM model_config WHERE key = ?1",
                params![config.key],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(RegistryError::DuplicateKey {
                key: config.key.clone(),
            });
        }

        let path = path_string(&config.path);
        if let Some(owner) = Self::path_owner(&tx, &path)? {
            return Err(RegistryError::DuplicatePath {
                path: config.path.clone(),
                existing_key: owner,
            });
        }

        tx.execute(
            "INSERT INTO model_config (key, name, base_model, model_type, path,
                                       config_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                config.key,
                config.name,
                config.base_model.as_str(),
                config.model_type.as_str(),
                path,
                serde_json::to_string(&config)?,
                config.created_at,
                config.updated_at,
            ],
        )?;
        Self::write_tags(&tx, &config)?;
        tx.commit()?;

        debug!("Inserted model config: {}", config.key);
        Ok(config)
    }

    fn update_model(&self, mut config: ModelConfig) -> Result<ModelConfig> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = Self::fetch(&tx, &config.key)?.ok_or_else(|| RegistryError::UnknownKey {
            key: config.key.clone(),
        })?;
        if config.created_at.is_none() {
            config.created_at = existing.created_at;
        }

        let path = path_string(&config.path);
        if let Some(owner) = Self::path_owner(&tx, &path)? {
            if owner != config.key {
                return Err(RegistryError::DuplicatePath {
                    path: config.path.clone(),
                    existing_key: owner,
                });
            }
        }

        tx.execute(
            "UPDATE model_config SET
                 name = ?2,
                 base_model = ?3,
                 model_type = ?4,
                 path = ?5,
                 config_json = ?6,
                 created_at = ?7,
                 updated_at = ?8
             WHERE key = ?1",
            params![
                config.key,
                config.name,
                config.base_model.as_str(),
                config.model_type.as_str(),
                path,
                serde_json::to_string(&config)?,
                config.created_at,
                config.updated_at,
            ],
        )?;
        Self::write_tags(&tx, &config)?;
        tx.commit()?;

        debug!("Replaced model config: {}", config.key);
        Ok(config)
    }

    fn del_model(&self, key: &str) -> Result<ModelConfig> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let removed = Self::fetch(&tx, key)?.ok_or_else(|| RegistryError::UnknownKey {
            key: key.to_string(),
        })?;
        tx.execute("DELETE FROM model_tags WHERE key = ?1", params![key])?;
        tx.execute("DELETE FROM model_config WHERE key = ?1", params![key])?;
        tx.commit()?;

        debug!("Removed model config: {}", key);
        Ok(removed)
    }

    fn get_model(&self, key: &str) -> Result<ModelConfig> {
        let conn = self.lock_conn()?;
        Self::fetch(&conn, key)?.ok_or_else(|| RegistryError::UnknownKey {
            key: key.to_string(),
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM model_config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn search_by_tag(&self, tags: &BTreeSet<String>) -> Result<Vec<ModelConfig>> {
        let Some(tags) = normalize_query_tags(tags) else {
            return Ok(Vec::new());
        };
        let tags: Vec<String> = tags.into_iter().collect();
        let conn = self.lock_conn()?;

        if tags.is_empty() {
            return Self::query_configs(&conn, &format!("{} ORDER BY key", SELECT_CONFIG), &[]);
        }

        let placeholders: Vec<_> = tags.iter().map(|_| "?").collect();
        let sql = format!(
            "{} WHERE key IN (
                 SELECT key FROM model_tags WHERE tag IN ({})
                 GROUP BY key HAVING COUNT(DISTINCT tag) = ?
             ) ORDER BY key",
            SELECT_CONFIG,
            placeholders.join(","),
        );

        let tag_count = tags.len() as i64;
        let mut params_refs: Vec<&dyn ToSql> = tags.iter().map(|t| t as &dyn ToSql).collect();
        params_refs.push(&tag_count);

        Self::query_configs(&conn, &sql, &params_refs)
    }

    fn search_by_path(&self, path: &Path) -> Result<Option<ModelConfig>> {
        let Some(path) = normalize_locator(path) else {
            return Ok(None);
        };
        let path = path_string(&path);
        let conn = self.lock_conn()?;
        let mut found = Self::query_configs(
            &conn,
            &format!("{} WHERE path = ?1", SELECT_CONFIG),
            &[&path as &dyn ToSql],
        )?;
        Ok(found.pop())
    }

    fn search_by_name(
        &self,
        name: Option<&str>,
        base_model: Option<BaseModelType>,
        model_type: Option<ModelType>,
    ) -> Result<Vec<ModelConfig>> {
        let mut where_parts: Vec<&str> = Vec::new();
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(name) = name {
            where_parts.push("name = ?");
            params_vec.push(Box::new(name.to_string()));
        }
        if let Some(base) = base_model {
            where_parts.push("base_model = ?");
            params_vec.push(Box::new(base.as_str()));
        }
        if let Some(model_type) = model_type {
            where_parts.push("model_type = ?");
            params_vec.push(Box::new(model_type.as_str()));
        }

        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_parts.join(" AND "))
        };
        let sql = format!("{}{} ORDER BY key", SELECT_CONFIG, where_clause);

        let conn = self.lock_conn()?;
        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        Self::query_configs(&conn, &sql, &params_refs)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM model_config", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn decode(json: &str) -> Result<ModelConfig> {
    serde_json::from_str(json).map_err(|e| RegistryError::Json {
        message: format!("Failed to decode stored model config: {}", e),
        source: Some(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(temp_dir.path().join("models.db")).unwrap();
        (store, temp_dir)
    }

    fn controlnet(key: &str, tags: &[&str]) -> ModelConfig {
        ModelConfig::new(
            format!("{}-control", key),
            BaseModelType::StableDiffusion1,
            ModelType::ControlNet,
            format!("/models/controlnet/{}", key),
        )
        .with_key(key)
        .with_tags(tags.iter().copied())
    }

    fn tag_set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|t| t.to_string()).collect()
    }

    fn tag_rows(store: &SqliteStore, key: &str) -> Vec<String> {
        let conn = store.lock_conn().unwrap();
        let mut stmt = conn
            .prepare("SELECT tag FROM model_tags WHERE key = ?1 ORDER BY tag")
            .unwrap();
        let rows = stmt.query_map(params![key], |row| row.get(0)).unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_add_and_get() {
        let (store, _temp) = create_test_store();

        store.add_model(controlnet("canny", &["edges"])).unwrap();

        let loaded = store.get_model("canny").unwrap();
        assert_eq!(loaded.name, "canny-control");
        assert_eq!(loaded.model_type, ModelType::ControlNet);
        assert!(store.exists("canny").unwrap());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_key_and_path_leave_no_trace() {
        let (store, _temp) = create_test_store();
        store.add_model(controlnet("canny", &["edges"])).unwrap();

        let err = store
            .add_model(controlnet("canny", &["other"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey { .. }));

        let mut same_path = controlnet("depth", &["depth"]);
        same_path.path = PathBuf::from("/models/controlnet/canny");
        let err = store.add_model(same_path).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePath { ref existing_key, .. } if existing_key == "canny"));

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(tag_rows(&store, "canny"), ["edges"]);
        assert!(tag_rows(&store, "depth").is_empty());
    }

    #[test]
    fn test_update_rewrites_tag_rows() {
        let (store, _temp) = create_test_store();
        store.add_model(controlnet("canny", &["a", "shared"])).unwrap();

        store
            .update_model(controlnet("canny", &["b", "shared"]))
            .unwrap();

        assert_eq!(tag_rows(&store, "canny"), ["b", "shared"]);
        assert!(store.search_by_tag(&tag_set(&["a"])).unwrap().is_empty());
        assert_eq!(store.search_by_tag(&tag_set(&["b", "shared"])).unwrap().len(), 1);
    }

    #[test]
    fn test_update_unknown_key() {
        let (store, _temp) = create_test_store();
        let err = store.update_model(controlnet("ghost", &[])).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_removes_row_and_tags() {
        let (store, _temp) = create_test_store();
        store.add_model(controlnet("canny", &["edges"])).unwrap();

        let removed = store.del_model("canny").unwrap();
        assert_eq!(removed.key, "canny");

        assert!(store.get_model("canny").unwrap_err().is_not_found());
        assert!(tag_rows(&store, "canny").is_empty());
        assert!(store.del_model("canny").unwrap_err().is_not_found());
    }

    #[test]
    fn test_tag_search_requires_all_tags() {
        let (store, _temp) = create_test_store();
        store.add_model(controlnet("a", &["x", "y"])).unwrap();
        store.add_model(controlnet("b", &["x"])).unwrap();

        let keys: Vec<String> = store
            .search_by_tag(&tag_set(&["x"]))
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, ["a", "b"]);

        let both = store.search_by_tag(&tag_set(&["x", "y"])).unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].key, "a");

        assert_eq!(store.search_by_tag(&BTreeSet::new()).unwrap().len(), 2);
        assert!(store.search_by_tag(&tag_set(&["x", "z"])).unwrap().is_empty());
    }

    #[test]
    fn test_search_by_name_filters() {
        let (store, _temp) = create_test_store();
        store.add_model(controlnet("a", &[])).unwrap();
        let mut xl = controlnet("b", &[]);
        xl.base_model = BaseModelType::StableDiffusionXL;
        store.add_model(xl).unwrap();

        assert_eq!(store.all_models().unwrap().len(), 2);
        let sd1 = store
            .search_by_name(None, Some(BaseModelType::StableDiffusion1), None)
            .unwrap();
        assert_eq!(sd1.len(), 1);
        assert_eq!(sd1[0].key, "a");
        assert_eq!(
            store
                .search_by_name(Some("b-control"), None, Some(ModelType::ControlNet))
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .search_by_name(Some("b-control"), None, Some(ModelType::Lora))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_by_path_normalizes_query() {
        let (store, _temp) = create_test_store();
        store.add_model(controlnet("canny", &[])).unwrap();

        let found = store
            .search_by_path(Path::new("/models/./controlnet/canny/"))
            .unwrap();
        assert_eq!(found.map(|r| r.key), Some("canny".to_string()));
        assert!(store.search_by_path(Path::new("")).unwrap().is_none());
    }

    #[test]
    fn test_version_mismatch_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("models.db");

        let store = SqliteStore::open(&db_path).unwrap();
        store.add_model(controlnet("canny", &[])).unwrap();
        {
            let conn = store.lock_conn().unwrap();
            conn.execute(
                "UPDATE store_meta SET value = '3.0' WHERE key = ?1",
                params![SCHEMA_VERSION_KEY],
            )
            .unwrap();
        }
        drop(store);

        let err = SqliteStore::open(&db_path).err().expect("should refuse to open");
        assert!(matches!(
            err,
            RegistryError::VersionMismatch { ref expected, ref found }
                if expected == RegistryConfig::CONFIG_FILE_VERSION && found == "3.0"
        ));
    }

    #[test]
    fn test_unversioned_database_with_tables_is_refused_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("models.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE model_config (key TEXT PRIMARY KEY, blob TEXT);
                 INSERT INTO model_config (key, blob) VALUES ('legacy', '{}');",
            )
            .unwrap();
        }

        let err = SqliteStore::open(&db_path).err().expect("should refuse to open");
        assert!(matches!(
            err,
            RegistryError::VersionMismatch { ref found, .. } if found == MISSING_VERSION
        ));

        let conn = Connection::open(&db_path).unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(tables, vec!["model_config".to_string()]);
    }

    #[test]
    fn test_empty_database_is_stamped_with_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("models.db");
        drop(Connection::open(&db_path).unwrap());

        let store = SqliteStore::open(&db_path).unwrap();
        let conn = store.lock_conn().unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, RegistryConfig::CONFIG_FILE_VERSION);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("models.db");

        SqliteStore::open(&db_path)
            .unwrap()
            .add_model(controlnet("canny", &["edges"]))
            .unwrap();

        let reopened = SqliteStore::open(&db_path).unwrap();
        assert_eq!(reopened.version(), RegistryConfig::CONFIG_FILE_VERSION);
        assert!(reopened.exists("canny").unwrap());
        assert_eq!(reopened.db_path(), Some(db_path.as_path()));
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.db_path().is_none());
        store.add_model(controlnet("canny", &[])).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
