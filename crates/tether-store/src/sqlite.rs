//! SQLite-backed [`RowStore`].
//!
//! The database holds exactly the two tables of the logical schema. The
//! `field` and `value` columns are declared without a type so SQLite keeps
//! integers, reals, text and blobs exactly as written.
//!
//! Writes open a transaction lazily; [`RowStore::commit`] ends it. A store
//! dropped with an open transaction loses those writes, which matches the
//! "durable only after commit" contract.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use tether_types::{EntityId, FieldKey, Scalar, StoredValue, Tag};

use crate::error::{StoreError, StoreResult};
use crate::traits::RowStore;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS objects (
        entity_id INTEGER PRIMARY KEY,
        type_tag  TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS data (
        entity_id INTEGER NOT NULL,
        field     NOT NULL,
        ref_tag   TEXT,
        value,
        PRIMARY KEY (entity_id, field)
    );
";

/// Row store persisted in a SQLite database.
pub struct SqliteRowStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteRowStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        debug!(path = %path.display(), "opened sqlite row store");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Path of the database file, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> StoreResult<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

/// Begin a transaction unless one is already open.
fn ensure_transaction(conn: &Connection) -> StoreResult<()> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN")?;
    }
    Ok(())
}

fn field_to_sql(field: &FieldKey) -> SqlValue {
    match field {
        FieldKey::Int(i) => SqlValue::Integer(*i),
        FieldKey::Text(name) => SqlValue::Text(name.clone()),
    }
}

fn field_from_sql(id: EntityId, raw: SqlValue) -> StoreResult<FieldKey> {
    match raw {
        SqlValue::Integer(i) => Ok(FieldKey::Int(i)),
        SqlValue::Text(name) => Ok(FieldKey::Text(name)),
        other => Err(StoreError::Corrupt {
            entity: id,
            reason: format!("unsupported field key {other:?}"),
        }),
    }
}

fn scalar_to_sql(scalar: &Scalar) -> SqlValue {
    match scalar {
        Scalar::Null => SqlValue::Null,
        Scalar::Int(v) => SqlValue::Integer(*v),
        Scalar::Float(v) => SqlValue::Real(*v),
        Scalar::Text(v) => SqlValue::Text(v.clone()),
        Scalar::Bytes(v) => SqlValue::Blob(v.clone()),
    }
}

fn scalar_from_sql(raw: SqlValue) -> Scalar {
    match raw {
        SqlValue::Null => Scalar::Null,
        SqlValue::Integer(v) => Scalar::Int(v),
        SqlValue::Real(v) => Scalar::Float(v),
        SqlValue::Text(v) => Scalar::Text(v),
        SqlValue::Blob(v) => Scalar::Bytes(v),
    }
}

impl RowStore for SqliteRowStore {
    fn insert_entity(&self, id: EntityId, type_tag: &str) -> StoreResult<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        ensure_transaction(&conn)?;
        match conn.execute(
            "INSERT INTO objects (entity_id, type_tag) VALUES (?1, ?2)",
            params![id.as_i64(), type_tag],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateEntity(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn entities(&self) -> StoreResult<Vec<(EntityId, String)>> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let mut stmt = conn.prepare("SELECT entity_id, type_tag FROM objects ORDER BY entity_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut entities = Vec::new();
        for row in rows {
            let (raw_id, tag) = row?;
            entities.push((EntityId::from_i64(raw_id)?, tag));
        }
        Ok(entities)
    }

    fn read_row(&self, id: EntityId, field: &FieldKey) -> StoreResult<Option<StoredValue>> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let row = conn
            .query_row(
                "SELECT ref_tag, value FROM data WHERE entity_id = ?1 AND field = ?2",
                params![id.as_i64(), field_to_sql(field)],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, SqlValue>(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((tag, value)) => {
                let tag = tag.as_deref().map(Tag::parse).transpose()?;
                Ok(Some(StoredValue {
                    tag,
                    value: scalar_from_sql(value),
                }))
            }
        }
    }

    fn write_row(&self, id: EntityId, field: &FieldKey, value: &StoredValue) -> StoreResult<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        ensure_transaction(&conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO data (entity_id, field, ref_tag, value) VALUES (?1, ?2, ?3, ?4)",
            params![
                id.as_i64(),
                field_to_sql(field),
                value.tag.as_ref().map(Tag::as_str),
                scalar_to_sql(&value.value),
            ],
        )?;
        Ok(())
    }

    fn delete_row(&self, id: EntityId, field: &FieldKey) -> StoreResult<bool> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        ensure_transaction(&conn)?;
        let removed = conn.execute(
            "DELETE FROM data WHERE entity_id = ?1 AND field = ?2",
            params![id.as_i64(), field_to_sql(field)],
        )?;
        Ok(removed > 0)
    }

    fn fields(&self, id: EntityId) -> StoreResult<Vec<FieldKey>> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let mut stmt = conn.prepare("SELECT field FROM data WHERE entity_id = ?1 ORDER BY field")?;
        let rows = stmt.query_map(params![id.as_i64()], |row| row.get::<_, SqlValue>(0))?;

        let mut fields = Vec::new();
        for row in rows {
            fields.push(field_from_sql(id, row?)?);
        }
        Ok(fields)
    }

    fn max_index(&self, id: EntityId) -> StoreResult<Option<i64>> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let max: SqlValue = conn.query_row(
            "SELECT MAX(field) FROM data WHERE entity_id = ?1",
            params![id.as_i64()],
            |row| row.get(0),
        )?;
        match max {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(i) => Ok(Some(i)),
            other => Err(StoreError::Corrupt {
                entity: id,
                reason: format!("non-integer sequence index {other:?}"),
            }),
        }
    }

    fn max_entity_id(&self) -> StoreResult<Option<EntityId>> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(m) FROM (
                 SELECT MAX(entity_id) AS m FROM objects
                 UNION ALL
                 SELECT MAX(entity_id) AS m FROM data
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(max.map(EntityId::from_i64).transpose()?)
    }

    fn commit(&self) -> StoreResult<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteRowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRowStore")
            .field("path", &self.path)
            .finish()
    }
}
