//! Registry Storage - SQLite-backed `models` table
//!
//! Selection changes run inside a transaction and a partial unique index
//! keeps `selected = 1` on at most one row.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::types::{any_present, artifact_file_name, parse_timestamp, Metrics, ModelRecord, Thresholds};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Model not found: {0}")]
    NotFound(String),
    #[error("Refusing to delete selected model {0}")]
    SelectedInUse(String),
    #[error("Selection moved to {found:?}, expected {expected:?}")]
    Superseded {
        expected: Option<String>,
        found: Option<String>,
    },
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS models (
    id TEXT PRIMARY KEY,
    predecessor_id TEXT REFERENCES models(id) ON DELETE SET NULL,
    requests_used INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL UNIQUE,
    accuracy REAL,
    precision REAL,
    recall REAL,
    f1 REAL,
    expected_accuracy REAL,
    expected_precision REAL,
    expected_recall REAL,
    expected_f1 REAL,
    selected INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    last_trained_at TEXT,
    train_every REAL,
    artifact_sha256 TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_models_single_selected ON models(selected) WHERE selected = 1;
";

const COLUMNS: &str = "id, predecessor_id, requests_used, name, accuracy, precision, recall, f1, \
    expected_accuracy, expected_precision, expected_recall, expected_f1, \
    selected, updated_at, last_trained_at, train_every, artifact_sha256";

// ============================================================================
// REGISTRY
// ============================================================================

pub struct ModelRegistry {
    conn: Mutex<Connection>,
    models_dir: PathBuf,
}

impl ModelRegistry {
    /// Open (or create) the registry database
    pub fn open(db_path: &Path, models_dir: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn, models_dir)
    }

    /// In-memory database (tests, dry runs)
    pub fn open_in_memory(models_dir: &Path) -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?, models_dir)
    }

    fn init(conn: Connection, models_dir: &Path) -> Result<Self, RegistryError> {
        fs::create_dir_all(models_dir)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        log::info!("Model registry ready (artifacts: {})", models_dir.display());
        Ok(Self {
            conn: Mutex::new(conn),
            models_dir: models_dir.to_path_buf(),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// On-disk artifact path for a model name
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.models_dir.join(artifact_file_name(name))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// The single selected record, if any
    pub fn get_selected(&self) -> Result<Option<ModelRecord>, RegistryError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM models WHERE selected = 1", COLUMNS);
        Ok(conn.query_row(&sql, [], row_to_record).optional()?)
    }

    /// Whether `id` is the selected row; read errors count as "no"
    pub fn is_selected(&self, id: &str) -> bool {
        match self.get_selected() {
            Ok(selected) => selected.map_or(false, |s| s.id == id),
            Err(e) => {
                log::warn!("Registry read failed: {}", e);
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<ModelRecord>, RegistryError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM models WHERE id = ?1", COLUMNS);
        Ok(conn.query_row(&sql, [id], row_to_record).optional()?)
    }

    /// All records, most recently updated first
    pub fn list(&self) -> Result<Vec<ModelRecord>, RegistryError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM models ORDER BY updated_at DESC, name", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_exists(&self, name: &str) -> Result<bool, RegistryError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM models WHERE name = ?1", [name], |r| r.get(0))?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Insert a new record (always unselected)
    pub fn insert(&self, record: &ModelRecord) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        let metrics = record.metrics.map(|m| [m.accuracy, m.precision, m.recall, m.f1]);
        let expected = record.expected.map(|t| t.as_array());

        conn.execute(
            &format!(
                "INSERT INTO models ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?14, ?15, ?16)",
                COLUMNS
            ),
            params![
                record.id,
                record.predecessor_id,
                record.requests_used as i64,
                record.name,
                metrics.map(|m| m[0]),
                metrics.map(|m| m[1]),
                metrics.map(|m| m[2]),
                metrics.map(|m| m[3]),
                expected.map(|t| t[0]),
                expected.map(|t| t[1]),
                expected.map(|t| t[2]),
                expected.map(|t| t[3]),
                record.updated_at.to_rfc3339(),
                record.last_trained_at.map(|t| t.to_rfc3339()),
                record.train_every,
                record.artifact_sha256,
            ],
        )?;
        Ok(())
    }

    /// Atomically move the selection to `id`
    pub fn promote(&self, id: &str) -> Result<(), RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        select_in_tx(&tx, id)?;
        tx.commit()?;

        log::info!("Registry: promoted {}", id);
        Ok(())
    }

    /// Record metrics for a candidate and promote it, as one transaction
    ///
    /// Compare-and-swap on the selection: fails with `Superseded` unless the
    /// selected row is still `expected_selected`.
    pub fn accept(
        &self,
        id: &str,
        metrics: &Metrics,
        artifact_sha256: Option<&str>,
        requests_used: u64,
        expected_selected: Option<&str>,
    ) -> Result<(), RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let current: Option<String> = tx
            .query_row("SELECT id FROM models WHERE selected = 1", [], |r| r.get(0))
            .optional()?;
        if current.as_deref() != expected_selected {
            return Err(RegistryError::Superseded {
                expected: expected_selected.map(str::to_string),
                found: current,
            });
        }

        let updated = tx.execute(
            "UPDATE models SET accuracy = ?2, precision = ?3, recall = ?4, f1 = ?5,
                 artifact_sha256 = ?6, requests_used = ?7, last_trained_at = ?8, updated_at = ?8
             WHERE id = ?1",
            params![
                id,
                metrics.accuracy,
                metrics.precision,
                metrics.recall,
                metrics.f1,
                artifact_sha256,
                requests_used as i64,
                now,
            ],
        )?;
        if updated == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }

        select_in_tx(&tx, id)?;
        tx.commit()?;

        log::info!("Registry: accepted and promoted {}", id);
        Ok(())
    }

    /// Drop candidates left behind by an interrupted process
    ///
    /// A locally trained candidate has a predecessor, no metrics and is not
    /// selected until accepted. Only call this while no session is running.
    pub fn purge_incomplete_candidates(&self) -> Result<Vec<String>, RegistryError> {
        let names: Vec<String> = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let names = {
                let mut stmt = tx.prepare(
                    "SELECT name FROM models
                     WHERE selected = 0 AND predecessor_id IS NOT NULL AND accuracy IS NULL",
                )?;
                let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            tx.execute(
                "DELETE FROM models
                 WHERE selected = 0 AND predecessor_id IS NOT NULL AND accuracy IS NULL",
                [],
            )?;
            tx.commit()?;
            names
        };

        for name in &names {
            self.delete_artifact(name)?;
            log::warn!("Registry: purged incomplete candidate {}", name);
        }
        Ok(names)
    }

    /// Stamp `last_trained_at`
    pub fn mark_trained(&self, id: &str, at: DateTime<Utc>) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE models SET last_trained_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Remove row and artifact; a missing artifact is not an error
    pub fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let name = {
            let conn = self.conn.lock();
            let found: Option<(String, bool)> = conn
                .query_row("SELECT name, selected FROM models WHERE id = ?1", [id], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })
                .optional()?;

            let Some((name, selected)) = found else {
                return Err(RegistryError::NotFound(id.to_string()));
            };
            if selected {
                return Err(RegistryError::SelectedInUse(id.to_string()));
            }
            conn.execute("DELETE FROM models WHERE id = ?1", [id])?;
            name
        };

        self.delete_artifact(&name)?;
        log::debug!("Registry: deleted {} ({})", id, name);
        Ok(())
    }

    /// Remove an artifact file, ignoring a missing one
    pub fn delete_artifact(&self, name: &str) -> Result<(), RegistryError> {
        match fs::remove_file(self.artifact_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert control-plane rows, then apply the remote selection
    ///
    /// Local-only columns (`predecessor_id`, `artifact_sha256`) survive the
    /// upsert. `selected_id = None` keeps the local selection.
    pub fn sync_from_remote(
        &self,
        rows: &[ModelRecord],
        selected_id: Option<&str>,
    ) -> Result<usize, RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut synced = 0;

        for record in rows {
            let metrics = record.metrics.map(|m| [m.accuracy, m.precision, m.recall, m.f1]);
            let expected = record.expected.map(|t| t.as_array());

            let result = tx.execute(
                "INSERT INTO models (id, name, requests_used, accuracy, precision, recall, f1,
                     expected_accuracy, expected_precision, expected_recall, expected_f1,
                     selected, updated_at, last_trained_at, train_every)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     requests_used = excluded.requests_used,
                     accuracy = excluded.accuracy,
                     precision = excluded.precision,
                     recall = excluded.recall,
                     f1 = excluded.f1,
                     expected_accuracy = excluded.expected_accuracy,
                     expected_precision = excluded.expected_precision,
                     expected_recall = excluded.expected_recall,
                     expected_f1 = excluded.expected_f1,
                     updated_at = excluded.updated_at,
                     last_trained_at = COALESCE(excluded.last_trained_at, models.last_trained_at),
                     train_every = excluded.train_every",
                params![
                    record.id,
                    record.name,
                    record.requests_used as i64,
                    metrics.map(|m| m[0]),
                    metrics.map(|m| m[1]),
                    metrics.map(|m| m[2]),
                    metrics.map(|m| m[3]),
                    expected.map(|t| t[0]),
                    expected.map(|t| t[1]),
                    expected.map(|t| t[2]),
                    expected.map(|t| t[3]),
                    record.updated_at.to_rfc3339(),
                    record.last_trained_at.map(|t| t.to_rfc3339()),
                    record.train_every,
                ],
            );

            match result {
                Ok(_) => synced += 1,
                // Name clash with a different local id: keep the local row
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    log::warn!("Registry sync: skipping {} ({}): name conflict", record.id, record.name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(id) = selected_id {
            select_in_tx(&tx, id)?;
        }

        tx.commit()?;
        log::debug!("Registry sync: {} rows upserted", synced);
        Ok(synced)
    }
}

/// Clear the old selection, then set the new one (same transaction)
fn select_in_tx(tx: &Transaction<'_>, id: &str) -> Result<(), RegistryError> {
    let exists: i64 = tx.query_row("SELECT COUNT(*) FROM models WHERE id = ?1", [id], |r| r.get(0))?;
    if exists == 0 {
        return Err(RegistryError::NotFound(id.to_string()));
    }

    tx.execute("UPDATE models SET selected = 0 WHERE selected = 1 AND id != ?1", [id])?;
    tx.execute(
        "UPDATE models SET selected = 1, updated_at = ?2 WHERE id = ?1 AND selected = 0",
        params![id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ModelRecord> {
    let timestamp = |idx: usize| -> rusqlite::Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = row.get(idx)?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    };

    let metrics = any_present([row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?])
        .map(|m| Metrics::new(m[0], m[1], m[2], m[3]));
    let expected = any_present([row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?])
        .map(|t| Thresholds::new(t[0], t[1], t[2], t[3]));
    let requests_used: i64 = row.get(2)?;

    Ok(ModelRecord {
        id: row.get(0)?,
        predecessor_id: row.get(1)?,
        requests_used: requests_used.max(0) as u64,
        name: row.get(3)?,
        metrics,
        expected,
        selected: row.get(12)?,
        updated_at: timestamp(13)?.unwrap_or_else(Utc::now),
        last_trained_at: timestamp(14)?,
        train_every: row.get(15)?,
        artifact_sha256: row.get(16)?,
    })
}
