//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::output::Stats;
use crate::state::{FetchOutcome, ResourceKind};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{simple_mime, ArtifactRecord, PageListing, PageQuery, RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

const RECORD_COLUMNS: &str = "seq, run_id, url, domain, depth, content_hash, size, original_size,
     content_type, fetched_at, kind, outcome, title, soft_failure, error_message";

const RUN_COLUMNS: &str = "id, started_at, finished_at, start_url, config_json, config_hash,
     status, stats_json, archive_path, error_message";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        // Initialize schema
        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    ///
    /// Used by tests and by the archive reader's queryable index.
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Inserts a complete run row, as read back from an archive
    pub fn import_run(&mut self, run: &RunRecord) -> StorageResult<()> {
        let stats_json = run.stats.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT OR REPLACE INTO runs (id, started_at, finished_at, start_url, config_json,
             config_hash, status, stats_json, archive_path, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.id,
                run.started_at,
                run.finished_at,
                run.start_url,
                run.config_json,
                run.config_hash,
                run.status.to_db_string(),
                stats_json,
                run.archive_path,
                run.error_message,
            ],
        )?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    let kind: String = row.get(10)?;
    let outcome: String = row.get(11)?;
    Ok(ArtifactRecord {
        seq: row.get(0)?,
        run_id: row.get(1)?,
        url: row.get(2)?,
        domain: row.get(3)?,
        depth: row.get(4)?,
        content_hash: row.get(5)?,
        size: row.get::<_, i64>(6)?.max(0) as u64,
        original_size: row.get::<_, i64>(7)?.max(0) as u64,
        content_type: row.get(8)?,
        fetched_at: row.get(9)?,
        kind: ResourceKind::from_db_string(&kind).unwrap_or(ResourceKind::Other),
        outcome: FetchOutcome::from_db_string(&outcome).unwrap_or(FetchOutcome::Failed),
        title: row.get(12)?,
        soft_failure: row.get(13)?,
        error_message: row.get(14)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<(RunRecord, Option<String>)> {
    let status: String = row.get(6)?;
    let stats_json: Option<String> = row.get(7)?;
    Ok((
        RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            start_url: row.get(3)?,
            config_json: row.get(4)?,
            config_hash: row.get(5)?,
            status: RunStatus::from_db_string(&status).unwrap_or(RunStatus::Failed),
            stats: None,
            archive_path: row.get(8)?,
            error_message: row.get(9)?,
        },
        stats_json,
    ))
}

fn attach_stats((mut run, stats_json): (RunRecord, Option<String>)) -> StorageResult<RunRecord> {
    run.stats = stats_json
        .map(|json| serde_json::from_str::<Stats>(&json))
        .transpose()?;
    Ok(run)
}

/// Escapes `%`, `_` and `\` for a LIKE pattern using `\` as the escape
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(
        &mut self,
        run_id: &str,
        start_url: &str,
        config_json: &str,
        config_hash: &str,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (id, started_at, start_url, config_json, config_hash, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                now,
                start_url,
                config_json,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        let run = self
            .conn
            .query_row(&sql, params![run_id], row_to_run)
            .optional()?
            .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))?;
        attach_stats(run)
    }

    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let sql = format!(
            "SELECT {} FROM runs ORDER BY started_at DESC, id DESC",
            RUN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_run)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(attach_stats(row?)?);
        }
        Ok(runs)
    }

    fn finish_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        stats: &Stats,
        archive_path: Option<&str>,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let stats_json = serde_json::to_string(stats)?;
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, stats_json = ?3,
             archive_path = ?4, error_message = ?5 WHERE id = ?6",
            params![
                status.to_db_string(),
                now,
                stats_json,
                archive_path,
                error_message,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    // ===== Record Index =====

    fn append_record(&mut self, record: &ArtifactRecord) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO records (run_id, url, domain, depth, content_hash, size, original_size,
             content_type, fetched_at, kind, outcome, title, soft_failure, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.run_id,
                record.url,
                record.domain,
                record.depth,
                record.content_hash,
                record.size as i64,
                record.original_size as i64,
                record.content_type,
                record.fetched_at,
                record.kind.to_db_string(),
                record.outcome.to_db_string(),
                record.title,
                record.soft_failure,
                record.error_message,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_records(&self, run_id: &str) -> StorageResult<Vec<ArtifactRecord>> {
        let sql = format!(
            "SELECT {} FROM records WHERE run_id = ?1 ORDER BY seq",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![run_id], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn list_records(&self, run_id: &str, query: &PageQuery) -> StorageResult<PageListing> {
        let (page, per_page) = query.normalized();

        let mut filter = String::from("FROM records WHERE run_id = ?");
        let mut values: Vec<Value> = vec![Value::Text(run_id.to_string())];

        if let Some(needle) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            filter.push_str(
                " AND (LOWER(url) LIKE ? ESCAPE '\\' OR LOWER(domain) LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(needle.trim());
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        if let Some(domain) = &query.domain {
            filter.push_str(" AND domain = ?");
            values.push(Value::Text(domain.clone()));
        }
        if let Some(kind) = query.kind {
            filter.push_str(" AND kind = ?");
            values.push(Value::Text(kind.to_db_string().to_string()));
        }
        if let Some(outcome) = query.outcome {
            filter.push_str(" AND outcome = ?");
            values.push(Value::Text(outcome.to_db_string().to_string()));
        }

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) {}", filter),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let offset = i64::from(page - 1) * i64::from(per_page);
        let sql = format!(
            "SELECT {} {} ORDER BY seq LIMIT {} OFFSET {}",
            RECORD_COLUMNS, filter, per_page, offset
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PageListing::new(records, page, per_page, total.max(0) as u64))
    }

    fn search_records(&self, needle: &str, limit: u32) -> StorageResult<Vec<ArtifactRecord>> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM records
             WHERE LOWER(url) LIKE ?1 ESCAPE '\\' OR LOWER(domain) LIKE ?1 ESCAPE '\\'
             ORDER BY run_id DESC, seq LIMIT ?2",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![like_pattern(needle), limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn find_record_by_hash(
        &self,
        run_id: &str,
        hash: &str,
    ) -> StorageResult<Option<ArtifactRecord>> {
        let sql = format!(
            "SELECT {} FROM records WHERE run_id = ?1 AND content_hash = ?2 ORDER BY seq LIMIT 1",
            RECORD_COLUMNS
        );
        let record = self
            .conn
            .query_row(&sql, params![run_id, hash], row_to_record)
            .optional()?;
        Ok(record)
    }

    fn find_record_by_url(&self, run_id: &str, url: &str) -> StorageResult<Option<ArtifactRecord>> {
        let sql = format!(
            "SELECT {} FROM records WHERE run_id = ?1 AND url = ?2",
            RECORD_COLUMNS
        );
        let record = self
            .conn
            .query_row(&sql, params![run_id, url], row_to_record)
            .optional()?;
        Ok(record)
    }

    // ===== Statistics =====

    fn count_records_by_outcome(&self, run_id: &str, outcome: FetchOutcome) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE run_id = ?1 AND outcome = ?2",
            params![run_id, outcome.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn get_domain_counts(&self, run_id: &str) -> StorageResult<BTreeMap<String, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT domain, COUNT(*) FROM records WHERE run_id = ?1 AND outcome = 'ok'
             GROUP BY domain",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (domain, count) = row?;
            counts.insert(domain, count.max(0) as u64);
        }
        Ok(counts)
    }

    fn get_depth_breakdown(&self, run_id: &str) -> StorageResult<BTreeMap<u32, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT depth, COUNT(*) FROM records WHERE run_id = ?1 AND outcome = 'ok'
             GROUP BY depth",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut breakdown = BTreeMap::new();
        for row in rows {
            let (depth, count) = row?;
            breakdown.insert(depth, count.max(0) as u64);
        }
        Ok(breakdown)
    }

    fn get_content_type_breakdown(&self, run_id: &str) -> StorageResult<BTreeMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT content_type FROM records WHERE run_id = ?1 AND outcome = 'ok'")?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, Option<String>>(0))?;

        let mut breakdown = BTreeMap::new();
        for row in rows {
            *breakdown.entry(simple_mime(row?.as_deref())).or_insert(0) += 1;
        }
        Ok(breakdown)
    }
}
