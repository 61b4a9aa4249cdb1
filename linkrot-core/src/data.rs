use chrono::{DateTime, Utc};
use linkrot_scanner::error::FailureCause;
use linkrot_scanner::normalize::LinkScope;
use linkrot_scanner::report::{
    CompletionNote, FailureKind, ReportSink, ScanFailure, ScanId, ScanReport, ScanStatus,
};
use linkrot_scanner::result::{LinkCheckResult, LinkNode, ScannedLink};
use linkrot_scanner::ScanError;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Row, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct Database {
    conn: Connection,
}

/// One row of the `scans` table, without its links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub id: ScanId,
    pub seed_url: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_links: usize,
    pub total_checked: usize,
    pub total_broken: usize,
    pub failure: Option<ScanFailure>,
    pub note: Option<CompletionNote>,
}

const SCAN_COLUMNS: &str = "s.id, s.seed_url, s.status, s.started_at, s.completed_at,
     s.total_checked, s.total_broken, s.failure_kind, s.failure_message, s.note,
     (SELECT COUNT(*) FROM links l WHERE l.scan_id = s.id)";

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)?;
        // WAL sidecars only linger after an unclean shutdown
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = Path::new(&sidecar);
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
        }
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Workers append concurrently with readers polling reports
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;  -- 16MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scans (
                id TEXT PRIMARY KEY,
                seed_url TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                total_checked INTEGER NOT NULL DEFAULT 0,
                total_broken INTEGER NOT NULL DEFAULT 0,
                failure_kind TEXT,
                failure_message TEXT,
                note TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_scans_started ON scans(started_at);

            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id TEXT NOT NULL,
                url TEXT NOT NULL,
                parent_url TEXT,
                depth INTEGER NOT NULL DEFAULT 0,
                scope TEXT NOT NULL CHECK(scope IN ('internal', 'external')),
                discovered_at INTEGER NOT NULL,

                final_url TEXT,
                status_code INTEGER,
                is_broken BOOLEAN NOT NULL DEFAULT 0,
                error TEXT,
                checked BOOLEAN NOT NULL DEFAULT 1,
                checked_at INTEGER NOT NULL,

                FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE,
                UNIQUE(scan_id, url)
            );

            CREATE INDEX IF NOT EXISTS idx_links_scan ON links(scan_id);
            CREATE INDEX IF NOT EXISTS idx_links_broken ON links(scan_id, is_broken);
            ",
        )?;
        Ok(())
    }

    // Scan management
    pub fn create_scan(&self, report: &ScanReport) -> Result<()> {
        self.conn.execute(
            "INSERT INTO scans (id, seed_url, status, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                report.id.to_string(),
                &report.seed_url,
                report.status.as_str(),
                report.started_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    pub fn finish_scan(&self, report: &ScanReport) -> Result<()> {
        self.conn.execute(
            "UPDATE scans
             SET status = ?1, completed_at = ?2, total_checked = ?3, total_broken = ?4,
                 failure_kind = ?5, failure_message = ?6, note = ?7
             WHERE id = ?8",
            params![
                report.status.as_str(),
                report.completed_at.map(|t| t.timestamp_millis()),
                report.total_checked as i64,
                report.total_broken as i64,
                report.failure.as_ref().map(|f| f.kind.as_str()),
                report.failure.as_ref().map(|f| f.message.as_str()),
                report.note.map(|n| n.as_str()),
                report.id.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn delete_scan(&self, id: ScanId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM scans WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    // Link management
    pub fn insert_link(&self, scan_id: ScanId, link: &ScannedLink) -> Result<i64> {
        let node = &link.node;
        let result = &link.result;
        self.conn.execute(
            "INSERT INTO links (scan_id, url, parent_url, depth, scope, discovered_at,
                                final_url, status_code, is_broken, error, checked, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                scan_id.to_string(),
                &node.url,
                &node.parent_url,
                node.depth,
                node.scope.as_str(),
                node.discovered_at.timestamp_millis(),
                &result.final_url,
                result.status_code,
                result.is_broken,
                result.error.map(|e| e.as_str()),
                result.checked,
                result.checked_at.timestamp_millis()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_links(&self, scan_id: ScanId) -> Result<Vec<ScannedLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, parent_url, depth, scope, discovered_at,
                    final_url, status_code, is_broken, error, checked, checked_at
             FROM links WHERE scan_id = ?1 ORDER BY id",
        )?;

        let links = stmt
            .query_map(params![scan_id.to_string()], link_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(links)
    }

    pub fn get_broken_links(&self, scan_id: ScanId) -> Result<Vec<ScannedLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, parent_url, depth, scope, discovered_at,
                    final_url, status_code, is_broken, error, checked, checked_at
             FROM links WHERE scan_id = ?1 AND is_broken = 1 ORDER BY id",
        )?;

        let links = stmt
            .query_map(params![scan_id.to_string()], link_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(links)
    }

    // Reads
    pub fn get_scan(&self, id: ScanId) -> Result<Option<ScanSummary>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM scans s WHERE s.id = ?1", SCAN_COLUMNS),
                params![id.to_string()],
                summary_from_row,
            )
            .optional()
    }

    /// Most recent scans first.
    pub fn list_scans(&self, limit: usize) -> Result<Vec<ScanSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM scans s ORDER BY s.started_at DESC, s.rowid DESC LIMIT ?1",
            SCAN_COLUMNS
        ))?;

        let scans = stmt
            .query_map(params![limit as i64], summary_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(scans)
    }

    /// Rebuild a full report from storage.
    pub fn load_report(&self, id: ScanId) -> Result<Option<ScanReport>> {
        let Some(summary) = self.get_scan(id)? else {
            return Ok(None);
        };
        let nodes = self.get_links(id)?;

        Ok(Some(ScanReport {
            id: summary.id,
            seed_url: summary.seed_url,
            status: summary.status,
            nodes,
            total_checked: summary.total_checked,
            total_broken: summary.total_broken,
            started_at: summary.started_at,
            completed_at: summary.completed_at,
            failure: summary.failure,
            note: summary.note,
        }))
    }
}

fn summary_from_row(row: &Row<'_>) -> Result<ScanSummary> {
    let failure_kind: Option<String> = row.get(7)?;
    let failure = match failure_kind {
        Some(kind) => Some(ScanFailure {
            kind: parse_text(7, &kind, FailureKind::from_str)?,
            message: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        }),
        None => None,
    };

    let note: Option<String> = row.get(9)?;
    let status: String = row.get(2)?;
    let id: String = row.get(0)?;

    Ok(ScanSummary {
        id: parse_text(0, &id, ScanId::parse)?,
        seed_url: row.get(1)?,
        status: parse_text(2, &status, ScanStatus::from_str)?,
        started_at: timestamp(3, row.get(3)?)?,
        completed_at: row
            .get::<_, Option<i64>>(4)?
            .map(|ms| timestamp(4, ms))
            .transpose()?,
        total_checked: row.get::<_, i64>(5)? as usize,
        total_broken: row.get::<_, i64>(6)? as usize,
        failure,
        note: note
            .map(|n| parse_text(9, &n, CompletionNote::from_str))
            .transpose()?,
        total_links: row.get::<_, i64>(10)? as usize,
    })
}

fn link_from_row(row: &Row<'_>) -> Result<ScannedLink> {
    let url: String = row.get(0)?;
    let scope: String = row.get(3)?;
    let error: Option<String> = row.get(8)?;

    let node = LinkNode {
        url: url.clone(),
        parent_url: row.get(1)?,
        depth: row.get(2)?,
        scope: parse_text(3, &scope, LinkScope::from_str)?,
        discovered_at: timestamp(4, row.get(4)?)?,
    };

    let result = LinkCheckResult {
        link_url: url,
        final_url: row.get(5)?,
        status_code: row.get(6)?,
        is_broken: row.get(7)?,
        error: error
            .map(|e| parse_text(8, &e, FailureCause::from_str))
            .transpose()?,
        checked: row.get(9)?,
        checked_at: timestamp(10, row.get(10)?)?,
    };

    Ok(ScannedLink { node, result })
}

fn parse_text<T>(column: usize, value: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Text,
            format!("unrecognized value '{}'", value).into(),
        )
    })
}

fn timestamp(column: usize, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Integer,
            format!("timestamp out of range: {}", millis).into(),
        )
    })
}

/// Persists scan reports as they are built.
pub struct SqliteSink {
    db: Mutex<Database>,
}

impl SqliteSink {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn load_report(&self, id: ScanId) -> Result<Option<ScanReport>> {
        self.lock().load_report(id)
    }

    pub fn list_scans(&self, limit: usize) -> Result<Vec<ScanSummary>> {
        self.lock().list_scans(limit)
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn storage_error(e: rusqlite::Error) -> ScanError {
    ScanError::Storage(e.to_string())
}

impl ReportSink for SqliteSink {
    fn begin(&self, report: &ScanReport) -> linkrot_scanner::error::Result<()> {
        self.lock().create_scan(report).map_err(storage_error)
    }

    fn append(&self, scan_id: ScanId, link: &ScannedLink) -> linkrot_scanner::error::Result<()> {
        self.lock()
            .insert_link(scan_id, link)
            .map(|_| ())
            .map_err(storage_error)
    }

    fn finalize(&self, report: &ScanReport) -> linkrot_scanner::error::Result<()> {
        self.lock().finish_scan(report).map_err(storage_error)
    }
}
