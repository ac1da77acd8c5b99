//! SQLite tables of the local index.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use super::LocalIndexError;
use crate::record::Record;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_RETRIES: u32 = 6;
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS record_index (
    id TEXT PRIMARY KEY,
    colrev_id TEXT NOT NULL,
    colrev_ids TEXT NOT NULL,
    doi TEXT,
    dblp_key TEXT,
    colrev_pdf_id TEXT,
    url TEXT,
    title TEXT,
    curated_source TEXT,
    metadata_source_repository_paths TEXT NOT NULL,
    record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS record_index_doi ON record_index(doi);
CREATE INDEX IF NOT EXISTS record_index_dblp_key ON record_index(dblp_key);
CREATE INDEX IF NOT EXISTS record_index_colrev_pdf_id ON record_index(colrev_pdf_id);
CREATE INDEX IF NOT EXISTS record_index_url ON record_index(url);
CREATE TABLE IF NOT EXISTS toc_index (
    toc_key TEXT PRIMARY KEY,
    colrev_ids TEXT NOT NULL
);
";

/// Identifiers that locate a record across projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKey {
    Doi,
    DblpKey,
    ColrevPdfId,
    Url,
}

impl GlobalKey {
    pub const ALL: [GlobalKey; 4] = [
        GlobalKey::Doi,
        GlobalKey::DblpKey,
        GlobalKey::ColrevPdfId,
        GlobalKey::Url,
    ];

    /// Column name, equal to the record field name.
    pub fn column(&self) -> &'static str {
        match self {
            GlobalKey::Doi => "doi",
            GlobalKey::DblpKey => "dblp_key",
            GlobalKey::ColrevPdfId => "colrev_pdf_id",
            GlobalKey::Url => "url",
        }
    }
}

/// One row of `record_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub id: String,
    pub colrev_id: String,
    pub colrev_ids: Vec<String>,
    pub curated_source: Option<String>,
    pub repo_paths: Vec<String>,
    pub record: Record,
}

impl IndexRow {
    fn global_value(&self, key: GlobalKey) -> Option<&str> {
        self.record.get(key.column())
    }
}

fn split_lines(value: &str) -> Vec<String> {
    value
        .lines()
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>, String, String)> {
    Ok((
        row.get("id")?,
        row.get("colrev_id")?,
        row.get("colrev_ids")?,
        row.get("curated_source")?,
        row.get("metadata_source_repository_paths")?,
        row.get("record")?,
    ))
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

pub struct IndexStore {
    conn: Mutex<Connection>,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self, LocalIndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, LocalIndexError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LocalIndexError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f`, retrying with exponential backoff while the database is busy.
    fn with_retry<T>(
        &self,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, LocalIndexError> {
        let conn = self.conn.lock().map_err(|_| LocalIndexError::Poisoned)?;
        let mut delay = BUSY_BACKOFF;
        let mut attempt = 0;
        loop {
            match f(&conn) {
                Err(e) if is_busy(&e) && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    debug!("local index busy, retry {attempt} in {delay:?}");
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                result => return result.map_err(LocalIndexError::from),
            }
        }
    }

    fn decode(
        (id, colrev_id, colrev_ids, curated_source, repo_paths, record): (
            String,
            String,
            String,
            Option<String>,
            String,
            String,
        ),
    ) -> Result<IndexRow, LocalIndexError> {
        Ok(IndexRow {
            id,
            colrev_id,
            colrev_ids: split_lines(&colrev_ids),
            curated_source,
            repo_paths: split_lines(&repo_paths),
            record: serde_json::from_str(&record)?,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<IndexRow>, LocalIndexError> {
        let raw = self.with_retry(|conn| {
            conn.query_row(
                "SELECT * FROM record_index WHERE id = ?1",
                params![id],
                read_row,
            )
            .optional()
        })?;
        raw.map(Self::decode).transpose()
    }

    /// First row whose global identifier equals `value` (re-verified on the stored record).
    pub fn find_by(&self, key: GlobalKey, value: &str) -> Result<Option<IndexRow>, LocalIndexError> {
        let sql = format!("SELECT * FROM record_index WHERE {} = ?1", key.column());
        let raws = self.with_retry(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![value], read_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        for raw in raws {
            let row = Self::decode(raw)?;
            if row.global_value(key) == Some(value) {
                return Ok(Some(row));
            }
            warn!("local index row {} does not match its {} column", row.id, key.column());
        }
        Ok(None)
    }

    /// Rows whose title contains `query`, case-insensitively.
    pub fn search_title(&self, query: &str, limit: usize) -> Result<Vec<IndexRow>, LocalIndexError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let raws = self.with_retry(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM record_index WHERE lower(title) LIKE ?1 ORDER BY title LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, limit as i64], read_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raws.into_iter().map(Self::decode).collect()
    }

    pub fn put(&self, row: &IndexRow) -> Result<(), LocalIndexError> {
        let record = serde_json::to_string(&row.record)?;
        let colrev_ids = row.colrev_ids.join("\n");
        let repo_paths = row.repo_paths.join("\n");
        let global = |key: GlobalKey| row.global_value(key).map(String::from);
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO record_index
                 (id, colrev_id, colrev_ids, doi, dblp_key, colrev_pdf_id, url, title,
                  curated_source, metadata_source_repository_paths, record)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    row.id,
                    row.colrev_id,
                    colrev_ids,
                    global(GlobalKey::Doi),
                    global(GlobalKey::DblpKey),
                    global(GlobalKey::ColrevPdfId),
                    global(GlobalKey::Url),
                    row.record.get("title"),
                    row.curated_source,
                    repo_paths,
                    record,
                ],
            )
        })?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize, LocalIndexError> {
        let n: i64 = self.with_retry(|conn| {
            conn.query_row("SELECT COUNT(*) FROM record_index", [], |r| r.get(0))
        })?;
        Ok(n as usize)
    }

    pub fn toc_get(&self, toc_key: &str) -> Result<Option<Vec<String>>, LocalIndexError> {
        let raw: Option<String> = self.with_retry(|conn| {
            conn.query_row(
                "SELECT colrev_ids FROM toc_index WHERE toc_key = ?1",
                params![toc_key],
                |r| r.get(0),
            )
            .optional()
        })?;
        Ok(raw.map(|ids| split_lines(&ids)))
    }

    pub fn toc_exists(&self, toc_key: &str) -> Result<bool, LocalIndexError> {
        Ok(self.toc_get(toc_key)?.is_some())
    }

    /// Adds colrev_ids to a TOC entry; ids already listed keep their position.
    pub fn toc_add(&self, toc_key: &str, colrev_ids: &[String]) -> Result<(), LocalIndexError> {
        let mut ids = self.toc_get(toc_key)?.unwrap_or_default();
        for cid in colrev_ids {
            if !ids.contains(cid) {
                ids.push(cid.clone());
            }
        }
        let joined = ids.join("\n");
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO toc_index (toc_key, colrev_ids) VALUES (?1, ?2)",
                params![toc_key, joined],
            )
        })?;
        Ok(())
    }

    pub fn reinitialize(&self) -> Result<(), LocalIndexError> {
        self.with_retry(|conn| {
            conn.execute_batch("DROP TABLE IF EXISTS record_index; DROP TABLE IF EXISTS toc_index;")?;
            conn.execute_batch(SCHEMA)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, doi: &str) -> IndexRow {
        IndexRow {
            id: id.to_string(),
            colrev_id: format!("colrev_id1:|a|{id}"),
            colrev_ids: vec![format!("colrev_id1:|a|{id}")],
            curated_source: None,
            repo_paths: vec!["/repos/a".to_string()],
            record: Record::new(id, "article")
                .with("doi", doi)
                .with("title", "Digital Platforms"),
        }
    }

    #[test]
    fn put_get_and_global_lookup() {
        let store = IndexStore::in_memory().unwrap();
        store.put(&row("h1", "10.1/a")).unwrap();
        assert_eq!(store.get("h1").unwrap(), Some(row("h1", "10.1/a")));
        assert!(store.get("h2").unwrap().is_none());
        assert_eq!(
            store.find_by(GlobalKey::Doi, "10.1/a").unwrap().map(|r| r.id),
            Some("h1".to_string())
        );
        assert_eq!(store.search_title("platforms", 10).unwrap().len(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn toc_entries_accumulate() {
        let store = IndexStore::in_memory().unwrap();
        store.toc_add("mis quarterly|45|1", &["a".into()]).unwrap();
        store.toc_add("mis quarterly|45|1", &["b".into(), "a".into()]).unwrap();
        assert_eq!(
            store.toc_get("mis quarterly|45|1").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        store.reinitialize().unwrap();
        assert!(!store.toc_exists("mis quarterly|45|1").unwrap());
    }
}
