use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::debug;

use crate::error::NcfpError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS seqdata (
    accession TEXT PRIMARY KEY NOT NULL,
    aa_query TEXT,
    nt_query TEXT
);
CREATE TABLE IF NOT EXISTS seq_xref (
    accession TEXT NOT NULL,
    aa_query TEXT NOT NULL,
    PRIMARY KEY (accession, aa_query)
);
CREATE TABLE IF NOT EXISTS nt_uid_acc (
    uid TEXT PRIMARY KEY NOT NULL,
    accession TEXT
);
CREATE TABLE IF NOT EXISTS seq_nt (
    accession TEXT NOT NULL,
    uid TEXT NOT NULL,
    PRIMARY KEY (accession, uid)
);
CREATE TABLE IF NOT EXISTS gb_headers (
    accession TEXT PRIMARY KEY NOT NULL,
    length INTEGER NOT NULL,
    organism TEXT,
    taxonomy TEXT,
    date TEXT
);
CREATE TABLE IF NOT EXISTS gb_full (
    accession TEXT PRIMARY KEY NOT NULL,
    record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nt_uid_acc_accession ON nt_uid_acc (accession);
CREATE INDEX IF NOT EXISTS idx_seq_nt_uid ON seq_nt (uid);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Accession,
    Header,
    FullRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Sequences,
    CrossReferences,
    Candidates,
    Links,
    Headers,
    FullRecords,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Sequences => "seqdata",
            Table::CrossReferences => "seq_xref",
            Table::Candidates => "nt_uid_acc",
            Table::Links => "seq_nt",
            Table::Headers => "gb_headers",
            Table::FullRecords => "gb_full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedQuery {
    pub accession: String,
    pub aa_query: Option<String>,
    pub nt_query: Option<String>,
}

impl CachedQuery {
    pub fn has_query(&self) -> bool {
        self.aa_query.is_some() || self.nt_query.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub accession: String,
    pub length: u64,
    pub organism: Option<String>,
    pub taxonomy: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullRecord {
    pub accession: String,
    pub record: String,
}

/// Resumable per-run download cache backed by one SQLite file.
///
/// Primary keys are the only consistency mechanism: repeated inserts of a
/// sequence, candidate uid, link, header or full record are absorbed and the
/// existing row wins.
#[derive(Debug)]
pub struct Cache {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Cache {
    /// Create an empty cache at `path`, destroying any previous contents.
    pub fn initialize(path: &Path) -> Result<Self, NcfpError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                NcfpError::Storage(format!("create {}: {err}", parent.display()))
            })?;
        }
        if path.exists() {
            fs::remove_file(path).map_err(|err| {
                NcfpError::Storage(format!("remove {}: {err}", path.display()))
            })?;
        }
        Self::open(path)
    }

    /// Open the cache at `path`, keeping whatever it already holds.
    pub fn open(path: &Path) -> Result<Self, NcfpError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                NcfpError::Storage(format!("create {}: {err}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|err| NcfpError::Storage(format!("open {}: {err}", path.display())))?;
        let cache = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        cache.create_schema()?;
        Ok(cache)
    }

    pub fn in_memory() -> Result<Self, NcfpError> {
        let conn = Connection::open_in_memory()?;
        let cache = Self { conn, path: None };
        cache.create_schema()?;
        Ok(cache)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn create_schema(&self) -> Result<(), NcfpError> {
        // WAL is unavailable for in-memory databases; ignore the refusal.
        let _ = self.conn.execute_batch("PRAGMA journal_mode = WAL;");
        self.conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub fn upsert_sequence(
        &self,
        accession: &str,
        aa_query: Option<&str>,
        nt_query: Option<&str>,
    ) -> Result<(), NcfpError> {
        let result = self.conn.execute(
            "INSERT INTO seqdata (accession, aa_query, nt_query) VALUES (?1, ?2, ?3)",
            params![accession, aa_query, nt_query],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(NcfpError::AlreadyExists(accession.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_sequence(&self, accession: &str) -> Result<Option<CachedQuery>, NcfpError> {
        let row = self
            .conn
            .query_row(
                "SELECT accession, aa_query, nt_query FROM seqdata WHERE accession = ?1",
                params![accession],
                |row| {
                    Ok(CachedQuery {
                        accession: row.get(0)?,
                        aa_query: row.get(1)?,
                        nt_query: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn has_query(&self, accession: &str) -> Result<bool, NcfpError> {
        Ok(self
            .get_sequence(accession)?
            .map(|row| row.has_query())
            .unwrap_or(false))
    }

    pub fn get_nt_query(&self, accession: &str) -> Result<Option<String>, NcfpError> {
        Ok(self.get_sequence(accession)?.and_then(|row| row.nt_query))
    }

    pub fn get_aa_query(&self, accession: &str) -> Result<Option<String>, NcfpError> {
        Ok(self.get_sequence(accession)?.and_then(|row| row.aa_query))
    }

    pub fn add_xref_queries(&self, accession: &str, terms: &[String]) -> Result<usize, NcfpError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut added = 0;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO seq_xref (accession, aa_query) VALUES (?1, ?2)")?;
            for term in terms {
                added += stmt.execute(params![accession, term])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    pub fn get_xref_queries(&self, accession: &str) -> Result<Vec<String>, NcfpError> {
        let mut stmt = self
            .conn
            .prepare("SELECT aa_query FROM seq_xref WHERE accession = ?1 ORDER BY aa_query")?;
        let rows = stmt.query_map(params![accession], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Register `uids` as nucleotide candidates for `accession`.
    ///
    /// Returns the uids that were new to the cache; uids already known from
    /// another sequence are shared and only gain a link row.
    pub fn add_candidates(
        &self,
        accession: &str,
        uids: &[String],
    ) -> Result<BTreeSet<String>, NcfpError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut added = BTreeSet::new();
        {
            let mut insert_uid = tx.prepare("INSERT OR IGNORE INTO nt_uid_acc (uid) VALUES (?1)")?;
            let mut insert_link =
                tx.prepare("INSERT OR IGNORE INTO seq_nt (accession, uid) VALUES (?1, ?2)")?;
            for uid in uids {
                if insert_uid.execute(params![uid])? > 0 {
                    added.insert(uid.clone());
                }
                insert_link.execute(params![accession, uid])?;
            }
        }
        tx.commit()?;
        debug!(accession, added = added.len(), linked = uids.len(), "candidates");
        Ok(added)
    }

    pub fn list_uids_missing(&self, field: MissingField) -> Result<Vec<String>, NcfpError> {
        // Headers and full records are keyed by GenBank accession, so a uid
        // only becomes eligible for them once stage two has resolved it.
        let sql = match field {
            MissingField::Accession => {
                "SELECT uid FROM nt_uid_acc WHERE accession IS NULL ORDER BY uid"
            }
            MissingField::Header => {
                "SELECT uid FROM nt_uid_acc WHERE accession IS NOT NULL
                 AND accession NOT IN (SELECT accession FROM gb_headers) ORDER BY uid"
            }
            MissingField::FullRecord => {
                "SELECT uid FROM nt_uid_acc WHERE accession IS NOT NULL
                 AND accession NOT IN (SELECT accession FROM gb_full) ORDER BY uid"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Sequences holding a query term but no linked candidate yet.
    pub fn sequences_without_candidates(&self) -> Result<Vec<CachedQuery>, NcfpError> {
        let mut stmt = self.conn.prepare(
            "SELECT accession, aa_query, nt_query FROM seqdata
             WHERE (aa_query IS NOT NULL OR nt_query IS NOT NULL)
             AND accession NOT IN (SELECT accession FROM seq_nt)
             ORDER BY accession",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CachedQuery {
                accession: row.get(0)?,
                aa_query: row.get(1)?,
                nt_query: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn linked_uids(&self, accession: &str) -> Result<Vec<String>, NcfpError> {
        let mut stmt = self
            .conn
            .prepare("SELECT uid FROM seq_nt WHERE accession = ?1 ORDER BY uid")?;
        let rows = stmt.query_map(params![accession], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_candidate_accession(&self, uid: &str) -> Result<Option<String>, NcfpError> {
        let value = self
            .conn
            .query_row(
                "SELECT accession FROM nt_uid_acc WHERE uid = ?1",
                params![uid],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn update_candidate_accession(&self, uid: &str, accession: &str) -> Result<(), NcfpError> {
        self.conn.execute(
            "UPDATE nt_uid_acc SET accession = ?2 WHERE uid = ?1",
            params![uid, accession],
        )?;
        Ok(())
    }

    pub fn add_header(&self, header: &HeaderRecord) -> Result<bool, NcfpError> {
        let length = i64::try_from(header.length)
            .map_err(|_| NcfpError::Storage(format!("length overflow for {}", header.accession)))?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO gb_headers (accession, length, organism, taxonomy, date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                header.accession,
                length,
                header.organism,
                header.taxonomy,
                header.date
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_header(&self, accession: &str) -> Result<Option<HeaderRecord>, NcfpError> {
        let row = self
            .conn
            .query_row(
                "SELECT accession, length, organism, taxonomy, date FROM gb_headers
                 WHERE accession = ?1",
                params![accession],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(
            |(accession, length, organism, taxonomy, date)| HeaderRecord {
                accession,
                length: u64::try_from(length).unwrap_or(0),
                organism,
                taxonomy,
                date,
            },
        ))
    }

    pub fn add_full_record(&self, accession: &str, record: &str) -> Result<bool, NcfpError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO gb_full (accession, record) VALUES (?1, ?2)",
            params![accession, record],
        )?;
        Ok(changed > 0)
    }

    pub fn full_record_accessions(&self) -> Result<BTreeSet<String>, NcfpError> {
        let mut stmt = self.conn.prepare("SELECT accession FROM gb_full")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
    }

    /// For every sequence with at least one cached header, the linked
    /// nucleotide accession with the smallest length.
    ///
    /// Ties on length resolve to the lexicographically smallest accession.
    pub fn shortest_covering_accessions(&self) -> Result<BTreeSet<String>, NcfpError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.accession, h.accession FROM seq_nt s
             JOIN nt_uid_acc n ON s.uid = n.uid
             JOIN gb_headers h ON n.accession = h.accession
             ORDER BY s.accession, h.length, h.accession",
        )?;
        let mut rows = stmt.query([])?;
        let mut selected = BTreeSet::new();
        let mut current: Option<String> = None;
        while let Some(row) = rows.next()? {
            let sequence: String = row.get(0)?;
            if current.as_deref() == Some(sequence.as_str()) {
                continue;
            }
            selected.insert(row.get::<_, String>(1)?);
            current = Some(sequence);
        }
        Ok(selected)
    }

    /// The single full record reachable from an input sequence, if any.
    pub fn find_full_record_for_sequence(
        &self,
        accession: &str,
    ) -> Result<Option<FullRecord>, NcfpError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT f.accession, f.record FROM seqdata q
             JOIN seq_nt s ON q.accession = s.accession
             JOIN nt_uid_acc n ON s.uid = n.uid
             JOIN gb_full f ON n.accession = f.accession
             WHERE q.accession = ?1
             ORDER BY f.accession",
        )?;
        let rows = stmt.query_map(params![accession], |row| {
            Ok(FullRecord {
                accession: row.get(0)?,
                record: row.get(1)?,
            })
        })?;
        let mut records = rows.collect::<Result<Vec<_>, _>>()?;
        match records.len() {
            0 => Ok(None),
            1 => Ok(records.pop()),
            _ => Err(NcfpError::MultipleRecords {
                accession: accession.to_string(),
                records: records.into_iter().map(|record| record.accession).collect(),
            }),
        }
    }

    pub fn count(&self, table: Table) -> Result<usize, NcfpError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
