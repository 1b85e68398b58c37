use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::domain::{JoinedRecord, Uid};
use crate::error::EtlError;
use crate::pipeline::{LoadReport, RecordSink};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub uid: String,
    pub metadata: Value,
    pub fasta: Option<String>,
}

pub struct RelationalLoader {
    conn: Connection,
    table: String,
}

impl RelationalLoader {
    pub fn open(path: &Utf8Path, table: &str) -> Result<Self, EtlError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| EtlError::Filesystem(format!("create {parent}: {err}")))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        Ok(Self::with_connection(conn, table))
    }

    pub fn in_memory(table: &str) -> Result<Self, EtlError> {
        Ok(Self::with_connection(Connection::open_in_memory()?, table))
    }

    pub fn with_connection(conn: Connection, table: &str) -> Self {
        Self {
            conn,
            table: table.to_string(),
        }
    }

    pub fn ensure_table(&self) -> Result<(), EtlError> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
               uid TEXT PRIMARY KEY,
               metadata TEXT NOT NULL,
               fasta TEXT
             );",
            self.table
        ))?;
        Ok(())
    }

    pub fn upsert(&self, records: &[JoinedRecord]) -> Result<usize, EtlError> {
        self.ensure_table()?;
        let mut stmt = self.conn.prepare(&format!(
            "REPLACE INTO {} (uid, metadata, fasta) VALUES (?1, ?2, ?3)",
            self.table
        ))?;
        for record in records {
            let metadata = serde_json::to_string(&record.metadata.document)
                .map_err(|err| EtlError::Relational(err.to_string()))?;
            stmt.execute(params![record.uid.as_str(), metadata, record.sequence])
                .map_err(|err| {
                    EtlError::Relational(format!("upsert of uid {} failed: {err}", record.uid))
                })?;
        }
        Ok(records.len())
    }

    pub fn count(&self) -> Result<usize, EtlError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn get(&self, uid: &Uid) -> Result<Option<StoredRow>, EtlError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT uid, metadata, fasta FROM {} WHERE uid = ?1", self.table),
                params![uid.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(uid, metadata, fasta)| {
            let metadata = serde_json::from_str(&metadata)
                .map_err(|err| EtlError::Relational(format!("stored metadata for {uid}: {err}")))?;
            Ok(StoredRow {
                uid,
                metadata,
                fasta,
            })
        })
        .transpose()
    }
}

impl RecordSink for RelationalLoader {
    fn name(&self) -> &str {
        "relational"
    }

    fn load(&self, records: &[JoinedRecord]) -> Result<LoadReport, EtlError> {
        tracing::info!("loading {} records into table {}", records.len(), self.table);
        let written = self.upsert(records)?;
        Ok(LoadReport { written, errors: 0 })
    }
}
