//! SQLite-backed student catalog and attendance log.

use crate::student::{AttendanceRecord, Gender, NewStudent, Student};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{
    AttendanceEvent, AttendanceStore, CatalogEntry, Embedding, Identity, StoreError,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;

/// Identity value that always resolves to the "Unknown" display name.
pub const UNKNOWN_SENTINEL: i64 = -1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    usn INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    course TEXT NOT NULL,
    year_join INTEGER NOT NULL,
    section TEXT NOT NULL CHECK (length(section) = 1),
    gender TEXT NOT NULL CHECK (gender IN ('Male', 'Female', 'Others')),
    attendance INTEGER NOT NULL DEFAULT 0,
    face_image BLOB NOT NULL UNIQUE,
    face_embedding TEXT NOT NULL,
    last_attendance_time TEXT
);
CREATE TABLE IF NOT EXISTS attendance_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    usn INTEGER NOT NULL REFERENCES students(usn),
    recorded_at TEXT NOT NULL,
    day TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance_events(day);
";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("embedding encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("student {0} already exists")]
    AlreadyExists(Identity),
    #[error("student {0} not found")]
    NotFound(Identity),
    #[error("invalid student: {0}")]
    InvalidStudent(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(id) => StoreError::NotFound(id),
            DbError::Json(_) | DbError::Corrupt(_) => StoreError::Corrupt(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        let store = Self::init(conn)?;
        tracing::debug!(path = %path.as_ref().display(), "store opened");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn create_student(&self, student: &NewStudent) -> Result<(), DbError> {
        if student.usn.0 == UNKNOWN_SENTINEL {
            return Err(DbError::InvalidStudent(format!(
                "USN {UNKNOWN_SENTINEL} is reserved for unknown faces"
            )));
        }
        if student.name.trim().is_empty() {
            return Err(DbError::InvalidStudent("name is empty".into()));
        }
        if student.face_image.is_empty() {
            return Err(DbError::InvalidStudent("face image is empty".into()));
        }
        if student.embedding.dim() == 0 || !student.embedding.is_finite() {
            return Err(DbError::InvalidStudent(
                "embedding must be a non-empty vector of finite numbers".into(),
            ));
        }
        if self.student(student.usn)?.is_some() {
            return Err(DbError::AlreadyExists(student.usn));
        }

        let embedding_json = serde_json::to_string(&student.embedding)?;
        self.conn.execute(
            "INSERT INTO students
             (usn, name, course, year_join, section, gender, face_image, face_embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                student.usn.0,
                student.name,
                student.course,
                student.year_join,
                student.section.to_string(),
                student.gender.as_str(),
                student.face_image,
                embedding_json,
            ],
        )?;

        tracing::info!(usn = %student.usn, name = %student.name, "student enrolled");
        Ok(())
    }

    pub fn student(&self, usn: Identity) -> Result<Option<Student>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT usn, name, course, year_join, section, gender, attendance,
                        last_attendance_time
                 FROM students WHERE usn = ?1",
                params![usn.0],
                RawStudent::from_row,
            )
            .optional()?;
        row.map(RawStudent::into_student).transpose()
    }

    pub fn list_students(&self) -> Result<Vec<Student>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT usn, name, course, year_join, section, gender, attendance,
                    last_attendance_time
             FROM students ORDER BY usn",
        )?;
        let rows = stmt.query_map([], RawStudent::from_row)?;
        rows.map(|r| r.map_err(DbError::from).and_then(RawStudent::into_student))
            .collect()
    }

    pub fn face_image(&self, usn: Identity) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT face_image FROM students WHERE usn = ?1",
                params![usn.0],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// All enrolled embeddings in USN order.
    pub fn catalog_entries(&self) -> Result<Vec<CatalogEntry>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT usn, face_embedding FROM students ORDER BY usn")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut entries = Vec::new();
        for row in rows {
            let (usn, json) = row?;
            let embedding: Embedding = serde_json::from_str(&json).map_err(|e| {
                DbError::Corrupt(format!("embedding for student {usn}: {e}"))
            })?;
            entries.push(CatalogEntry {
                identity: Identity(usn),
                embedding,
            });
        }
        Ok(entries)
    }

    /// Append an event and bump the student's counter in one transaction.
    pub fn insert_attendance(&self, event: &AttendanceEvent) -> Result<(), DbError> {
        let recorded_at = event.at.with_timezone(&Utc).to_rfc3339();
        let day = event.at.date_naive().to_string();

        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE students
             SET attendance = attendance + 1, last_attendance_time = ?1
             WHERE usn = ?2",
            params![recorded_at, event.identity.0],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(event.identity));
        }
        tx.execute(
            "INSERT INTO attendance_events (usn, recorded_at, day) VALUES (?1, ?2, ?3)",
            params![event.identity.0, recorded_at, day],
        )?;
        tx.commit()?;

        tracing::info!(usn = %event.identity, %day, "attendance recorded");
        Ok(())
    }

    pub fn name_of(&self, usn: Identity) -> Result<Option<String>, DbError> {
        if usn.0 == UNKNOWN_SENTINEL {
            return Ok(Some("Unknown".to_string()));
        }
        Ok(self
            .conn
            .query_row(
                "SELECT name FROM students WHERE usn = ?1",
                params![usn.0],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn attended_on(&self, date: NaiveDate) -> Result<Vec<Identity>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT usn FROM attendance_events WHERE day = ?1 ORDER BY usn",
        )?;
        let rows = stmt.query_map(params![date.to_string()], |row| row.get::<_, i64>(0))?;
        rows.map(|r| r.map(Identity).map_err(DbError::from)).collect()
    }

    pub fn events_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.usn, s.name, e.recorded_at
             FROM attendance_events e JOIN students s ON s.usn = e.usn
             WHERE e.day = ?1 ORDER BY e.id",
        )?;
        let rows = stmt.query_map(params![date.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (usn, name, recorded_at) = row?;
            records.push(AttendanceRecord {
                usn: Identity(usn),
                name,
                recorded_at: parse_timestamp(&recorded_at)?,
            });
        }
        Ok(records)
    }
}

impl AttendanceStore for Store {
    fn load_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.catalog_entries()?)
    }

    fn record_attendance(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        Ok(self.insert_attendance(event)?)
    }

    fn resolve_display_name(&self, identity: Identity) -> Result<Option<String>, StoreError> {
        Ok(self.name_of(identity)?)
    }

    fn admitted_on(&self, date: NaiveDate) -> Result<Vec<Identity>, StoreError> {
        Ok(self.attended_on(date)?)
    }
}

/// Column values as SQLite hands them back, before domain parsing.
struct RawStudent {
    usn: i64,
    name: String,
    course: String,
    year_join: i32,
    section: String,
    gender: String,
    attendance: u32,
    last_attendance_time: Option<String>,
}

impl RawStudent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            usn: row.get(0)?,
            name: row.get(1)?,
            course: row.get(2)?,
            year_join: row.get(3)?,
            section: row.get(4)?,
            gender: row.get(5)?,
            attendance: row.get(6)?,
            last_attendance_time: row.get(7)?,
        })
    }

    fn into_student(self) -> Result<Student, DbError> {
        let section = self
            .section
            .chars()
            .next()
            .ok_or_else(|| DbError::Corrupt(format!("student {} has no section", self.usn)))?;
        let gender: Gender = self.gender.parse().map_err(DbError::Corrupt)?;
        let last_attendance_time = self
            .last_attendance_time
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        Ok(Student {
            usn: Identity(self.usn),
            name: self.name,
            course: self.course,
            year_join: self.year_join,
            section,
            gender,
            attendance: self.attendance,
            last_attendance_time,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("timestamp {s:?}: {e}")))
}
