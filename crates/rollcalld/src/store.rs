//! `SQLite`-backed persistence.
//!
//! One database holds the student registry with its face descriptors, the
//! attendance ledger and the shared kiosk session row. [`SqliteStore`]
//! implements [`DescriptorStore`] for the matching cache; the ledger and
//! kiosk operations live in their own modules as further `impl` blocks.

use chrono::{DateTime, Utc};
use rollcall_core::{DayBoundary, DescriptorStore, Embedding, StoredDescriptor, StudentId};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("student not found: {student_id}")]
    UnknownStudent { student_id: StudentId },
}

/// A registered student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub class_name: String,
    /// Whether a face descriptor is stored.
    pub enrolled: bool,
    pub created_at: DateTime<Utc>,
}

/// Students, descriptors, attendance and kiosk state in one `SQLite` file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    day: DayBoundary,
}

impl SqliteStore {
    /// Opens or creates the database at `path`, applying the schema.
    ///
    /// Several stores (or processes) may open the same file; writers wait
    /// up to five seconds for each other.
    pub fn open(path: impl AsRef<Path>, day: DayBoundary) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(Self {
            conn: Mutex::new(conn),
            day,
        })
    }

    /// Creates an in-memory store for testing.
    pub fn in_memory(day: DayBoundary) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            day,
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calendar the ledger uses to assign events to days.
    pub fn day_boundary(&self) -> DayBoundary {
        self.day
    }

    pub fn add_student(
        &self,
        name: &str,
        class_name: &str,
        now: DateTime<Utc>,
    ) -> Result<StudentId, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO students (name, class_name, created_at) VALUES (?1, ?2, ?3)",
            params![name, class_name, now],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(student_id = id, class_name, "student added");
        Ok(id)
    }

    pub fn student(&self, student_id: StudentId) -> Result<Option<Student>, StoreError> {
        let conn = self.conn();
        let student = conn
            .query_row(
                "SELECT id, name, class_name, descriptor IS NOT NULL, created_at
                 FROM students WHERE id = ?1",
                [student_id],
                student_from_row,
            )
            .optional()?;
        Ok(student)
    }

    /// Students ordered by id, optionally restricted to one class.
    pub fn students(&self, class_name: Option<&str>) -> Result<Vec<Student>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, class_name, descriptor IS NOT NULL, created_at
             FROM students
             WHERE ?1 IS NULL OR class_name = ?1
             ORDER BY id ASC",
        )?;
        let students = stmt
            .query_map([class_name], student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(students)
    }

    /// Changes a student's display name. Returns `false` if no such student
    /// exists.
    pub fn rename_student(&self, student_id: StudentId, name: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let renamed = conn.execute(
            "UPDATE students SET name = ?1 WHERE id = ?2",
            params![name, student_id],
        )?;
        if renamed > 0 {
            tracing::info!(student_id, "student renamed");
        }
        Ok(renamed > 0)
    }

    /// Deletes a student and, by cascade, their attendance events.
    ///
    /// Returns `false` if no such student existed.
    pub fn remove_student(&self, student_id: StudentId) -> Result<bool, StoreError> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM students WHERE id = ?1", [student_id])?;
        if removed > 0 {
            tracing::info!(student_id, "student removed");
        }
        Ok(removed > 0)
    }
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        class_name: row.get(2)?,
        enrolled: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Descriptors are stored as little-endian `f32`s.
fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_embedding(bytes: &[u8]) -> StoredDescriptor<Embedding> {
    if bytes.is_empty() {
        return StoredDescriptor::Missing;
    }
    if bytes.len() % 4 != 0 {
        return StoredDescriptor::Corrupt(format!(
            "{} bytes is not a whole number of f32 values",
            bytes.len()
        ));
    }
    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    StoredDescriptor::Present(Embedding::new(values))
}

impl DescriptorStore<Embedding> for SqliteStore {
    type Error = StoreError;

    fn load_all(&self) -> Result<Vec<(StudentId, StoredDescriptor<Embedding>)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, descriptor FROM students
             WHERE descriptor IS NOT NULL
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let id: StudentId = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, decode_embedding(&bytes)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn save(&self, student_id: StudentId, descriptor: &Embedding) -> Result<(), StoreError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE students SET descriptor = ?1 WHERE id = ?2",
            params![encode_embedding(descriptor), student_id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownStudent { student_id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> SqliteStore {
        SqliteStore::in_memory(DayBoundary::utc()).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_add_and_list_students() {
        let store = store();
        let a = store.add_student("Ada", "7B", now()).unwrap();
        let b = store.add_student("Grace", "8A", now()).unwrap();
        let c = store.add_student("Alan", "7B", now()).unwrap();

        let all: Vec<_> = store.students(None).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(all, vec![a, b, c]);
        let seven_b: Vec<_> = store.students(Some("7B")).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(seven_b, vec![a, c]);

        let ada = store.student(a).unwrap().unwrap();
        assert_eq!(ada.name, "Ada");
        assert!(!ada.enrolled);
        assert_eq!(ada.created_at, now());
        assert!(store.student(999).unwrap().is_none());
    }

    #[test]
    fn test_descriptor_roundtrip_and_enrolled_flag() {
        let store = store();
        let id = store.add_student("Ada", "7B", now()).unwrap();
        store.add_student("Grace", "7B", now()).unwrap();

        let embedding = Embedding::new(vec![0.25, -1.5, 3.0]);
        store.save(id, &embedding).unwrap();

        let rows = store.load_all().unwrap();
        assert_eq!(rows, vec![(id, StoredDescriptor::Present(embedding))]);
        assert!(store.student(id).unwrap().unwrap().enrolled);
    }

    #[test]
    fn test_save_unknown_student() {
        let store = store();
        let err = store.save(42, &Embedding::new(vec![1.0])).unwrap_err();
        assert!(matches!(err, StoreError::UnknownStudent { student_id: 42 }));
    }

    #[test]
    fn test_corrupt_blob_is_reported_not_fatal() {
        let store = store();
        let id = store.add_student("Ada", "7B", now()).unwrap();
        store
            .conn()
            .execute("UPDATE students SET descriptor = ?1 WHERE id = ?2", params![vec![1u8, 2, 3], id])
            .unwrap();

        let rows = store.load_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0].1, StoredDescriptor::Corrupt(_)));
    }

    #[test]
    fn test_remove_student() {
        let store = store();
        let id = store.add_student("Ada", "7B", now()).unwrap();
        assert!(store.remove_student(id).unwrap());
        assert!(!store.remove_student(id).unwrap());
        assert!(store.students(None).unwrap().is_empty());
    }

    #[test]
    fn test_removed_id_is_never_reissued() {
        let store = store();
        store.add_student("Ada", "7B", now()).unwrap();
        let bob = store.add_student("Bob", "7B", now()).unwrap();
        assert!(store.remove_student(bob).unwrap());

        let carol = store.add_student("Carol", "7B", now()).unwrap();
        assert!(carol > bob);
    }

    #[test]
    fn test_rename_student() {
        let store = store();
        let id = store.add_student("Ada", "7B", now()).unwrap();
        store.save(id, &Embedding::new(vec![1.0, 2.0])).unwrap();

        assert!(store.rename_student(id, "Ada Lovelace").unwrap());
        let ada = store.student(id).unwrap().unwrap();
        assert_eq!(ada.name, "Ada Lovelace");
        assert_eq!(ada.class_name, "7B");
        assert!(ada.enrolled);

        assert!(!store.rename_student(999, "Nobody").unwrap());
    }
}
