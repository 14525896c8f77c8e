//! Attendance ledger: at most one event per student per calendar day.

use crate::store::{SqliteStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::StudentId;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::Serialize;

/// Outcome of a record attempt. A repeat on the same day is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded { date: NaiveDate, time: String },
    AlreadyRecordedToday { date: NaiveDate },
}

/// One attendance event joined with the student's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub student_id: StudentId,
    pub name: String,
    pub class_name: String,
    pub date: NaiveDate,
    pub time: String,
}

impl SqliteStore {
    /// Record attendance for `student_id` at `now`.
    ///
    /// The existence check and the insert run in one immediate transaction,
    /// and the `(student_id, date)` unique constraint makes the insert
    /// itself conflict-free: concurrent calls for the same pair produce
    /// exactly one `Recorded`, on any number of connections.
    pub fn record(
        &self,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, StoreError> {
        let day = self.day_boundary();
        let date = day.day(now);
        let time = day.time_of_day(now).format("%H:%M:%S").to_string();

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let known = tx
            .query_row("SELECT 1 FROM students WHERE id = ?1", [student_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !known {
            return Err(StoreError::UnknownStudent { student_id });
        }

        let inserted = tx.execute(
            "INSERT INTO attendance (student_id, date, time, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (student_id, date) DO NOTHING",
            params![student_id, date, time, now],
        )?;
        tx.commit()?;

        if inserted == 1 {
            tracing::info!(student_id, %date, %time, "attendance recorded");
            Ok(RecordOutcome::Recorded { date, time })
        } else {
            tracing::debug!(student_id, %date, "attendance already recorded today");
            Ok(RecordOutcome::AlreadyRecordedToday { date })
        }
    }

    /// Events on `date`, latest first.
    pub fn attendance_on(
        &self,
        date: NaiveDate,
        class_name: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.student_id, s.name, s.class_name, a.date, a.time
             FROM attendance a JOIN students s ON s.id = a.student_id
             WHERE a.date = ?1 AND (?2 IS NULL OR s.class_name = ?2)
             ORDER BY a.time DESC, a.student_id ASC",
        )?;
        let records = stmt
            .query_map(params![date, class_name], |row| {
                Ok(AttendanceRecord {
                    student_id: row.get(0)?,
                    name: row.get(1)?,
                    class_name: row.get(2)?,
                    date: row.get(3)?,
                    time: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Number of events per day, most recent day first.
    pub fn attendance_history(
        &self,
        class_name: Option<&str>,
    ) -> Result<Vec<(NaiveDate, u64)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.date, COUNT(*)
             FROM attendance a JOIN students s ON s.id = a.student_id
             WHERE ?1 IS NULL OR s.class_name = ?1
             GROUP BY a.date
             ORDER BY a.date DESC",
        )?;
        let history = stmt
            .query_map([class_name], |row| {
                Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }
}
