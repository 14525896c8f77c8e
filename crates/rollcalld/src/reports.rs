//! Read-only attendance summaries.

use crate::store::{SqliteStore, StoreError};
use chrono::NaiveDate;
use rollcall_core::{DayBoundary, StudentId};
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentDays {
    pub student_id: StudentId,
    pub name: String,
    pub days: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub total_records: u64,
    pub unique_students: u64,
    /// Most frequent attendees first.
    pub per_student: Vec<StudentDays>,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    /// Events per day of the current week, days without events omitted.
    pub weekly: Vec<(NaiveDate, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowAttendance {
    pub student_id: StudentId,
    pub name: String,
    pub days: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowAttendanceReport {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub working_days: u32,
    pub students: Vec<LowAttendance>,
}

/// Days attended as a percentage of `working_days`, capped at 100 and
/// rounded to one decimal.
pub fn attendance_percentage(days: u64, working_days: u32) -> f64 {
    if working_days == 0 {
        return 100.0;
    }
    let pct = (days as f64 / f64::from(working_days) * 100.0).min(100.0);
    (pct * 10.0).round() / 10.0
}

impl SqliteStore {
    pub fn insights(&self, class_name: Option<&str>, today: NaiveDate) -> Result<Insights, StoreError> {
        let (week_start, week_end) = DayBoundary::week_of(today);
        let conn = self.conn();

        let (total_records, unique_students) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT a.student_id)
             FROM attendance a JOIN students s ON s.id = a.student_id
             WHERE ?1 IS NULL OR s.class_name = ?1",
            [class_name],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, COUNT(a.id)
             FROM students s JOIN attendance a ON a.student_id = s.id
             WHERE ?1 IS NULL OR s.class_name = ?1
             GROUP BY s.id, s.name
             ORDER BY COUNT(a.id) DESC, s.id ASC",
        )?;
        let per_student = stmt
            .query_map([class_name], |row| {
                Ok(StudentDays {
                    student_id: row.get(0)?,
                    name: row.get(1)?,
                    days: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT a.date, COUNT(*)
             FROM attendance a JOIN students s ON s.id = a.student_id
             WHERE (?1 IS NULL OR s.class_name = ?1) AND a.date BETWEEN ?2 AND ?3
             GROUP BY a.date
             ORDER BY a.date ASC",
        )?;
        let weekly = stmt
            .query_map(params![class_name, week_start, week_end], |row| {
                Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Insights {
            total_records,
            unique_students,
            per_student,
            week_start,
            week_end,
            weekly,
        })
    }

    /// Students attending less than `min_pct` of `working_days` in the week
    /// containing `today`. Students with no events at all are included.
    pub fn low_attendance(
        &self,
        class_name: Option<&str>,
        today: NaiveDate,
        working_days: u32,
        min_pct: f64,
    ) -> Result<LowAttendanceReport, StoreError> {
        let (week_start, week_end) = DayBoundary::week_of(today);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, COUNT(a.id)
             FROM students s
             LEFT JOIN attendance a
               ON a.student_id = s.id AND a.date BETWEEN ?2 AND ?3
             WHERE ?1 IS NULL OR s.class_name = ?1
             GROUP BY s.id, s.name
             ORDER BY s.id ASC",
        )?;
        let students = stmt
            .query_map(params![class_name, week_start, week_end], |row| {
                Ok((
                    row.get::<_, StudentId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u64,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(student_id, name, days)| {
                let percentage = attendance_percentage(days, working_days);
                (percentage < min_pct).then_some(LowAttendance {
                    student_id,
                    name,
                    days,
                    percentage,
                })
            })
            .collect();

        Ok(LowAttendanceReport {
            week_start,
            week_end,
            working_days,
            students,
        })
    }
}
