//! Kiosk session backends.
//!
//! `Shared` keeps the session in the database row so that every daemon
//! attached to the same file sees one owner; `Process` keeps it in memory
//! for single-instance deployments.

use crate::store::{SqliteStore, StoreError};
use chrono::{DateTime, Utc};
use rollcall_core::{KioskStatus, MemoryKiosk, StartOutcome};
use rusqlite::{params, TransactionBehavior};
use std::sync::Arc;

impl SqliteStore {
    /// Claim the kiosk for `owner` if nobody holds it.
    pub fn kiosk_start(&self, owner: &str, now: DateTime<Utc>) -> Result<StartOutcome, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Compare-and-set: only an inactive row is claimed.
        let claimed = tx.execute(
            "UPDATE kiosk_session SET active = 1, owner = ?1, updated_at = ?2
             WHERE id = 1 AND active = 0",
            params![owner, now],
        )?;
        let outcome = if claimed == 1 {
            StartOutcome::Started {
                owner: owner.to_string(),
            }
        } else {
            let current: String =
                tx.query_row("SELECT owner FROM kiosk_session WHERE id = 1", [], |row| row.get(0))?;
            StartOutcome::AlreadyActive { owner: current }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Release the kiosk. Returns whether it was active.
    pub fn kiosk_stop(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.conn();
        let released = conn.execute(
            "UPDATE kiosk_session SET active = 0, owner = '', updated_at = ?1
             WHERE id = 1 AND active = 1",
            [now],
        )?;
        Ok(released == 1)
    }

    pub fn kiosk_status(&self) -> Result<KioskStatus, StoreError> {
        let conn = self.conn();
        let status = conn.query_row(
            "SELECT active, owner, updated_at FROM kiosk_session WHERE id = 1",
            [],
            |row| {
                Ok(KioskStatus {
                    active: row.get(0)?,
                    owner: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        )?;
        Ok(status)
    }
}

/// Where the kiosk session lives.
pub enum Kiosk {
    Process(MemoryKiosk),
    Shared(Arc<SqliteStore>),
}

impl Kiosk {
    pub fn start(&self, owner: &str, now: DateTime<Utc>) -> Result<StartOutcome, StoreError> {
        let outcome = match self {
            Kiosk::Process(k) => k.start(owner, now),
            Kiosk::Shared(store) => store.kiosk_start(owner, now)?,
        };
        match &outcome {
            StartOutcome::Started { owner } => tracing::info!(owner = %owner, "kiosk started"),
            StartOutcome::AlreadyActive { owner } => {
                tracing::info!(owner = %owner, "kiosk start refused: already active")
            }
        }
        Ok(outcome)
    }

    pub fn stop(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let stopped = match self {
            Kiosk::Process(k) => k.stop(now),
            Kiosk::Shared(store) => store.kiosk_stop(now)?,
        };
        if stopped {
            tracing::info!("kiosk stopped");
        }
        Ok(stopped)
    }

    pub fn status(&self) -> Result<KioskStatus, StoreError> {
        match self {
            Kiosk::Process(k) => Ok(k.status()),
            Kiosk::Shared(store) => store.kiosk_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_core::DayBoundary;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    fn backends() -> Vec<Kiosk> {
        vec![
            Kiosk::Process(MemoryKiosk::new(t(0))),
            Kiosk::Shared(Arc::new(SqliteStore::in_memory(DayBoundary::utc()).unwrap())),
        ]
    }

    #[test]
    fn test_backends_share_state_machine() {
        for kiosk in backends() {
            assert!(!kiosk.status().unwrap().active);
            assert!(!kiosk.stop(t(7)).unwrap());

            assert_eq!(
                kiosk.start("alice (7B)", t(8)).unwrap(),
                StartOutcome::Started { owner: "alice (7B)".into() }
            );
            assert_eq!(
                kiosk.start("bob (8A)", t(9)).unwrap(),
                StartOutcome::AlreadyActive { owner: "alice (7B)".into() }
            );
            let status = kiosk.status().unwrap();
            assert!(status.active);
            assert_eq!(status.owner, "alice (7B)");
            assert_eq!(status.updated_at, t(8));

            assert!(kiosk.stop(t(10)).unwrap());
            assert!(!kiosk.stop(t(11)).unwrap());
            let status = kiosk.status().unwrap();
            assert!(!status.active);
            assert_eq!(status.owner, "");
            assert_eq!(status.updated_at, t(10));

            assert!(matches!(kiosk.start("bob (8A)", t(12)).unwrap(), StartOutcome::Started { .. }));
        }
    }
}
