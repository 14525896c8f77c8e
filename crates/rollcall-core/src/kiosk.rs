//! Exclusive kiosk session: one physical capture device, one operating
//! admin at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Point-in-time view of the kiosk session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KioskStatus {
    pub active: bool,
    /// Empty while inactive.
    pub owner: String,
    pub updated_at: DateTime<Utc>,
}

/// Result of a start attempt. Losing the race is an expected outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { owner: String },
    AlreadyActive { owner: String },
}

/// Two-state machine: Inactive ⇄ Active(owner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KioskSession {
    owner: Option<String>,
    updated_at: DateTime<Utc>,
}

impl KioskSession {
    pub fn inactive(at: DateTime<Utc>) -> Self {
        Self {
            owner: None,
            updated_at: at,
        }
    }

    /// Inactive → Active. A no-op when already active.
    pub fn try_start(&mut self, owner: &str, now: DateTime<Utc>) -> StartOutcome {
        if let Some(current) = &self.owner {
            return StartOutcome::AlreadyActive {
                owner: current.clone(),
            };
        }
        self.owner = Some(owner.to_string());
        self.updated_at = now;
        StartOutcome::Started {
            owner: owner.to_string(),
        }
    }

    /// Active → Inactive. Returns whether a transition happened.
    pub fn stop(&mut self, now: DateTime<Utc>) -> bool {
        if self.owner.take().is_some() {
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    pub fn status(&self) -> KioskStatus {
        KioskStatus {
            active: self.owner.is_some(),
            owner: self.owner.clone().unwrap_or_default(),
            updated_at: self.updated_at,
        }
    }
}

/// Process-local kiosk session. Only exclusive within one process; use a
/// persistent backend when several daemons share a device.
#[derive(Debug)]
pub struct MemoryKiosk {
    session: Mutex<KioskSession>,
}

impl MemoryKiosk {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            session: Mutex::new(KioskSession::inactive(now)),
        }
    }

    pub fn start(&self, owner: &str, now: DateTime<Utc>) -> StartOutcome {
        // Check and transition under one lock acquisition.
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_start(owner, now)
    }

    pub fn stop(&self, now: DateTime<Utc>) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop(now)
    }

    pub fn status(&self) -> KioskStatus {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Barrier;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_start_stop_cycle() {
        let kiosk = MemoryKiosk::new(t(7));
        assert!(!kiosk.status().active);

        assert_eq!(
            kiosk.start("alice (7B)", t(8)),
            StartOutcome::Started { owner: "alice (7B)".into() }
        );
        let status = kiosk.status();
        assert!(status.active);
        assert_eq!(status.owner, "alice (7B)");
        assert_eq!(status.updated_at, t(8));

        assert_eq!(
            kiosk.start("bob (8A)", t(9)),
            StartOutcome::AlreadyActive { owner: "alice (7B)".into() }
        );
        assert_eq!(kiosk.status().updated_at, t(8));

        assert!(kiosk.stop(t(10)));
        let status = kiosk.status();
        assert!(!status.active);
        assert_eq!(status.owner, "");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let kiosk = MemoryKiosk::new(t(7));
        assert!(!kiosk.stop(t(8)));
        assert!(!kiosk.stop(t(9)));
        assert_eq!(kiosk.status().updated_at, t(7));
    }

    #[test]
    fn test_concurrent_starts_have_one_winner() {
        let kiosk = MemoryKiosk::new(t(7));
        let barrier = Barrier::new(8);

        let outcomes: Vec<StartOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let kiosk = &kiosk;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        kiosk.start(&format!("admin{i}"), t(8))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                StartOutcome::Started { owner } => Some(owner.clone()),
                StartOutcome::AlreadyActive { .. } => None,
            })
            .collect();
        assert_eq!(winners.len(), 1);
        for o in &outcomes {
            if let StartOutcome::AlreadyActive { owner } = o {
                assert_eq!(owner, &winners[0]);
            }
        }
        assert_eq!(kiosk.status().owner, winners[0]);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(StartOutcome::AlreadyActive { owner: "alice".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "already_active", "owner": "alice"}));
    }
}
