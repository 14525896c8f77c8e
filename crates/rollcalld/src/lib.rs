//! rollcalld: biometric attendance daemon.
//!
//! Wires the matching core from `rollcall-core` to SQLite persistence and
//! exposes it over D-Bus.

pub mod config;
pub mod dbus_interface;
pub mod kiosk;
pub mod ledger;
pub mod reports;
pub mod service;
pub mod store;

pub use config::Config;
pub use kiosk::Kiosk;
pub use service::{AttendanceService, CaptureOutcome, EnrollOutcome, ServiceError};
pub use store::{SqliteStore, StoreError};
