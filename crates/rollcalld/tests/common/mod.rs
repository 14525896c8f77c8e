#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rollcall_core::{
    DayBoundary, Embedding, Euclidean, ExtractError, Extraction, FaceExtractor, ManualClock,
    MemoryKiosk, NearestNeighbor,
};
use rollcalld::{AttendanceService, Kiosk, SqliteStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Extractor fake: images are keys into a table of canned results.
/// Clones share the table.
#[derive(Clone, Default)]
pub struct StubExtractor {
    faces: Arc<Mutex<HashMap<Vec<u8>, Extraction<Embedding>>>>,
}

impl StubExtractor {
    pub fn face(&self, image: &[u8], values: &[f32]) {
        self.set(image, Extraction::Face(Embedding::new(values.to_vec())));
    }

    pub fn set(&self, image: &[u8], extraction: Extraction<Embedding>) {
        self.faces.lock().unwrap().insert(image.to_vec(), extraction);
    }
}

impl FaceExtractor<Embedding> for StubExtractor {
    fn extract(&self, image: &[u8]) -> Result<Extraction<Embedding>, ExtractError> {
        self.faces
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .ok_or_else(|| ExtractError::Failed("unreadable image".into()))
    }
}

pub type TestService = AttendanceService<StubExtractor, Euclidean>;

pub const THRESHOLD: f32 = 0.5;

pub fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
}

pub struct Harness {
    pub service: TestService,
    pub extractor: StubExtractor,
    pub clock: Arc<ManualClock>,
    pub store: Arc<SqliteStore>,
}

pub fn harness() -> Harness {
    harness_on(SqliteStore::in_memory(DayBoundary::utc()).unwrap())
}

pub fn harness_on(store: SqliteStore) -> Harness {
    let store = Arc::new(store);
    let extractor = StubExtractor::default();
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let service = AttendanceService::new(
        Arc::clone(&store),
        extractor.clone(),
        NearestNeighbor::new(Euclidean { dim: 2 }, THRESHOLD),
        Kiosk::Process(MemoryKiosk::new(monday_morning())),
        clock.clone(),
    );
    Harness {
        service,
        extractor,
        clock,
        store,
    }
}
