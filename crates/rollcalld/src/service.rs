//! Orchestration of enrolment, capture and kiosk control.
//!
//! Everything here is synchronous; the D-Bus layer runs calls on the
//! blocking pool and applies the capture deadline.

use crate::kiosk::Kiosk;
use crate::ledger::RecordOutcome;
use crate::store::{SqliteStore, StoreError, Student};
use chrono::NaiveDate;
use rollcall_core::{
    Candidate, Clock, DescriptorError, DescriptorStore, Embedding, ExtractError, Extraction,
    FaceExtractor, KioskStatus, MatchResult, Matcher, MatchingCache, Metric, NearestNeighbor,
    RefreshReport, Snapshot, StartOutcome, StudentId,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Failures, as opposed to expected outcomes. Callers may retry
/// `Persistence`; nothing here retries on its own.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("extractor failure: {0}")]
    Extractor(#[from] ExtractError),
    #[error("extracted descriptor rejected: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrollOutcome {
    Enrolled { student_id: StudentId, cache_size: usize },
    NoFaceFound,
    AmbiguousFaces,
    UnknownStudent { student_id: StudentId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Recorded {
        student_id: StudentId,
        score: f32,
        date: NaiveDate,
        time: String,
    },
    AlreadyRecordedToday {
        student_id: StudentId,
        date: NaiveDate,
    },
    NoMatch,
    NoFaceFound,
    AmbiguousFaces,
    NoEnrolledFaces,
    /// Matched against a snapshot taken before the student was removed.
    StudentRemoved { student_id: StudentId },
}

/// Result of the read-only half of a capture.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Identified(Candidate),
    Unmatched(Unmatched),
}

/// Every way a capture can end without a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Unmatched {
    NoMatch { closest: Option<Candidate> },
    NoFaceFound,
    AmbiguousFaces,
    NoEnrolledFaces,
}

impl From<Unmatched> for CaptureOutcome {
    fn from(unmatched: Unmatched) -> Self {
        match unmatched {
            Unmatched::NoMatch { .. } => CaptureOutcome::NoMatch,
            Unmatched::NoFaceFound => CaptureOutcome::NoFaceFound,
            Unmatched::AmbiguousFaces => CaptureOutcome::AmbiguousFaces,
            Unmatched::NoEnrolledFaces => CaptureOutcome::NoEnrolledFaces,
        }
    }
}

/// The attendance core wired to its collaborators.
pub struct AttendanceService<X, M> {
    store: Arc<SqliteStore>,
    cache: MatchingCache<Embedding>,
    matcher: NearestNeighbor<M>,
    extractor: X,
    kiosk: Kiosk,
    clock: Arc<dyn Clock>,
}

impl<X, M> AttendanceService<X, M>
where
    X: FaceExtractor<Embedding>,
    M: Metric<Embedding>,
{
    /// Wire the service. The cache starts empty; call
    /// [`refresh_cache`](Self::refresh_cache) once before serving.
    pub fn new(
        store: Arc<SqliteStore>,
        extractor: X,
        matcher: NearestNeighbor<M>,
        kiosk: Kiosk,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache: MatchingCache::new(),
            matcher,
            extractor,
            kiosk,
            clock,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<Snapshot<Embedding>> {
        self.cache.current()
    }

    pub fn cache_size(&self) -> usize {
        self.cache.size()
    }

    pub fn matcher(&self) -> &NearestNeighbor<M> {
        &self.matcher
    }

    pub fn today(&self) -> NaiveDate {
        self.store.day_boundary().day(self.clock.now())
    }

    pub fn refresh_cache(&self) -> Result<RefreshReport, ServiceError> {
        Ok(self.cache.refresh(self.store.as_ref(), self.matcher.metric())?)
    }

    /// Extract → save → refresh.
    pub fn enroll(&self, student_id: StudentId, image: &[u8]) -> Result<EnrollOutcome, ServiceError> {
        let descriptor = match self.extractor.extract(image)? {
            Extraction::Face(d) => d,
            Extraction::NoFaceFound => return Ok(EnrollOutcome::NoFaceFound),
            Extraction::AmbiguousFaces => return Ok(EnrollOutcome::AmbiguousFaces),
        };
        self.matcher.metric().validate(&descriptor)?;

        match self.store.save(student_id, &descriptor) {
            Ok(()) => {}
            Err(StoreError::UnknownStudent { student_id }) => {
                return Ok(EnrollOutcome::UnknownStudent { student_id });
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(student_id, "face enrolled");

        let report = self.refresh_cache()?;
        Ok(EnrollOutcome::Enrolled {
            student_id,
            cache_size: report.loaded,
        })
    }

    /// Extract and match against the published snapshot. Read-only.
    ///
    /// An empty snapshot short-circuits before extraction.
    pub fn identify(&self, image: &[u8]) -> Result<Identification, ServiceError> {
        let snapshot = self.cache.current();
        if snapshot.is_empty() {
            return Ok(Identification::Unmatched(Unmatched::NoEnrolledFaces));
        }

        let probe = match self.extractor.extract(image)? {
            Extraction::Face(d) => d,
            Extraction::NoFaceFound => return Ok(Identification::Unmatched(Unmatched::NoFaceFound)),
            Extraction::AmbiguousFaces => {
                return Ok(Identification::Unmatched(Unmatched::AmbiguousFaces));
            }
        };
        self.matcher.metric().validate(&probe)?;

        let identification = match self.matcher.compare(&probe, &snapshot) {
            MatchResult::Matched(c) => Identification::Identified(c),
            MatchResult::NoMatch { closest } => Identification::Unmatched(Unmatched::NoMatch { closest }),
            MatchResult::NoEnrolledFaces => Identification::Unmatched(Unmatched::NoEnrolledFaces),
        };
        tracing::debug!(generation = snapshot.generation(), ?identification, "capture identified");
        Ok(identification)
    }

    /// Record attendance for an identified candidate.
    pub fn record_match(&self, candidate: Candidate) -> Result<CaptureOutcome, ServiceError> {
        let student_id = candidate.student_id;
        match self.store.record(student_id, self.clock.now()) {
            Ok(RecordOutcome::Recorded { date, time }) => Ok(CaptureOutcome::Recorded {
                student_id,
                score: candidate.score,
                date,
                time,
            }),
            Ok(RecordOutcome::AlreadyRecordedToday { date }) => {
                Ok(CaptureOutcome::AlreadyRecordedToday { student_id, date })
            }
            Err(StoreError::UnknownStudent { student_id }) => {
                tracing::info!(student_id, "match for a removed student ignored");
                Ok(CaptureOutcome::StudentRemoved { student_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Extract → match → record.
    pub fn identify_and_record(&self, image: &[u8]) -> Result<CaptureOutcome, ServiceError> {
        match self.identify(image)? {
            Identification::Identified(c) => self.record_match(c),
            Identification::Unmatched(u) => Ok(u.into()),
        }
    }

    pub fn add_student(&self, name: &str, class_name: &str) -> Result<StudentId, ServiceError> {
        Ok(self.store.add_student(name, class_name, self.clock.now())?)
    }

    pub fn students(&self, class_name: Option<&str>) -> Result<Vec<Student>, ServiceError> {
        Ok(self.store.students(class_name)?)
    }

    /// Rename a student. The cache is keyed by id and needs no refresh.
    pub fn rename_student(&self, student_id: StudentId, name: &str) -> Result<bool, ServiceError> {
        Ok(self.store.rename_student(student_id, name)?)
    }

    /// Delete a student with their attendance, then refresh the cache.
    pub fn remove_student(&self, student_id: StudentId) -> Result<bool, ServiceError> {
        let removed = self.store.remove_student(student_id)?;
        if removed {
            self.refresh_cache()?;
        }
        Ok(removed)
    }

    pub fn kiosk_start(&self, owner: &str) -> Result<StartOutcome, ServiceError> {
        Ok(self.kiosk.start(owner, self.clock.now())?)
    }

    pub fn kiosk_stop(&self) -> Result<bool, ServiceError> {
        Ok(self.kiosk.stop(self.clock.now())?)
    }

    pub fn kiosk_status(&self) -> Result<KioskStatus, ServiceError> {
        Ok(self.kiosk.status()?)
    }
}
