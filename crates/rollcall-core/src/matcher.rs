//! Nearest-neighbour matching of a probe against a cache snapshot.

use crate::cache::Snapshot;
use crate::types::{Metric, StudentId};
use serde::Serialize;

/// Best-scoring snapshot entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candidate {
    pub student_id: StudentId,
    pub score: f32,
}

/// Result of matching a probe against a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched(Candidate),
    /// The closest entry did not clear the threshold (or every score was NaN).
    NoMatch { closest: Option<Candidate> },
    /// The snapshot has no entries to compare against.
    NoEnrolledFaces,
}

/// Strategy for comparing a probe descriptor against a snapshot.
pub trait Matcher<D> {
    fn compare(&self, probe: &D, snapshot: &Snapshot<D>) -> MatchResult;
}

/// Exhaustive nearest-neighbour search under a metric and an exclusive
/// threshold. Ties go to the earliest entry in snapshot order.
#[derive(Debug, Clone)]
pub struct NearestNeighbor<M> {
    metric: M,
    threshold: f32,
}

impl<M> NearestNeighbor<M> {
    pub fn new(metric: M, threshold: f32) -> Self {
        Self { metric, threshold }
    }

    pub fn metric(&self) -> &M {
        &self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl<D, M: Metric<D>> Matcher<D> for NearestNeighbor<M> {
    fn compare(&self, probe: &D, snapshot: &Snapshot<D>) -> MatchResult {
        if snapshot.is_empty() {
            return MatchResult::NoEnrolledFaces;
        }

        let polarity = self.metric.polarity();
        let mut best: Option<Candidate> = None;

        // Always iterate every entry, no early exit.
        for (student_id, descriptor) in snapshot.iter() {
            let score = self.metric.score(probe, descriptor);
            if score.is_nan() {
                continue;
            }
            let is_better = match &best {
                None => true,
                Some(prev) => polarity.improves(score, prev.score),
            };
            if is_better {
                best = Some(Candidate { student_id, score });
            }
        }

        match best {
            Some(c) if polarity.passes(c.score, self.threshold) => MatchResult::Matched(c),
            closest => MatchResult::NoMatch { closest },
        }
    }
}
