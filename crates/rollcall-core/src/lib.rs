//! rollcall-core: Matching cache, nearest-neighbour matcher and kiosk session.
//!
//! Everything here is storage-agnostic: the descriptor store, the clock and
//! the face extractor are injected as traits so the daemon (or a test) can
//! supply its own.

pub mod cache;
pub mod clock;
pub mod extract;
pub mod kiosk;
pub mod matcher;
pub mod types;

pub use cache::{
    DescriptorStore, MatchingCache, RefreshReport, SkipReason, SkippedRecord, Snapshot,
    StoredDescriptor,
};
pub use clock::{Clock, DayBoundary, ManualClock, SystemClock};
pub use extract::{ExtractError, Extraction, FaceExtractor, PatchExtractor};
pub use kiosk::{KioskSession, KioskStatus, MemoryKiosk, StartOutcome};
pub use matcher::{Candidate, MatchResult, Matcher, NearestNeighbor};
pub use types::{
    BinaryFeatures, CosineSimilarity, DescriptorError, Embedding, Euclidean, HammingMatchCount,
    Metric, Polarity, StudentId,
};
