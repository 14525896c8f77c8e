//! Real pixels through the default extractor and the configured metric.

use chrono::{TimeZone, Utc};
use image::{GrayImage, ImageFormat, Luma};
use rollcall_core::{DayBoundary, ManualClock, MemoryKiosk, NearestNeighbor, PatchExtractor};
use rollcalld::config::{MetricKind, SelectedMetric};
use rollcalld::{AttendanceService, CaptureOutcome, EnrollOutcome, SqliteStore};
use std::io::Cursor;
use std::sync::Arc;

fn png(width: u32, height: u32, pixel: impl Fn(u32, u32) -> u8) -> Vec<u8> {
    let img = GrayImage::from_fn(width, height, |x, y| Luma([pixel(x, y)]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn vertical_stripes(offset: u32) -> Vec<u8> {
    png(96, 96, move |x, _| if (x + offset) % 24 < 12 { 30 } else { 220 })
}

fn diagonal() -> Vec<u8> {
    png(96, 96, |x, y| if (x + y) % 32 < 16 { 10 } else { 240 })
}

fn service() -> AttendanceService<PatchExtractor, SelectedMetric> {
    let extractor = PatchExtractor::default();
    let metric = SelectedMetric::new(MetricKind::Cosine, extractor.dimension());
    let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
    AttendanceService::new(
        Arc::new(SqliteStore::in_memory(DayBoundary::utc()).unwrap()),
        extractor,
        NearestNeighbor::new(metric, 0.5),
        rollcalld::Kiosk::Process(MemoryKiosk::new(now)),
        Arc::new(ManualClock::new(now)),
    )
}

#[test]
fn enrolled_pattern_is_recognised_and_others_are_not() {
    let service = service();
    let stripes = service.add_student("Ada", "7B").unwrap();
    let checks = service.add_student("Alan", "7B").unwrap();

    assert!(matches!(
        service.enroll(stripes, &vertical_stripes(0)).unwrap(),
        EnrollOutcome::Enrolled { .. }
    ));
    assert!(matches!(
        service.enroll(checks, &diagonal()).unwrap(),
        EnrollOutcome::Enrolled { cache_size: 2, .. }
    ));

    match service.identify_and_record(&vertical_stripes(0)).unwrap() {
        CaptureOutcome::Recorded { student_id, score, .. } => {
            assert_eq!(student_id, stripes);
            assert!(score > 0.99, "{score}");
        }
        other => panic!("expected Recorded, got {other:?}"),
    }

    // Half a period out of phase: the inverse pattern.
    assert_eq!(
        service.identify_and_record(&vertical_stripes(12)).unwrap(),
        CaptureOutcome::NoMatch
    );
}

#[test]
fn flat_frame_has_no_face() {
    let service = service();
    let id = service.add_student("Ada", "7B").unwrap();
    assert_eq!(
        service.enroll(id, &png(64, 64, |_, _| 128)).unwrap(),
        EnrollOutcome::NoFaceFound
    );
    service.enroll(id, &diagonal()).unwrap();
    assert_eq!(
        service.identify_and_record(&png(64, 64, |_, _| 128)).unwrap(),
        CaptureOutcome::NoFaceFound
    );
}

#[test]
fn garbage_bytes_are_an_extractor_failure() {
    let service = service();
    let id = service.add_student("Ada", "7B").unwrap();
    assert!(matches!(
        service.enroll(id, b"definitely not an image"),
        Err(rollcalld::ServiceError::Extractor(_))
    ));
}
