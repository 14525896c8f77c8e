use crate::config::{Config, SelectedMetric};
use crate::service::{AttendanceService, CaptureOutcome, Identification, ServiceError};
use chrono::NaiveDate;
use rollcall_core::PatchExtractor;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// The service as the daemon instantiates it.
pub type DaemonService = AttendanceService<PatchExtractor, SelectedMetric>;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Structured replies are JSON strings tagged with a `status` field, so
/// every outcome stays distinguishable to clients. Class filters take the
/// empty string for "all classes".
pub struct RollcallService {
    service: Arc<DaemonService>,
    capture_timeout: Duration,
    working_days: u32,
    low_attendance_pct: f64,
}

impl RollcallService {
    pub fn new(service: Arc<DaemonService>, config: &Config) -> Self {
        Self {
            service,
            capture_timeout: config.capture_timeout,
            working_days: config.working_days,
            low_attendance_pct: config.low_attendance_pct,
        }
    }

    /// Run a synchronous service call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> fdo::Result<T>
    where
        F: FnOnce(&DaemonService) -> Result<T, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        joined(tokio::task::spawn_blocking(move || f(service.as_ref())).await)
    }
}

fn joined<T>(result: Result<Result<T, ServiceError>, JoinError>) -> fdo::Result<T> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(reply_error(e)),
        Err(e) => {
            tracing::error!(error = %e, "worker task failed");
            Err(fdo::Error::Failed("internal worker failure".into()))
        }
    }
}

/// Unreadable input is the caller's problem and is typed as such; only
/// daemon-side failures are `Failed`.
fn reply_error(e: ServiceError) -> fdo::Error {
    match e {
        ServiceError::Extractor(e) => {
            tracing::debug!(error = %e, "image rejected");
            fdo::Error::InvalidArgs(format!("invalid image: {e}"))
        }
        e @ (ServiceError::Persistence(_) | ServiceError::InvalidDescriptor(_)) => {
            tracing::error!(error = %e, "request failed");
            fdo::Error::Failed(e.to_string())
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("encoding reply: {e}")))
}

fn class_filter(class_name: &str) -> Option<String> {
    let trimmed = class_name.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl RollcallService {
    /// Capture a face sample for a student and refresh the matching cache.
    async fn enroll(&self, student_id: i64, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(student_id, bytes = image.len(), "enroll requested");
        let outcome = self.blocking(move |s| s.enroll(student_id, &image)).await?;
        to_json(&outcome)
    }

    /// Identify a live capture and mark attendance for the match.
    ///
    /// Extraction and matching run under the capture deadline; on timeout
    /// the in-flight result is discarded and nothing is recorded.
    async fn mark_attendance(&self, image: Vec<u8>) -> fdo::Result<String> {
        let service = Arc::clone(&self.service);
        let identify = tokio::task::spawn_blocking(move || service.identify(&image));
        let identification = match tokio::time::timeout(self.capture_timeout, identify).await {
            Ok(result) => joined(result)?,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.capture_timeout.as_millis() as u64,
                    "capture timed out; result discarded"
                );
                return Err(fdo::Error::Timeout("capture timed out".into()));
            }
        };

        let candidate = match identification {
            Identification::Identified(c) => c,
            Identification::Unmatched(u) => {
                tracing::debug!(?u, "capture not matched");
                return to_json(&CaptureOutcome::from(u));
            }
        };

        let (outcome, name) = self
            .blocking(move |s| {
                let outcome = s.record_match(candidate)?;
                let name = s.store().student(candidate.student_id)?.map(|st| st.name);
                Ok((outcome, name))
            })
            .await?;

        let mut reply = serde_json::to_value(&outcome)
            .map_err(|e| fdo::Error::Failed(format!("encoding reply: {e}")))?;
        if let (Some(name), Some(fields)) = (name, reply.as_object_mut()) {
            fields.insert("name".into(), name.into());
        }
        Ok(reply.to_string())
    }

    /// Reload every stored descriptor into the matching cache.
    async fn refresh_cache(&self) -> fdo::Result<String> {
        tracing::info!("cache refresh requested");
        let report = self.blocking(|s| s.refresh_cache()).await?;
        let skipped: Vec<_> = report
            .skipped
            .iter()
            .map(|r| serde_json::json!({ "student_id": r.student_id, "reason": format!("{:?}", r.reason) }))
            .collect();
        Ok(serde_json::json!({
            "generation": report.generation,
            "loaded": report.loaded,
            "skipped": skipped,
        })
        .to_string())
    }

    async fn add_student(&self, name: &str, class_name: &str) -> fdo::Result<i64> {
        let name = name.trim().to_string();
        let class_name = class_name.trim().to_string();
        if name.is_empty() || class_name.is_empty() {
            return Err(fdo::Error::InvalidArgs("name and class must be non-empty".into()));
        }
        self.blocking(move |s| s.add_student(&name, &class_name)).await
    }

    async fn rename_student(&self, student_id: i64, name: &str) -> fdo::Result<bool> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(fdo::Error::InvalidArgs("name must be non-empty".into()));
        }
        self.blocking(move |s| s.rename_student(student_id, &name)).await
    }

    /// Delete a student and their attendance history.
    async fn remove_student(&self, student_id: i64) -> fdo::Result<bool> {
        tracing::info!(student_id, "remove_student requested");
        self.blocking(move |s| s.remove_student(student_id)).await
    }

    async fn list_students(&self, class_name: &str) -> fdo::Result<String> {
        let class = class_filter(class_name);
        let students = self.blocking(move |s| s.students(class.as_deref())).await?;
        to_json(&students)
    }

    /// Attendance for one `YYYY-MM-DD` day; empty means today.
    async fn attendance_on(&self, date: &str, class_name: &str) -> fdo::Result<String> {
        let date = match date.trim() {
            "" => None,
            raw => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                fdo::Error::InvalidArgs(format!("date must be YYYY-MM-DD, got {raw:?}"))
            })?),
        };
        let class = class_filter(class_name);
        let records = self
            .blocking(move |s| {
                let day = date.unwrap_or_else(|| s.today());
                Ok(s.store().attendance_on(day, class.as_deref())?)
            })
            .await?;
        to_json(&records)
    }

    async fn attendance_history(&self, class_name: &str) -> fdo::Result<String> {
        let class = class_filter(class_name);
        let history = self
            .blocking(move |s| Ok(s.store().attendance_history(class.as_deref())?))
            .await?;
        to_json(&history)
    }

    async fn insights(&self, class_name: &str) -> fdo::Result<String> {
        let class = class_filter(class_name);
        let insights = self
            .blocking(move |s| Ok(s.store().insights(class.as_deref(), s.today())?))
            .await?;
        to_json(&insights)
    }

    /// Students below the weekly attendance floor.
    async fn low_attendance(&self, class_name: &str) -> fdo::Result<String> {
        let class = class_filter(class_name);
        let (working_days, min_pct) = (self.working_days, self.low_attendance_pct);
        let report = self
            .blocking(move |s| {
                Ok(s.store()
                    .low_attendance(class.as_deref(), s.today(), working_days, min_pct)?)
            })
            .await?;
        to_json(&report)
    }

    /// Claim the kiosk. A running kiosk is reported, not taken over.
    async fn kiosk_start(&self, owner: &str) -> fdo::Result<String> {
        let owner = owner.trim().to_string();
        if owner.is_empty() {
            return Err(fdo::Error::InvalidArgs("owner must be non-empty".into()));
        }
        let outcome = self.blocking(move |s| s.kiosk_start(&owner)).await?;
        to_json(&outcome)
    }

    async fn kiosk_stop(&self) -> fdo::Result<bool> {
        self.blocking(|s| s.kiosk_stop()).await
    }

    async fn kiosk_status(&self) -> fdo::Result<String> {
        let status = self.blocking(|s| s.kiosk_status()).await?;
        to_json(&status)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let snapshot = self.service.snapshot();
        let matcher = self.service.matcher();
        let kiosk = self.blocking(|s| s.kiosk_status()).await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "cache_size": snapshot.len(),
            "cache_generation": snapshot.generation(),
            "metric": matcher.metric().name(),
            "match_threshold": matcher.threshold(),
            "kiosk": kiosk,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use rollcall_core::FaceExtractor;

    #[test]
    fn test_undecodable_image_is_invalid_args() {
        let err = PatchExtractor::default()
            .extract(b"definitely not an image")
            .unwrap_err();
        let reply = joined::<()>(Ok(Err(ServiceError::Extractor(err))));
        assert!(matches!(reply, Err(fdo::Error::InvalidArgs(_))), "{reply:?}");
    }

    #[test]
    fn test_persistence_failure_is_failed() {
        let err = ServiceError::Persistence(StoreError::Database(
            rusqlite::Error::InvalidQuery,
        ));
        let reply = joined::<()>(Ok(Err(err)));
        assert!(matches!(reply, Err(fdo::Error::Failed(_))), "{reply:?}");
    }
}
