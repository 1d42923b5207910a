use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::AppError,
    storage::{
        keys::METRICS_KEY,
        kv::{set_json, StateStore},
    },
};

/// Process-wide generation counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_jobs: u64,
    pub total_records_requested: u64,
    pub total_records_generated: u64,
    pub active_jobs: u64,
    pub failed_jobs: u64,
    pub last_job_at: Option<DateTime<Utc>>,
}

/// Signed adjustments; zero fields leave their counter alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsDelta {
    pub total_jobs: i64,
    pub total_records_requested: i64,
    pub total_records_generated: i64,
    pub active_jobs: i64,
    pub failed_jobs: i64,
    pub last_job_at: Option<DateTime<Utc>>,
}

fn apply_signed(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta.unsigned_abs())
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}

impl Metrics {
    /// New snapshot with `delta` applied, every counter clamped at zero.
    pub fn apply(&self, delta: &MetricsDelta) -> Self {
        Self {
            total_jobs: apply_signed(self.total_jobs, delta.total_jobs),
            total_records_requested: apply_signed(
                self.total_records_requested,
                delta.total_records_requested,
            ),
            total_records_generated: apply_signed(
                self.total_records_generated,
                delta.total_records_generated,
            ),
            active_jobs: apply_signed(self.active_jobs, delta.active_jobs),
            failed_jobs: apply_signed(self.failed_jobs, delta.failed_jobs),
            last_job_at: delta.last_job_at.or(self.last_job_at),
        }
    }

    /// Current snapshot; zeros when absent or unreadable.
    pub async fn get_current<S>(store: &S) -> Result<Self, AppError>
    where
        S: StateStore + ?Sized,
    {
        let Some(raw) = store.get(METRICS_KEY).await? else {
            return Ok(Self::default());
        };

        match serde_json::from_str(&raw) {
            Ok(metrics) => Ok(metrics),
            Err(err) => {
                warn!(error = %err, "metrics snapshot unreadable, starting from zero");
                Ok(Self::default())
            }
        }
    }

    /// Read-modify-write of the shared snapshot.
    ///
    /// Not atomic: concurrent writers may lose updates.
    pub async fn update<S>(store: &S, delta: &MetricsDelta) -> Result<Self, AppError>
    where
        S: StateStore + ?Sized,
    {
        let next = Self::get_current(store).await?.apply(delta);
        set_json(store, METRICS_KEY, &next).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStateStore;

    #[tokio::test]
    async fn deltas_accumulate_from_zero_baseline() {
        let store = MemoryStateStore::new();

        Metrics::update(
            &store,
            &MetricsDelta {
                total_jobs: 1,
                active_jobs: 1,
                ..Default::default()
            },
        )
        .await
        .expect("first delta");
        let metrics = Metrics::update(
            &store,
            &MetricsDelta {
                active_jobs: -1,
                failed_jobs: 1,
                ..Default::default()
            },
        )
        .await
        .expect("second delta");

        assert_eq!(metrics.total_jobs, 1);
        assert_eq!(metrics.active_jobs, 0);
        assert_eq!(metrics.failed_jobs, 1);
        assert_eq!(Metrics::get_current(&store).await.expect("read"), metrics);
    }

    #[test]
    fn counters_clamp_at_zero() {
        let metrics = Metrics::default().apply(&MetricsDelta {
            active_jobs: -3,
            ..Default::default()
        });
        assert_eq!(metrics.active_jobs, 0);
    }

    #[test]
    fn last_job_at_changes_only_when_provided() {
        let at = Utc::now();
        let stamped = Metrics::default().apply(&MetricsDelta {
            last_job_at: Some(at),
            ..Default::default()
        });
        assert_eq!(stamped.last_job_at, Some(at));

        let untouched = stamped.apply(&MetricsDelta {
            total_records_generated: 4,
            ..Default::default()
        });
        assert_eq!(untouched.last_job_at, Some(at));
        assert_eq!(untouched.total_records_generated, 4);
    }

    #[tokio::test]
    async fn unreadable_snapshot_resets_to_zero() {
        let store = MemoryStateStore::new();
        store
            .set(METRICS_KEY, "garbage".into())
            .await
            .expect("seed");
        assert_eq!(
            Metrics::get_current(&store).await.expect("read"),
            Metrics::default()
        );
    }
}
