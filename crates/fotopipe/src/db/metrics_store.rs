//! Database-backed implementation of the pipeline's `MetricsSink` seam.
//!
//! Bound to one processing record; constructed per job after
//! `processing_repo::ensure`.

use chrono::Utc;

use crate::pipeline::{JobContext, MetricsSink, StepMetric, StepName, StoreError};

use super::{processing_repo, Database, DatabaseError};

pub struct DbMetrics {
    db: Database,
    processing_id: i64,
}

impl DbMetrics {
    pub fn new(db: Database, processing_id: i64) -> Self {
        Self { db, processing_id }
    }

    pub fn processing_id(&self) -> i64 {
        self.processing_id
    }
}

fn unavailable(e: DatabaseError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

impl MetricsSink for DbMetrics {
    fn record_step_metric(
        &self,
        _ctx: &JobContext,
        step: StepName,
        metric: &StepMetric,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        processing_repo::record_metric(
            &self.db,
            self.processing_id,
            step.as_str(),
            metric.to_json(),
            &now,
        )
        .map_err(unavailable)
    }

    fn record_georef_error(&self, _ctx: &JobContext, error_m: f64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        processing_repo::set_georef_error(&self.db, self.processing_id, error_m, &now)
            .map_err(unavailable)
    }
}
