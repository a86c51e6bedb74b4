//! Test harness for isolated end-to-end runs.
//!
//! Wires an in-memory database, a settings group and the queue driver the
//! same way the binary does, against a caller-supplied engine.

#![allow(dead_code)]

use fotopipe::db::{self, Database, DbMetrics, DbStatusStore};
use fotopipe::engine::Engine;
use fotopipe::pipeline::{JobContext, Pipeline};
use fotopipe::queue::{DbJobSource, DriveSummary, JobOutcome, QueueDriver};
use fotopipe::settings::Settings;

pub const TEST_VERSION: &str = "test-0.0.0";

pub struct TestHarness {
    pub db: Database,
    pub group: i64,
}

impl TestHarness {
    /// Harness with the default settings bundle.
    pub fn new() -> Self {
        Self::with_settings(&Settings::standalone())
    }

    pub fn with_settings(settings: &Settings) -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        let group =
            db::settings_repo::insert(&db, "test-group", settings).expect("insert settings group");
        Self { db, group }
    }

    /// Seeds a pending job linked to the harness settings group.
    pub fn seed_job(&self, id: &str) {
        self.seed_job_row(id, Some(self.group));
    }

    /// Seeds a pending job with no settings group (resolution must fail).
    pub fn seed_job_without_group(&self, id: &str) {
        self.seed_job_row(id, None);
    }

    fn seed_job_row(&self, id: &str, group: Option<i64>) {
        db::job_repo::insert(
            &self.db,
            &db::job_repo::JobRow {
                id: id.to_string(),
                location: format!("/data/projects/{}", id),
                settings_group: group,
                status: "pending".to_string(),
                error: None,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                updated_at: "2026-01-01T00:00:00Z".to_string(),
                completed_at: None,
            },
        )
        .expect("insert job");
    }

    /// Drains the queue exactly as the binary's db mode does.
    pub fn run_queue(&self, engine: &mut dyn Engine) -> DriveSummary {
        let source = DbJobSource::new(self.db.clone());
        let status_store = DbStatusStore::new(self.db.clone());
        let driver = QueueDriver::new(&source);

        driver
            .run(|job| {
                let ctx = JobContext::new(&job.id, &job.location);
                let settings =
                    db::settings_repo::resolve(&self.db, &job.id, job.settings_group)?;
                let processing_id =
                    db::processing_repo::ensure(&self.db, &job.id, TEST_VERSION, "t0")?;
                let metrics = DbMetrics::new(self.db.clone(), processing_id);
                let pipeline = Pipeline::new(settings, &status_store, &metrics);
                Ok(pipeline.run(&ctx, engine)?)
            })
            .expect("queue drive")
    }

    /// Runs the pipeline once for one already-seeded job, bypassing the
    /// queue (overall job status untouched).
    pub fn run_pipeline_once(&self, job_id: &str, engine: &mut dyn Engine) -> JobOutcome {
        let row = db::job_repo::find_by_id(&self.db, job_id)
            .expect("find job")
            .expect("job exists");
        let ctx = JobContext::new(job_id, &row.location);
        let settings =
            db::settings_repo::resolve(&self.db, job_id, row.settings_group).expect("settings");
        let processing_id =
            db::processing_repo::ensure(&self.db, job_id, TEST_VERSION, "t0").expect("processing");
        let metrics = DbMetrics::new(self.db.clone(), processing_id);
        let status_store = DbStatusStore::new(self.db.clone());
        let pipeline = Pipeline::new(settings, &status_store, &metrics);
        pipeline.run(&ctx, engine).expect("pipeline run")
    }

    pub fn job_status(&self, job_id: &str) -> String {
        db::job_repo::find_by_id(&self.db, job_id)
            .expect("find job")
            .expect("job exists")
            .status
    }

    pub fn job_error(&self, job_id: &str) -> Option<String> {
        db::job_repo::find_by_id(&self.db, job_id)
            .expect("find job")
            .expect("job exists")
            .error
    }

    pub fn step_status(&self, job_id: &str, step: &str) -> Option<String> {
        db::step_repo::get(&self.db, job_id, step)
            .expect("step status")
            .map(|row| row.status)
    }

    pub fn reset_job_to_pending(&self, job_id: &str) {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE jobs SET status = 'pending', error = NULL WHERE id = ?1",
                    rusqlite::params![job_id],
                )?;
                Ok(())
            })
            .expect("reset job");
    }

    pub fn processing_records(&self, job_id: &str) -> Vec<db::processing_repo::ProcessingRow> {
        db::processing_repo::list_for_job(&self.db, job_id).expect("processing records")
    }
}
