//! Pipeline orchestrator.
//!
//! Runs the fixed step sequence for one job. Every engine call is wrapped
//! by the step executor, so a step failure is captured and the remaining
//! steps still run; only project loading and status-store failures abort
//! the job as a whole.

use tracing::{debug, info, info_span, warn};

use crate::engine::{Engine, EngineError, FilterCriterion};
use crate::georef;
use crate::queue::job::JobOutcome;
use crate::settings::{FilterSettings, Settings};

use super::context::JobContext;
use super::error::PipelineError;
use super::executor::StepExecutor;
use super::filtering::selection_threshold;
use super::metrics::MetricsSink;
use super::status::{StatusStore, StoreError};
use super::step::{ExecutionOutcome, StepMetric, StepName};

pub struct Pipeline<'a> {
    settings: Settings,
    executor: StepExecutor<'a>,
    metrics: &'a dyn MetricsSink,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: Settings,
        status: &'a dyn StatusStore,
        metrics: &'a dyn MetricsSink,
    ) -> Self {
        Self {
            settings,
            executor: StepExecutor::new(status, metrics),
            metrics,
        }
    }

    /// Runs the full sequence for one job.
    ///
    /// Returns `Err` only for failures outside the guarded steps: project
    /// loading and status-store writes. Step failures are reported inside
    /// the returned `JobOutcome`.
    pub fn run(
        &self,
        ctx: &JobContext,
        engine: &mut dyn Engine,
    ) -> Result<JobOutcome, PipelineError> {
        let _job_span = info_span!("job", job_id = %ctx.job_id).entered();
        info!(location = %ctx.location.display(), "processing job");

        engine
            .load_project(&ctx.location)
            .map_err(PipelineError::ProjectLoad)?;

        let mut outcome = JobOutcome::new(&ctx.job_id);
        let s = &self.settings;

        self.run_step(ctx, engine, &mut outcome, StepName::QualityFilter, |e| {
            e.estimate_image_quality(s.quality.threshold)
                .map(|n| Some(StepMetric::Count(n)))
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::Alignment, |e| {
            e.align_cameras(&s.alignment)
                .map(|n| Some(StepMetric::Count(n)))
        })?;

        let r = self.run_step(ctx, engine, &mut outcome, StepName::Georeference, |e| {
            let targets = ctx.location.join(&s.georeference.targets_file);
            e.import_references(s.georeference.crs_epsg, &targets)
                .map(|n| Some(StepMetric::Count(n)))
        })?;
        if succeeded(&r) {
            self.refresh_georef_error(ctx, engine, &mut outcome)?;
        }

        self.run_step(ctx, engine, &mut outcome, StepName::PruneMarkers, |e| {
            e.prune_markers(s.markers.min_projections)
                .map(|n| Some(StepMetric::Count(n)))
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::Scalebars, |e| {
            e.insert_scalebars(&s.scalebars)
                .map(|n| Some(StepMetric::Count(n)))
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::AlignRegion, |e| {
            e.align_region().map(|_| None)
        })?;

        let r = self.run_step(ctx, engine, &mut outcome, StepName::OptimizeCameras, |e| {
            e.optimize_cameras(&s.optimization).map(|_| None)
        })?;
        if succeeded(&r) {
            self.refresh_georef_error(ctx, engine, &mut outcome)?;
        }

        // Iterative error reduction: three distinct outlier filters, each
        // followed by a camera re-optimization.
        for (step, criterion, filter) in [
            (
                StepName::FilterUncertainty,
                FilterCriterion::ReconstructionUncertainty,
                &s.uncertainty,
            ),
            (
                StepName::FilterProjectionAccuracy,
                FilterCriterion::ProjectionAccuracy,
                &s.projection_accuracy,
            ),
            (
                StepName::FilterReprojection,
                FilterCriterion::ReprojectionError,
                &s.reprojection,
            ),
        ] {
            let r = self.run_step(ctx, engine, &mut outcome, step, |e| {
                filter_pass(e, criterion, filter, s)
            })?;
            if succeeded(&r) {
                self.refresh_georef_error(ctx, engine, &mut outcome)?;
            }
        }

        self.run_step(ctx, engine, &mut outcome, StepName::DepthMaps, |e| {
            e.build_depth_maps(&s.depth_maps).map(|_| None)
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::DenseCloud, |e| {
            e.build_dense_cloud(&s.dense_cloud)
                .map(|n| Some(StepMetric::Count(n)))
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::Mesh, |e| {
            e.build_mesh(s.mesh.face_count)
                .map(|n| Some(StepMetric::Count(n)))
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::Texture, |e| {
            e.build_texture(s.texture.size, s.texture.ghosting_filter)
                .map(|_| None)
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::Dem, |e| {
            e.build_dem(s.dem.interpolation, s.dem.resolution).map(|_| None)
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::Orthomosaic, |e| {
            e.build_orthomosaic(s.orthomosaic.blending, s.orthomosaic.hole_filling)
                .map(|_| None)
        })?;

        self.run_step(ctx, engine, &mut outcome, StepName::Export, |e| {
            e.export_products(&ctx.location, &s.export)
                .map(|produced| Some(StepMetric::Flag(produced)))
        })?;

        if let Some(summary) = outcome.failure_summary() {
            warn!(job_id = %ctx.job_id, "{}", summary);
        } else {
            info!(job_id = %ctx.job_id, "job completed");
        }

        Ok(outcome)
    }

    fn run_step<F>(
        &self,
        ctx: &JobContext,
        engine: &mut dyn Engine,
        outcome: &mut JobOutcome,
        step: StepName,
        body: F,
    ) -> Result<ExecutionOutcome, StoreError>
    where
        F: FnOnce(&mut dyn Engine) -> Result<Option<StepMetric>, EngineError>,
    {
        let _step_span = info_span!("step", step = %step).entered();
        let enabled = self.settings.enabled_for(step);
        let result = self.executor.execute(ctx, step, enabled, || body(engine))?;
        outcome.push(step, result.clone());
        Ok(result)
    }

    /// Recomputes the georeferencing error estimate and persists it.
    /// Failure to read residuals is logged, not fatal — the remaining
    /// steps must still run.
    fn refresh_georef_error(
        &self,
        ctx: &JobContext,
        engine: &mut dyn Engine,
        outcome: &mut JobOutcome,
    ) -> Result<(), StoreError> {
        match engine.marker_residuals() {
            Ok(residuals) => {
                let error_m = georef::rms_residual_error(&residuals);
                debug!(error_m, markers = residuals.len(), "georeferencing error");
                outcome.georef_error = Some(error_m);
                self.metrics.record_georef_error(ctx, error_m)?;
            }
            Err(e) => {
                warn!(error = %e, "could not recompute georeferencing error");
            }
        }
        Ok(())
    }
}

fn succeeded(outcome: &ExecutionOutcome) -> bool {
    matches!(outcome, ExecutionOutcome::Succeeded(_))
}

/// One error-reduction pass: percentile-ranked cutoff with the configured
/// floor, removal, then camera re-optimization.
fn filter_pass(
    engine: &mut dyn Engine,
    criterion: FilterCriterion,
    filter: &FilterSettings,
    settings: &Settings,
) -> Result<Option<StepMetric>, EngineError> {
    let values = engine.point_errors(criterion)?;
    let removed = match selection_threshold(&values, filter.percent, filter.floor) {
        Some(threshold) => {
            debug!(%criterion, threshold, points = values.len(), "removing outliers");
            engine.remove_points(criterion, threshold)?
        }
        None => 0,
    };
    engine.optimize_cameras(&settings.optimization)?;
    Ok(Some(StepMetric::Count(removed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimEngine;
    use crate::pipeline::metrics::MemoryMetrics;
    use crate::pipeline::status::{MemoryStatusStore, StatusStore};
    use crate::pipeline::step::Status;

    fn ctx() -> JobContext {
        JobContext::new("job-1", "/data/site-a")
    }

    #[test]
    fn test_full_run_succeeds_with_sim_engine() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let pipeline = Pipeline::new(Settings::standalone(), &store, &metrics);
        let mut engine = SimEngine::new();

        let outcome = pipeline.run(&ctx(), &mut engine).unwrap();

        assert_eq!(outcome.steps.len(), StepName::SEQUENCE.len());
        assert!(!outcome.any_failed(), "{:?}", outcome.failed_steps());
        assert!(outcome.georef_error.is_some());
        for step in StepName::SEQUENCE {
            assert_eq!(store.step_status("job-1", step).unwrap(), Status::Done);
        }
    }

    #[test]
    fn test_step_failure_does_not_stop_the_sequence() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let pipeline = Pipeline::new(Settings::standalone(), &store, &metrics);
        // Scalebars fail; everything downstream is independent of them.
        let mut engine = SimEngine::new().fail_on("insert_scalebars");

        let outcome = pipeline.run(&ctx(), &mut engine).unwrap();

        assert_eq!(outcome.failed_steps(), vec![StepName::Scalebars]);
        assert_eq!(
            store.step_status("job-1", StepName::Scalebars).unwrap(),
            Status::Failed
        );
        // Every later step still ran and succeeded.
        for step in [
            StepName::AlignRegion,
            StepName::OptimizeCameras,
            StepName::FilterUncertainty,
            StepName::DepthMaps,
            StepName::DenseCloud,
            StepName::Mesh,
            StepName::Texture,
            StepName::Dem,
            StepName::Orthomosaic,
            StepName::Export,
        ] {
            assert!(
                matches!(
                    outcome.outcome_for(step),
                    Some(ExecutionOutcome::Succeeded(_))
                ),
                "step {} did not succeed",
                step
            );
        }
    }

    #[test]
    fn test_disabled_steps_are_skipped_without_engine_calls() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let mut settings = Settings::standalone();
        settings.steps.depth_maps = false;
        settings.steps.dense_cloud = false;
        settings.steps.mesh = false;
        settings.steps.texture = false;
        settings.steps.dem = false;
        settings.steps.orthomosaic = false;
        settings.steps.export = false;
        let pipeline = Pipeline::new(settings, &store, &metrics);
        let mut engine = SimEngine::new();

        let outcome = pipeline.run(&ctx(), &mut engine).unwrap();

        for step in [
            StepName::DepthMaps,
            StepName::DenseCloud,
            StepName::Mesh,
            StepName::Texture,
            StepName::Dem,
            StepName::Orthomosaic,
            StepName::Export,
        ] {
            assert_eq!(outcome.outcome_for(step), Some(&ExecutionOutcome::Skipped));
            assert_eq!(store.step_status("job-1", step).unwrap(), Status::Pending);
        }
        assert_eq!(engine.calls("build_depth_maps"), 0);
        assert_eq!(engine.calls("build_mesh"), 0);
        assert_eq!(engine.calls("export_products"), 0);
    }

    #[test]
    fn test_filter_floor_bounds_removal() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let pipeline = Pipeline::new(Settings::standalone(), &store, &metrics);
        let mut engine = SimEngine::new();

        pipeline.run(&ctx(), &mut engine).unwrap();

        // Sim uncertainty scores run 0.05..=20.0 over 400 points; the 20%
        // percentile value (4.05) sits below the configured floor of 10.0,
        // so the cutoff is the floor and exactly the 200 points above 10.0
        // are removed — not 20% of the cloud.
        assert_eq!(
            metrics.step_metric("job-1", StepName::FilterUncertainty),
            Some(StepMetric::Count(200))
        );
    }

    #[test]
    fn test_georef_error_recomputed_along_the_run() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let pipeline = Pipeline::new(Settings::standalone(), &store, &metrics);
        let mut engine = SimEngine::new();

        let outcome = pipeline.run(&ctx(), &mut engine).unwrap();

        // Georeference + optimize + three filter passes.
        let history = metrics.georef_history("job-1");
        assert_eq!(history.len(), 5);
        // Optimization passes tighten the fit monotonically in the sim.
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(outcome.georef_error, Some(*history.last().unwrap()));
    }

    #[test]
    fn test_project_load_failure_escapes() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let pipeline = Pipeline::new(Settings::standalone(), &store, &metrics);
        let mut engine = SimEngine::new().fail_on("load_project");

        let err = pipeline.run(&ctx(), &mut engine);
        assert!(matches!(err, Err(PipelineError::ProjectLoad(_))));
        // No step was touched.
        assert_eq!(
            store.step_status("job-1", StepName::QualityFilter).unwrap(),
            Status::Pending
        );
    }

    #[test]
    fn test_store_failure_escapes() {
        struct BrokenStore;
        impl StatusStore for BrokenStore {
            fn step_status(
                &self,
                _job_id: &str,
                _step: StepName,
            ) -> Result<Status, StoreError> {
                Err(StoreError::Unavailable("disk full".to_string()))
            }
            fn set_step_status(
                &self,
                _job_id: &str,
                _step: StepName,
                _status: Status,
                _error: Option<&str>,
            ) -> Result<(), StoreError> {
                Err(StoreError::Unavailable("disk full".to_string()))
            }
        }

        let store = BrokenStore;
        let metrics = MemoryMetrics::new();
        let pipeline = Pipeline::new(Settings::standalone(), &store, &metrics);
        let mut engine = SimEngine::new();

        let err = pipeline.run(&ctx(), &mut engine);
        assert!(matches!(err, Err(PipelineError::Store(_))));
    }

    #[test]
    fn test_rerun_bypasses_settled_steps() {
        let store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let mut settings = Settings::standalone();
        // Keep the run to steps without cross-step engine state so a fresh
        // engine can be used for the second run.
        settings.steps.depth_maps = false;
        settings.steps.dense_cloud = false;
        settings.steps.mesh = false;
        settings.steps.texture = false;
        settings.steps.dem = false;
        settings.steps.orthomosaic = false;
        settings.steps.export = false;
        let pipeline = Pipeline::new(settings, &store, &metrics);

        let mut engine = SimEngine::new();
        pipeline.run(&ctx(), &mut engine).unwrap();
        assert_eq!(engine.calls("align_cameras"), 1);

        let mut engine2 = SimEngine::new();
        let outcome = pipeline.run(&ctx(), &mut engine2).unwrap();
        assert_eq!(engine2.calls("align_cameras"), 0);
        assert_eq!(engine2.calls("estimate_image_quality"), 0);
        assert_eq!(
            outcome.outcome_for(StepName::Alignment),
            Some(&ExecutionOutcome::AlreadyDone)
        );
    }
}
