use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use fotopipe::config::{Config, EngineKind, RunMode};
use fotopipe::db::{self, Database, DbMetrics, DbStatusStore};
use fotopipe::engine::{Engine, RemoteEngine, SimEngine};
use fotopipe::pipeline::{JobContext, MemoryMetrics, MemoryStatusStore, Pipeline};
use fotopipe::queue::{DbJobSource, ProjectScanner, QueueDriver};
use fotopipe::settings::Settings;
use fotopipe::{FotopipeError, Result};

const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    init_logging();

    info!("Starting fotopipe v{}", SOFTWARE_VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (mode_override, config_path) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("Usage: fotopipe [db|standalone] [--config <path>]");
            std::process::exit(2);
        }
    };

    let mut config = match load_or_default_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(mode) = mode_override {
        config.mode = mode;
    }

    let outcome = match config.mode {
        RunMode::Db => run_db_mode(&config),
        RunMode::Standalone => run_standalone_mode(&config),
    };

    if let Err(e) = outcome {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    // Route `log` macros (database layer) through tracing.
    let _ = tracing_log::LogTracer::init();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn parse_args(args: &[String]) -> std::result::Result<(Option<RunMode>, Option<PathBuf>), String> {
    let mut mode = None;
    let mut config_path = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "db" => mode = Some(RunMode::Db),
            "standalone" => mode = Some(RunMode::Standalone),
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| "--config requires a path".to_string())?;
                config_path = Some(PathBuf::from(path));
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    Ok((mode, config_path))
}

fn load_or_default_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Ok(fotopipe::load_config(path)?),
        None => {
            let default_path = dirs::home_dir().map(|h| h.join(".fotopipe").join("config.json"));
            match default_path {
                Some(ref path) if path.exists() => Ok(fotopipe::load_config(path)?),
                _ => Ok(Config::default()),
            }
        }
    }
}

fn build_engine(config: &Config) -> Result<Box<dyn Engine>> {
    match config.engine.kind {
        EngineKind::Sim => {
            warn!("Using the simulated engine; no real reconstruction will happen");
            Ok(Box::new(SimEngine::new()))
        }
        EngineKind::Remote => {
            let command = config
                .engine
                .command
                .as_deref()
                .expect("validated at config load");
            info!("Launching engine runner: {}", command);
            let engine = RemoteEngine::spawn(command, &config.engine.args)?;
            Ok(Box::new(engine))
        }
    }
}

fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Could not install interrupt handler: {}", e);
    }
    flag
}

/// Drains the database-backed job queue, then exits.
fn run_db_mode(config: &Config) -> Result<()> {
    let db_path = match config.database_path {
        Some(ref path) => PathBuf::from(path),
        None => db::default_database_path().ok_or_else(|| {
            FotopipeError::Config(fotopipe::ConfigError::Validation {
                message: "no database_path configured and no home directory".to_string(),
            })
        })?,
    };

    let database = Database::open(&db_path)?;
    let mut engine = build_engine(config)?;
    let source = DbJobSource::new(database.clone());
    let status_store = DbStatusStore::new(database.clone());
    let driver = QueueDriver::with_interrupt(&source, interrupt_flag());

    let summary = driver.run(|job| {
        let ctx = JobContext::new(&job.id, &job.location);

        // Settings are resolved once here and never re-read mid-job.
        let settings =
            db::settings_repo::resolve(&database, &job.id, job.settings_group)?;

        let now = chrono::Utc::now().to_rfc3339();
        let processing_id =
            db::processing_repo::ensure(&database, &job.id, SOFTWARE_VERSION, &now)?;
        let metrics = DbMetrics::new(database.clone(), processing_id);

        let pipeline = Pipeline::new(settings, &status_store, &metrics);
        Ok(pipeline.run(&ctx, engine.as_mut())?)
    })?;

    info!(
        "Queue drained: {} processed, {} failed. Exiting.",
        summary.processed, summary.failed
    );
    Ok(())
}

/// Processes every project under `project_root` with built-in settings.
fn run_standalone_mode(config: &Config) -> Result<()> {
    let root = config
        .project_root
        .as_deref()
        .expect("validated at config load");
    let settings = config.settings.clone().unwrap_or_else(Settings::standalone);

    let mut engine = build_engine(config)?;
    let projects = ProjectScanner::new(root).scan()?;
    if projects.is_empty() {
        info!("No projects found under {}", root);
        return Ok(());
    }

    let mut failed = 0u64;
    for project in &projects {
        let ctx = JobContext::new(uuid::Uuid::new_v4().to_string(), &project.path);
        info!(
            "Processing project {} ({} photos)",
            project.name, project.photo_count
        );

        let status_store = MemoryStatusStore::new();
        let metrics = MemoryMetrics::new();
        let pipeline = Pipeline::new(settings.clone(), &status_store, &metrics);

        match pipeline.run(&ctx, engine.as_mut()) {
            Ok(outcome) => {
                if let Some(summary) = outcome.failure_summary() {
                    warn!("Project {}: {}", project.name, summary);
                    failed += 1;
                } else if let Some(error_m) = outcome.georef_error {
                    info!(
                        "Project {} completed, georeferencing error {:.4} m",
                        project.name, error_m
                    );
                } else {
                    info!("Project {} completed", project.name);
                }
            }
            Err(e) => {
                error!("Project {} failed: {}", project.name, e);
                failed += 1;
            }
        }
    }

    info!(
        "Processed {} projects, {} with failures. Exiting.",
        projects.len(),
        failed
    );
    Ok(())
}
