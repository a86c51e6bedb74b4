//! Subprocess engine adapter.
//!
//! Talks to a headless engine runner over newline-delimited JSON on
//! stdin/stdout: one request line out, one response line back, strictly in
//! order. The runner wraps the vendor's scripting interface and is
//! configured per deployment (`engine.command` in the config file).

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{Engine, EngineError, FilterCriterion};
use crate::settings::{
    AlignmentSettings, BlendingMode, DenseCloudSettings, DepthMapSettings, ExportSettings,
    FaceCount, Interpolation, OptimizationSettings, ScalebarSpec,
};

#[derive(Serialize)]
struct Request<'a> {
    op: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

pub struct RemoteEngine {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl RemoteEngine {
    pub fn spawn(command: &str, args: &[String]) -> Result<Self, EngineError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(EngineError::Spawn)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            EngineError::Protocol("engine process has no stdin handle".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            EngineError::Protocol("engine process has no stdout handle".to_string())
        })?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn call(&mut self, op: &str, params: Value) -> Result<Value, EngineError> {
        let request = serde_json::to_string(&Request { op, params })
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        debug!(op, "engine request");
        writeln!(self.stdin, "{}", request)?;
        self.stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(EngineError::Protocol(
                "engine closed the stream".to_string(),
            ));
        }

        let response: Response = serde_json::from_str(line.trim())
            .map_err(|e| EngineError::Protocol(format!("bad response line: {}", e)))?;

        if response.ok {
            Ok(response.value)
        } else {
            Err(EngineError::Capability {
                op: op.to_string(),
                message: response
                    .error
                    .unwrap_or_else(|| "unspecified engine error".to_string()),
            })
        }
    }

    fn call_unit(&mut self, op: &str, params: Value) -> Result<(), EngineError> {
        self.call(op, params).map(|_| ())
    }

    fn call_count(&mut self, op: &str, params: Value) -> Result<u64, EngineError> {
        let value = self.call(op, params)?;
        value.as_u64().ok_or_else(|| {
            EngineError::Protocol(format!("{}: expected a count, got {}", op, value))
        })
    }

    fn call_bool(&mut self, op: &str, params: Value) -> Result<bool, EngineError> {
        let value = self.call(op, params)?;
        value.as_bool().ok_or_else(|| {
            EngineError::Protocol(format!("{}: expected a boolean, got {}", op, value))
        })
    }

    fn call_f64_list(&mut self, op: &str, params: Value) -> Result<Vec<f64>, EngineError> {
        let value = self.call(op, params)?;
        let items = value.as_array().ok_or_else(|| {
            EngineError::Protocol(format!("{}: expected an array, got {}", op, value))
        })?;
        items
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    EngineError::Protocol(format!("{}: non-numeric entry {}", op, v))
                })
            })
            .collect()
    }
}

impl Drop for RemoteEngine {
    fn drop(&mut self) {
        // Best effort: ask the runner to exit, then reap it.
        let _ = writeln!(self.stdin, r#"{{"op":"shutdown","params":null}}"#);
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

impl Engine for RemoteEngine {
    fn load_project(&mut self, location: &Path) -> Result<(), EngineError> {
        self.call_unit("load_project", json!({ "location": location }))
    }

    fn estimate_image_quality(&mut self, threshold: f64) -> Result<u64, EngineError> {
        self.call_count("estimate_image_quality", json!({ "threshold": threshold }))
    }

    fn align_cameras(&mut self, params: &AlignmentSettings) -> Result<u64, EngineError> {
        self.call_count(
            "align_cameras",
            json!({
                "keypoint_limit": params.keypoint_limit,
                "tiepoint_limit": params.tiepoint_limit,
                "generic_preselection": params.generic_preselection,
                "reference_preselection": params.reference_preselection,
            }),
        )
    }

    fn import_references(&mut self, crs_epsg: u32, targets: &Path) -> Result<u64, EngineError> {
        self.call_count(
            "import_references",
            json!({ "crs_epsg": crs_epsg, "targets": targets }),
        )
    }

    fn prune_markers(&mut self, min_projections: u32) -> Result<u64, EngineError> {
        self.call_count(
            "prune_markers",
            json!({ "min_projections": min_projections }),
        )
    }

    fn insert_scalebars(&mut self, bars: &[ScalebarSpec]) -> Result<u64, EngineError> {
        self.call_count("insert_scalebars", json!({ "scalebars": bars }))
    }

    fn align_region(&mut self) -> Result<(), EngineError> {
        self.call_unit("align_region", Value::Null)
    }

    fn optimize_cameras(&mut self, params: &OptimizationSettings) -> Result<(), EngineError> {
        self.call_unit(
            "optimize_cameras",
            serde_json::to_value(params).map_err(|e| EngineError::Protocol(e.to_string()))?,
        )
    }

    fn point_errors(&mut self, criterion: FilterCriterion) -> Result<Vec<f64>, EngineError> {
        self.call_f64_list("point_errors", json!({ "criterion": criterion.as_str() }))
    }

    fn remove_points(
        &mut self,
        criterion: FilterCriterion,
        threshold: f64,
    ) -> Result<u64, EngineError> {
        self.call_count(
            "remove_points",
            json!({ "criterion": criterion.as_str(), "threshold": threshold }),
        )
    }

    fn marker_residuals(&mut self) -> Result<Vec<f64>, EngineError> {
        self.call_f64_list("marker_residuals", Value::Null)
    }

    fn build_depth_maps(&mut self, params: &DepthMapSettings) -> Result<(), EngineError> {
        self.call_unit(
            "build_depth_maps",
            json!({
                "downscale": params.downscale,
                "filter_mode": params.filter_mode.as_str(),
                "reuse_depth": params.reuse_depth,
                "max_neighbors": params.max_neighbors,
            }),
        )
    }

    fn build_dense_cloud(&mut self, params: &DenseCloudSettings) -> Result<u64, EngineError> {
        self.call_count(
            "build_dense_cloud",
            json!({ "point_confidence": params.point_confidence }),
        )
    }

    fn build_mesh(&mut self, face_count: FaceCount) -> Result<u64, EngineError> {
        self.call_count("build_mesh", json!({ "face_count": face_count.as_str() }))
    }

    fn build_texture(&mut self, size: u32, ghosting_filter: bool) -> Result<(), EngineError> {
        self.call_unit(
            "build_texture",
            json!({ "size": size, "ghosting_filter": ghosting_filter }),
        )
    }

    fn build_dem(
        &mut self,
        interpolation: Interpolation,
        resolution: f64,
    ) -> Result<(), EngineError> {
        self.call_unit(
            "build_dem",
            json!({ "interpolation": interpolation.as_str(), "resolution": resolution }),
        )
    }

    fn build_orthomosaic(
        &mut self,
        blending: BlendingMode,
        hole_filling: bool,
    ) -> Result<(), EngineError> {
        self.call_unit(
            "build_orthomosaic",
            json!({ "blending": blending.as_str(), "hole_filling": hole_filling }),
        )
    }

    fn export_products(
        &mut self,
        location: &Path,
        formats: &ExportSettings,
    ) -> Result<bool, EngineError> {
        self.call_bool(
            "export_products",
            json!({
                "location": location,
                "model": formats.model,
                "report": formats.report,
                "orthomosaic": formats.orthomosaic,
                "dem": formats.dem,
            }),
        )
    }
}
