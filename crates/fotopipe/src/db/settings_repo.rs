//! Settings repository — resolves a job's settings group into a typed
//! `Settings` bundle, validated once at resolution time.

use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};

use crate::settings::{
    AlignmentSettings, BlendingMode, DemSettings, DenseCloudSettings, DepthFilter,
    DepthMapSettings, ExportSettings, FaceCount, FilterSettings, GeoreferenceSettings,
    Interpolation, MarkerSettings, MeshSettings, OptimizationSettings, OrthomosaicSettings,
    QualitySettings, ScalebarSpec, Settings, SettingsError, StepToggles, TextureSettings,
};

use super::{Database, DatabaseError};

/// Resolves the settings bundle for a job. Fails with `NoGroupLinked` /
/// `NotFound` before any step executes; the returned bundle is cached by
/// the caller for the remainder of the job.
pub fn resolve(
    db: &Database,
    job_id: &str,
    group: Option<i64>,
) -> Result<Settings, SettingsError> {
    let group = group.ok_or_else(|| SettingsError::NoGroupLinked(job_id.to_string()))?;
    let settings = find_by_group(db, group)?.ok_or(SettingsError::NotFound(group))?;
    settings.validate()?;
    Ok(settings)
}

/// Loads one settings group by id, or `None` if it does not exist.
pub fn find_by_group(db: &Database, group: i64) -> Result<Option<Settings>, SettingsError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM settings_groups WHERE id = ?1",
                params![group],
                settings_from_row,
            )
            .optional()?;
        Ok(row)
    })?;

    let Some(mut settings) = row else {
        return Ok(None);
    };

    let scalebars = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT marker_a, marker_b, distance_m FROM scalebars
             WHERE group_id = ?1 ORDER BY marker_a, marker_b",
        )?;
        let bars: Vec<ScalebarSpec> = stmt
            .query_map(params![group], |row| {
                Ok(ScalebarSpec {
                    marker_a: row.get(0)?,
                    marker_b: row.get(1)?,
                    distance_m: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bars)
    })?;
    settings.scalebars = scalebars;

    Ok(Some(settings))
}

/// Inserts a settings group, returning its id.
pub fn insert(db: &Database, name: &str, settings: &Settings) -> Result<i64, DatabaseError> {
    let optimization = serde_json::to_string(&settings.optimization)
        .expect("optimization settings serialize to JSON");

    let group = db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO settings_groups (
                name,
                enable_quality_filter, enable_alignment, enable_georeference,
                enable_prune_markers, enable_scalebars, enable_align_region,
                enable_optimize, enable_error_reduction, enable_depth_maps,
                enable_dense_cloud, enable_mesh, enable_texture, enable_dem,
                enable_orthomosaic, enable_export,
                quality_threshold, keypoint_limit, tiepoint_limit,
                generic_preselection, reference_preselection,
                crs_epsg, targets_file, min_marker_projections, optimization,
                uncertainty_percent, uncertainty_floor,
                projection_accuracy_percent, projection_accuracy_floor,
                reprojection_percent, reprojection_floor,
                depth_downscale, depth_filter, depth_reuse, depth_max_neighbors,
                dense_point_confidence, mesh_face_count,
                texture_size, texture_ghosting_filter,
                dem_interpolation, dem_resolution,
                ortho_blending, ortho_hole_filling,
                export_model, export_report, export_orthomosaic, export_dem
            ) VALUES (
                ?1,
                ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25,
                ?26, ?27, ?28, ?29, ?30, ?31,
                ?32, ?33, ?34, ?35, ?36, ?37, ?38, ?39, ?40, ?41, ?42, ?43,
                ?44, ?45, ?46, ?47
            )",
            params![
                name,
                settings.steps.quality_filter,
                settings.steps.alignment,
                settings.steps.georeference,
                settings.steps.prune_markers,
                settings.steps.scalebars,
                settings.steps.align_region,
                settings.steps.optimize,
                settings.steps.error_reduction,
                settings.steps.depth_maps,
                settings.steps.dense_cloud,
                settings.steps.mesh,
                settings.steps.texture,
                settings.steps.dem,
                settings.steps.orthomosaic,
                settings.steps.export,
                settings.quality.threshold,
                settings.alignment.keypoint_limit,
                settings.alignment.tiepoint_limit,
                settings.alignment.generic_preselection,
                settings.alignment.reference_preselection,
                settings.georeference.crs_epsg,
                settings.georeference.targets_file,
                settings.markers.min_projections,
                optimization,
                settings.uncertainty.percent,
                settings.uncertainty.floor,
                settings.projection_accuracy.percent,
                settings.projection_accuracy.floor,
                settings.reprojection.percent,
                settings.reprojection.floor,
                settings.depth_maps.downscale,
                settings.depth_maps.filter_mode.as_str(),
                settings.depth_maps.reuse_depth,
                settings.depth_maps.max_neighbors,
                settings.dense_cloud.point_confidence,
                settings.mesh.face_count.as_str(),
                settings.texture.size,
                settings.texture.ghosting_filter,
                settings.dem.interpolation.as_str(),
                settings.dem.resolution,
                settings.orthomosaic.blending.as_str(),
                settings.orthomosaic.hole_filling,
                settings.export.model,
                settings.export.report,
                settings.export.orthomosaic,
                settings.export.dem,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })?;

    db.with_conn(|conn| {
        for bar in &settings.scalebars {
            conn.execute(
                "INSERT INTO scalebars (group_id, marker_a, marker_b, distance_m)
                 VALUES (?1, ?2, ?3, ?4)",
                params![group, bar.marker_a, bar.marker_b, bar.distance_m],
            )?;
        }
        Ok(())
    })?;

    Ok(group)
}

fn settings_from_row(row: &Row<'_>) -> Result<Settings, rusqlite::Error> {
    let optimization_json: String = row.get("optimization")?;
    let optimization: OptimizationSettings = serde_json::from_str(&optimization_json)
        .unwrap_or_else(|_| OptimizationSettings::default());

    Ok(Settings {
        steps: StepToggles {
            quality_filter: row.get("enable_quality_filter")?,
            alignment: row.get("enable_alignment")?,
            georeference: row.get("enable_georeference")?,
            prune_markers: row.get("enable_prune_markers")?,
            scalebars: row.get("enable_scalebars")?,
            align_region: row.get("enable_align_region")?,
            optimize: row.get("enable_optimize")?,
            error_reduction: row.get("enable_error_reduction")?,
            depth_maps: row.get("enable_depth_maps")?,
            dense_cloud: row.get("enable_dense_cloud")?,
            mesh: row.get("enable_mesh")?,
            texture: row.get("enable_texture")?,
            dem: row.get("enable_dem")?,
            orthomosaic: row.get("enable_orthomosaic")?,
            export: row.get("enable_export")?,
        },
        quality: QualitySettings {
            threshold: row.get("quality_threshold")?,
        },
        alignment: AlignmentSettings {
            keypoint_limit: row.get("keypoint_limit")?,
            tiepoint_limit: row.get("tiepoint_limit")?,
            generic_preselection: row.get("generic_preselection")?,
            reference_preselection: row.get("reference_preselection")?,
        },
        georeference: GeoreferenceSettings {
            crs_epsg: row.get("crs_epsg")?,
            targets_file: row.get("targets_file")?,
        },
        markers: MarkerSettings {
            min_projections: row.get("min_marker_projections")?,
        },
        scalebars: Vec::new(),
        optimization,
        uncertainty: FilterSettings {
            percent: row.get("uncertainty_percent")?,
            floor: row.get("uncertainty_floor")?,
        },
        projection_accuracy: FilterSettings {
            percent: row.get("projection_accuracy_percent")?,
            floor: row.get("projection_accuracy_floor")?,
        },
        reprojection: FilterSettings {
            percent: row.get("reprojection_percent")?,
            floor: row.get("reprojection_floor")?,
        },
        depth_maps: DepthMapSettings {
            downscale: row.get("depth_downscale")?,
            filter_mode: parse_column(row, "depth_filter", DepthFilter::from_str)?,
            reuse_depth: row.get("depth_reuse")?,
            max_neighbors: row.get("depth_max_neighbors")?,
        },
        dense_cloud: DenseCloudSettings {
            point_confidence: row.get("dense_point_confidence")?,
        },
        mesh: MeshSettings {
            face_count: parse_column(row, "mesh_face_count", FaceCount::from_str)?,
        },
        texture: TextureSettings {
            size: row.get("texture_size")?,
            ghosting_filter: row.get("texture_ghosting_filter")?,
        },
        dem: DemSettings {
            interpolation: parse_column(row, "dem_interpolation", Interpolation::from_str)?,
            resolution: row.get("dem_resolution")?,
        },
        orthomosaic: OrthomosaicSettings {
            blending: parse_column(row, "ortho_blending", BlendingMode::from_str)?,
            hole_filling: row.get("ortho_hole_filling")?,
        },
        export: ExportSettings {
            model: row.get("export_model")?,
            report: row.get("export_report")?,
            orthomosaic: row.get("export_orthomosaic")?,
            dem: row.get("export_dem")?,
        },
    })
}

/// Parses a categorical TEXT column, surfacing bad values as a rusqlite
/// conversion error so they reach the caller instead of being defaulted.
fn parse_column<T>(
    row: &Row<'_>,
    column: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, rusqlite::Error> {
    let raw: String = row.get(column)?;
    parse(&raw).map_err(|reason| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, reason)),
        )
    })
}
