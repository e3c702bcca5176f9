use anyhow::{Context, Result};
use log::debug;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::model::Model;
use crate::points;

/// Failure of an external toolchain invocation. Every invocation is
/// blocking, has no retry, and a non-zero exit aborts the run.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

fn arg(value: impl AsRef<OsStr>) -> OsString {
    value.as_ref().to_os_string()
}

/// Runs an external tool to completion with captured output. Stdout is
/// surfaced at debug level; a non-zero exit becomes a structured error
/// carrying the captured stderr.
pub fn run(program: &str, args: &[OsString]) -> Result<(), ToolError> {
    debug!(
        "{} {}",
        program,
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ToolError::Launch {
            program: program.to_string(),
            source,
        })?;

    if !output.stdout.is_empty() {
        debug!("{}: {}", program, String::from_utf8_lossy(&output.stdout).trim_end());
    }

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Renders a single-slice binary mask volume of the cell model at `z`.
pub fn mask_slice(cell_model: &Path, volume: &Path, out: &Path, z: i32) -> Result<()> {
    let zrange = format!("{z},{z}");
    run(
        "imodmop",
        &[
            arg("-mask"),
            arg("1"),
            arg("-zminmax"),
            arg(zrange),
            arg(cell_model),
            arg(volume),
            arg(out),
        ],
    )?;
    Ok(())
}

/// Converts a single-slice mask volume to a standard raster.
pub fn mrc_to_tif(mrc: &Path, tif: &Path) -> Result<()> {
    run("mrc2tif", &[arg(mrc), arg(tif)])?;
    Ok(())
}

/// Extracts contours from the intersection raster. `-E 255` selects
/// exactly the level the mask writer emits; shaving and smoothing come
/// from the user options.
pub fn auto_contour(
    tif: &Path,
    out_model: &Path,
    shave_tolerance: f64,
    smoothing_sigma: Option<f64>,
) -> Result<()> {
    let mut args = vec![
        arg("-E"),
        arg("255"),
        arg("-u"),
        arg("-R"),
        arg(shave_tolerance.to_string()),
    ];
    if let Some(sigma) = smoothing_sigma {
        args.push(arg("-k"));
        args.push(arg(sigma.to_string()));
    }
    args.push(arg(tif));
    args.push(arg(out_model));
    run("imodauto", &args)?;
    Ok(())
}

/// Translates a model along Z, in place, and discards the backup
/// sidecar the tool leaves behind.
pub fn translate_z(model: &Path, dz: i32) -> Result<()> {
    run(
        "imodtrans",
        &[arg("-tz"), arg(dz.to_string()), arg(model), arg(model)],
    )?;

    let mut sidecar = model.as_os_str().to_os_string();
    sidecar.push("~");
    match fs::remove_file(PathBuf::from(sidecar)) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("removing backup of {}", model.display()))
        }
    }
    Ok(())
}

/// Converts a model to a flat per-object point listing.
pub fn model_to_points(model: &Path, listing: &Path) -> Result<()> {
    run("model2point", &[arg("-object"), arg(model), arg(listing)])?;
    Ok(())
}

/// Options for the point-to-model conversion. Color components are in
/// [0,1] and scaled to the byte range the converter expects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelWriteOptions<'a> {
    pub image: Option<&'a Path>,
    pub color: Option<[f64; 3]>,
    pub name: Option<&'a str>,
}

/// Builds a model file from a point listing.
pub fn points_to_model(listing: &Path, model: &Path, opts: ModelWriteOptions) -> Result<()> {
    let mut args = Vec::new();
    if let Some(image) = opts.image {
        args.push(arg("-image"));
        args.push(arg(image));
    }
    if let Some([r, g, b]) = opts.color {
        args.push(arg("-color"));
        args.push(arg(format!(
            "{},{},{}",
            scale_color(r),
            scale_color(g),
            scale_color(b)
        )));
    }
    if let Some(name) = opts.name {
        args.push(arg("-name"));
        args.push(arg(name));
    }
    args.push(arg(listing));
    args.push(arg(model));
    run("point2model", &args)?;
    Ok(())
}

fn scale_color(component: f64) -> u8 {
    (component.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Removes existing mesh data from a model file, in place.
pub fn strip_mesh(model: &Path) -> Result<()> {
    run("imodmesh", &[arg("-e"), arg(model), arg(model)])?;
    Ok(())
}

/// Regenerates the surface mesh, skipping across `stride` slices to
/// limit density.
pub fn remesh(model: &Path, stride: u32) -> Result<()> {
    run(
        "imodmesh",
        &[
            arg("-CTs"),
            arg("-P"),
            arg(stride.to_string()),
            arg(model),
            arg(model),
        ],
    )?;
    Ok(())
}

/// Interpolates missing contours into the first object, appending to
/// the contours already present.
pub fn fill_in(model: &Path) -> Result<()> {
    run("imodfillin", &[arg("-e"), arg(model), arg(model)])?;
    Ok(())
}

/// Splits meshed geometry into separate objects by 3D connectivity.
pub fn sort_surfaces(model: &Path) -> Result<()> {
    run("imodsortsurf", &[arg("-s"), arg(model), arg(model)])?;
    Ok(())
}

/// Loads a model file into memory by round-tripping through the point
/// converter; `scratch_dir` hosts the transient listing.
pub fn load_model(model: &Path, scratch_dir: &Path) -> Result<Model> {
    let listing = scratch_dir.join("model_points.txt");
    model_to_points(model, &listing)?;
    let text = fs::read_to_string(&listing)
        .with_context(|| format!("reading point listing {}", listing.display()))?;
    fs::remove_file(&listing)
        .with_context(|| format!("removing point listing {}", listing.display()))?;
    let records = points::parse_listing(&text)
        .with_context(|| format!("parsing point listing of {}", model.display()))?;
    Ok(Model::from_records(&records))
}

/// Writes an in-memory model back to a model file through the point
/// converter.
pub fn write_model(
    model: &Model,
    path: &Path,
    opts: ModelWriteOptions,
    scratch_dir: &Path,
) -> Result<()> {
    let listing = scratch_dir.join("model_points.txt");
    fs::write(&listing, points::format_records(&model.to_records()))
        .with_context(|| format!("writing point listing {}", listing.display()))?;
    let result = points_to_model(&listing, path, opts);
    fs::remove_file(&listing)
        .with_context(|| format!("removing point listing {}", listing.display()))?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_reports_success() {
        assert!(run("true", &[]).is_ok());
    }

    #[test]
    fn nonzero_exit_becomes_failed_error() {
        let err = run("sh", &[arg("-c"), arg("echo boom >&2; exit 3")]).unwrap_err();
        match err {
            ToolError::Failed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn missing_program_becomes_launch_error() {
        let err = run("definitely-not-a-real-tool", &[]).unwrap_err();
        assert!(matches!(err, ToolError::Launch { .. }));
    }

    #[test]
    fn color_components_scale_to_bytes() {
        assert_eq!(scale_color(0.0), 0);
        assert_eq!(scale_color(1.0), 255);
        assert_eq!(scale_color(0.5), 128);
    }
}
