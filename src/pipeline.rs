use anyhow::{ensure, Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::mrc::{self, MrcDims};
use crate::points::{self, PointRecord};
use crate::raster;
use crate::tools::{self, ModelWriteOptions};

/// Contours one slice contributed to the accumulator: the slice-local
/// records and the contour count taken from the listing's last line.
struct SliceContours {
    records: Vec<PointRecord>,
    contours: usize,
}

/// Runs the full masking pipeline: preprocess the cell model, mask each
/// occupied slice against the organelle segmentation, accumulate the
/// renumbered contours, assemble the merged model and optionally
/// postprocess it. Strictly sequential; the accumulator offset is an
/// ordered fold over the slice outcomes.
pub fn run(cfg: &Config) -> Result<()> {
    let tmp = cfg.tmp_dir();
    fs::create_dir(&tmp)
        .with_context(|| format!("creating temporary directory {}", tmp.display()))?;

    info!("Loading model file {}", cfg.model.display());
    let cell_model = tmp.join("cell.mod");
    fs::copy(&cfg.model, &cell_model)
        .with_context(|| format!("copying {} into the working directory", cfg.model.display()))?;

    if cfg.run_fillin {
        info!("Interpolating missing contours (stride {})...", cfg.cell_stride);
        tools::strip_mesh(&cell_model)?;
        tools::remesh(&cell_model, cfg.cell_stride)?;
        tools::fill_in(&cell_model)?;
    }

    let mut model = tools::load_model(&cell_model, &tmp)
        .context("loading the cell model through the point converter")?;

    info!("Removing small contours and reordering...");
    let contours_before = model.objects.first().map_or(0, |o| o.n_contours());
    model.remove_small_contours();
    if let Some(first) = model.objects.first_mut() {
        first.sort_contours();
    }
    let contours_after = model.objects.first().map_or(0, |o| o.n_contours());
    info!("# Contours before: {contours_before}");
    info!("# Contours after: {contours_after}");

    let zrange = model.derive_z_range()?;
    info!("Z min: {}", zrange.zmin);
    info!("Z max: {}", zrange.zmax);

    let dims = mrc::read_dims(&cfg.volume)?;
    let files_org = list_segmentation_files(&cfg.seg_dir)?;

    // The masking tool reads the pruned model from disk.
    tools::write_model(&model, &cell_model, ModelWriteOptions::default(), &tmp)
        .context("writing the preprocessed cell model")?;

    let out_listing = tmp.join("out.txt");
    let mut offset = 0usize;
    for &zi in &zrange.zlist {
        info!("Processing Z = {zi}");
        let outcome = process_slice(cfg, &tmp, &cell_model, &files_org, &dims, zi)
            .with_context(|| format!("processing slice Z = {zi}"))?;
        if let Some(slice) = outcome {
            points::append_listing(&out_listing, &points::renumber(&slice.records, offset))?;
            offset += slice.contours;
        }
    }
    fs::remove_file(&cell_model)
        .with_context(|| format!("removing {}", cell_model.display()))?;

    ensure!(
        out_listing.is_file(),
        "no contours were produced by any slice; nothing to assemble"
    );
    let out_model = tmp.join("out.mod");
    tools::points_to_model(
        &out_listing,
        &out_model,
        ModelWriteOptions {
            image: Some(&cfg.volume),
            ..Default::default()
        },
    )
    .context("assembling the final model")?;
    info!("Assembled model written to {}", out_model.display());

    if cfg.run_postprocessing {
        postprocess(cfg, &tmp, &out_model)?;
    }

    Ok(())
}

/// Sorted listing of the segmentation directory; lexicographic order is
/// the file-layout contract for ascending Z.
fn list_segmentation_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("listing segmentation directory {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    ensure!(
        !files.is_empty(),
        "segmentation directory {} contains no files",
        dir.display()
    );
    files.sort();
    Ok(files)
}

/// Maps a 1-based slice Z to its segmentation file index, rejecting Z
/// values the file set cannot cover.
fn segmentation_index(z: i32, n_files: usize) -> Result<usize> {
    ensure!(
        z >= 1 && (z as usize) <= n_files,
        "slice Z = {} has no segmentation raster ({} files available)",
        z,
        n_files
    );
    Ok(z as usize - 1)
}

/// Masks one slice: renders the cell mask, intersects it with the
/// organelle segmentation, re-extracts contours and translates them to
/// the absolute slice. Every intermediate artifact is deleted as soon
/// as it has been consumed. Returns None when the slice produced no
/// contour points.
fn process_slice(
    cfg: &Config,
    tmp: &Path,
    cell_model: &Path,
    files_org: &[PathBuf],
    dims: &MrcDims,
    zi: i32,
) -> Result<Option<SliceContours>> {
    let org_path = &files_org[segmentation_index(zi, files_org.len())?];

    let stem = tmp.join(format!("{zi:04}"));
    let slice_mrc = stem.with_extension("mrc");
    let slice_tif = stem.with_extension("tif");
    let slice_model = stem.with_extension("mod");
    let slice_listing = stem.with_extension("txt");

    tools::mask_slice(cell_model, &cfg.volume, &slice_mrc, zi)?;
    tools::mrc_to_tif(&slice_mrc, &slice_tif)?;
    fs::remove_file(&slice_mrc)
        .with_context(|| format!("removing {}", slice_mrc.display()))?;

    let cell_img = raster::load_gray(&slice_tif)?;
    let org_img = raster::load_gray(org_path)?;
    let cell_img = raster::ensure_dims(cell_img, dims.nrow as u32, dims.ncol as u32);
    let org_img = raster::ensure_dims(org_img, dims.nrow as u32, dims.ncol as u32);

    let mask = raster::intersect(&cell_img, &org_img)?;
    raster::save_mask(&mask, &slice_tif)?;

    tools::auto_contour(
        &slice_tif,
        &slice_model,
        cfg.shave_tolerance,
        cfg.smoothing_sigma,
    )?;
    fs::remove_file(&slice_tif)
        .with_context(|| format!("removing {}", slice_tif.display()))?;

    tools::translate_z(&slice_model, zi - 1)?;
    tools::model_to_points(&slice_model, &slice_listing)?;
    fs::remove_file(&slice_model)
        .with_context(|| format!("removing {}", slice_model.display()))?;

    let text = fs::read_to_string(&slice_listing)
        .with_context(|| format!("reading {}", slice_listing.display()))?;
    fs::remove_file(&slice_listing)
        .with_context(|| format!("removing {}", slice_listing.display()))?;

    let records = points::parse_listing(&text)?;
    if records.is_empty() {
        return Ok(None);
    }
    let contours = points::contour_count(&records);
    Ok(Some(SliceContours { records, contours }))
}

/// Remeshes the assembled model, splits it by 3D connectivity and
/// applies the optional filter/merge/color/name edits. The assembled
/// model file itself is left untouched.
fn postprocess(cfg: &Config, tmp: &Path, out_model: &Path) -> Result<()> {
    info!("Running postprocessing...");
    let post = tmp.join("out_postprocessed.mod");
    fs::copy(out_model, &post)
        .with_context(|| format!("copying {} for postprocessing", out_model.display()))?;

    tools::strip_mesh(&post)?;
    tools::remesh(&post, cfg.organelle_stride)?;
    tools::sort_surfaces(&post)?;

    let needs_edit = cfg.filter_by_ncontours > 0
        || cfg.merge_all
        || cfg.color.is_some()
        || cfg.object_name.is_some();
    if needs_edit {
        let mut model = tools::load_model(&post, tmp)
            .context("loading the split model for filtering")?;

        if cfg.filter_by_ncontours > 0 {
            let before = model.n_objects();
            model.filter_by_contour_count(cfg.filter_by_ncontours);
            info!(
                "Filtered objects by contour count: {} -> {}",
                before,
                model.n_objects()
            );
            ensure!(
                model.n_objects() > 0,
                "filtering by {} contours removed every object",
                cfg.filter_by_ncontours
            );
        }
        if cfg.merge_all {
            model.merge_objects();
        }

        tools::write_model(
            &model,
            &post,
            ModelWriteOptions {
                image: Some(&cfg.volume),
                color: cfg.color,
                name: cfg.object_name.as_deref(),
            },
            tmp,
        )
        .context("writing the postprocessed model")?;
    }

    tools::strip_mesh(&post)?;
    tools::remesh(&post, cfg.organelle_stride)?;
    info!("Postprocessed model written to {}", post.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn segmentation_files_come_back_sorted() {
        let dir = tempdir().unwrap();
        for name in ["slice_0003.png", "slice_0001.png", "slice_0002.png"] {
            File::create(dir.path().join(name)).unwrap();
        }
        // subdirectories are not slice rasters
        fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_segmentation_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["slice_0001.png", "slice_0002.png", "slice_0003.png"]);
    }

    #[test]
    fn empty_segmentation_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(list_segmentation_files(dir.path()).is_err());
    }

    #[test]
    fn segmentation_index_maps_one_based_z() {
        assert_eq!(segmentation_index(1, 3).unwrap(), 0);
        assert_eq!(segmentation_index(3, 3).unwrap(), 2);
    }

    #[test]
    fn segmentation_index_rejects_out_of_range_z() {
        assert!(segmentation_index(0, 3).is_err());
        assert!(segmentation_index(4, 3).is_err());
        assert!(segmentation_index(-2, 3).is_err());
    }
}
