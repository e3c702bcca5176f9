use anyhow::{ensure, Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use std::path::Path;

/// Loads a raster and collapses it to 8-bit grayscale. Mask semantics
/// downstream only distinguish zero from non-zero.
pub fn load_gray(path: &Path) -> Result<GrayImage> {
    let img = image::open(path).with_context(|| format!("reading raster {}", path.display()))?;
    Ok(img.into_luma8())
}

/// Resizes to the volume's native shape when the raster disagrees with
/// it, nearest-neighbour so mask labels stay crisp. Identity when the
/// shape already matches.
pub fn ensure_dims(img: GrayImage, nrow: u32, ncol: u32) -> GrayImage {
    if img.height() != nrow || img.width() != ncol {
        imageops::resize(&img, ncol, nrow, FilterType::Nearest)
    } else {
        img
    }
}

/// Elementwise logical AND of two equally shaped masks: 255 where both
/// inputs are non-zero, 0 elsewhere. The auto-segmentation step selects
/// exactly the 255 level.
pub fn intersect(cell: &GrayImage, org: &GrayImage) -> Result<GrayImage> {
    ensure!(
        cell.dimensions() == org.dimensions(),
        "mask shape mismatch: cell {:?} vs organelle {:?}",
        cell.dimensions(),
        org.dimensions()
    );
    let (width, height) = cell.dimensions();
    Ok(GrayImage::from_fn(width, height, |x, y| {
        if cell.get_pixel(x, y)[0] != 0 && org.get_pixel(x, y)[0] != 0 {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    }))
}

/// Writes the 8-bit intersection mask, overwriting any existing file.
pub fn save_mask(img: &GrayImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("writing mask raster {}", path.display()))
}
