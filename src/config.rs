use clap::Parser;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Command line surface of the masking pipeline.
///
/// Long option spellings are kept identical to the established tool so
/// existing invocations keep working.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "segmask",
    version,
    about = "Masks organelle segmentations against a cell boundary model \
             and rebuilds a merged 3D surface model"
)]
pub struct Cli {
    /// Volume file (MRC) the model and segmentations refer to.
    pub volume: PathBuf,

    /// Cell boundary model file.
    pub model: PathBuf,

    /// Directory containing one segmentation raster per slice, sorted to
    /// match ascending Z order.
    pub seg_dir: PathBuf,

    /// Color to assign to all output objects, as comma-separated R,G,B
    /// values in [0,1]. E.g. "1,0,0".
    #[arg(long, value_name = "R,G,B")]
    pub color: Option<String>,

    /// Remove every output object whose contour count is less than or
    /// equal to this value. 0 disables filtering.
    #[arg(long = "filterByNContours", value_name = "INT", default_value_t = 0)]
    pub filter_by_ncontours: usize,

    /// Point-shaving tolerance passed to the auto-segmentation step
    /// (its -R flag). Must lie in [0,1]; 0 disables shaving.
    #[arg(long = "imodautor", value_name = "FLOAT", default_value_t = 0.0)]
    pub imodautor: f64,

    /// Gaussian sigma for kernel smoothing of the segmentation image
    /// before auto-contouring (the -k flag). Off when omitted.
    #[arg(long = "imodautok", value_name = "FLOAT")]
    pub imodautok: Option<f64>,

    /// Merge all masked objects into one final object.
    #[arg(long = "mergeAll")]
    pub merge_all: bool,

    /// Name to assign to all output objects. E.g. "mitochondrion".
    #[arg(long, value_name = "STRING")]
    pub name: Option<String>,

    /// Output path to save to. Defaults to the current directory.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Interpolate missing contours in the cell model before masking.
    #[arg(long = "runImodfillin")]
    pub run_imodfillin: bool,

    /// Run the remesh/split/filter postprocessing routine on the masked
    /// output.
    #[arg(long = "runPostprocessing")]
    pub run_postprocessing: bool,

    /// Slices to skip when interpolating missing contours of the cell
    /// trace (passed to the remesh -P flag).
    #[arg(long = "slicesToSkipCell", value_name = "INT", default_value_t = 10)]
    pub slices_to_skip_cell: u32,

    /// Slices to skip when meshing the final masked result.
    #[arg(long = "slicesToSkipOrganelle", value_name = "INT", default_value_t = 4)]
    pub slices_to_skip_organelle: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{} is not a valid file.", .0.display())]
    NotAFile(PathBuf),

    #[error("The path {} does not exist", .0.display())]
    NotADirectory(PathBuf),

    #[error("The output path {} does not exist.", .0.display())]
    OutputMissing(PathBuf),

    #[error("There is already a folder with the name tmp in the output path {}", .0.display())]
    TmpExists(PathBuf),

    #[error("imodautor must lie in [0,1], got {0}")]
    ShaveToleranceRange(f64),

    #[error("imodautok must be positive, got {0}")]
    SmoothingSigmaRange(f64),

    #[error("color must be three comma-separated values in [0,1], got '{0}'")]
    BadColor(String),

    #[error("cannot determine current directory: {0}")]
    CurrentDir(#[from] std::io::Error),
}

/// Validated, typed run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub volume: PathBuf,
    pub model: PathBuf,
    pub seg_dir: PathBuf,
    pub output: PathBuf,
    pub color: Option<[f64; 3]>,
    pub object_name: Option<String>,
    pub filter_by_ncontours: usize,
    pub shave_tolerance: f64,
    pub smoothing_sigma: Option<f64>,
    pub merge_all: bool,
    pub run_fillin: bool,
    pub run_postprocessing: bool,
    pub cell_stride: u32,
    pub organelle_stride: u32,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Config, ConfigError> {
        if !cli.volume.is_file() {
            return Err(ConfigError::NotAFile(cli.volume));
        }
        if !cli.model.is_file() {
            return Err(ConfigError::NotAFile(cli.model));
        }
        if !cli.seg_dir.is_dir() {
            return Err(ConfigError::NotADirectory(cli.seg_dir));
        }

        if !(0.0..=1.0).contains(&cli.imodautor) {
            return Err(ConfigError::ShaveToleranceRange(cli.imodautor));
        }
        if let Some(sigma) = cli.imodautok {
            if sigma <= 0.0 {
                return Err(ConfigError::SmoothingSigmaRange(sigma));
            }
        }

        let color = cli.color.as_deref().map(parse_color).transpose()?;

        let output = match cli.output {
            Some(path) => path,
            None => env::current_dir()?,
        };
        if !output.is_dir() {
            return Err(ConfigError::OutputMissing(output));
        }
        if output.join("tmp").is_dir() {
            return Err(ConfigError::TmpExists(output));
        }

        Ok(Config {
            volume: cli.volume,
            model: cli.model,
            seg_dir: cli.seg_dir,
            output,
            color,
            object_name: cli.name,
            filter_by_ncontours: cli.filter_by_ncontours,
            shave_tolerance: cli.imodautor,
            smoothing_sigma: cli.imodautok,
            merge_all: cli.merge_all,
            run_fillin: cli.run_imodfillin,
            run_postprocessing: cli.run_postprocessing,
            cell_stride: cli.slices_to_skip_cell,
            organelle_stride: cli.slices_to_skip_organelle,
        })
    }

    /// Process-scoped working directory for intermediate slice artifacts.
    pub fn tmp_dir(&self) -> PathBuf {
        self.output.join("tmp")
    }
}

fn parse_color(raw: &str) -> Result<[f64; 3], ConfigError> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 3 {
        return Err(ConfigError::BadColor(raw.to_string()));
    }

    let mut rgb = [0.0_f64; 3];
    for (slot, part) in rgb.iter_mut().zip(&parts) {
        let value: f64 = part
            .trim()
            .parse()
            .map_err(|_| ConfigError::BadColor(raw.to_string()))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::BadColor(raw.to_string()));
        }
        *slot = value;
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs::File;
    use tempfile::tempdir;

    fn base_cli(volume: PathBuf, model: PathBuf, seg_dir: PathBuf, output: PathBuf) -> Cli {
        Cli {
            volume,
            model,
            seg_dir,
            color: None,
            filter_by_ncontours: 0,
            imodautor: 0.0,
            imodautok: None,
            merge_all: false,
            name: None,
            output: Some(output),
            run_imodfillin: false,
            run_postprocessing: false,
            slices_to_skip_cell: 10,
            slices_to_skip_organelle: 4,
        }
    }

    fn scratch_inputs(dir: &std::path::Path) -> (PathBuf, PathBuf, PathBuf) {
        let volume = dir.join("stack.mrc");
        let model = dir.join("cell.mod");
        let seg = dir.join("seg");
        File::create(&volume).unwrap();
        File::create(&model).unwrap();
        std::fs::create_dir(&seg).unwrap();
        (volume, model, seg)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn accepts_valid_paths() {
        let dir = tempdir().unwrap();
        let (volume, model, seg) = scratch_inputs(dir.path());
        let cli = base_cli(volume, model, seg, dir.path().to_path_buf());
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.tmp_dir(), dir.path().join("tmp"));
        assert_eq!(cfg.cell_stride, 10);
        assert_eq!(cfg.organelle_stride, 4);
    }

    #[test]
    fn rejects_missing_volume() {
        let dir = tempdir().unwrap();
        let (_, model, seg) = scratch_inputs(dir.path());
        let cli = base_cli(
            dir.path().join("missing.mrc"),
            model,
            seg,
            dir.path().to_path_buf(),
        );
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::NotAFile(_))
        ));
    }

    #[test]
    fn rejects_segmentation_path_that_is_a_file() {
        let dir = tempdir().unwrap();
        let (volume, model, _) = scratch_inputs(dir.path());
        let cli = base_cli(volume, model.clone(), model, dir.path().to_path_buf());
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::NotADirectory(_))
        ));
    }

    #[test]
    fn rejects_preexisting_tmp_dir() {
        let dir = tempdir().unwrap();
        let (volume, model, seg) = scratch_inputs(dir.path());
        std::fs::create_dir(dir.path().join("tmp")).unwrap();
        let cli = base_cli(volume, model, seg, dir.path().to_path_buf());
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::TmpExists(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_shave_tolerance() {
        let dir = tempdir().unwrap();
        let (volume, model, seg) = scratch_inputs(dir.path());
        let mut cli = base_cli(volume, model, seg, dir.path().to_path_buf());
        cli.imodautor = 1.5;
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::ShaveToleranceRange(_))
        ));
    }

    #[test]
    fn parses_color_triple() {
        assert_eq!(parse_color("1,0,0").unwrap(), [1.0, 0.0, 0.0]);
        assert_eq!(parse_color("0.5, 0.25, 1").unwrap(), [0.5, 0.25, 1.0]);
    }

    #[test]
    fn rejects_malformed_color() {
        assert!(parse_color("1,0").is_err());
        assert!(parse_color("1,0,blue").is_err());
        assert!(parse_color("2,0,0").is_err());
    }
}
