use std::{path::Path, process::ExitCode};

use anyhow::Result;
use isoprep_image::{ImageKind, OpticalImage, preflight::Toolchain};
use tracing::{debug, error, info};

use crate::{
    config::{BuildConfig, ConfigPath, resolve_path},
    installer::{InstallerImage, InstallerRecipe},
};

/// Find and load the configuration in a context directory, logging why
/// when that fails.
pub(super) fn load_config(path: &str) -> Option<BuildConfig> {
    let config_path = match ConfigPath::from_dir(path) {
        Some(p) => {
            debug!("Loading config from {}", p);
            p
        }
        _ => {
            error!(context = path, "Failed to find config file");
            return None;
        }
    };

    match config_path.load() {
        Ok(config) => {
            debug!("Loaded: {:#?}", &config);
            Some(config)
        }
        Err(error) => {
            error!("Failed to load config: {:?}", error);
            None
        }
    }
}

fn build(context: &Path, config: &BuildConfig, output: Option<&str>) -> Result<OpticalImage> {
    let answer = config.answer_file(context)?;
    let installer = config.installer();

    let source = OpticalImage::new(resolve_path(context, &config.source))?;
    let image = InstallerImage::new(source, installer)?;

    let toolchain = Toolchain::detect(image.installer.image_kind() == ImageKind::Udf)?;
    let dest = match output {
        Some(output) => Some(Path::new(output).to_path_buf()),
        None => config
            .output
            .as_ref()
            .map(|output| resolve_path(context, output)),
    };

    image.clone_with_auto_booting_answer_file(
        &answer,
        dest.as_deref(),
        config.read_tolerance,
        &toolchain.reader,
        &toolchain.writer,
    )
}

pub fn run(cmd: super::Commands) -> ExitCode {
    match cmd {
        super::Commands::Build { output, path, .. } => {
            let Some(config) = load_config(&path) else {
                return ExitCode::FAILURE;
            };

            match build(Path::new(&path), &config, output.as_deref()) {
                Ok(image) => {
                    info!(image = %image, "Built installer image");
                    println!("{image}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    error!(error = ?err, "Failed to build image");
                    ExitCode::FAILURE
                }
            }
        }
        _ => ExitCode::FAILURE,
    }
}
