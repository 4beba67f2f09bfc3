use std::process::ExitCode;

use anyhow::Result;
use isoprep_image::{
    FsFormat, OpticalImage, ReadImage, ReadOptions, boot::SECTOR_SIZE, preflight::Toolchain,
};
use tracing::error;

fn inspect(image: &str, udf: bool, joliet: bool) -> Result<()> {
    let image = OpticalImage::new(image)?;
    let toolchain = Toolchain::detect(udf)?;
    let options = ReadOptions {
        format: if udf { FsFormat::Udf } else { FsFormat::Iso9660 },
        ignore_joliet: !joliet,
    };

    let listing = toolchain.reader.list_entries(&image, &options)?;
    for directory in &listing.directories {
        println!("{directory}/");
    }
    for file in &listing.files {
        println!("{file}");
    }
    for link in &listing.symlinks {
        println!("{} -> {}", link.path, link.target);
    }

    match toolchain.reader.boot_metadata(&image)? {
        Some(boot) => println!(
            "El Torito boot image: sector {} ({} sectors of {SECTOR_SIZE} bytes, bytes {}..{})",
            boot.boot_sector,
            boot.sector_count,
            boot.byte_range().start,
            boot.byte_range().end
        ),
        None => println!("No El Torito boot image"),
    }
    Ok(())
}

pub fn run(cmd: super::Commands) -> ExitCode {
    match cmd {
        super::Commands::Inspect { image, udf, joliet } => match inspect(&image, udf, joliet) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = ?err, "Failed to inspect image");
                ExitCode::FAILURE
            }
        },
        _ => ExitCode::FAILURE,
    }
}
