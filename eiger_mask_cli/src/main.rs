//! # eiger_mask_cli
//!
//! Part of the eiger_debug crate family.
//!
//! Pixel mask tools for EIGER detectors.
//!
//! ## Use
//!
//! ```bash
//! # Assemble the full-sensor mask of a calibration file into calibration_pixelmask.tiff
//! eiger_mask_cli assemble calibration.h5
//!
//! # Flag over-responding pixels found in the dark frames of a master file
//! eiger_mask_cli hot-pixels series_1_master.h5 --threshold 1 --flag-bit 3
//!
//! # Save the mask loaded on a detector, optionally comparing it to a master file
//! eiger_mask_cli fetch 10.0.42.20 --compare series_1_master.h5 --output detector_mask.tiff
//!
//! # Load a mask onto a detector
//! eiger_mask_cli upload 10.0.42.20 detector_mask.tiff
//! ```
//!
//! Masks are exchanged as 32-bit grayscale TIFF images. Every run logs to the terminal and
//! to `eiger_mask.log` in the working directory.
use clap::{Arg, ArgMatches, Command};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use libeiger_debug::client::EigerClient;
use libeiger_debug::constants::{DEFAULT_API_VERSION, DEFAULT_PORT};
use libeiger_debug::darray::{fetch_pixel_mask, upload_pixel_mask};
use libeiger_debug::hdf_reader::{read_master_pixel_mask, CalibrationFile};
use libeiger_debug::hot_pixels::flag_hot_pixels;
use libeiger_debug::mask::compare_masks;
use libeiger_debug::tiff_writer::{mask_image_path, read_mask_tiff, write_mask_tiff};

const LOG_FILE_NAME: &str = "eiger_mask.log";
const CLIENT_TIMEOUT: Duration = Duration::from_secs(20);

fn build_cli() -> Command {
    let host = Arg::new("host")
        .help("Detector host address")
        .required(true);
    let port = Arg::new("port")
        .short('p')
        .long("port")
        .value_parser(clap::value_parser!(u16))
        .help("Detector REST port");
    Command::new("eiger_mask_cli")
        .about("Pixel mask tools for EIGER detectors")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("assemble")
                .about("Assemble the full-sensor pixel mask of a calibration file")
                .arg(Arg::new("calibration").help("Calibration file (.h5)").required(true))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Output TIFF, defaults to <calibration>_pixelmask.tiff"),
                ),
        )
        .subcommand(
            Command::new("hot-pixels")
                .about("Flag pixels that count in most dark frames of a master file")
                .arg(Arg::new("master").help("Master file (.h5)").required(true))
                .arg(
                    Arg::new("threshold")
                        .short('t')
                        .long("threshold")
                        .value_parser(clap::value_parser!(u32))
                        .help("Counts above which a pixel is hot in a frame"),
                )
                .arg(
                    Arg::new("flag-bit")
                        .short('b')
                        .long("flag-bit")
                        .value_parser(clap::value_parser!(u32).range(0..32))
                        .help("Mask bit set on hot pixels"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Output TIFF, defaults to <master>_pixelmask.tiff"),
                ),
        )
        .subcommand(
            Command::new("fetch")
                .about("Save the pixel mask loaded on a detector")
                .arg(host.clone())
                .arg(port.clone())
                .arg(
                    Arg::new("compare")
                        .short('c')
                        .long("compare")
                        .help("Master file whose pixel mask is compared to the detector's"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("detector_pixelmask.tiff")
                        .help("Output TIFF"),
                ),
        )
        .subcommand(
            Command::new("upload")
                .about("Load a pixel mask onto a detector")
                .arg(host)
                .arg(port)
                .arg(Arg::new("mask").help("Mask TIFF").required(true)),
        )
}

fn init_logging() {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from(LOG_FILE_NAME))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()
            .expect("Could not create the log file!"),
    );
    let terminal_sinks = spdlog::default_logger().sinks().to_vec();
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sinks(terminal_sinks)
            .sink(file_sink)
            .build()
            .expect("Could not create the logger!"),
    );
    spdlog::set_default_logger(logger);
    spdlog::init_log_crate_proxy().expect("Could not forward log records!");
    log::set_max_level(log::LevelFilter::Warn);
}

fn output_path(matches: &ArgMatches, input: &Path) -> PathBuf {
    match matches.get_one::<String>("output") {
        Some(path) => PathBuf::from(path),
        None => mask_image_path(input),
    }
}

fn client(matches: &ArgMatches) -> Result<EigerClient, Box<dyn Error>> {
    let host = matches
        .get_one::<String>("host")
        .ok_or("No detector host given")?;
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .unwrap_or(DEFAULT_PORT);
    Ok(EigerClient::new(host, port, DEFAULT_API_VERSION, CLIENT_TIMEOUT))
}

fn run_assemble(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let input = PathBuf::from(
        matches
            .get_one::<String>("calibration")
            .ok_or("No calibration file given")?,
    );
    let calibration = CalibrationFile::open(&input)?;
    let mask = calibration.assemble()?;
    let [width, height] = mask.shape();
    spdlog::info!(
        "Assembled {}x{} mask, {} pixels not covered by a module",
        width,
        height,
        mask.n_invalid()
    );
    let output = output_path(matches, &input);
    write_mask_tiff(&output, mask.to_image().view())?;
    Ok(())
}

fn run_hot_pixels(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let input = PathBuf::from(
        matches
            .get_one::<String>("master")
            .ok_or("No master file given")?,
    );
    let report = flag_hot_pixels(
        &input,
        matches.get_one::<u32>("threshold").copied(),
        matches.get_one::<u32>("flag-bit").copied(),
    )?;
    let output = output_path(matches, &input);
    write_mask_tiff(&output, report.mask.view())?;
    Ok(())
}

fn run_fetch(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let client = client(matches)?;
    let mask = fetch_pixel_mask(&client)?;
    if let Some(master) = matches.get_one::<String>("compare") {
        let reference = read_master_pixel_mask(Path::new(master))?;
        let differences = compare_masks(mask.view(), reference.view())?;
        if differences.is_empty() {
            spdlog::info!("Detector mask matches {}", master);
        } else {
            spdlog::warn!(
                "Detector mask differs from {} in {} pixels",
                master,
                differences.len()
            );
            for (row, col) in differences.iter().take(20) {
                spdlog::warn!(
                    "  ({}, {}): detector {} file {}",
                    row,
                    col,
                    mask[[*row, *col]],
                    reference[[*row, *col]]
                );
            }
        }
    }
    let output = PathBuf::from(
        matches
            .get_one::<String>("output")
            .ok_or("No output path given")?,
    );
    write_mask_tiff(&output, mask.view())?;
    Ok(())
}

fn run_upload(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let client = client(matches)?;
    let input = PathBuf::from(matches.get_one::<String>("mask").ok_or("No mask given")?);
    let mask = read_mask_tiff(&input)?;
    upload_pixel_mask(&client, mask.view())?;
    spdlog::info!("Uploaded {}", input.display());
    Ok(())
}

fn main() {
    let matches = build_cli().get_matches();
    init_logging();

    let result = match matches.subcommand() {
        Some(("assemble", sub)) => run_assemble(sub),
        Some(("hot-pixels", sub)) => run_hot_pixels(sub),
        Some(("fetch", sub)) => run_fetch(sub),
        Some(("upload", sub)) => run_upload(sub),
        _ => Err("Unknown command".into()),
    };

    if let Err(e) = result {
        spdlog::error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_assemble_output_defaults_next_to_input() {
        let matches = build_cli()
            .try_get_matches_from(["eiger_mask_cli", "assemble", "/data/calibration.h5"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(
            output_path(sub, Path::new("/data/calibration.h5")),
            PathBuf::from("/data/calibration_pixelmask.tiff")
        );
    }

    #[test]
    fn test_flag_bit_range() {
        let result = build_cli().try_get_matches_from([
            "eiger_mask_cli",
            "hot-pixels",
            "master.h5",
            "--flag-bit",
            "32",
        ]);
        assert!(result.is_err());
    }
}
