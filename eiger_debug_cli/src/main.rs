//! # eiger_debug_cli
//!
//! Part of the eiger_debug crate family.
//!
//! Runs a scripted debug session against an EIGER detector and packs everything it
//! collected into a zip archive for support.
//!
//! ## Use
//!
//! ```bash
//! eiger_debug_cli 10.0.42.20
//! eiger_debug_cli 10.0.42.20 --config debug.yml
//! eiger_debug_cli --new-config debug.yml
//! ```
//!
//! CTRL + C aborts the acquisition and continues with packaging; pressing it a second
//! time quits immediately.
use clap::{Arg, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use libeiger_debug::client::EigerClient;
use libeiger_debug::config::Config;
use libeiger_debug::sequencer::{LoopOutcome, Sequencer};
use libeiger_debug::session_status::SessionPhase;
use libeiger_debug::snapshot::{local_offset, timestamp};
use libeiger_debug::temperature::SvgTemperaturePlotter;

const SESSION_PREFIX: &str = "EIGERDebug";
const LOG_FILE_NAME: &str = "eiger_debug.log";
const SECOND_INTERRUPT_EXIT_CODE: i32 = 130;

fn build_cli() -> Command {
    Command::new("eiger_debug_cli")
        .about("Run an EIGER debug session and pack the results for support")
        .arg(
            Arg::new("host")
                .help("Detector host address, e.g. 10.0.42.20")
                .required_unless_present("new-config"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to a YAML session configuration"),
        )
        .arg(
            Arg::new("new-config")
                .long("new-config")
                .help("Write a template configuration to this path and exit")
                .conflicts_with("host"),
        )
}

/// Log to the terminal and to a file in the session directory
fn init_logging(log_path: &Path) {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(log_path)
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()
            .expect("Could not create the log file!"),
    );
    let terminal_sinks = spdlog::default_logger().sinks().to_vec();
    let logger = Arc::new(
        spdlog::Logger::builder()
            .level_filter(spdlog::LevelFilter::MoreSevereEqual(spdlog::Level::Info))
            .flush_level_filter(spdlog::LevelFilter::All)
            .sinks(terminal_sinks)
            .sink(file_sink)
            .build()
            .expect("Could not create the logger!"),
    );
    spdlog::set_default_logger(logger);
    // The HTTP stack logs through the log crate
    spdlog::init_log_crate_proxy().expect("Could not forward log records!");
    log::set_max_level(log::LevelFilter::Warn);
}

fn load_config(matches: &ArgMatches) -> Result<Config, String> {
    match matches.get_one::<String>("config") {
        Some(path) => Config::read_config_file(Path::new(path)).map_err(|e| e.to_string()),
        None => Ok(Config::default()),
    }
}

fn phase_message(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Initializing => "initializing",
        SessionPhase::Acquiring => "acquiring",
        SessionPhase::Downloading => "downloading data",
        SessionPhase::Finishing => "packing",
        SessionPhase::Finished => "done",
    }
}

fn main() {
    // Must run before any other thread exists
    let utc_offset = local_offset();
    let matches = match build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => match e.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => e.exit(),
            _ => {
                eprintln!("[ERROR] Specify EIGER host: {e}");
                std::process::exit(1);
            }
        },
    };

    if let Some(path) = matches.get_one::<String>("new-config") {
        let path = PathBuf::from(path);
        match Config::default().write_config_file(&path) {
            Ok(()) => println!("Wrote a template config to {}", path.display()),
            Err(e) => {
                eprintln!("[ERROR] {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let host = match matches.get_one::<String>("host") {
        Some(host) => host.clone(),
        None => {
            eprintln!("[ERROR] Specify EIGER host");
            std::process::exit(1);
        }
    };
    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            std::process::exit(1);
        }
    };

    let session_dir = PathBuf::from(format!("{SESSION_PREFIX}_{}", timestamp(utc_offset)));
    std::fs::create_dir_all(&session_dir).expect("Could not create the session directory!");
    init_logging(&session_dir.join(LOG_FILE_NAME));
    spdlog::info!("Starting EIGER debug session on {}", host);
    spdlog::info!("Session directory: {}", session_dir.display());
    spdlog::info!(
        "{} triggers of {} images ({} s count time, {} s frame time), trigger mode {}",
        config.ntrigger,
        config.nimages,
        config.count_time,
        config.frame_time,
        config.trigger_mode
    );

    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupt.clone();
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(SECOND_INTERRUPT_EXIT_CODE);
        }
        spdlog::warn!("User keyboard interrupt, aborting (CTRL + C again to quit)");
    })
    .expect("Could not install the interrupt handler!");

    let (tx, rx) = mpsc::channel();
    let client = EigerClient::from_config(&host, &config);
    let trigger_count = config.ntrigger;
    let plot = config.plot_temperatures;
    let mut sequencer = match Sequencer::new(client, config, &host, &session_dir, interrupt) {
        Ok(seq) => seq.with_status_sender(tx).with_utc_offset(utc_offset),
        Err(e) => {
            spdlog::error!("{e}");
            std::process::exit(1);
        }
    };
    if plot {
        sequencer = sequencer.with_plotter(Box::new(SvgTemperaturePlotter::default()));
    }

    let pb = ProgressBar::new(trigger_count);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} triggers - {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    // Spawn the session!
    let handle = std::thread::spawn(move || sequencer.run());

    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(status) => {
                pb.set_position(status.triggers_completed);
                pb.set_message(phase_message(status.phase));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => pb.tick(),
            Err(mpsc::RecvTimeoutError::Disconnected) => (),
        }

        if handle.is_finished() {
            break;
        }
    }
    pb.finish();

    match handle.join() {
        Ok(Ok(report)) => {
            match report.outcome {
                LoopOutcome::Completed => spdlog::info!("Acquisition completed"),
                LoopOutcome::Aborted => spdlog::warn!("Acquisition aborted by the user"),
                LoopOutcome::Failed(e) => spdlog::error!("Acquisition failed: {e}"),
            }
            let downloaded: u64 = report.downloaded.iter().map(|(_, bytes)| bytes).sum();
            spdlog::info!(
                "Downloaded {} files ({})",
                report.downloaded.len(),
                human_bytes::human_bytes(downloaded as f64)
            );
            spdlog::info!("{}", "*".repeat(80));
            spdlog::info!(
                "[FINISHED] please send {} to support@dectris.com",
                report.archive.display()
            );
            spdlog::info!("{}", "*".repeat(80));
        }
        Ok(Err(e)) => {
            spdlog::error!("Debug session failed: {e}");
            std::process::exit(1);
        }
        Err(_) => {
            spdlog::error!("Failed to join the session thread!");
            std::process::exit(1);
        }
    }
}
