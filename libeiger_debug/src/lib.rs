//! # eiger_debug
//!
//! eiger_debug is a set of tools for operating and debugging a Dectris EIGER X-ray
//! detector, written in Rust. It drives a detector through a scripted debug session over
//! the detector's REST interface, collecting status snapshots, temperature charts, data
//! and server logs into a single archive, and it converts per-module calibration masks
//! into full-sensor pixel masks.
//!
//! ## Installation
//!
//! The only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Before building eiger_debug, HDF5 must be installed. Typically this will be installed
//! using a package manager (homebrew, apt, etc), and the Rust libraries will auto detect
//! the location of the HDF install. If HDF5 lives in a custom location, write the
//! following snippet into the file `.cargo/config.toml` of the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the debug session CLI use `cargo install --path ./eiger_debug_cli`
//! from the top level repository. The pixel mask tools are installed with
//! `cargo install --path ./eiger_mask_cli`.
//!
//! ## Debug sessions
//!
//! Power the detector server and head down for 10 minutes with dry air and cooling
//! running, power it back up, and start a session immediately, without any other control
//! software attached:
//!
//! ```bash
//! eiger_debug_cli 10.0.42.20
//! ```
//!
//! A session creates the directory `EIGERDebug_<yymmdd_HHMMSS>` and
//!
//! 1. restarts the DAQ, initializes the detector and the file writer, and dumps all status
//!    parameters to `detectorStatus_initial.json`
//! 2. configures the detector and file writer, dumps the configuration to
//!    `detectorConfig.json`, arms the detector and takes a series of dark exposures,
//!    dumping the status before every trigger to `detectorStatus_<timestamp>.json` and
//!    redrawing `tempPlot.svg`
//! 3. downloads the acquired data from the detector buffer
//! 4. dumps the final status to `detectorStatus_final.json`, downloads `rest_api.log`,
//!    and packs the directory into `EIGERDebug_<yymmdd_HHMMSS>.zip`
//!
//! CTRL + C aborts the acquisition; the session still finishes and packs what it has.
//!
//! ## Configuration
//!
//! Sessions use the defaults below unless a YAML configuration file is given with
//! `--config`. A template is written by `eiger_debug_cli --new-config <path>`. Every field
//! is optional.
//!
//! ```yml
//! port: 80
//! api_version: 1.6.0
//! timeout_ms: 20000
//! count_time: 1.0
//! frame_time: 1.0
//! nimages: 60
//! ntrigger: 20
//! trigger_mode: ints
//! compression: bslz4
//! images_per_file: 1000
//! filewriter_compression: true
//! restart_settle_ms: 3000
//! poll_interval_ms: 1000
//! finish_settle_ms: 2000
//! plot_temperatures: true
//! download_data: true
//! ```
//!
//! ## Pixel masks
//!
//! Calibration files hold one mask per module under
//! `entry/module_NNN/calibration_000/pixel_mask`. The [`mask`] module places them on the
//! sensor plane using the module maps of [`geometry`], inserting the chip and module gaps.
//! Supported detectors are the EIGER 500K, 1M, 4M, 9M and 16M.
//!
//! ## Output
//!
//! Every binary logs to the terminal and to a log file. For debug sessions the log file
//! is written into the session directory, so it is shipped inside the archive.
pub mod archive;
pub mod client;
pub mod config;
pub mod constants;
pub mod darray;
pub mod error;
pub mod geometry;
pub mod hardware_id;
pub mod hdf_reader;
pub mod hot_pixels;
pub mod mask;
pub mod sequencer;
pub mod session_status;
pub mod snapshot;
pub mod state;
pub mod temperature;
pub mod tiff_writer;
