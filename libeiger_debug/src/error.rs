use std::path::PathBuf;
use thiserror::Error;

use super::constants::{BARE_HALF_MODULE_HEIGHT, BARE_HALF_MODULE_WIDTH};
use super::hardware_id::HardwareID;
use super::state::DetectorState;

#[derive(Debug, Clone, Error)]
pub enum GeometryError {
    #[error("Unsupported detector size of {0} modules; supported sizes are 2, 4, 16, 36 and 64 modules")]
    UnsupportedDetectorSize(usize),
    #[error("Could not parse {0:?} as a module hardware ID")]
    BadHardwareID(String),
}

#[derive(Debug, Clone, Error)]
pub enum MaskError {
    #[error("Module {0} has a calibration mask of shape {1:?}; expected [{rows}, {cols}]", rows=BARE_HALF_MODULE_HEIGHT, cols=BARE_HALF_MODULE_WIDTH)]
    BadModuleShape(HardwareID, Vec<usize>),
    #[error("Module {0} at grid position ({1}, {2}) does not fit into a sensor of shape {3:?}")]
    PlacementOutOfBounds(HardwareID, usize, usize, [usize; 2]),
    #[error("Masks have mismatched shapes {0:?} and {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Could not open HDF5 file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Calibration file failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Calibration file failed due to geometry error: {0}")]
    GeometryError(#[from] GeometryError),
    #[error("Calibration file failed due to mask error: {0}")]
    MaskError(#[from] MaskError),
    #[error("Master file {0:?} does not contain any frames under /entry/data")]
    NoFrames(PathBuf),
    #[error("Hot pixel flag bit {0} is outside the 32-bit pixel mask")]
    BadFlagBit(u32),
    #[error("Frame of shape {0:?} does not match pixel mask shape {1:?}")]
    FrameShape(Vec<usize>, Vec<usize>),
    #[error("Mask image failed due to TIFF error: {0}")]
    TiffError(#[from] tiff::TiffError),
    #[error("Mask image {0:?} is not a 32-bit grayscale image")]
    UnsupportedImage(PathBuf),
    #[error("Mask image has {0} pixels; expected {1}")]
    ImageSize(usize, usize),
    #[error("Calibration file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request to {0} failed: {1}")]
    Transport(String, #[source] ureq::Error),
    #[error("Request to {0} returned HTTP status {1}")]
    Status(String, u16),
    #[error("Failed to parse response from {0}: {1}")]
    BadResponse(String, #[source] serde_json::Error),
    #[error("Response from {0} is missing the field {1:?}")]
    MissingField(String, &'static str),
    #[error("Detector reported an unknown state: {0}")]
    UnknownState(String),
    #[error("Invalid trigger mode {0}; expected one of expo, extt, extm, exte, exts, ints")]
    InvalidTriggerMode(String),
    #[error("Invalid file name pattern: {0}")]
    BadPattern(#[from] glob::PatternError),
    #[error("Client failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DarrayError {
    #[error("Value is not a darray object")]
    NotADarray,
    #[error("Darray is missing the field {0:?}")]
    MissingField(&'static str),
    #[error("Darray element type {0} is not supported")]
    UnsupportedType(String),
    #[error("Darray filter {0} is not supported")]
    UnsupportedFilter(String),
    #[error("Darray payload failed to decode: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Darray payload has {0} bytes; shape and type require {1}")]
    LengthMismatch(usize, usize),
    #[error("Darray shape is invalid: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error("Darray transfer failed due to client error: {0}")]
    ClientError(#[from] ClientError),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot failed due to client error: {0}")]
    ClientError(#[from] ClientError),
    #[error("Snapshot failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Snapshot failed to write JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive failed as directory {0:?} does not exist")]
    BadDirectory(PathBuf),
    #[error("Archive failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Archive failed due to zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("No temperature readings found in {0:?}")]
    NoData(PathBuf),
    #[error("Temperature plot failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Temperature plot failed to parse a status file: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Temperature plot failed to draw: {0}")]
    DrawingError(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

/// Failures while starting a session. None of these are recoverable.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Command {0} was not acknowledged with an empty reply; got {1}")]
    UnexpectedAcknowledgment(String, String),
    #[error("Session failed due to client error: {0}")]
    ClientError(#[from] ClientError),
    #[error("Session failed due to snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),
    #[error("Session failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

/// How the acquisition loop treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// End the acquisition and go straight to the finishing phase
    Fatal,
    /// Log and keep acquiring
    Recoverable,
}

/// Failures inside the acquisition (configure, arm, trigger loop, disarm)
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Detector not available, state is {0}")]
    DetectorUnavailable(DetectorState),
    #[error("Acquisition failed due to client error: {0}")]
    ClientError(#[from] ClientError),
    #[error("Acquisition failed due to snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),
    #[error("Could not save temperature plot: {0}")]
    PlotError(#[from] PlotError),
}

impl AcquisitionError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::PlotError(_) => Severity::Recoverable,
            Self::DetectorUnavailable(_) | Self::ClientError(_) | Self::SnapshotError(_) => {
                Severity::Fatal
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Sequencer failed to start the session: {0}")]
    SessionError(#[from] SessionError),
    #[error("Sequencer failed to package the session: {0}")]
    ArchiveError(#[from] ArchiveError),
    #[error("Sequencer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
