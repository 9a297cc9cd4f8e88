// Sensor geometry of an EIGER module. A module is two half-modules stacked
// vertically; each half-module is a row of 4 chips of 256x256 pixels. Chip
// edges get virtual pixels (GAP per chip boundary) and modules are separated by
// fixed gaps. All values are in pixels.

/// Width (and height) of a single readout chip
pub const CHIP_LENGTH: usize = 256;
/// Number of chips along one half-module
pub const CHIPS_PER_HALF_MODULE: usize = 4;
/// Virtual pixels inserted between two neighbouring chips
pub const GAP: usize = 2;
/// Horizontal gap between modules
pub const MODULE_GAP_WIDTH: usize = 10;
/// Vertical gap between modules
pub const MODULE_GAP_HEIGHT: usize = 37;

pub const BARE_HALF_MODULE_WIDTH: usize = CHIPS_PER_HALF_MODULE * CHIP_LENGTH;
pub const BARE_HALF_MODULE_HEIGHT: usize = CHIP_LENGTH;
pub const HALF_MODULE_WIDTH: usize = BARE_HALF_MODULE_WIDTH + 3 * GAP;
pub const HALF_MODULE_HEIGHT: usize = BARE_HALF_MODULE_HEIGHT + GAP / 2;
pub const MODULE_WIDTH: usize = HALF_MODULE_WIDTH;
pub const MODULE_HEIGHT: usize = 2 * HALF_MODULE_HEIGHT;

/// Fill value for sensor regions not covered by any module (masked/invalid)
pub const INVALID_PIXEL: u32 = 1;

// REST layout of the detector control server
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_API_VERSION: &str = "1.6.0";
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;
pub const REST_LOG_NAME: &str = "rest_api.log";

// Session output layout
pub const STATUS_FILE_PREFIX: &str = "detectorStatus";
pub const INITIAL_STATUS_NAME: &str = "detectorStatus_initial";
pub const FINAL_STATUS_NAME: &str = "detectorStatus_final";
pub const CONFIG_DUMP_NAME: &str = "detectorConfig";
pub const TEMPERATURE_PLOT_NAME: &str = "tempPlot.svg";
pub const SNAPSHOT_TIME_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year repr:last_two][month][day]_[hour][minute][second]");

// HDF5 layout of calibration and master files
pub const MASTER_PIXEL_MASK_PATH: &str = "/entry/instrument/detector/detectorSpecific/pixel_mask";
pub const HOT_PIXEL_FLAG_BIT: u32 = 3;
pub const HOT_PIXEL_THRESHOLD: u32 = 1;
pub const HOT_PIXEL_MAX_FRAMES: usize = 100;
