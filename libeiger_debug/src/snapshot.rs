use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use time::{OffsetDateTime, UtcOffset};

use super::client::DetectorControl;
use super::constants::{CONFIG_DUMP_NAME, SNAPSHOT_TIME_FORMAT};
use super::error::SnapshotError;

/// The local UTC offset, or UTC when it cannot be determined.
///
/// On Unix the offset can only be read while the process is single threaded, so call
/// this once at start-up and hand the result to whatever needs local timestamps.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// `datetime` as `yymmdd_HHMMSS`
pub fn format_timestamp(datetime: OffsetDateTime) -> String {
    datetime
        .format(SNAPSHOT_TIME_FORMAT)
        .unwrap_or_else(|_| datetime.unix_timestamp().to_string())
}

/// The current time at `offset` as `yymmdd_HHMMSS`
pub fn timestamp(offset: UtcOffset) -> String {
    format_timestamp(OffsetDateTime::now_utc().to_offset(offset))
}

/// A status or config dump written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub contents: Value,
}

fn write_json(dir: &Path, name: &str, contents: Value) -> Result<Snapshot, SnapshotError> {
    let path = dir.join(format!("{name}.json"));
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer(writer, &contents)?;
    Ok(Snapshot { path, contents })
}

/// Refresh the detector status and write every status key to `<dir>/<name>.json`.
///
/// An existing file of the same name is replaced.
pub fn dump_status<C: DetectorControl + ?Sized>(
    control: &C,
    dir: &Path,
    name: &str,
) -> Result<Snapshot, SnapshotError> {
    control.send_detector_command("status_update")?;
    let mut status = Map::new();
    for key in control.detector_status_keys()? {
        let value = control.detector_status(&key)?;
        status.insert(key, value);
    }
    let snapshot = write_json(dir, name, Value::Object(status))?;
    spdlog::info!("Wrote status to {}", snapshot.path.display());
    Ok(snapshot)
}

/// Write every detector config key to `<dir>/detectorConfig.json`
pub fn dump_config<C: DetectorControl + ?Sized>(
    control: &C,
    dir: &Path,
) -> Result<Snapshot, SnapshotError> {
    let mut config = Map::new();
    for key in control.detector_config_keys()? {
        let value = control.detector_config(&key)?;
        config.insert(key, value);
    }
    let snapshot = write_json(dir, CONFIG_DUMP_NAME, Value::Object(config))?;
    spdlog::info!("Wrote config to {}", snapshot.path.display());
    Ok(snapshot)
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn test_timestamp_uses_given_offset() {
        let utc = datetime!(2024-01-01 23:30:05 UTC);
        assert_eq!(format_timestamp(utc), "240101_233005");
        assert_eq!(format_timestamp(utc.to_offset(offset!(+2))), "240102_013005");
        assert_eq!(format_timestamp(utc.to_offset(offset!(-5))), "240101_183005");
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp(UtcOffset::UTC);
        assert_eq!(stamp.len(), 13);
        assert_eq!(stamp.as_bytes()[6], b'_');
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }
}
