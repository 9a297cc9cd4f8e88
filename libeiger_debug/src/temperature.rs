use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

use super::constants::{STATUS_FILE_PREFIX, TEMPERATURE_PLOT_NAME};
use super::error::PlotError;
use super::geometry::lookup_nearest;

/// Lower end of the heat map colour scale, in C
pub const MAP_MIN_TEMPERATURE: f64 = 40.0;
/// Upper end of the heat map colour scale, in C
pub const MAP_MAX_TEMPERATURE: f64 = 65.0;

/// Renders the temperature history of a session directory
pub trait TemperaturePlotter {
    /// Scan the status snapshots in `dir` and write a chart, returning its path
    fn plot(&self, dir: &Path) -> Result<PathBuf, PlotError>;
}

/// A single temperature entry of a status snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub time: OffsetDateTime,
    pub value: f64,
}

fn parse_timestamp(time_str: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(time_str, &Iso8601::DEFAULT))
        .or_else(|_| PrimitiveDateTime::parse(time_str, &Iso8601::DEFAULT).map(|t| t.assume_utc()))
        .ok()
}

fn is_temperature_key(key: &str) -> bool {
    key.starts_with("module_") && key.ends_with("temp")
}

fn is_fpga_key(key: &str) -> bool {
    key.contains("fpga")
}

/// The module number of a status key such as `module_003/temp`
pub fn module_number(key: &str) -> Option<usize> {
    let digits: String = key
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Status snapshot files in `dir`, oldest first
fn status_files(dir: &Path) -> Result<Vec<PathBuf>, PlotError> {
    let pattern = dir.join(format!("{STATUS_FILE_PREFIX}*.json"));
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    let paths = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| PlotError::DrawingError(e.to_string()))?;
    for path in paths.flatten() {
        let modified = path.metadata()?.modified()?;
        files.push((modified, path));
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Collect every `module_*temp` reading from the status snapshots in `dir`, keyed by
/// status key in snapshot order
pub fn collect_temperatures(
    dir: &Path,
) -> Result<BTreeMap<String, Vec<TemperatureReading>>, PlotError> {
    let mut temperatures: BTreeMap<String, Vec<TemperatureReading>> = BTreeMap::new();
    for path in status_files(dir)? {
        let status: Value = serde_json::from_reader(BufReader::new(File::open(&path)?))?;
        let Some(entries) = status.as_object() else {
            continue;
        };
        for (key, entry) in entries.iter().filter(|(key, _)| is_temperature_key(key)) {
            let value = entry.get("value").and_then(Value::as_f64);
            let time = entry
                .get("time")
                .and_then(Value::as_str)
                .and_then(parse_timestamp);
            match (value, time) {
                (Some(value), Some(time)) => temperatures
                    .entry(key.clone())
                    .or_default()
                    .push(TemperatureReading { time, value }),
                _ => spdlog::debug!("Skipping unreadable {} in {}", key, path.display()),
            }
        }
    }
    Ok(temperatures)
}

/// Place per-module values onto the module grid, indexed `[row, column]`.
///
/// The detector size is the nearest supported size to the number of values. Cells
/// without a value stay at zero.
pub fn temperature_map(temperatures: &BTreeMap<usize, f64>) -> Array2<f64> {
    let geometry = lookup_nearest(temperatures.len());
    let mut map = Array2::zeros((geometry.dimensions.rows, geometry.dimensions.columns));
    for (number, value) in temperatures.iter() {
        if let Some(module) = geometry.module_by_number(*number) {
            map[[module.position.row, module.position.column]] = *value;
        }
    }
    map
}

fn drawing_error<E: std::fmt::Display>(error: E) -> PlotError {
    PlotError::DrawingError(error.to_string())
}

type Series = (String, Vec<(f64, f64)>);

fn draw_history(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    title: &str,
    series: &[Series],
) -> Result<(), PlotError> {
    let points = series.iter().flat_map(|(_, values)| values.iter());
    let (mut x_max, mut y_min, mut y_max) = (1.0f64, f64::INFINITY, f64::NEG_INFINITY);
    for (x, y) in points {
        x_max = x_max.max(*x);
        y_min = y_min.min(*y);
        y_max = y_max.max(*y);
    }
    if !y_min.is_finite() {
        (y_min, y_max) = (MAP_MIN_TEMPERATURE, MAP_MAX_TEMPERATURE);
    }

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 16))
        .set_label_area_size(LabelAreaPosition::Left, 50)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .margin(10)
        .build_cartesian_2d(0f64..x_max, (y_min - 1.0)..(y_max + 1.0))
        .map_err(drawing_error)?;
    chart
        .configure_mesh()
        .x_desc("Time since first snapshot [s]")
        .y_desc("Temperature [C]")
        .draw()
        .map_err(drawing_error)?;

    let mut colors = colorous::TABLEAU10.iter().cycle();
    for (label, values) in series.iter() {
        let color = colors.next().copied().unwrap_or(colorous::TABLEAU10[0]);
        let rgb = RGBColor(color.r, color.g, color.b);
        chart
            .draw_series(LineSeries::new(values.iter().copied(), &rgb))
            .map_err(drawing_error)?
            .label(label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &rgb));
    }
    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()
        .map_err(drawing_error)?;
    Ok(())
}

fn draw_map(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    title: &str,
    map: &Array2<f64>,
) -> Result<(), PlotError> {
    let (rows, columns) = map.dim();
    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 16))
        .set_label_area_size(LabelAreaPosition::Left, 40)
        .set_label_area_size(LabelAreaPosition::Bottom, 30)
        .margin(10)
        .build_cartesian_2d(0..columns as i32, 0..rows as i32)
        .map_err(drawing_error)?;
    chart
        .configure_mesh()
        .x_desc("Column")
        .y_desc("Row (top = 0)")
        .disable_mesh()
        .draw()
        .map_err(drawing_error)?;

    let range = MAP_MAX_TEMPERATURE - MAP_MIN_TEMPERATURE;
    chart
        .draw_series(map.indexed_iter().map(|((row, column), value)| {
            let u = ((value - MAP_MIN_TEMPERATURE) / range).clamp(0.0, 1.0);
            let (r, g, b) = colorous::TURBO.eval_continuous(u).as_tuple();
            let (x, y) = (column as i32, (rows - 1 - row) as i32);
            Rectangle::new([(x, y), (x + 1, y + 1)], RGBColor(r, g, b).filled())
        }))
        .map_err(drawing_error)?;
    Ok(())
}

/// Draws `tempPlot.svg`: FPGA and module temperatures over time on the left, minimum
/// and maximum module temperature maps on the right
#[derive(Debug, Clone)]
pub struct SvgTemperaturePlotter {
    pub file_name: String,
    pub size: (u32, u32),
}

impl Default for SvgTemperaturePlotter {
    fn default() -> Self {
        Self {
            file_name: String::from(TEMPERATURE_PLOT_NAME),
            size: (1200, 900),
        }
    }
}

impl TemperaturePlotter for SvgTemperaturePlotter {
    fn plot(&self, dir: &Path) -> Result<PathBuf, PlotError> {
        let temperatures = collect_temperatures(dir)?;
        let Some(start) = temperatures
            .values()
            .flat_map(|readings| readings.iter().map(|r| r.time))
            .min()
        else {
            return Err(PlotError::NoData(dir.to_path_buf()));
        };

        let mut fpga = Vec::new();
        let mut modules = Vec::new();
        let mut min_temperature = BTreeMap::new();
        let mut max_temperature = BTreeMap::new();
        for (key, readings) in temperatures.iter() {
            let points: Vec<(f64, f64)> = readings
                .iter()
                .map(|r| ((r.time - start).as_seconds_f64(), r.value))
                .collect();
            if is_fpga_key(key) {
                let label = key.split('/').next().unwrap_or(key).to_string();
                fpga.push((label, points));
                continue;
            }
            if let Some(number) = module_number(key) {
                let values = readings.iter().map(|r| r.value);
                min_temperature.insert(number, values.clone().fold(f64::INFINITY, f64::min));
                max_temperature.insert(number, values.fold(f64::NEG_INFINITY, f64::max));
            }
            modules.push((key.clone(), points));
        }

        let path = dir.join(&self.file_name);
        let root = SVGBackend::new(&path, self.size).into_drawing_area();
        root.fill(&WHITE).map_err(drawing_error)?;
        let areas = root.split_evenly((2, 2));
        draw_history(&areas[0], "FPGA temperature", &fpga)?;
        draw_map(
            &areas[1],
            "min temperature map (40-65 C)",
            &temperature_map(&min_temperature),
        )?;
        draw_history(&areas[2], "module temperature", &modules)?;
        draw_map(
            &areas[3],
            "max temperature map (40-65 C)",
            &temperature_map(&max_temperature),
        )?;
        root.present().map_err(drawing_error)?;
        spdlog::info!("Plotted temperature data in {}", path.display());
        Ok(path.clone())
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_module_number() {
        assert_eq!(module_number("module_003/temp"), Some(3));
        assert_eq!(module_number("module_012/fpga_temp"), Some(12));
        assert_eq!(module_number("state"), None);
    }

    #[test]
    fn test_temperature_map_uses_grid_positions() {
        let mut temps = BTreeMap::new();
        for number in 0..16 {
            temps.insert(number, 40.0 + number as f64);
        }
        let map = temperature_map(&temps);
        assert_eq!(map.dim(), (8, 2));
        // 4M: module 7 at row 0, module 5 at row 1, module 2 at row 2 of column 0
        assert_eq!(map[[0, 0]], 47.0);
        assert_eq!(map[[1, 0]], 45.0);
        assert_eq!(map[[2, 0]], 42.0);
    }

    #[test]
    fn test_temperature_map_picks_nearest_size() {
        let temps: BTreeMap<usize, f64> = [(0, 50.0), (1, 51.0), (2, 52.0)].into_iter().collect();
        let map = temperature_map(&temps);
        assert_eq!(map.dim(), (2, 1));
        assert_eq!(map[[0, 0]], 50.0);
        assert_eq!(map[[1, 0]], 51.0);

        // Halfway between the 1M and the 4M
        let temps: BTreeMap<usize, f64> = (0..10).map(|n| (n, 40.0 + n as f64)).collect();
        let map = temperature_map(&temps);
        assert_eq!(map.dim(), (8, 2));
        assert_eq!(map[[0, 0]], 47.0);
        assert_eq!(map[[1, 0]], 45.0);
        assert_eq!(map[[2, 0]], 42.0);
    }

    #[test]
    fn test_collect_temperatures() {
        let dir = tempfile::tempdir().unwrap();
        let first = json!({
            "state": {"value": "ready"},
            "module_000/temp": {"value": 45.5, "time": "2024-01-01T12:00:00.000+00:00"},
            "module_000/fpga_temp": {"value": 60.0, "time": "2024-01-01T12:00:00.000+00:00"},
            "module_001/temp": {"value": 46.0},
        });
        let second = json!({
            "module_000/temp": {"value": 47.0, "time": "2024-01-01T12:00:30.000"},
        });
        std::fs::write(dir.path().join("detectorStatus_initial.json"), first.to_string()).unwrap();
        std::fs::write(dir.path().join("detectorConfig.json"), "{}").unwrap();
        let later = dir.path().join("detectorStatus_240101_120030.json");
        std::fs::write(&later, second.to_string()).unwrap();
        let file = File::options().write(true).open(&later).unwrap();
        file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();

        let temps = collect_temperatures(dir.path()).unwrap();
        assert_eq!(temps.len(), 2);
        let module = &temps["module_000/temp"];
        assert_eq!(module.len(), 2);
        assert_eq!(module[0].value, 45.5);
        assert_eq!(module[1].value, 47.0);
        assert_eq!((module[1].time - module[0].time).whole_seconds(), 30);
        assert_eq!(temps["module_000/fpga_temp"].len(), 1);
    }

    #[test]
    fn test_no_readings_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SvgTemperaturePlotter::default().plot(dir.path());
        assert!(matches!(result, Err(PlotError::NoData(_))));
    }
}
