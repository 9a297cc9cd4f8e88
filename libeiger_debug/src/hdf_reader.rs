use fxhash::FxHashMap;
use ndarray::{s, Array2};
use std::path::{Path, PathBuf};

use super::constants::MASTER_PIXEL_MASK_PATH;
use super::error::CalibrationError;
use super::geometry::{lookup, DetectorGeometry};
use super::hardware_id::HardwareID;
use super::mask::{assemble, AssembledMask, ModuleMask};

const ENTRY_NAME: &str = "entry";
const MODULE_KEYWORD: &str = "module";
const DATA_GROUP_NAME: &str = "entry/data";

/// Path of a module's pixel mask inside a calibration file
fn module_mask_path(module_number: usize) -> String {
    format!("{ENTRY_NAME}/module_{module_number:03}/calibration_000/pixel_mask")
}

fn open_file(path: &Path) -> Result<hdf5::File, CalibrationError> {
    if !path.exists() {
        return Err(CalibrationError::BadFilePath(path.to_path_buf()));
    }
    Ok(hdf5::File::open(path)?)
}

/// A detector calibration file: one `entry/module_NNN` group per module.
///
/// The number of module groups selects the module map. It must match a supported
/// detector size exactly.
#[derive(Debug)]
pub struct CalibrationFile {
    file_handle: hdf5::File,
    path: PathBuf,
    geometry: DetectorGeometry,
}

impl CalibrationFile {
    /// Open a calibration file and resolve its geometry
    pub fn open(path: &Path) -> Result<Self, CalibrationError> {
        let file_handle = open_file(path)?;
        let n_modules = file_handle
            .group(ENTRY_NAME)?
            .member_names()?
            .iter()
            .filter(|name| name.contains(MODULE_KEYWORD))
            .count();
        let geometry = lookup(n_modules)?;
        spdlog::info!(
            "Calibration file {} holds {} modules ({})",
            path.display(),
            n_modules,
            geometry.size
        );
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
            geometry,
        })
    }

    pub fn geometry(&self) -> &DetectorGeometry {
        &self.geometry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every module's pixel mask, keyed by hardware id
    pub fn module_masks(&self) -> Result<FxHashMap<HardwareID, ModuleMask>, CalibrationError> {
        let mut masks = FxHashMap::default();
        for module in self.geometry.modules.iter() {
            let data = self
                .file_handle
                .dataset(&module_mask_path(module.module_number))?
                .read_2d::<u32>()?;
            masks.insert(module.hardware_id, data);
        }
        Ok(masks)
    }

    /// Read all module masks and assemble the full-sensor mask
    pub fn assemble(&self) -> Result<AssembledMask, CalibrationError> {
        let masks = self.module_masks()?;
        Ok(assemble(&masks, &self.geometry)?)
    }
}

/// Read the pixel mask stored in an acquisition master file
pub fn read_master_pixel_mask(path: &Path) -> Result<Array2<u32>, CalibrationError> {
    let file_handle = open_file(path)?;
    Ok(file_handle.dataset(MASTER_PIXEL_MASK_PATH)?.read_2d::<u32>()?)
}

/// Reads frames from the `entry/data/data_NNNNNN` datasets of a master file in order
#[derive(Debug)]
pub struct FrameReader {
    file_handle: hdf5::File,
    path: PathBuf,
    dataset_names: Vec<String>,
}

impl FrameReader {
    pub fn open(path: &Path) -> Result<Self, CalibrationError> {
        let file_handle = open_file(path)?;
        let mut dataset_names: Vec<String> = file_handle
            .group(DATA_GROUP_NAME)?
            .member_names()?
            .into_iter()
            .filter(|name| name.starts_with("data_"))
            .collect();
        if dataset_names.is_empty() {
            return Err(CalibrationError::NoFrames(path.to_path_buf()));
        }
        dataset_names.sort(); // zero padded, so lexical order is frame order
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
            dataset_names,
        })
    }

    /// Read up to `max_frames` frames, calling `visit` for each.
    ///
    /// Returns the number of frames visited.
    pub fn for_each_frame<F>(&self, max_frames: usize, mut visit: F) -> Result<usize, CalibrationError>
    where
        F: FnMut(usize, &Array2<u32>) -> Result<(), CalibrationError>,
    {
        let mut n_frames = 0;
        for name in self.dataset_names.iter() {
            let dataset = self.file_handle.dataset(&format!("{DATA_GROUP_NAME}/{name}"))?;
            let shape = dataset.shape();
            if shape.len() != 3 {
                spdlog::warn!("Skipping {} in {}: shape {:?}", name, self.path.display(), shape);
                continue;
            }
            for index in 0..shape[0] {
                if n_frames >= max_frames {
                    return Ok(n_frames);
                }
                let frame = dataset.read_slice_2d::<u32, _>(s![index, .., ..])?;
                visit(n_frames, &frame)?;
                n_frames += 1;
            }
        }
        Ok(n_frames)
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::INVALID_PIXEL;
    use crate::geometry::DetectorSize;

    fn write_calibration_file(path: &Path, geometry: &DetectorGeometry) {
        let file = hdf5::File::create(path).unwrap();
        let entry = file.create_group(ENTRY_NAME).unwrap();
        for module in geometry.modules.iter() {
            let data = Array2::<u32>::from_elem((256, 1024), module.module_number as u32 + 10);
            entry
                .create_group(&format!("module_{:03}", module.module_number))
                .unwrap()
                .create_group("calibration_000")
                .unwrap()
                .new_dataset_builder()
                .with_data(&data)
                .create("pixel_mask")
                .unwrap();
        }
    }

    #[test]
    fn test_calibration_file_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.h5");
        let geometry = lookup(2).unwrap();
        write_calibration_file(&path, &geometry);

        let calib = CalibrationFile::open(&path).unwrap();
        assert_eq!(calib.geometry().size, DetectorSize::Eiger500K);
        let masks = calib.module_masks().unwrap();
        assert_eq!(masks.len(), 2);

        let mask = calib.assemble().unwrap();
        assert_eq!(mask.shape(), [1030, 514]);
        // module 0 sits in row 0, module 1 in row 1
        assert_eq!(mask.data()[[500, 100]], 10);
        assert_eq!(mask.data()[[500, 400]], 11);
        assert_eq!(mask.n_invalid(), 0);
        assert_ne!(mask.data()[[0, 0]], INVALID_PIXEL);
    }

    #[test]
    fn test_missing_file() {
        let result = CalibrationFile::open(Path::new("/does/not/exist.h5"));
        assert!(matches!(result, Err(CalibrationError::BadFilePath(_))));
    }

    #[test]
    fn test_frame_reader_limits_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series_master.h5");
        {
            let file = hdf5::File::create(&path).unwrap();
            let data = file.create_group(ENTRY_NAME).unwrap().create_group("data").unwrap();
            let frames = ndarray::Array3::<u32>::from_shape_fn((3, 4, 5), |(f, _, _)| f as u32);
            data.new_dataset_builder()
                .with_data(&frames)
                .create("data_000001")
                .unwrap();
            data.new_dataset_builder()
                .with_data(&frames)
                .create("data_000002")
                .unwrap();
        }
        let reader = FrameReader::open(&path).unwrap();
        let mut seen = Vec::new();
        let n = reader
            .for_each_frame(4, |index, frame| {
                seen.push((index, frame[[0, 0]]));
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 2), (3, 0)]);
    }
}
