use ndarray::{Array2, ArrayView2};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::ColorType;

use super::error::CalibrationError;

const MASK_IMAGE_SUFFIX: &str = "_pixelmask.tiff";

/// Name of the mask image written next to a calibration file: `x.h5` becomes `x_pixelmask.tiff`
pub fn mask_image_path(calibration_path: &Path) -> PathBuf {
    let stem = match calibration_path.extension() {
        Some(ext) if ext == "h5" => calibration_path.file_stem(),
        _ => calibration_path.file_name(),
    }
    .map(|s| s.to_string_lossy().to_string())
    .unwrap_or_default();
    calibration_path.with_file_name(format!("{stem}{MASK_IMAGE_SUFFIX}"))
}

/// Write a mask as a 32-bit grayscale TIFF. Rows of `image` are image rows.
pub fn write_mask_tiff(path: &Path, image: ArrayView2<u32>) -> Result<(), CalibrationError> {
    let (height, width) = image.dim();
    let data: Vec<u32> = image.iter().copied().collect();
    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    encoder.write_image::<colortype::Gray32>(width as u32, height as u32, &data)?;
    spdlog::info!("Wrote {}x{} mask image to {}", width, height, path.display());
    Ok(())
}

/// Read a 32-bit grayscale TIFF back into a `[rows, cols]` array
pub fn read_mask_tiff(path: &Path) -> Result<Array2<u32>, CalibrationError> {
    if !path.exists() {
        return Err(CalibrationError::BadFilePath(path.to_path_buf()));
    }
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    if decoder.colortype()? != ColorType::Gray(32) {
        return Err(CalibrationError::UnsupportedImage(path.to_path_buf()));
    }
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let data = match decoder.read_image()? {
        DecodingResult::U32(data) => data,
        _ => return Err(CalibrationError::UnsupportedImage(path.to_path_buf())),
    };
    if data.len() != width * height {
        return Err(CalibrationError::ImageSize(data.len(), width * height));
    }
    Array2::from_shape_vec((height, width), data)
        .map_err(|_| CalibrationError::ImageSize(width * height, width * height))
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_image_path() {
        assert_eq!(
            mask_image_path(Path::new("/data/calib_4m.h5")),
            PathBuf::from("/data/calib_4m_pixelmask.tiff")
        );
        assert_eq!(
            mask_image_path(Path::new("calib")),
            PathBuf::from("calib_pixelmask.tiff")
        );
    }

    #[test]
    fn test_tiff_keeps_orientation_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.tiff");
        let image = Array2::from_shape_fn((3, 5), |(r, c)| {
            if r == 2 && c == 4 {
                u32::MAX
            } else {
                (r * 5 + c) as u32
            }
        });
        write_mask_tiff(&path, image.view()).unwrap();
        let read = read_mask_tiff(&path).unwrap();
        assert_eq!(read.dim(), (3, 5));
        assert_eq!(read, image);
    }

    #[test]
    fn test_missing_image() {
        assert!(matches!(
            read_mask_tiff(Path::new("/does/not/exist.tiff")),
            Err(CalibrationError::BadFilePath(_))
        ));
    }
}
