use ndarray::{Array2, ArrayView2, Zip};
use std::collections::BTreeMap;
use std::path::Path;

use super::constants::{HOT_PIXEL_FLAG_BIT, HOT_PIXEL_MAX_FRAMES, HOT_PIXEL_THRESHOLD};
use super::error::CalibrationError;
use super::hdf_reader::{read_master_pixel_mask, FrameReader};

/// Result of a hot pixel search
#[derive(Debug, Clone)]
pub struct HotPixelReport {
    /// The input pixel mask with the hot pixel bit added
    pub mask: Array2<u32>,
    pub n_tested: usize,
    /// Number of pixels per non-zero hit count
    pub histogram: BTreeMap<u32, usize>,
    /// Flagged pixels as `(row, col)`
    pub hot_pixels: Vec<(usize, usize)>,
}

/// Counts, per pixel, how many dark frames reach a threshold.
///
/// A pixel that fires in more than half of the frames is over-responding and gets
/// `1 << flag_bit` set in the pixel mask.
#[derive(Debug, Clone)]
pub struct HotPixelFinder {
    threshold: u32,
    flag_bit: u32,
    hit_count: Array2<u32>,
    n_tested: usize,
}

impl HotPixelFinder {
    /// Fails if `flag_bit` does not address a bit of the 32-bit mask
    pub fn new(
        shape: (usize, usize),
        threshold: u32,
        flag_bit: u32,
    ) -> Result<Self, CalibrationError> {
        if flag_bit >= u32::BITS {
            return Err(CalibrationError::BadFlagBit(flag_bit));
        }
        Ok(Self {
            threshold,
            flag_bit,
            hit_count: Array2::zeros(shape),
            n_tested: 0,
        })
    }

    pub fn add_frame(&mut self, frame: ArrayView2<u32>) -> Result<(), CalibrationError> {
        if frame.dim() != self.hit_count.dim() {
            return Err(CalibrationError::FrameShape(
                frame.shape().to_vec(),
                self.hit_count.shape().to_vec(),
            ));
        }
        let threshold = self.threshold;
        Zip::from(&mut self.hit_count)
            .and(&frame)
            .for_each(|count, value| {
                if *value >= threshold {
                    *count += 1;
                }
            });
        self.n_tested += 1;
        Ok(())
    }

    pub fn n_tested(&self) -> usize {
        self.n_tested
    }

    /// Flag hot pixels into `current_mask`, consuming the finder
    pub fn finish(self, current_mask: ArrayView2<u32>) -> Result<HotPixelReport, CalibrationError> {
        if current_mask.dim() != self.hit_count.dim() {
            return Err(CalibrationError::FrameShape(
                current_mask.shape().to_vec(),
                self.hit_count.shape().to_vec(),
            ));
        }
        let mut histogram = BTreeMap::new();
        for count in self.hit_count.iter().filter(|c| **c > 0) {
            *histogram.entry(*count).or_insert(0) += 1;
        }

        let limit = (self.n_tested / 2) as u32;
        let flag = 1u32 << self.flag_bit;
        let mut mask = current_mask.to_owned();
        let mut hot_pixels = Vec::new();
        for ((idx, count), value) in self.hit_count.indexed_iter().zip(mask.iter_mut()) {
            if *count > limit {
                *value |= flag;
                hot_pixels.push(idx);
            }
        }

        Ok(HotPixelReport {
            mask,
            n_tested: self.n_tested,
            histogram,
            hot_pixels,
        })
    }
}

/// Search the dark frames of a master file for hot pixels.
///
/// Uses the pixel mask stored in the master file as the starting mask.
pub fn flag_hot_pixels(
    master_path: &Path,
    threshold: Option<u32>,
    flag_bit: Option<u32>,
) -> Result<HotPixelReport, CalibrationError> {
    let current_mask = read_master_pixel_mask(master_path)?;
    let mut finder = HotPixelFinder::new(
        current_mask.dim(),
        threshold.unwrap_or(HOT_PIXEL_THRESHOLD),
        flag_bit.unwrap_or(HOT_PIXEL_FLAG_BIT),
    )?;
    let reader = FrameReader::open(master_path)?;
    reader.for_each_frame(HOT_PIXEL_MAX_FRAMES, |_, frame| finder.add_frame(frame.view()))?;

    let report = finder.finish(current_mask.view())?;
    for (count, n_pixels) in report.histogram.iter() {
        spdlog::info!("  {:6} times ({:3} pixels)", count, n_pixels);
    }
    spdlog::info!(
        "Detected {} over-responding pixels in {} frames",
        report.hot_pixels.len(),
        report.n_tested
    );
    Ok(report)
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_pixels_hot_in_most_frames() {
        let mut finder = HotPixelFinder::new((2, 3), 1, 3).unwrap();
        for n in 0..4 {
            let mut frame = Array2::<u32>::zeros((2, 3));
            frame[[0, 1]] = 5; // always hot
            if n < 2 {
                frame[[1, 2]] = 1; // hot in exactly half, not flagged
            }
            if n < 3 {
                frame[[1, 0]] = 2;
            }
            finder.add_frame(frame.view()).unwrap();
        }
        let mut current = Array2::<u32>::zeros((2, 3));
        current[[0, 1]] = 1;
        let report = finder.finish(current.view()).unwrap();

        assert_eq!(report.n_tested, 4);
        assert_eq!(report.hot_pixels, vec![(0, 1), (1, 0)]);
        assert_eq!(report.mask[[0, 1]], 1 | 8);
        assert_eq!(report.mask[[1, 0]], 8);
        assert_eq!(report.mask[[1, 2]], 0);
        assert_eq!(report.histogram.get(&4), Some(&1));
        assert_eq!(report.histogram.get(&3), Some(&1));
        assert_eq!(report.histogram.get(&2), Some(&1));
    }

    #[test]
    fn test_frame_shape_mismatch() {
        let mut finder = HotPixelFinder::new((2, 3), 1, 3).unwrap();
        assert!(finder.add_frame(Array2::<u32>::zeros((3, 2)).view()).is_err());
        assert_eq!(finder.n_tested(), 0);
    }

    #[test]
    fn test_flag_bit_outside_mask_is_rejected() {
        assert!(matches!(
            HotPixelFinder::new((2, 3), 1, 32),
            Err(CalibrationError::BadFlagBit(32))
        ));
        let finder = HotPixelFinder::new((2, 3), 1, 31).unwrap();
        let report = finder.finish(Array2::<u32>::zeros((2, 3)).view()).unwrap();
        assert!(report.hot_pixels.is_empty());
    }
}
