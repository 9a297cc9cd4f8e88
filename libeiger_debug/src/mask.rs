use fxhash::FxHashMap;
use ndarray::{s, Array2, ArrayView2};

use super::constants::{
    BARE_HALF_MODULE_HEIGHT, BARE_HALF_MODULE_WIDTH, CHIPS_PER_HALF_MODULE, CHIP_LENGTH,
    HALF_MODULE_HEIGHT, HALF_MODULE_WIDTH, INVALID_PIXEL,
};
use super::error::MaskError;
use super::geometry::{DetectorGeometry, DetectorSize, GridPosition};
use super::hardware_id::HardwareID;

/// A per-module calibration mask as stored by the detector: 256 rows by 1024
/// columns (4 chips side by side), no gaps.
pub type ModuleMask = Array2<u32>;

/// The full-sensor pixel mask.
///
/// Indexed `[x, y]` (the sensor's on-disk orientation). Use [`AssembledMask::to_image`]
/// for the row-major `[y, x]` image.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledMask {
    size: DetectorSize,
    data: Array2<u32>,
}

impl AssembledMask {
    pub fn size(&self) -> DetectorSize {
        self.size
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.data.nrows(), self.data.ncols()]
    }

    pub fn data(&self) -> ArrayView2<'_, u32> {
        self.data.view()
    }

    /// The mask as an image, rows along the sensor y axis
    pub fn to_image(&self) -> Array2<u32> {
        self.data.t().to_owned()
    }

    /// Number of pixels still holding the invalid fill value
    pub fn n_invalid(&self) -> usize {
        self.data.iter().filter(|v| **v == INVALID_PIXEL).count()
    }
}

/// Pad a chip by one pixel on every side, replicating the nearest edge pixel
fn pad_chip(chip: ArrayView2<u32>) -> Array2<u32> {
    let (rows, cols) = chip.dim();
    let mut padded = Array2::<u32>::zeros((rows + 2, cols + 2));
    padded.slice_mut(s![1..rows + 1, 1..cols + 1]).assign(&chip);
    // Columns first, then rows, so the corners take the corner pixel
    let edge = padded.column(1).to_owned();
    padded.column_mut(0).assign(&edge);
    let edge = padded.column(cols).to_owned();
    padded.column_mut(cols + 1).assign(&edge);
    let edge = padded.row(1).to_owned();
    padded.row_mut(0).assign(&edge);
    let edge = padded.row(rows).to_owned();
    padded.row_mut(rows + 1).assign(&edge);
    padded
}

/// Convert one module's calibration mask into the block placed on the sensor plane.
///
/// The result is `HALF_MODULE_WIDTH x HALF_MODULE_HEIGHT` (1030 x 257), indexed `[x, y]`.
/// Modules in even grid rows are mounted rotated by 180 degrees. The virtual pixel
/// kept after trimming is always the one facing the neighbouring half-module.
pub fn process_module(
    hardware_id: HardwareID,
    raw: ArrayView2<u32>,
    position: GridPosition,
) -> Result<Array2<u32>, MaskError> {
    if raw.dim() != (BARE_HALF_MODULE_HEIGHT, BARE_HALF_MODULE_WIDTH) {
        return Err(MaskError::BadModuleShape(hardware_id, raw.shape().to_vec()));
    }

    let is_even_row = position.row % 2 == 0;
    let transposed = raw.t();
    let data = if is_even_row {
        transposed.slice_move(s![..;-1, ..;-1])
    } else {
        transposed
    };

    let padded_length = CHIP_LENGTH + 2;
    let mut stacked = Array2::<u32>::zeros((CHIPS_PER_HALF_MODULE * padded_length, padded_length));
    for chip in 0..CHIPS_PER_HALF_MODULE {
        let chip_start = chip * CHIP_LENGTH;
        let padded = pad_chip(data.slice(s![chip_start..chip_start + CHIP_LENGTH, ..]));
        let row_start = chip * padded_length;
        stacked
            .slice_mut(s![row_start..row_start + padded_length, ..])
            .assign(&padded);
    }

    let n_rows = stacked.nrows();
    let block = if is_even_row {
        stacked.slice(s![1..n_rows - 1, 1..])
    } else {
        stacked.slice(s![1..n_rows - 1, ..padded_length - 1])
    };
    debug_assert_eq!(block.dim(), (HALF_MODULE_WIDTH, HALF_MODULE_HEIGHT));
    Ok(block.to_owned())
}

/// Assemble the full-sensor pixel mask from per-module calibration masks.
///
/// Modules missing from `module_masks` leave their region at the invalid fill value.
/// Masks for ids that are not part of the geometry are ignored.
pub fn assemble(
    module_masks: &FxHashMap<HardwareID, ModuleMask>,
    geometry: &DetectorGeometry,
) -> Result<AssembledMask, MaskError> {
    let shape = geometry.sensor_shape();
    let mut mask = Array2::<u32>::from_elem((shape[0], shape[1]), INVALID_PIXEL);

    for module in geometry.modules.iter() {
        let raw = match module_masks.get(&module.hardware_id) {
            Some(raw) => raw,
            None => {
                spdlog::debug!(
                    "No calibration mask for module {} ({})",
                    module.module_number,
                    module.hardware_id
                );
                continue;
            }
        };
        let block = process_module(module.hardware_id, raw.view(), module.position)?;
        let (x_start, y_start) = module.pixel_offset();
        let (x_end, y_end) = (x_start + block.nrows(), y_start + block.ncols());
        if x_end > shape[0] || y_end > shape[1] {
            return Err(MaskError::PlacementOutOfBounds(
                module.hardware_id,
                module.position.column,
                module.position.row,
                shape,
            ));
        }
        spdlog::debug!(
            "Storing module {} at [{}, {}]",
            module.module_number,
            x_start,
            y_start
        );
        mask.slice_mut(s![x_start..x_end, y_start..y_end])
            .assign(&block);
    }

    for hardware_id in module_masks.keys() {
        if geometry.module(hardware_id).is_none() {
            spdlog::warn!(
                "Module {} is not part of the {} map and was skipped",
                hardware_id,
                geometry.size
            );
        }
    }

    Ok(AssembledMask {
        size: geometry.size,
        data: mask,
    })
}

/// Positions `(row, col)` where two masks differ
pub fn compare_masks(
    left: ArrayView2<u32>,
    right: ArrayView2<u32>,
) -> Result<Vec<(usize, usize)>, MaskError> {
    if left.dim() != right.dim() {
        return Err(MaskError::ShapeMismatch(
            left.shape().to_vec(),
            right.shape().to_vec(),
        ));
    }
    Ok(left
        .indexed_iter()
        .zip(right.iter())
        .filter(|((_, l), r)| *l != *r)
        .map(|((idx, _), _)| idx)
        .collect())
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::lookup;

    fn patterned_mask() -> ModuleMask {
        Array2::from_shape_fn((BARE_HALF_MODULE_HEIGHT, BARE_HALF_MODULE_WIDTH), |(r, c)| {
            (r * BARE_HALF_MODULE_WIDTH + c) as u32 + 2
        })
    }

    #[test]
    fn test_empty_assembly_is_invalid() {
        let geometry = lookup(16).unwrap();
        let mask = assemble(&FxHashMap::default(), &geometry).unwrap();
        assert_eq!(mask.shape(), [2070, 2167]);
        assert!(mask.data().iter().all(|v| *v == INVALID_PIXEL));
        assert_eq!(mask.n_invalid(), 2070 * 2167);
        assert_eq!(mask.to_image().dim(), (2167, 2070));
    }

    #[test]
    fn test_odd_row_module() {
        let raw = patterned_mask();
        let id = HardwareID::new(0x1100);
        let block = process_module(id, raw.view(), GridPosition { column: 0, row: 3 }).unwrap();
        assert_eq!(block.dim(), (HALF_MODULE_WIDTH, HALF_MODULE_HEIGHT));
        for (chip, local, j) in [(0, 0, 0), (1, 17, 100), (3, 255, 255), (2, 128, 3)] {
            let i = chip * CHIP_LENGTH + local;
            assert_eq!(block[[chip * 258 + local, j + 1]], raw[[j, i]]);
        }
        // virtual pixels between chips 0 and 1 repeat the chip edges
        assert_eq!(block[[256, 10]], block[[255, 10]]);
        assert_eq!(block[[257, 10]], block[[258, 10]]);
        // virtual column on the low y side
        assert_eq!(block[[40, 0]], block[[40, 1]]);
    }

    #[test]
    fn test_even_row_module_is_rotated() {
        let raw = patterned_mask();
        let id = HardwareID::new(0x1170);
        let block = process_module(id, raw.view(), GridPosition { column: 0, row: 0 }).unwrap();
        for (chip, local, j) in [(0, 0, 0), (1, 17, 100), (3, 255, 255), (2, 128, 3)] {
            let i = chip * CHIP_LENGTH + local;
            assert_eq!(block[[chip * 258 + local, j]], raw[[255 - j, 1023 - i]]);
        }
        // virtual column on the high y side
        assert_eq!(block[[40, 256]], block[[40, 255]]);
    }

    #[test]
    fn test_assembly_places_modules() {
        let geometry = lookup(16).unwrap();
        let raw = patterned_mask();
        let mut masks = FxHashMap::default();
        masks.insert(HardwareID::new(0x1100), raw.clone()); // column 0, row 3
        masks.insert(HardwareID::new(0x11D0), raw.clone()); // column 1, row 7
        let mask = assemble(&masks, &geometry).unwrap();

        let (x0, y0) = (0, 551 + 257);
        assert_eq!(mask.data()[[x0, y0 + 1]], raw[[0, 0]]);
        assert_eq!(mask.data()[[x0 + 258 + 5, y0 + 7 + 1]], raw[[7, 256 + 5]]);

        let (x1, y1) = (1040, 3 * 551 + 257);
        assert_eq!(mask.data()[[x1 + 1029, y1 + 256]], raw[[255, 1023]]);
        assert_eq!(y1 + HALF_MODULE_HEIGHT, 2167);

        // module gap and uncovered modules stay invalid
        assert_eq!(mask.data()[[1035, y0 + 10]], INVALID_PIXEL);
        assert_eq!(mask.data()[[0, 0]], INVALID_PIXEL);
        assert_eq!(
            mask.n_invalid(),
            2070 * 2167 - 2 * HALF_MODULE_WIDTH * HALF_MODULE_HEIGHT
        );
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let geometry = lookup(4).unwrap();
        let mut masks = FxHashMap::default();
        for (n, module) in geometry.modules.iter().enumerate() {
            let raw = Array2::from_shape_fn((256, 1024), |(r, c)| ((r + c + n) % 7) as u32);
            masks.insert(module.hardware_id, raw);
        }
        let first = assemble(&masks, &geometry).unwrap();
        let second = assemble(&masks, &geometry).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.shape(), [1030, 1065]);
    }

    #[test]
    fn test_bad_module_shape() {
        let geometry = lookup(2).unwrap();
        let mut masks = FxHashMap::default();
        masks.insert(HardwareID::new(0x1100), Array2::<u32>::zeros((512, 1030)));
        assert!(matches!(
            assemble(&masks, &geometry),
            Err(MaskError::BadModuleShape(_, _))
        ));
    }

    #[test]
    fn test_compare_masks() {
        let left = Array2::<u32>::zeros((3, 4));
        let mut right = left.clone();
        right[[1, 2]] = 4;
        right[[2, 0]] = 1;
        assert_eq!(
            compare_masks(left.view(), right.view()).unwrap(),
            vec![(1, 2), (2, 0)]
        );
        assert!(compare_masks(left.view(), Array2::<u32>::zeros((4, 3)).view()).is_err());
    }
}
