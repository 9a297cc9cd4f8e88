// The module tables below are the vendor's module maps, copied as-is. Each entry
// maps the id a module reports for itself to its place in the module grid:
// HardwareID -> ModuleGeometry(column, row, rotation, module number)
// The grid counts half-modules in the row direction, so a 4M (8 modules) has a
// 2 column by 8 row grid of 16 entries. The module number is the index under
// which the module's data is stored in an acquisition/calibration file.
//
// Rotation is 0 everywhere. It is kept on the record so a future table can use it.
use super::constants::{
    HALF_MODULE_HEIGHT, MODULE_GAP_HEIGHT, MODULE_GAP_WIDTH, MODULE_HEIGHT, MODULE_WIDTH,
};
use super::error::GeometryError;
use super::hardware_id::HardwareID;

/// Position of a module in the module grid, zero based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridPosition {
    pub column: usize,
    pub row: usize,
}

/// Size of the module grid of a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDimensions {
    pub rows: usize,
    pub columns: usize,
}

/// One physical detector module (more precisely: one half-module readout unit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleGeometry {
    pub hardware_id: HardwareID,
    pub position: GridPosition,
    pub rotation: i32,
    pub module_number: usize,
}

impl ModuleGeometry {
    const fn new(hardware_id: u16, column: usize, row: usize, module_number: usize) -> Self {
        Self {
            hardware_id: HardwareID::new(hardware_id),
            position: GridPosition { column, row },
            rotation: 0,
            module_number,
        }
    }

    /// Top-left pixel offset `(x, y)` of this module in the assembled sensor plane
    pub fn pixel_offset(&self) -> (usize, usize) {
        placement_offset(self.position)
    }
}

/// Compute the top-left pixel offset `(x, y)` for a module at a grid position.
///
/// Two grid rows make one module; odd rows are the upper half of a module and are
/// shifted by one half-module height.
pub fn placement_offset(position: GridPosition) -> (usize, usize) {
    let x = position.column * (MODULE_WIDTH + MODULE_GAP_WIDTH);
    let y = (position.row / 2) * (MODULE_HEIGHT + MODULE_GAP_HEIGHT)
        + (position.row % 2) * HALF_MODULE_HEIGHT;
    (x, y)
}

/// The detector sizes with a known module map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorSize {
    Eiger500K,
    Eiger1M,
    Eiger4M,
    Eiger9M,
    Eiger16M,
}

impl DetectorSize {
    /// All supported sizes, ordered by module count
    pub const ALL: [DetectorSize; 5] = [
        DetectorSize::Eiger500K,
        DetectorSize::Eiger1M,
        DetectorSize::Eiger4M,
        DetectorSize::Eiger9M,
        DetectorSize::Eiger16M,
    ];

    pub fn n_modules(&self) -> usize {
        self.modules().len()
    }

    pub fn dimensions(&self) -> GridDimensions {
        match self {
            DetectorSize::Eiger500K => GridDimensions { rows: 2, columns: 1 },
            DetectorSize::Eiger1M => GridDimensions { rows: 4, columns: 1 },
            DetectorSize::Eiger4M => GridDimensions { rows: 8, columns: 2 },
            DetectorSize::Eiger9M => GridDimensions { rows: 12, columns: 3 },
            DetectorSize::Eiger16M => GridDimensions { rows: 16, columns: 4 },
        }
    }

    pub fn modules(&self) -> &'static [ModuleGeometry] {
        match self {
            DetectorSize::Eiger500K => &MODULES_500K,
            DetectorSize::Eiger1M => &MODULES_1M,
            DetectorSize::Eiger4M => &MODULES_4M,
            DetectorSize::Eiger9M => &MODULES_9M,
            DetectorSize::Eiger16M => &MODULES_16M,
        }
    }

    /// Exact lookup by module count
    pub fn from_module_count(n_modules: usize) -> Result<Self, GeometryError> {
        Self::ALL
            .into_iter()
            .find(|size| size.n_modules() == n_modules)
            .ok_or(GeometryError::UnsupportedDetectorSize(n_modules))
    }

    /// Order in which equally distant sizes are preferred by [`DetectorSize::nearest`].
    /// This is the order the detector tooling has always resolved ties in.
    const TIE_ORDER: [DetectorSize; 5] = [
        DetectorSize::Eiger4M,
        DetectorSize::Eiger9M,
        DetectorSize::Eiger500K,
        DetectorSize::Eiger1M,
        DetectorSize::Eiger16M,
    ];

    /// The supported size whose module count is closest to `n_modules`.
    ///
    /// Ties follow `TIE_ORDER`, so 10 modules maps to the 4M and 3 to the
    /// 500K. Any count maps to *some* table, so a new detector model silently gets the
    /// wrong geometry here.
    pub fn nearest(n_modules: usize) -> Self {
        let mut best = Self::TIE_ORDER[0];
        for size in Self::TIE_ORDER {
            if size.n_modules().abs_diff(n_modules) < best.n_modules().abs_diff(n_modules) {
                best = size;
            }
        }
        best
    }
}

impl std::fmt::Display for DetectorSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DetectorSize::Eiger500K => "EIGER 500K",
            DetectorSize::Eiger1M => "EIGER 1M",
            DetectorSize::Eiger4M => "EIGER 4M",
            DetectorSize::Eiger9M => "EIGER 9M",
            DetectorSize::Eiger16M => "EIGER 16M",
        };
        write!(f, "{name}")
    }
}

/// The module map and grid of one detector size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorGeometry {
    pub size: DetectorSize,
    pub modules: &'static [ModuleGeometry],
    pub dimensions: GridDimensions,
}

impl DetectorGeometry {
    pub fn new(size: DetectorSize) -> Self {
        Self {
            size,
            modules: size.modules(),
            dimensions: size.dimensions(),
        }
    }

    /// Get the geometry of a module by the id it reports.
    ///
    /// If returns None the module is not part of this detector size
    pub fn module(&self, hardware_id: &HardwareID) -> Option<&'static ModuleGeometry> {
        self.modules
            .iter()
            .find(|module| module.hardware_id == *hardware_id)
    }

    /// Get the geometry of a module by its logical module number
    pub fn module_by_number(&self, module_number: usize) -> Option<&'static ModuleGeometry> {
        self.modules
            .iter()
            .find(|module| module.module_number == module_number)
    }

    /// Pixel dimensions `[x, y]` of the assembled sensor plane (gaps included)
    pub fn sensor_shape(&self) -> [usize; 2] {
        let columns = self.dimensions.columns;
        let module_rows = self.dimensions.rows / 2;
        [
            columns * MODULE_WIDTH + columns.saturating_sub(1) * MODULE_GAP_WIDTH,
            module_rows * MODULE_HEIGHT + module_rows.saturating_sub(1) * MODULE_GAP_HEIGHT,
        ]
    }
}

/// Look up the geometry table of a detector with exactly `n_modules` modules
pub fn lookup(n_modules: usize) -> Result<DetectorGeometry, GeometryError> {
    Ok(DetectorGeometry::new(DetectorSize::from_module_count(n_modules)?))
}

/// Look up the geometry table of the supported detector closest to `n_modules`.
///
/// Used with module counts derived from live status data, which can be off by a few.
pub fn lookup_nearest(n_modules: usize) -> DetectorGeometry {
    let size = DetectorSize::nearest(n_modules);
    if size.n_modules() != n_modules {
        spdlog::warn!(
            "No module map for {} modules, using the {} map ({} modules)",
            n_modules,
            size,
            size.n_modules()
        );
    }
    DetectorGeometry::new(size)
}

static MODULES_500K: [ModuleGeometry; 2] = [
    ModuleGeometry::new(0x1100, 0, 0, 0),
    ModuleGeometry::new(0x1110, 0, 1, 1),
];

static MODULES_1M: [ModuleGeometry; 4] = [
    ModuleGeometry::new(0x1100, 0, 0, 0),
    ModuleGeometry::new(0x1110, 0, 1, 1),
    ModuleGeometry::new(0x1120, 0, 2, 2),
    ModuleGeometry::new(0x1130, 0, 3, 3),
];

static MODULES_4M: [ModuleGeometry; 16] = [
    ModuleGeometry::new(0x1170, 0, 0, 7),
    ModuleGeometry::new(0x1150, 0, 1, 5),
    ModuleGeometry::new(0x1120, 0, 2, 2),
    ModuleGeometry::new(0x1100, 0, 3, 0),
    ModuleGeometry::new(0x1160, 0, 4, 6),
    ModuleGeometry::new(0x1140, 0, 5, 4),
    ModuleGeometry::new(0x1130, 0, 6, 3),
    ModuleGeometry::new(0x1110, 0, 7, 1),
    ModuleGeometry::new(0x11B0, 1, 0, 11),
    ModuleGeometry::new(0x1190, 1, 1, 9),
    ModuleGeometry::new(0x11E0, 1, 2, 14),
    ModuleGeometry::new(0x11C0, 1, 3, 12),
    ModuleGeometry::new(0x11A0, 1, 4, 10),
    ModuleGeometry::new(0x1180, 1, 5, 8),
    ModuleGeometry::new(0x11F0, 1, 6, 15),
    ModuleGeometry::new(0x11D0, 1, 7, 13),
];

static MODULES_9M: [ModuleGeometry; 36] = [
    ModuleGeometry::new(0x3120, 0, 0, 19),
    ModuleGeometry::new(0x3100, 0, 1, 18),
    ModuleGeometry::new(0x31C0, 0, 2, 25),
    ModuleGeometry::new(0x31E0, 0, 3, 26),
    ModuleGeometry::new(0x3190, 0, 4, 23),
    ModuleGeometry::new(0x31B0, 0, 5, 24),
    ModuleGeometry::new(0x41E0, 0, 6, 35),
    ModuleGeometry::new(0x41C0, 0, 7, 34),
    ModuleGeometry::new(0x41B0, 0, 8, 33),
    ModuleGeometry::new(0x4190, 0, 9, 32),
    ModuleGeometry::new(0x4150, 0, 10, 29),
    ModuleGeometry::new(0x4170, 0, 11, 31),
    ModuleGeometry::new(0x3170, 1, 0, 22),
    ModuleGeometry::new(0x3150, 1, 1, 21),
    ModuleGeometry::new(0x21E0, 1, 2, 16),
    ModuleGeometry::new(0x21C0, 1, 3, 15),
    ModuleGeometry::new(0x2100, 1, 4, 9),
    ModuleGeometry::new(0x2120, 1, 5, 10),
    ModuleGeometry::new(0x11C0, 1, 6, 7),
    ModuleGeometry::new(0x11E0, 1, 7, 8),
    ModuleGeometry::new(0x1190, 1, 8, 4),
    ModuleGeometry::new(0x11B0, 1, 9, 6),
    ModuleGeometry::new(0x4100, 1, 10, 27),
    ModuleGeometry::new(0x4120, 1, 11, 28),
    ModuleGeometry::new(0x3130, 2, 0, 20),
    ModuleGeometry::new(0x21F0, 2, 1, 17),
    ModuleGeometry::new(0x21B0, 2, 2, 14),
    ModuleGeometry::new(0x2190, 2, 3, 13),
    ModuleGeometry::new(0x2150, 2, 4, 11),
    ModuleGeometry::new(0x2170, 2, 5, 12),
    ModuleGeometry::new(0x1120, 2, 6, 1),
    ModuleGeometry::new(0x1100, 2, 7, 0),
    ModuleGeometry::new(0x1170, 2, 8, 3),
    ModuleGeometry::new(0x1150, 2, 9, 2),
    ModuleGeometry::new(0x11A0, 2, 10, 5),
    ModuleGeometry::new(0x4160, 2, 11, 30),
];

static MODULES_16M: [ModuleGeometry; 64] = [
    ModuleGeometry::new(0x21B0, 0, 0, 27),
    ModuleGeometry::new(0x2190, 0, 1, 25),
    ModuleGeometry::new(0x21E0, 0, 2, 30),
    ModuleGeometry::new(0x21C0, 0, 3, 28),
    ModuleGeometry::new(0x2170, 0, 4, 23),
    ModuleGeometry::new(0x2150, 0, 5, 21),
    ModuleGeometry::new(0x2120, 0, 6, 18),
    ModuleGeometry::new(0x2100, 0, 7, 16),
    ModuleGeometry::new(0x21A0, 1, 0, 26),
    ModuleGeometry::new(0x2180, 1, 1, 24),
    ModuleGeometry::new(0x21F0, 1, 2, 31),
    ModuleGeometry::new(0x21D0, 1, 3, 29),
    ModuleGeometry::new(0x2160, 1, 4, 22),
    ModuleGeometry::new(0x2140, 1, 5, 20),
    ModuleGeometry::new(0x2130, 1, 6, 19),
    ModuleGeometry::new(0x2110, 1, 7, 17),
    ModuleGeometry::new(0x41B0, 0, 8, 59),
    ModuleGeometry::new(0x4190, 0, 9, 57),
    ModuleGeometry::new(0x41E0, 0, 10, 62),
    ModuleGeometry::new(0x41C0, 0, 11, 60),
    ModuleGeometry::new(0x4170, 0, 12, 55),
    ModuleGeometry::new(0x4150, 0, 13, 53),
    ModuleGeometry::new(0x4120, 0, 14, 50),
    ModuleGeometry::new(0x4100, 0, 15, 48),
    ModuleGeometry::new(0x41A0, 1, 8, 58),
    ModuleGeometry::new(0x4180, 1, 9, 56),
    ModuleGeometry::new(0x41F0, 1, 10, 63),
    ModuleGeometry::new(0x41D0, 1, 11, 61),
    ModuleGeometry::new(0x4160, 1, 12, 54),
    ModuleGeometry::new(0x4140, 1, 13, 52),
    ModuleGeometry::new(0x4130, 1, 14, 51),
    ModuleGeometry::new(0x4110, 1, 15, 49),
    ModuleGeometry::new(0x1160, 2, 0, 6),
    ModuleGeometry::new(0x1140, 2, 1, 4),
    ModuleGeometry::new(0x1130, 2, 2, 3),
    ModuleGeometry::new(0x1110, 2, 3, 1),
    ModuleGeometry::new(0x1180, 2, 4, 8),
    ModuleGeometry::new(0x11A0, 2, 5, 10),
    ModuleGeometry::new(0x11D0, 2, 6, 13),
    ModuleGeometry::new(0x11F0, 2, 7, 15),
    ModuleGeometry::new(0x1170, 3, 0, 7),
    ModuleGeometry::new(0x1150, 3, 1, 5),
    ModuleGeometry::new(0x1120, 3, 2, 2),
    ModuleGeometry::new(0x1100, 3, 3, 0),
    ModuleGeometry::new(0x1190, 3, 4, 9),
    ModuleGeometry::new(0x11B0, 3, 5, 11),
    ModuleGeometry::new(0x11C0, 3, 6, 12),
    ModuleGeometry::new(0x11E0, 3, 7, 14),
    ModuleGeometry::new(0x3160, 2, 8, 38),
    ModuleGeometry::new(0x3140, 2, 9, 36),
    ModuleGeometry::new(0x3130, 2, 10, 35),
    ModuleGeometry::new(0x3110, 2, 11, 33),
    ModuleGeometry::new(0x3180, 2, 12, 40),
    ModuleGeometry::new(0x31A0, 2, 13, 42),
    ModuleGeometry::new(0x31D0, 2, 14, 45),
    ModuleGeometry::new(0x31F0, 2, 15, 47),
    ModuleGeometry::new(0x3170, 3, 8, 39),
    ModuleGeometry::new(0x3150, 3, 9, 37),
    ModuleGeometry::new(0x3120, 3, 10, 34),
    ModuleGeometry::new(0x3100, 3, 11, 32),
    ModuleGeometry::new(0x3190, 3, 12, 41),
    ModuleGeometry::new(0x31B0, 3, 13, 43),
    ModuleGeometry::new(0x31C0, 3, 14, 44),
    ModuleGeometry::new(0x31E0, 3, 15, 46),
];

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_module_numbers_are_contiguous() {
        for size in DetectorSize::ALL {
            let mut numbers: Vec<usize> = size.modules().iter().map(|m| m.module_number).collect();
            numbers.sort_unstable();
            let expected: Vec<usize> = (0..size.n_modules()).collect();
            assert_eq!(numbers, expected, "{size}");
        }
    }

    #[test]
    fn test_hardware_ids_are_unique() {
        for size in DetectorSize::ALL {
            let ids: HashSet<HardwareID> = size.modules().iter().map(|m| m.hardware_id).collect();
            assert_eq!(ids.len(), size.n_modules(), "{size}");
        }
    }

    #[test]
    fn test_positions_fill_the_grid() {
        for size in DetectorSize::ALL {
            let dims = size.dimensions();
            assert_eq!(dims.rows * dims.columns, size.n_modules());
            let positions: HashSet<GridPosition> =
                size.modules().iter().map(|m| m.position).collect();
            assert_eq!(positions.len(), size.n_modules());
            assert!(positions
                .iter()
                .all(|p| p.row < dims.rows && p.column < dims.columns));
        }
    }

    #[test]
    fn test_exact_lookup() {
        for (n, size) in [
            (2, DetectorSize::Eiger500K),
            (4, DetectorSize::Eiger1M),
            (16, DetectorSize::Eiger4M),
            (36, DetectorSize::Eiger9M),
            (64, DetectorSize::Eiger16M),
        ] {
            let geometry = lookup(n).unwrap();
            assert_eq!(geometry.size, size);
            assert_eq!(geometry.modules.len(), n);
        }
        assert!(matches!(
            lookup(40),
            Err(GeometryError::UnsupportedDetectorSize(40))
        ));
    }

    #[test]
    fn test_nearest_lookup() {
        assert_eq!(DetectorSize::nearest(40), DetectorSize::Eiger9M);
        assert_eq!(DetectorSize::nearest(0), DetectorSize::Eiger500K);
        assert_eq!(DetectorSize::nearest(3), DetectorSize::Eiger500K);
        assert_eq!(DetectorSize::nearest(10), DetectorSize::Eiger4M);
        assert_eq!(DetectorSize::nearest(26), DetectorSize::Eiger4M);
        assert_eq!(DetectorSize::nearest(50), DetectorSize::Eiger9M);
        assert_eq!(DetectorSize::nearest(15), DetectorSize::Eiger4M);
        assert_eq!(DetectorSize::nearest(1000), DetectorSize::Eiger16M);
        assert_eq!(lookup_nearest(36).size, DetectorSize::Eiger9M);
    }

    #[test]
    fn test_module_queries() {
        let geometry = lookup(16).unwrap();
        let module = geometry.module(&HardwareID::new(0x11B0)).unwrap();
        assert_eq!(module.position, GridPosition { column: 1, row: 0 });
        assert_eq!(module.module_number, 11);
        assert_eq!(
            geometry.module_by_number(0).unwrap().hardware_id,
            HardwareID::new(0x1100)
        );
        assert!(geometry.module(&HardwareID::new(0x3100)).is_none());
    }

    #[test]
    fn test_placement_offset() {
        let (x, y) = placement_offset(GridPosition { column: 2, row: 3 });
        assert_eq!(x, 2 * (MODULE_WIDTH + MODULE_GAP_WIDTH));
        assert_eq!(y, (MODULE_HEIGHT + MODULE_GAP_HEIGHT) + HALF_MODULE_HEIGHT);
        assert_eq!((x, y), (2080, 808));
        assert_eq!(placement_offset(GridPosition { column: 0, row: 0 }), (0, 0));
    }

    #[test]
    fn test_sensor_shapes() {
        assert_eq!(lookup(2).unwrap().sensor_shape(), [1030, 514]);
        assert_eq!(lookup(4).unwrap().sensor_shape(), [1030, 1065]);
        assert_eq!(lookup(16).unwrap().sensor_shape(), [2070, 2167]);
        assert_eq!(lookup(36).unwrap().sensor_shape(), [3110, 3269]);
        assert_eq!(lookup(64).unwrap().sensor_shape(), [4150, 4371]);
    }
}
