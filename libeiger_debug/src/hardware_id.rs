use std::fmt;
use std::str::FromStr;

use super::error::GeometryError;

/// HardwareID is the identifier a detector module reports for itself (e.g. `0x11B0`).
///
/// It is only unique within a single detector-size table; the same id shows up in
/// several tables at different grid positions.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, PartialOrd, Ord)]
pub struct HardwareID(pub u16);

impl HardwareID {
    /// Construct a new hardware ID
    pub const fn new(id: u16) -> Self {
        HardwareID(id)
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for HardwareID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

impl FromStr for HardwareID {
    type Err = GeometryError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            u16::from_str_radix(hex, 16)
        } else {
            trimmed.parse::<u16>()
        };
        parsed
            .map(HardwareID)
            .map_err(|_| GeometryError::BadHardwareID(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = HardwareID::new(0x11B0);
        assert_eq!(id.to_string(), "0x11B0");
        assert_eq!("0x11B0".parse::<HardwareID>().unwrap(), id);
        assert_eq!("4528".parse::<HardwareID>().unwrap(), id);
        assert!("0xZZZZ".parse::<HardwareID>().is_err());
    }
}
