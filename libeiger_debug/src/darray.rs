use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{Array2, ArrayView2};
use serde_json::{json, Value};

use super::client::DetectorControl;
use super::error::DarrayError;

const PIXEL_MASK_KEY: &str = "pixel_mask";

/// Element types the detector uses for darray payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementType {
    U8,
    U16,
    U32,
}

impl ElementType {
    fn parse(type_str: &str) -> Result<Self, DarrayError> {
        match type_str {
            "<u1" | "|u1" => Ok(Self::U8),
            "<u2" => Ok(Self::U16),
            "<u4" => Ok(Self::U32),
            _ => Err(DarrayError::UnsupportedType(type_str.to_string())),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Decode a darray object (`{"__darray__": ..., "type", "shape", "filters", "data"}`)
/// into a `[rows, cols]` array
pub fn decode_darray(darray: &Value) -> Result<Array2<u32>, DarrayError> {
    if darray.get("__darray__").is_none() {
        return Err(DarrayError::NotADarray);
    }
    let element = ElementType::parse(
        darray
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DarrayError::MissingField("type"))?,
    )?;
    let shape: Vec<usize> = darray
        .get("shape")
        .and_then(Value::as_array)
        .ok_or(DarrayError::MissingField("shape"))?
        .iter()
        .map(|dim| dim.as_u64().map(|d| d as usize))
        .collect::<Option<Vec<usize>>>()
        .ok_or(DarrayError::MissingField("shape"))?;
    if shape.len() != 2 {
        return Err(DarrayError::UnsupportedType(format!("{}-d array", shape.len())));
    }
    if let Some(filters) = darray.get("filters").and_then(Value::as_array) {
        for filter in filters {
            match filter.as_str() {
                Some("base64") => (),
                _ => return Err(DarrayError::UnsupportedFilter(filter.to_string())),
            }
        }
    }
    let data = darray
        .get("data")
        .and_then(Value::as_str)
        .ok_or(DarrayError::MissingField("data"))?;

    let bytes = STANDARD.decode(data)?;
    let n_elements = shape[0] * shape[1];
    let expected = n_elements * element.size();
    if bytes.len() != expected {
        return Err(DarrayError::LengthMismatch(bytes.len(), expected));
    }

    let values: Vec<u32> = match element {
        ElementType::U8 => bytes.iter().map(|b| *b as u32).collect(),
        ElementType::U16 => {
            let mut buffer = vec![0u16; n_elements];
            LittleEndian::read_u16_into(&bytes, &mut buffer);
            buffer.into_iter().map(u32::from).collect()
        }
        ElementType::U32 => {
            let mut buffer = vec![0u32; n_elements];
            LittleEndian::read_u32_into(&bytes, &mut buffer);
            buffer
        }
    };
    Ok(Array2::from_shape_vec((shape[0], shape[1]), values)?)
}

/// Encode an array as a little-endian `<u4` darray object
pub fn encode_darray(array: ArrayView2<u32>) -> Value {
    let values: Vec<u32> = array.iter().copied().collect();
    let mut bytes = vec![0u8; values.len() * 4];
    LittleEndian::write_u32_into(&values, &mut bytes);
    json!({
        "__darray__": [1, 0, 0],
        "type": "<u4",
        "shape": [array.nrows(), array.ncols()],
        "filters": ["base64"],
        "data": STANDARD.encode(bytes),
    })
}

/// Read the pixel mask currently loaded on the detector
pub fn fetch_pixel_mask<C: DetectorControl + ?Sized>(control: &C) -> Result<Array2<u32>, DarrayError> {
    let reply = control.detector_config(PIXEL_MASK_KEY)?;
    let darray = reply.get("value").ok_or(DarrayError::MissingField("value"))?;
    let mask = decode_darray(darray)?;
    spdlog::info!("Fetched {}x{} pixel mask", mask.nrows(), mask.ncols());
    Ok(mask)
}

/// Replace the pixel mask loaded on the detector
pub fn upload_pixel_mask<C: DetectorControl + ?Sized>(
    control: &C,
    mask: ArrayView2<u32>,
) -> Result<(), DarrayError> {
    spdlog::info!("Uploading {}x{} pixel mask", mask.nrows(), mask.ncols());
    if let Some(changed) = control.set_detector_config(PIXEL_MASK_KEY, encode_darray(mask))? {
        spdlog::info!("Detector changed: {}", changed);
    }
    Ok(())
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_u4() {
        // [[1, 2], [3, 65536]]
        let bytes: Vec<u8> = [1u32, 2, 3, 65536]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let darray = json!({
            "__darray__": [1, 0, 0],
            "type": "<u4",
            "shape": [2, 2],
            "filters": ["base64"],
            "data": STANDARD.encode(bytes),
        });
        let mask = decode_darray(&darray).unwrap();
        assert_eq!(mask, ndarray::arr2(&[[1, 2], [3, 65536]]));
    }

    #[test]
    fn test_decode_narrow_types() {
        let darray = json!({
            "__darray__": [1, 0, 0],
            "type": "|u1",
            "shape": [1, 3],
            "filters": ["base64"],
            "data": STANDARD.encode([0u8, 8, 255]),
        });
        assert_eq!(decode_darray(&darray).unwrap(), ndarray::arr2(&[[0, 8, 255]]));

        let darray = json!({
            "__darray__": [1, 0, 0],
            "type": "<u2",
            "shape": [1, 2],
            "filters": ["base64"],
            "data": STANDARD.encode([0x01u8, 0x02, 0xff, 0xff]),
        });
        assert_eq!(decode_darray(&darray).unwrap(), ndarray::arr2(&[[0x0201, 0xffff]]));
    }

    #[test]
    fn test_encoded_mask_is_u4() {
        let mask = ndarray::arr2(&[[0u32, 1, 4], [8, 16, 1 << 31]]);
        let darray = encode_darray(mask.view());
        assert_eq!(darray["type"], "<u4");
        assert_eq!(darray["shape"], json!([2, 3]));
        assert_eq!(decode_darray(&darray).unwrap(), mask);
    }

    #[test]
    fn test_rejects_bad_darrays() {
        assert!(matches!(
            decode_darray(&json!({"value": 1})),
            Err(DarrayError::NotADarray)
        ));
        let wrong_length = json!({
            "__darray__": [1, 0, 0],
            "type": "<u4",
            "shape": [2, 2],
            "filters": ["base64"],
            "data": STANDARD.encode([0u8; 12]),
        });
        assert!(matches!(
            decode_darray(&wrong_length),
            Err(DarrayError::LengthMismatch(12, 16))
        ));
        let float = json!({
            "__darray__": [1, 0, 0],
            "type": "<f4",
            "shape": [1, 1],
            "filters": ["base64"],
            "data": STANDARD.encode([0u8; 4]),
        });
        assert!(matches!(
            decode_darray(&float),
            Err(DarrayError::UnsupportedType(_))
        ));
    }
}
