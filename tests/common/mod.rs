//! Shared helpers for integration tests: builds minimal single-segment
//! TDMS files with f64 channels.

/// ToC: metadata + new object list + raw data, little-endian.
const TOC: u32 = (1 << 1) | (1 << 2) | (1 << 3);

pub fn tdms_file(channels: &[(&str, &[f64])]) -> Vec<u8> {
    let mut meta = (channels.len() as u32).to_le_bytes().to_vec();
    for (path, values) in channels {
        meta.extend_from_slice(&(path.len() as u32).to_le_bytes());
        meta.extend_from_slice(path.as_bytes());
        meta.extend_from_slice(&20u32.to_le_bytes()); // raw index length
        meta.extend_from_slice(&10u32.to_le_bytes()); // f64
        meta.extend_from_slice(&1u32.to_le_bytes()); // dimension
        meta.extend_from_slice(&(values.len() as u64).to_le_bytes());
        meta.extend_from_slice(&0u32.to_le_bytes()); // no properties
    }

    let mut raw = Vec::new();
    for (_, values) in channels {
        for value in *values {
            raw.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut out = b"TDSm".to_vec();
    out.extend_from_slice(&TOC.to_le_bytes());
    out.extend_from_slice(&4713u32.to_le_bytes());
    out.extend_from_slice(&((meta.len() + raw.len()) as u64).to_le_bytes());
    out.extend_from_slice(&(meta.len() as u64).to_le_bytes());
    out.extend_from_slice(&meta);
    out.extend_from_slice(&raw);
    out
}

/// Long enough to pass the lead-in size check, but not a TDMS file.
pub fn corrupt_tdms() -> Vec<u8> {
    b"this is not a tdms file at all, sorry".to_vec()
}
