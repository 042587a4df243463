//! Reader for NI TDMS structured waveform files.
//!
//! Covers the subset produced by standard LabVIEW writers: segmented files,
//! little- and big-endian raw data, contiguous channel blocks, repeated
//! chunks, incremental object lists, and numeric/bool/string/timestamp
//! channels with property tables. Interleaved and DAQmx raw data are
//! rejected with a descriptive error.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

mod reader;

use reader::{ByteOrder, Reader};

const LEAD_IN_TAG: &[u8] = b"TDSm";
const LEAD_IN_LEN: usize = 28;

const TOC_METADATA: u32 = 1 << 1;
const TOC_NEW_OBJ_LIST: u32 = 1 << 2;
const TOC_RAW_DATA: u32 = 1 << 3;
const TOC_INTERLEAVED: u32 = 1 << 5;
const TOC_BIG_ENDIAN: u32 = 1 << 6;
const TOC_DAQMX: u32 = 1 << 7;

const NO_RAW_DATA: u32 = 0xFFFF_FFFF;
const MATCHES_PREVIOUS: u32 = 0x0000_0000;
const DAQMX_FORMAT_CHANGING: u32 = 0x6912_0000;
const DAQMX_DIGITAL_LINE: u32 = 0x6913_0000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TdmsError {
    #[error("not a TDMS file (bad lead-in tag)")]
    BadTag,

    #[error("file too small to contain a TDMS segment")]
    TooSmall,

    #[error("unexpected end of file")]
    UnexpectedEof,

    #[error("unsupported TDMS data type code 0x{0:X}")]
    UnsupportedType(u32),

    #[error("interleaved raw data is not supported")]
    Interleaved,

    #[error("DAQmx raw data is not supported")]
    Daqmx,

    #[error("channel {0} has array dimension {1}, expected 1")]
    BadDimension(String, u32),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// TDMS scalar data types, by on-disk type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    String,
    Timestamp,
}

impl DataType {
    fn from_code(code: u32) -> Result<Self, TdmsError> {
        Ok(match code {
            1 => DataType::I8,
            2 => DataType::I16,
            3 => DataType::I32,
            4 => DataType::I64,
            5 => DataType::U8,
            6 => DataType::U16,
            7 => DataType::U32,
            8 => DataType::U64,
            9 | 0x19 => DataType::F32,
            10 | 0x1A => DataType::F64,
            0x20 => DataType::String,
            0x21 => DataType::Bool,
            0x44 => DataType::Timestamp,
            other => return Err(TdmsError::UnsupportedType(other)),
        })
    }

    /// Fixed on-disk size of one value; strings are variable-length.
    fn size(&self) -> usize {
        match self {
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
            DataType::Timestamp => 16,
            DataType::String => 0,
        }
    }
}

/// A scalar property attached to a TDMS object.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    String(String),
    Timestamp(DateTime<Utc>),
}

/// Sample values of one channel, in decode order across all segments.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    String(Vec<String>),
    Timestamp(Vec<DateTime<Utc>>),
}

impl ChannelData {
    fn new(dtype: DataType) -> Self {
        match dtype {
            DataType::I8 => ChannelData::I8(Vec::new()),
            DataType::I16 => ChannelData::I16(Vec::new()),
            DataType::I32 => ChannelData::I32(Vec::new()),
            DataType::I64 => ChannelData::I64(Vec::new()),
            DataType::U8 => ChannelData::U8(Vec::new()),
            DataType::U16 => ChannelData::U16(Vec::new()),
            DataType::U32 => ChannelData::U32(Vec::new()),
            DataType::U64 => ChannelData::U64(Vec::new()),
            DataType::F32 => ChannelData::F32(Vec::new()),
            DataType::F64 => ChannelData::F64(Vec::new()),
            DataType::Bool => ChannelData::Bool(Vec::new()),
            DataType::String => ChannelData::String(Vec::new()),
            DataType::Timestamp => ChannelData::Timestamp(Vec::new()),
        }
    }

    fn dtype(&self) -> DataType {
        match self {
            ChannelData::I8(_) => DataType::I8,
            ChannelData::I16(_) => DataType::I16,
            ChannelData::I32(_) => DataType::I32,
            ChannelData::I64(_) => DataType::I64,
            ChannelData::U8(_) => DataType::U8,
            ChannelData::U16(_) => DataType::U16,
            ChannelData::U32(_) => DataType::U32,
            ChannelData::U64(_) => DataType::U64,
            ChannelData::F32(_) => DataType::F32,
            ChannelData::F64(_) => DataType::F64,
            ChannelData::Bool(_) => DataType::Bool,
            ChannelData::String(_) => DataType::String,
            ChannelData::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChannelData::I8(v) => v.len(),
            ChannelData::I16(v) => v.len(),
            ChannelData::I32(v) => v.len(),
            ChannelData::I64(v) => v.len(),
            ChannelData::U8(v) => v.len(),
            ChannelData::U16(v) => v.len(),
            ChannelData::U32(v) => v.len(),
            ChannelData::U64(v) => v.len(),
            ChannelData::F32(v) => v.len(),
            ChannelData::F64(v) => v.len(),
            ChannelData::Bool(v) => v.len(),
            ChannelData::String(v) => v.len(),
            ChannelData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text rendering of one sample, `None` past the end of the channel.
    /// NaN floats render as an empty string.
    pub fn cell(&self, index: usize) -> Option<String> {
        match self {
            ChannelData::I8(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::I16(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::I32(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::I64(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::U8(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::U16(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::U32(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::U64(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::F32(v) => v
                .get(index)
                .map(|x| if x.is_nan() { String::new() } else { x.to_string() }),
            ChannelData::F64(v) => v
                .get(index)
                .map(|x| if x.is_nan() { String::new() } else { x.to_string() }),
            ChannelData::Bool(v) => v.get(index).map(|x| x.to_string()),
            ChannelData::String(v) => v.get(index).cloned(),
            ChannelData::Timestamp(v) => v
                .get(index)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }

    fn read_values(&mut self, r: &mut Reader, index: &RawIndex) -> Result<(), TdmsError> {
        let count = index.count as usize;
        match self {
            ChannelData::I8(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_i8()?);
                }
            }
            ChannelData::I16(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_i16()?);
                }
            }
            ChannelData::I32(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_i32()?);
                }
            }
            ChannelData::I64(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_i64()?);
                }
            }
            ChannelData::U8(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_u8()?);
                }
            }
            ChannelData::U16(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_u16()?);
                }
            }
            ChannelData::U32(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_u32()?);
                }
            }
            ChannelData::U64(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_u64()?);
                }
            }
            ChannelData::F32(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_f32()?);
                }
            }
            ChannelData::F64(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_f64()?);
                }
            }
            ChannelData::Bool(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_bool()?);
                }
            }
            ChannelData::Timestamp(v) => {
                v.reserve(count);
                for _ in 0..count {
                    v.push(r.read_timestamp()?);
                }
            }
            ChannelData::String(v) => read_string_values(r, index, v)?,
        }
        Ok(())
    }
}

/// String channels store a table of end offsets followed by the bytes.
fn read_string_values(
    r: &mut Reader,
    index: &RawIndex,
    values: &mut Vec<String>,
) -> Result<(), TdmsError> {
    let count = index.count as usize;
    let table_len = count.checked_mul(4).ok_or(TdmsError::UnexpectedEof)?;
    let total = index.total_bytes as usize;
    if total < table_len {
        return Err(TdmsError::InvalidMetadata(
            "string channel shorter than its offset table".to_string(),
        ));
    }
    let mut ends = Vec::with_capacity(count);
    for _ in 0..count {
        ends.push(r.read_u32()? as usize);
    }
    let blob = r.take(total - table_len)?;
    let mut start = 0usize;
    for end in ends {
        if end < start || end > blob.len() {
            return Err(TdmsError::InvalidMetadata(
                "invalid string channel offsets".to_string(),
            ));
        }
        values.push(String::from_utf8_lossy(&blob[start..end]).into_owned());
        start = end;
    }
    Ok(())
}

/// One decoded channel: full object path, sample data, properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub path: String,
    pub data: ChannelData,
    pub properties: Vec<(String, PropertyValue)>,
}

/// Tabular view of a decoded file: one column per channel, in order of
/// first appearance, one row per sample index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub channels: Vec<Channel>,
}

impl Table {
    pub fn num_rows(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.data.len())
            .max()
            .unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, path: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.path == path)
    }
}

/// Raw data index of one object, persisted across segments.
#[derive(Debug, Clone, Copy)]
struct RawIndex {
    dtype: DataType,
    count: u64,
    /// Total raw byte size, only meaningful for string channels.
    total_bytes: u64,
}

impl RawIndex {
    /// Byte size of one whole chunk of this object, `None` when the
    /// claimed count cannot describe real data.
    fn byte_size(&self) -> Option<usize> {
        match self.dtype {
            DataType::String => usize::try_from(self.total_bytes).ok(),
            other => usize::try_from(self.count)
                .ok()
                .and_then(|count| count.checked_mul(other.size())),
        }
    }
}

#[derive(Default)]
struct Parser {
    indices: HashMap<String, RawIndex>,
    /// Paths with raw data in the current segment layout, in block order.
    active: Vec<String>,
    order: Vec<String>,
    data: HashMap<String, ChannelData>,
    props: HashMap<String, Vec<(String, PropertyValue)>>,
}

/// Reads and decodes a TDMS file from disk.
pub fn read_file(path: &Path) -> Result<Table, TdmsError> {
    let data = fs::read(path).map_err(|e| TdmsError::Io(format!("{}: {}", path.display(), e)))?;
    parse(&data)
}

/// Decodes a TDMS file from memory into its tabular view.
pub fn parse(data: &[u8]) -> Result<Table, TdmsError> {
    if data.len() < LEAD_IN_LEN {
        return Err(TdmsError::TooSmall);
    }

    let mut parser = Parser::default();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < LEAD_IN_LEN {
            return Err(TdmsError::UnexpectedEof);
        }
        let lead_in = &data[pos..pos + LEAD_IN_LEN];
        if &lead_in[..4] != LEAD_IN_TAG {
            return Err(TdmsError::BadTag);
        }
        // The ToC mask is always little-endian; everything after it follows
        // the big-endian flag.
        let toc = u32::from_le_bytes([lead_in[4], lead_in[5], lead_in[6], lead_in[7]]);
        let order = if toc & TOC_BIG_ENDIAN != 0 {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        if toc & TOC_DAQMX != 0 {
            return Err(TdmsError::Daqmx);
        }

        let mut lead = Reader::new(&lead_in[8..], order);
        let _version = lead.read_u32()?;
        let next_segment_offset = lead.read_u64()?;
        let raw_data_offset = lead.read_u64()?;

        let lead_end = pos + LEAD_IN_LEN;
        let raw_start = lead_end
            .checked_add(raw_data_offset as usize)
            .filter(|v| *v <= data.len())
            .ok_or(TdmsError::UnexpectedEof)?;
        // next_segment_offset is all-ones when a writer crashed mid-segment;
        // read whole chunks as far as the file allows.
        let segment_end = if next_segment_offset == u64::MAX {
            data.len()
        } else {
            lead_end
                .saturating_add(next_segment_offset as usize)
                .min(data.len())
        };
        if segment_end < raw_start {
            return Err(TdmsError::InvalidMetadata(
                "segment shorter than its metadata".to_string(),
            ));
        }

        if toc & TOC_METADATA != 0 {
            let mut meta = Reader::new(&data[lead_end..raw_start], order);
            parser.read_metadata(&mut meta, toc & TOC_NEW_OBJ_LIST != 0)?;
        }

        if toc & TOC_RAW_DATA != 0 {
            if toc & TOC_INTERLEAVED != 0 {
                return Err(TdmsError::Interleaved);
            }
            parser.read_raw_data(&data[raw_start..segment_end], order)?;
        }

        pos = segment_end;
    }

    Ok(parser.into_table())
}

impl Parser {
    fn read_metadata(&mut self, r: &mut Reader, new_obj_list: bool) -> Result<(), TdmsError> {
        let num_objects = r.read_u32()?;
        let mut seg_raw: Vec<String> = Vec::new();
        let mut seg_no_raw: Vec<String> = Vec::new();

        for _ in 0..num_objects {
            let path = r.read_string()?;
            let header = r.read_u32()?;
            let has_raw = match header {
                NO_RAW_DATA => false,
                DAQMX_FORMAT_CHANGING | DAQMX_DIGITAL_LINE => return Err(TdmsError::Daqmx),
                MATCHES_PREVIOUS => {
                    if !self.indices.contains_key(&path) {
                        return Err(TdmsError::InvalidMetadata(format!(
                            "object {path} reuses a raw data index that was never defined"
                        )));
                    }
                    true
                }
                _ => {
                    let dtype = DataType::from_code(r.read_u32()?)?;
                    let dimension = r.read_u32()?;
                    if dimension != 1 {
                        return Err(TdmsError::BadDimension(path, dimension));
                    }
                    let count = r.read_u64()?;
                    let total_bytes = if dtype == DataType::String {
                        r.read_u64()?
                    } else {
                        0
                    };
                    self.register_channel(&path, dtype)?;
                    self.indices.insert(
                        path.clone(),
                        RawIndex {
                            dtype,
                            count,
                            total_bytes,
                        },
                    );
                    true
                }
            };

            let num_props = r.read_u32()?;
            for _ in 0..num_props {
                let name = r.read_string()?;
                let value = read_property_value(r)?;
                self.set_property(&path, name, value);
            }

            if has_raw {
                seg_raw.push(path);
            } else {
                seg_no_raw.push(path);
            }
        }

        if new_obj_list {
            self.active = seg_raw;
        } else {
            for path in &seg_no_raw {
                self.active.retain(|p| p != path);
            }
            for path in seg_raw {
                if !self.active.contains(&path) {
                    self.active.push(path);
                }
            }
        }
        Ok(())
    }

    fn register_channel(&mut self, path: &str, dtype: DataType) -> Result<(), TdmsError> {
        match self.data.get(path) {
            Some(existing) if existing.dtype() != dtype => Err(TdmsError::InvalidMetadata(
                format!("channel {path} changed data type between segments"),
            )),
            Some(_) => Ok(()),
            None => {
                self.order.push(path.to_string());
                self.data.insert(path.to_string(), ChannelData::new(dtype));
                Ok(())
            }
        }
    }

    fn set_property(&mut self, path: &str, name: String, value: PropertyValue) {
        let props = self.props.entry(path.to_string()).or_default();
        if let Some(slot) = props.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            props.push((name, value));
        }
    }

    /// Reads the raw data region of one segment: contiguous channel blocks
    /// in active-object order, possibly repeated as whole chunks.
    fn read_raw_data(&mut self, region: &[u8], order: ByteOrder) -> Result<(), TdmsError> {
        let mut layout = Vec::with_capacity(self.active.len());
        let mut chunk_size = 0usize;
        for path in &self.active {
            let index = self.indices.get(path).copied().ok_or_else(|| {
                TdmsError::InvalidMetadata(format!("no raw data index for object {path}"))
            })?;
            // A crafted count must fail here, not overflow the chunk math.
            chunk_size = index
                .byte_size()
                .and_then(|size| chunk_size.checked_add(size))
                .ok_or_else(|| {
                    TdmsError::InvalidMetadata(format!(
                        "object {path} claims an impossible sample count"
                    ))
                })?;
            layout.push((path.clone(), index));
        }

        if chunk_size == 0 {
            return Ok(());
        }
        let num_chunks = region.len() / chunk_size;

        let mut r = Reader::new(region, order);
        for _ in 0..num_chunks {
            for (path, index) in &layout {
                let channel = self.data.get_mut(path).ok_or_else(|| {
                    TdmsError::InvalidMetadata(format!("raw data for unknown object {path}"))
                })?;
                channel.read_values(&mut r, index)?;
            }
        }
        Ok(())
    }

    fn into_table(mut self) -> Table {
        let order = std::mem::take(&mut self.order);
        let mut channels = Vec::with_capacity(order.len());
        for path in order {
            let data = match self.data.remove(&path) {
                Some(data) => data,
                None => continue,
            };
            let properties = self.props.remove(&path).unwrap_or_default();
            channels.push(Channel {
                path,
                data,
                properties,
            });
        }
        Table { channels }
    }
}

fn read_property_value(r: &mut Reader) -> Result<PropertyValue, TdmsError> {
    let dtype = DataType::from_code(r.read_u32()?)?;
    Ok(match dtype {
        DataType::I8 => PropertyValue::Int(r.read_i8()? as i64),
        DataType::I16 => PropertyValue::Int(r.read_i16()? as i64),
        DataType::I32 => PropertyValue::Int(r.read_i32()? as i64),
        DataType::I64 => PropertyValue::Int(r.read_i64()?),
        DataType::U8 => PropertyValue::Uint(r.read_u8()? as u64),
        DataType::U16 => PropertyValue::Uint(r.read_u16()? as u64),
        DataType::U32 => PropertyValue::Uint(r.read_u32()? as u64),
        DataType::U64 => PropertyValue::Uint(r.read_u64()?),
        DataType::F32 => PropertyValue::Float(r.read_f32()? as f64),
        DataType::F64 => PropertyValue::Float(r.read_f64()?),
        DataType::Bool => PropertyValue::Bool(r.read_bool()?),
        DataType::String => PropertyValue::String(r.read_string()?),
        DataType::Timestamp => PropertyValue::Timestamp(r.read_timestamp()?),
    })
}
