//! TDMS building blocks: lead-in constants, data types, property values,
//! timestamps and object paths.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{AppResult, DaqError};

/// Segment tag.
pub const TDMS_TAG: &[u8; 4] = b"TDSm";
/// File format version written and accepted.
pub const TDMS_VERSION: u32 = 4713;
/// Tag, ToC, version and two offsets.
pub const LEAD_IN_LEN: usize = 28;

/// Raw data index: object carries no data in this segment.
pub const NO_RAW_DATA: u32 = 0xFFFF_FFFF;
/// Raw data index: same layout as in the previous segment.
pub const RAW_INDEX_UNCHANGED: u32 = 0;
/// DAQmx format-changing scaler index header.
pub const DAQMX_FORMAT_CHANGING: u32 = 0x6912_0000;
/// DAQmx digital line scaler index header.
pub const DAQMX_DIGITAL_LINE: u32 = 0x6913_0000;

/// Next-segment offset written by an interrupted writer.
pub const INCOMPLETE_SEGMENT: u64 = u64::MAX;

/// Seconds from 1904-01-01 to 1970-01-01.
const LABVIEW_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Table of contents flags.
pub mod toc {
    /// Segment contains metadata
    pub const META_DATA: u32 = 1 << 1;
    /// Segment replaces the object list
    pub const NEW_OBJ_LIST: u32 = 1 << 2;
    /// Segment contains raw data
    pub const RAW_DATA: u32 = 1 << 3;
    /// Raw data is interleaved
    pub const INTERLEAVED: u32 = 1 << 5;
    /// Numbers after the ToC are big-endian
    pub const BIG_ENDIAN: u32 = 1 << 6;
    /// Segment holds DAQmx raw data
    pub const DAQMX_RAW_DATA: u32 = 1 << 7;
}

/// Data type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 0x00
    Void,
    /// 0x01
    I8,
    /// 0x02
    I16,
    /// 0x03
    I32,
    /// 0x04
    I64,
    /// 0x05
    U8,
    /// 0x06
    U16,
    /// 0x07
    U32,
    /// 0x08
    U64,
    /// 0x09, also 0x19 (with unit)
    F32,
    /// 0x0A, also 0x1A (with unit)
    F64,
    /// 0x20
    String,
    /// 0x21
    Bool,
    /// 0x44
    TimeStamp,
}

impl DataType {
    /// Decode a type code.
    pub fn from_code(code: u32) -> AppResult<Self> {
        Ok(match code {
            0x00 => DataType::Void,
            0x01 => DataType::I8,
            0x02 => DataType::I16,
            0x03 => DataType::I32,
            0x04 => DataType::I64,
            0x05 => DataType::U8,
            0x06 => DataType::U16,
            0x07 => DataType::U32,
            0x08 => DataType::U64,
            0x09 | 0x19 => DataType::F32,
            0x0A | 0x1A => DataType::F64,
            0x20 => DataType::String,
            0x21 => DataType::Bool,
            0x44 => DataType::TimeStamp,
            other => {
                return Err(DaqError::FileFormat(format!(
                    "Unsupported data type code 0x{other:X}"
                )))
            }
        })
    }

    /// Type code as written.
    pub fn code(self) -> u32 {
        match self {
            DataType::Void => 0x00,
            DataType::I8 => 0x01,
            DataType::I16 => 0x02,
            DataType::I32 => 0x03,
            DataType::I64 => 0x04,
            DataType::U8 => 0x05,
            DataType::U16 => 0x06,
            DataType::U32 => 0x07,
            DataType::U64 => 0x08,
            DataType::F32 => 0x09,
            DataType::F64 => 0x0A,
            DataType::String => 0x20,
            DataType::Bool => 0x21,
            DataType::TimeStamp => 0x44,
        }
    }

    /// Size of one raw value, `None` for strings.
    pub fn size(self) -> Option<usize> {
        match self {
            DataType::Void => Some(0),
            DataType::I8 | DataType::U8 | DataType::Bool => Some(1),
            DataType::I16 | DataType::U16 => Some(2),
            DataType::I32 | DataType::U32 | DataType::F32 => Some(4),
            DataType::I64 | DataType::U64 | DataType::F64 => Some(8),
            DataType::TimeStamp => Some(16),
            DataType::String => None,
        }
    }
}

/// Absolute time in LabVIEW representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdmsTimestamp {
    /// Whole seconds since 1904-01-01 00:00 UTC
    pub seconds: i64,
    /// Positive fractions of a second in units of 2^-64
    pub fractions: u64,
}

impl TdmsTimestamp {
    /// Convert from a UTC time.
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let nanos = u128::from(time.timestamp_subsec_nanos());
        Self {
            seconds: time.timestamp() + LABVIEW_EPOCH_OFFSET,
            fractions: ((nanos << 64) / 1_000_000_000) as u64,
        }
    }

    /// Convert to a UTC time, truncating to nanoseconds.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let nanos = ((u128::from(self.fractions) * 1_000_000_000) >> 64) as u32;
        Utc.timestamp_opt(self.seconds - LABVIEW_EPOCH_OFFSET, nanos)
            .single()
    }

    /// Seconds since the Unix epoch.
    pub fn as_unix_seconds(self) -> f64 {
        (self.seconds - LABVIEW_EPOCH_OFFSET) as f64 + self.fractions as f64 / 2f64.powi(64)
    }
}

/// Typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Signed integer of any width
    Int(i64),
    /// Unsigned integer of any width
    UInt(u64),
    /// Single precision float
    F32(f32),
    /// Double precision float
    F64(f64),
    /// UTF-8 string
    String(String),
    /// Boolean
    Bool(bool),
    /// Absolute time
    Timestamp(TdmsTimestamp),
}

impl PropertyValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::UInt(v) => Some(*v as f64),
            PropertyValue::F32(v) => Some(f64::from(*v)),
            PropertyValue::F64(v) => Some(*v),
            PropertyValue::Bool(_) | PropertyValue::String(_) | PropertyValue::Timestamp(_) => {
                None
            }
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Type code this value is written with.
    pub fn data_type(&self) -> DataType {
        match self {
            PropertyValue::Int(_) => DataType::I64,
            PropertyValue::UInt(_) => DataType::U64,
            PropertyValue::F32(_) => DataType::F32,
            PropertyValue::F64(_) => DataType::F64,
            PropertyValue::String(_) => DataType::String,
            PropertyValue::Bool(_) => DataType::Bool,
            PropertyValue::Timestamp(_) => DataType::TimeStamp,
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::F64(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::UInt(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        PropertyValue::Timestamp(TdmsTimestamp::from_datetime(v))
    }
}

/// Ordered property bag; setting an existing name replaces its value.
pub type Properties = Vec<(String, PropertyValue)>;

/// Insert or replace a property.
pub fn set_property(props: &mut Properties, name: &str, value: PropertyValue) {
    match props.iter_mut().find(|(n, _)| n == name) {
        Some(slot) => slot.1 = value,
        None => props.push((name.to_string(), value)),
    }
}

/// Look up a property by name.
pub fn get_property<'a>(props: &'a Properties, name: &str) -> Option<&'a PropertyValue> {
    props.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

/// Location of an object in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectPath {
    /// The file object, `/`
    Root,
    /// `/'group'`
    Group(String),
    /// `/'group'/'channel'`
    Channel(String, String),
}

impl ObjectPath {
    /// Parse a path string.
    pub fn parse(path: &str) -> AppResult<Self> {
        if path == "/" {
            return Ok(ObjectPath::Root);
        }
        let mut names = Vec::new();
        let mut rest = path;
        while !rest.is_empty() {
            let Some(after_slash) = rest.strip_prefix("/'") else {
                return Err(DaqError::FileFormat(format!("Malformed object path {path:?}")));
            };
            let (name, tail) = split_quoted(after_slash)
                .ok_or_else(|| DaqError::FileFormat(format!("Unterminated name in {path:?}")))?;
            names.push(name);
            rest = tail;
        }
        match <[String; 2]>::try_from(names) {
            Ok([group, channel]) => Ok(ObjectPath::Channel(group, channel)),
            Err(names) if names.len() == 1 => {
                Ok(ObjectPath::Group(names.into_iter().next().unwrap_or_default()))
            }
            Err(_) => Err(DaqError::FileFormat(format!(
                "Object path {path:?} is nested too deeply"
            ))),
        }
    }

    /// Path string as written.
    pub fn to_path_string(&self) -> String {
        match self {
            ObjectPath::Root => "/".to_string(),
            ObjectPath::Group(g) => format!("/'{}'", g.replace('\'', "''")),
            ObjectPath::Channel(g, c) => format!(
                "/'{}'/'{}'",
                g.replace('\'', "''"),
                c.replace('\'', "''")
            ),
        }
    }
}

/// Split `name'rest` honoring `''` escapes. Returns the unescaped name.
fn split_quoted(s: &str) -> Option<(String, &str)> {
    let mut name = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                name.push('\'');
            } else {
                return Some((name, &s[i + 1..]));
            }
        } else {
            name.push(c);
        }
    }
    None
}
