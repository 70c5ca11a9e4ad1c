//! Segment-by-segment TDMS decoder.
//!
//! The whole file is read into memory and walked one segment at a time. Each
//! segment may replace or extend the active object list, update properties,
//! and carry one or more chunks of raw data laid out per the active list.

use std::collections::HashMap;
use std::path::Path;

use bytes::{Buf, Bytes};
use tracing::{debug, warn};

use super::types::{
    toc, DataType, ObjectPath, Properties, PropertyValue, TdmsTimestamp, DAQMX_DIGITAL_LINE,
    DAQMX_FORMAT_CHANGING, INCOMPLETE_SEGMENT, LEAD_IN_LEN, NO_RAW_DATA, RAW_INDEX_UNCHANGED,
    TDMS_TAG,
};
use crate::error::{AppResult, DaqError};

/// Decoded samples of one channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ChannelData {
    /// Channel never carried raw data
    #[default]
    Empty,
    /// Any numeric type (timestamps as Unix seconds)
    Numeric(Vec<f64>),
    /// String channel
    Text(Vec<String>),
}

impl ChannelData {
    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            ChannelData::Empty => 0,
            ChannelData::Numeric(v) => v.len(),
            ChannelData::Text(v) => v.len(),
        }
    }

    /// True when there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric values, empty for a channel without data.
    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            ChannelData::Empty => Some(&[]),
            ChannelData::Numeric(v) => Some(v),
            ChannelData::Text(_) => None,
        }
    }
}

/// One channel.
#[derive(Debug, Clone)]
pub struct TdmsChannel {
    /// Channel name
    pub name: String,
    /// Properties in first-written order
    pub properties: Properties,
    /// Raw data type, if the channel ever had data
    pub data_type: Option<DataType>,
    /// Samples
    pub data: ChannelData,
}

impl TdmsChannel {
    /// Look up a property.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        super::types::get_property(&self.properties, name)
    }
}

/// One group with its channels in file order.
#[derive(Debug, Clone)]
pub struct TdmsGroup {
    /// Group name
    pub name: String,
    /// Properties
    pub properties: Properties,
    /// Channels in order of first appearance
    pub channels: Vec<TdmsChannel>,
}

impl TdmsGroup {
    /// Find a channel by name.
    pub fn channel(&self, name: &str) -> Option<&TdmsChannel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Look up a property.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        super::types::get_property(&self.properties, name)
    }
}

/// A fully decoded file.
#[derive(Debug, Clone)]
pub struct TdmsFile {
    /// File-level properties
    pub properties: Properties,
    /// Groups in order of first appearance
    pub groups: Vec<TdmsGroup>,
}

impl TdmsFile {
    /// Read and decode a file.
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let raw = std::fs::read(path.as_ref())?;
        debug!(path = %path.as_ref().display(), bytes = raw.len(), "Decoding TDMS file");
        Self::from_bytes(Bytes::from(raw))
    }

    /// Decode an in-memory file.
    pub fn from_bytes(bytes: Bytes) -> AppResult<Self> {
        let mut state = DecodeState::default();
        let mut pos = 0usize;
        while pos < bytes.len() {
            pos = state.segment(&bytes, pos)?;
        }
        Ok(state.finish())
    }

    /// Find a group by name.
    pub fn group(&self, name: &str) -> Option<&TdmsGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

#[derive(Debug, Clone, Copy)]
struct RawIndex {
    data_type: DataType,
    count: u64,
    /// Total byte size, only present for strings.
    total_size: u64,
}

impl RawIndex {
    fn chunk_bytes(&self) -> AppResult<u64> {
        match self.data_type.size() {
            Some(size) => self
                .count
                .checked_mul(size as u64)
                .ok_or_else(|| DaqError::FileFormat("Raw data size overflows".to_string())),
            None => Ok(self.total_size),
        }
    }
}

#[derive(Debug, Default)]
struct ObjectEntry {
    path: Option<ObjectPath>,
    properties: Properties,
    raw_index: Option<RawIndex>,
    data: ChannelData,
}

#[derive(Default)]
struct DecodeState {
    objects: Vec<ObjectEntry>,
    by_path: HashMap<String, usize>,
    /// Objects carrying raw data in the current segment, in layout order.
    active: Vec<usize>,
}

impl DecodeState {
    fn object(&mut self, path: &str) -> AppResult<usize> {
        if let Some(&idx) = self.by_path.get(path) {
            return Ok(idx);
        }
        let parsed = ObjectPath::parse(path)?;
        let idx = self.objects.len();
        self.objects.push(ObjectEntry {
            path: Some(parsed),
            ..Default::default()
        });
        self.by_path.insert(path.to_string(), idx);
        Ok(idx)
    }

    /// Decode the segment at `pos`, returning the offset of the next one.
    fn segment(&mut self, file: &Bytes, pos: usize) -> AppResult<usize> {
        let remaining = file.len() - pos;
        if remaining < LEAD_IN_LEN {
            return Err(DaqError::FileFormat(format!(
                "Truncated segment lead-in at offset {pos}"
            )));
        }
        let lead_in = &file[pos..pos + LEAD_IN_LEN];
        if &lead_in[..4] != TDMS_TAG {
            return Err(DaqError::FileFormat(format!(
                "Bad segment tag at offset {pos}"
            )));
        }
        let toc_mask = (&lead_in[4..8]).get_u32_le();
        let mut header = Decoder::new(&lead_in[8..], toc_mask & toc::BIG_ENDIAN != 0);
        let _version = header.u32()?;
        let next_segment_offset = header.u64()?;
        let raw_data_offset = header.u64()?;

        let body_start = pos + LEAD_IN_LEN;
        let segment_end = if next_segment_offset == INCOMPLETE_SEGMENT {
            warn!(offset = pos, "Segment was not closed by its writer; reading to end of file");
            file.len()
        } else {
            usize::try_from(next_segment_offset)
                .ok()
                .and_then(|len| body_start.checked_add(len))
                .filter(|&end| end <= file.len())
                .ok_or_else(|| {
                    DaqError::FileFormat(format!("Segment at offset {pos} extends past end of file"))
                })?
        };
        let raw_start = usize::try_from(raw_data_offset)
            .ok()
            .and_then(|off| body_start.checked_add(off))
            .filter(|&start| start <= segment_end)
            .ok_or_else(|| {
                DaqError::FileFormat(format!("Raw data offset out of range at offset {pos}"))
            })?;

        if toc_mask & toc::DAQMX_RAW_DATA != 0 {
            return Err(DaqError::FileFormat(
                "DAQmx raw data segments are not supported".to_string(),
            ));
        }

        if toc_mask & toc::NEW_OBJ_LIST != 0 {
            self.active.clear();
        }
        if toc_mask & toc::META_DATA != 0 {
            let mut meta = Decoder::new(&file[body_start..raw_start], toc_mask & toc::BIG_ENDIAN != 0);
            self.metadata(&mut meta)?;
        }
        if toc_mask & toc::RAW_DATA != 0 {
            let raw = &file[raw_start..segment_end];
            self.raw_data(raw, toc_mask)?;
        }

        Ok(segment_end)
    }

    fn metadata(&mut self, meta: &mut Decoder<'_>) -> AppResult<()> {
        let n_objects = meta.u32()?;
        for _ in 0..n_objects {
            let path = meta.string()?;
            let idx = self.object(&path)?;
            let index_header = meta.u32()?;
            match index_header {
                NO_RAW_DATA => self.active.retain(|&a| a != idx),
                RAW_INDEX_UNCHANGED => {
                    if self.objects[idx].raw_index.is_none() {
                        return Err(DaqError::FileFormat(format!(
                            "Object {path} reuses a raw data index it never had"
                        )));
                    }
                    self.activate(idx);
                }
                DAQMX_FORMAT_CHANGING | DAQMX_DIGITAL_LINE => {
                    return Err(DaqError::FileFormat(format!(
                        "Object {path} uses DAQmx raw data, which is not supported"
                    )));
                }
                _ => {
                    let data_type = DataType::from_code(meta.u32()?)?;
                    let dimension = meta.u32()?;
                    if dimension != 1 {
                        return Err(DaqError::FileFormat(format!(
                            "Object {path} has array dimension {dimension}"
                        )));
                    }
                    let count = meta.u64()?;
                    let total_size = if data_type == DataType::String {
                        meta.u64()?
                    } else {
                        0
                    };
                    if count > 0 && data_type.size() == Some(0) {
                        return Err(DaqError::FileFormat(format!(
                            "Object {path} declares {count} raw values of a zero-sized type"
                        )));
                    }
                    if data_type == DataType::String
                        && count.checked_mul(4).map_or(true, |index| index > total_size)
                    {
                        return Err(DaqError::FileFormat(format!(
                            "Object {path} declares {count} strings in {total_size} bytes"
                        )));
                    }
                    self.objects[idx].raw_index = Some(RawIndex {
                        data_type,
                        count,
                        total_size,
                    });
                    self.activate(idx);
                }
            }

            let n_props = meta.u32()?;
            for _ in 0..n_props {
                let name = meta.string()?;
                let data_type = DataType::from_code(meta.u32()?)?;
                let value = meta.property(data_type)?;
                super::types::set_property(&mut self.objects[idx].properties, &name, value);
            }
        }
        Ok(())
    }

    fn activate(&mut self, idx: usize) {
        if !self.active.contains(&idx) {
            self.active.push(idx);
        }
    }

    fn raw_data(&mut self, raw: &[u8], toc_mask: u32) -> AppResult<()> {
        let layout: Vec<(usize, RawIndex)> = self
            .active
            .iter()
            .filter_map(|&idx| self.objects[idx].raw_index.map(|ri| (idx, ri)))
            .filter(|(_, ri)| ri.count > 0)
            .collect();

        let mut chunk_size = 0u64;
        for (_, ri) in &layout {
            chunk_size = chunk_size
                .checked_add(ri.chunk_bytes()?)
                .ok_or_else(|| DaqError::FileFormat("Raw data size overflows".to_string()))?;
        }
        if chunk_size == 0 {
            return Ok(());
        }

        let n_chunks = raw.len() as u64 / chunk_size;
        let leftover = raw.len() as u64 % chunk_size;
        if leftover != 0 {
            warn!(leftover, chunk_size, "Ignoring partial trailing chunk");
        }

        let big_endian = toc_mask & toc::BIG_ENDIAN != 0;
        let mut dec = Decoder::new(raw, big_endian);
        let interleaved = toc_mask & toc::INTERLEAVED != 0;
        for _ in 0..n_chunks {
            if interleaved {
                self.interleaved_chunk(&mut dec, &layout)?;
            } else {
                for &(idx, ri) in &layout {
                    self.contiguous_run(&mut dec, idx, ri)?;
                }
            }
        }
        Ok(())
    }

    fn contiguous_run(&mut self, dec: &mut Decoder<'_>, idx: usize, ri: RawIndex) -> AppResult<()> {
        let count = usize::try_from(ri.count)
            .map_err(|_| DaqError::FileFormat("Value count too large".to_string()))?;
        if ri.data_type == DataType::String {
            let strings = dec.string_run(count, ri.total_size)?;
            let data = &mut self.objects[idx].data;
            if data.is_empty() && !matches!(data, ChannelData::Text(_)) {
                *data = ChannelData::Text(Vec::new());
            }
            return match data {
                ChannelData::Text(v) => {
                    v.extend(strings);
                    Ok(())
                }
                _ => Err(mixed_types()),
            };
        }

        let values = numeric_slot(&mut self.objects[idx].data)?;
        values.reserve(count);
        for _ in 0..count {
            values.push(dec.sample(ri.data_type)?);
        }
        Ok(())
    }

    fn interleaved_chunk(&mut self, dec: &mut Decoder<'_>, layout: &[(usize, RawIndex)]) -> AppResult<()> {
        let Some(&(_, first)) = layout.first() else {
            return Ok(());
        };
        if layout
            .iter()
            .any(|(_, ri)| ri.count != first.count || ri.data_type == DataType::String)
        {
            return Err(DaqError::FileFormat(
                "Interleaved data needs equal counts and fixed-size types".to_string(),
            ));
        }
        for _ in 0..first.count {
            for &(idx, ri) in layout {
                let value = dec.sample(ri.data_type)?;
                numeric_slot(&mut self.objects[idx].data)?.push(value);
            }
        }
        Ok(())
    }

    fn finish(self) -> TdmsFile {
        let mut file = TdmsFile {
            properties: Vec::new(),
            groups: Vec::new(),
        };

        fn group_slot<'a>(groups: &'a mut Vec<TdmsGroup>, name: &str) -> &'a mut TdmsGroup {
            let pos = match groups.iter().position(|g| g.name == name) {
                Some(pos) => pos,
                None => {
                    groups.push(TdmsGroup {
                        name: name.to_string(),
                        properties: Vec::new(),
                        channels: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            &mut groups[pos]
        }

        for entry in self.objects {
            match entry.path {
                Some(ObjectPath::Root) | None => file.properties.extend(entry.properties),
                Some(ObjectPath::Group(name)) => {
                    group_slot(&mut file.groups, &name).properties = entry.properties;
                }
                Some(ObjectPath::Channel(group, name)) => {
                    group_slot(&mut file.groups, &group).channels.push(TdmsChannel {
                        name,
                        properties: entry.properties,
                        data_type: entry.raw_index.map(|ri| ri.data_type),
                        data: entry.data,
                    });
                }
            }
        }
        file
    }
}

fn mixed_types() -> DaqError {
    DaqError::FileFormat("Channel mixes string and numeric raw data".to_string())
}

fn numeric_slot(data: &mut ChannelData) -> AppResult<&mut Vec<f64>> {
    if let ChannelData::Empty = data {
        *data = ChannelData::Numeric(Vec::new());
    }
    match data {
        ChannelData::Numeric(v) => Ok(v),
        _ => Err(mixed_types()),
    }
}

/// Bounds-checked reader over a byte slice with a fixed byte order.
struct Decoder<'a> {
    buf: &'a [u8],
    big_endian: bool,
}

macro_rules! read_num {
    ($name:ident, $ty:ty, $le:ident, $be:ident) => {
        fn $name(&mut self) -> AppResult<$ty> {
            self.need(std::mem::size_of::<$ty>())?;
            Ok(if self.big_endian {
                self.buf.$be()
            } else {
                self.buf.$le()
            })
        }
    };
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8], big_endian: bool) -> Self {
        Self { buf, big_endian }
    }

    fn need(&self, n: usize) -> AppResult<()> {
        if self.buf.remaining() < n {
            return Err(DaqError::FileFormat(format!(
                "Unexpected end of data: needed {n} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    read_num!(u16, u16, get_u16_le, get_u16);
    read_num!(u32, u32, get_u32_le, get_u32);
    read_num!(u64, u64, get_u64_le, get_u64);
    read_num!(i16, i16, get_i16_le, get_i16);
    read_num!(i32, i32, get_i32_le, get_i32);
    read_num!(i64, i64, get_i64_le, get_i64);
    read_num!(f32, f32, get_f32_le, get_f32);
    read_num!(f64, f64, get_f64_le, get_f64);

    fn u8(&mut self) -> AppResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn bytes(&mut self, n: usize) -> AppResult<&'a [u8]> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn utf8(bytes: &[u8]) -> AppResult<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| DaqError::FileFormat(format!("Invalid UTF-8 string: {e}")))
    }

    fn string(&mut self) -> AppResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        Self::utf8(bytes)
    }

    fn timestamp(&mut self) -> AppResult<TdmsTimestamp> {
        // Little-endian files store fractions first; big-endian seconds first.
        let (seconds, fractions) = if self.big_endian {
            let s = self.i64()?;
            (s, self.u64()?)
        } else {
            let f = self.u64()?;
            (self.i64()?, f)
        };
        Ok(TdmsTimestamp { seconds, fractions })
    }

    fn property(&mut self, data_type: DataType) -> AppResult<PropertyValue> {
        Ok(match data_type {
            DataType::I8 => PropertyValue::Int(i64::from(self.u8()? as i8)),
            DataType::I16 => PropertyValue::Int(i64::from(self.i16()?)),
            DataType::I32 => PropertyValue::Int(i64::from(self.i32()?)),
            DataType::I64 => PropertyValue::Int(self.i64()?),
            DataType::U8 => PropertyValue::UInt(u64::from(self.u8()?)),
            DataType::U16 => PropertyValue::UInt(u64::from(self.u16()?)),
            DataType::U32 => PropertyValue::UInt(u64::from(self.u32()?)),
            DataType::U64 => PropertyValue::UInt(self.u64()?),
            DataType::F32 => PropertyValue::F32(self.f32()?),
            DataType::F64 => PropertyValue::F64(self.f64()?),
            DataType::String => PropertyValue::String(self.string()?),
            DataType::Bool => PropertyValue::Bool(self.u8()? != 0),
            DataType::TimeStamp => PropertyValue::Timestamp(self.timestamp()?),
            DataType::Void => {
                return Err(DaqError::FileFormat("Void property value".to_string()))
            }
        })
    }

    fn sample(&mut self, data_type: DataType) -> AppResult<f64> {
        Ok(match data_type {
            DataType::I8 => f64::from(self.u8()? as i8),
            DataType::I16 => f64::from(self.i16()?),
            DataType::I32 => f64::from(self.i32()?),
            DataType::I64 => self.i64()? as f64,
            DataType::U8 => f64::from(self.u8()?),
            DataType::U16 => f64::from(self.u16()?),
            DataType::U32 => f64::from(self.u32()?),
            DataType::U64 => self.u64()? as f64,
            DataType::F32 => f64::from(self.f32()?),
            DataType::F64 => self.f64()?,
            DataType::Bool => f64::from(self.u8()?),
            DataType::TimeStamp => self.timestamp()?.as_unix_seconds(),
            DataType::Void => 0.0,
            DataType::String => {
                return Err(DaqError::FileFormat(
                    "String value in numeric data".to_string(),
                ))
            }
        })
    }

    /// `count` end offsets followed by the concatenated string bytes.
    fn string_run(&mut self, count: usize, total_size: u64) -> AppResult<Vec<String>> {
        let bad_size = || DaqError::FileFormat("Bad string data size".to_string());
        let total = usize::try_from(total_size).map_err(|_| bad_size())?;
        let index_len = count
            .checked_mul(4)
            .filter(|&len| len <= total)
            .ok_or_else(bad_size)?;
        self.need(total)?;

        let mut ends = Vec::with_capacity(count);
        for _ in 0..count {
            ends.push(self.u32()? as usize);
        }
        let text = self.bytes(total - index_len)?;
        let mut out = Vec::with_capacity(count);
        let mut start = 0;
        for end in ends {
            if end < start || end > text.len() {
                return Err(DaqError::FileFormat("Bad string offset".to_string()));
            }
            out.push(Self::utf8(&text[start..end])?);
            start = end;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    /// Hand-assembled segment writer for exercising corner cases.
    struct Seg {
        toc: u32,
        be: bool,
        meta: BytesMut,
        raw: BytesMut,
    }

    impl Seg {
        fn new(toc: u32) -> Self {
            Self {
                toc,
                be: toc & toc::BIG_ENDIAN != 0,
                meta: BytesMut::new(),
                raw: BytesMut::new(),
            }
        }
        fn u32(buf: &mut BytesMut, be: bool, v: u32) {
            if be { buf.put_u32(v) } else { buf.put_u32_le(v) }
        }
        fn u64(buf: &mut BytesMut, be: bool, v: u64) {
            if be { buf.put_u64(v) } else { buf.put_u64_le(v) }
        }
        fn str(buf: &mut BytesMut, be: bool, s: &str) {
            Self::u32(buf, be, s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        fn object_count(mut self, n: u32) -> Self {
            Self::u32(&mut self.meta, self.be, n);
            self
        }
        fn object(mut self, path: &str, index: Option<(u32, u64)>, props: &[(&str, f64)]) -> Self {
            let be = self.be;
            Self::str(&mut self.meta, be, path);
            match index {
                None => Self::u32(&mut self.meta, be, NO_RAW_DATA),
                Some((0, _)) => Self::u32(&mut self.meta, be, RAW_INDEX_UNCHANGED),
                Some((code, count)) => {
                    Self::u32(&mut self.meta, be, 20);
                    Self::u32(&mut self.meta, be, code);
                    Self::u32(&mut self.meta, be, 1);
                    Self::u64(&mut self.meta, be, count);
                }
            }
            Self::u32(&mut self.meta, be, props.len() as u32);
            for (name, value) in props {
                Self::str(&mut self.meta, be, name);
                Self::u32(&mut self.meta, be, DataType::F64.code());
                if be { self.meta.put_f64(*value) } else { self.meta.put_f64_le(*value) }
            }
            self
        }
        fn raw_f64(mut self, values: &[f64]) -> Self {
            for v in values {
                if self.be { self.raw.put_f64(*v) } else { self.raw.put_f64_le(*v) }
            }
            self
        }
        fn raw_i16(mut self, values: &[i16]) -> Self {
            for v in values {
                if self.be { self.raw.put_i16(*v) } else { self.raw.put_i16_le(*v) }
            }
            self
        }
        fn write(self, out: &mut BytesMut) {
            out.put_slice(TDMS_TAG);
            out.put_u32_le(self.toc);
            Self::u32(out, self.be, 4713);
            Self::u64(out, self.be, (self.meta.len() + self.raw.len()) as u64);
            Self::u64(out, self.be, self.meta.len() as u64);
            out.put_slice(&self.meta);
            out.put_slice(&self.raw);
        }
    }

    const META_RAW: u32 = toc::META_DATA | toc::NEW_OBJ_LIST | toc::RAW_DATA;

    #[test]
    fn decodes_contiguous_chunks_and_unchanged_layout() {
        let mut file = BytesMut::new();
        Seg::new(META_RAW)
            .object_count(3)
            .object("/'G'", None, &[])
            .object("/'G'/'a'", Some((0x0A, 2)), &[("wf_increment", 0.5)])
            .object("/'G'/'b'", Some((0x02, 2)), &[])
            // two chunks
            .raw_f64(&[1.0, 2.0])
            .raw_i16(&[10, 20])
            .raw_f64(&[3.0, 4.0])
            .raw_i16(&[30, 40])
            .write(&mut file);
        // raw only: same objects, same layout
        Seg::new(toc::RAW_DATA)
            .raw_f64(&[5.0, 6.0])
            .raw_i16(&[50, 60])
            .write(&mut file);

        let tdms = TdmsFile::from_bytes(file.freeze()).unwrap();
        let group = tdms.group("G").unwrap();
        assert_eq!(group.channels.len(), 2);
        assert_eq!(
            group.channel("a").unwrap().data.as_f64().unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
        assert_eq!(
            group.channel("b").unwrap().data.as_f64().unwrap(),
            &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0]
        );
        assert_eq!(
            group.channel("a").unwrap().property("wf_increment"),
            Some(&PropertyValue::F64(0.5))
        );
    }

    #[test]
    fn decodes_big_endian_interleaved() {
        let mut file = BytesMut::new();
        Seg::new(META_RAW | toc::BIG_ENDIAN | toc::INTERLEAVED)
            .object_count(2)
            .object("/'G'/'x'", Some((0x0A, 3)), &[])
            .object("/'G'/'y'", Some((0x0A, 3)), &[])
            .raw_f64(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0])
            .write(&mut file);

        let tdms = TdmsFile::from_bytes(file.freeze()).unwrap();
        let group = &tdms.groups[0];
        assert_eq!(group.channels[0].data.as_f64().unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(group.channels[1].data.as_f64().unwrap(), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn object_list_can_be_extended_and_trimmed() {
        let mut file = BytesMut::new();
        Seg::new(META_RAW)
            .object_count(1)
            .object("/'G'/'a'", Some((0x0A, 1)), &[])
            .raw_f64(&[1.0])
            .write(&mut file);
        // Append b to the existing list without NEW_OBJ_LIST.
        Seg::new(toc::META_DATA | toc::RAW_DATA)
            .object_count(1)
            .object("/'G'/'b'", Some((0x0A, 1)), &[])
            .raw_f64(&[2.0, 20.0])
            .write(&mut file);
        // a stops carrying data; b keeps its layout.
        Seg::new(toc::META_DATA | toc::RAW_DATA)
            .object_count(2)
            .object("/'G'/'a'", None, &[])
            .object("/'G'/'b'", Some((0, 0)), &[])
            .raw_f64(&[30.0])
            .write(&mut file);

        let tdms = TdmsFile::from_bytes(file.freeze()).unwrap();
        let group = &tdms.groups[0];
        assert_eq!(group.channel("a").unwrap().data.as_f64().unwrap(), &[1.0, 2.0]);
        assert_eq!(
            group.channel("b").unwrap().data.as_f64().unwrap(),
            &[20.0, 30.0]
        );
    }

    #[test]
    fn partial_chunk_is_ignored() {
        let mut file = BytesMut::new();
        Seg::new(META_RAW)
            .object_count(1)
            .object("/'G'/'a'", Some((0x0A, 2)), &[])
            .raw_f64(&[1.0, 2.0, 3.0])
            .write(&mut file);
        let tdms = TdmsFile::from_bytes(file.freeze()).unwrap();
        assert_eq!(tdms.groups[0].channels[0].data.as_f64().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn rejects_garbage_and_daqmx() {
        assert!(matches!(
            TdmsFile::from_bytes(Bytes::from_static(b"not a tdms file at all, really")),
            Err(DaqError::FileFormat(_))
        ));
        assert!(matches!(
            TdmsFile::from_bytes(Bytes::from_static(b"TDSm")),
            Err(DaqError::FileFormat(_))
        ));

        let mut file = BytesMut::new();
        let mut seg = Seg::new(toc::META_DATA | toc::NEW_OBJ_LIST).object_count(1);
        Seg::str(&mut seg.meta, false, "/'G'/'a'");
        seg.meta.put_u32_le(DAQMX_FORMAT_CHANGING);
        seg.write(&mut file);
        assert!(matches!(
            TdmsFile::from_bytes(file.freeze()),
            Err(DaqError::FileFormat(_))
        ));
    }

    /// Metadata for one string channel with an explicit byte size.
    fn string_object(seg: &mut Seg, path: &str, count: u64, total_size: u64) {
        Seg::str(&mut seg.meta, false, path);
        seg.meta.put_u32_le(28);
        seg.meta.put_u32_le(DataType::String.code());
        seg.meta.put_u32_le(1);
        seg.meta.put_u64_le(count);
        seg.meta.put_u64_le(total_size);
        seg.meta.put_u32_le(0);
    }

    #[test]
    fn zero_sized_raw_values_are_rejected() {
        let mut file = BytesMut::new();
        let mut seg = Seg::new(META_RAW).object_count(2);
        // Void has code 0, which the builder reserves for "unchanged".
        Seg::str(&mut seg.meta, false, "/'G'/'v'");
        seg.meta.put_u32_le(20);
        seg.meta.put_u32_le(DataType::Void.code());
        seg.meta.put_u32_le(1);
        seg.meta.put_u64_le(1 << 62);
        seg.meta.put_u32_le(0);
        seg.object("/'G'/'a'", Some((0x0A, 1)), &[])
            .raw_f64(&[1.0])
            .write(&mut file);
        assert!(matches!(
            TdmsFile::from_bytes(file.freeze()),
            Err(DaqError::FileFormat(_))
        ));
    }

    #[test]
    fn overflowing_chunk_size_is_rejected() {
        let mut file = BytesMut::new();
        Seg::new(META_RAW)
            .object_count(2)
            .object("/'G'/'a'", Some((0x0A, 1 << 60)), &[])
            .object("/'G'/'b'", Some((0x0A, 1 << 60)), &[])
            .raw_f64(&[1.0, 2.0])
            .write(&mut file);
        assert!(matches!(
            TdmsFile::from_bytes(file.freeze()),
            Err(DaqError::FileFormat(_))
        ));
    }

    #[test]
    fn string_counts_must_fit_their_byte_size() {
        let mut file = BytesMut::new();
        let mut seg = Seg::new(META_RAW).object_count(1);
        string_object(&mut seg, "/'G'/'s'", 1 << 40, 16);
        seg.raw.put_slice(&[0u8; 16]);
        seg.write(&mut file);
        assert!(matches!(
            TdmsFile::from_bytes(file.freeze()),
            Err(DaqError::FileFormat(_))
        ));

        // Declared size larger than what is left.
        let mut dec = Decoder::new(&[0u8; 8], false);
        assert!(matches!(
            dec.string_run(1, 1 << 40),
            Err(DaqError::FileFormat(_))
        ));
        let mut dec = Decoder::new(&[0u8; 8], false);
        assert!(matches!(
            dec.string_run(usize::MAX, 8),
            Err(DaqError::FileFormat(_))
        ));
    }

    #[test]
    fn decodes_strings() {
        let mut file = BytesMut::new();
        let mut seg = Seg::new(META_RAW).object_count(1);
        string_object(&mut seg, "/'G'/'s'", 2, 8 + 5);
        seg.raw.put_u32_le(2);
        seg.raw.put_u32_le(5);
        seg.raw.put_slice(b"okbad");
        seg.write(&mut file);

        let tdms = TdmsFile::from_bytes(file.freeze()).unwrap();
        match &tdms.groups[0].channels[0].data {
            ChannelData::Text(v) => assert_eq!(v, &["ok", "bad"]),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn truncated_segment_is_an_error() {
        let mut file = BytesMut::new();
        Seg::new(META_RAW)
            .object_count(1)
            .object("/'G'/'a'", Some((0x0A, 2)), &[])
            .raw_f64(&[1.0, 2.0])
            .write(&mut file);
        let cut = file.split_to(file.len() - 4);
        assert!(matches!(
            TdmsFile::from_bytes(cut.freeze()),
            Err(DaqError::FileFormat(_))
        ));
    }
}
