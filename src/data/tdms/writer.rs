//! Streaming TDMS writer for one group of `f64` channels.
//!
//! The first segment carries only metadata (file, group and channel
//! properties). Sample blocks are buffered per channel and written as raw
//! data segments once `flush_threshold` samples per channel are pending.
//! A segment whose chunk length matches the previous one reuses its layout
//! and carries no metadata at all. [`TdmsWriter::finish`] flushes the tail and
//! records the final `wf_samples` count in a closing metadata segment.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use super::types::{
    toc, DataType, ObjectPath, Properties, PropertyValue, NO_RAW_DATA, TDMS_TAG, TDMS_VERSION,
};
use crate::data::block::SampleBlock;
use crate::error::{AppResult, DaqError};

/// Default per-channel flush threshold.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// Channel declaration for a new file.
#[derive(Debug, Clone)]
pub struct ChannelLayout {
    /// Channel name
    pub name: String,
    /// Channel properties
    pub properties: Properties,
}

/// Objects written into the first segment.
#[derive(Debug, Clone)]
pub struct FileLayout {
    /// Name of the single group
    pub group: String,
    /// File properties
    pub file_properties: Properties,
    /// Group properties
    pub group_properties: Properties,
    /// Channels in order
    pub channels: Vec<ChannelLayout>,
}

/// Streaming writer.
pub struct TdmsWriter<W: Write> {
    out: W,
    group: String,
    channel_paths: Vec<String>,
    pending: Vec<Vec<f64>>,
    flush_threshold: usize,
    last_chunk_len: Option<usize>,
    samples_written: u64,
    segments: u64,
}

impl TdmsWriter<BufWriter<File>> {
    /// Create (truncate) a file and write its metadata segment.
    pub fn create<P: AsRef<Path>>(path: P, layout: FileLayout) -> AppResult<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), channels = layout.channels.len(), "Created TDMS file");
        Self::new(BufWriter::new(file), layout)
    }
}

impl<W: Write> TdmsWriter<W> {
    /// Wrap a sink and write the metadata segment.
    pub fn new(out: W, layout: FileLayout) -> AppResult<Self> {
        if layout.channels.is_empty() {
            return Err(DaqError::Configuration(
                "A TDMS file needs at least one channel".to_string(),
            ));
        }
        let channel_paths: Vec<String> = layout
            .channels
            .iter()
            .map(|c| ObjectPath::Channel(layout.group.clone(), c.name.clone()).to_path_string())
            .collect();

        let mut writer = Self {
            out,
            group: layout.group.clone(),
            pending: vec![Vec::new(); channel_paths.len()],
            channel_paths,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            last_chunk_len: None,
            samples_written: 0,
            segments: 0,
        };

        let mut meta = BytesMut::new();
        meta.put_u32_le(2 + layout.channels.len() as u32);
        put_object(&mut meta, &ObjectPath::Root.to_path_string(), &layout.file_properties);
        put_object(
            &mut meta,
            &ObjectPath::Group(layout.group.clone()).to_path_string(),
            &layout.group_properties,
        );
        for (path, channel) in writer.channel_paths.iter().zip(&layout.channels) {
            put_object(&mut meta, path, &channel.properties);
        }
        writer.write_segment(toc::META_DATA | toc::NEW_OBJ_LIST, &meta, &[])?;
        Ok(writer)
    }

    /// Samples per channel buffered before a segment is written.
    pub fn with_flush_threshold(mut self, samples: usize) -> Self {
        self.flush_threshold = samples.max(1);
        self
    }

    /// Group name.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Samples per channel accepted so far, flushed or not.
    pub fn samples_written(&self) -> u64 {
        self.samples_written + self.pending.first().map_or(0, |p| p.len() as u64)
    }

    /// Buffer a block, writing a segment when the threshold is reached.
    pub fn write_block(&mut self, block: &SampleBlock) -> AppResult<()> {
        if block.n_channels() != self.pending.len() || !block.is_rectangular() {
            return Err(DaqError::Processing(format!(
                "Block shape does not match the {} declared channels",
                self.pending.len()
            )));
        }
        for (pending, samples) in self.pending.iter_mut().zip(block.channels()) {
            pending.extend_from_slice(samples);
        }
        if self.pending[0].len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Write all buffered samples as one raw data segment.
    pub fn flush(&mut self) -> AppResult<()> {
        let k = self.pending[0].len();
        if k == 0 {
            return self.out.flush().map_err(DaqError::from);
        }

        let mut raw = BytesMut::with_capacity(k * 8 * self.pending.len());
        for channel in &self.pending {
            for &v in channel {
                raw.put_f64_le(v);
            }
        }

        if self.last_chunk_len == Some(k) {
            self.write_segment(toc::RAW_DATA, &[], &raw)?;
        } else {
            let mut meta = BytesMut::new();
            meta.put_u32_le(self.channel_paths.len() as u32);
            for path in &self.channel_paths {
                put_string(&mut meta, path);
                meta.put_u32_le(20);
                meta.put_u32_le(DataType::F64.code());
                meta.put_u32_le(1);
                meta.put_u64_le(k as u64);
                meta.put_u32_le(0);
            }
            self.write_segment(
                toc::META_DATA | toc::NEW_OBJ_LIST | toc::RAW_DATA,
                &meta,
                &raw,
            )?;
            self.last_chunk_len = Some(k);
        }

        for channel in &mut self.pending {
            channel.clear();
        }
        self.samples_written += k as u64;
        self.out.flush()?;
        trace!(samples = k, total = self.samples_written, "Flushed TDMS segment");
        Ok(())
    }

    /// Flush, record `wf_samples`, and hand back the sink.
    pub fn finish(mut self) -> AppResult<W> {
        self.flush()?;

        let mut meta = BytesMut::new();
        meta.put_u32_le(self.channel_paths.len() as u32);
        for path in &self.channel_paths {
            put_object(
                &mut meta,
                path,
                &vec![(
                    "wf_samples".to_string(),
                    PropertyValue::UInt(self.samples_written),
                )],
            );
        }
        self.write_segment(toc::META_DATA | toc::NEW_OBJ_LIST, &meta, &[])?;
        self.out.flush()?;
        debug!(
            samples = self.samples_written,
            segments = self.segments,
            "Closed TDMS file"
        );
        Ok(self.out)
    }

    fn write_segment(&mut self, toc_mask: u32, meta: &[u8], raw: &[u8]) -> AppResult<()> {
        let mut lead_in = BytesMut::with_capacity(28);
        lead_in.put_slice(TDMS_TAG);
        lead_in.put_u32_le(toc_mask);
        lead_in.put_u32_le(TDMS_VERSION);
        lead_in.put_u64_le((meta.len() + raw.len()) as u64);
        lead_in.put_u64_le(meta.len() as u64);

        self.out.write_all(&lead_in)?;
        self.out.write_all(meta)?;
        self.out.write_all(raw)?;
        self.segments += 1;
        Ok(())
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Object entry without raw data.
fn put_object(buf: &mut BytesMut, path: &str, properties: &Properties) {
    put_string(buf, path);
    buf.put_u32_le(NO_RAW_DATA);
    buf.put_u32_le(properties.len() as u32);
    for (name, value) in properties {
        put_string(buf, name);
        buf.put_u32_le(value.data_type().code());
        match value {
            PropertyValue::Int(v) => buf.put_i64_le(*v),
            PropertyValue::UInt(v) => buf.put_u64_le(*v),
            PropertyValue::F32(v) => buf.put_f32_le(*v),
            PropertyValue::F64(v) => buf.put_f64_le(*v),
            PropertyValue::String(s) => put_string(buf, s),
            PropertyValue::Bool(b) => buf.put_u8(u8::from(*b)),
            PropertyValue::Timestamp(ts) => {
                buf.put_u64_le(ts.fractions);
                buf.put_i64_le(ts.seconds);
            }
        }
    }
}
