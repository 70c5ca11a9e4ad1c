//! Text export of captures.
//!
//! Layout: a `Time,<ch1>,<ch2>,...` header, then one row per sample index.
//! Values use Rust's shortest round-trip formatting, so re-importing yields
//! bit-identical samples. A channel shorter than the time axis leaves its
//! trailing cells empty.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::info;

use crate::data::waveform::{CapturedChannel, WaveformCapture};
use crate::error::{AppResult, DaqError};

/// Name of the leading column.
pub const TIME_COLUMN: &str = "Time";

/// Write `capture` to any sink.
pub fn write_csv<W: Write>(capture: &WaveformCapture, out: W) -> AppResult<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header = Vec::with_capacity(capture.channels.len() + 1);
    header.push(TIME_COLUMN);
    header.extend(capture.channels.iter().map(|c| c.name.as_str()));
    writer.write_record(&header)?;

    let mut row = Vec::with_capacity(header.len());
    for (i, t) in capture.time_axis.iter().enumerate() {
        row.clear();
        row.push(t.to_string());
        for ch in &capture.channels {
            row.push(ch.samples.get(i).map(f64::to_string).unwrap_or_default());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `capture` to a file.
pub fn export_csv<P: AsRef<Path>>(capture: &WaveformCapture, path: P) -> AppResult<()> {
    let file = File::create(path.as_ref())?;
    write_csv(capture, file)?;
    info!(
        path = %path.as_ref().display(),
        rows = capture.num_samples(),
        channels = capture.channels.len(),
        "Exported capture"
    );
    Ok(())
}

/// Load a TDMS capture and export it in one step.
pub fn export_container<P: AsRef<Path>, Q: AsRef<Path>>(tdms: P, csv_path: Q) -> AppResult<WaveformCapture> {
    let capture = WaveformCapture::load(tdms)?;
    export_csv(&capture, csv_path)?;
    Ok(capture)
}

/// Parse text produced by [`write_csv`].
pub fn read_csv<R: Read>(input: R) -> AppResult<WaveformCapture> {
    let mut reader = csv::Reader::from_reader(input);
    let headers = reader.headers()?.clone();
    if headers.get(0) != Some(TIME_COLUMN) {
        return Err(DaqError::FileFormat(format!(
            "First column must be '{TIME_COLUMN}'"
        )));
    }

    let mut channels: Vec<CapturedChannel> = headers
        .iter()
        .skip(1)
        .map(|name| CapturedChannel {
            name: name.to_string(),
            samples: Vec::new(),
            properties: Vec::new(),
        })
        .collect();
    let mut time_axis = Vec::new();

    for record in reader.records() {
        let record = record?;
        let mut cells = record.iter();
        time_axis.push(parse_cell(cells.next(), time_axis.len())?);
        for ch in &mut channels {
            match cells.next() {
                Some("") | None => {}
                cell => ch.samples.push(parse_cell(cell, time_axis.len())?),
            }
        }
    }

    let sample_increment = match time_axis.as_slice() {
        [t0, t1, ..] => t1 - t0,
        _ => 1.0,
    };
    Ok(WaveformCapture {
        sample_increment,
        time_axis,
        channels,
    })
}

/// Read a file produced by [`export_csv`].
pub fn import_csv<P: AsRef<Path>>(path: P) -> AppResult<WaveformCapture> {
    read_csv(File::open(path)?)
}

fn parse_cell(cell: Option<&str>, row: usize) -> AppResult<f64> {
    let cell = cell.unwrap_or_default();
    cell.trim()
        .parse()
        .map_err(|_| DaqError::FileFormat(format!("Row {row}: '{cell}' is not a number")))
}
