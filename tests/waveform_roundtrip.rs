//! Persisted captures load back with their time axis and units.

use waveform_daq::data::tdms::{ChannelLayout, FileLayout, PropertyValue, TdmsFile, TdmsWriter};
use waveform_daq::data::{load_waveform, SampleBlock};

fn ramp(channel: usize, range: std::ops::Range<usize>) -> Vec<f64> {
    range.map(|i| channel as f64 * 10.0 + i as f64 * 0.5).collect()
}

fn write_capture(path: &std::path::Path) {
    let layout = FileLayout {
        group: "Analog Input".to_string(),
        file_properties: vec![("name".to_string(), "roundtrip".into())],
        group_properties: vec![],
        channels: ["x", "y", "z"]
            .iter()
            .map(|name| ChannelLayout {
                name: name.to_string(),
                properties: vec![
                    ("wf_increment".to_string(), PropertyValue::F64(0.01)),
                    ("unit_string".to_string(), "mm".into()),
                ],
            })
            .collect(),
    };
    let mut writer = TdmsWriter::create(path, layout).unwrap().with_flush_threshold(20);

    // Uneven blocks so both segment kinds end up in the file.
    for range in [0..20, 20..40, 40..73, 73..100] {
        let block = SampleBlock::from_channels((0..3).map(|c| ramp(c, range.clone())).collect());
        writer.write_block(&block).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn capture_loads_with_time_axis() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.tdms");
    write_capture(&path);

    let capture = load_waveform(&path).unwrap();
    assert_eq!(capture.channel_names(), ["x", "y", "z"]);
    assert_eq!(capture.num_samples(), 100);
    assert_eq!(capture.sample_increment, 0.01);

    let expected: Vec<f64> = (0..100).map(|i| i as f64 * 0.01).collect();
    assert_eq!(capture.time_axis, expected);
    assert_eq!(capture.time_axis[99], 99.0 * 0.01);

    for (c, channel) in capture.channels.iter().enumerate() {
        assert_eq!(channel.samples, ramp(c, 0..100));
        assert_eq!(channel.unit(), Some("mm"));
    }
}

#[test]
fn closing_segment_records_sample_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.tdms");
    write_capture(&path);

    let file = TdmsFile::open(&path).unwrap();
    let group = file.group("Analog Input").unwrap();
    let x = group.channel("x").unwrap();
    assert_eq!(
        x.property("wf_samples").and_then(PropertyValue::as_f64),
        Some(100.0)
    );
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_waveform(dir.path().join("absent.tdms")).unwrap_err();
    assert_eq!(err.kind(), waveform_daq::ErrorKind::Io);
}

#[cfg(feature = "storage_csv")]
#[test]
fn csv_export_reimports_identically() {
    use waveform_daq::data::export::{export_container, import_csv};

    let dir = tempfile::tempdir().unwrap();
    let tdms = dir.path().join("capture.tdms");
    let csv = dir.path().join("capture.csv");
    write_capture(&tdms);

    let exported = export_container(&tdms, &csv).unwrap();
    let text = std::fs::read_to_string(&csv).unwrap();
    assert!(text.starts_with("Time,x,y,z"));
    assert_eq!(text.lines().count(), 101);

    let imported = import_csv(&csv).unwrap();
    assert_eq!(imported.channel_names(), exported.channel_names());
    assert_eq!(imported.time_axis, exported.time_axis);
    for (a, b) in imported.channels.iter().zip(&exported.channels) {
        assert_eq!(a.samples, b.samples);
    }
}
