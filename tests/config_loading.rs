//! Loading settings files from disk.

use std::io::Write;
use std::time::Duration;

use waveform_daq::config::Settings;
use waveform_daq::{ChannelUnits, ErrorKind, TerminalMode};

const DAQ_TOML: &str = r#"
[application]
name = "Bench DAQ"
log_level = "debug"

[global]
device = "cDAQ1Mod1"

[acquisition]
sample_rate = 500.0
window_seconds = 10.0
read_timeout = "250ms"

[storage]
output_dir = "runs"

[channels]
thermocouple = "ai2, DIFF, type_k, 400, degC"
supply = "ai0, RSE, 10, V"
pressure = "ai1, NRSE, psi_gauge, 150, psi"
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn settings_load_from_file() {
    let file = write_config(DAQ_TOML);
    let settings = Settings::load_from(file.path()).unwrap();
    settings.validate().unwrap();

    assert_eq!(settings.application.name, "Bench DAQ");
    assert_eq!(settings.global.device, "cDAQ1Mod1");
    assert_eq!(settings.acquisition.sample_rate, 500.0);
    assert_eq!(settings.acquisition.window_capacity(), 5000);
    assert_eq!(settings.acquisition.read_timeout, Duration::from_millis(250));
    assert_eq!(settings.storage.output_dir, std::path::PathBuf::from("runs"));

    let names: Vec<_> = settings.channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["thermocouple", "supply", "pressure"]);

    let supply = &settings.channels[1];
    assert_eq!(supply.terminal_mode, TerminalMode::Rse);
    assert_eq!(supply.units, ChannelUnits::Volts);
    assert_eq!(supply.physical_channel("cDAQ1Mod1"), "cDAQ1Mod1/ai0");

    let pressure = &settings.channels[2];
    assert_eq!(pressure.scale(), Some("psi_gauge"));
    assert_eq!(pressure.max_range, 150.0);
    assert_eq!(pressure.unit, "psi");
}

#[test]
fn environment_overrides_file_values() {
    // Jail serializes env access and restores it afterwards.
    figment::Jail::expect_with(|jail| {
        jail.create_file("daq.toml", DAQ_TOML)?;
        jail.set_env("WAVEFORM_DAQ_STORAGE__FILE_PREFIX", "overnight");

        let settings = Settings::load_from("daq.toml").map_err(|e| e.to_string())?;
        assert_eq!(settings.storage.file_prefix, "overnight");
        assert_eq!(settings.storage.output_dir, std::path::PathBuf::from("runs"));
        Ok(())
    });
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Settings::load_from(dir.path().join("nope.toml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn missing_device_section_is_a_config_error() {
    let file = write_config("[channels]\nsupply = \"ai0, RSE, 10, V\"\n");
    let err = Settings::load_from(file.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn non_positive_range_is_rejected() {
    let file = write_config(
        r#"
        [global]
        device = "Dev1"
        [channels]
        supply = "ai0, RSE, -10, V"
        "#,
    );
    let err = Settings::load_from(file.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn shipped_sample_config_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/daq.toml");
    let settings = Settings::load_from(path).unwrap();
    settings.validate().unwrap();
    assert!(!settings.channels.is_empty());
}
