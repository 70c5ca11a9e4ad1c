//! Channel descriptions.
//!
//! A channel is written in the settings file as a single comma-separated
//! string keyed by its logical name:
//!
//! ```text
//! inlet  = "ai0, RSE, , 10, V"
//! outlet = "ai1, DIFF, pressure_bar, 250, bar"
//! sensor = "ai2, NRSE, 5, V"
//! ```
//!
//! Fields are `address, terminal_mode[, scale], max_range, unit`. The scale
//! field may be omitted entirely or left empty; either way the channel reads
//! raw volts clamped to `±max_range`. A non-empty scale makes the device apply
//! the named custom scale and report engineering units.
//!
//! The order of the table is significant: it defines the channel index used
//! by the sliding buffer, the snapshots and the persisted file.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{AppResult, DaqError};

/// Input terminal configuration of an analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalMode {
    /// Let the device pick its default
    #[default]
    Default,
    /// Referenced single-ended
    Rse,
    /// Non-referenced single-ended
    Nrse,
    /// Differential
    Differential,
    /// Pseudo-differential
    PseudoDifferential,
}

impl TerminalMode {
    /// Canonical spelling used in settings files.
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalMode::Default => "DEFAULT",
            TerminalMode::Rse => "RSE",
            TerminalMode::Nrse => "NRSE",
            TerminalMode::Differential => "DIFF",
            TerminalMode::PseudoDifferential => "PSEUDO_DIFF",
        }
    }
}

impl fmt::Display for TerminalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminalMode {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEFAULT" => Ok(TerminalMode::Default),
            "RSE" => Ok(TerminalMode::Rse),
            "NRSE" => Ok(TerminalMode::Nrse),
            "DIFF" | "DIFFERENTIAL" => Ok(TerminalMode::Differential),
            "PSEUDO_DIFF" | "PSEUDODIFFERENTIAL" | "PSEUDO_DIFFERENTIAL" => {
                Ok(TerminalMode::PseudoDifferential)
            }
            other => Err(DaqError::Configuration(format!(
                "Unknown terminal mode '{other}'. Must be one of: DEFAULT, RSE, NRSE, DIFF, PSEUDO_DIFF"
            ))),
        }
    }
}

/// How the device converts the raw reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelUnits {
    /// Raw volts, clamped to `±max_range`
    Volts,
    /// Named device-side custom scale
    CustomScale(String),
}

/// Immutable description of one logical channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Logical name, unique within a session
    pub name: String,
    /// Physical channel id on the device, e.g. `ai0`
    pub address: String,
    /// Input terminal configuration
    pub terminal_mode: TerminalMode,
    /// Unit conversion applied by the device
    pub units: ChannelUnits,
    /// Upper bound of the measurement range
    pub max_range: f64,
    /// Display unit label
    pub unit: String,
}

impl ChannelConfig {
    /// Parse one channel description.
    pub fn parse(name: &str, description: &str) -> AppResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DaqError::Configuration(
                "Channel name must not be empty".to_string(),
            ));
        }

        let parts: Vec<&str> = description.split(',').map(str::trim).collect();
        let (address, mode, scale, max, unit) = match parts.as_slice() {
            [address, mode, max, unit] => (*address, *mode, None, *max, *unit),
            [address, mode, scale, max, unit] => {
                let scale = (!scale.is_empty()).then_some(*scale);
                (*address, *mode, scale, *max, *unit)
            }
            _ => {
                return Err(DaqError::Configuration(format!(
                    "Channel '{name}': expected 'address, terminal_mode[, scale], max_range, unit', got '{description}'"
                )))
            }
        };

        if address.is_empty() {
            return Err(DaqError::Configuration(format!(
                "Channel '{name}': address is required"
            )));
        }
        if mode.is_empty() {
            return Err(DaqError::Configuration(format!(
                "Channel '{name}': terminal mode is required"
            )));
        }
        let terminal_mode = mode.parse::<TerminalMode>().map_err(|e| match e {
            DaqError::Configuration(msg) => DaqError::Configuration(format!("Channel '{name}': {msg}")),
            other => other,
        })?;

        let max_range = max.parse::<f64>().map_err(|_| {
            DaqError::Configuration(format!(
                "Channel '{name}': max_range '{max}' is not a number"
            ))
        })?;
        if !max_range.is_finite() || max_range <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Channel '{name}': max_range must be a positive finite number, got {max}"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
            terminal_mode,
            units: match scale {
                Some(s) => ChannelUnits::CustomScale(s.to_string()),
                None => ChannelUnits::Volts,
            },
            max_range,
            unit: unit.to_string(),
        })
    }

    /// Fully qualified physical channel, e.g. `Dev1/ai0`.
    pub fn physical_channel(&self, device: &str) -> String {
        format!("{device}/{}", self.address)
    }

    /// Name of the custom scale, if any.
    pub fn scale(&self) -> Option<&str> {
        match &self.units {
            ChannelUnits::CustomScale(s) => Some(s),
            ChannelUnits::Volts => None,
        }
    }
}

/// Parse an ordered channel table, rejecting duplicate names.
pub fn parse_channel_table<I, K, V>(entries: I) -> AppResult<Vec<ChannelConfig>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut channels = Vec::new();
    for (name, description) in entries {
        let channel = ChannelConfig::parse(name.as_ref(), description.as_ref())?;
        if !seen.insert(channel.name.clone()) {
            return Err(DaqError::Configuration(format!(
                "Duplicate channel name: {}",
                channel.name
            )));
        }
        channels.push(channel);
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_fields_mean_raw_volts() {
        let ch = ChannelConfig::parse("sensor", " ai2 , NRSE, 5, V ").unwrap();
        assert_eq!(ch.address, "ai2");
        assert_eq!(ch.terminal_mode, TerminalMode::Nrse);
        assert_eq!(ch.units, ChannelUnits::Volts);
        assert_eq!(ch.max_range, 5.0);
        assert_eq!(ch.unit, "V");
        assert_eq!(ch.physical_channel("Dev1"), "Dev1/ai2");
    }

    #[test]
    fn empty_scale_field_means_raw_volts() {
        let ch = ChannelConfig::parse("inlet", "ai0, RSE, , 10, V").unwrap();
        assert_eq!(ch.units, ChannelUnits::Volts);
        assert!(ch.scale().is_none());
    }

    #[test]
    fn scale_selects_custom_units() {
        let ch = ChannelConfig::parse("outlet", "ai1, diff, pressure_bar, 250, bar").unwrap();
        assert_eq!(ch.terminal_mode, TerminalMode::Differential);
        assert_eq!(ch.scale(), Some("pressure_bar"));
        assert_eq!(ch.max_range, 250.0);
    }

    #[test]
    fn unknown_terminal_mode_fails_at_parse() {
        let err = ChannelConfig::parse("x", "ai0, FLOATING, 10, V").unwrap_err();
        assert!(err.to_string().contains("FLOATING"));
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(ChannelConfig::parse("x", "ai0, RSE").is_err());
        assert!(ChannelConfig::parse("x", ", RSE, 10, V").is_err());
        assert!(ChannelConfig::parse("x", "ai0, , 10, V").is_err());
        assert!(ChannelConfig::parse("x", "ai0, RSE, ten, V").is_err());
        assert!(ChannelConfig::parse("x", "ai0, RSE, a, b, c, d").is_err());
    }

    #[test]
    fn table_keeps_order_and_rejects_duplicates() {
        let table = [("b", "ai1, RSE, 10, V"), ("a", "ai0, RSE, 10, V")];
        let channels = parse_channel_table(table).unwrap();
        let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);

        let dup = [("a", "ai1, RSE, 10, V"), ("a", "ai0, RSE, 10, V")];
        assert!(parse_channel_table(dup).is_err());
    }
}
