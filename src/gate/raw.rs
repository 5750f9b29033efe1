use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// RawReading: one line of the device feed
//
// The device sends one JSON object per line, e.g.
//
//   {"temperature": 24.3, "humidite": 61, "ventiloActive": false, "buzzer": false, "signal": false}
//
// Field names come in two spellings: the English API names and the names
// the microcontroller firmware emits. `temperature` and `humidity` are kept
// as raw JSON values so that a wrong type surfaces as `NotNumeric` rather
// than as an opaque parse failure.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    pub temperature: Value,
    #[serde(alias = "humidite")]
    pub humidity: Value,
    #[serde(default, alias = "ventiloActive", alias = "fan_active")]
    pub fan_active: Option<bool>,
    #[serde(default, alias = "buzzer", alias = "alarm_active")]
    pub alarm_active: Option<bool>,
    #[serde(default)]
    pub signal: Option<RawSignal>,
}

/// `signal` is a boolean on newer firmware and a colour name on older ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSignal {
    Flag(bool),
    Text(String),
}

impl RawSignal {
    fn raised(&self) -> Result<bool, ValidationError> {
        match self {
            RawSignal::Flag(v) => Ok(*v),
            RawSignal::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "rouge" | "red" | "alert" | "on" | "true" => Ok(true),
                "vert" | "green" | "normal" | "off" | "false" => Ok(false),
                _ => Err(ValidationError::parameter(
                    "signal",
                    s.clone(),
                    "expected a boolean or a colour name",
                )),
            },
        }
    }
}

/// A raw reading that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temperature: f64,
    pub humidity: f64,
    pub fan_active: bool,
    pub alarm_active: bool,
    pub signal: bool,
}

impl RawReading {
    /// Decode one feed line.
    pub fn parse(line: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(line.trim()).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn validate(self) -> Result<Sample, ValidationError> {
        Ok(Sample {
            temperature: finite("temperature", &self.temperature)?,
            humidity: finite("humidity", &self.humidity)?,
            fan_active: self.fan_active.unwrap_or(false),
            alarm_active: self.alarm_active.unwrap_or(false),
            signal: match &self.signal {
                Some(s) => s.raised()?,
                None => false,
            },
        })
    }
}

impl Sample {
    /// Parse and validate in one step.
    pub fn from_line(line: &str) -> Result<Self, ValidationError> {
        RawReading::parse(line)?.validate()
    }
}

fn finite(field: &'static str, value: &Value) -> Result<f64, ValidationError> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::NotNumeric {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_english_field_names() {
        let s = Sample::from_line(
            r#"{"temperature": 24.5, "humidity": 60, "fanActive": true, "alarmActive": false, "signal": true}"#,
        )
        .unwrap();
        assert_eq!(s.temperature, 24.5);
        assert_eq!(s.humidity, 60.0);
        assert!(s.fan_active);
        assert!(!s.alarm_active);
        assert!(s.signal);
    }

    #[test]
    fn parses_firmware_field_names() {
        let s = Sample::from_line(
            r#"{"temperature": 31.2, "humidite": 72, "ventiloActive": true, "buzzer": true, "signal": "rouge"}"#,
        )
        .unwrap();
        assert_eq!(s.humidity, 72.0);
        assert!(s.fan_active);
        assert!(s.alarm_active);
        assert!(s.signal);
    }

    #[test]
    fn optional_flags_default_to_false() {
        let s = Sample::from_line(r#"{"temperature": 20, "humidity": 40}"#).unwrap();
        assert!(!s.fan_active);
        assert!(!s.alarm_active);
        assert!(!s.signal);
    }

    #[test]
    fn green_signal_is_clear() {
        let s = Sample::from_line(r#"{"temperature": 20, "humidity": 40, "signal": "vert"}"#)
            .unwrap();
        assert!(!s.signal);
    }

    #[test]
    fn non_numeric_humidity_is_rejected() {
        let err = Sample::from_line(r#"{"temperature": 20, "humidity": "wet"}"#).unwrap_err();
        assert!(matches!(err, ValidationError::NotNumeric { field: "humidity", .. }));
    }

    #[test]
    fn missing_temperature_is_malformed() {
        let err = Sample::from_line(r#"{"humidity": 50}"#).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn garbage_line_is_malformed() {
        let err = Sample::from_line("T=21.0;H=40").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn unknown_signal_word_is_rejected() {
        let err = Sample::from_line(r#"{"temperature": 20, "humidity": 40, "signal": "orange"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("signal"));
    }
}
