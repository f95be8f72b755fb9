use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};

use crate::protocol::alarm::Alarm;
use crate::session::DeviceId;

/// Protocol name reports are tagged with, and the configuration namespace.
pub const PROTOCOL: &str = "meiligao";

pub const ADC_CHANNELS: usize = 8;


/// Value of a named, open-ended report attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::Int(value)
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Attribute::Float(value)
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Attribute::Text(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::Text(value.to_owned())
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Int(value) => write!(f, "{value}"),
            Attribute::Float(value) => write!(f, "{value}"),
            Attribute::Text(value) => f.write_str(value),
        }
    }
}


/// Time and place of a device's most recent report.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Fix {
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}


/// One decoded telemetry report.
#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    pub protocol: &'static str,

    pub device: DeviceId,

    pub time: Option<DateTime<Utc>>,

    pub valid: bool,

    /// Location was copied from an earlier report rather than decoded.
    pub outdated: bool,

    /// Decimal degrees, south negative
    pub latitude: f64,

    /// Decimal degrees, west negative
    pub longitude: f64,

    pub altitude: Option<f64>,

    /// Knots
    pub speed: Option<f64>,

    pub course: Option<f64>,

    pub hdop: Option<f64>,

    /// Raw 4 hex digit device status word.
    pub status: Option<String>,

    pub adc: [Option<u32>; ADC_CHANNELS],

    pub rssi: Option<u32>,

    pub odometer: Option<f64>,

    pub satellites: Option<u32>,

    /// RFID card or driver identifier.
    pub unique_id: Option<String>,

    pub alarm: Option<Alarm>,

    /// Digital input number to its state.
    pub inputs: BTreeMap<u8, bool>,

    pub attributes: BTreeMap<String, Attribute>,
}

impl Position {
    pub fn new(device: DeviceId) -> Self {
        Self {
            protocol: PROTOCOL,
            device,
            time: None,
            valid: false,
            outdated: false,
            latitude: 0.0,
            longitude: 0.0,
            altitude: None,
            speed: None,
            course: None,
            hdop: None,
            status: None,
            adc: [None; ADC_CHANNELS],
            rssi: None,
            odometer: None,
            satellites: None,
            unique_id: None,
            alarm: None,
            inputs: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Attribute>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Set an attribute only if the value is present. An absent value never
    /// clears one set earlier.
    pub fn set_opt<V: Into<Attribute>>(&mut self, key: impl Into<String>, value: Option<V>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn fix(&self) -> Option<Fix> {
        Some(Fix {
            time: self.time?,
            latitude: self.latitude,
            longitude: self.longitude,
        })
    }

    /// Take time and location from an earlier fix, for reports that carry neither.
    pub fn seed(&mut self, fix: Option<Fix>) {
        self.outdated = true;

        if let Some(fix) = fix {
            self.time = Some(fix.time);
            self.latitude = fix.latitude;
            self.longitude = fix.longitude;
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time {
            Some(time) => write!(f, "{} ", time.format("%Y-%m-%d %H:%M:%S"))?,
            None => f.write_str("-------------------- ")?,
        }

        write!(
            f,
            "device {} {:.6},{:.6} {}",
            self.device,
            self.latitude,
            self.longitude,
            if self.valid { "valid" } else { "invalid" }
        )?;

        if let Some(speed) = self.speed {
            write!(f, " speed={speed}")?;
        }
        if let Some(course) = self.course {
            write!(f, " course={course}")?;
        }
        if let Some(altitude) = self.altitude {
            write!(f, " altitude={altitude}")?;
        }
        if let Some(odometer) = self.odometer {
            write!(f, " odometer={odometer}")?;
        }
        if let Some(satellites) = self.satellites {
            write!(f, " sat={satellites}")?;
        }
        if let Some(unique_id) = &self.unique_id {
            write!(f, " id={unique_id}")?;
        }
        if let Some(alarm) = self.alarm {
            write!(f, " alarm={alarm}")?;
        }
        for (input, active) in &self.inputs {
            write!(f, " in{input}={}", u8::from(*active))?;
        }
        for (key, value) in &self.attributes {
            write!(f, " {key}={value}")?;
        }

        Ok(())
    }
}
