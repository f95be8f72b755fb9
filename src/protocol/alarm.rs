use strum_macros::{Display, IntoStaticStr};

/// Alarm classification carried by an `ALARM` frame.
#[derive(Display, IntoStaticStr, Copy, Clone, Debug, PartialEq, Eq)]
#[strum(serialize_all = "camelCase")]
pub enum Alarm {
    Sos,
    LowBattery,
    Overspeed,
    Movement,
    GeofenceEnter,
    Accident,
    PowerOff,
    GpsAntennaCut,
    Braking,
    Acceleration,
}

impl Alarm {
    /// Classify an alarm code. Codes without a classification (including the
    /// digital input codes) return `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        let alarm = match code {
            0x01 => Self::Sos,
            0x10 => Self::LowBattery,
            0x11 => Self::Overspeed,
            0x12 => Self::Movement,
            0x13 => Self::GeofenceEnter,
            0x14 => Self::Accident,
            0x50 => Self::PowerOff,
            0x53 => Self::GpsAntennaCut,
            0x72 => Self::Braking,
            0x73 => Self::Acceleration,
            _ => return None,
        };

        Some(alarm)
    }
}

/// Digital input change signalled by an alarm code, as `(input, active)`.
///
/// `0x02..=0x05` activate inputs 2-5, `0x32..=0x35` deactivate them.
pub fn input_change(code: u8) -> Option<(u8, bool)> {
    match code {
        0x02..=0x05 => Some((code, true)),
        0x32..=0x35 => Some((code - 0x30, false)),
        _ => None,
    }
}
