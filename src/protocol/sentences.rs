//! The ASCII sentence formats carried in frame payloads, and how each one fills
//! in a [`Position`].

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};

use super::grammar::{capture, digits, either, hex, lit, optional, skip, Captures, Grammar, Slot, Token, UNBOUNDED};
use crate::report::Position;

const INT: Token = Token::Digits { min: 1, max: UNBOUNDED };

/// Alternation index of the odometer variants in [`REGULAR`].
const ODOMETER_VARIANT: usize = 0;

/// `cell|rssi|odometer(8)[|satellites]`
const SHORT_ODOMETER: usize = 0;

/// `odometer(9)[|unique id]`
const LONG_ODOMETER: usize = 1;


fn hhmmss() -> [Slot; 3] {
    [capture(digits(2)), capture(digits(2)), capture(digits(2))]
}

fn ddmmyy() -> [Slot; 3] {
    [capture(digits(2)), capture(digits(2)), capture(digits(2))]
}

/// `,hhhh` appended to the first two analog channels.
fn extra_adc() -> Slot {
    optional(vec![lit(","), capture(hex(4))])
}

/// Comma separated, captured fields.
fn fields(tokens: &[Token]) -> Vec<Slot> {
    let mut slots = vec![];
    for (n, token) in tokens.iter().enumerate() {
        if n > 0 {
            slots.push(lit(","));
        }
        slots.push(capture(*token));
    }
    slots
}

/// Position report, optionally followed by `|` separated extras.
pub static REGULAR: LazyLock<Grammar> = LazyLock::new(|| {
    let mut slots = vec![];

    slots.extend(hhmmss());
    slots.extend([
        optional(vec![lit(".")]),
        skip(Token::Digits { min: 0, max: UNBOUNDED }),
        lit(","),
        capture(Token::OneOf("AV")),
        lit(","),
        capture(Token::Coordinate),
        lit(","),
        capture(Token::OneOf("NS")),
        lit(","),
        capture(Token::Coordinate),
        lit(","),
        capture(Token::OneOf("EW")),
        lit(","),
        optional(vec![capture(Token::Number)]), // speed
        lit(","),
        optional(vec![capture(Token::Number)]), // course
        lit(","),
    ]);
    slots.extend(ddmmyy());
    slots.push(skip(Token::NoneOf("|")));

    let odometer = either(vec![
        vec![
            lit("|"),
            skip(Token::Hex { min: 16, max: 20 }), // cell
            lit("|"),
            capture(hex(2)), // rssi
            lit("|"),
            capture(hex(8)),
            optional(vec![lit("|"), capture(hex(2))]), // satellites
        ],
        vec![
            lit("|"),
            capture(hex(9)),
            optional(vec![lit("|"), capture(Token::Hex { min: 5, max: UNBOUNDED })]), // unique id
        ],
    ]);

    let adc = vec![
        lit("|"),
        capture(hex(4)),
        lit(","),
        capture(hex(4)),
        extra_adc(),
        extra_adc(),
        extra_adc(),
        extra_adc(),
        extra_adc(),
        extra_adc(),
        optional(vec![odometer]),
    ];

    slots.push(optional(vec![
        lit("|"),
        optional(vec![capture(Token::Decimal)]), // hdop
        lit("|"),
        optional(vec![capture(Token::SignedNumber)]), // altitude
        lit("|"),
        optional(vec![capture(hex(4))]), // status
        optional(adc),
    ]));

    slots.push(skip(Token::Rest));

    Grammar::new("regular", slots)
});

/// Time and location following the card block of an RFID swipe.
pub static RFID: LazyLock<Grammar> = LazyLock::new(|| {
    let mut slots = vec![lit("|")];

    slots.extend(hhmmss());
    slots.push(lit(","));
    slots.extend(ddmmyy());
    slots.extend([
        lit(","),
        capture(Token::Coordinate),
        lit(","),
        capture(Token::OneOf("NS")),
        lit(","),
        capture(Token::Coordinate),
        lit(","),
        capture(Token::OneOf("EW")),
    ]);

    Grammar::new("rfid", slots)
});

/// Live engine readings.
pub static OBD_REALTIME: LazyLock<Grammar> = LazyLock::new(|| {
    use Token::*;

    Grammar::new(
        "obd realtime",
        fields(&[
            Decimal,       // battery
            INT,           // rpm
            INT,           // speed
            Decimal,       // throttle
            Decimal,       // engine load
            SignedInteger, // coolant temperature
            Decimal,       // instantaneous fuel
            Decimal,       // average fuel
            Decimal,       // driving range
            Number,        // odometer
            Decimal,       // single fuel consumption
            Decimal,       // total fuel consumption
            INT,           // error codes
            INT,           // hard accelerations
            INT,           // hard brakes
        ]),
    )
});

/// Lifetime engine totals.
pub static OBD_AGGREGATE: LazyLock<Grammar> = LazyLock::new(|| {
    use Token::*;

    Grammar::new(
        "obd aggregate",
        fields(&[
            INT,     // ignitions
            Decimal, // driving time
            Decimal, // idling time
            INT,     // average hot start time
            INT,     // average speed
            INT,     // highest speed
            INT,     // highest rpm
            INT,     // hard accelerations
            INT,     // hard brakes
        ]),
    )
});


fn update<T>(field: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *field = value;
    }
}

/// Read `hh mm ss` or `dd mm yy` as three numbers.
fn next_triple(captures: &mut Captures) -> Option<(u32, u32, u32)> {
    Some((captures.next_u32()?, captures.next_u32()?, captures.next_u32()?))
}

fn date_time((hour, minute, second): (u32, u32, u32), (day, month, year): (u32, u32, u32)) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(2000 + year as i32, month, day)?;
    Some(date.and_hms_opt(hour, minute, second)?.and_utc())
}

pub fn decode_regular(mut position: Position, sentence: &str) -> Option<Position> {
    let mut captures = REGULAR.parse(sentence)?;

    let time = next_triple(&mut captures)?;

    position.valid = captures.next() == Some("A");
    position.latitude = captures.next_coordinate()?;
    position.longitude = captures.next_coordinate()?;

    update(&mut position.speed, captures.next_f64());
    update(&mut position.course, captures.next_f64());

    let date = next_triple(&mut captures)?;
    position.time = Some(date_time(time, date)?);

    update(&mut position.hdop, captures.next_f64());
    update(&mut position.altitude, captures.next_f64());
    update(&mut position.status, captures.next().map(str::to_owned));

    for channel in &mut position.adc {
        update(channel, captures.next_hex_u32());
    }

    match captures.alternative(ODOMETER_VARIANT) {
        Some(SHORT_ODOMETER) => {
            update(&mut position.rssi, captures.next_hex_u32());
            update(&mut position.odometer, captures.next_hex_u64().map(|odometer| odometer as f64));
            update(&mut position.satellites, captures.next_hex_u32());
        }
        Some(LONG_ODOMETER) => {
            captures.skip(3);
            update(&mut position.odometer, captures.next_hex_u64().map(|odometer| odometer as f64));
            update(&mut position.unique_id, captures.next().map(str::to_owned));
        }
        _ => {}
    }

    Some(position)
}

pub fn decode_rfid(mut position: Position, sentence: &str) -> Option<Position> {
    let mut captures = RFID.parse(sentence)?;

    let time = next_triple(&mut captures)?;
    let date = next_triple(&mut captures)?;
    position.time = Some(date_time(time, date)?);

    position.valid = true;
    position.latitude = captures.next_coordinate()?;
    position.longitude = captures.next_coordinate()?;

    Some(position)
}

/// Expects `position` to be seeded with the device's last fix already.
pub fn decode_obd_realtime(mut position: Position, sentence: &str) -> Option<Position> {
    let mut captures = OBD_REALTIME.parse(sentence)?;

    position.set_opt("battery", captures.next_f64());
    position.set_opt("rpm", captures.next_int());
    position.set_opt("obdSpeed", captures.next_int());
    position.set_opt("throttle", captures.next_f64());
    position.set_opt("engineLoad", captures.next_f64());
    position.set_opt("coolantTemp", captures.next_int());
    position.set_opt("fuelConsumption", captures.next_f64());
    position.set_opt("averageFuelConsumption", captures.next_f64());
    position.set_opt("drivingRange", captures.next_f64());
    update(&mut position.odometer, captures.next_f64());
    position.set_opt("singleFuelConsumption", captures.next_f64());
    position.set_opt("totalFuelConsumption", captures.next_f64());
    position.set_opt("dtcs", captures.next_int());
    position.set_opt("hardAccelerationCount", captures.next_int());
    position.set_opt("hardBrakingCount", captures.next_int());

    Some(position)
}

/// Expects `position` to be seeded with the device's last fix already.
pub fn decode_obd_aggregate(mut position: Position, sentence: &str) -> Option<Position> {
    let mut captures = OBD_AGGREGATE.parse(sentence)?;

    position.set_opt("totalIgnitionNo", captures.next_int());
    position.set_opt("totalDrivingTime", captures.next_f64());
    position.set_opt("totalIdlingTime", captures.next_f64());
    position.set_opt("averageHotStartTime", captures.next_int());
    position.set_opt("averageSpeed", captures.next_int());
    position.set_opt("historyHighestSpeed", captures.next_int());
    position.set_opt("historyHighestRpm", captures.next_int());
    position.set_opt("totalHarshAcceleration", captures.next_int());
    position.set_opt("totalHarshBrake", captures.next_int());

    Some(position)
}


#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::report::Attribute;
    use crate::session::DeviceId;

    const BASIC: &str = "123456,A,1234.5678,N,09876.5432,E,10.5,90.0,010122";

    fn blank() -> Position {
        Position::new(DeviceId(7))
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn test_grammar_sizes() {
        assert_eq!(REGULAR.groups(), 29);
        assert_eq!(RFID.groups(), 10);
        assert_eq!(OBD_REALTIME.groups(), 15);
        assert_eq!(OBD_AGGREGATE.groups(), 9);
    }

    #[test]
    fn test_regular_without_extras() {
        let position = decode_regular(blank(), BASIC).unwrap();

        assert!(position.valid);
        assert_close(position.latitude, 12.0 + 34.5678 / 60.0);
        assert_close(position.longitude, 98.0 + 76.5432 / 60.0);
        assert_eq!(position.speed, Some(10.5));
        assert_eq!(position.course, Some(90.0));
        assert_eq!(position.time, Some(Utc.with_ymd_and_hms(2022, 1, 1, 12, 34, 56).unwrap()));
        assert_eq!(position.hdop, None);
        assert_eq!(position.odometer, None);
        assert_eq!(position.adc, [None; 8]);
    }

    #[test]
    fn test_regular_invalid_fix_without_speed_or_course() {
        let position = decode_regular(blank(), "000000.000,V,0000.0000,S,00000.0000,W,,,311299").unwrap();

        assert!(!position.valid);
        assert_eq!(position.speed, None);
        assert_eq!(position.course, None);
        assert_eq!(position.time, Some(Utc.with_ymd_and_hms(2099, 12, 31, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_regular_southern_western_hemisphere() {
        let position = decode_regular(blank(), "123456,A,3345.1234,S,07030.5000,W,0.0,0,150623").unwrap();

        assert_close(position.latitude, -(33.0 + 45.1234 / 60.0));
        assert_close(position.longitude, -(70.0 + 30.5 / 60.0));
    }

    #[test]
    fn test_regular_with_short_odometer() {
        let sentence = format!("{BASIC},*1C|1.2|-15.5|0001|0010,0020,0030|0123456789ABCDEF|1F|0000A0F0|08");
        let position = decode_regular(blank(), &sentence).unwrap();

        assert_eq!(position.hdop, Some(1.2));
        assert_eq!(position.altitude, Some(-15.5));
        assert_eq!(position.status.as_deref(), Some("0001"));
        assert_eq!(&position.adc[..4], &[Some(0x10), Some(0x20), Some(0x30), None]);
        assert_eq!(position.rssi, Some(0x1f));
        assert_eq!(position.odometer, Some(41200.0));
        assert_eq!(position.satellites, Some(8));
        assert_eq!(position.unique_id, None);
    }

    #[test]
    fn test_regular_with_long_odometer() {
        let sentence = format!("{BASIC}|0.9|100|0400|0010,0020,0030,0040,0050,0060,0070,0080|00000A0F0|ABCDE12345");
        let position = decode_regular(blank(), &sentence).unwrap();

        assert_eq!(position.adc[7], Some(0x80));
        assert_eq!(position.odometer, Some(41200.0));
        assert_eq!(position.unique_id.as_deref(), Some("ABCDE12345"));
        assert_eq!(position.rssi, None);
        assert_eq!(position.satellites, None);
    }

    #[test]
    fn test_regular_short_odometer_without_satellites() {
        let sentence = format!("{BASIC}|1.2|-15.5|0001|0010,0020|0123456789ABCDEF|1F|0000A0F0");
        let position = decode_regular(blank(), &sentence).unwrap();

        assert_eq!(position.rssi, Some(0x1f));
        assert_eq!(position.odometer, Some(41200.0));
        assert_eq!(position.satellites, None);
        assert_eq!(&position.adc[..3], &[Some(0x10), Some(0x20), None]);
    }

    #[test]
    fn test_regular_ignores_trailing_text() {
        let sentence = format!("{BASIC}|1.2|-15.5|0001|0010,0020|0123456789ABCDEF|1F|0000A0F0|08,extra");
        let position = decode_regular(blank(), &sentence).unwrap();

        assert_eq!(position.hdop, Some(1.2));
        assert_eq!(position.rssi, Some(0x1f));
        assert_eq!(position.odometer, Some(41200.0));
        assert_eq!(position.satellites, Some(8));

        // trailing text straight after the fix, with no extras at all
        let position = decode_regular(blank(), &format!("{BASIC}*4F,anything|at all")).unwrap();
        assert_eq!(position.speed, Some(10.5));
        assert_eq!(position.hdop, None);
    }

    #[test]
    fn test_regular_absent_fields_do_not_overwrite() {
        let mut seeded = blank();
        seeded.unique_id = Some("0000012345".to_owned());
        seeded.odometer = Some(5.0);

        let position = decode_regular(seeded, BASIC).unwrap();

        assert_eq!(position.unique_id.as_deref(), Some("0000012345"));
        assert_eq!(position.odometer, Some(5.0));
    }

    #[test]
    fn test_regular_rejects_malformed() {
        assert!(decode_regular(blank(), "garbage").is_none());
        assert!(decode_regular(blank(), "123456,X,1234.5678,N,09876.5432,E,10.5,90.0,010122").is_none());
        // month 13
        assert!(decode_regular(blank(), "123456,A,1234.5678,N,09876.5432,E,10.5,90.0,011322").is_none());
    }

    #[test]
    fn test_rfid() {
        let position = decode_rfid(blank(), "|093000,250322,2230.1234,N,11403.5678,E").unwrap();

        assert!(position.valid);
        assert_eq!(position.time, Some(Utc.with_ymd_and_hms(2022, 3, 25, 9, 30, 0).unwrap()));
        assert_close(position.latitude, 22.0 + 30.1234 / 60.0);
        assert_close(position.longitude, 114.0 + 3.5678 / 60.0);

        assert!(decode_rfid(blank(), "093000,250322,2230.1234,N,11403.5678,E").is_none());
    }

    #[test]
    fn test_obd_realtime() {
        let sentence = "12.6,850,0,15.3,20.1,-5,1.20,8.50,450.0,12345,3.40,1500.25,2,1,0";
        let position = decode_obd_realtime(blank(), sentence).unwrap();

        assert_eq!(position.attribute("battery"), Some(&Attribute::Float(12.6)));
        assert_eq!(position.attribute("rpm"), Some(&Attribute::Int(850)));
        assert_eq!(position.attribute("coolantTemp"), Some(&Attribute::Int(-5)));
        assert_eq!(position.attribute("drivingRange"), Some(&Attribute::Float(450.0)));
        assert_eq!(position.odometer, Some(12345.0));
        assert_eq!(position.attribute("totalFuelConsumption"), Some(&Attribute::Float(1500.25)));
        assert_eq!(position.attribute("hardBrakingCount"), Some(&Attribute::Int(0)));
        assert_eq!(position.attributes.len(), 14);

        // one field short
        assert!(decode_obd_realtime(blank(), "12.6,850,0,15.3,20.1,-5,1.20,8.50,450.0,12345,3.40,1500.25,2,1").is_none());
    }

    #[test]
    fn test_obd_aggregate() {
        let position = decode_obd_aggregate(blank(), "120,356.5,40.25,3,45,130,6200,12,9").unwrap();

        assert_eq!(position.attribute("totalIgnitionNo"), Some(&Attribute::Int(120)));
        assert_eq!(position.attribute("totalIdlingTime"), Some(&Attribute::Float(40.25)));
        assert_eq!(position.attribute("historyHighestRpm"), Some(&Attribute::Int(6200)));
        assert_eq!(position.attribute("totalHarshBrake"), Some(&Attribute::Int(9)));
        assert_eq!(position.attributes.len(), 9);

        // driving time must carry a fraction
        assert!(decode_obd_aggregate(blank(), "120,356,40.25,3,45,130,6200,12,9").is_none());
    }
}
