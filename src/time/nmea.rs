//! NMEA 0183 time sentence decoder
//!
//! Decodes the two time-bearing sentences a GPS receiver emits:
//!
//! - `$--RMC`: `hhmmss.ss,status,lat,N/S,lon,E/W,speed,course,ddmmyy,...`
//! - `$--ZDA`: `hhmmss.ss,dd,mm,yyyy,zone_h,zone_m`
//!
//! Any two-letter talker ID is accepted (`GP`, `GN`, `GL`, ...). Decoding is a pure
//! function of the line; nothing here touches the serial port or the clock.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::core::{Error, Result, SentenceType};

/// Number of comma-separated fields (including the identifier) an RMC must carry
const RMC_MIN_FIELDS: usize = 10;

/// Number of comma-separated fields (including the identifier) a ZDA must carry
const ZDA_MIN_FIELDS: usize = 5;

/// Two-digit RMC years at or above this belong to the 1900s
const RMC_CENTURY_PIVOT: i32 = 80;

/// One decoded time sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmeaFix {
    /// UTC date and time carried by the sentence
    pub utc: DateTime<Utc>,
    /// Whether the receiver reported a usable fix
    pub fix_valid: bool,
    /// Which sentence the fix came from
    pub sentence: SentenceType,
}

/// XOR of every byte between `$` and `*`
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Decodes one line of serial text into a fix.
///
/// Trailing CR/LF and whitespace are ignored. Fails with `IncompleteSentence` for
/// truncated lines, `Checksum` on a mismatch, `UnsupportedSentence` for
/// identifiers other than RMC/ZDA and `MalformedField` for unusable values.
pub fn decode(line: &str) -> Result<NmeaFix> {
    let sentence = line.trim();
    let body = sentence
        .strip_prefix('$')
        .ok_or_else(|| Error::incomplete(format!("no '$' start delimiter in {:?}", sentence)))?;
    let (data, trailer) = body
        .rsplit_once('*')
        .ok_or_else(|| Error::incomplete(format!("no checksum in {:?}", sentence)))?;

    let expected = parse_checksum(trailer)?;
    let computed = checksum(data);
    if expected != computed {
        return Err(Error::Checksum { expected, computed });
    }

    let fields: Vec<&str> = data.split(',').collect();
    match identify(fields[0])? {
        SentenceType::Rmc => decode_rmc(&fields),
        SentenceType::Zda => decode_zda(&fields),
    }
}

fn parse_checksum(trailer: &str) -> Result<u8> {
    if trailer.len() < 2 {
        return Err(Error::incomplete(format!("checksum truncated to {:?}", trailer)));
    }
    if trailer.len() > 2 || !trailer.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::malformed("checksum", trailer));
    }
    u8::from_str_radix(trailer, 16).map_err(|_| Error::malformed("checksum", trailer))
}

fn identify(id: &str) -> Result<SentenceType> {
    let talker_ok = id.len() == 5 && id.as_bytes()[..2].iter().all(|b| b.is_ascii_uppercase());
    match (talker_ok, id.get(2..)) {
        (true, Some("RMC")) => Ok(SentenceType::Rmc),
        (true, Some("ZDA")) => Ok(SentenceType::Zda),
        _ => Err(Error::unsupported_sentence(id)),
    }
}

fn decode_rmc(fields: &[&str]) -> Result<NmeaFix> {
    if fields.len() < RMC_MIN_FIELDS {
        return Err(Error::incomplete(format!(
            "RMC carries {} of {} fields",
            fields.len(),
            RMC_MIN_FIELDS
        )));
    }

    let time = parse_time(fields[1])?;
    let fix_valid = match fields[2] {
        "A" => true,
        "V" => false,
        other => return Err(Error::malformed("status", other)),
    };

    let date = fields[9];
    if date.len() != 6 || !is_digits(date) {
        return Err(Error::malformed("date", date));
    }
    let day = parse_number(&date[0..2], "date", date)?;
    let month = parse_number(&date[2..4], "date", date)?;
    let yy = parse_number(&date[4..6], "date", date)? as i32;
    let year = if yy >= RMC_CENTURY_PIVOT { 1900 + yy } else { 2000 + yy };
    let date =
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| Error::malformed("date", date))?;

    Ok(NmeaFix {
        utc: Utc.from_utc_datetime(&NaiveDateTime::new(date, time)),
        fix_valid,
        sentence: SentenceType::Rmc,
    })
}

fn decode_zda(fields: &[&str]) -> Result<NmeaFix> {
    if fields.len() < ZDA_MIN_FIELDS {
        return Err(Error::incomplete(format!(
            "ZDA carries {} of {} fields",
            fields.len(),
            ZDA_MIN_FIELDS
        )));
    }

    let time = parse_time(fields[1])?;
    let day = parse_number(fields[2], "day", fields[2])?;
    let month = parse_number(fields[3], "month", fields[3])?;
    if fields[4].len() != 4 {
        return Err(Error::malformed("year", fields[4]));
    }
    let year = parse_number(fields[4], "year", fields[4])? as i32;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        Error::malformed("date", format!("{}-{}-{}", fields[4], fields[3], fields[2]))
    })?;

    Ok(NmeaFix {
        utc: Utc.from_utc_datetime(&NaiveDateTime::new(date, time)),
        fix_valid: true,
        sentence: SentenceType::Zda,
    })
}

/// Parses `hhmmss[.f...]`, keeping up to nanosecond resolution.
fn parse_time(value: &str) -> Result<NaiveTime> {
    let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
    if whole.len() != 6 || !is_digits(whole) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::malformed("time", value));
    }

    let hour = parse_number(&whole[0..2], "time", value)?;
    let minute = parse_number(&whole[2..4], "time", value)?;
    let second = parse_number(&whole[4..6], "time", value)?;
    let nanos = parse_fraction(frac);

    // chrono encodes a leap second as second 59 with an extra second of nanos
    let (second, nanos) = if second == 60 {
        (59, nanos + 1_000_000_000)
    } else {
        (second, nanos)
    };

    NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
        .ok_or_else(|| Error::malformed("time", value))
}

fn parse_fraction(digits: &str) -> u32 {
    let digits = &digits[..digits.len().min(9)];
    let value = digits
        .bytes()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    value * 10u32.pow((9 - digits.len()) as u32)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_number(digits: &str, field: &'static str, value: &str) -> Result<u32> {
    if !is_digits(digits) {
        return Err(Error::malformed(field, value));
    }
    digits.parse().map_err(|_| Error::malformed(field, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const ZDA: &str = "$GPZDA,123519.00,23,03,1994,00,00*6C";

    #[test]
    fn test_rmc_decoding() {
        let fix = decode(RMC).unwrap();

        assert_eq!(fix.sentence, SentenceType::Rmc);
        assert!(fix.fix_valid);
        assert_eq!(fix.utc.to_rfc3339(), "1994-03-23T12:35:19+00:00");
    }

    #[test]
    fn test_zda_decoding() {
        let fix = decode(ZDA).unwrap();

        assert_eq!(fix.sentence, SentenceType::Zda);
        assert!(fix.fix_valid);
        assert_eq!(fix.utc.year(), 1994);
        assert_eq!(fix.utc.month(), 3);
        assert_eq!(fix.utc.day(), 23);
        assert_eq!(fix.utc.hour(), 12);
        assert_eq!(fix.utc.minute(), 35);
        assert_eq!(fix.utc.second(), 19);
    }

    #[test]
    fn test_line_terminator_ignored() {
        let fix = decode(&format!("{}\r\n", ZDA)).unwrap();
        assert_eq!(fix.sentence, SentenceType::Zda);
    }

    #[test]
    fn test_fractional_seconds_and_talker() {
        let line = "$GNRMC,001031.500,A,4404.14036,N,12118.85961,W,0.0,0.0,010125,,,A*6F";
        let fix = decode(line).unwrap();

        assert_eq!(fix.utc.to_rfc3339(), "2025-01-01T00:10:31.500+00:00");
        assert_eq!(fix.utc.nanosecond(), 500_000_000);

        let fix = decode("$GPZDA,201530.000,04,07,2002,00,00*50").unwrap();
        assert_eq!(fix.utc.to_rfc3339(), "2002-07-04T20:15:30+00:00");
    }

    #[test]
    fn test_void_fix_still_returned() {
        let line = "$GPRMC,225446.25,V,4916.45,N,12311.12,W,000.5,054.7,191124,020.3,E*5D";
        let fix = decode(line).unwrap();

        assert!(!fix.fix_valid);
        assert_eq!(fix.utc.to_rfc3339(), "2024-11-19T22:54:46.250+00:00");
    }

    #[test]
    fn test_century_pivot() {
        let line = "$GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E*62";
        let fix = decode(line).unwrap();
        assert_eq!(fix.utc.year(), 1998);
    }

    #[test]
    fn test_leap_second() {
        let fix = decode("$GPZDA,235960.00,31,12,2016,00,00*69").unwrap();

        assert_eq!(fix.utc.second(), 59);
        assert_eq!(fix.utc.nanosecond(), 1_000_000_000);
    }

    #[test]
    fn test_tampered_checksum() {
        // Date digit changed, checksum left alone
        let tampered = RMC.replace("230394", "230395");
        assert!(matches!(
            decode(&tampered),
            Err(Error::Checksum { expected: 0x6A, .. })
        ));

        let tampered = RMC.replace("*6A", "*6B");
        assert!(matches!(
            decode(&tampered),
            Err(Error::Checksum { expected: 0x6B, computed: 0x6A })
        ));
    }

    #[test]
    fn test_unsupported_sentence() {
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        assert!(matches!(decode(gga), Err(Error::UnsupportedSentence(id)) if id == "GPGGA"));
    }

    #[test]
    fn test_incomplete_sentences() {
        assert!(matches!(decode(""), Err(Error::IncompleteSentence(_))));
        assert!(matches!(
            decode("$GPRMC,123519,A,4807.038,N,01131.000,E"),
            Err(Error::IncompleteSentence(_))
        ));
        assert!(matches!(decode(&RMC[..RMC.len() - 1]), Err(Error::IncompleteSentence(_))));
        assert!(matches!(
            decode("$GPRMC,123519,A,4807.038,N*57"),
            Err(Error::IncompleteSentence(_))
        ));
        assert!(matches!(decode(&RMC[10..]), Err(Error::IncompleteSentence(_))));
        assert!(matches!(
            decode("$GPZDA,123519.00,23,03*45"),
            Err(Error::IncompleteSentence(_))
        ));
    }

    #[test]
    fn test_malformed_fields() {
        // Status neither A nor V
        assert!(matches!(
            decode("$GPRMC,123519,X,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*73"),
            Err(Error::MalformedField { field: "status", .. })
        ));
        // Two-digit ZDA year
        assert!(matches!(
            decode("$GPZDA,123519.00,23,03,94,00,00*64"),
            Err(Error::MalformedField { field: "year", .. })
        ));
        // Short time field
        assert!(matches!(
            decode("$GPRMC,1235,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*62"),
            Err(Error::MalformedField { field: "time", .. })
        ));
        // Day 32
        assert!(matches!(
            decode("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,320394,003.1,W*6A"),
            Err(Error::MalformedField { field: "date", .. })
        ));
        // Missing day
        assert!(matches!(
            decode("$GPZDA,120000.50,,03,1994,00,00*66"),
            Err(Error::MalformedField { field: "day", .. })
        ));
        assert!(matches!(
            decode("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*XY"),
            Err(Error::MalformedField { field: "checksum", .. })
        ));
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum("GPZDA,123519.00,23,03,1994,00,00"), 0x6C);
        assert_eq!(checksum(""), 0);
    }
}
