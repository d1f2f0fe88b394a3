// Partial Date/Time Values
//
// HL7v2 and FHIR timestamps routinely carry only some of their components
// (a year, a year and month, a minute-precision time without a zone). This
// module parses both notations into a `PartialDateTime` that remembers which
// components were present, and formats it back out with exactly that
// precision under a time zone handling policy.

use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Timelike, Utc,
};
use nom::{
    branch::alt,
    bytes::complete::take_while_m_n,
    character::complete::{char, digit1, one_of},
    combinator::{map, map_res, opt},
    sequence::{preceded, tuple},
    IResult,
};
use std::fmt;
use std::str::FromStr;

/// Finest component recorded in a parsed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DateTimePrecision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Milliseconds,
}

/// Policy for the zone of formatted output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeZoneHandling {
    /// Keep the source offset; omit it when the source had none
    #[default]
    Preserve,
    /// Convert to UTC
    Utc,
    /// Convert to the host offset
    Local,
}

impl FromStr for TimeZoneHandling {
    type Err = FhirConverterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" => Ok(TimeZoneHandling::Preserve),
            "utc" => Ok(TimeZoneHandling::Utc),
            "local" => Ok(TimeZoneHandling::Local),
            _ => Err(FhirConverterError::render(
                FhirConverterErrorCode::InvalidTimeZoneHandling,
                format!("Invalid time zone handling '{}'", s),
            )),
        }
    }
}

impl fmt::Display for TimeZoneHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeZoneHandling::Preserve => "preserve",
            TimeZoneHandling::Utc => "utc",
            TimeZoneHandling::Local => "local",
        };
        f.write_str(name)
    }
}

/// A date/time together with the precision it was written at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDateTime {
    pub date_time: DateTime<FixedOffset>,
    pub precision: DateTimePrecision,
    /// Whether the source text carried an explicit offset
    pub has_time_zone: bool,
    /// Number of fraction digits in the source (0 unless `Milliseconds`)
    pub fraction_digits: u32,
}

/// Raw components picked out of either notation
#[derive(Debug, Default)]
struct Components<'a> {
    year: i32,
    month: Option<u32>,
    day: Option<u32>,
    hour: Option<u32>,
    minute: Option<u32>,
    second: Option<u32>,
    fraction: Option<&'a str>,
    offset_seconds: Option<i32>,
}

enum ZoneStyle {
    None,
    Zulu,
    Offset,
}

impl PartialDateTime {
    /// Parses HL7v2 `YYYY[MM[DD[HH[MM[SS[.S+]]]]]][+/-ZZZZ]`
    pub fn parse_hl7v2(input: &str) -> Result<Self> {
        let text = input.trim();
        match hl7v2_components(text) {
            Ok(("", components)) => Self::from_components(text, components),
            _ => Err(invalid_format(input)),
        }
    }

    /// Parses the FHIR `YYYY[-MM[-DD[Thh[:mm[:ss[.S+]]]]]][Z|+/-hh:mm]` form
    pub fn parse_fhir(input: &str) -> Result<Self> {
        let text = input.trim();
        match fhir_components(text) {
            Ok(("", components)) => Self::from_components(text, components),
            _ => Err(invalid_format(input)),
        }
    }

    /// Tries the HL7v2 notation, then the FHIR one
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_hl7v2(input).or_else(|_| Self::parse_fhir(input))
    }

    fn from_components(text: &str, c: Components) -> Result<Self> {
        let precision = if c.fraction.is_some() {
            DateTimePrecision::Milliseconds
        } else if c.second.is_some() {
            DateTimePrecision::Second
        } else if c.minute.is_some() {
            DateTimePrecision::Minute
        } else if c.hour.is_some() {
            DateTimePrecision::Hour
        } else if c.day.is_some() {
            DateTimePrecision::Day
        } else if c.month.is_some() {
            DateTimePrecision::Month
        } else {
            DateTimePrecision::Year
        };

        let fraction = c.fraction.unwrap_or_default();
        let fraction_digits = fraction.len().min(9) as u32;
        let nanos = if fraction_digits == 0 {
            0
        } else {
            let digits: u32 = fraction[..fraction_digits as usize]
                .parse()
                .map_err(|_| invalid_format(text))?;
            digits * 10u32.pow(9 - fraction_digits)
        };

        let date = NaiveDate::from_ymd_opt(c.year, c.month.unwrap_or(1), c.day.unwrap_or(1))
            .ok_or_else(|| invalid_format(text))?;
        let time = NaiveTime::from_hms_nano_opt(
            c.hour.unwrap_or(0),
            c.minute.unwrap_or(0),
            c.second.unwrap_or(0),
            nanos,
        )
        .ok_or_else(|| invalid_format(text))?;
        let naive = NaiveDateTime::new(date, time);

        let offset = match c.offset_seconds {
            Some(seconds) => {
                FixedOffset::east_opt(seconds).ok_or_else(|| invalid_format(text))?
            }
            // No zone in the source: read it as host local time
            None => Local
                .offset_from_local_datetime(&naive)
                .earliest()
                .unwrap_or_else(|| Local::now().offset().fix()),
        };
        let date_time = offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| invalid_format(text))?;

        Ok(Self {
            date_time,
            precision,
            has_time_zone: c.offset_seconds.is_some(),
            fraction_digits,
        })
    }

    /// Truncates to day precision; coarser values are unchanged
    pub fn convert_to_date(&self) -> Self {
        let mut date = self.clone();
        if date.precision > DateTimePrecision::Day {
            date.precision = DateTimePrecision::Day;
            date.fraction_digits = 0;
        }
        date
    }

    /// Shifts the value; the result has at least second precision
    pub fn add_seconds(&self, seconds: f64) -> Result<Self> {
        let millis = (seconds * 1000.0).round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return Err(FhirConverterError::render(
                FhirConverterErrorCode::InvalidFilterArgument,
                format!("Cannot add {} seconds", seconds),
            ));
        }
        let date_time = Duration::try_milliseconds(millis as i64)
            .and_then(|delta| self.date_time.checked_add_signed(delta))
            .ok_or_else(|| {
                FhirConverterError::render(
                    FhirConverterErrorCode::InvalidFilterArgument,
                    format!("Adding {} seconds overflows the date range", seconds),
                )
            })?;

        let mut result = self.clone();
        result.date_time = date_time;
        if result.precision < DateTimePrecision::Second {
            result.precision = DateTimePrecision::Second;
        }
        if millis % 1000.0 != 0.0 && result.precision == DateTimePrecision::Second {
            result.precision = DateTimePrecision::Milliseconds;
            result.fraction_digits = 3;
        }
        Ok(result)
    }

    /// FHIR notation, e.g. `2001-01`, `1924-10-10`, `2011-01-03T22:34:28Z`
    pub fn to_fhir_string(&self, handling: TimeZoneHandling) -> String {
        let (date_time, zone) = self.resolve(handling);
        let pattern = match self.precision {
            DateTimePrecision::Year => "%Y",
            DateTimePrecision::Month => "%Y-%m",
            DateTimePrecision::Day => "%Y-%m-%d",
            DateTimePrecision::Hour => "%Y-%m-%dT%H",
            DateTimePrecision::Minute => "%Y-%m-%dT%H:%M",
            DateTimePrecision::Second | DateTimePrecision::Milliseconds => "%Y-%m-%dT%H:%M:%S",
        };
        let mut out = date_time.format(pattern).to_string();
        out.push_str(&self.fraction(&date_time));
        match zone {
            ZoneStyle::None => {}
            ZoneStyle::Zulu => out.push('Z'),
            ZoneStyle::Offset => out.push_str(&date_time.format("%:z").to_string()),
        }
        out
    }

    /// HL7v2 notation, e.g. `200101`, `20110103143428-0800`
    pub fn to_hl7v2_string(&self, handling: TimeZoneHandling) -> String {
        let (date_time, zone) = self.resolve(handling);
        let pattern = match self.precision {
            DateTimePrecision::Year => "%Y",
            DateTimePrecision::Month => "%Y%m",
            DateTimePrecision::Day => "%Y%m%d",
            DateTimePrecision::Hour => "%Y%m%d%H",
            DateTimePrecision::Minute => "%Y%m%d%H%M",
            DateTimePrecision::Second | DateTimePrecision::Milliseconds => "%Y%m%d%H%M%S",
        };
        let mut out = date_time.format(pattern).to_string();
        out.push_str(&self.fraction(&date_time));
        match zone {
            ZoneStyle::None => {}
            ZoneStyle::Zulu => out.push_str("+0000"),
            ZoneStyle::Offset => out.push_str(&date_time.format("%z").to_string()),
        }
        out
    }

    fn fraction(&self, date_time: &DateTime<FixedOffset>) -> String {
        if self.precision != DateTimePrecision::Milliseconds || self.fraction_digits == 0 {
            return String::new();
        }
        let nanos = date_time.nanosecond() % 1_000_000_000;
        let scaled = nanos / 10u32.pow(9 - self.fraction_digits);
        format!(".{:0width$}", scaled, width = self.fraction_digits as usize)
    }

    fn resolve(&self, handling: TimeZoneHandling) -> (DateTime<FixedOffset>, ZoneStyle) {
        if self.precision <= DateTimePrecision::Day {
            return (self.date_time, ZoneStyle::None);
        }
        match handling {
            TimeZoneHandling::Preserve if self.has_time_zone => (self.date_time, ZoneStyle::Offset),
            TimeZoneHandling::Preserve => (self.date_time, ZoneStyle::None),
            TimeZoneHandling::Utc => (self.date_time.with_timezone(&Utc.fix()), ZoneStyle::Zulu),
            TimeZoneHandling::Local => {
                let local = self.date_time.with_timezone(&Local);
                (local.with_timezone(local.offset()), ZoneStyle::Offset)
            }
        }
    }
}

fn invalid_format(input: &str) -> FhirConverterError {
    FhirConverterError::render(
        FhirConverterErrorCode::InvalidDateTimeFormat,
        format!("Invalid date/time '{}'", input),
    )
}

fn digits<'a>(count: usize) -> impl FnMut(&'a str) -> IResult<&'a str, u32> {
    map_res(
        take_while_m_n(count, count, |c: char| c.is_ascii_digit()),
        |s: &str| s.parse::<u32>(),
    )
}

/// Parses the next component only when the previous one was present
fn next<'a, O>(
    input: &'a str,
    present: bool,
    parser: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> IResult<&'a str, Option<O>> {
    if present {
        opt(parser)(input)
    } else {
        Ok((input, None))
    }
}

fn offset_seconds(sign: char, hours: u32, minutes: u32) -> i32 {
    let seconds = (hours * 3600 + minutes * 60) as i32;
    if sign == '-' {
        -seconds
    } else {
        seconds
    }
}

fn hl7v2_offset(input: &str) -> IResult<&str, i32> {
    alt((
        map(char('Z'), |_| 0),
        map(tuple((one_of("+-"), digits(2), digits(2))), |(sign, h, m)| {
            offset_seconds(sign, h, m)
        }),
    ))(input)
}

fn fhir_offset(input: &str) -> IResult<&str, i32> {
    alt((
        map(char('Z'), |_| 0),
        map(
            tuple((one_of("+-"), digits(2), char(':'), digits(2))),
            |(sign, h, _, m)| offset_seconds(sign, h, m),
        ),
    ))(input)
}

fn hl7v2_components(input: &str) -> IResult<&str, Components<'_>> {
    let (input, year) = digits(4)(input)?;
    let (input, month) = opt(digits(2))(input)?;
    let (input, day) = next(input, month.is_some(), digits(2))?;
    let (input, hour) = next(input, day.is_some(), digits(2))?;
    let (input, minute) = next(input, hour.is_some(), digits(2))?;
    let (input, second) = next(input, minute.is_some(), digits(2))?;
    let (input, fraction) = next(input, second.is_some(), preceded(char('.'), digit1))?;
    let (input, offset_seconds) = opt(hl7v2_offset)(input)?;
    Ok((
        input,
        Components {
            year: year as i32,
            month,
            day,
            hour,
            minute,
            second,
            fraction,
            offset_seconds,
        },
    ))
}

fn fhir_components(input: &str) -> IResult<&str, Components<'_>> {
    let (input, year) = digits(4)(input)?;
    let (input, month) = opt(preceded(char('-'), digits(2)))(input)?;
    let (input, day) = next(input, month.is_some(), preceded(char('-'), digits(2)))?;
    let (input, hour) = next(input, day.is_some(), preceded(one_of("T "), digits(2)))?;
    let (input, minute) = next(input, hour.is_some(), preceded(char(':'), digits(2)))?;
    let (input, second) = next(input, minute.is_some(), preceded(char(':'), digits(2)))?;
    let (input, fraction) = next(input, second.is_some(), preceded(char('.'), digit1))?;
    let (input, offset_seconds) = next(input, hour.is_some(), fhir_offset)?;
    Ok((
        input,
        Components {
            year: year as i32,
            month,
            day,
            hour,
            minute,
            second,
            fraction,
            offset_seconds,
        },
    ))
}
