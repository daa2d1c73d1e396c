//! Represent the data exchanged with a Channel Access engine.
//!
//! Channel Access transfers record values as one of seven basic field types,
//! enumerated in [`FieldType`] and carried as a [`Value`]. All numeric types are
//! signed and may be arrays:
//! - [`Value::Char`] ([`Vec<i8>`])
//! - [`Value::Int`] ([`Vec<i16>`])
//! - [`Value::Long`] ([`Vec<i32>`])
//! - [`Value::Float`] ([`Vec<f32>`])
//! - [`Value::Double`] ([`Vec<f64>`])
//! - [`Value::Enum`] ([`u16`]), an index into the enumeration strings of the record.
//! - [`Value::String`] ([`Vec<Text>`]). On the wire these are raw bytes with no
//!   declared encoding; [`Text`] tracks whether an element is still raw or has been
//!   decoded with a known charset.
//!
//! Alongside the value, the engine reports metadata: alarm [`AlarmStatus`] and
//! [`Severity`], an [`EpicsTime`] timestamp, and for "control" requests the
//! precision, units, enumeration strings and [`Limits`]. The whole set as handed
//! over by an engine callback is a [`Dbr`]; any attribute the engine did not
//! supply is left as `None`.
//!
//! The flag types [`AccessRights`] and [`Events`] mirror the libca constants of the
//! same names.

use std::{
    fmt::{self, Display},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use num::NumCast;
use thiserror::Error;

/// POSIX time of the EPICS epoch, 1990-01-01 00:00:00 UTC
pub const EPICS_EPOCH: u64 = 631152000;

/// Basic field types, as reported for a connected channel
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    String = 0,
    Int = 1,
    Float = 2,
    Enum = 3,
    Char = 4,
    Long = 5,
    Double = 6,
}

impl TryFrom<u16> for FieldType {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            x if x == Self::String as u16 => Ok(Self::String),
            x if x == Self::Int as u16 => Ok(Self::Int),
            x if x == Self::Float as u16 => Ok(Self::Float),
            x if x == Self::Enum as u16 => Ok(Self::Enum),
            x if x == Self::Char as u16 => Ok(Self::Char),
            x if x == Self::Long as u16 => Ok(Self::Long),
            x if x == Self::Double as u16 => Ok(Self::Double),
            _ => Err(()),
        }
    }
}

impl FromStr for FieldType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        let name = upper.strip_prefix("DBF_").unwrap_or(&upper);
        Ok(match name {
            "STRING" => Self::String,
            "INT" | "SHORT" => Self::Int,
            "FLOAT" => Self::Float,
            "ENUM" => Self::Enum,
            "CHAR" => Self::Char,
            "LONG" => Self::Long,
            "DOUBLE" => Self::Double,
            _ => return Err(()),
        })
    }
}

/// Alarm severity of a record
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    NoAlarm = 0,
    Minor = 1,
    Major = 2,
    Invalid = 3,
}

impl TryFrom<u16> for Severity {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::NoAlarm,
            1 => Self::Minor,
            2 => Self::Major,
            3 => Self::Invalid,
            _ => return Err(()),
        })
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoAlarm => "NO_ALARM",
            Self::Minor => "MINOR",
            Self::Major => "MAJOR",
            Self::Invalid => "INVALID",
        })
    }
}

/// Alarm condition of a record, as in the EPICS `epicsAlarmCondition` table
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum AlarmStatus {
    #[default]
    NoAlarm = 0,
    Read = 1,
    Write = 2,
    HiHi = 3,
    High = 4,
    LoLo = 5,
    Low = 6,
    State = 7,
    Cos = 8,
    Comm = 9,
    Timeout = 10,
    HwLimit = 11,
    Calc = 12,
    Scan = 13,
    Link = 14,
    Soft = 15,
    BadSub = 16,
    Udf = 17,
    Disable = 18,
    Simm = 19,
    ReadAccess = 20,
    WriteAccess = 21,
}

impl AlarmStatus {
    const ALL: [AlarmStatus; 22] = [
        Self::NoAlarm,
        Self::Read,
        Self::Write,
        Self::HiHi,
        Self::High,
        Self::LoLo,
        Self::Low,
        Self::State,
        Self::Cos,
        Self::Comm,
        Self::Timeout,
        Self::HwLimit,
        Self::Calc,
        Self::Scan,
        Self::Link,
        Self::Soft,
        Self::BadSub,
        Self::Udf,
        Self::Disable,
        Self::Simm,
        Self::ReadAccess,
        Self::WriteAccess,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NoAlarm => "NO_ALARM",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::HiHi => "HIHI",
            Self::High => "HIGH",
            Self::LoLo => "LOLO",
            Self::Low => "LOW",
            Self::State => "STATE",
            Self::Cos => "COS",
            Self::Comm => "COMM",
            Self::Timeout => "TIMEOUT",
            Self::HwLimit => "HWLIMIT",
            Self::Calc => "CALC",
            Self::Scan => "SCAN",
            Self::Link => "LINK",
            Self::Soft => "SOFT",
            Self::BadSub => "BAD_SUB",
            Self::Udf => "UDF",
            Self::Disable => "DISABLE",
            Self::Simm => "SIMM",
            Self::ReadAccess => "READ_ACCESS",
            Self::WriteAccess => "WRITE_ACCESS",
        }
    }
}

impl TryFrom<u16> for AlarmStatus {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL.get(value as usize).copied().ok_or(())
    }
}

impl Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Access rights the server grants on a channel
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct AccessRights: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Change categories that trigger a subscription update
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Events: u16 {
        const VALUE = 0x01;
        const ARCHIVE = 0x02;
        const ALARM = 0x04;
        const PROPERTY = 0x08;
        const ALL = Self::VALUE.bits()
            | Self::ARCHIVE.bits()
            | Self::ALARM.bits()
            | Self::PROPERTY.bits();
    }
}

impl Default for Events {
    /// Value and alarm changes, the usual `camonitor` mask
    fn default() -> Self {
        Events::VALUE | Events::ALARM
    }
}

/// A string element, either still raw from the wire or decoded
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Text {
    Str(String),
    Raw(Vec<u8>),
}

impl Text {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Text::Str(s) => s.as_bytes(),
            Text::Raw(b) => b,
        }
    }
}

impl Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Text::Str(s) => f.write_str(s),
            Text::Raw(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl From<&str> for Text {
    fn from(value: &str) -> Self {
        Text::Str(value.to_owned())
    }
}
impl From<String> for Text {
    fn from(value: String) -> Self {
        Text::Str(value)
    }
}
impl From<Vec<u8>> for Text {
    fn from(value: Vec<u8>) -> Self {
        Text::Raw(value)
    }
}
impl From<&[u8]> for Text {
    fn from(value: &[u8]) -> Self {
        Text::Raw(value.to_vec())
    }
}

/// A record value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Enum(u16),
    String(Vec<Text>),
    Char(Vec<i8>),
    Int(Vec<i16>),
    Long(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

/// Failure to convert a [`Value`] to another field type
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConvertError {
    #[error("No reasonable conversion from {from:?} to {to:?}")]
    NoConvert { from: FieldType, to: FieldType },
    #[error("Could not parse '{0}' as a number")]
    CannotParse(String),
}

impl Value {
    pub fn get_count(&self) -> usize {
        match self {
            Value::Enum(_) => 1,
            Value::String(val) => val.len(),
            Value::Char(val) => val.len(),
            Value::Int(val) => val.len(),
            Value::Long(val) => val.len(),
            Value::Float(val) => val.len(),
            Value::Double(val) => val.len(),
        }
    }

    pub fn get_type(&self) -> FieldType {
        match self {
            Value::Enum(_) => FieldType::Enum,
            Value::String(_) => FieldType::String,
            Value::Char(_) => FieldType::Char,
            Value::Int(_) => FieldType::Int,
            Value::Long(_) => FieldType::Long,
            Value::Float(_) => FieldType::Float,
            Value::Double(_) => FieldType::Double,
        }
    }

    /// Cut an array value down to at most `count` elements. Zero means "all".
    pub fn truncate(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        match self {
            Value::Enum(_) => (),
            Value::String(val) => val.truncate(count),
            Value::Char(val) => val.truncate(count),
            Value::Int(val) => val.truncate(count),
            Value::Long(val) => val.truncate(count),
            Value::Float(val) => val.truncate(count),
            Value::Double(val) => val.truncate(count),
        }
    }

    /// The first element as a float, if this is a numeric or enum value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Enum(v) => Some(*v as f64),
            Value::String(_) => None,
            Value::Char(v) => v.first().map(|v| *v as f64),
            Value::Int(v) => v.first().map(|v| *v as f64),
            Value::Long(v) => v.first().map(|v| *v as f64),
            Value::Float(v) => v.first().map(|v| *v as f64),
            Value::Double(v) => v.first().copied(),
        }
    }

    /// Render each element the way a server formats `DBR_STRING` replies
    pub fn to_strings(&self, precision: Option<i16>) -> Vec<String> {
        fn fmt_float(v: f64, precision: Option<i16>) -> String {
            match precision {
                Some(p) if p >= 0 => format!("{:.*}", p as usize, v),
                _ => format!("{v}"),
            }
        }
        match self {
            Value::Enum(v) => vec![v.to_string()],
            Value::String(v) => v.iter().map(|t| t.to_string()).collect(),
            Value::Char(v) => v.iter().map(|v| v.to_string()).collect(),
            Value::Int(v) => v.iter().map(|v| v.to_string()).collect(),
            Value::Long(v) => v.iter().map(|v| v.to_string()).collect(),
            Value::Float(v) => v
                .iter()
                .map(|v| fmt_float(*v as f64, precision))
                .collect(),
            Value::Double(v) => v.iter().map(|v| fmt_float(*v, precision)).collect(),
        }
    }

    /// Parse a [`Value::String`] into a numeric field type
    ///
    /// This is how string writes (e.g. from `caput`) end up in numeric records.
    /// Converting String to String copies without parsing.
    pub fn parse_into(&self, field_type: FieldType) -> Result<Value, ConvertError> {
        fn parse_all<T: FromStr>(val: &[Text]) -> Result<Vec<T>, ConvertError> {
            val.iter()
                .map(|t| {
                    let s = t.to_string();
                    s.trim()
                        .parse()
                        .map_err(|_| ConvertError::CannotParse(s.clone()))
                })
                .collect()
        }
        let Value::String(val) = self else {
            return self.convert_to(field_type);
        };
        Ok(match field_type {
            FieldType::String => self.clone(),
            FieldType::Enum => match parse_all::<u16>(val)?.as_slice() {
                [index] => Value::Enum(*index),
                _ => {
                    return Err(ConvertError::NoConvert {
                        from: FieldType::String,
                        to: FieldType::Enum,
                    });
                }
            },
            FieldType::Char => Value::Char(parse_all(val)?),
            FieldType::Int => Value::Int(parse_all(val)?),
            FieldType::Long => Value::Long(parse_all(val)?),
            FieldType::Float => Value::Float(parse_all(val)?),
            FieldType::Double => Value::Double(parse_all(val)?),
        })
    }

    /// Convert between numeric representations, failing if any element does not fit
    pub fn convert_to(&self, field_type: FieldType) -> Result<Value, ConvertError> {
        fn cast_all<T: Copy + NumCast, U: NumCast>(
            from: &[T],
            err: ConvertError,
        ) -> Result<Vec<U>, ConvertError> {
            from.iter()
                .map(|n| NumCast::from(*n).ok_or_else(|| err.clone()))
                .collect()
        }
        if self.get_type() == field_type {
            return Ok(self.clone());
        }
        let err = ConvertError::NoConvert {
            from: self.get_type(),
            to: field_type,
        };
        macro_rules! numeric_to {
            ($variant:ident) => {
                match self {
                    Value::Enum(v) => Value::$variant(cast_all(&[*v], err)?),
                    Value::Char(v) => Value::$variant(cast_all(v, err)?),
                    Value::Int(v) => Value::$variant(cast_all(v, err)?),
                    Value::Long(v) => Value::$variant(cast_all(v, err)?),
                    Value::Float(v) => Value::$variant(cast_all(v, err)?),
                    Value::Double(v) => Value::$variant(cast_all(v, err)?),
                    Value::String(_) => return self.parse_into(field_type),
                }
            };
        }
        Ok(match field_type {
            FieldType::Char => numeric_to!(Char),
            FieldType::Int => numeric_to!(Int),
            FieldType::Long => numeric_to!(Long),
            FieldType::Float => numeric_to!(Float),
            FieldType::Double => numeric_to!(Double),
            FieldType::String => Value::String(
                self.to_strings(None).into_iter().map(Text::Str).collect(),
            ),
            FieldType::Enum => match self.as_f64() {
                Some(v) if self.get_count() == 1 && v >= 0.0 && v.fract() == 0.0 => {
                    Value::Enum(NumCast::from(v).ok_or(err)?)
                }
                _ => return Err(err),
            },
        })
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_strings(None).join(" "))
    }
}

/// Implement conversions from a native type (and arrays of it) into a Value kind
macro_rules! impl_value_conversions_from {
    ($variant:ident, $typ:ty) => {
        impl From<Vec<$typ>> for Value {
            fn from(value: Vec<$typ>) -> Self {
                Value::$variant(value)
            }
        }
        impl From<$typ> for Value {
            fn from(value: $typ) -> Self {
                Value::$variant(vec![value])
            }
        }
    };
}
impl_value_conversions_from!(Char, i8);
impl_value_conversions_from!(Int, i16);
impl_value_conversions_from!(Long, i32);
impl_value_conversions_from!(Float, f32);
impl_value_conversions_from!(Double, f64);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(vec![value.into()])
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(vec![value.into()])
    }
}
impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::String(vec![Text::Raw(value)])
    }
}
impl From<Text> for Value {
    fn from(value: Text) -> Self {
        Value::String(vec![value])
    }
}

/// A lower/upper pair of limits
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Limits {
    pub lower: f64,
    pub upper: f64,
}

impl Limits {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }
}

impl From<(f64, f64)> for Limits {
    fn from((lower, upper): (f64, f64)) -> Self {
        Self { lower, upper }
    }
}

/// Wire timestamp: seconds and nanoseconds past the EPICS epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpicsTime {
    pub secs: u32,
    pub nanos: u32,
}

impl EpicsTime {
    pub fn new(secs: u32, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }

    /// Convert to an absolute UTC timestamp
    ///
    /// Returns `None` only for nanosecond fields outside of the valid range.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(EPICS_EPOCH as i64 + self.secs as i64, self.nanos)
    }
}

impl From<SystemTime> for EpicsTime {
    /// Times before the EPICS epoch clamp to the epoch itself
    fn from(value: SystemTime) -> Self {
        let unix = value.duration_since(UNIX_EPOCH).unwrap_or_default();
        let since_epoch = unix.saturating_sub(Duration::from_secs(EPICS_EPOCH));
        EpicsTime {
            secs: since_epoch.as_secs().min(u32::MAX as u64) as u32,
            nanos: since_epoch.subsec_nanos(),
        }
    }
}

/// The attributes delivered by one engine get or monitor callback
///
/// Strings are still raw bytes here, and the timestamp is still relative to the
/// EPICS epoch; [`crate::values::Values`] holds the decoded form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dbr {
    pub timestamp: Option<EpicsTime>,
    pub status: Option<AlarmStatus>,
    pub severity: Option<Severity>,
    pub value: Option<Value>,
    pub precision: Option<i16>,
    pub unit: Option<Vec<u8>>,
    pub enum_strings: Option<Vec<Vec<u8>>>,
    pub display_limits: Option<Limits>,
    pub control_limits: Option<Limits>,
    pub warning_limits: Option<Limits>,
    pub alarm_limits: Option<Limits>,
}

impl Dbr {
    /// Just a value, as for a plain `DBR_<type>` reply
    pub fn basic(value: impl Into<Value>) -> Self {
        Dbr {
            value: Some(value.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_ids() {
        assert_eq!(FieldType::try_from(3u16), Ok(FieldType::Enum));
        assert_eq!(FieldType::try_from(6u16), Ok(FieldType::Double));
        assert!(FieldType::try_from(7u16).is_err());
        assert_eq!("DBF_SHORT".parse(), Ok(FieldType::Int));
        assert_eq!("double".parse(), Ok(FieldType::Double));
        assert!("DBF_NOTATYPE".parse::<FieldType>().is_err());
    }

    #[test]
    fn alarm_tables() {
        assert_eq!(AlarmStatus::try_from(17u16), Ok(AlarmStatus::Udf));
        assert_eq!(AlarmStatus::try_from(21u16), Ok(AlarmStatus::WriteAccess));
        assert!(AlarmStatus::try_from(22u16).is_err());
        assert_eq!(AlarmStatus::HiHi.to_string(), "HIHI");
        assert_eq!(Severity::try_from(3u16), Ok(Severity::Invalid));
        assert!(Severity::Major > Severity::Minor);
    }

    #[test]
    fn numeric_conversion() {
        let v: Value = vec![500i32, 12].into();
        assert_eq!(v.convert_to(FieldType::Int), Ok(Value::Int(vec![500, 12])));
        assert!(v.convert_to(FieldType::Char).is_err());
        assert_eq!(
            Value::Float(vec![455.9]).convert_to(FieldType::Long),
            Ok(Value::Long(vec![455]))
        );
        assert_eq!(Value::Long(vec![2]).convert_to(FieldType::Enum), Ok(Value::Enum(2)));
        assert!(Value::Double(vec![-1.0]).convert_to(FieldType::Enum).is_err());
    }

    #[test]
    fn parse_strings() {
        let v: Value = " 42 ".into();
        assert_eq!(v.parse_into(FieldType::Double), Ok(Value::Double(vec![42.0])));
        assert_eq!(v.parse_into(FieldType::Enum), Ok(Value::Enum(42)));
        let raw: Value = b"7".to_vec().into();
        assert_eq!(raw.parse_into(FieldType::Int), Ok(Value::Int(vec![7])));
        assert_eq!(
            Value::from("nope").parse_into(FieldType::Long),
            Err(ConvertError::CannotParse("nope".to_string()))
        );
    }

    #[test]
    fn formatting() {
        assert_eq!(
            Value::Double(vec![1.23456]).to_strings(Some(2)),
            vec!["1.23".to_string()]
        );
        assert_eq!(Value::Int(vec![1, 2, 3]).to_string(), "1 2 3");
        let mut v = Value::Long(vec![1, 2, 3]);
        v.truncate(0);
        assert_eq!(v.get_count(), 3);
        v.truncate(2);
        assert_eq!(v, Value::Long(vec![1, 2]));
    }

    #[test]
    fn epics_time() {
        let t = EpicsTime::new(0, 0);
        assert_eq!(
            t.to_utc().unwrap().to_rfc3339(),
            "1990-01-01T00:00:00+00:00"
        );
        let now = SystemTime::UNIX_EPOCH + Duration::new(1741731609, 500);
        let t: EpicsTime = now.into();
        assert_eq!(t.secs, 1741731609 - 631152000);
        assert_eq!(t.nanos, 500);
        assert_eq!(t.to_utc().unwrap().timestamp(), 1741731609);
        let before: EpicsTime = SystemTime::UNIX_EPOCH.into();
        assert_eq!(before, EpicsTime::default());
    }

    #[test]
    fn event_masks() {
        assert_eq!(Events::default(), Events::VALUE | Events::ALARM);
        assert!(Events::ALL.contains(Events::PROPERTY));
        assert!(AccessRights::READ_WRITE.contains(AccessRights::WRITE));
    }
}
