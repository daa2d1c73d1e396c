//! Decoded PV attributes, and the string/timestamp normalization that produces them.
//!
//! Engines hand over a [`Dbr`] with strings as raw bytes and timestamps relative to
//! the EPICS epoch. [`decode`] turns that into [`Values`], using the [`Charset`]
//! configured on the PV (or keeping raw bytes if there is none).

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::dbr::{AlarmStatus, Dbr, Limits, Severity, Text, Value};

/// Character set used to decode and encode string attributes
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Charset {
    #[default]
    Utf8,
    /// ISO-8859-1: every byte is the code point of the same value
    Latin1,
    Ascii,
}

/// A string that cannot be represented in the requested charset
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("'{text}' cannot be encoded as {charset:?}")]
pub struct EncodeError {
    pub charset: Charset,
    pub text: String,
}

impl Charset {
    /// Decode raw bytes, replacing anything invalid
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|b| *b as char).collect(),
            Charset::Ascii => bytes
                .iter()
                .map(|b| {
                    if b.is_ascii() {
                        *b as char
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>, EncodeError> {
        let error = || EncodeError {
            charset: *self,
            text: text.to_owned(),
        };
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| error()))
                .collect(),
            Charset::Ascii => {
                if text.is_ascii() {
                    Ok(text.as_bytes().to_vec())
                } else {
                    Err(error())
                }
            }
        }
    }

    fn decode_text(&self, text: Text) -> Text {
        match text {
            Text::Raw(bytes) => Text::Str(self.decode(&bytes)),
            decoded => decoded,
        }
    }

    fn encode_text(&self, text: Text) -> Result<Text, EncodeError> {
        match text {
            Text::Str(s) => Ok(Text::Raw(self.encode(&s)?)),
            raw => Ok(raw),
        }
    }
}

/// The decoded attributes of a PV
///
/// Used both for the cached snapshot of a PV and for the delta delivered by a
/// single get or monitor callback. Attributes the engine never supplied stay
/// `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Values {
    pub timestamp: Option<DateTime<Utc>>,
    pub status: Option<AlarmStatus>,
    pub severity: Option<Severity>,
    pub value: Option<Value>,
    pub precision: Option<i16>,
    pub unit: Option<Text>,
    pub enum_strings: Option<Vec<Text>>,
    pub display_limits: Option<Limits>,
    pub control_limits: Option<Limits>,
    pub warning_limits: Option<Limits>,
    pub alarm_limits: Option<Limits>,
}

impl Values {
    /// Overwrite every attribute present in `delta`, leaving the rest untouched
    pub fn merge(&mut self, delta: &Values) {
        fn take<T: Clone>(into: &mut Option<T>, from: &Option<T>) {
            if let Some(v) = from {
                *into = Some(v.clone());
            }
        }
        take(&mut self.timestamp, &delta.timestamp);
        take(&mut self.status, &delta.status);
        take(&mut self.severity, &delta.severity);
        take(&mut self.value, &delta.value);
        take(&mut self.precision, &delta.precision);
        take(&mut self.unit, &delta.unit);
        take(&mut self.enum_strings, &delta.enum_strings);
        take(&mut self.display_limits, &delta.display_limits);
        take(&mut self.control_limits, &delta.control_limits);
        take(&mut self.warning_limits, &delta.warning_limits);
        take(&mut self.alarm_limits, &delta.alarm_limits);
    }

    pub fn is_empty(&self) -> bool {
        *self == Values::default()
    }
}

/// Normalize the attributes of an engine callback
///
/// With a charset, every raw string (values, units and enumeration strings) is
/// decoded. With `None` they are kept as [`Text::Raw`]. Timestamps are always
/// converted to UTC.
pub fn decode(dbr: Dbr, charset: Option<Charset>) -> Values {
    let text = |bytes: Vec<u8>| match charset {
        Some(charset) => Text::Str(charset.decode(&bytes)),
        None => Text::Raw(bytes),
    };
    let value = match (dbr.value, charset) {
        (Some(Value::String(items)), Some(charset)) => Some(Value::String(
            items.into_iter().map(|t| charset.decode_text(t)).collect(),
        )),
        (value, _) => value,
    };
    let timestamp = dbr.timestamp.and_then(|t| {
        let utc = t.to_utc();
        if utc.is_none() {
            warn!("Dropping out-of-range timestamp {t:?}");
        }
        utc
    });
    Values {
        timestamp,
        status: dbr.status,
        severity: dbr.severity,
        value,
        precision: dbr.precision,
        unit: dbr.unit.map(text),
        enum_strings: dbr
            .enum_strings
            .map(|strings| strings.into_iter().map(text).collect()),
        display_limits: dbr.display_limits,
        control_limits: dbr.control_limits,
        warning_limits: dbr.warning_limits,
        alarm_limits: dbr.alarm_limits,
    }
}

/// Errors preparing a value for transmission
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrepareError {
    #[error("String values need a charset to be written")]
    NoCharset,
    #[error(transparent)]
    Unencodable(#[from] EncodeError),
}

/// Encode any decoded strings in a value ready for the engine
///
/// Raw byte strings pass through untouched, so they can be written even without
/// a charset.
pub fn encode(value: Value, charset: Option<Charset>) -> Result<Value, PrepareError> {
    let Value::String(items) = value else {
        return Ok(value);
    };
    let needs_charset = items.iter().any(|t| matches!(t, Text::Str(_)));
    match charset {
        None if needs_charset => Err(PrepareError::NoCharset),
        None => Ok(Value::String(items)),
        Some(charset) => Ok(Value::String(
            items
                .into_iter()
                .map(|t| charset.encode_text(t))
                .collect::<Result<_, _>>()?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbr::EpicsTime;

    fn raw_reply() -> Dbr {
        Dbr {
            timestamp: Some(EpicsTime::new(10, 5)),
            severity: Some(Severity::Minor),
            value: Some(Value::String(vec![Text::Raw(b"caf\xc3\xa9".to_vec())])),
            unit: Some(b"mm".to_vec()),
            enum_strings: Some(vec![b"Off".to_vec(), b"On".to_vec()]),
            ..Default::default()
        }
    }

    #[test]
    fn decode_with_charset() {
        let values = decode(raw_reply(), Some(Charset::Utf8));
        assert_eq!(values.value, Some("café".into()));
        assert_eq!(values.unit, Some(Text::Str("mm".into())));
        assert_eq!(
            values.enum_strings,
            Some(vec![Text::Str("Off".into()), Text::Str("On".into())])
        );
        let ts = values.timestamp.unwrap();
        assert_eq!(ts.timestamp(), 631152010);
        assert_eq!(ts.timestamp_subsec_nanos(), 5);
        assert_eq!(values.severity, Some(Severity::Minor));
        assert_eq!(values.status, None);
    }

    #[test]
    fn decode_raw_mode_keeps_bytes() {
        let values = decode(raw_reply(), None);
        assert_eq!(
            values.value,
            Some(Value::String(vec![Text::Raw(b"caf\xc3\xa9".to_vec())]))
        );
        assert_eq!(values.unit, Some(Text::Raw(b"mm".to_vec())));
    }

    #[test]
    fn latin1_round_trip() {
        let decoded = decode(raw_reply(), Some(Charset::Latin1));
        assert_eq!(decoded.value, Some("cafÃ©".into()));
        assert_eq!(Charset::Latin1.encode("café"), Ok(b"caf\xe9".to_vec()));
        assert!(Charset::Latin1.encode("€").is_err());
        assert!(Charset::Ascii.encode("café").is_err());
        assert_eq!(Charset::Ascii.decode(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn merge_only_overwrites_present_keys() {
        let mut snapshot = Values {
            value: Some(1.0.into()),
            unit: Some("V".into()),
            ..Default::default()
        };
        snapshot.merge(&Values {
            value: Some(2.0.into()),
            ..Default::default()
        });
        assert_eq!(snapshot.value, Some(2.0.into()));
        assert_eq!(snapshot.unit, Some("V".into()));
        assert!(!snapshot.is_empty());
        assert!(Values::default().is_empty());
    }

    #[test]
    fn encode_strings_for_put() {
        assert_eq!(
            encode("42".into(), Some(Charset::Utf8)),
            Ok(Value::String(vec![Text::Raw(b"42".to_vec())]))
        );
        assert_eq!(encode("42".into(), None), Err(PrepareError::NoCharset));
        assert_eq!(
            encode(b"42".to_vec().into(), None),
            Ok(Value::String(vec![Text::Raw(b"42".to_vec())]))
        );
        assert_eq!(encode(3.5.into(), None), Ok(Value::Double(vec![3.5])));
        assert!(matches!(
            encode("é".into(), Some(Charset::Ascii)),
            Err(PrepareError::Unencodable(_))
        ));
    }
}
