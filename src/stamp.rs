/*!
The fixed width timestamp token used throughout the recurrence text format.

A stamp is one of:

* `YYYYMMDD` (a date, meaning midnight),
* `YYYYMMDDTHHMMSS` (a floating civil datetime), or
* `YYYYMMDDTHHMMSSZ` (a civil datetime marked as UTC).

The textual form is remembered so that serializing a parsed stamp gives back
exactly what was read. Comparisons, equality and hashing only ever look at
the civil datetime and the form together, which keeps `parse(serialize(m))`
structurally equal to `m`.
*/

use jiff::civil::{Date, DateTime, Time};

use crate::error::FormatReason;

/// The textual form of a [`Stamp`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StampKind {
    /// `YYYYMMDD`.
    Date,
    /// `YYYYMMDDTHHMMSS`.
    #[default]
    Floating,
    /// `YYYYMMDDTHHMMSSZ`. The `Z` is preserved but never converted.
    Utc,
}

/// A point on the civil calendar with the form it was written in.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Stamp {
    // Field order matters for the derived `Ord`: the datetime comes first.
    dt: DateTime,
    kind: StampKind,
}

impl Stamp {
    /// Create a floating stamp from a civil datetime.
    pub fn new(dt: DateTime) -> Stamp {
        Stamp { dt, kind: StampKind::Floating }
    }

    /// Create a date-only stamp. Its datetime is midnight.
    pub fn date(date: Date) -> Stamp {
        Stamp { dt: date.to_datetime(Time::midnight()), kind: StampKind::Date }
    }

    /// Create a stamp marked as UTC.
    pub fn utc(dt: DateTime) -> Stamp {
        Stamp { dt, kind: StampKind::Utc }
    }

    /// Returns the civil datetime of this stamp.
    pub fn datetime(&self) -> DateTime {
        self.dt
    }

    /// Returns the form this stamp is written in.
    pub fn kind(&self) -> StampKind {
        self.kind
    }
}

impl From<DateTime> for Stamp {
    fn from(dt: DateTime) -> Stamp {
        Stamp::new(dt)
    }
}

impl From<Date> for Stamp {
    fn from(date: Date) -> Stamp {
        Stamp::date(date)
    }
}

impl std::str::FromStr for Stamp {
    type Err = FormatReason;

    fn from_str(s: &str) -> Result<Stamp, FormatReason> {
        let invalid = || FormatReason::InvalidTimestamp(s.to_string());
        let bytes = s.as_bytes();
        if !bytes.is_ascii() {
            return Err(invalid());
        }
        let kind = match bytes.len() {
            8 => StampKind::Date,
            15 if bytes[8] == b'T' => StampKind::Floating,
            16 if bytes[8] == b'T' && bytes[15] == b'Z' => StampKind::Utc,
            _ => return Err(invalid()),
        };
        let year = digits(&bytes[0..4]).ok_or_else(invalid)?;
        let month = digits(&bytes[4..6]).ok_or_else(invalid)?;
        let day = digits(&bytes[6..8]).ok_or_else(invalid)?;
        let date = Date::new(year, month as i8, day as i8)
            .map_err(|_| invalid())?;
        if kind == StampKind::Date {
            return Ok(Stamp::date(date));
        }
        let hour = digits(&bytes[9..11]).ok_or_else(invalid)?;
        let minute = digits(&bytes[11..13]).ok_or_else(invalid)?;
        let second = digits(&bytes[13..15]).ok_or_else(invalid)?;
        let time = Time::new(hour as i8, minute as i8, second as i8, 0)
            .map_err(|_| invalid())?;
        Ok(Stamp { dt: date.to_datetime(time), kind })
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let dt = self.dt;
        write!(f, "{:04}{:02}{:02}", dt.year(), dt.month(), dt.day())?;
        if self.kind == StampKind::Date {
            return Ok(());
        }
        write!(f, "T{:02}{:02}{:02}", dt.hour(), dt.minute(), dt.second())?;
        if self.kind == StampKind::Utc {
            f.write_str("Z")?;
        }
        Ok(())
    }
}

/// Parses a run of ASCII digits. Widths used here never overflow.
fn digits(bytes: &[u8]) -> Option<i16> {
    let mut n: i16 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n * 10 + i16::from(b - b'0');
    }
    Some(n)
}
