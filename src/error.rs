/*!
Error types for every stage of handling a recurrence.

Each error is a plain data type so that callers (such as a form or UI
adapter) can render localized messages without parsing strings. The
`Display` impls are meant for humans reading a terminal.
*/

use crate::rule::{ByWeekday, Frequency};

/// An error that occurs when parsing recurrence text.
///
/// Line numbers are 1-indexed and refer to the physical line in the input
/// on which the problem was found.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct FormatError {
    pub line: usize,
    pub reason: FormatReason,
}

/// The reason a line of recurrence text could not be parsed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FormatReason {
    #[error("expected `<directive>:<value>`, but found no `:`")]
    MissingColon,
    #[error("unrecognized directive `{0}`")]
    UnknownDirective(String),
    #[error("directive `{0}` may only appear once")]
    DuplicateDirective(&'static str),
    #[error("expected `<key>=<value>` in rule, but found `{0}`")]
    MalformedPair(String),
    #[error("unrecognized rule key `{0}`")]
    UnknownKey(String),
    #[error("rule key `{0}` may only appear once")]
    DuplicateKey(String),
    #[error("rule is missing required `FREQ`")]
    MissingFrequency,
    #[error("unrecognized frequency `{0}`")]
    UnknownFrequency(String),
    #[error("failed to parse `{value}` as an integer for `{key}`")]
    InvalidInteger { key: &'static str, value: String },
    #[error("unrecognized weekday `{0}`")]
    InvalidWeekday(String),
    #[error("empty value for `{key}`")]
    EmptyValue { key: &'static str },
    #[error(
        "invalid timestamp `{0}` (expected `YYYYMMDD`, \
         `YYYYMMDDTHHMMSS` or `YYYYMMDDTHHMMSSZ`)"
    )]
    InvalidTimestamp(String),
    #[error("invalid rule: {0}")]
    InvalidRule(#[from] ConstructionError),
}

impl FormatReason {
    /// Returns a stable key identifying this error, suitable for looking up
    /// a localized message.
    pub fn key(&self) -> &'static str {
        match *self {
            FormatReason::MissingColon => "missing_colon",
            FormatReason::UnknownDirective(_) => "unknown_directive",
            FormatReason::DuplicateDirective(_) => "duplicate_directive",
            FormatReason::MalformedPair(_) => "malformed_pair",
            FormatReason::UnknownKey(_) => "unknown_key",
            FormatReason::DuplicateKey(_) => "duplicate_key",
            FormatReason::MissingFrequency => "missing_frequency",
            FormatReason::UnknownFrequency(_) => "unknown_frequency",
            FormatReason::InvalidInteger { .. } => "invalid_integer",
            FormatReason::InvalidWeekday(_) => "invalid_weekday",
            FormatReason::EmptyValue { .. } => "empty_value",
            FormatReason::InvalidTimestamp(_) => "invalid_timestamp",
            FormatReason::InvalidRule(_) => "invalid_rule",
        }
    }
}

/// An error that occurs when building a [`Rule`](crate::Rule) that violates
/// one of its invariants.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConstructionError {
    #[error(
        "interval value of `{0}` is invalid \
         (interval must be greater than or equal to 1)"
    )]
    Interval(i32),
    #[error("could not convert {freq} interval of `{interval}` to time span")]
    IntervalSpan { freq: Frequency, interval: i32 },
    #[error("invalid '{part}' value `{value}` (values must be in range {range})")]
    OutOfRange { part: ByPart, value: i64, range: &'static str },
    #[error(
        "numbered weekday `{0}` is only allowed at \
         yearly or monthly frequencies"
    )]
    NumberedWeekday(ByWeekday),
    #[error(
        "numbered weekday `{0}` is only allowed at yearly \
         frequency when 'by week' is not used"
    )]
    NumberedWeekdayWithWeek(ByWeekday),
    #[error(
        "invalid numbered 'by week day' value `{weekday}` \
         (values must be in range {range})"
    )]
    NumberedWeekdayRange { weekday: ByWeekday, range: &'static str },
    #[error("'{part}' cannot be used with {freq} frequency")]
    FrequencyConflict { part: ByPart, freq: Frequency },
    #[error(
        "when 'by set position' is used, at least one other \
         'by' rule must be specified, but all are empty"
    )]
    SetPositionAlone,
    #[error("'count' and 'until' cannot both be set on the same rule")]
    CountAndUntil,
    #[error("'{part}' was declared but has no values")]
    EmptyFilter { part: ByPart },
}

/// The filters ("by" rules) that can be attached to a recurrence rule.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ByPart {
    Month,
    Week,
    YearDay,
    MonthDay,
    WeekDay,
    Hour,
    Minute,
    Second,
    SetPosition,
}

impl ByPart {
    /// Returns the key used for this filter in the text format.
    pub fn key(&self) -> &'static str {
        match *self {
            ByPart::Month => "BYMONTH",
            ByPart::Week => "BYWEEKNO",
            ByPart::YearDay => "BYYEARDAY",
            ByPart::MonthDay => "BYMONTHDAY",
            ByPart::WeekDay => "BYDAY",
            ByPart::Hour => "BYHOUR",
            ByPart::Minute => "BYMINUTE",
            ByPart::Second => "BYSECOND",
            ByPart::SetPosition => "BYSETPOS",
        }
    }
}

impl std::fmt::Display for ByPart {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let label = match *self {
            ByPart::Month => "by month",
            ByPart::Week => "by week",
            ByPart::YearDay => "by day of the year",
            ByPart::MonthDay => "by day of the month",
            ByPart::WeekDay => "by week day",
            ByPart::Hour => "by hour",
            ByPart::Minute => "by minute",
            ByPart::Second => "by second",
            ByPart::SetPosition => "by set position",
        };
        f.write_str(label)
    }
}

/// An error that occurs when a well formed recurrence violates a
/// [`Policy`](crate::Policy).
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{collection} exceeded, the limit is {limit}")]
    LimitExceeded { collection: Collection, limit: usize },
    #[error("invalid frequency `{frequency}`")]
    DisallowedFrequency { frequency: Frequency },
}

impl ValidationError {
    /// Returns a stable key identifying this error, suitable for looking up
    /// a localized message.
    pub fn key(&self) -> &'static str {
        match *self {
            ValidationError::LimitExceeded { collection, .. } => {
                match collection {
                    Collection::Rrules => "max_rrules_exceeded",
                    Collection::Exrules => "max_exrules_exceeded",
                    Collection::Rdates => "max_rdates_exceeded",
                    Collection::Exdates => "max_exdates_exceeded",
                }
            }
            ValidationError::DisallowedFrequency { .. } => "invalid_frequency",
        }
    }
}

/// One of the four limited collections in a recurrence.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Collection {
    Rrules,
    Exrules,
    Rdates,
    Exdates,
}

impl Collection {
    /// The name of this collection as used in structured error reports.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Collection::Rrules => "rrules",
            Collection::Exrules => "exrules",
            Collection::Rdates => "rdates",
            Collection::Exdates => "exdates",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let label = match *self {
            Collection::Rrules => "max rules",
            Collection::Exrules => "max exclusion rules",
            Collection::Rdates => "max dates",
            Collection::Exdates => "max exclusion dates",
        };
        f.write_str(label)
    }
}

/// An error returned when occurrences are requested for a recurrence that
/// has rules but no `DTSTART` to anchor them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("recurrence has rules but no DTSTART to anchor them")]
pub struct MissingAnchor;

/// An error returned when a [`Window`](crate::Window) would end before it
/// starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("window start `{start}` is after its end `{end}`")]
pub struct InvalidWindow {
    pub start: jiff::civil::DateTime,
    pub end: jiff::civil::DateTime,
}
