/*!
The line oriented text format for recurrences.

```text
DTSTART:20240101T090000
DTEND:20240101T100000
RRULE:FREQ=WEEKLY;COUNT=10;BYDAY=TU,TH
EXRULE:FREQ=MONTHLY;BYDAY=1TU
RDATE:20240105T090000,20240106T090000
EXDATE:20240111T090000
```

Parsing is forgiving about whitespace, case and blank lines. Serializing is
canonical: directives in a fixed order, rule keys in a fixed order and one
line per explicit date. So `parse(&serialize(&m)) == Ok(m)` always holds,
while `serialize(&parse(text)?)` generally differs from `text`.
*/

use std::collections::BTreeSet;

use crate::{
    error::{FormatError, FormatReason},
    model::Recurrence,
    rule::{ByWeekday, Frequency, Rule, parse_weekday, weekday_token},
    stamp::Stamp,
};

/// Parse recurrence text into a [`Recurrence`].
///
/// Every line is either blank or a `<directive>:<value>` pair. Multiple
/// `RRULE` and `EXRULE` lines are kept in order. Multiple `RDATE` and
/// `EXDATE` lines are merged into one set each.
pub fn parse(text: &str) -> Result<Recurrence, FormatError> {
    let mut rec = Recurrence::default();
    for (i, line) in text.lines().enumerate() {
        parse_line(&mut rec, line)
            .map_err(|reason| FormatError { line: i + 1, reason })?;
    }
    log::debug!(
        "parsed recurrence with {} rrules, {} exrules, {} rdates \
         and {} exdates",
        rec.rrules.len(),
        rec.exrules.len(),
        rec.rdates.len(),
        rec.exdates.len(),
    );
    Ok(rec)
}

/// Serialize a recurrence into its canonical text form.
///
/// Lines are separated by `\n` with no trailing newline. An empty
/// recurrence serializes to an empty string.
pub fn serialize(rec: &Recurrence) -> String {
    rec.to_string()
}

fn parse_line(rec: &mut Recurrence, line: &str) -> Result<(), FormatReason> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    let (name, value) = line.split_once(':').ok_or(FormatReason::MissingColon)?;
    let (name, value) = (name.trim(), value.trim());
    let directive = Directive::ALL
        .into_iter()
        .find(|d| d.as_str().eq_ignore_ascii_case(name))
        .ok_or_else(|| FormatReason::UnknownDirective(name.to_string()))?;
    match directive {
        Directive::Dtstart => {
            let stamp = parse_stamp(directive, value)?;
            if rec.dtstart.replace(stamp).is_some() {
                return Err(FormatReason::DuplicateDirective("DTSTART"));
            }
        }
        Directive::Dtend => {
            let stamp = parse_stamp(directive, value)?;
            if rec.dtend.replace(stamp).is_some() {
                return Err(FormatReason::DuplicateDirective("DTEND"));
            }
        }
        Directive::Rrule => rec.rrules.push(value.parse()?),
        Directive::Exrule => rec.exrules.push(value.parse()?),
        Directive::Rdate => parse_stamps(directive, value, &mut rec.rdates)?,
        Directive::Exdate => parse_stamps(directive, value, &mut rec.exdates)?,
    }
    Ok(())
}

fn parse_stamp(directive: Directive, value: &str) -> Result<Stamp, FormatReason> {
    if value.is_empty() {
        return Err(FormatReason::EmptyValue { key: directive.as_str() });
    }
    value.parse()
}

fn parse_stamps(
    directive: Directive,
    value: &str,
    set: &mut BTreeSet<Stamp>,
) -> Result<(), FormatReason> {
    for item in value.split(',') {
        set.insert(parse_stamp(directive, item.trim())?);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Directive {
    Dtstart,
    Dtend,
    Rrule,
    Exrule,
    Rdate,
    Exdate,
}

impl Directive {
    const ALL: [Directive; 6] = [
        Directive::Dtstart,
        Directive::Dtend,
        Directive::Rrule,
        Directive::Exrule,
        Directive::Rdate,
        Directive::Exdate,
    ];

    fn as_str(&self) -> &'static str {
        match *self {
            Directive::Dtstart => "DTSTART",
            Directive::Dtend => "DTEND",
            Directive::Rrule => "RRULE",
            Directive::Exrule => "EXRULE",
            Directive::Rdate => "RDATE",
            Directive::Exdate => "EXDATE",
        }
    }
}

impl std::str::FromStr for Recurrence {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Recurrence, FormatError> {
        parse(s)
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut lines = Lines { f, first: true };
        if let Some(stamp) = self.dtstart {
            lines.write("DTSTART", stamp)?;
        }
        if let Some(stamp) = self.dtend {
            lines.write("DTEND", stamp)?;
        }
        for rule in self.rrules.iter() {
            lines.write("RRULE", rule)?;
        }
        for rule in self.exrules.iter() {
            lines.write("EXRULE", rule)?;
        }
        for stamp in self.rdates.iter() {
            lines.write("RDATE", stamp)?;
        }
        for stamp in self.exdates.iter() {
            lines.write("EXDATE", stamp)?;
        }
        Ok(())
    }
}

/// Writes `<directive>:<value>` lines separated (not terminated) by `\n`.
struct Lines<'a, 'f> {
    f: &'a mut std::fmt::Formatter<'f>,
    first: bool,
}

impl<'a, 'f> Lines<'a, 'f> {
    fn write(
        &mut self,
        directive: &str,
        value: impl std::fmt::Display,
    ) -> std::fmt::Result {
        if !self.first {
            self.f.write_str("\n")?;
        }
        self.first = false;
        write!(self.f, "{directive}:{value}")
    }
}

/// The keys of a rule, in the order they are serialized.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Key {
    Freq,
    Interval,
    Count,
    Until,
    ByMonth,
    ByWeekNo,
    ByYearDay,
    ByMonthDay,
    ByDay,
    ByHour,
    ByMinute,
    BySecond,
    BySetPos,
    Wkst,
}

impl Key {
    const ALL: [Key; 14] = [
        Key::Freq,
        Key::Interval,
        Key::Count,
        Key::Until,
        Key::ByMonth,
        Key::ByWeekNo,
        Key::ByYearDay,
        Key::ByMonthDay,
        Key::ByDay,
        Key::ByHour,
        Key::ByMinute,
        Key::BySecond,
        Key::BySetPos,
        Key::Wkst,
    ];

    fn as_str(&self) -> &'static str {
        match *self {
            Key::Freq => "FREQ",
            Key::Interval => "INTERVAL",
            Key::Count => "COUNT",
            Key::Until => "UNTIL",
            Key::ByMonth => "BYMONTH",
            Key::ByWeekNo => "BYWEEKNO",
            Key::ByYearDay => "BYYEARDAY",
            Key::ByMonthDay => "BYMONTHDAY",
            Key::ByDay => "BYDAY",
            Key::ByHour => "BYHOUR",
            Key::ByMinute => "BYMINUTE",
            Key::BySecond => "BYSECOND",
            Key::BySetPos => "BYSETPOS",
            Key::Wkst => "WKST",
        }
    }
}

impl std::str::FromStr for Rule {
    type Err = FormatReason;

    /// Parses the value of an `RRULE` or `EXRULE` line, e.g.,
    /// `FREQ=MONTHLY;BYDAY=3FR;COUNT=5`.
    ///
    /// Keys may come in any order and any case, but each at most once.
    fn from_str(s: &str) -> Result<Rule, FormatReason> {
        let mut seen = [false; Key::ALL.len()];
        let mut pairs = vec![];
        for segment in s.split(';').map(str::trim) {
            if segment.is_empty() {
                continue;
            }
            let (name, value) = segment.split_once('=').ok_or_else(|| {
                FormatReason::MalformedPair(segment.to_string())
            })?;
            let (name, value) = (name.trim(), value.trim());
            let (index, key) = Key::ALL
                .into_iter()
                .enumerate()
                .find(|(_, key)| key.as_str().eq_ignore_ascii_case(name))
                .ok_or_else(|| FormatReason::UnknownKey(name.to_string()))?;
            if std::mem::replace(&mut seen[index], true) {
                return Err(FormatReason::DuplicateKey(
                    key.as_str().to_string(),
                ));
            }
            if value.is_empty() {
                return Err(FormatReason::EmptyValue { key: key.as_str() });
            }
            pairs.push((key, value));
        }

        let freq = pairs
            .iter()
            .find(|&&(key, _)| key == Key::Freq)
            .ok_or(FormatReason::MissingFrequency)?
            .1
            .parse::<Frequency>()?;
        let mut builder = Rule::builder(freq);
        for (key, value) in pairs {
            match key {
                Key::Freq => {}
                Key::Interval => {
                    builder.interval(integer(key, value)?);
                }
                Key::Count => {
                    builder.count(integer(key, value)?);
                }
                Key::Until => {
                    builder.until(value.parse::<Stamp>()?);
                }
                Key::ByMonth => {
                    builder.by_month(integers::<i8>(key, value)?);
                }
                Key::ByWeekNo => {
                    builder.by_week(integers::<i8>(key, value)?);
                }
                Key::ByYearDay => {
                    builder.by_year_day(integers::<i16>(key, value)?);
                }
                Key::ByMonthDay => {
                    builder.by_month_day(integers::<i8>(key, value)?);
                }
                Key::ByDay => {
                    let weekdays = list(key, value)?
                        .map(|token| token.parse::<ByWeekday>())
                        .collect::<Result<Vec<_>, _>>()?;
                    builder.by_week_day(weekdays);
                }
                Key::ByHour => {
                    builder.by_hour(integers::<i8>(key, value)?);
                }
                Key::ByMinute => {
                    builder.by_minute(integers::<i8>(key, value)?);
                }
                Key::BySecond => {
                    builder.by_second(integers::<i8>(key, value)?);
                }
                Key::BySetPos => {
                    builder.by_set_position(integers::<i32>(key, value)?);
                }
                Key::Wkst => {
                    let weekday = parse_weekday(value).ok_or_else(|| {
                        FormatReason::InvalidWeekday(value.to_string())
                    })?;
                    builder.week_start(weekday);
                }
            }
        }
        Ok(builder.build()?)
    }
}

fn integer<T: std::str::FromStr>(
    key: Key,
    value: &str,
) -> Result<T, FormatReason> {
    value.parse().map_err(|_| FormatReason::InvalidInteger {
        key: key.as_str(),
        value: value.to_string(),
    })
}

fn integers<T: std::str::FromStr>(
    key: Key,
    value: &str,
) -> Result<Vec<T>, FormatReason> {
    list(key, value)?.map(|item| integer(key, item)).collect()
}

/// Splits a comma separated list, rejecting empty items.
fn list<'v>(
    key: Key,
    value: &'v str,
) -> Result<impl Iterator<Item = &'v str>, FormatReason> {
    let items: Vec<&str> = value.split(',').map(str::trim).collect();
    if items.iter().any(|item| item.is_empty()) {
        return Err(FormatReason::EmptyValue { key: key.as_str() });
    }
    Ok(items.into_iter())
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        fn csv<T: std::fmt::Display>(
            f: &mut std::fmt::Formatter,
            key: Key,
            values: &[T],
        ) -> std::fmt::Result {
            if values.is_empty() {
                return Ok(());
            }
            write!(f, ";{}=", key.as_str())?;
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{value}")?;
            }
            Ok(())
        }

        write!(f, "FREQ={}", self.frequency())?;
        if self.interval() != 1 {
            write!(f, ";INTERVAL={}", self.interval())?;
        }
        if let Some(count) = self.count() {
            write!(f, ";COUNT={count}")?;
        }
        if let Some(until) = self.until() {
            write!(f, ";UNTIL={until}")?;
        }
        csv(f, Key::ByMonth, self.by_month())?;
        csv(f, Key::ByWeekNo, self.by_week())?;
        csv(f, Key::ByYearDay, self.by_year_day())?;
        csv(f, Key::ByMonthDay, self.by_month_day())?;
        csv(f, Key::ByDay, self.by_week_day())?;
        csv(f, Key::ByHour, self.by_hour())?;
        csv(f, Key::ByMinute, self.by_minute())?;
        csv(f, Key::BySecond, self.by_second())?;
        csv(f, Key::BySetPos, self.by_set_position())?;
        if self.week_start() != jiff::civil::Weekday::Monday {
            write!(f, ";WKST={}", weekday_token(self.week_start()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use jiff::civil::Weekday::*;

    use crate::error::{ByPart, ConstructionError};

    use super::*;

    #[test]
    fn parse_every_directive() {
        let rec = parse(
            "\
DTSTART:20240101T090000
DTEND:20240101T100000
RRULE:FREQ=WEEKLY;COUNT=10;BYDAY=TU,TH
EXRULE:FREQ=MONTHLY;BYDAY=1TU
RDATE:20240105T090000,20240106T090000
EXDATE:20240111T090000
",
        )
        .unwrap();
        assert_eq!(rec.dtstart, Some(stamp("20240101T090000")));
        assert_eq!(rec.dtend, Some(stamp("20240101T100000")));
        assert_eq!(rec.rrules.len(), 1);
        assert_eq!(rec.rrules[0].count(), Some(10));
        assert_eq!(rec.exrules[0].frequency(), Frequency::Monthly);
        assert_eq!(rec.rdates.len(), 2);
        assert!(rec.exdates.contains(&stamp("20240111T090000")));
    }

    #[test]
    fn serialize_is_canonical() {
        let rec = parse(
            "
  exdate : 20240111T090000
rdate:20240106T090000 , 20240105T090000

RRULE: byday=TH,TU ; freq=weekly;;wkst=su;INTERVAL=1; count=10
DTSTART:20240101T090000
RDATE:20240105T090000
",
        )
        .unwrap();
        insta::assert_snapshot!(serialize(&rec), @r"
        DTSTART:20240101T090000
        RRULE:FREQ=WEEKLY;COUNT=10;BYDAY=TU,TH;WKST=SU
        RDATE:20240105T090000
        RDATE:20240106T090000
        EXDATE:20240111T090000
        ");
    }

    #[test]
    fn rule_key_order() {
        let rule: Rule = "BYSETPOS=-1;BYSECOND=0;BYMINUTE=30;BYHOUR=9,17;\
                          BYDAY=MO,-1FR;BYMONTHDAY=1;BYYEARDAY=100;\
                          BYMONTH=3;UNTIL=20301231;INTERVAL=2;FREQ=YEARLY"
            .parse()
            .unwrap();
        insta::assert_snapshot!(
            rule,
            @"FREQ=YEARLY;INTERVAL=2;UNTIL=20301231;BYMONTH=3;BYYEARDAY=100;BYMONTHDAY=1;BYDAY=MO,-1FR;BYHOUR=9,17;BYMINUTE=30;BYSECOND=0;BYSETPOS=-1",
        );

        let rule: Rule = "FREQ=YEARLY;BYWEEKNO=20,-1;BYDAY=MO".parse().unwrap();
        insta::assert_snapshot!(
            rule,
            @"FREQ=YEARLY;BYWEEKNO=-1,20;BYDAY=MO",
        );
    }

    #[test]
    fn round_trip() {
        let mut rec = Recurrence::default();
        rec.dtstart = Some(stamp("20240101"));
        rec.dtend = Some(stamp("20240102T000000Z"));
        rec.rrules.push(
            Rule::builder(Frequency::Monthly)
                .interval(3)
                .until(stamp("20251231T235959Z"))
                .by_week_day([(1, Monday), (-1, Friday)])
                .week_start(Sunday)
                .build()
                .unwrap(),
        );
        rec.rrules.push(
            Rule::builder(Frequency::Daily).count(0).build().unwrap(),
        );
        rec.exrules.push(
            Rule::builder(Frequency::Yearly)
                .by_month([1, 12])
                .by_month_day(-1)
                .by_hour(0..=2)
                .by_set_position([1, -1])
                .build()
                .unwrap(),
        );
        rec.rdates.insert(stamp("20240301T120000"));
        rec.exdates.insert(stamp("20240401"));
        rec.exdates.insert(stamp("20240402T000000"));

        let text = serialize(&rec);
        assert_eq!(parse(&text), Ok(rec.clone()));
        assert_eq!(text.parse::<Recurrence>().unwrap().to_string(), text);
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn round_trip_many() {
        let mut models = vec![];
        for freq in Frequency::ALL {
            let mut rec = Recurrence::default();
            rec.dtstart = Some(stamp("20240101T090000"));
            rec.rrules.push(Rule::builder(freq).count(2).build().unwrap());
            models.push(rec);
        }

        let mut exrule_only = Recurrence::default();
        exrule_only.exrules.push(
            Rule::builder(Frequency::Weekly)
                .interval(2)
                .by_week_day([Saturday, Sunday])
                .build()
                .unwrap(),
        );
        models.push(exrule_only);

        let mut dates_only = Recurrence::default();
        dates_only.rdates.insert(stamp("20240101"));
        dates_only.rdates.insert(stamp("20240301"));
        dates_only.exdates.insert(stamp("20240201"));
        models.push(dates_only);

        let mut numbered = Recurrence::default();
        numbered.dtstart = Some(stamp("20240105T140000Z"));
        numbered.rrules.push(
            Rule::builder(Frequency::Monthly)
                .by_week_day([(-1, Friday), (2, Monday)])
                .week_start(Sunday)
                .build()
                .unwrap(),
        );
        models.push(numbered);

        for rec in models {
            let text = serialize(&rec);
            assert_eq!(parse(&text), Ok(rec), "{text}");
        }
    }

    #[test]
    fn empty_input() {
        assert_eq!(parse(""), Ok(Recurrence::default()));
        assert_eq!(parse("\n  \n"), Ok(Recurrence::default()));
        assert_eq!(serialize(&Recurrence::default()), "");
    }

    #[test]
    fn rule_lines_keep_their_order() {
        let rec = parse(
            "RRULE:FREQ=WEEKLY\nRRULE:FREQ=DAILY\nRRULE:FREQ=WEEKLY",
        )
        .unwrap();
        let freqs: Vec<Frequency> =
            rec.rrules.iter().map(|r| r.frequency()).collect();
        assert_eq!(
            freqs,
            vec![Frequency::Weekly, Frequency::Daily, Frequency::Weekly],
        );
    }

    #[test]
    fn unknown_frequency() {
        let err = parse("DTSTART:20240101T090000\nRRULE:FREQ=BIWEEKLY")
            .unwrap_err();
        assert_eq!(
            err,
            FormatError {
                line: 2,
                reason: FormatReason::UnknownFrequency("BIWEEKLY".to_string()),
            },
        );
        insta::assert_snapshot!(
            err,
            @"line 2: unrecognized frequency `BIWEEKLY`",
        );
    }

    #[test]
    fn count_and_until() {
        let err = parse("RRULE:FREQ=DAILY;COUNT=3;UNTIL=20240105").unwrap_err();
        assert_eq!(
            err.reason,
            FormatReason::InvalidRule(ConstructionError::CountAndUntil),
        );
    }

    #[test]
    fn out_of_range_filter() {
        let err = parse("RRULE:FREQ=MONTHLY;BYMONTHDAY=0").unwrap_err();
        assert_eq!(
            err.reason,
            FormatReason::InvalidRule(ConstructionError::OutOfRange {
                part: ByPart::MonthDay,
                value: 0,
                range: "1..=31 or -31..=-1",
            }),
        );
    }

    #[test]
    fn errors() {
        let cases = [
            ("DTSTART 20240101", "line 1: expected `<directive>:<value>`, but found no `:`"),
            ("\nSUMMARY:lunch", "line 2: unrecognized directive `SUMMARY`"),
            (
                "DTSTART:20240101\nDTSTART:20240102",
                "line 2: directive `DTSTART` may only appear once",
            ),
            ("DTEND:", "line 1: empty value for `DTEND`"),
            ("RDATE:20240101,,20240102", "line 1: empty value for `RDATE`"),
            (
                "RRULE:FREQ=DAILY;COUNT",
                "line 1: expected `<key>=<value>` in rule, but found `COUNT`",
            ),
            ("RRULE:FREQ=DAILY;TZID=UTC", "line 1: unrecognized rule key `TZID`"),
            (
                "RRULE:FREQ=DAILY;count=1;COUNT=2",
                "line 1: rule key `COUNT` may only appear once",
            ),
            ("RRULE:COUNT=2", "line 1: rule is missing required `FREQ`"),
            ("RRULE:", "line 1: rule is missing required `FREQ`"),
            (
                "RRULE:FREQ=DAILY;COUNT=-1",
                "line 1: failed to parse `-1` as an integer for `COUNT`",
            ),
            (
                "RRULE:FREQ=DAILY;INTERVAL=two",
                "line 1: failed to parse `two` as an integer for `INTERVAL`",
            ),
            (
                "RRULE:FREQ=YEARLY;BYMONTH=1,,2",
                "line 1: empty value for `BYMONTH`",
            ),
            ("RRULE:FREQ=YEARLY;BYMONTH=", "line 1: empty value for `BYMONTH`"),
            ("RRULE:FREQ=WEEKLY;BYDAY=MO,XX", "line 1: unrecognized weekday `XX`"),
            ("RRULE:FREQ=WEEKLY;WKST=MON", "line 1: unrecognized weekday `MON`"),
            (
                "EXDATE:2024-01-01",
                "line 1: invalid timestamp `2024-01-01` (expected `YYYYMMDD`, \
                 `YYYYMMDDTHHMMSS` or `YYYYMMDDTHHMMSSZ`)",
            ),
            (
                "RRULE:FREQ=DAILY;INTERVAL=0",
                "line 1: invalid rule: interval value of `0` is invalid \
                 (interval must be greater than or equal to 1)",
            ),
        ];
        for (text, message) in cases {
            let err = parse(text).unwrap_err();
            assert_eq!(err.to_string(), message, "for input {text:?}");
        }
    }

    fn stamp(s: &str) -> Stamp {
        s.parse().unwrap()
    }
}
