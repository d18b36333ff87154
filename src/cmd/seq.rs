use std::{io::Write, process::ExitCode};

use {
    anyhow::Context,
    jiff::civil::{DateTime, Time},
    recur::{Recurrence, Stamp, StampKind, Window},
};

use crate::args::{
    self, Usage,
    flags::{self, FileOrStdin},
};

const USAGE: &'static str = r#"
Print the occurrences of a recurrence.

The recurrence is read from the given file, or stdin if no file is given.
Occurrences are printed one per line in ascending order, without duplicates.
They are the datetimes produced by every RRULE and RDATE, along with DTSTART,
minus every datetime produced by an EXRULE or listed in an EXDATE.

A recurrence may be unbounded. In that case, this command will keep printing
occurrences until the maximum supported datetime is reached. Use -c/--count
or --before to bound the output, or pipe it into a program like `head`.

Occurrences are printed in the same form as DTSTART: a date when DTSTART is a
date, and a datetime otherwise. An occurrence that doesn't fall on midnight is
always printed as a datetime, even when DTSTART is a date. With --offset,
every occurrence is instead printed as an RFC 3339 timestamp at the given
offset.

USAGE:
    recur seq [<path>]

TIP:
    use -h for short docs and --help for long docs

EXAMPLES:
    Print the next three Friday the 13ths after the start of 2024:

        $ printf 'DTSTART:20240101\nRRULE:FREQ=MONTHLY;BYDAY=FR;BYMONTHDAY=13\n' | recur seq --exclude-dtstart -c3
        20240913
        20241213
        20250613

    %snip-start%

    Print a weekly meeting in the first half of February, skipping one week:

        $ cat meeting.txt
        DTSTART:20240105T140000
        RRULE:FREQ=WEEKLY
        EXDATE:20240209T140000
        $ recur seq --after 20240201T000000 --before 20240215T000000 meeting.txt
        20240202T140000

    Print the first two meetings as instants in New York (in winter):

        $ recur seq -c2 --offset -05:00 meeting.txt
        2024-01-05T14:00:00-05:00
        2024-01-12T14:00:00-05:00

    %snip-end%
ARGUMENTS:
%args%
OPTIONS:
%flags%
"#;

pub fn run(p: &mut lexopt::Parser) -> anyhow::Result<ExitCode> {
    let mut config = Config::default();
    let mut input = FileOrStdin::default();
    args::configure(p, USAGE, &mut [&mut config, &mut input])?;

    let rec = super::read(&input)?;
    let window = config.window()?;
    let kind = stamp_kind(&rec);
    let occurrences = recur::iterate(&rec, window)
        .with_context(|| format!("cannot expand {}", input.display()))?
        .include_dtstart(!config.exclude_dtstart);

    let mut wtr = std::io::stdout().lock();
    for dt in occurrences.take(config.count.unwrap_or(usize::MAX)) {
        match config.offset {
            Some(ref offset) => {
                let offset = offset.get();
                let ts = offset.to_timestamp(dt).with_context(|| {
                    format!("`{dt}` at offset `{offset}` is out of range")
                })?;
                writeln!(wtr, "{}", ts.display_with_offset(offset))?;
            }
            None => writeln!(wtr, "{}", to_stamp(dt, kind))?,
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Picks how occurrences are printed, matching the anchor of the recurrence.
///
/// When there is no DTSTART, the earliest RDATE is used instead.
fn stamp_kind(rec: &Recurrence) -> StampKind {
    rec.dtstart
        .or_else(|| rec.rdates.first().copied())
        .map_or(StampKind::Floating, |stamp| stamp.kind())
}

/// Date stamps would drop the time, so they're only used at midnight.
fn to_stamp(dt: DateTime, kind: StampKind) -> Stamp {
    match kind {
        StampKind::Date if dt.time() == Time::midnight() => {
            Stamp::date(dt.date())
        }
        StampKind::Date | StampKind::Floating => Stamp::new(dt),
        StampKind::Utc => Stamp::utc(dt),
    }
}

#[derive(Debug, Default)]
struct Config {
    count: Option<usize>,
    after: Option<Stamp>,
    before: Option<Stamp>,
    exclude_dtstart: bool,
    offset: Option<flags::Offset>,
}

impl Config {
    fn window(&self) -> anyhow::Result<Option<Window>> {
        let after = self.after.map(|stamp| stamp.datetime());
        let before = self.before.map(|stamp| stamp.datetime());
        Ok(match (after, before) {
            (None, None) => None,
            (Some(start), None) => Some(Window::after(start)),
            (None, Some(end)) => Some(Window::before(end)),
            (Some(start), Some(end)) => Some(
                Window::new(start, end)
                    .context("invalid --after and --before combination")?,
            ),
        })
    }
}

impl args::Configurable for Config {
    fn configure(
        &mut self,
        p: &mut lexopt::Parser,
        arg: &mut lexopt::Arg,
    ) -> anyhow::Result<bool> {
        use lexopt::Arg::*;

        match *arg {
            Short('c') | Long("count") => {
                self.count = Some(args::parse(p, "-c/--count")?);
            }
            Long("after") => {
                self.after = Some(args::parse(p, "--after")?);
            }
            Long("before") => {
                self.before = Some(args::parse(p, "--before")?);
            }
            Long("exclude-dtstart") => {
                self.exclude_dtstart = true;
            }
            Long("offset") => {
                self.offset = Some(args::parse(p, "--offset")?);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn usage(&self) -> &[Usage] {
        const COUNT: Usage = Usage::flag(
            "-c/--count <number>",
            "Print at most this many occurrences.",
            r#"
Print at most this many occurrences.

This limits the output only. It is unrelated to the COUNT of a rule, and is
applied after --after and --before.
"#,
        );
        const AFTER: Usage = Usage::flag(
            "--after <timestamp>",
            "Only print occurrences at or after this timestamp.",
            r#"
Only print occurrences at or after this timestamp.

The timestamp uses the same form as DTSTART, for example, `20240101` or
`20240101T090000`. The start of the window is inclusive.

Rules are still expanded from DTSTART, so a COUNT on a rule always refers to
the same occurrences regardless of this flag.
"#,
        );
        const BEFORE: Usage = Usage::flag(
            "--before <timestamp>",
            "Only print occurrences strictly before this timestamp.",
            r#"
Only print occurrences strictly before this timestamp.

The timestamp uses the same form as DTSTART, for example, `20240101` or
`20240101T090000`. The end of the window is exclusive.

Rule expansion stops at this timestamp, so this bounds the output of any
recurrence, even one whose rules never end. When used with --after, the
timestamp given here must not be before the one given to --after.
"#,
        );
        const EXCLUDE_DTSTART: Usage = Usage::flag(
            "--exclude-dtstart",
            "Don't treat DTSTART as an occurrence on its own.",
            r#"
Don't treat DTSTART as an occurrence on its own.

By default, DTSTART is always an occurrence when there is at least one RRULE,
even if no rule produces it. With this flag, DTSTART only anchors the rules
and is printed only when a rule or RDATE produces it.
"#,
        );
        const OFFSET: Usage = Usage::flag(
            "--offset <offset>",
            "Print occurrences as RFC 3339 timestamps at this offset.",
            r#"
Print occurrences as RFC 3339 timestamps at this offset.

The offset has the form `±HH:MM`, for example, `-05:00`, or `Z` for UTC. Every
occurrence is interpreted as a civil datetime at this offset. No time zone
rules are applied, so the offset is the same for every occurrence.
"#,
        );

        &[COUNT, AFTER, BEFORE, EXCLUDE_DTSTART, OFFSET]
    }
}
