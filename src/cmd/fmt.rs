use std::{io::Write, process::ExitCode};

use crate::args::{self, flags::FileOrStdin};

const USAGE: &'static str = r#"
Print a recurrence in its canonical form.

The recurrence is read from the given file, or stdin if no file is given. It
is printed back with one directive per line in a fixed order: DTSTART, DTEND,
every RRULE, every EXRULE, then RDATE and EXDATE with one date per line in
ascending order. Rule keys are upper cased and printed in a fixed order, and
default values like `INTERVAL=1` are dropped.

Formatting the output of this command again never changes it.

USAGE:
    recur fmt [<path>]

TIP:
    use -h for short docs and --help for long docs

EXAMPLES:
    Normalize a hand written recurrence:

        $ printf 'rrule:count=3;freq=daily\ndtstart:20240101T090000\n' | recur fmt
        DTSTART:20240101T090000
        RRULE:FREQ=DAILY;COUNT=3

    %snip-start%

    Multiple dates on one line are split up and sorted:

        $ echo 'RDATE:20240301,20240101' | recur fmt
        RDATE:20240101
        RDATE:20240301

    %snip-end%
ARGUMENTS:
%args%
OPTIONS:
%flags%
"#;

pub fn run(p: &mut lexopt::Parser) -> anyhow::Result<ExitCode> {
    let mut input = FileOrStdin::default();
    args::configure(p, USAGE, &mut [&mut input])?;

    let rec = super::read(&input)?;
    let mut wtr = std::io::stdout().lock();
    if !rec.is_empty() {
        writeln!(wtr, "{}", recur::serialize(&rec))?;
    }
    Ok(ExitCode::SUCCESS)
}
