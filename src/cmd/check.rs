use std::{io::Write, process::ExitCode};

use anyhow::Context;

use recur::{Frequency, Policy, Recurrence, ValidationError};

use crate::args::{
    self, Usage,
    flags::{CommaSequence, FileOrStdin},
};

const USAGE: &'static str = r#"
Validate a recurrence against a policy.

The recurrence is read from the given file, or stdin if no file is given. The
policy is built from the flags given: by default, every frequency is allowed,
DTSTART and DTEND are kept and there is no limit on the number of rules or
dates.

When the recurrence is accepted, it is printed in its canonical form. A
DTSTART or DTEND that the policy doesn't accept is dropped from the output.
When the recurrence is rejected, or can't be parsed, an error is reported and
the exit code is 1.

With --json, the result is always printed to stdout as a single JSON object,
even when the recurrence is rejected.

USAGE:
    recur check [<path>]

TIP:
    use -h for short docs and --help for long docs

EXAMPLES:
    Only allow weekly and monthly rules:

        $ printf 'DTSTART:20240101\nRRULE:FREQ=DAILY\n' | recur check --frequencies weekly,monthly
        recurrence rejected by policy: invalid frequency `DAILY`

    %snip-start%

    Get a report suitable for rendering a localized message:

        $ echo 'RDATE:20240101,20240102' | recur check --max-rdates 1 --json
        {"ok":false,"error":{"kind":"validation","key":"max_rdates_exceeded","collection":"rdates","limit":1,"message":"max dates exceeded, the limit is 1"}}

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

    let policy = config.policy();
    log::debug!(
        "checking recurrence from {} against {policy:?}",
        input.display(),
    );
    let mut wtr = std::io::stdout().lock();
    if !config.json {
        let rec = super::read(&input)?;
        let accepted =
            policy.check(&rec).context("recurrence rejected by policy")?;
        if !accepted.is_empty() {
            writeln!(wtr, "{}", recur::serialize(&accepted))?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    let report = match recur::parse(&input.read_to_string()?) {
        Err(err) => Report::rejected(ErrorReport::format(&err)),
        Ok(rec) => match policy.check(&rec) {
            Err(err) => Report::rejected(ErrorReport::validation(&err)),
            Ok(accepted) => Report::accepted(&accepted),
        },
    };
    serde_json::to_writer(&mut wtr, &report)?;
    writeln!(wtr)?;
    Ok(if report.ok { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

#[derive(Debug, Default)]
struct Config {
    frequencies: Option<CommaSequence<Frequency>>,
    no_dtstart: bool,
    no_dtend: bool,
    max_rrules: Option<usize>,
    max_exrules: Option<usize>,
    max_rdates: Option<usize>,
    max_exdates: Option<usize>,
    json: bool,
}

impl Config {
    fn policy(&self) -> Policy {
        let mut b = Policy::builder();
        if let Some(ref frequencies) = self.frequencies {
            b.frequencies(frequencies.iter().copied());
        }
        b.accept_dtstart(!self.no_dtstart)
            .accept_dtend(!self.no_dtend)
            .max_rrules(self.max_rrules)
            .max_exrules(self.max_exrules)
            .max_rdates(self.max_rdates)
            .max_exdates(self.max_exdates);
        b.build()
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
            Long("frequencies") => {
                self.frequencies = Some(args::parse(p, "--frequencies")?);
            }
            Long("no-dtstart") => {
                self.no_dtstart = true;
            }
            Long("no-dtend") => {
                self.no_dtend = true;
            }
            Long("max-rrules") => {
                self.max_rrules = Some(args::parse(p, "--max-rrules")?);
            }
            Long("max-exrules") => {
                self.max_exrules = Some(args::parse(p, "--max-exrules")?);
            }
            Long("max-rdates") => {
                self.max_rdates = Some(args::parse(p, "--max-rdates")?);
            }
            Long("max-exdates") => {
                self.max_exdates = Some(args::parse(p, "--max-exdates")?);
            }
            Long("json") => {
                self.json = true;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn usage(&self) -> &[Usage] {
        const FREQUENCIES: Usage = Usage::flag(
            "--frequencies <frequency-list>",
            "The frequencies that rules may use.",
            r#"
The frequencies that rules may use.

This is a comma separated list of frequencies, for example, `weekly,monthly`.
Legal values are yearly, monthly, weekly, daily, hourly, minutely and
secondly. Case is ignored.

Every RRULE and EXRULE is checked. When this flag isn't given, every
frequency is allowed.
"#,
        );
        const NO_DTSTART: Usage = Usage::flag(
            "--no-dtstart",
            "Drop DTSTART from accepted recurrences.",
            r#"
Drop DTSTART from accepted recurrences.

This never causes a recurrence to be rejected. Note that a recurrence with
rules but no DTSTART can't produce occurrences.
"#,
        );
        const NO_DTEND: Usage = Usage::flag(
            "--no-dtend",
            "Drop DTEND from accepted recurrences.",
            r#"
Drop DTEND from accepted recurrences.

This never causes a recurrence to be rejected.
"#,
        );
        const MAX_RRULES: Usage = Usage::flag(
            "--max-rrules <number>",
            "The maximum number of RRULE lines.",
            r#"
The maximum number of RRULE lines.

Zero forbids RRULE entirely. By default, there is no limit.
"#,
        );
        const MAX_EXRULES: Usage = Usage::flag(
            "--max-exrules <number>",
            "The maximum number of EXRULE lines.",
            r#"
The maximum number of EXRULE lines.

Zero forbids EXRULE entirely. By default, there is no limit.
"#,
        );
        const MAX_RDATES: Usage = Usage::flag(
            "--max-rdates <number>",
            "The maximum number of distinct RDATE values.",
            r#"
The maximum number of distinct RDATE values.

Dates repeated across several RDATE lines only count once. Zero forbids RDATE
entirely. By default, there is no limit.
"#,
        );
        const MAX_EXDATES: Usage = Usage::flag(
            "--max-exdates <number>",
            "The maximum number of distinct EXDATE values.",
            r#"
The maximum number of distinct EXDATE values.

Dates repeated across several EXDATE lines only count once. Zero forbids
EXDATE entirely. By default, there is no limit.
"#,
        );
        const JSON: Usage = Usage::flag(
            "--json",
            "Print the result as a JSON object.",
            r#"
Print the result as a JSON object.

The object always has an `ok` field. When the recurrence is accepted, the
`recurrence` field contains its canonical form. Otherwise, the `error` field
describes what went wrong. Its `kind` is either `format` or `validation`, and
its `key` is a stable identifier suitable for looking up a localized message.
Depending on the error, `line`, `collection`, `limit` and `frequency` carry
the details needed to fill in that message.
"#,
        );

        &[
            FREQUENCIES,
            NO_DTSTART,
            NO_DTEND,
            MAX_RRULES,
            MAX_EXRULES,
            MAX_RDATES,
            MAX_EXDATES,
            JSON,
        ]
    }
}

/// The result of checking a recurrence, as printed by `--json`.
#[derive(Debug, serde::Serialize)]
struct Report {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    recurrence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

impl Report {
    fn accepted(rec: &Recurrence) -> Report {
        Report {
            ok: true,
            recurrence: Some(recur::serialize(rec)),
            error: None,
        }
    }

    fn rejected(error: ErrorReport) -> Report {
        Report { ok: false, recurrence: None, error: Some(error) }
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorReport {
    kind: &'static str,
    key: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency: Option<&'static str>,
    message: String,
}

impl ErrorReport {
    fn format(err: &recur::FormatError) -> ErrorReport {
        ErrorReport {
            kind: "format",
            key: err.reason.key(),
            line: Some(err.line),
            collection: None,
            limit: None,
            frequency: None,
            message: err.to_string(),
        }
    }

    fn validation(err: &ValidationError) -> ErrorReport {
        let (collection, limit, frequency) = match *err {
            ValidationError::LimitExceeded { collection, limit } => {
                (Some(collection.as_str()), Some(limit), None)
            }
            ValidationError::DisallowedFrequency { frequency } => {
                (None, None, Some(frequency.as_str()))
            }
        };
        ErrorReport {
            kind: "validation",
            key: err.key(),
            line: None,
            collection,
            limit,
            frequency,
            message: err.to_string(),
        }
    }
}
