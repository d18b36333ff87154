use std::process::ExitCode;

use anyhow::Context;

use crate::args::flags::FileOrStdin;

mod check;
mod fmt;
mod seq;

const USAGE: &'static str = "\
A utility for parsing, validating and expanding calendar recurrences.

USAGE:
    recur <command> ...

COMMANDS:
    check  Validate a recurrence against a policy
    fmt    Print a recurrence in its canonical form
    seq    Print the occurrences of a recurrence
";

pub fn run(p: &mut lexopt::Parser) -> anyhow::Result<ExitCode> {
    let cmd = crate::args::next_as_command(USAGE, p)?;
    match &*cmd {
        "check" => check::run(p),
        "fmt" => fmt::run(p),
        "seq" => seq::run(p),
        unk => anyhow::bail!("unrecognized command '{}'", unk),
    }
}

/// Reads and parses the recurrence from the given input.
fn read(input: &FileOrStdin) -> anyhow::Result<recur::Recurrence> {
    let text = input.read_to_string()?;
    recur::parse(&text).with_context(|| {
        format!("failed to parse recurrence from {}", input.display())
    })
}
