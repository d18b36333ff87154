use std::{
    fmt::{Debug, Display},
    str::FromStr,
    sync::LazyLock,
};

use {
    anyhow::Context,
    lexopt::{Arg, Parser, ValueExt},
    regex::Regex,
};

pub mod flags;

/// Something that claims some of a command's flags and arguments.
///
/// A command is usually configured by more than one of these, for example,
/// its own `Config` plus a [`flags::FileOrStdin`] for the input path.
pub trait Configurable: Debug {
    /// Returns `true` if `arg` was consumed. Any value it takes should be
    /// read from `p`.
    fn configure(
        &mut self,
        p: &mut Parser,
        arg: &mut Arg,
    ) -> anyhow::Result<bool>;

    /// Docs for every flag and argument this implementation consumes.
    fn usage(&self) -> &[Usage] {
        &[]
    }
}

/// Feeds every remaining argument in `p` to the first target that claims it.
///
/// `-h`, `--help` and `--version` are handled here and returned as a [`Help`]
/// or [`Version`] error. An argument that no target claims is an error.
pub fn configure(
    p: &mut Parser,
    usage: &str,
    targets: &mut [&mut dyn Configurable],
) -> anyhow::Result<()> {
    while let Some(arg) = p.next()? {
        match arg {
            Arg::Short('h') => {
                return Err(Help::render(usage, targets, false).into());
            }
            Arg::Long("help") => {
                return Err(Help::render(usage, targets, true).into());
            }
            Arg::Long("version") => return Err(Version.into()),
            _ => {}
        }
        let mut name = String::new();
        let mut arg = detach(arg, &mut name);
        if !claim(p, &mut arg, targets)? {
            return Err(arg.unexpected().into());
        }
    }
    Ok(())
}

/// Rebuilds `arg` so that it no longer borrows from the parser, which the
/// targets need mutably. A long flag name is copied into `name`.
fn detach<'a>(arg: Arg<'_>, name: &'a mut String) -> Arg<'a> {
    match arg {
        Arg::Short(c) => Arg::Short(c),
        Arg::Long(long) => {
            name.push_str(long);
            Arg::Long(name.as_str())
        }
        Arg::Value(value) => Arg::Value(value),
    }
}

fn claim(
    p: &mut Parser,
    arg: &mut Arg,
    targets: &mut [&mut dyn Configurable],
) -> anyhow::Result<bool> {
    for target in targets.iter_mut() {
        if target.configure(p, arg)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Reads the name of a sub-command from `p`.
///
/// With no argument at all, the usage is returned as an (unsuccessful)
/// error. `-h`, `--help` and `--version` work as they do in [`configure`].
pub fn next_as_command(usage: &str, p: &mut Parser) -> anyhow::Result<String> {
    let usage = usage.trim();
    match p.next()? {
        None => anyhow::bail!("{usage}"),
        Some(Arg::Value(cmd)) => Ok(cmd.string()?),
        Some(Arg::Short('h') | Arg::Long("help")) => {
            Err(Help(usage.to_string()).into())
        }
        Some(Arg::Long("version")) => Err(Version.into()),
        Some(arg) => Err(arg.unexpected().into()),
    }
}

/// Parses the value of the flag `flag_name` as a `T`.
///
/// Errors are prefixed with `flag_name`.
pub fn parse<T>(p: &mut Parser, flag_name: &'static str) -> anyhow::Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: Display + Debug + Send + Sync + 'static,
{
    let value = p.value().context(flag_name)?;
    let Some(value) = value.to_str() else {
        let err = lexopt::Error::NonUnicodeValue(value.into());
        return Err(anyhow::Error::from(err).context(flag_name));
    };
    // `anyhow::Error` is a common `FromStr` error here and it doesn't
    // implement `std::error::Error`, so `?` can't be used.
    value.parse().map_err(|err| anyhow::Error::msg(err).context(flag_name))
}

/// The docs for one flag or argument.
///
/// A table of these is rendered in place of `%flags%` or `%args%` in a
/// command's usage text. `-h` gets one line per entry and `--help` gets
/// every paragraph of `long`.
#[derive(Clone, Copy, Debug)]
pub struct Usage {
    /// Flags are listed under OPTIONS, everything else under ARGUMENTS.
    pub flag: bool,
    /// How it's written on the command line, for example, `--after <stamp>`.
    pub format: &'static str,
    /// One line, shown next to `format` by `-h`.
    pub short: &'static str,
    pub long: &'static str,
}

impl Usage {
    pub const fn flag(
        format: &'static str,
        short: &'static str,
        long: &'static str,
    ) -> Usage {
        Usage { flag: true, format, short, long }
    }

    pub const fn arg(
        format: &'static str,
        short: &'static str,
        long: &'static str,
    ) -> Usage {
        Usage { flag: false, format, short, long }
    }

    /// Renders a two column table of formats and short descriptions.
    pub fn short(usages: &[Usage]) -> String {
        let width = usages.iter().map(|u| u.format.len()).max().unwrap_or(0);
        usages
            .iter()
            .map(|u| format!("    {:<width$}  {}\n", u.format, u.short))
            .collect()
    }

    /// Renders each format followed by its long description, indented and
    /// wrapped to 79 columns. Paragraphs are separated by blank lines.
    pub fn long(usages: &[Usage]) -> String {
        let wrap = textwrap::Options::new(79)
            .initial_indent("        ")
            .subsequent_indent("        ");
        let mut entries = vec![];
        for usage in usages.iter() {
            let mut entry = format!("    {}\n", usage.format);
            let paragraphs = usage.long.trim().split("\n\n").map(|para| {
                let flat = para.replace('\n', " ");
                textwrap::fill(&flat, &wrap) + "\n"
            });
            entry.push_str(&paragraphs.collect::<Vec<_>>().join("\n"));
            entries.push(entry);
        }
        entries.join("\n")
    }
}

/// Returned as an error for `-h/--help`.
///
/// `main` downcasts to this, prints it to stdout and exits successfully.
#[derive(Debug)]
pub struct Help(String);

impl Help {
    const USAGE: Usage = Usage::flag(
        "-h/--help",
        "Print help. -h is a summary and --help is complete.",
        r#"
Print help. -h is a summary and --help is complete.

With -h, examples beyond the first are left out and every flag gets a single
line. With --help, everything is shown, including every paragraph of each
flag's documentation.
"#,
    );

    /// Fills in `%args%` and `%flags%` in a command's usage text from the
    /// docs of its targets.
    ///
    /// The short form drops everything between `%snip-start%` and
    /// `%snip-end%`. The long form keeps it and drops only the markers.
    fn render(
        usage: &str,
        targets: &[&mut dyn Configurable],
        long: bool,
    ) -> Help {
        static SNIPPED: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?m)^\s*%snip-start%\p{any}*?%snip-end%\s*$").unwrap()
        });
        static MARKERS: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?m)^\s*%snip-(start|end)%\s*$").unwrap()
        });

        let mut args = vec![];
        // Built-in flags are listed with the rest.
        let mut flags = vec![Help::USAGE, Version::USAGE];
        for usage in targets.iter().flat_map(|t| t.usage()) {
            if usage.flag {
                flags.push(*usage);
            } else {
                args.push(*usage);
            }
        }
        // Arguments keep their positional order. Flags are sorted by long
        // name when there is one.
        flags.sort_by_key(|u| {
            u.format.split_once(", ").map_or(u.format, |(_, long)| long)
        });

        let (text, args, flags) = if long {
            let text = MARKERS.replace_all(usage, "");
            (text, Usage::long(&args), Usage::long(&flags))
        } else {
            let text = SNIPPED.replace_all(usage, "");
            (text, Usage::short(&args), Usage::short(&flags))
        };
        let text = text.replace("%args%", &args).replace("%flags%", &flags);
        Help(text.trim().to_string())
    }
}

impl std::fmt::Display for Help {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Help {}

/// Returned as an error for `--version`, and handled like [`Help`].
#[derive(Debug)]
pub struct Version;

impl Version {
    const USAGE: Usage = Usage::flag(
        "--version",
        "Print the version of Recur.",
        r#"
Print the version of Recur.

When built from a git checkout with RECUR_BUILD_GIT_HASH set, the revision is
printed too.
"#,
    );
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let semver = option_env!("CARGO_PKG_VERSION").unwrap_or("N/A");
        match option_env!("RECUR_BUILD_GIT_HASH") {
            None => write!(f, "Recur {semver}"),
            Some(hash) => write!(f, "Recur {semver} (rev {hash})"),
        }
    }
}

impl std::error::Error for Version {}
