use std::{
    fmt::Display,
    io::IsTerminal,
    sync::{Arc, LazyLock},
};

use anstyle::{AnsiColor, Style};

/// A theme for styling diagnostic output on stderr.
///
/// Recur only ever styles its log lines. Regular output on stdout is always
/// plain, since it is typically fed back into `recur` or another program.
///
/// When stderr isn't a tty, or when colors are disabled, every style is a
/// no-op.
#[derive(Clone, Debug)]
pub struct Theme {
    inner: Option<Arc<ThemeInner>>,
}

impl Theme {
    /// Returns the theme for stderr.
    pub fn stderr() -> &'static Theme {
        static THEME: LazyLock<Theme> = LazyLock::new(|| {
            if !tty_stderr() || !can_use_colors() {
                return Theme { inner: None };
            }
            Theme { inner: Some(Arc::new(ThemeInner::default())) }
        });
        &*THEME
    }

    /// Styles data that should stand out, like the timestamp on a log line.
    pub fn highlight<T: Display>(&self, data: T) -> Styled<'_, T> {
        let style = self.inner.as_deref().map(|inner| &inner.highlight);
        Styled { data, style }
    }

    /// Styles a log level according to its severity.
    pub fn level(&self, level: log::Level) -> Styled<'_, log::Level> {
        let style = self.inner.as_deref().map(|inner| match level {
            log::Level::Error => &inner.error,
            log::Level::Warn => &inner.warn,
            log::Level::Info | log::Level::Debug | log::Level::Trace => {
                &inner.quiet
            }
        });
        Styled { data: level, style }
    }
}

#[derive(Debug)]
struct ThemeInner {
    highlight: Style,
    error: Style,
    warn: Style,
    quiet: Style,
}

impl Default for ThemeInner {
    fn default() -> ThemeInner {
        ThemeInner {
            highlight: Style::new()
                .bold()
                .fg_color(Some(AnsiColor::Magenta.into())),
            error: Style::new().bold().fg_color(Some(AnsiColor::Red.into())),
            warn: Style::new().fg_color(Some(AnsiColor::Yellow.into())),
            quiet: Style::new().dimmed(),
        }
    }
}

/// A possibly unstyled piece of renderable data.
///
/// When this is unstyled, its `Display` impl does no styling and just
/// renders the underlying data.
#[derive(Clone, Debug)]
pub struct Styled<'s, T> {
    data: T,
    style: Option<&'s Style>,
}

impl<'s, T: Display> Display for Styled<'s, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let Some(style) = self.style else {
            return self.data.fmt(f);
        };
        write!(f, "{style}{}{style:#}", self.data)
    }
}

/// Returns true if there's a tty attached to stderr.
fn tty_stderr() -> bool {
    static YES: LazyLock<bool> =
        LazyLock::new(|| std::io::stderr().is_terminal());
    *YES
}

/// Whether colors have been disabled via `NO_COLOR` or a dumb terminal.
fn can_use_colors() -> bool {
    static YES: LazyLock<bool> = LazyLock::new(|| {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        let dumb = std::env::var_os("TERM").is_some_and(|v| v == "dumb");
        !no_color && !dumb
    });
    *YES
}
