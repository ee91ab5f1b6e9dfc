use std::io::{self, IsTerminal, Write};

use anstyle::{AnsiColor, Effects, Style};
use modstage_installer::{InstallReporter, Severity};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    if !no_color && io::stdout().is_terminal() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "error" => "[ERR]",
        _ => "[..]",
    }
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "error" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn paint_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!(
            "{} {message}",
            colorize(status_style(status), status_badge(status))
        ),
    }
}

pub(crate) fn severity_status(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warn",
        Severity::Notice => "step",
        Severity::Ok => "ok",
    }
}

/// Prints installer progress, one status line per message.
pub(crate) struct ConsoleReporter<W: Write> {
    style: OutputStyle,
    colored: bool,
    writer: W,
    errors: usize,
    warnings: usize,
}

impl ConsoleReporter<io::Stdout> {
    pub(crate) fn stdout(style: OutputStyle) -> Self {
        Self {
            style,
            colored: style == OutputStyle::Rich,
            writer: io::stdout(),
            errors: 0,
            warnings: 0,
        }
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub(crate) fn with_writer(style: OutputStyle, writer: W) -> Self {
        Self {
            style,
            colored: false,
            writer,
            errors: 0,
            warnings: 0,
        }
    }

    pub(crate) fn errors(&self) -> usize {
        self.errors
    }

    #[cfg(test)]
    pub(crate) fn into_writer(self) -> W {
        self.writer
    }

    fn print(&mut self, line: &str) {
        if let Err(err) = writeln!(self.writer, "{line}") {
            tracing::warn!(error = %err, "failed to write installer output");
        }
    }
}

impl<W: Write> InstallReporter for ConsoleReporter<W> {
    fn message(&mut self, text: &str, severity: Severity) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Notice | Severity::Ok => {}
        }
        let status = severity_status(severity);
        let line = if self.colored {
            paint_status_line(self.style, status, text)
        } else {
            render_status_line(self.style, status, text)
        };
        self.print(&line);
    }

    fn end(&mut self) {
        if self.errors == 0 && self.warnings == 0 {
            return;
        }
        let summary = format!("{} error(s), {} warning(s)", self.errors, self.warnings);
        let status = if self.errors > 0 { "error" } else { "warn" };
        let line = render_status_line(self.style, status, &summary);
        self.print(&line);
    }
}
