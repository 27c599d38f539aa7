use std::fmt;
use std::io::{self, Write};

use is_terminal::IsTerminal;
use termcolor::Color::{Cyan, Green, Red, Yellow};
use termcolor::{self, Color, ColorSpec, StandardStream, WriteColor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    Always,
    Never,
    /// Colour only when stderr is a terminal.
    Auto,
}

impl ColorChoice {
    fn to_termcolor(self, stream_is_tty: bool) -> termcolor::ColorChoice {
        match self {
            ColorChoice::Always => termcolor::ColorChoice::Always,
            ColorChoice::Never => termcolor::ColorChoice::Never,
            ColorChoice::Auto if stream_is_tty => termcolor::ColorChoice::Auto,
            ColorChoice::Auto => termcolor::ColorChoice::Never,
        }
    }
}

enum ShellOut {
    /// Plain writer, used by tests.
    Write(Box<dyn Write>),
    Stream {
        stderr: StandardStream,
        stderr_tty: bool,
        color_choice: ColorChoice,
    },
}

/// Status output in the style of cargo: a right-aligned coloured header
/// followed by a message, written to stderr.
pub struct Shell {
    output: ShellOut,
    verbosity: Verbosity,
    needs_clear: bool,
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Shell {
        let stderr_tty = io::stderr().is_terminal();
        let color_choice = ColorChoice::Auto;
        Shell {
            output: ShellOut::Stream {
                stderr: StandardStream::stderr(color_choice.to_termcolor(stderr_tty)),
                stderr_tty,
                color_choice,
            },
            verbosity: Verbosity::Normal,
            needs_clear: false,
        }
    }

    pub fn from_write(out: Box<dyn Write>) -> Shell {
        Shell {
            output: ShellOut::Write(out),
            verbosity: Verbosity::Normal,
            needs_clear: false,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn set_needs_clear(&mut self, needs_clear: bool) {
        self.needs_clear = needs_clear;
    }

    /// Accepts `always`, `never`, `auto` or nothing (auto).
    pub fn set_color_choice(&mut self, color: Option<&str>) -> anyhow::Result<()> {
        if let ShellOut::Stream {
            stderr,
            stderr_tty,
            color_choice,
        } = &mut self.output
        {
            let choice = match color {
                Some("always") => ColorChoice::Always,
                Some("never") => ColorChoice::Never,
                Some("auto") | None => ColorChoice::Auto,
                Some(other) => anyhow::bail!(
                    "argument for --color must be auto, always, or never, but found `{other}`"
                ),
            };
            *color_choice = choice;
            *stderr = StandardStream::stderr(choice.to_termcolor(*stderr_tty));
        }
        Ok(())
    }

    pub fn color_choice(&self) -> ColorChoice {
        match &self.output {
            ShellOut::Stream { color_choice, .. } => *color_choice,
            ShellOut::Write(_) => ColorChoice::Never,
        }
    }

    /// Columns of the attached terminal, if stderr is one.
    pub fn err_width(&self) -> Option<usize> {
        match &self.output {
            ShellOut::Stream {
                stderr_tty: true, ..
            } => imp::stderr_width(),
            _ => None,
        }
    }

    pub fn err(&mut self) -> &mut dyn Write {
        if self.needs_clear {
            self.err_erase_line();
        }
        match &mut self.output {
            ShellOut::Write(w) => w,
            ShellOut::Stream { stderr, .. } => stderr,
        }
    }

    pub fn reset_err(&mut self) -> io::Result<()> {
        if self.needs_clear {
            self.err_erase_line();
        }
        match &mut self.output {
            ShellOut::Write(_) => Ok(()),
            ShellOut::Stream { stderr, .. } => stderr.reset(),
        }
    }

    fn err_erase_line(&mut self) {
        if let Some(width) = self.err_width() {
            if let ShellOut::Stream { stderr, .. } = &mut self.output {
                let _ = write!(stderr, "\r{:width$}\r", "", width = width);
            }
        }
        self.needs_clear = false;
    }

    fn print(
        &mut self,
        status: &dyn fmt::Display,
        message: Option<&dyn fmt::Display>,
        color: Color,
        justified: bool,
    ) -> io::Result<()> {
        match self.verbosity {
            Verbosity::Quiet => Ok(()),
            _ => {
                if self.needs_clear {
                    self.err_erase_line();
                }
                self.output.message_stderr(status, message, color, justified)
            }
        }
    }

    pub fn status<T, U>(&mut self, status: T, message: U) -> io::Result<()>
    where
        T: fmt::Display,
        U: fmt::Display,
    {
        self.print(&status, Some(&message), Green, true)
    }

    pub fn status_header<T: fmt::Display>(&mut self, status: T) -> io::Result<()> {
        self.print(&status, None, Cyan, true)
    }

    pub fn status_with_color<T, U>(&mut self, status: T, message: U, color: Color) -> io::Result<()>
    where
        T: fmt::Display,
        U: fmt::Display,
    {
        self.print(&status, Some(&message), color, true)
    }

    /// Runs `callback`, dropping any error writing to the terminal.
    pub fn report<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Shell) -> io::Result<()>,
    {
        let _ = callback(self);
    }

    /// Runs `callback` only at verbose levels.
    pub fn verbose<F>(&mut self, mut callback: F) -> io::Result<()>
    where
        F: FnMut(&mut Shell) -> io::Result<()>,
    {
        match self.verbosity {
            Verbosity::Verbose | Verbosity::VeryVerbose => callback(self),
            _ => Ok(()),
        }
    }

    pub fn very_verbose<F>(&mut self, mut callback: F) -> io::Result<()>
    where
        F: FnMut(&mut Shell) -> io::Result<()>,
    {
        match self.verbosity {
            Verbosity::VeryVerbose => callback(self),
            _ => Ok(()),
        }
    }

    /// Errors are printed regardless of verbosity.
    pub fn error<T: fmt::Display>(&mut self, message: T) -> io::Result<()> {
        if self.needs_clear {
            self.err_erase_line();
        }
        self.output
            .message_stderr(&"error", Some(&message), Red, false)
    }

    pub fn warn<T: fmt::Display>(&mut self, message: T) -> io::Result<()> {
        match self.verbosity {
            Verbosity::Quiet => Ok(()),
            _ => self.print(&"warning", Some(&message), Yellow, false),
        }
    }

    pub fn note<T: fmt::Display>(&mut self, message: T) -> io::Result<()> {
        self.print(&"note", Some(&message), Cyan, false)
    }
}

impl ShellOut {
    fn message_stderr(
        &mut self,
        status: &dyn fmt::Display,
        message: Option<&dyn fmt::Display>,
        color: Color,
        justified: bool,
    ) -> io::Result<()> {
        match self {
            ShellOut::Stream { stderr, .. } => {
                stderr.reset()?;
                stderr.set_color(ColorSpec::new().set_bold(true).set_fg(Some(color)))?;
                if justified {
                    write!(stderr, "{status:>12}")?;
                } else {
                    write!(stderr, "{status}")?;
                    stderr.set_color(ColorSpec::new().set_bold(true))?;
                    write!(stderr, ":")?;
                }
                stderr.reset()?;
                match message {
                    Some(message) => writeln!(stderr, " {message}")?,
                    None => write!(stderr, " ")?,
                }
            }
            ShellOut::Write(w) => {
                if justified {
                    write!(w, "{status:>12}")?;
                } else {
                    write!(w, "{status}:")?;
                }
                match message {
                    Some(message) => writeln!(w, " {message}")?,
                    None => write!(w, " ")?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
mod imp {
    pub fn stderr_width() -> Option<usize> {
        // SAFETY: `winsize` is plain old data and TIOCGWINSZ only writes into it.
        unsafe {
            let mut winsize: libc::winsize = std::mem::zeroed();
            if libc::ioctl(libc::STDERR_FILENO, libc::TIOCGWINSZ, &mut winsize) < 0 {
                return None;
            }
            if winsize.ws_col > 0 {
                Some(winsize.ws_col as usize)
            } else {
                None
            }
        }
    }
}

#[cfg(windows)]
mod imp {
    use windows_sys::Win32::System::Console::{
        CONSOLE_SCREEN_BUFFER_INFO, GetConsoleScreenBufferInfo, GetStdHandle, STD_ERROR_HANDLE,
    };

    pub fn stderr_width() -> Option<usize> {
        // SAFETY: the buffer info struct is plain old data filled in by the call.
        unsafe {
            let handle = GetStdHandle(STD_ERROR_HANDLE);
            let mut csbi: CONSOLE_SCREEN_BUFFER_INFO = std::mem::zeroed();
            if GetConsoleScreenBufferInfo(handle, &mut csbi) == 0 {
                return None;
            }
            Some((csbi.srWindow.Right - csbi.srWindow.Left) as usize)
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    pub fn stderr_width() -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn quiet_suppresses_status_but_not_errors() {
        let out = Captured::default();
        let mut shell = Shell::from_write(Box::new(out.clone()));
        shell.set_verbosity(Verbosity::Quiet);
        shell.status("Compiling", "arm64").unwrap();
        shell.warn("ignored").unwrap();
        shell.error("boom").unwrap();
        assert_eq!(out.text(), "error: boom\n");
    }

    #[test]
    fn verbose_callback_gated() {
        let out = Captured::default();
        let mut shell = Shell::from_write(Box::new(out.clone()));
        shell
            .verbose(|s| s.status("Hidden", "at normal verbosity"))
            .unwrap();
        shell.set_verbosity(Verbosity::Verbose);
        shell.verbose(|s| s.status("Shown", "now")).unwrap();
        assert_eq!(out.text(), "       Shown now\n");
    }

    #[test]
    fn report_respects_verbosity() {
        let out = Captured::default();
        let mut shell = Shell::from_write(Box::new(out.clone()));
        shell.report(|s| s.verbose(|s| s.status("Hidden", "at normal verbosity")));
        shell.report(|s| s.warn("shown"));
        assert_eq!(out.text(), "warning: shown\n");
    }

    #[test]
    fn rejects_unknown_color() {
        let mut shell = Shell::new();
        assert!(shell.set_color_choice(Some("sometimes")).is_err());
        assert!(shell.set_color_choice(Some("never")).is_ok());
    }
}
