//! User terminal: raw mode, window size, and status lines.

use std::io::{IsTerminal, Write};

/// Print a status line with the tool prefix on stderr. Uses `\r\n` so the
/// line renders correctly while the terminal is in raw mode.
pub fn notice(msg: &str) {
    print_prefixed("\x1b[36m", msg);
}

/// Like [`notice`] but highlighted as a warning.
pub fn notice_warn(msg: &str) {
    print_prefixed("\x1b[33m", msg);
}

fn print_prefixed(colour: &str, msg: &str) {
    let mut err = std::io::stderr().lock();
    let _ = write!(err, "\r{colour}[promptwatch]\x1b[0m {msg}\r\n");
    let _ = err.flush();
}

pub fn stdin_is_tty() -> bool {
    std::io::stdin().is_terminal()
}

/// Rows and columns of the terminal on stdout, if it is one.
#[cfg(unix)]
pub fn terminal_size() -> Option<(u16, u16)> {
    // SAFETY: winsize is plain data and TIOCGWINSZ only writes into it.
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc == 0 && ws.ws_row > 0 && ws.ws_col > 0 {
        Some((ws.ws_row, ws.ws_col))
    } else {
        None
    }
}

#[cfg(not(unix))]
pub fn terminal_size() -> Option<(u16, u16)> {
    None
}

/// Puts stdin into raw mode and restores the saved settings on drop.
#[cfg(unix)]
pub struct TerminalGuard {
    original: Option<libc::termios>,
}

#[cfg(unix)]
impl TerminalGuard {
    /// Enter raw mode when stdin is a terminal; otherwise a no-op guard.
    pub fn raw() -> anyhow::Result<Self> {
        if !stdin_is_tty() {
            return Ok(Self { original: None });
        }
        let fd = libc::STDIN_FILENO;
        // SAFETY: termios is plain data, filled by tcgetattr before use.
        let mut original: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let mut raw = original;
        unsafe { libc::cfmakeraw(&mut raw) };
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self {
            original: Some(original),
        })
    }

    pub fn is_raw(&self) -> bool {
        self.original.is_some()
    }
}

#[cfg(unix)]
impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            unsafe {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSADRAIN, &original);
            }
        }
    }
}

#[cfg(not(unix))]
pub struct TerminalGuard;

#[cfg(not(unix))]
impl TerminalGuard {
    pub fn raw() -> anyhow::Result<Self> {
        Ok(Self)
    }

    pub fn is_raw(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_without_tty_is_noop() {
        // Test harnesses run with stdin redirected.
        if stdin_is_tty() {
            return;
        }
        let guard = TerminalGuard::raw().unwrap();
        assert!(!guard.is_raw());
    }

    #[test]
    fn notices_do_not_panic() {
        notice("hello");
        notice_warn("careful");
    }
}
