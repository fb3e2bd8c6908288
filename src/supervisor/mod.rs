//! Passthrough supervision of the wrapped program.
//!
//! Spawns the program (under a PTY or with piped output), relays its output
//! to the user's terminal in real time, feeds every chunk to the
//! [`WaitMonitor`], and fires notifications on a detached thread when the
//! monitor decides the program is waiting. Under a PTY the user's keystrokes
//! and remote commands from the relay queue are written to the master; in
//! pipe mode the child reads the user's terminal directly.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use portable_pty::{CommandBuilder, MasterPty, PtySize, native_pty_system};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detector::{MonitorConfig, WaitMonitor, WaitTrigger};
use crate::notify::{Alert, AlertContext, Notifier};
use crate::remote::CommandQueue;
use crate::term::{self, TerminalGuard};

/// How long the loop waits for an event before doing housekeeping.
const TICK: Duration = Duration::from_millis(100);
/// Output still in flight after the child exits is relayed for this long.
const DRAIN: Duration = Duration::from_millis(500);
/// Grace period between SIGTERM and a hard kill.
const TERM_GRACE: Duration = Duration::from_secs(3);

/// How the child's stdio is attached.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IoMode {
    /// Pseudo-terminal; the user's terminal runs in raw mode.
    #[default]
    Pty,
    /// Piped stdout/stderr; stdin inherited from the user's terminal.
    Pipe,
}

impl IoMode {
    pub fn label(self) -> &'static str {
        match self {
            IoMode::Pty => "pty",
            IoMode::Pipe => "pipe",
        }
    }
}

/// Outcome of a wrapped session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionResult {
    /// Exit code, `None` when the child died from a signal.
    pub code: Option<i32>,
}

impl SessionResult {
    /// Status this process should exit with.
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(1)
    }
}

pub struct SessionConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub mode: IoMode,
    pub monitor: MonitorConfig,
    /// Pause between detection and dispatch.
    pub notify_delay: Duration,
    pub alert: Alert,
    pub session_id: String,
    /// Public URL of the command relay, passed on to channels.
    pub reply_url: Option<String>,
    /// Only drained in pty mode.
    pub commands: Option<CommandQueue>,
    /// Relay the user's stdin to the child (pty mode).
    pub forward_stdin: bool,
    /// Set by the interrupt handler.
    pub stop: Arc<AtomicBool>,
}

/// Where child output is written.
pub struct Passthrough {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
}

impl Passthrough {
    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self { out, err }
    }

    fn write(&mut self, stream: Stream, data: &[u8]) {
        let sink = match stream {
            Stream::Stdout => &mut self.out,
            Stream::Stderr => &mut self.err,
        };
        let _ = sink.write_all(data);
        let _ = sink.flush();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

enum Event {
    Output { stream: Stream, data: Vec<u8> },
    OutputClosed,
    Input(Vec<u8>),
}

/// A spawned child in either I/O mode.
enum Child {
    Pty {
        child: Box<dyn portable_pty::Child + Send + Sync>,
        writer: Box<dyn Write + Send>,
        // Closing the master hangs up the child; keep it for the session.
        _master: Box<dyn MasterPty + Send>,
    },
    Pipe { child: std::process::Child },
}

impl Child {
    fn write_input(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Child::Pty { writer, .. } => {
                writer.write_all(bytes)?;
                writer.flush()
            }
            Child::Pipe { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stdin is inherited in pipe mode",
            )),
        }
    }

    fn pid(&self) -> Option<u32> {
        match self {
            Child::Pty { child, .. } => child.process_id(),
            Child::Pipe { child } => Some(child.id()),
        }
    }

    /// `Some(code)` once the child has exited.
    fn try_wait(&mut self) -> io::Result<Option<Option<i32>>> {
        Ok(match self {
            Child::Pty { child, .. } => child.try_wait()?.map(|s| Some(s.exit_code() as i32)),
            Child::Pipe { child } => child.try_wait()?.map(|s| s.code()),
        })
    }

    fn kill(&mut self) -> io::Result<()> {
        match self {
            Child::Pty { child, .. } => child.kill(),
            Child::Pipe { child } => child.kill(),
        }
    }

    /// Ask the child to stop with SIGTERM and wait for it, escalating to a
    /// hard kill if it ignores the request.
    fn terminate(&mut self) -> Result<Option<i32>> {
        if let Some(code) = self.try_wait()? {
            return Ok(code);
        }
        self.send_term();
        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            if let Some(code) = self.try_wait()? {
                return Ok(code);
            }
            thread::sleep(Duration::from_millis(20));
        }
        warn!("child ignored SIGTERM, killing");
        self.kill().context("failed to kill child")?;
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(code);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[cfg(unix)]
    fn send_term(&mut self) {
        match self.pid() {
            Some(pid) => unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            },
            None => {
                let _ = self.kill();
            }
        }
    }

    #[cfg(not(unix))]
    fn send_term(&mut self) {
        let _ = self.kill();
    }
}

fn spawn_pty(config: &SessionConfig, tx: &Sender<Event>) -> Result<(Child, usize)> {
    let (rows, cols) = term::terminal_size().unwrap_or((24, 80));
    let pair = native_pty_system()
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("failed to open PTY")?;

    let mut cmd = CommandBuilder::new(&config.program);
    cmd.args(&config.args);
    for (key, value) in std::env::vars_os() {
        cmd.env(key, value);
    }
    if std::env::var_os("TERM").is_none() {
        cmd.env("TERM", "xterm-256color");
    }
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .with_context(|| format!("failed to spawn {}", config.program.display()))?;
    // Only the master side is ours.
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .context("failed to clone PTY reader")?;
    let writer = pair
        .master
        .take_writer()
        .context("failed to take PTY writer")?;
    pump(reader, Stream::Stdout, tx.clone());

    Ok((
        Child::Pty {
            child,
            writer,
            _master: pair.master,
        },
        1,
    ))
}

fn spawn_pipe(config: &SessionConfig, tx: &Sender<Event>) -> Result<(Child, usize)> {
    let mut child = Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {}", config.program.display()))?;

    let mut readers = 0;
    if let Some(out) = child.stdout.take() {
        pump(out, Stream::Stdout, tx.clone());
        readers += 1;
    }
    if let Some(err) = child.stderr.take() {
        pump(err, Stream::Stderr, tx.clone());
        readers += 1;
    }
    Ok((Child::Pipe { child }, readers))
}

/// Copy everything from `reader` into the event channel until EOF.
fn pump<R: Read + Send + 'static>(mut reader: R, stream: Stream, tx: Sender<Event>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let event = Event::Output {
                        stream,
                        data: buf[..n].to_vec(),
                    };
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // A PTY master reports EIO once the child is gone.
                    debug!("output read ended: {e}");
                    break;
                }
            }
        }
        let _ = tx.send(Event::OutputClosed);
    });
}

fn pump_stdin(tx: Sender<Event>) {
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Event::Input(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

/// Run the wrapped program until it exits or the stop flag is raised.
pub fn run_session(
    config: SessionConfig,
    notifier: Arc<Notifier>,
    mut io: Passthrough,
) -> Result<SessionResult> {
    let (tx, rx) = mpsc::channel::<Event>();

    info!(
        program = %config.program.display(),
        mode = config.mode.label(),
        "spawning wrapped program"
    );
    let (mut child, mut open_readers) = match config.mode {
        IoMode::Pty => spawn_pty(&config, &tx)?,
        IoMode::Pipe => spawn_pipe(&config, &tx)?,
    };

    let forward = config.forward_stdin && config.mode == IoMode::Pty;
    let _guard = if forward {
        Some(TerminalGuard::raw().context("failed to put terminal in raw mode")?)
    } else {
        None
    };
    if forward {
        pump_stdin(tx.clone());
    }
    drop(tx);
    let commands = match (&config.commands, config.mode) {
        (Some(queue), IoMode::Pty) => Some(queue),
        (Some(_), IoMode::Pipe) => {
            warn!("remote commands need pty mode; the queue will not be drained");
            None
        }
        (None, _) => None,
    };

    let mut monitor = WaitMonitor::new(config.monitor.clone());
    let mut exit: Option<Option<i32>> = None;
    let mut drain_until: Option<Instant> = None;

    loop {
        if exit.is_none() && config.stop.load(Ordering::Relaxed) {
            term::notice("interrupted, stopping the wrapped program");
            exit = Some(child.terminate()?);
        }

        if exit.is_none() {
            if let Some(queue) = commands {
                while let Some(input) = queue.next_input() {
                    term::notice(&format!("remote command: {}", input.trim_end()));
                    if let Err(e) = child.write_input(input.as_bytes()) {
                        warn!(error = %e, "failed to inject remote command");
                    }
                    monitor.on_user_input();
                }
            }
        }

        match rx.recv_timeout(TICK) {
            Ok(Event::Output { stream, data }) => {
                io.write(stream, &data);
                if let Some(trigger) = monitor.observe(&data, Instant::now()) {
                    fire(&config, &notifier, trigger);
                }
            }
            Ok(Event::OutputClosed) => open_readers = open_readers.saturating_sub(1),
            Ok(Event::Input(data)) => {
                if exit.is_none() {
                    if let Err(e) = child.write_input(&data) {
                        debug!(error = %e, "failed to forward input");
                    }
                }
                monitor.on_user_input();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => open_readers = 0,
        }

        if exit.is_none() {
            if let Some(code) = child.try_wait().context("failed to poll child")? {
                exit = Some(code);
            }
        }
        if let Some(code) = exit {
            let until = *drain_until.get_or_insert_with(|| Instant::now() + DRAIN);
            if open_readers == 0 || Instant::now() >= until {
                info!(code = ?code, "wrapped program exited");
                return Ok(SessionResult { code });
            }
        }
    }
}

fn fire(config: &SessionConfig, notifier: &Arc<Notifier>, trigger: WaitTrigger) {
    debug!(line = %trigger.waiting_line, "waiting for input");
    let ctx = AlertContext::from_trigger(&config.session_id, trigger, config.reply_url.clone());
    // Detached: the handle is dropped and the loop carries on.
    let _ = notifier.dispatch_detached(config.alert.clone(), ctx, config.notify_delay);
}
