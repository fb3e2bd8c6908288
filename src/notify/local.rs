//! Channels that alert the person sitting at this machine.

use std::io::Write;
use std::process::{Command, Stdio};
#[cfg(target_os = "macos")]
use std::time::Duration;

use super::{Alert, AlertContext, Channel, NotifyError};

/// Run a helper program to completion with its output discarded.
pub(crate) fn run_quiet(program: &str, args: &[&str]) -> Result<(), NotifyError> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| NotifyError::Spawn {
            program: program.to_string(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(NotifyError::CommandFailed {
            program: program.to_string(),
            status: status.to_string(),
        })
    }
}

/// Escape a string for embedding in an AppleScript double-quoted literal.
pub fn escape_for_applescript(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// AppleScript for a notification-centre popup.
pub fn notification_script(alert: &Alert, sound: Option<&str>) -> String {
    let mut script = format!(
        r#"display notification "{}" with title "{}""#,
        escape_for_applescript(&alert.message),
        escape_for_applescript(&alert.title),
    );
    if let Some(sound) = sound {
        script.push_str(&format!(r#" sound name "{}""#, escape_for_applescript(sound)));
    }
    script
}

/// Terminal bell on stdout.
pub struct Bell;

impl Channel for Bell {
    fn name(&self) -> &'static str {
        "bell"
    }

    fn send(&self, _alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
        let mut out = std::io::stdout().lock();
        out.write_all(b"\x07")?;
        out.flush()?;
        Ok(())
    }
}

/// A short system sound.
pub struct Sound {
    name: String,
}

impl Sound {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn sound_file(&self) -> String {
        format!("/System/Library/Sounds/{}.aiff", self.name)
    }
}

impl Channel for Sound {
    fn name(&self) -> &'static str {
        "sound"
    }

    #[cfg(target_os = "macos")]
    fn send(&self, _alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
        run_quiet("afplay", &[&self.sound_file()])
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    fn send(&self, _alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
        const FREEDESKTOP: &str = "/usr/share/sounds/freedesktop/stereo/complete.oga";
        run_quiet("paplay", &[FREEDESKTOP])
            .or_else(|_| run_quiet("canberra-gtk-play", &["--id", "complete"]))
    }

    #[cfg(not(unix))]
    fn send(&self, _alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
        Err(NotifyError::Unsupported("sound"))
    }
}

/// Desktop popup with an optional sound.
pub struct Desktop {
    sound: Option<String>,
}

impl Desktop {
    pub fn new(sound: Option<String>) -> Self {
        Self { sound }
    }
}

impl Channel for Desktop {
    fn name(&self) -> &'static str {
        "desktop"
    }

    #[cfg(target_os = "macos")]
    fn send(&self, alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
        let script = notification_script(alert, self.sound.as_deref());
        run_quiet("osascript", &["-e", &script])
    }

    #[cfg(not(target_os = "macos"))]
    fn send(&self, alert: &Alert, ctx: &AlertContext) -> Result<(), NotifyError> {
        let mut body = alert.message.clone();
        if !ctx.waiting_line.is_empty() {
            body.push('\n');
            body.push_str(&ctx.waiting_line);
        }
        let mut notification = notify_rust::Notification::new();
        notification
            .summary(&alert.title)
            .body(&body)
            .timeout(notify_rust::Timeout::Milliseconds(5000));
        if let Some(sound) = &self.sound {
            notification.sound_name(sound);
        }
        notification
            .show()
            .map(|_| ())
            .map_err(|e| NotifyError::Desktop(e.to_string()))
    }
}

/// Bounce the Terminal icon in the macOS dock.
pub struct Dock {
    #[cfg(target_os = "macos")]
    app: String,
}

impl Default for Dock {
    fn default() -> Self {
        Self {
            #[cfg(target_os = "macos")]
            app: "Terminal".to_string(),
        }
    }
}

impl Channel for Dock {
    fn name(&self) -> &'static str {
        "dock"
    }

    #[cfg(target_os = "macos")]
    fn send(&self, _alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
        let app = escape_for_applescript(&self.app);
        run_quiet("osascript", &["-e", &format!(r#"tell application "{app}" to activate"#)])?;
        std::thread::sleep(Duration::from_millis(100));
        run_quiet(
            "osascript",
            &["-e", &format!(r#"tell application "{app}" to set frontmost to false"#)],
        )
    }

    #[cfg(not(target_os = "macos"))]
    fn send(&self, _alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
        Err(NotifyError::Unsupported("dock"))
    }
}

/// Loud coloured line on stderr.
pub struct Banner;

pub fn banner_text(alert: &Alert) -> String {
    format!(
        "\x1b[1;33;41m 🔔 {} 🔔 \x1b[0m",
        alert.message.to_uppercase()
    )
}

impl Channel for Banner {
    fn name(&self) -> &'static str {
        "banner"
    }

    fn send(&self, alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
        let mut err = std::io::stderr().lock();
        write!(err, "\r\n{}\r\n", banner_text(alert))?;
        err.flush()?;
        Ok(())
    }
}

/// Whether a local channel can work on this platform at all.
pub fn dock_supported() -> bool {
    cfg!(target_os = "macos")
}
