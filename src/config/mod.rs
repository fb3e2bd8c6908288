use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detector::MonitorConfig;
use crate::notify::teams::CardStyle;
use crate::notify::{Alert, ChannelKind, ChannelOptions, DEFAULT_MESSAGE, DEFAULT_TITLE, DispatchStrategy};
use crate::paths::DEFAULT_PROGRAM;
use crate::prompt::DetectorProfile;
use crate::supervisor::IoMode;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".promptwatch";

/// Named bundle of detector and channel settings, one per wrapper flavour.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Strict detection; bell, sound, popup and dock bounce.
    Local,
    /// Standard detection under a PTY; sound, popup and dock bounce.
    #[default]
    Simple,
    /// Popup, dock bounce, bell and a stderr banner; no sound.
    Visual,
    /// Teams card with option facts; needs two prompt hits.
    Teams,
    /// Minimal Teams card with a short timeout.
    TeamsLite,
    /// Pushover, falling back to Telegram.
    Mobile,
    /// Signed relay, then a Teams pointer to it.
    Secure,
    /// Teams and SMS with a command relay for replies.
    Remote,
}

/// Everything a preset decides.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetSpec {
    pub profile: DetectorProfile,
    pub cooldown: Duration,
    pub notify_delay: Duration,
    pub mode: IoMode,
    pub channels: Vec<ChannelKind>,
    pub strategy: DispatchStrategy,
    pub hits_required: u32,
    pub substantial_len: usize,
    pub history: (usize, usize),
    pub tail: (usize, usize),
    pub timeout: Duration,
    pub context_chars: usize,
    pub teams_card: CardStyle,
    pub remote: bool,
}

impl Default for PresetSpec {
    fn default() -> Self {
        Self {
            profile: DetectorProfile::Standard,
            cooldown: Duration::from_secs(3),
            notify_delay: Duration::ZERO,
            mode: IoMode::Pipe,
            channels: Vec::new(),
            strategy: DispatchStrategy::All,
            hits_required: 1,
            substantial_len: 20,
            history: (100, 50),
            tail: (1000, 500),
            timeout: Duration::from_secs(10),
            context_chars: 500,
            teams_card: CardStyle::Full,
            remote: false,
        }
    }
}

impl Preset {
    pub fn label(self) -> &'static str {
        match self {
            Preset::Local => "local",
            Preset::Simple => "simple",
            Preset::Visual => "visual",
            Preset::Teams => "teams",
            Preset::TeamsLite => "teams-lite",
            Preset::Mobile => "mobile",
            Preset::Secure => "secure",
            Preset::Remote => "remote",
        }
    }

    pub fn spec(self) -> PresetSpec {
        use ChannelKind::*;
        let base = PresetSpec::default();
        match self {
            Preset::Local => PresetSpec {
                profile: DetectorProfile::Strict,
                notify_delay: Duration::from_millis(500),
                channels: vec![Bell, Sound, Desktop, Dock],
                ..base
            },
            Preset::Simple => PresetSpec {
                mode: IoMode::Pty,
                channels: vec![Sound, Desktop, Dock],
                ..base
            },
            Preset::Visual => PresetSpec {
                profile: DetectorProfile::Visual,
                channels: vec![Desktop, Dock, Bell, Banner],
                history: (20, 10),
                ..base
            },
            Preset::Teams => PresetSpec {
                profile: DetectorProfile::Teams,
                cooldown: Duration::from_secs(10),
                channels: vec![Teams],
                hits_required: 2,
                substantial_len: 30,
                history: (50, 30),
                ..base
            },
            Preset::TeamsLite => PresetSpec {
                profile: DetectorProfile::Basic,
                cooldown: Duration::from_secs(30),
                channels: vec![Teams],
                timeout: Duration::from_secs(5),
                context_chars: 200,
                ..base
            },
            Preset::Mobile => PresetSpec {
                profile: DetectorProfile::Basic,
                cooldown: Duration::from_secs(60),
                channels: vec![Pushover, Telegram],
                strategy: DispatchStrategy::FirstSuccess,
                history: (30, 20),
                context_chars: 300,
                ..base
            },
            Preset::Secure => PresetSpec {
                profile: DetectorProfile::Basic,
                cooldown: Duration::from_secs(30),
                channels: vec![Relay, Teams],
                strategy: DispatchStrategy::Chain,
                teams_card: CardStyle::Pointer,
                ..base
            },
            Preset::Remote => PresetSpec {
                profile: DetectorProfile::Remote,
                cooldown: Duration::from_secs(5),
                mode: IoMode::Pty,
                channels: vec![Teams, Sms],
                tail: (2000, 1000),
                remote: true,
                ..base
            },
        }
    }
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_sound() -> String {
    "Glass".to_string()
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_pushover_priority() -> i8 {
    1
}

fn default_any_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_remote_port() -> u16 {
    8888
}

fn default_tunnel() -> bool {
    true
}

fn default_tunnel_wait_secs() -> u64 {
    10
}

fn default_serve_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_serve_port() -> u16 {
    8000
}

#[derive(Debug, Deserialize)]
pub struct WrapperConfig {
    #[serde(default)]
    pub preset: Preset,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub mode: Option<IoMode>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            preset: Preset::default(),
            program: default_program(),
            mode: None,
        }
    }
}

/// Per-field overrides of the preset's detector settings.
#[derive(Debug, Default, Deserialize)]
pub struct DetectorOverrides {
    #[serde(default)]
    pub profile: Option<DetectorProfile>,
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
    #[serde(default)]
    pub notify_delay_millis: Option<u64>,
    #[serde(default)]
    pub hits_required: Option<u32>,
    #[serde(default)]
    pub substantial_len: Option<usize>,
    #[serde(default)]
    pub history_lines: Option<usize>,
    #[serde(default)]
    pub tail_chars: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub channels: Option<Vec<ChannelKind>>,
    #[serde(default)]
    pub strategy: Option<DispatchStrategy>,
    #[serde(default = "default_sound")]
    pub sound: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_message")]
    pub message: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub context_chars: Option<usize>,
    #[serde(default)]
    pub teams_card: Option<CardStyle>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channels: None,
            strategy: None,
            sound: default_sound(),
            title: default_title(),
            message: default_message(),
            timeout_secs: None,
            context_chars: None,
            teams_card: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PushoverConfig {
    #[serde(default = "default_pushover_priority")]
    pub priority: i8,
}

impl Default for PushoverConfig {
    fn default() -> Self {
        Self {
            priority: default_pushover_priority(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Force the command relay on or off regardless of preset.
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default = "default_any_bind")]
    pub bind: String,
    #[serde(default = "default_remote_port")]
    pub port: u16,
    #[serde(default = "default_tunnel")]
    pub tunnel: bool,
    #[serde(default = "default_tunnel_wait_secs")]
    pub tunnel_wait_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            bind: default_any_bind(),
            port: default_remote_port(),
            tunnel: default_tunnel(),
            tunnel_wait_secs: default_tunnel_wait_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServeConfig {
    #[serde(default = "default_serve_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_any_bind")]
    pub bind: String,
    #[serde(default = "default_serve_port")]
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            dir: default_serve_dir(),
            bind: default_any_bind(),
            port: default_serve_port(),
        }
    }
}

/// Secrets for the remote channels. The environment wins over the file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Credentials {
    pub teams_webhook_url: Option<String>,
    pub pushover_user_key: Option<String>,
    pub pushover_app_token: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    pub twilio_to_number: Option<String>,
    pub webhook_service: Option<String>,
    pub pipedream_webhook_url: Option<String>,
    pub pipedream_api_key: Option<String>,
    pub azure_logic_app_url: Option<String>,
    pub azure_shared_key: Option<String>,
    pub aws_api_gateway_url: Option<String>,
    pub aws_api_key: Option<String>,
    pub encryption_key: Option<String>,
}

impl Credentials {
    /// Each credential with the environment variable that supplies it.
    pub fn fields(&self) -> [(&'static str, &Option<String>); 17] {
        [
            ("TEAMS_WEBHOOK_URL", &self.teams_webhook_url),
            ("PUSHOVER_USER_KEY", &self.pushover_user_key),
            ("PUSHOVER_APP_TOKEN", &self.pushover_app_token),
            ("TELEGRAM_BOT_TOKEN", &self.telegram_bot_token),
            ("TELEGRAM_CHAT_ID", &self.telegram_chat_id),
            ("TWILIO_ACCOUNT_SID", &self.twilio_account_sid),
            ("TWILIO_AUTH_TOKEN", &self.twilio_auth_token),
            ("TWILIO_FROM_NUMBER", &self.twilio_from_number),
            ("TWILIO_TO_NUMBER", &self.twilio_to_number),
            ("WEBHOOK_SERVICE", &self.webhook_service),
            ("PIPEDREAM_WEBHOOK_URL", &self.pipedream_webhook_url),
            ("PIPEDREAM_API_KEY", &self.pipedream_api_key),
            ("AZURE_LOGIC_APP_URL", &self.azure_logic_app_url),
            ("AZURE_SHARED_KEY", &self.azure_shared_key),
            ("AWS_API_GATEWAY_URL", &self.aws_api_gateway_url),
            ("AWS_API_KEY", &self.aws_api_key),
            ("CLAUDE_ENCRYPTION_KEY", &self.encryption_key),
        ]
    }

    fn fields_mut(&mut self) -> [(&'static str, &mut Option<String>); 17] {
        [
            ("TEAMS_WEBHOOK_URL", &mut self.teams_webhook_url),
            ("PUSHOVER_USER_KEY", &mut self.pushover_user_key),
            ("PUSHOVER_APP_TOKEN", &mut self.pushover_app_token),
            ("TELEGRAM_BOT_TOKEN", &mut self.telegram_bot_token),
            ("TELEGRAM_CHAT_ID", &mut self.telegram_chat_id),
            ("TWILIO_ACCOUNT_SID", &mut self.twilio_account_sid),
            ("TWILIO_AUTH_TOKEN", &mut self.twilio_auth_token),
            ("TWILIO_FROM_NUMBER", &mut self.twilio_from_number),
            ("TWILIO_TO_NUMBER", &mut self.twilio_to_number),
            ("WEBHOOK_SERVICE", &mut self.webhook_service),
            ("PIPEDREAM_WEBHOOK_URL", &mut self.pipedream_webhook_url),
            ("PIPEDREAM_API_KEY", &mut self.pipedream_api_key),
            ("AZURE_LOGIC_APP_URL", &mut self.azure_logic_app_url),
            ("AZURE_SHARED_KEY", &mut self.azure_shared_key),
            ("AWS_API_GATEWAY_URL", &mut self.aws_api_gateway_url),
            ("AWS_API_KEY", &mut self.aws_api_key),
            ("CLAUDE_ENCRYPTION_KEY", &mut self.encryption_key),
        ]
    }

    /// Replace values with non-empty ones from `lookup` (normally the
    /// process environment).
    pub fn overlay(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (var, slot) in self.fields_mut() {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                *slot = Some(value);
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub wrapper: WrapperConfig,
    #[serde(default)]
    pub detector: DetectorOverrides,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub pushover: PushoverConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub credentials: Credentials,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.promptwatch/config.toml` file and
    /// load it. Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

/// Command-line choices that beat the config file.
#[derive(Debug, Default, Clone)]
pub struct WrapOverrides {
    pub preset: Option<Preset>,
    pub mode: Option<IoMode>,
    pub program: Option<String>,
    pub channels: Option<Vec<ChannelKind>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    pub bind: String,
    pub port: u16,
    pub tunnel: bool,
    pub tunnel_wait: Duration,
}

/// Fully resolved runtime settings: preset, then config file, then command
/// line, with credentials overlaid from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub preset: Preset,
    pub program: String,
    pub mode: IoMode,
    pub monitor: MonitorConfig,
    pub notify_delay: Duration,
    pub channels: Vec<ChannelKind>,
    pub strategy: DispatchStrategy,
    pub alert: Alert,
    pub sound: String,
    pub timeout: Duration,
    pub context_chars: usize,
    pub pushover_priority: i8,
    pub teams_card: CardStyle,
    pub remote: Option<RemoteSettings>,
    pub serve: ServeConfig,
    pub credentials: Credentials,
    pub source: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(
        config: &ProjectConfig,
        source: Option<PathBuf>,
        overrides: &WrapOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let preset = overrides.preset.unwrap_or(config.wrapper.preset);
        let spec = preset.spec();
        let det = &config.detector;

        let (history_cap, history_keep) = det
            .history_lines
            .map(|n| (n.max(1), (n / 2).max(1)))
            .unwrap_or(spec.history);
        let (tail_cap, tail_keep) = det
            .tail_chars
            .map(|n| (n.max(1), (n / 2).max(1)))
            .unwrap_or(spec.tail);

        let monitor = MonitorConfig {
            profile: det.profile.unwrap_or(spec.profile),
            cooldown: det.cooldown_secs.map(Duration::from_secs).unwrap_or(spec.cooldown),
            hits_required: det.hits_required.unwrap_or(spec.hits_required).max(1),
            substantial_len: det.substantial_len.unwrap_or(spec.substantial_len),
            history_cap,
            history_keep,
            tail_cap,
            tail_keep,
            ..MonitorConfig::default()
        };

        let remote_enabled = config.remote.enabled.unwrap_or(spec.remote);
        let remote = remote_enabled.then(|| RemoteSettings {
            bind: config.remote.bind.clone(),
            port: config.remote.port,
            tunnel: config.remote.tunnel,
            tunnel_wait: Duration::from_secs(config.remote.tunnel_wait_secs),
        });

        let mut credentials = config.credentials.clone();
        credentials.overlay(env);

        Self {
            preset,
            program: overrides
                .program
                .clone()
                .unwrap_or_else(|| config.wrapper.program.clone()),
            mode: overrides.mode.or(config.wrapper.mode).unwrap_or(spec.mode),
            monitor,
            notify_delay: det
                .notify_delay_millis
                .map(Duration::from_millis)
                .unwrap_or(spec.notify_delay),
            channels: overrides
                .channels
                .clone()
                .or_else(|| config.notify.channels.clone())
                .unwrap_or(spec.channels),
            strategy: config.notify.strategy.unwrap_or(spec.strategy),
            alert: Alert {
                title: config.notify.title.clone(),
                message: config.notify.message.clone(),
            },
            sound: config.notify.sound.clone(),
            timeout: config
                .notify
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(spec.timeout),
            context_chars: config.notify.context_chars.unwrap_or(spec.context_chars),
            pushover_priority: config.pushover.priority,
            teams_card: config.notify.teams_card.unwrap_or(spec.teams_card),
            remote,
            serve: config.serve.clone(),
            credentials,
            source,
        }
    }

    pub fn channel_options(&self, session_id: &str) -> ChannelOptions {
        ChannelOptions {
            sound: self.sound.clone(),
            timeout: self.timeout,
            context_chars: self.context_chars,
            pushover_priority: self.pushover_priority,
            teams_card: self.teams_card,
            session_id: session_id.to_string(),
        }
    }
}

/// Hide a secret, keeping the last four characters of long values.
pub fn mask(value: &Option<String>) -> String {
    match value.as_deref() {
        None => "(unset)".to_string(),
        Some(v) if v.chars().count() > 12 => {
            let tail: String = v.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("********{tail}")
        }
        Some(_) => "********".to_string(),
    }
}

fn source_label(source: Option<&Path>) -> String {
    source
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .promptwatch/config.toml found)".to_string())
}

fn join_labels<T: Copy>(items: &[T], label: impl Fn(T) -> &'static str) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.iter().map(|i| label(*i)).collect::<Vec<_>>().join(", ")
    }
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<24} {value}\n"));
}

pub fn render_human(settings: &Settings) -> String {
    let mut output = String::new();
    output.push_str("Wrapper\n");
    push_kv(&mut output, "preset", settings.preset.label());
    push_kv(&mut output, "program", &settings.program);
    push_kv(&mut output, "mode", settings.mode.label());
    output.push('\n');

    let m = &settings.monitor;
    output.push_str("Detector\n");
    push_kv(&mut output, "profile", m.profile.label());
    push_kv(&mut output, "cooldown", format!("{}s", m.cooldown.as_secs()));
    push_kv(
        &mut output,
        "notify_delay",
        format!("{}ms", settings.notify_delay.as_millis()),
    );
    push_kv(&mut output, "hits_required", m.hits_required);
    push_kv(&mut output, "substantial_len", m.substantial_len);
    push_kv(
        &mut output,
        "history_lines",
        format!("{}/{}", m.history_cap, m.history_keep),
    );
    push_kv(&mut output, "tail_chars", format!("{}/{}", m.tail_cap, m.tail_keep));
    output.push('\n');

    output.push_str("Notify\n");
    push_kv(&mut output, "channels", join_labels(&settings.channels, ChannelKind::label));
    push_kv(&mut output, "strategy", settings.strategy.label());
    push_kv(&mut output, "title", &settings.alert.title);
    push_kv(&mut output, "message", &settings.alert.message);
    push_kv(&mut output, "sound", &settings.sound);
    push_kv(&mut output, "timeout", format!("{}s", settings.timeout.as_secs()));
    push_kv(&mut output, "context_chars", settings.context_chars);
    push_kv(&mut output, "pushover_priority", settings.pushover_priority);
    push_kv(&mut output, "teams_card", settings.teams_card.label());
    output.push('\n');

    output.push_str("Remote Relay\n");
    match &settings.remote {
        Some(remote) => {
            push_kv(&mut output, "listen", format!("{}:{}", remote.bind, remote.port));
            push_kv(&mut output, "tunnel", remote.tunnel);
        }
        None => push_kv(&mut output, "enabled", false),
    }
    output.push('\n');

    output.push_str("Serve\n");
    push_kv(&mut output, "dir", settings.serve.dir.display());
    push_kv(
        &mut output,
        "listen",
        format!("{}:{}", settings.serve.bind, settings.serve.port),
    );
    output.push('\n');

    output.push_str("Credentials\n");
    for (var, value) in settings.credentials.fields() {
        push_kv(&mut output, var, mask(value));
    }
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", source_label(settings.source.as_deref()));

    output
}

pub fn render_json(settings: &Settings) -> Result<String> {
    let m = &settings.monitor;
    let credentials: serde_json::Map<String, serde_json::Value> = settings
        .credentials
        .fields()
        .into_iter()
        .map(|(var, value)| (var.to_string(), serde_json::Value::String(mask(value))))
        .collect();
    let channels: Vec<&str> = settings.channels.iter().map(|c| c.label()).collect();

    let payload = serde_json::json!({
        "wrapper": {
            "preset": settings.preset.label(),
            "program": &settings.program,
            "mode": settings.mode.label()
        },
        "detector": {
            "profile": m.profile.label(),
            "cooldown_secs": m.cooldown.as_secs(),
            "notify_delay_millis": settings.notify_delay.as_millis() as u64,
            "hits_required": m.hits_required,
            "substantial_len": m.substantial_len,
            "history_cap": m.history_cap,
            "history_keep": m.history_keep,
            "tail_cap": m.tail_cap,
            "tail_keep": m.tail_keep
        },
        "notify": {
            "channels": channels,
            "strategy": settings.strategy.label(),
            "title": &settings.alert.title,
            "message": &settings.alert.message,
            "sound": &settings.sound,
            "timeout_secs": settings.timeout.as_secs(),
            "context_chars": settings.context_chars,
            "pushover_priority": settings.pushover_priority,
            "teams_card": settings.teams_card.label()
        },
        "remote": settings.remote.as_ref().map(|r| serde_json::json!({
            "bind": &r.bind,
            "port": r.port,
            "tunnel": r.tunnel,
            "tunnel_wait_secs": r.tunnel_wait.as_secs()
        })),
        "serve": {
            "dir": settings.serve.dir.display().to_string(),
            "bind": &settings.serve.bind,
            "port": settings.serve.port
        },
        "credentials": credentials,
        "source_path": source_label(settings.source.as_deref())
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn resolve(config: &ProjectConfig, overrides: &WrapOverrides) -> Settings {
        Settings::resolve(config, None, overrides, no_env)
    }

    #[test]
    fn default_config_values() {
        let config = ProjectConfig::default();
        assert_eq!(config.wrapper.preset, Preset::Simple);
        assert_eq!(config.wrapper.program, "claude");
        assert_eq!(config.notify.sound, "Glass");
        assert_eq!(config.pushover.priority, 1);
        assert_eq!(config.remote.port, 8888);
        assert_eq!(config.serve.port, 8000);
        assert_eq!(config.serve.bind, "0.0.0.0");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[wrapper]
preset = "teams-lite"
program = "/opt/claude/bin/claude"
mode = "pipe"

[detector]
cooldown_secs = 45
history_lines = 40

[notify]
channels = ["teams", "desktop"]
strategy = "chain"
title = "Assistant"

[pushover]
priority = 2

[remote]
enabled = true
port = 9999
tunnel = false

[credentials]
teams_webhook_url = "https://example.webhook.office.com/x"
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.wrapper.preset, Preset::TeamsLite);
        assert_eq!(config.wrapper.mode, Some(IoMode::Pipe));
        assert_eq!(config.detector.cooldown_secs, Some(45));
        assert_eq!(
            config.notify.channels,
            Some(vec![ChannelKind::Teams, ChannelKind::Desktop])
        );
        assert_eq!(config.notify.strategy, Some(DispatchStrategy::Chain));
        assert_eq!(config.notify.sound, "Glass");
        assert_eq!(config.pushover.priority, 2);
        assert_eq!(config.remote.enabled, Some(true));
        assert!(!config.remote.tunnel);
        assert!(config.credentials.teams_webhook_url.is_some());

        let settings = resolve(&config, &WrapOverrides::default());
        assert_eq!(settings.monitor.profile, DetectorProfile::Basic);
        assert_eq!(settings.monitor.cooldown, Duration::from_secs(45));
        assert_eq!((settings.monitor.history_cap, settings.monitor.history_keep), (40, 20));
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.context_chars, 200);
        assert_eq!(settings.alert.title, "Assistant");
        assert_eq!(settings.remote.as_ref().map(|r| r.port), Some(9999));
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let result: Result<ProjectConfig, _> = toml::from_str("[wrapper]\npreset = \"pager\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn load_finds_config_in_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join(".promptwatch");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.toml"), "[wrapper]\npreset = \"mobile\"\n").unwrap();
        let nested = tmp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = ProjectConfig::load(&nested).unwrap();
        assert_eq!(config.wrapper.preset, Preset::Mobile);
        assert_eq!(path, Some(config_dir.join("config.toml")));
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join(".promptwatch");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.toml"), "[wrapper\n").unwrap();
        let err = ProjectConfig::load(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
    }

    #[test]
    fn secure_preset_uses_pointer_card_unless_overridden() {
        let settings = resolve(
            &ProjectConfig::default(),
            &WrapOverrides {
                preset: Some(Preset::Secure),
                ..WrapOverrides::default()
            },
        );
        assert_eq!(settings.channel_options("s").teams_card, CardStyle::Pointer);

        let config: ProjectConfig =
            toml::from_str("[wrapper]\npreset = \"secure\"\n\n[notify]\nteams_card = \"full\"\n").unwrap();
        let settings = resolve(&config, &WrapOverrides::default());
        assert_eq!(settings.teams_card, CardStyle::Full);
    }

    #[test]
    fn presets_reproduce_wrapper_flavours() {
        let spec = Preset::Mobile.spec();
        assert_eq!(spec.strategy, DispatchStrategy::FirstSuccess);
        assert_eq!(spec.channels, vec![ChannelKind::Pushover, ChannelKind::Telegram]);
        assert_eq!(spec.cooldown, Duration::from_secs(60));

        let spec = Preset::Secure.spec();
        assert_eq!(spec.strategy, DispatchStrategy::Chain);
        assert_eq!(spec.channels[0], ChannelKind::Relay);
        assert_eq!(spec.teams_card, CardStyle::Pointer);
        assert_eq!(Preset::Teams.spec().teams_card, CardStyle::Full);

        let spec = Preset::Teams.spec();
        assert_eq!(spec.hits_required, 2);
        assert_eq!(spec.substantial_len, 30);

        let spec = Preset::Remote.spec();
        assert!(spec.remote);
        assert_eq!(spec.mode, IoMode::Pty);

        assert_eq!(Preset::Local.spec().notify_delay, Duration::from_millis(500));
    }

    #[test]
    fn command_line_beats_config() {
        let config: ProjectConfig = toml::from_str("[wrapper]\npreset = \"visual\"\nmode = \"pipe\"\n").unwrap();
        let overrides = WrapOverrides {
            preset: Some(Preset::Remote),
            mode: Some(IoMode::Pty),
            program: Some("codex".into()),
            channels: Some(vec![ChannelKind::Bell]),
        };
        let settings = resolve(&config, &overrides);
        assert_eq!(settings.preset, Preset::Remote);
        assert_eq!(settings.mode, IoMode::Pty);
        assert_eq!(settings.program, "codex");
        assert_eq!(settings.channels, vec![ChannelKind::Bell]);
        assert!(settings.remote.is_some());
    }

    #[test]
    fn environment_overrides_file_credentials() {
        let config: ProjectConfig = toml::from_str(
            "[credentials]\nteams_webhook_url = \"https://file\"\ntelegram_chat_id = \"1\"\n",
        )
        .unwrap();
        let env = |var: &str| match var {
            "TEAMS_WEBHOOK_URL" => Some("https://env".to_string()),
            "TELEGRAM_CHAT_ID" => Some("   ".to_string()),
            "AWS_API_KEY" => Some("aws".to_string()),
            _ => None,
        };
        let settings = Settings::resolve(&config, None, &WrapOverrides::default(), env);
        assert_eq!(settings.credentials.teams_webhook_url.as_deref(), Some("https://env"));
        assert_eq!(settings.credentials.telegram_chat_id.as_deref(), Some("1"));
        assert_eq!(settings.credentials.aws_api_key.as_deref(), Some("aws"));
    }

    #[test]
    fn remote_can_be_disabled_for_remote_preset() {
        let config: ProjectConfig = toml::from_str("[remote]\nenabled = false\n").unwrap();
        let overrides = WrapOverrides {
            preset: Some(Preset::Remote),
            ..WrapOverrides::default()
        };
        assert!(resolve(&config, &overrides).remote.is_none());
    }

    #[test]
    fn masking_hides_secrets() {
        assert_eq!(mask(&None), "(unset)");
        assert_eq!(mask(&Some("short".into())), "********");
        assert_eq!(mask(&Some("https://hooks.example/abcd1234".into())), "********1234");
    }

    #[test]
    fn render_human_groups_sections() {
        let settings = resolve(&ProjectConfig::default(), &WrapOverrides::default());
        let rendered = render_human(&settings);
        assert!(rendered.contains("Wrapper\n"));
        assert!(rendered.contains("  preset                   simple\n"));
        assert!(rendered.contains("  channels                 sound, desktop, dock\n"));
        assert!(rendered.contains("  TEAMS_WEBHOOK_URL        (unset)\n"));
        assert!(rendered.contains("(defaults, no .promptwatch/config.toml found)"));
    }

    #[test]
    fn render_json_masks_credentials() {
        let config: ProjectConfig =
            toml::from_str("[credentials]\npushover_app_token = \"azGDORePK8gMaC0QOYAMyEEuzJnyUi\"\n").unwrap();
        let settings = resolve(&config, &WrapOverrides::default());
        let rendered = render_json(&settings).unwrap();
        assert!(!rendered.contains("azGDORePK8gMaC0QOYAMyEEuzJnyUi"));
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["wrapper"]["preset"], "simple");
        assert_eq!(value["credentials"]["PUSHOVER_APP_TOKEN"], "********nyUi");
        assert_eq!(value["remote"], serde_json::Value::Null);
        assert_eq!(value["notify"]["channels"], serde_json::json!(["sound", "desktop", "dock"]));
    }
}
