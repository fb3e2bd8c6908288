//! Notification channels and dispatch.
//!
//! Every delivery mechanism (sound, popup, webhook, SMS) implements
//! [`Channel`]. A [`Notifier`] owns the configured channels and a
//! [`DispatchStrategy`] that decides how failures in one channel affect the
//! others. Channel failures are reported, never propagated: a broken webhook
//! must not take the wrapped session down with it.

pub mod local;
pub mod pushover;
pub mod relay;
pub mod sms;
pub mod teams;
pub mod telegram;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::detector::WaitTrigger;
use crate::term;

pub const DEFAULT_TITLE: &str = "Claude Code";
pub const DEFAULT_MESSAGE: &str = "Claude is waiting for your input";

/// Errors a single channel can report.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    CommandFailed { program: String, status: String },
    #[error("failed to encode payload: {0}")]
    Encode(String),
    #[error("{0}")]
    Config(String),
    #[error("desktop notification failed: {0}")]
    Desktop(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ureq::Error> for NotifyError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => NotifyError::Status {
                status,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => NotifyError::Transport(transport.to_string()),
        }
    }
}

/// The headline of a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Default for Alert {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            message: DEFAULT_MESSAGE.to_string(),
        }
    }
}

/// Everything a channel may want to show besides the headline.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub session_id: String,
    pub waiting_line: String,
    pub recent_output: String,
    pub options: Vec<String>,
    /// Public URL of the remote command relay, when one is running.
    pub reply_url: Option<String>,
    pub at: DateTime<Local>,
}

impl AlertContext {
    pub fn from_trigger(session_id: &str, trigger: WaitTrigger, reply_url: Option<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            waiting_line: trigger.waiting_line,
            recent_output: trigger.recent_output,
            options: trigger.options,
            reply_url,
            at: Local::now(),
        }
    }

    /// Canned context used by `--test`.
    pub fn sample(session_id: &str, reply_url: Option<String>) -> Self {
        let recent_output = "What would you like to do?\n1. Create a new feature\n2. Fix a bug\n3. Review code\n4. Exit";
        Self {
            session_id: session_id.to_string(),
            waiting_line: "> Waiting for input".to_string(),
            recent_output: recent_output.to_string(),
            options: crate::prompt::extract_options(recent_output),
            reply_url,
            at: Local::now(),
        }
    }

    /// First eight characters of the session id, for compact display.
    pub fn short_session(&self) -> &str {
        match self.session_id.char_indices().nth(8) {
            Some((idx, _)) => &self.session_id[..idx],
            None => &self.session_id,
        }
    }

    pub fn time_label(&self) -> String {
        self.at.format("%H:%M:%S").to_string()
    }
}

/// A way of telling the user the wrapped program is waiting.
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    fn send(&self, alert: &Alert, ctx: &AlertContext) -> Result<(), NotifyError>;
}

/// How channel failures interact.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchStrategy {
    /// Try every channel independently.
    #[default]
    All,
    /// Try channels in order until one succeeds.
    FirstSuccess,
    /// Try channels in order while they keep succeeding.
    Chain,
}

impl DispatchStrategy {
    pub fn label(self) -> &'static str {
        match self {
            DispatchStrategy::All => "all",
            DispatchStrategy::FirstSuccess => "first-success",
            DispatchStrategy::Chain => "chain",
        }
    }
}

/// Result of one channel attempt.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: &'static str,
    pub result: Result<(), NotifyError>,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    /// True when at least one channel delivered.
    pub fn delivered(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_ok())
    }

    pub fn attempted(&self) -> Vec<&'static str> {
        self.outcomes.iter().map(|o| o.channel).collect()
    }
}

pub struct Notifier {
    channels: Vec<Box<dyn Channel>>,
    strategy: DispatchStrategy,
}

impl Notifier {
    pub fn new(channels: Vec<Box<dyn Channel>>, strategy: DispatchStrategy) -> Self {
        Self { channels, strategy }
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send through the channels according to the strategy. Every attempt is
    /// reported on the terminal; nothing is retried.
    pub fn dispatch(&self, alert: &Alert, ctx: &AlertContext) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.channels.is_empty() {
            term::notice_warn("no notification channel is configured");
            return report;
        }

        for channel in &self.channels {
            let result = channel.send(alert, ctx);
            match &result {
                Ok(()) => {
                    debug!(channel = channel.name(), "notification delivered");
                    term::notice(&format!("notification sent via {}", channel.name()));
                }
                Err(e) => {
                    warn!(channel = channel.name(), error = %e, "notification failed");
                    term::notice_warn(&format!("{} notification failed: {e}", channel.name()));
                }
            }
            let ok = result.is_ok();
            report.outcomes.push(ChannelOutcome {
                channel: channel.name(),
                result,
            });

            match self.strategy {
                DispatchStrategy::All => {}
                DispatchStrategy::FirstSuccess if ok => break,
                DispatchStrategy::FirstSuccess => {}
                DispatchStrategy::Chain if !ok => break,
                DispatchStrategy::Chain => {}
            }
        }

        report
    }

    /// Dispatch on a background thread after `delay`, so a slow webhook never
    /// stalls terminal passthrough. Dropping the handle detaches the thread.
    pub fn dispatch_detached(
        self: &Arc<Self>,
        alert: Alert,
        ctx: AlertContext,
        delay: Duration,
    ) -> JoinHandle<DispatchReport> {
        let notifier = Arc::clone(self);
        thread::spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            notifier.dispatch(&alert, &ctx)
        })
    }
}

/// Every channel the wrapper knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    Bell,
    Sound,
    Desktop,
    Dock,
    Banner,
    Teams,
    Pushover,
    Telegram,
    Sms,
    Relay,
}

impl ChannelKind {
    pub fn label(self) -> &'static str {
        match self {
            ChannelKind::Bell => "bell",
            ChannelKind::Sound => "sound",
            ChannelKind::Desktop => "desktop",
            ChannelKind::Dock => "dock",
            ChannelKind::Banner => "banner",
            ChannelKind::Teams => "teams",
            ChannelKind::Pushover => "pushover",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Sms => "sms",
            ChannelKind::Relay => "relay",
        }
    }
}

/// Channel tuning shared across transports.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub sound: String,
    pub timeout: Duration,
    pub context_chars: usize,
    pub pushover_priority: i8,
    pub teams_card: teams::CardStyle,
    pub session_id: String,
}

/// Result of turning configured channel kinds into live channels.
#[derive(Default)]
pub struct BuiltChannels {
    pub channels: Vec<Box<dyn Channel>>,
    pub disabled: Vec<(ChannelKind, NotifyError)>,
    /// Fernet key minted for the relay because none was configured.
    pub generated_key: Option<String>,
}

fn require<'a>(value: &'a Option<String>, var: &'static str) -> Result<&'a str, NotifyError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(NotifyError::NotConfigured(var))
}

/// Build the channels named in `kinds`, in order. A channel whose
/// credentials are missing, or that cannot work on this platform, is
/// reported in `disabled` instead.
pub fn build_channels(kinds: &[ChannelKind], creds: &Credentials, opts: &ChannelOptions) -> BuiltChannels {
    let mut built = BuiltChannels::default();
    for &kind in kinds {
        match build_one(kind, creds, opts, &mut built.generated_key) {
            Ok(channel) => built.channels.push(channel),
            Err(e) => built.disabled.push((kind, e)),
        }
    }
    built
}

fn build_one(
    kind: ChannelKind,
    creds: &Credentials,
    opts: &ChannelOptions,
    generated_key: &mut Option<String>,
) -> Result<Box<dyn Channel>, NotifyError> {
    Ok(match kind {
        ChannelKind::Bell => Box::new(local::Bell),
        ChannelKind::Sound => Box::new(local::Sound::new(opts.sound.clone())),
        ChannelKind::Desktop => Box::new(local::Desktop::new(Some(opts.sound.clone()))),
        ChannelKind::Dock if local::dock_supported() => Box::new(local::Dock::default()),
        ChannelKind::Dock => return Err(NotifyError::Unsupported("dock")),
        ChannelKind::Banner => Box::new(local::Banner),
        ChannelKind::Teams => {
            let webhook = require(&creds.teams_webhook_url, "TEAMS_WEBHOOK_URL")?;
            let card = match opts.teams_card {
                teams::CardStyle::Full => teams::Card::Full {
                    context_chars: opts.context_chars,
                },
                teams::CardStyle::Pointer => {
                    let service = relay_service(creds)?;
                    let (url, _, _) = relay_target(service, creds);
                    teams::Card::Pointer {
                        service,
                        relay_url: url.clone(),
                    }
                }
            };
            Box::new(teams::Teams::new(webhook, card, opts.timeout))
        }
        ChannelKind::Pushover => Box::new(pushover::Pushover::new(
            require(&creds.pushover_user_key, "PUSHOVER_USER_KEY")?,
            require(&creds.pushover_app_token, "PUSHOVER_APP_TOKEN")?,
            opts.pushover_priority,
            opts.context_chars,
            opts.timeout,
        )),
        ChannelKind::Telegram => Box::new(telegram::Telegram::new(
            require(&creds.telegram_bot_token, "TELEGRAM_BOT_TOKEN")?,
            require(&creds.telegram_chat_id, "TELEGRAM_CHAT_ID")?,
            opts.context_chars,
            opts.timeout,
        )),
        ChannelKind::Sms => Box::new(sms::TwilioSms::new(
            require(&creds.twilio_account_sid, "TWILIO_ACCOUNT_SID")?,
            require(&creds.twilio_auth_token, "TWILIO_AUTH_TOKEN")?,
            require(&creds.twilio_from_number, "TWILIO_FROM_NUMBER")?,
            require(&creds.twilio_to_number, "TWILIO_TO_NUMBER")?,
            opts.timeout,
        )),
        ChannelKind::Relay => {
            let service = relay_service(creds)?;
            let (url, var, secret) = relay_target(service, creds);
            let url = require(url, var)?;
            let secret = secret.clone();
            let cipher = match service {
                relay::RelayService::Pipedream => None,
                relay::RelayService::Azure | relay::RelayService::Aws => {
                    let (cipher, minted) = relay::load_or_generate_key(creds.encryption_key.as_deref())?;
                    if minted.is_some() {
                        *generated_key = minted;
                    }
                    Some(cipher)
                }
            };
            Box::new(relay::Relay::new(
                service,
                url,
                secret,
                opts.session_id.clone(),
                cipher,
                opts.timeout,
            ))
        }
    })
}

fn relay_service(creds: &Credentials) -> Result<relay::RelayService, NotifyError> {
    match creds.webhook_service.as_deref() {
        Some(name) => name.parse(),
        None => Ok(relay::RelayService::default()),
    }
}

/// Endpoint, its environment variable, and the secret for `service`.
fn relay_target(
    service: relay::RelayService,
    creds: &Credentials,
) -> (&Option<String>, &'static str, &Option<String>) {
    match service {
        relay::RelayService::Pipedream => (
            &creds.pipedream_webhook_url,
            "PIPEDREAM_WEBHOOK_URL",
            &creds.pipedream_api_key,
        ),
        relay::RelayService::Azure => (
            &creds.azure_logic_app_url,
            "AZURE_LOGIC_APP_URL",
            &creds.azure_shared_key,
        ),
        relay::RelayService::Aws => (&creds.aws_api_gateway_url, "AWS_API_GATEWAY_URL", &creds.aws_api_key),
    }
}

pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(concat!("promptwatch/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Last `max` characters of `text`, on a char boundary.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// First `max` characters of `text`, on a char boundary.
pub fn head_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Markdown message shared by the phone-oriented channels.
pub fn mobile_message(alert: &Alert, ctx: &AlertContext, context_chars: usize) -> String {
    format!(
        "🔔 *{}*\n\nSession: {}\nTime: {}\n\nWaiting at: {}\n\nRecent output:\n```\n{}\n```",
        alert.message,
        ctx.short_session(),
        ctx.time_label(),
        ctx.waiting_line,
        tail_chars(&ctx.recent_output, context_chars),
    )
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        ok: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Channel for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn send(&self, _alert: &Alert, _ctx: &AlertContext) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push(self.name);
            if self.ok {
                Ok(())
            } else {
                Err(NotifyError::NotConfigured(self.name))
            }
        }
    }

    fn notifier(spec: &[(&'static str, bool)], strategy: DispatchStrategy) -> (Notifier, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let channels = spec
            .iter()
            .map(|&(name, ok)| {
                Box::new(Recording {
                    name,
                    ok,
                    calls: Arc::clone(&calls),
                }) as Box<dyn Channel>
            })
            .collect();
        (Notifier::new(channels, strategy), calls)
    }

    fn ctx() -> AlertContext {
        AlertContext::sample("0123456789abcdef", None)
    }

    #[test]
    fn all_strategy_attempts_every_channel() {
        let (n, calls) = notifier(&[("a", false), ("b", true), ("c", false)], DispatchStrategy::All);
        let report = n.dispatch(&Alert::default(), &ctx());
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(report.delivered());
    }

    #[test]
    fn first_success_stops_after_delivery() {
        let (n, calls) = notifier(&[("pushover", false), ("telegram", true), ("x", true)], DispatchStrategy::FirstSuccess);
        let report = n.dispatch(&Alert::default(), &ctx());
        assert_eq!(*calls.lock().unwrap(), vec!["pushover", "telegram"]);
        assert_eq!(report.attempted(), vec!["pushover", "telegram"]);
    }

    #[test]
    fn chain_stops_at_first_failure() {
        let (n, calls) = notifier(&[("relay", false), ("teams", true)], DispatchStrategy::Chain);
        let report = n.dispatch(&Alert::default(), &ctx());
        assert_eq!(*calls.lock().unwrap(), vec!["relay"]);
        assert!(!report.delivered());
    }

    #[test]
    fn empty_notifier_reports_nothing() {
        let n = Notifier::new(Vec::new(), DispatchStrategy::All);
        let report = n.dispatch(&Alert::default(), &ctx());
        assert!(report.outcomes.is_empty());
        assert!(!report.delivered());
    }

    #[test]
    fn detached_dispatch_runs_after_delay() {
        let (n, calls) = notifier(&[("a", true)], DispatchStrategy::All);
        let n = Arc::new(n);
        let handle = n.dispatch_detached(Alert::default(), ctx(), Duration::from_millis(20));
        let report = handle.join().unwrap();
        assert!(report.delivered());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn tail_and_head_respect_char_boundaries() {
        assert_eq!(tail_chars("ab❯cd", 3), "❯cd");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(head_chars("❯❯❯", 2), "❯❯");
        assert_eq!(head_chars("ab", 5), "ab");
    }

    #[test]
    fn short_session_truncates() {
        assert_eq!(ctx().short_session(), "01234567");
        let mut c = ctx();
        c.session_id = "abc".into();
        assert_eq!(c.short_session(), "abc");
    }

    #[test]
    fn mobile_message_includes_waiting_line_and_context_tail() {
        let mut c = ctx();
        c.recent_output = format!("{}END", "x".repeat(500));
        let msg = mobile_message(&Alert::default(), &c, 10);
        assert!(msg.contains("Waiting at: > Waiting for input"));
        assert!(msg.contains("xxxxxxxEND"));
        assert!(!msg.contains(&"x".repeat(20)));
        assert!(msg.starts_with("🔔 *Claude is waiting for your input*"));
    }

    fn options() -> ChannelOptions {
        ChannelOptions {
            sound: "Glass".into(),
            timeout: Duration::from_secs(5),
            context_chars: 300,
            pushover_priority: 1,
            teams_card: teams::CardStyle::Full,
            session_id: "s".into(),
        }
    }

    #[test]
    fn missing_credentials_disable_channels() {
        let built = build_channels(
            &[ChannelKind::Bell, ChannelKind::Teams, ChannelKind::Pushover],
            &Credentials::default(),
            &options(),
        );
        assert_eq!(built.channels.len(), 1);
        assert_eq!(built.channels[0].name(), "bell");
        let disabled: Vec<String> = built
            .disabled
            .iter()
            .map(|(kind, e)| format!("{}: {e}", kind.label()))
            .collect();
        assert_eq!(
            disabled,
            vec![
                "teams: TEAMS_WEBHOOK_URL is not configured",
                "pushover: PUSHOVER_USER_KEY is not configured",
            ]
        );
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let creds = Credentials {
            telegram_bot_token: Some("  ".into()),
            telegram_chat_id: Some("1".into()),
            ..Credentials::default()
        };
        let built = build_channels(&[ChannelKind::Telegram], &creds, &options());
        assert!(built.channels.is_empty());
        assert_eq!(built.disabled.len(), 1);
    }

    #[test]
    fn configured_channels_keep_order() {
        let creds = Credentials {
            pushover_user_key: Some("u".into()),
            pushover_app_token: Some("t".into()),
            telegram_bot_token: Some("b".into()),
            telegram_chat_id: Some("c".into()),
            ..Credentials::default()
        };
        let built = build_channels(&[ChannelKind::Pushover, ChannelKind::Telegram], &creds, &options());
        let names: Vec<_> = built.channels.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["pushover", "telegram"]);
    }

    #[test]
    fn encrypted_relay_mints_a_key_when_missing() {
        let creds = Credentials {
            webhook_service: Some("aws".into()),
            aws_api_gateway_url: Some("https://example.invalid/prod".into()),
            ..Credentials::default()
        };
        let built = build_channels(&[ChannelKind::Relay], &creds, &options());
        assert_eq!(built.channels.len(), 1);
        assert!(built.generated_key.is_some());
    }

    #[test]
    fn unknown_relay_service_is_reported() {
        let creds = Credentials {
            webhook_service: Some("requestbin".into()),
            ..Credentials::default()
        };
        let built = build_channels(&[ChannelKind::Relay], &creds, &options());
        assert!(matches!(built.disabled[0].1, NotifyError::Config(_)));
    }

    #[test]
    fn pointer_teams_card_points_at_relay_without_output() {
        let server = testing::spawn(axum::http::StatusCode::OK);
        let creds = Credentials {
            teams_webhook_url: Some(format!("{}/teams", server.base_url)),
            pipedream_webhook_url: Some("https://hook.example/pd".into()),
            ..Credentials::default()
        };
        let opts = ChannelOptions {
            teams_card: teams::CardStyle::Pointer,
            ..options()
        };
        let built = build_channels(&[ChannelKind::Teams], &creds, &opts);
        assert_eq!(built.channels.len(), 1);
        built.channels[0].send(&Alert::default(), &ctx()).unwrap();

        let body: serde_json::Value = serde_json::from_str(&server.single().body).unwrap();
        let text = body.to_string();
        for needle in ["Create a new feature", "Fix a bug", "What would you like to do?"] {
            assert!(!text.contains(needle), "card leaked {needle:?}");
        }
        let facts = body["sections"][0]["facts"].as_array().unwrap();
        assert_eq!(facts.last().unwrap()["value"], "https://hook.example/pd");
    }

    #[test]
    fn sample_context_has_options() {
        assert_eq!(ctx().options.len(), 4);
    }
}
