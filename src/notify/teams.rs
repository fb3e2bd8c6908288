//! Microsoft Teams incoming-webhook channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::relay::RelayService;
use super::{Alert, AlertContext, Channel, NotifyError, head_chars, tail_chars};

const MAX_ACTIONS: usize = 5;

/// How much of the session a card reveals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardStyle {
    /// Recent output, option facts and reply buttons.
    #[default]
    Full,
    /// Only a pointer to the relay that received the encrypted event.
    Pointer,
}

impl CardStyle {
    pub fn label(self) -> &'static str {
        match self {
            CardStyle::Full => "full",
            CardStyle::Pointer => "pointer",
        }
    }
}

/// Card body, resolved once when the channel is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Card {
    Full { context_chars: usize },
    Pointer { service: RelayService, relay_url: Option<String> },
}

pub struct Teams {
    webhook_url: String,
    card: Card,
    agent: ureq::Agent,
}

impl Teams {
    pub fn new(webhook_url: impl Into<String>, card: Card, timeout: Duration) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            card,
            agent: super::agent(timeout),
        }
    }
}

impl Channel for Teams {
    fn name(&self) -> &'static str {
        "teams"
    }

    fn send(&self, alert: &Alert, ctx: &AlertContext) -> Result<(), NotifyError> {
        let card = match &self.card {
            Card::Full { context_chars } => message_card(alert, ctx, *context_chars),
            Card::Pointer { service, relay_url } => pointer_card(ctx, *service, relay_url.as_deref()),
        };
        self.agent.post(&self.webhook_url).send_json(card)?;
        Ok(())
    }
}

/// Legacy connector MessageCard. Numbered options become facts and, when the
/// command relay is reachable, one-click `HttpPOST` actions.
pub fn message_card(alert: &Alert, ctx: &AlertContext, context_chars: usize) -> Value {
    let mut facts = vec![
        json!({"name": "Session", "value": ctx.short_session()}),
        json!({"name": "Time", "value": ctx.time_label()}),
        json!({"name": "Status", "value": "Waiting for input"}),
    ];
    for (i, option) in ctx.options.iter().take(MAX_ACTIONS).enumerate() {
        facts.push(json!({"name": format!("Option {}", i + 1), "value": head_chars(option, 100)}));
    }
    if let Some(url) = &ctx.reply_url {
        facts.push(json!({"name": "Response URL", "value": command_url(url)}));
    }

    let mut text = String::new();
    if !ctx.waiting_line.is_empty() {
        text.push_str(&format!("**Waiting at:** `{}`\n\n", ctx.waiting_line));
    }
    text.push_str(&format!(
        "**Recent output:**\n```\n{}\n```",
        tail_chars(&ctx.recent_output, context_chars)
    ));

    let mut card = json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": "FF6B6B",
        "summary": alert.message,
        "sections": [{
            "activityTitle": format!("🔔 {} Alert", alert.title),
            "activitySubtitle": alert.message,
            "facts": facts,
            "markdown": true,
            "text": text,
        }],
    });

    if let Some(url) = &ctx.reply_url {
        card["potentialAction"] = Value::Array(actions(&ctx.options, &command_url(url)));
    }
    card
}

/// Card that carries no session output, sent after the relay delivered the
/// encrypted event.
pub fn pointer_card(ctx: &AlertContext, service: RelayService, relay_url: Option<&str>) -> Value {
    let mut facts = vec![
        json!({"name": "Session", "value": format!("{}...", ctx.short_session())}),
        json!({"name": "Time", "value": ctx.time_label()}),
        json!({"name": "Status", "value": "Waiting for input"}),
    ];
    if let Some(url) = relay_url {
        facts.push(json!({"name": "Response URL", "value": url}));
    }
    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": "FF6B6B",
        "summary": "Claude needs input",
        "sections": [{
            "activityTitle": "🔔 Claude Secure Alert",
            "activitySubtitle": format!("Secure notification via {service}"),
            "facts": facts,
            "text": format!("Claude is waiting. Check {service} for details."),
        }],
    })
}

fn command_url(base: &str) -> String {
    format!("{}/command", base.trim_end_matches('/'))
}

fn actions(options: &[String], target: &str) -> Vec<Value> {
    let mut actions: Vec<Value> = options
        .iter()
        .take(MAX_ACTIONS)
        .enumerate()
        .map(|(i, option)| {
            json!({
                "@type": "HttpPOST",
                "name": format!("Option {}: {}", i + 1, head_chars(option, 50)),
                "target": target,
                "body": json!({"command": option, "source": "teams"}).to_string(),
            })
        })
        .collect();
    actions.push(json!({
        "@type": "HttpPOST",
        "name": "Send custom command...",
        "target": target,
        "body": json!({"command": "CUSTOM", "source": "teams"}).to_string(),
    }));
    actions
}
