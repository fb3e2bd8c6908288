//! SMS through the Twilio REST API.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use super::{Alert, AlertContext, Channel, NotifyError, head_chars};

pub const API_BASE: &str = "https://api.twilio.com";

/// Twilio refuses message bodies longer than this.
pub const MAX_BODY_CHARS: usize = 1600;

pub struct TwilioSms {
    api_base: String,
    account_sid: String,
    auth_token: String,
    from: String,
    to: String,
    agent: ureq::Agent,
}

impl TwilioSms {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_base: API_BASE.to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from: from.into(),
            to: to.into(),
            agent: super::agent(timeout),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }

    fn authorization(&self) -> String {
        let raw = format!("{}:{}", self.account_sid, self.auth_token);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

/// Text message with the waiting line and a numbered reply menu.
pub fn sms_body(ctx: &AlertContext) -> String {
    let mut body = format!("Claude waiting:\n{}\n", ctx.waiting_line);
    if !ctx.options.is_empty() {
        body.push_str("\nReply with number:\n");
        for (i, option) in ctx.options.iter().take(5).enumerate() {
            body.push_str(&format!("{}. {}\n", i + 1, head_chars(option, 30)));
        }
    }
    head_chars(&body, MAX_BODY_CHARS).to_string()
}

impl Channel for TwilioSms {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn send(&self, _alert: &Alert, ctx: &AlertContext) -> Result<(), NotifyError> {
        let body = sms_body(ctx);
        let response = self
            .agent
            .post(&self.messages_url())
            .set("Authorization", &self.authorization())
            .send_form(&[
                ("Body", body.as_str()),
                ("From", self.from.as_str()),
                ("To", self.to.as_str()),
            ])?;
        if let Ok(created) = response.into_json::<serde_json::Value>() {
            debug!(sid = %created["sid"], "sms queued");
        }
        Ok(())
    }
}
