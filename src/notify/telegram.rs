//! Telegram bot messages.

use std::time::Duration;

use serde_json::{Value, json};

use super::{Alert, AlertContext, Channel, NotifyError, mobile_message};

pub const API_BASE: &str = "https://api.telegram.org";

pub struct Telegram {
    api_base: String,
    bot_token: String,
    chat_id: String,
    context_chars: usize,
    agent: ureq::Agent,
}

impl Telegram {
    pub fn new(
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        context_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            api_base: API_BASE.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            context_chars,
            agent: super::agent(timeout),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    pub fn payload(&self, alert: &Alert, ctx: &AlertContext) -> Value {
        json!({
            "chat_id": self.chat_id,
            "text": mobile_message(alert, ctx, self.context_chars),
            "parse_mode": "Markdown",
        })
    }
}

impl Channel for Telegram {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send(&self, alert: &Alert, ctx: &AlertContext) -> Result<(), NotifyError> {
        self.agent
            .post(&self.send_message_url())
            .send_json(self.payload(alert, ctx))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing;
    use axum::http::StatusCode;

    fn telegram() -> Telegram {
        Telegram::new("123:abc", "42", 300, Duration::from_secs(5))
    }

    #[test]
    fn url_embeds_token() {
        assert_eq!(
            telegram().send_message_url(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn payload_uses_markdown() {
        let payload = telegram().payload(&Alert::default(), &AlertContext::sample("s", None));
        assert_eq!(payload["chat_id"], "42");
        assert_eq!(payload["parse_mode"], "Markdown");
        assert!(payload["text"].as_str().unwrap().contains("```"));
    }

    #[test]
    fn posts_to_bot_endpoint() {
        let server = testing::spawn(StatusCode::OK);
        let channel = telegram().with_api_base(server.base_url.clone());
        channel
            .send(&Alert::default(), &AlertContext::sample("s", None))
            .unwrap();
        let req = server.single();
        assert_eq!(req.path, "/bot123:abc/sendMessage");
        let body: Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["chat_id"], "42");
    }

    #[test]
    fn unauthorized_is_a_status_error() {
        let server = testing::spawn(StatusCode::UNAUTHORIZED);
        let channel = telegram().with_api_base(server.base_url.clone());
        let err = channel
            .send(&Alert::default(), &AlertContext::sample("s", None))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 401, .. }));
    }
}
