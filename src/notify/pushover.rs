//! Pushover push notifications.

use std::time::Duration;

use super::{Alert, AlertContext, Channel, NotifyError, mobile_message};

pub const API_URL: &str = "https://api.pushover.net/1/messages.json";

pub struct Pushover {
    endpoint: String,
    user_key: String,
    app_token: String,
    priority: i8,
    context_chars: usize,
    agent: ureq::Agent,
}

impl Pushover {
    pub fn new(
        user_key: impl Into<String>,
        app_token: impl Into<String>,
        priority: i8,
        context_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: API_URL.to_string(),
            user_key: user_key.into(),
            app_token: app_token.into(),
            priority: priority.clamp(-2, 2),
            context_chars,
            agent: super::agent(timeout),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Form fields for one message. Emergency priority (2) must carry a
    /// retry interval and an expiry or Pushover rejects it.
    pub fn form(&self, alert: &Alert, ctx: &AlertContext) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("token", self.app_token.clone()),
            ("user", self.user_key.clone()),
            ("message", mobile_message(alert, ctx, self.context_chars)),
            ("title", format!("{} Alert", alert.title)),
            ("priority", self.priority.to_string()),
            ("timestamp", ctx.at.timestamp().to_string()),
            (
                "sound",
                if self.priority >= 1 { "pushover" } else { "none" }.to_string(),
            ),
        ];
        if self.priority == 2 {
            fields.push(("retry", "30".to_string()));
            fields.push(("expire", "600".to_string()));
        }
        fields
    }
}

impl Channel for Pushover {
    fn name(&self) -> &'static str {
        "pushover"
    }

    fn send(&self, alert: &Alert, ctx: &AlertContext) -> Result<(), NotifyError> {
        let fields = self.form(alert, ctx);
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.agent.post(&self.endpoint).send_form(&pairs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing;
    use axum::http::StatusCode;

    fn pushover(priority: i8) -> Pushover {
        Pushover::new("user-1", "app-1", priority, 300, Duration::from_secs(5))
    }

    fn field<'a>(fields: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        fields.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn high_priority_form() {
        let ctx = AlertContext::sample("abcdef1234", None);
        let fields = pushover(1).form(&Alert::default(), &ctx);
        assert_eq!(field(&fields, "token"), Some("app-1"));
        assert_eq!(field(&fields, "user"), Some("user-1"));
        assert_eq!(field(&fields, "title"), Some("Claude Code Alert"));
        assert_eq!(field(&fields, "priority"), Some("1"));
        assert_eq!(field(&fields, "sound"), Some("pushover"));
        assert_eq!(field(&fields, "retry"), None);
        assert!(field(&fields, "message").unwrap().contains("Session: abcdef12"));
    }

    #[test]
    fn emergency_priority_adds_retry_and_expire() {
        let ctx = AlertContext::sample("s", None);
        let fields = pushover(2).form(&Alert::default(), &ctx);
        assert_eq!(field(&fields, "retry"), Some("30"));
        assert_eq!(field(&fields, "expire"), Some("600"));
    }

    #[test]
    fn low_priority_is_silent_and_clamped() {
        let ctx = AlertContext::sample("s", None);
        let fields = pushover(-5).form(&Alert::default(), &ctx);
        assert_eq!(field(&fields, "priority"), Some("-2"));
        assert_eq!(field(&fields, "sound"), Some("none"));
    }

    #[test]
    fn posts_form_encoded_body() {
        let server = testing::spawn(StatusCode::OK);
        let channel = pushover(1).with_endpoint(format!("{}/1/messages.json", server.base_url));
        channel
            .send(&Alert::default(), &AlertContext::sample("s", None))
            .unwrap();
        let req = server.single();
        assert_eq!(req.path, "/1/messages.json");
        assert_eq!(
            req.headers["content-type"],
            "application/x-www-form-urlencoded"
        );
        assert!(req.body.contains("token=app-1"));
        assert!(req.body.contains("priority=1"));
    }
}
