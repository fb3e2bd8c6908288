//! Setup instructions for each remote channel, printed by `promptwatch setup`.

use crate::config::Credentials;
use crate::notify::ChannelKind;

pub struct Guide {
    pub title: &'static str,
    pub steps: &'static [&'static str],
    /// Environment variables (or `[credentials]` keys) the channel reads.
    pub env: &'static [&'static str],
}

const TEAMS: Guide = Guide {
    title: "Microsoft Teams (incoming webhook)",
    steps: &[
        "Open the target channel, then Connectors (or Workflows)",
        "Add an Incoming Webhook and give it a name",
        "Copy the webhook URL",
    ],
    env: &["TEAMS_WEBHOOK_URL"],
};

const PUSHOVER: Guide = Guide {
    title: "Pushover (one-time purchase)",
    steps: &[
        "Install the Pushover app on your phone",
        "Create an account at https://pushover.net",
        "Copy your User Key from the dashboard",
        "Create a new Application/API Token",
    ],
    env: &["PUSHOVER_USER_KEY", "PUSHOVER_APP_TOKEN"],
};

const TELEGRAM: Guide = Guide {
    title: "Telegram bot (free)",
    steps: &[
        "Message @BotFather on Telegram and create a bot with /newbot",
        "Copy the bot token",
        "Send your bot a message to start the conversation",
        "Find your chat id: curl https://api.telegram.org/bot<TOKEN>/getUpdates",
    ],
    env: &["TELEGRAM_BOT_TOKEN", "TELEGRAM_CHAT_ID"],
};

const TWILIO: Guide = Guide {
    title: "Twilio SMS",
    steps: &[
        "Create an account at https://www.twilio.com",
        "Buy or verify a sending number",
        "Copy the Account SID and Auth Token from the console",
    ],
    env: &[
        "TWILIO_ACCOUNT_SID",
        "TWILIO_AUTH_TOKEN",
        "TWILIO_FROM_NUMBER",
        "TWILIO_TO_NUMBER",
    ],
};

const RELAY: Guide = Guide {
    title: "Signed webhook relay (pipedream | azure | aws)",
    steps: &[
        "pipedream: create a workflow with an HTTP trigger and copy its URL",
        "azure: create a Logic App with an HTTP trigger and a shared key",
        "aws: create an API Gateway + Lambda with API key authentication",
        "Set WEBHOOK_SERVICE to the service you chose",
        "azure and aws payloads are encrypted; set CLAUDE_ENCRYPTION_KEY to keep the key stable",
    ],
    env: &[
        "WEBHOOK_SERVICE",
        "PIPEDREAM_WEBHOOK_URL",
        "PIPEDREAM_API_KEY",
        "AZURE_LOGIC_APP_URL",
        "AZURE_SHARED_KEY",
        "AWS_API_GATEWAY_URL",
        "AWS_API_KEY",
        "CLAUDE_ENCRYPTION_KEY",
    ],
};

const NGROK: Guide = Guide {
    title: "ngrok tunnel (remote preset)",
    steps: &[
        "Install ngrok from https://ngrok.com/download",
        "Run `ngrok config add-authtoken <token>` once",
        "Teams buttons then post replies to <public-url>/command",
    ],
    env: &[],
};

pub fn guides() -> [&'static Guide; 6] {
    [&TEAMS, &PUSHOVER, &TELEGRAM, &TWILIO, &RELAY, &NGROK]
}

/// The guide covering a channel. Local channels need no setup.
pub fn guide_for(kind: ChannelKind) -> Option<&'static Guide> {
    match kind {
        ChannelKind::Teams => Some(&TEAMS),
        ChannelKind::Pushover => Some(&PUSHOVER),
        ChannelKind::Telegram => Some(&TELEGRAM),
        ChannelKind::Sms => Some(&TWILIO),
        ChannelKind::Relay => Some(&RELAY),
        ChannelKind::Bell
        | ChannelKind::Sound
        | ChannelKind::Desktop
        | ChannelKind::Dock
        | ChannelKind::Banner => None,
    }
}

fn is_set(credentials: &Credentials, var: &str) -> bool {
    credentials
        .fields()
        .iter()
        .any(|(name, value)| *name == var && value.as_deref().is_some_and(|v| !v.trim().is_empty()))
}

pub fn render(credentials: &Credentials) -> String {
    let mut out = String::from("=== promptwatch setup ===\n");
    for guide in guides() {
        out.push_str(&format!("\n{}\n", guide.title));
        for (i, step) in guide.steps.iter().enumerate() {
            out.push_str(&format!("  {}. {step}\n", i + 1));
        }
        for var in guide.env {
            let mark = if is_set(credentials, var) { "set" } else { "unset" };
            out.push_str(&format!("     export {var}='...'   ({mark})\n"));
        }
    }
    out.push_str(
        "\nValues can also go under [credentials] in .promptwatch/config.toml \
         (lowercase names, without the CLAUDE_ prefix). The environment wins.\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_remote_channel_has_a_guide() {
        for kind in [
            ChannelKind::Teams,
            ChannelKind::Pushover,
            ChannelKind::Telegram,
            ChannelKind::Sms,
            ChannelKind::Relay,
        ] {
            assert!(guide_for(kind).is_some(), "{kind:?}");
        }
        assert!(guide_for(ChannelKind::Bell).is_none());
    }

    #[test]
    fn guide_variables_are_known_credentials() {
        let creds = Credentials::default();
        let known: Vec<&str> = creds.fields().iter().map(|(name, _)| *name).collect();
        for guide in guides() {
            for var in guide.env {
                assert!(known.contains(var), "{var}");
            }
        }
    }

    #[test]
    fn render_marks_configured_values() {
        let creds = Credentials {
            pushover_user_key: Some("u".into()),
            ..Credentials::default()
        };
        let text = render(&creds);
        assert!(text.contains("export PUSHOVER_USER_KEY='...'   (set)"));
        assert!(text.contains("export PUSHOVER_APP_TOKEN='...'   (unset)"));
        assert!(text.contains("ngrok tunnel"));
    }
}
