//! Signed webhook relay: Pipedream, Azure Logic Apps or AWS API Gateway.
//!
//! Event data is signed with HMAC-SHA256 over its key-sorted JSON
//! serialization and, for the Azure and AWS targets, encrypted with Fernet
//! before it leaves the machine.
//!
//! The signed bytes use the separators `", "` and `": "` and escape every
//! character outside printable ASCII as `\uXXXX`, so receivers that verify
//! with Python's `json.dumps(payload, sort_keys=True)` see the same message.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use fernet::Fernet;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::Sha256;

use super::{Alert, AlertContext, Channel, NotifyError, tail_chars};

type HmacSha256 = Hmac<Sha256>;

const EVENT_CONTEXT_CHARS: usize = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayService {
    #[default]
    Pipedream,
    Azure,
    Aws,
}

impl RelayService {
    pub fn label(self) -> &'static str {
        match self {
            RelayService::Pipedream => "pipedream",
            RelayService::Azure => "azure",
            RelayService::Aws => "aws",
        }
    }
}

impl fmt::Display for RelayService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RelayService {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pipedream" => Ok(RelayService::Pipedream),
            "azure" => Ok(RelayService::Azure),
            "aws" => Ok(RelayService::Aws),
            other => Err(NotifyError::Config(format!(
                "unknown webhook service '{other}' (expected pipedream, azure or aws)"
            ))),
        }
    }
}

/// JSON formatter producing the bytes receivers verify signatures over.
struct CanonicalFormatter;

impl serde_json::ser::Formatter for CanonicalFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// Key-sorted, ASCII-only JSON text of `value`.
pub fn canonical_json(value: &Value) -> Result<String, NotifyError> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter);
    value
        .serialize(&mut ser)
        .map_err(|e| NotifyError::Encode(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| NotifyError::Encode(e.to_string()))
}

/// Hex HMAC-SHA256 of the canonical JSON form of `payload`.
pub fn sign(payload: &Value, secret: &str) -> Result<String, NotifyError> {
    let message = canonical_json(payload)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Encode(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Use the configured Fernet key, or mint a fresh one. The second element is
/// the new key when one had to be generated, so the caller can show it.
pub fn load_or_generate_key(configured: Option<&str>) -> Result<(Fernet, Option<String>), NotifyError> {
    match configured {
        Some(key) => Fernet::new(key)
            .map(|f| (f, None))
            .ok_or_else(|| NotifyError::Config("CLAUDE_ENCRYPTION_KEY is not a valid Fernet key".into())),
        None => {
            let key = Fernet::generate_key();
            let fernet = Fernet::new(&key)
                .ok_or_else(|| NotifyError::Encode("generated Fernet key was rejected".into()))?;
            Ok((fernet, Some(key)))
        }
    }
}

pub struct Relay {
    service: RelayService,
    url: String,
    /// Pipedream bearer token, Azure shared signing key, or AWS API key.
    secret: Option<String>,
    session_id: String,
    cipher: Option<Fernet>,
    agent: ureq::Agent,
}

impl Relay {
    pub fn new(
        service: RelayService,
        url: impl Into<String>,
        secret: Option<String>,
        session_id: impl Into<String>,
        cipher: Option<Fernet>,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            url: url.into(),
            secret,
            session_id: session_id.into(),
            cipher,
            agent: super::agent(timeout),
        }
    }

    pub fn service(&self) -> RelayService {
        self.service
    }

    fn seal(&self, data: &Value) -> Result<Value, NotifyError> {
        match &self.cipher {
            Some(cipher) => {
                let plain = canonical_json(data)?;
                Ok(Value::String(cipher.encrypt(plain.as_bytes())))
            }
            None => Ok(data.clone()),
        }
    }

    /// Headers and body for one delivery.
    pub fn request(&self, ctx: &AlertContext) -> Result<(Vec<(&'static str, String)>, Value), NotifyError> {
        let data = event_data(ctx);
        let mut headers = Vec::new();
        let body = match self.service {
            RelayService::Pipedream => {
                headers.push(("X-Session-ID", self.session_id.clone()));
                headers.push(("X-Timestamp", ctx.at.timestamp().to_string()));
                if let Some(key) = &self.secret {
                    headers.push(("Authorization", format!("Bearer {key}")));
                }
                headers.push(("X-Signature", sign(&data, &self.session_id)?));
                data
            }
            RelayService::Azure => {
                let payload = json!({
                    "sessionId": self.session_id,
                    "timestamp": Utc::now().to_rfc3339(),
                    "event": "claude_waiting",
                    "data": self.seal(&data)?,
                });
                if let Some(key) = &self.secret {
                    headers.push(("X-Signature", sign(&payload, key)?));
                }
                payload
            }
            RelayService::Aws => {
                headers.push(("x-api-key", self.secret.clone().unwrap_or_default()));
                json!({
                    "sessionId": self.session_id,
                    "timestamp": ctx.at.timestamp(),
                    "encryptedData": self.seal(&data)?,
                })
            }
        };
        Ok((headers, body))
    }
}

/// What the relay learns about a waiting session.
pub fn event_data(ctx: &AlertContext) -> Value {
    json!({
        "context": tail_chars(&ctx.recent_output, EVENT_CONTEXT_CHARS),
        "options": ctx.options,
        "timestamp": ctx.at.timestamp(),
    })
}

impl Channel for Relay {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn send(&self, _alert: &Alert, ctx: &AlertContext) -> Result<(), NotifyError> {
        let (headers, body) = self.request(ctx)?;
        let mut request = self.agent.post(&self.url);
        for (name, value) in &headers {
            request = request.set(name, value);
        }
        request.send_json(body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing;
    use axum::http::StatusCode;

    fn relay(service: RelayService, secret: Option<&str>, cipher: Option<Fernet>) -> Relay {
        Relay::new(
            service,
            "http://127.0.0.1:9/unused",
            secret.map(str::to_string),
            "session-1",
            cipher,
            Duration::from_secs(5),
        )
    }

    fn header<'a>(headers: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        headers.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn canonical_json_matches_python_dumps() {
        let payload = json!({"b": 1, "a": "\u{e9}", "c": [1, "x\u{1f514}"], "d": "tab\there\u{7f}"});
        assert_eq!(
            canonical_json(&payload).unwrap(),
            r#"{"a": "\u00e9", "b": 1, "c": [1, "x\ud83d\udd14"], "d": "tab\there\u007f"}"#
        );
    }

    #[test]
    fn signature_matches_python_hmac() {
        // hmac.new(b"k", json.dumps(payload, sort_keys=True).encode(), sha256)
        let payload = json!({"b": 1, "a": "\u{e9}", "c": [1, "x\u{1f514}"], "d": "tab\there\u{7f}"});
        assert_eq!(
            sign(&payload, "k").unwrap(),
            "75214c5d7281c44e49cb7c5aec1bba73a66712f5c56f6861197f54b8f3424e22"
        );
    }

    #[test]
    fn service_parsing() {
        assert_eq!("Azure".parse::<RelayService>().unwrap(), RelayService::Azure);
        assert!(matches!(
            "requestbin".parse::<RelayService>(),
            Err(NotifyError::Config(_))
        ));
    }

    #[test]
    fn event_data_bounds_context() {
        let mut ctx = AlertContext::sample("s", None);
        ctx.recent_output = "z".repeat(2000);
        let data = event_data(&ctx);
        assert_eq!(data["context"].as_str().unwrap().len(), EVENT_CONTEXT_CHARS);
        assert_eq!(data["options"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn pipedream_signs_with_session_id() {
        let ctx = AlertContext::sample("s", None);
        let (headers, body) = relay(RelayService::Pipedream, Some("pd-key"), None)
            .request(&ctx)
            .unwrap();
        assert_eq!(header(&headers, "Authorization"), Some("Bearer pd-key"));
        assert_eq!(header(&headers, "X-Session-ID"), Some("session-1"));
        assert_eq!(
            header(&headers, "X-Signature").unwrap(),
            sign(&body, "session-1").unwrap()
        );
        assert_eq!(body, event_data(&ctx));
    }

    #[test]
    fn azure_encrypts_data() {
        let key = Fernet::generate_key();
        let cipher = Fernet::new(&key).unwrap();
        let ctx = AlertContext::sample("s", None);
        let (headers, body) = relay(RelayService::Azure, Some("shared"), Some(cipher))
            .request(&ctx)
            .unwrap();
        assert_eq!(body["event"], "claude_waiting");
        let token = body["data"].as_str().unwrap();
        let plain = Fernet::new(&key).unwrap().decrypt(token).unwrap();
        let data: Value = serde_json::from_slice(&plain).unwrap();
        assert_eq!(data, event_data(&ctx));
        assert_eq!(header(&headers, "X-Signature").unwrap(), sign(&body, "shared").unwrap());
    }

    #[test]
    fn aws_without_cipher_sends_plain_data() {
        let ctx = AlertContext::sample("s", None);
        let (headers, body) = relay(RelayService::Aws, Some("aws-key"), None)
            .request(&ctx)
            .unwrap();
        assert_eq!(header(&headers, "x-api-key"), Some("aws-key"));
        assert_eq!(body["encryptedData"], event_data(&ctx));
        assert_eq!(body["sessionId"], "session-1");
    }

    #[test]
    fn key_is_generated_when_missing() {
        let (_, generated) = load_or_generate_key(None).unwrap();
        let generated = generated.unwrap();
        assert!(Fernet::new(&generated).is_some());
        let (_, none) = load_or_generate_key(Some(&generated)).unwrap();
        assert!(none.is_none());
        assert!(load_or_generate_key(Some("not-a-key")).is_err());
    }

    #[test]
    fn delivers_signed_post() {
        let server = testing::spawn(StatusCode::OK);
        let channel = Relay::new(
            RelayService::Pipedream,
            format!("{}/hook", server.base_url),
            None,
            "session-1",
            None,
            Duration::from_secs(5),
        );
        channel
            .send(&Alert::default(), &AlertContext::sample("s", None))
            .unwrap();
        let req = server.single();
        assert_eq!(req.path, "/hook");
        let body: Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(
            req.headers["x-signature"].to_str().unwrap(),
            sign(&body, "session-1").unwrap()
        );
    }
}
