//! Public tunnel to the command relay through `ngrok`.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, info};

use crate::paths;

/// ngrok's local inspection API.
pub const NGROK_API: &str = "http://localhost:4040/api/tunnels";

const POLL_EVERY: Duration = Duration::from_millis(500);

/// A running `ngrok http <port>`; the process is stopped on drop.
pub struct Tunnel {
    child: Child,
    public_url: String,
}

impl Tunnel {
    /// Start ngrok for `port` and wait up to `wait` for its public URL.
    pub fn start(port: u16, wait: Duration) -> Result<Self> {
        let ngrok = paths::which("ngrok")
            .context("ngrok not found (install it from https://ngrok.com/download)")?;
        let mut child = Command::new(&ngrok)
            .args(["http", &port.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", ngrok.display()))?;

        match wait_for_url(NGROK_API, port, wait) {
            Ok(public_url) => {
                info!(%public_url, "tunnel established");
                Ok(Self { child, public_url })
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_for_url(api: &str, port: u16, wait: Duration) -> Result<String> {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(2))
        .build();
    let deadline = Instant::now() + wait;
    loop {
        match agent.get(api).call() {
            Ok(response) => {
                let listing: Value = response.into_json().context("ngrok API returned invalid JSON")?;
                if let Some(url) = pick_public_url(&listing, port) {
                    return Ok(url);
                }
            }
            Err(e) => debug!(error = %e, "ngrok API not ready"),
        }
        if Instant::now() >= deadline {
            bail!("could not get the ngrok public URL within {}s", wait.as_secs());
        }
        thread::sleep(POLL_EVERY);
    }
}

/// The https tunnel forwarding to `port`, from an `/api/tunnels` listing.
/// Tunnels for other ports (another ngrok session) are ignored.
pub fn pick_public_url(listing: &Value, port: u16) -> Option<String> {
    let suffix = format!(":{port}");
    listing["tunnels"]
        .as_array()?
        .iter()
        .filter(|t| t["proto"] == "https")
        .find(|t| {
            t["config"]["addr"]
                .as_str()
                .is_none_or(|addr| addr.trim_end_matches('/').ends_with(&suffix))
        })
        .and_then(|t| t["public_url"].as_str())
        .map(str::to_string)
}
