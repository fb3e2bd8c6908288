//! Waiting-state monitor.
//!
//! Feeds child output through the prompt rules and decides when a
//! notification should go out.
//!
//! ## State machine
//!
//! ```text
//! NOT_WAITING → prompt-like line, hits reached, cooldown elapsed → WAITING (dispatch)
//! NOT_WAITING → prompt-like line inside the cooldown              → NOT_WAITING (suppressed)
//! WAITING     → user input forwarded                              → NOT_WAITING
//! WAITING     → completed line longer than the substantial length → NOT_WAITING
//! ```

use std::time::{Duration, Instant};

use tracing::debug;

use crate::prompt::{ClassifyTarget, DetectorProfile, PromptRules, extract_options, strip_ansi};
use crate::ring::{LineRing, TextRing};

/// Lines handed to the rules as context for each classification.
const HISTORY_WINDOW: usize = 10;

/// Monitor state.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitState {
    NotWaiting,
    Waiting { since: Instant },
}

/// Tuning for a [`WaitMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub profile: DetectorProfile,
    /// Minimum time between two dispatches.
    pub cooldown: Duration,
    /// Consecutive prompt-like lines needed before dispatching.
    pub hits_required: u32,
    /// Completed lines longer than this (in chars) end a waiting period.
    pub substantial_len: usize,
    pub history_cap: usize,
    pub history_keep: usize,
    pub tail_cap: usize,
    pub tail_keep: usize,
    /// Lines of recent output attached to an alert.
    pub context_lines: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            profile: DetectorProfile::Standard,
            cooldown: Duration::from_secs(3),
            hits_required: 1,
            substantial_len: 20,
            history_cap: 100,
            history_keep: 50,
            tail_cap: 1000,
            tail_keep: 500,
            context_lines: 20,
        }
    }
}

/// Minimum spacing between dispatches.
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.window,
            None => true,
        }
    }

    /// Time left before the next dispatch is allowed.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self
                .window
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// What the monitor hands to the notifier when it decides the child is waiting.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitTrigger {
    /// The prompt-like line, ANSI-stripped and trimmed.
    pub waiting_line: String,
    /// Recent output, oldest line first.
    pub recent_output: String,
    /// Numbered options found in the recent output.
    pub options: Vec<String>,
}

pub struct WaitMonitor {
    config: MonitorConfig,
    rules: PromptRules,
    target: ClassifyTarget,
    state: WaitState,
    cooldown: Cooldown,
    hits: u32,
    lines: LineRing,
    tail: TextRing,
    partial: String,
}

impl WaitMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_rules(config.profile.rules(), config)
    }

    /// Build a monitor with custom rules instead of the profile's.
    pub fn with_rules(rules: PromptRules, config: MonitorConfig) -> Self {
        Self {
            rules,
            target: config.profile.target(),
            state: WaitState::NotWaiting,
            cooldown: Cooldown::new(config.cooldown),
            hits: 0,
            lines: LineRing::new(config.history_cap, config.history_keep),
            tail: TextRing::new(config.tail_cap, config.tail_keep),
            partial: String::new(),
            config,
        }
    }

    pub fn state(&self) -> &WaitState {
        &self.state
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.state, WaitState::Waiting { .. })
    }

    /// Feed a chunk of raw child output.
    ///
    /// Returns a trigger when this chunk tipped the monitor into the waiting
    /// state.
    pub fn observe(&mut self, bytes: &[u8], now: Instant) -> Option<WaitTrigger> {
        let text = self.tail.push_bytes(bytes);
        self.partial.push_str(&text);

        let mut trigger = None;
        while let Some(pos) = self.partial.find('\n') {
            let raw: String = self.partial.drain(..=pos).collect();
            let line = clean_line(&raw);
            if let Some(t) = self.on_line(line, now) {
                trigger.get_or_insert(t);
            }
        }
        self.bound_partial();

        if self.target == ClassifyTarget::TailLine {
            let last = strip_ansi(self.tail.last_line()).trim().to_string();
            let history = self.lines.tail(HISTORY_WINDOW);
            if let Some(t) = self.consider(&last, &history, now) {
                trigger.get_or_insert(t);
            }
        }

        trigger
    }

    /// The user typed something; whatever we were waiting on is answered.
    pub fn on_user_input(&mut self) {
        if self.is_waiting() {
            debug!("user input, leaving waiting state");
        }
        self.state = WaitState::NotWaiting;
        self.hits = 0;
    }

    fn on_line(&mut self, line: String, now: Instant) -> Option<WaitTrigger> {
        let history = self.lines.tail(HISTORY_WINDOW);
        let is_prompt = self.rules.is_prompt(&line, &history);
        let substantial = line.trim().chars().count() > self.config.substantial_len;
        self.lines.push(line.clone());

        if !is_prompt {
            if substantial {
                if self.is_waiting() {
                    debug!("substantial output, leaving waiting state");
                }
                self.state = WaitState::NotWaiting;
                self.hits = 0;
            }
            return None;
        }

        if self.target == ClassifyTarget::EachLine {
            self.consider(&line, &history, now)
        } else {
            None
        }
    }

    fn consider(&mut self, line: &str, history: &[String], now: Instant) -> Option<WaitTrigger> {
        if self.is_waiting() || !self.rules.is_prompt(line, history) {
            return None;
        }

        self.hits += 1;
        if self.hits < self.config.hits_required {
            debug!(hits = self.hits, line = %line.trim(), "prompt-like line, need more hits");
            return None;
        }

        if !self.cooldown.ready(now) {
            debug!(
                remaining_ms = self.cooldown.remaining(now).as_millis() as u64,
                "prompt-like line inside cooldown, notification suppressed"
            );
            return None;
        }

        self.hits = 0;
        self.cooldown.record(now);
        self.state = WaitState::Waiting { since: now };
        debug!(line = %line.trim(), "waiting for input");
        Some(self.trigger(line.trim()))
    }

    fn trigger(&self, waiting_line: &str) -> WaitTrigger {
        let mut recent = self.lines.tail(self.config.context_lines);
        let pending = clean_line(&self.partial);
        if !pending.trim().is_empty() {
            recent.push(pending);
        }
        let recent_output = recent.join("\n");
        WaitTrigger {
            waiting_line: waiting_line.to_string(),
            options: extract_options(&recent_output),
            recent_output,
        }
    }

    fn bound_partial(&mut self) {
        let len = self.partial.chars().count();
        if len > self.config.tail_cap {
            let cut = self
                .partial
                .char_indices()
                .nth(len - self.config.tail_keep)
                .map(|(idx, _)| idx)
                .unwrap_or(0);
            self.partial.drain(..cut);
        }
    }
}

/// Strip line endings and terminal escapes from one output line. A carriage
/// return in the middle means the line was redrawn; only the last version
/// counts.
fn clean_line(raw: &str) -> String {
    let raw = raw.trim_end_matches(['\n', '\r']);
    let visible = raw
        .rsplit('\r')
        .find(|segment| !strip_ansi(segment).trim().is_empty())
        .unwrap_or("");
    strip_ansi(visible)
}
