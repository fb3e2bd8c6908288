//! Waiting-for-input heuristics for wrapped assistant output.
//!
//! A [`PromptRules`] value is an ordered rule set applied to one line of
//! ANSI-stripped output. The rules are deliberately cheap string checks:
//! they guess, they do not prove. Each [`DetectorProfile`] reproduces the
//! rule set of one wrapper flavour so the heuristic is a configurable policy
//! rather than a single hard-coded answer.
//!
//! ## Rule order
//!
//! ```text
//! empty            → not a prompt
//! longer than max  → not a prompt
//! veto pattern     → not a prompt
//! exact / trailing / keyword / short / pattern / token → prompt
//! context rule     → keep the positive only after substantive output
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

/// Named rule sets. Each one mirrors a different wrapper flavour.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorProfile {
    /// Prompt symbols, trailing `:`/`?`, keywords and short prompt-ish lines.
    #[default]
    Standard,
    /// Regex prompt set with vetoes and a preceding-output requirement.
    Strict,
    /// Exact prompt symbols plus short lines ending in `:`.
    Basic,
    /// Very short lines containing a prompt token.
    Visual,
    /// Short lines only; needs two consecutive hits.
    Teams,
    /// Prompt symbols, `:` under 50 chars, `waiting`, conversation labels.
    Remote,
}

impl DetectorProfile {
    pub fn label(self) -> &'static str {
        match self {
            DetectorProfile::Standard => "standard",
            DetectorProfile::Strict => "strict",
            DetectorProfile::Basic => "basic",
            DetectorProfile::Visual => "visual",
            DetectorProfile::Teams => "teams",
            DetectorProfile::Remote => "remote",
        }
    }

    pub fn rules(self) -> PromptRules {
        match self {
            DetectorProfile::Standard => PromptRules::standard(),
            DetectorProfile::Strict => PromptRules::strict(),
            DetectorProfile::Basic => PromptRules::basic(),
            DetectorProfile::Visual => PromptRules::visual(),
            DetectorProfile::Teams => PromptRules::teams(),
            DetectorProfile::Remote => PromptRules::remote(),
        }
    }

    /// What part of the output the profile classifies.
    pub fn target(self) -> ClassifyTarget {
        match self {
            DetectorProfile::Standard | DetectorProfile::Remote => ClassifyTarget::TailLine,
            _ => ClassifyTarget::EachLine,
        }
    }
}

/// Whether rules run against every completed line or against the last line
/// of the recent-output buffer after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyTarget {
    EachLine,
    TailLine,
}

/// A line ending in `suffix` counts, optionally only below `max_len` chars.
#[derive(Debug, Clone)]
pub struct TrailingRule {
    pub suffix: char,
    pub max_len: Option<usize>,
}

/// Case-insensitive keyword, optionally requiring a companion character.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub word: &'static str,
    pub requires: Option<char>,
}

/// Lines of at most `max_len` chars containing one of `chars`.
#[derive(Debug, Clone)]
pub struct ShortLineRule {
    pub max_len: usize,
    pub chars: &'static [char],
}

/// Keep a positive only if one of the previous `window - 1` lines is longer
/// than `min_len` chars.
#[derive(Debug, Clone)]
pub struct ContextRule {
    pub window: usize,
    pub min_len: usize,
}

const PROMPT_CHARS: &[char] = &['>', '$', ':', '?', '❯'];

/// Ordered prompt classification rules.
#[derive(Debug, Clone, Default)]
pub struct PromptRules {
    pub max_len: Option<usize>,
    pub veto: Vec<Regex>,
    pub exact: Vec<&'static str>,
    pub trailing: Vec<TrailingRule>,
    pub keywords: Vec<KeywordRule>,
    pub short_line: Option<ShortLineRule>,
    pub patterns: Vec<Regex>,
    pub tokens: Vec<&'static str>,
    pub context: Option<ContextRule>,
}

impl PromptRules {
    /// Classify `line`. `history` holds the lines seen before it, oldest
    /// first; only the context rule looks at it.
    pub fn is_prompt(&self, line: &str, history: &[String]) -> bool {
        let stripped = strip_ansi(line);
        let trimmed = stripped.trim();
        if trimmed.is_empty() {
            return false;
        }

        let len = trimmed.chars().count();
        if self.max_len.is_some_and(|max| len > max) {
            return false;
        }

        if self.veto.iter().any(|re| re.is_match(&stripped)) {
            return false;
        }

        if !self.matches_positive(trimmed, len) {
            return false;
        }

        match &self.context {
            Some(rule) => {
                let preceding = rule.window.saturating_sub(1);
                let start = history.len().saturating_sub(preceding);
                history[start..]
                    .iter()
                    .any(|prev| strip_ansi(prev).trim().chars().count() > rule.min_len)
            }
            None => true,
        }
    }

    fn matches_positive(&self, trimmed: &str, len: usize) -> bool {
        if self.exact.iter().any(|sym| *sym == trimmed) {
            return true;
        }

        if self.trailing.iter().any(|rule| {
            trimmed.ends_with(rule.suffix) && rule.max_len.is_none_or(|max| len < max)
        }) {
            return true;
        }

        let lower = trimmed.to_lowercase();
        if self.keywords.iter().any(|rule| {
            lower.contains(rule.word) && rule.requires.is_none_or(|c| trimmed.contains(c))
        }) {
            return true;
        }

        if let Some(rule) = &self.short_line {
            if len <= rule.max_len && trimmed.contains(rule.chars) {
                return true;
            }
        }

        if self.patterns.iter().any(|re| re.is_match(trimmed)) {
            return true;
        }

        self.tokens.iter().any(|token| trimmed.contains(token))
    }

    /// Prompt symbols, trailing `:`/`?`, `waiting`, `enter …:` and short
    /// lines holding a prompt character.
    pub fn standard() -> Self {
        Self {
            exact: vec![">", "❯", "$"],
            trailing: vec![
                TrailingRule {
                    suffix: ':',
                    max_len: None,
                },
                TrailingRule {
                    suffix: '?',
                    max_len: None,
                },
            ],
            keywords: vec![
                KeywordRule {
                    word: "waiting",
                    requires: None,
                },
                KeywordRule {
                    word: "enter",
                    requires: Some(':'),
                },
            ],
            short_line: Some(ShortLineRule {
                max_len: 4,
                chars: PROMPT_CHARS,
            }),
            ..Self::default()
        }
    }

    /// Regex prompt set guarded by vetoes for code, comments and log lines.
    pub fn strict() -> Self {
        Self {
            veto: vec![
                Regex::new(r"```").unwrap(),
                Regex::new(r"^\s*#").unwrap(),
                Regex::new(r"^\s*//").unwrap(),
                Regex::new(r"(?i)Error:|Warning:|Info:").unwrap(),
            ],
            patterns: vec![
                Regex::new(r"^>+\s*$").unwrap(),
                Regex::new(r"^❯+\s*$").unwrap(),
                Regex::new(r"^\$\s*$").unwrap(),
                Regex::new(r"(?i)^(Human|User|You):\s*$").unwrap(),
                Regex::new(r"(?i)waiting for (input|response|you)").unwrap(),
                Regex::new(r"(?i)(Type|Enter|Input|Provide).*:?\s*$").unwrap(),
                Regex::new(r"^\s*\[\s*\]\s*$").unwrap(),
                Regex::new(r"(?i)continue\?.*$").unwrap(),
            ],
            short_line: Some(ShortLineRule {
                max_len: 3,
                chars: PROMPT_CHARS,
            }),
            context: Some(ContextRule {
                window: 5,
                min_len: 20,
            }),
            ..Self::default()
        }
    }

    /// Exact prompt symbols and conversation labels, or a short line ending in `:`.
    pub fn basic() -> Self {
        Self {
            exact: vec![">", "❯", "$", "Human:", "You:"],
            trailing: vec![TrailingRule {
                suffix: ':',
                max_len: Some(20),
            }],
            ..Self::default()
        }
    }

    pub fn visual() -> Self {
        Self {
            max_len: Some(9),
            tokens: vec![">", "❯", "$", "Human:", "You:"],
            ..Self::default()
        }
    }

    pub fn teams() -> Self {
        Self {
            max_len: Some(19),
            exact: vec![">", "❯", "$", "Human:", "User:", "You:"],
            keywords: vec![KeywordRule {
                word: "waiting",
                requires: None,
            }],
            patterns: vec![
                Regex::new(r"^.*Human.*:$").unwrap(),
                Regex::new(r"^(?:>+|❯+|\$)\s*$").unwrap(),
            ],
            ..Self::default()
        }
    }

    pub fn remote() -> Self {
        Self {
            exact: vec![">", "❯", "$"],
            trailing: vec![TrailingRule {
                suffix: ':',
                max_len: Some(50),
            }],
            keywords: vec![KeywordRule {
                word: "waiting",
                requires: None,
            }],
            patterns: vec![Regex::new(r"^\s*(?:Human|You|User):\s*$").unwrap()],
            ..Self::default()
        }
    }
}

/// Strip ANSI escape sequences from PTY output.
pub fn strip_ansi(input: &str) -> String {
    // CSI sequences (ESC [ ... final byte), OSC sequences (ESC ] ... BEL/ST),
    // and simple two-byte escapes.
    static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]")
            .unwrap()
    });
    ANSI_RE.replace_all(input, "").to_string()
}

/// Pull numbered menu options (`1. foo`, `2) bar`, `[3] baz`) out of recent
/// output. Numbers outside 1..=10 are ignored; gaps are dropped.
pub fn extract_options(text: &str) -> Vec<String> {
    static OPTION_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*\[?(\d+)\]?[.)\s]\s*(.+)").unwrap());

    let mut slots: Vec<Option<String>> = Vec::new();
    for line in text.lines() {
        let line = strip_ansi(line);
        let Some(caps) = OPTION_RE.captures(&line) else {
            continue;
        };
        let Ok(num) = caps[1].parse::<usize>() else {
            continue;
        };
        if !(1..=10).contains(&num) {
            continue;
        }
        if slots.len() < num {
            slots.resize(num, None);
        }
        slots[num - 1] = Some(caps[2].trim().to_string());
    }
    slots.into_iter().flatten().filter(|s| !s.is_empty()).collect()
}
