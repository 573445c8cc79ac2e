//! Reply parsing
//!
//! Messages that arrive while a conversation has an active session are
//! parsed against fixed tables: `/plan` subcommands, bare affirmatives and
//! negatives (Italian-first, English accepted) and numbered-choice digits.
//! Anything else is treated as free text and mined for requirement values.

use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;

use maestro_core::types::{Requirement, RequirementKind};

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("url pattern"));
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").expect("number pattern"));

const AFFIRMATIVES: &[&str] = &[
    "confirm", "conferma", "confermo", "ok", "okay", "sì", "si", "yes", "va bene", "procedi",
    "vai", "go",
];
const NEGATIVES: &[&str] = &[
    "cancel", "annulla", "no", "stop", "ferma", "lascia stare", "cancella tutto",
];
const DRY_RUNS: &[&str] = &["dryrun", "dry run", "simula", "simulazione", "anteprima"];
const RETRIES: &[&str] = &["retry", "riprova"];

/// A reply recognized by the fixed tables
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    Confirm,
    Cancel,
    DryRun,
    /// `/plan edit key:<k> value:<json>`
    Edit {
        key: String,
        value: Value,
    },
    /// Retry, optionally targeting a specific step
    Retry {
        step_id: Option<String>,
    },
    /// Single-digit numbered choice (1-based)
    Choice(usize),
    /// Not a recognized command; treat as free text
    FreeText,
}

/// Parse a message received while a session is active.
pub fn parse_reply(text: &str) -> ParsedReply {
    let trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix("/plan") {
        return parse_plan_command(rest.trim());
    }

    let lowered = trimmed.to_lowercase();
    if AFFIRMATIVES.contains(&lowered.as_str()) {
        return ParsedReply::Confirm;
    }
    if NEGATIVES.contains(&lowered.as_str()) {
        return ParsedReply::Cancel;
    }
    if DRY_RUNS.contains(&lowered.as_str()) {
        return ParsedReply::DryRun;
    }
    if RETRIES.contains(&lowered.as_str()) {
        return ParsedReply::Retry { step_id: None };
    }

    // a bare single digit picks from a numbered prompt
    if lowered.len() == 1 {
        if let Some(digit) = lowered.chars().next().and_then(|c| c.to_digit(10)) {
            if digit > 0 {
                return ParsedReply::Choice(digit as usize);
            }
        }
    }

    ParsedReply::FreeText
}

fn parse_plan_command(rest: &str) -> ParsedReply {
    let mut parts = rest.split_whitespace();
    match parts.next() {
        Some("confirm") => ParsedReply::Confirm,
        Some("cancel") => ParsedReply::Cancel,
        Some("dryrun") => ParsedReply::DryRun,
        Some("retry") => {
            let step_id = parts
                .find_map(|token| token.strip_prefix("step:"))
                .map(str::to_string);
            ParsedReply::Retry { step_id }
        }
        Some("edit") => {
            let mut key = None;
            let mut value = None;
            for token in parts {
                if let Some(k) = token.strip_prefix("key:") {
                    key = Some(k.to_string());
                } else if let Some(raw) = token.strip_prefix("value:") {
                    value = Some(
                        serde_json::from_str(raw)
                            .unwrap_or_else(|_| Value::String(raw.to_string())),
                    );
                }
            }
            match (key, value) {
                (Some(key), Some(value)) => ParsedReply::Edit { key, value },
                _ => ParsedReply::FreeText,
            }
        }
        _ => ParsedReply::FreeText,
    }
}

/// Mine free text for values matching the given requirements.
///
/// Typed kinds are matched first (links, numbers, booleans); when exactly
/// one text-like requirement remains and nothing typed matched, the whole
/// trimmed message is taken as its value.
pub fn extract_values(text: &str, requirements: &[Requirement]) -> Map<String, Value> {
    let trimmed = text.trim();
    let lowered = trimmed.to_lowercase();
    let mut values = Map::new();

    for requirement in requirements {
        match requirement.kind {
            RequirementKind::Link => {
                if let Some(m) = URL_RE.find(trimmed) {
                    values.insert(
                        requirement.field.clone(),
                        Value::String(m.as_str().to_string()),
                    );
                }
            }
            RequirementKind::Number => {
                if let Some(number) = NUMBER_RE
                    .find(trimmed)
                    .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
                    .and_then(Number::from_f64)
                {
                    values.insert(requirement.field.clone(), Value::Number(number));
                }
            }
            RequirementKind::Boolean => {
                if AFFIRMATIVES.iter().any(|a| lowered.contains(a)) {
                    values.insert(requirement.field.clone(), Value::Bool(true));
                } else if NEGATIVES.iter().any(|n| lowered.contains(n)) {
                    values.insert(requirement.field.clone(), Value::Bool(false));
                }
            }
            RequirementKind::Text | RequirementKind::EntityRef => {}
        }
    }

    // a bare digit is a numbered choice, never a text value
    let bare_digit = trimmed.len() == 1 && trimmed.chars().all(|c| c.is_ascii_digit());
    if values.is_empty() && !trimmed.is_empty() && !bare_digit {
        let text_like: Vec<&Requirement> = requirements
            .iter()
            .filter(|r| {
                matches!(r.kind, RequirementKind::Text | RequirementKind::EntityRef)
            })
            .collect();
        if let [only] = text_like.as_slice() {
            values.insert(only.field.clone(), Value::String(trimmed.to_string()));
        }
    }

    values
}
