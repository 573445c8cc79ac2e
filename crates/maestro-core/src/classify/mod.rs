//! Rule-based intent classifier
//!
//! `classify` is pure, synchronous and deterministic. It applies fixed rule
//! tables in priority order:
//! 1. dry-run marker anywhere in the text (overrides everything)
//! 2. slash-command syntax (`/name key:value ...`)
//! 3. domain trigger phrases (Italian-first, with English synonyms)
//! 4. action-verb lexicon over stop-word-stripped tokens
//! 5. QnA fallback
//!
//! The rule tables are intentionally simplistic and locale-specific; they
//! are kept fixed for testability rather than generalized into real NLP.

use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;

use crate::types::ClassifiedIntent;

/// Command prefix for structured commands
pub const COMMAND_PREFIX: char = '/';
/// Marker token that forces a dry-run classification
pub const DRY_RUN_MARKER: &str = "dryrun";
/// Intent name emitted for dry-run requests
pub const DRY_RUN_INTENT: &str = "dryrun";

/// Default symmetric delta set when the text names no percentages
pub const DEFAULT_DELTAS: [f64; 4] = [-0.10, -0.05, 0.05, 0.10];
const DELTA_MIN: f64 = 0.01;
const DELTA_MAX: f64 = 0.20;

static ENTITY_ALIAS_RE: LazyLock<Regex> = LazyLock::new(|| {
    // "progetto A", "project Alpha" etc. anywhere in the text
    Regex::new(r"(?i)\b(?:progetto|project)\s+([\w-]+)").expect("entity alias pattern")
});
static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})\s*%").expect("percent pattern"));
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").expect("number pattern"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").expect("email pattern"));
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("url pattern"));
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2})/(\d{2})/(\d{4})\b").expect("date pattern"));

/// Trigger phrases mapped to fixed intents (confidence 0.9)
const TRIGGER_PHRASES: &[(&str, &str)] = &[
    ("sensitivity", "feasibility"),
    ("sensibilità", "feasibility"),
    ("fattibilità", "feasibility"),
    ("feasibility", "feasibility"),
    ("riepilogo", "project"),
    ("riassunto", "project"),
    ("summary", "project"),
    ("scansiona", "documents"),
    ("scan", "documents"),
    ("verifica documenti", "documents"),
];

/// Action verbs mapped to canonical intents (confidence 0.8)
const ACTION_VERBS: &[(&str, &str)] = &[
    ("crea", "create"),
    ("create", "create"),
    ("genera", "create"),
    ("modifica", "modify"),
    ("aggiorna", "modify"),
    ("update", "modify"),
    ("elimina", "delete"),
    ("cancella", "delete"),
    ("delete", "delete"),
    ("invia", "send"),
    ("manda", "send"),
    ("send", "send"),
    ("analizza", "analyze"),
    ("analyze", "analyze"),
];

const STOP_WORDS: &[&str] = &[
    "il", "lo", "la", "i", "gli", "le", "un", "una", "uno", "di", "a", "da", "in", "su", "per",
    "con", "del", "della", "dei", "delle", "e", "che", "mi", "ti", "si", "the", "a", "an", "of",
    "to", "on", "for", "and", "me", "please", "fai", "fammi",
];

/// Classify free text into a `ClassifiedIntent`.
pub fn classify(text: &str) -> ClassifiedIntent {
    let entity_ref = extract_entity_alias(text);
    let trimmed = text.trim();

    // 1. dry-run marker overrides every other rule
    if contains_dry_run_marker(trimmed) {
        return ClassifiedIntent::action(DRY_RUN_INTENT, 1.0)
            .with_arg("text", Value::String(trimmed.to_string()))
            .with_entity_ref(entity_ref);
    }

    // 2. structured slash command
    if let Some(rest) = trimmed.strip_prefix(COMMAND_PREFIX) {
        if let Some(intent) = parse_command(rest) {
            return intent.with_entity_ref(entity_ref);
        }
    }

    let lowered = trimmed.to_lowercase();

    // 3. fixed trigger phrases
    for (phrase, intent_name) in TRIGGER_PHRASES {
        if lowered.contains(phrase) {
            let mut intent = ClassifiedIntent::action(*intent_name, 0.9);
            if *intent_name == "feasibility" {
                let deltas = extract_deltas(&lowered);
                intent = intent.with_arg(
                    "deltas",
                    Value::Array(deltas.into_iter().filter_map(Number::from_f64).map(Value::Number).collect()),
                );
            }
            return intent.with_entity_ref(entity_ref);
        }
    }

    // 4. action-verb lexicon
    let tokens: Vec<&str> = lowered
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '/'))
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .collect();
    for token in &tokens {
        if let Some((_, canonical)) = ACTION_VERBS.iter().find(|(verb, _)| verb == token) {
            return ClassifiedIntent::action(*canonical, 0.8)
                .with_args(extract_typed_args(trimmed))
                .with_entity_ref(entity_ref);
        }
    }

    // 5. QnA fallback
    ClassifiedIntent::qna(0.6).with_entity_ref(entity_ref)
}

fn contains_dry_run_marker(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == DRY_RUN_MARKER)
}

/// Parse `name key:value ...` into an Action intent (confidence 0.95).
fn parse_command(rest: &str) -> Option<ClassifiedIntent> {
    let mut parts = rest.split_whitespace();
    let name = parts.next()?;
    if name.is_empty() {
        return None;
    }

    let mut args = Map::new();
    for token in parts {
        if let Some((key, raw)) = token.split_once(':') {
            if !key.is_empty() {
                args.insert(key.to_string(), coerce_value(raw));
            }
        }
    }
    Some(ClassifiedIntent::action(name, 0.95).with_args(args))
}

/// Coerce `true`/`false` and numeric-looking tokens to typed JSON values.
fn coerce_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(num) = Number::from_f64(float) {
            return Value::Number(num);
        }
    }
    Value::String(raw.to_string())
}

/// Extract the entity alias ("progetto X") anywhere in the text.
pub fn extract_entity_alias(text: &str) -> Option<String> {
    ENTITY_ALIAS_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract percentage-like integers as symmetric delta pairs.
///
/// Values are divided by 100, clamped to [0.01, 0.20], emitted as ± pairs,
/// de-duplicated and sorted ascending. Falls back to the fixed default set
/// when the text names no percentages.
pub fn extract_deltas(text: &str) -> Vec<f64> {
    let mut magnitudes: Vec<f64> = PERCENT_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .map(|pct| (pct / 100.0).clamp(DELTA_MIN, DELTA_MAX))
        .collect();

    if magnitudes.is_empty() {
        return DEFAULT_DELTAS.to_vec();
    }

    magnitudes.sort_by(|a, b| a.total_cmp(b));
    magnitudes.dedup();

    let mut deltas: Vec<f64> = magnitudes.iter().map(|m| -m).chain(magnitudes.iter().copied()).collect();
    deltas.sort_by(|a, b| a.total_cmp(b));
    deltas.dedup();
    deltas
}

/// Pull numbers, email addresses, URLs and dd/mm/yyyy dates into typed
/// argument buckets.
pub fn extract_typed_args(text: &str) -> Map<String, Value> {
    let mut args = Map::new();

    let emails: Vec<Value> = EMAIL_RE
        .find_iter(text)
        .map(|m| Value::String(m.as_str().to_string()))
        .collect();
    if !emails.is_empty() {
        args.insert("emails".to_string(), Value::Array(emails));
    }

    let urls: Vec<Value> = URL_RE
        .find_iter(text)
        .map(|m| Value::String(m.as_str().to_string()))
        .collect();
    if !urls.is_empty() {
        args.insert("urls".to_string(), Value::Array(urls));
    }

    let dates: Vec<Value> = DATE_RE
        .find_iter(text)
        .map(|m| Value::String(m.as_str().to_string()))
        .collect();
    if !dates.is_empty() {
        args.insert("dates".to_string(), Value::Array(dates));
    }

    // numbers last, skipping anything already captured as email/url/date
    let mut masked = text.to_string();
    for re in [&*EMAIL_RE, &*URL_RE, &*DATE_RE] {
        masked = re.replace_all(&masked, " ").to_string();
    }
    let numbers: Vec<Value> = NUMBER_RE
        .find_iter(&masked)
        .filter_map(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
        .filter_map(Number::from_f64)
        .map(Value::Number)
        .collect();
    if !numbers.is_empty() {
        args.insert("numbers".to_string(), Value::Array(numbers));
    }

    args
}
