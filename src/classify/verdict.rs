use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Verdict returned by the classifier service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Clear,
    Blocked,
}

/// Reasons a classifier query produced no verdict. None of these are fatal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassifierFailure {
    /// No reply within the response timeout.
    Timeout(Duration),
    /// Transport or service could not be reached.
    Unavailable(String),
    /// A reply arrived but could not be interpreted.
    InvalidResponse(String),
}

impl ClassifierFailure {
    /// Stable short code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl fmt::Display for ClassifierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "timeout: no classifier reply within {:?}", after),
            Self::Unavailable(detail) => write!(f, "unavailable: {}", detail),
            Self::InvalidResponse(detail) => write!(f, "invalid_response: {}", detail),
        }
    }
}

impl std::error::Error for ClassifierFailure {}

const CLEAR_WORDS: &[&str] = &["clear", "yes", "true", "safe"];
const BLOCKED_WORDS: &[&str] = &["blocked", "no", "false", "unsafe", "obstructed"];
const BLOCKED_PHRASES: &[&str] = &["not clear", "not safe"];

/// Interpret a free-text or JSON classifier reply.
///
/// Accepted shapes:
/// - a JSON object with a boolean `clear` and/or a string `verdict`; both
///   present must agree
/// - a bare JSON boolean
/// - a JSON object embedded in surrounding text (e.g. a fenced block), as
///   long as the surrounding text does not name the opposite verdict
/// - a reply that is nothing but a keyword or "not clear", optionally
///   quoted or followed by punctuation
///
/// Anything else, including prose that merely starts with a keyword, is
/// `InvalidResponse`.
pub fn interpret_verdict(reply: &str) -> Result<Verdict, ClassifierFailure> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ClassifierFailure::InvalidResponse("empty reply".to_string()));
    }

    if let Some(verdict) = verdict_from_json(reply) {
        return verdict;
    }
    if let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) {
        if start < end {
            if let Some(verdict) = verdict_from_json(&reply[start..=end]) {
                let verdict = verdict?;
                let outside = format!("{} {}", &reply[..start], &reply[end + 1..]);
                return match markers(&outside) {
                    (true, _) if verdict == Verdict::Blocked => Err(contradiction(reply)),
                    (_, true) if verdict == Verdict::Clear => Err(contradiction(reply)),
                    _ => Ok(verdict),
                };
            }
        }
    }
    verdict_from_keyword(reply)
}

fn verdict_from_json(text: &str) -> Option<Result<Verdict, ClassifierFailure>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let map = match &value {
        Value::Bool(clear) => return Some(Ok(verdict_from_bool(*clear))),
        Value::Object(map) => map,
        _ => return None,
    };

    let from_flag = match map.get("clear") {
        None => None,
        Some(Value::Bool(clear)) => Some(verdict_from_bool(*clear)),
        Some(other) => {
            return Some(Err(ClassifierFailure::InvalidResponse(format!(
                "'clear' is not a boolean: {}",
                other
            ))))
        }
    };
    let from_word = match map.get("verdict") {
        None => None,
        Some(Value::String(word)) => match verdict_from_keyword(word) {
            Ok(verdict) => Some(verdict),
            Err(e) => return Some(Err(e)),
        },
        Some(other) => {
            return Some(Err(ClassifierFailure::InvalidResponse(format!(
                "'verdict' is not a string: {}",
                other
            ))))
        }
    };

    let verdict = match (from_flag, from_word) {
        (Some(flag), Some(word)) if flag != word => Err(contradiction(text)),
        (Some(verdict), _) | (None, Some(verdict)) => Ok(verdict),
        (None, None) => Err(ClassifierFailure::InvalidResponse(format!(
            "JSON reply has neither 'clear' nor 'verdict': {}",
            truncate(text)
        ))),
    };
    Some(verdict)
}

/// The whole reply must be one keyword (or a blocked phrase).
fn verdict_from_keyword(text: &str) -> Result<Verdict, ClassifierFailure> {
    let lowered = text.to_lowercase();
    let bare = lowered
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'))
        .trim_end_matches(|c: char| matches!(c, '.' | '!'))
        .trim();
    let bare = bare.split_whitespace().collect::<Vec<_>>().join(" ");

    if CLEAR_WORDS.contains(&bare.as_str()) {
        Ok(Verdict::Clear)
    } else if BLOCKED_WORDS.contains(&bare.as_str()) || BLOCKED_PHRASES.contains(&bare.as_str()) {
        Ok(Verdict::Blocked)
    } else {
        Err(ClassifierFailure::InvalidResponse(format!(
            "unrecognised verdict: {}",
            truncate(text)
        )))
    }
}

/// Whether `text` names a clear verdict and/or a blocked one.
fn markers(text: &str) -> (bool, bool) {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let negated = words.windows(2).any(|pair| {
        pair[0] == "not" && (pair[1] == "clear" || pair[1] == "safe")
    });
    let clear = words.iter().any(|w| CLEAR_WORDS.contains(w));
    let blocked = negated || words.iter().any(|w| BLOCKED_WORDS.contains(w));
    (clear, blocked)
}

fn contradiction(text: &str) -> ClassifierFailure {
    ClassifierFailure::InvalidResponse(format!("contradictory verdict: {}", truncate(text)))
}

fn verdict_from_bool(clear: bool) -> Verdict {
    if clear {
        Verdict::Clear
    } else {
        Verdict::Blocked
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 80;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
