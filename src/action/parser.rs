//! Turns raw reasoning output into an [`Action`].
//!
//! The reasoning service is asked for a single JSON object but routinely
//! wraps it in code fences or prose, truncates it, or uses older action
//! names. [`parse_decision`] recovers what it can and never fails: anything
//! unusable becomes [`Action::None`] tagged with a [`ParseIssue`].

use super::{Action, ParseIssue, ScrollDirection};
use serde_json::{Map, Value};

/// Reply used when the decision text is empty.
pub const EMPTY_REPLY: &str = "I didn't catch that. Could you repeat?";

/// Reply used for an explicit `none` without a reply of its own.
const IDLE_REPLY: &str = "I'm here and listening.";

const CARDINALS: [&str; 10] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

const ORDINALS: [&str; 10] = [
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
    "tenth",
];

/// Parse one decision. Always returns a well-formed action.
pub fn parse_decision(raw: &str) -> Action {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Action::unusable(EMPTY_REPLY, ParseIssue::Unparsable);
    }

    let body = strip_code_fence(trimmed);
    let object = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => extract_json_object(body).or_else(|| close_truncated(body)),
    };

    match object {
        Some(map) => action_from_object(&map),
        None => {
            tracing::debug!(len = trimmed.len(), "decision is not JSON, replying verbatim");
            Action::unusable(trimmed, ParseIssue::Unparsable)
        }
    }
}

/// Remove a leading fence line (with optional language tag) and a trailing fence.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// End of the balanced object starting at `text[0] == '{'`, if it balances.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// First balanced `{...}` span that parses as a JSON object.
fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{').find_map(|(start, _)| {
        let candidate = &text[start..];
        let end = balanced_end(candidate)?;
        match serde_json::from_str::<Value>(&candidate[..end]) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    })
}

/// Repair an object cut off after a complete value by appending the
/// missing closing brackets and braces. A cut inside a string is not
/// repaired.
fn close_truncated(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let candidate = text[start..].trim_end();
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in candidate.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => open.push('}'),
            '[' if !in_string => open.push(']'),
            '}' | ']' if !in_string => {
                if open.pop() != Some(ch) {
                    return None;
                }
            }
            _ => {}
        }
    }
    if in_string || open.is_empty() {
        return None;
    }

    let mut repaired = candidate.trim_end_matches(',').to_owned();
    repaired.extend(open.iter().rev());
    match serde_json::from_str::<Value>(&repaired) {
        Ok(Value::Object(map)) => {
            tracing::debug!(added = open.len(), "repaired truncated decision");
            Some(map)
        }
        _ => None,
    }
}

// ── Field access ─────────────────────────────────────────────────────

/// First non-empty string (or number rendered as text) among `keys`.
fn text_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Like [`text_field`] but an empty string counts as present.
fn text_field_allow_empty(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn missing(kind: &str, field: &str) -> Action {
    Action::unusable(
        format!("The {kind} request is missing its {field}."),
        ParseIssue::MissingField,
    )
}

/// Parse a 1-based tab index from a number, digit string or English word.
///
/// Returns `None` when the value cannot be read as a whole number. Zero is
/// returned as-is so the bounds check can reject it.
pub fn parse_tab_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return usize::try_from(u).ok();
            }
            let f = n.as_f64()?;
            if f >= 0.0 && f.fract() == 0.0 && f <= usize::MAX as f64 {
                Some(f as usize)
            } else {
                None
            }
        }
        Value::String(s) => parse_tab_word(s),
        _ => None,
    }
}

fn parse_tab_word(text: &str) -> Option<usize> {
    let lower = text.trim().to_lowercase();
    let word = lower
        .strip_prefix("tab")
        .map(str::trim_start)
        .unwrap_or(lower.as_str());
    let word = word.strip_prefix("number").map(str::trim_start).unwrap_or(word);
    let word = word.trim_start_matches('#').trim_end_matches('.');

    if let Ok(n) = word.parse::<usize>() {
        return Some(n);
    }
    CARDINALS
        .iter()
        .position(|c| *c == word)
        .or_else(|| ORDINALS.iter().position(|o| *o == word))
        .map(|i| i + 1)
}

/// Map legacy action names onto the canonical set.
fn canonical_kind(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let lower = match lower.strip_prefix("playwright_") {
        Some(rest) => format!("browser_{rest}"),
        None => lower,
    };
    let mapped = match lower.as_str() {
        "browser_switch_to_tab" => "browser_switch_tab",
        "browser_click_first_google_result" | "browser_click_first_youtube_video" => {
            "browser_click_first_result"
        }
        "browser_send_email" => "browser_send",
        "email_start_professor" => "email_start_named",
        "compose_email" => "email_compose",
        "email_set_title" => "email_set_subject",
        "email_set_content" => "email_set_body",
        "email_clear_title" => "email_clear_subject",
        "email_clear_content" => "email_clear_body",
        other => other,
    };
    mapped.to_owned()
}

fn action_from_object(map: &Map<String, Value>) -> Action {
    let Some(raw_kind) = map.get("action").and_then(Value::as_str) else {
        return match text_field(map, &["reply"]) {
            Some(reply) => Action::reply(reply),
            None => missing("decision", "action name"),
        };
    };
    let kind = canonical_kind(raw_kind);

    match kind.as_str() {
        "open_app" => match text_field(map, &["target", "app"]) {
            Some(target) => Action::OpenApp { target },
            None => missing("open app", "application name"),
        },
        "close_app" => match text_field(map, &["target", "app"]) {
            Some(target) => Action::CloseApp { target },
            None => missing("close app", "application name"),
        },
        "write_text" => {
            let Some(target) = text_field(map, &["target", "app"]) else {
                return missing("write text", "application name");
            };
            match text_field_allow_empty(map, &["content", "text"]) {
                Some(content) => Action::WriteText { target, content },
                None => missing("write text", "content"),
            }
        }
        "open_browser" => match text_field(map, &["target", "url"]) {
            Some(target) => Action::OpenBrowser { target },
            None => missing("open browser", "address"),
        },
        "close_browser" => Action::CloseBrowser,
        "browser_goto" => match text_field(map, &["target", "url"]) {
            Some(target) => Action::BrowserGoto { target },
            None => missing("go to", "address"),
        },
        "browser_fill" => {
            let Some(selector) = text_field(map, &["selector"]) else {
                return missing("fill", "selector");
            };
            match text_field_allow_empty(map, &["content", "text", "value"]) {
                Some(content) => Action::BrowserFill { selector, content },
                None => missing("fill", "content"),
            }
        }
        "browser_press" => {
            let Some(selector) = text_field(map, &["selector"]) else {
                return missing("press", "selector");
            };
            let key = text_field(map, &["key"]).unwrap_or_else(|| "Enter".to_owned());
            Action::BrowserPress { selector, key }
        }
        "browser_scroll" => Action::BrowserScroll {
            direction: text_field(map, &["direction"])
                .map(|d| ScrollDirection::from_word(&d))
                .unwrap_or_default(),
        },
        "browser_click_first_result" => Action::BrowserClickFirstResult,
        "browser_open_tab" => Action::BrowserOpenTab,
        "browser_close_tab" => Action::BrowserCloseTab,
        "browser_switch_tab" => {
            let Some(value) = map.get("index").or_else(|| map.get("tab")) else {
                return missing("switch tab", "tab number");
            };
            match parse_tab_index(value) {
                Some(index) => Action::BrowserSwitchTab { index },
                None => Action::unusable(
                    format!("I couldn't tell which tab you meant by {value}."),
                    ParseIssue::AmbiguousTabIndex,
                ),
            }
        }
        "browser_next_tab" => Action::BrowserNextTab,
        "browser_prev_tab" | "browser_previous_tab" => Action::BrowserPrevTab,
        "browser_send" => Action::BrowserSend,
        "email_start_named" => match text_field(map, &["name", "target"]) {
            Some(name) => Action::EmailStartNamed { name },
            None => missing("email", "recipient name"),
        },
        "email_start_generic" => match text_field(map, &["to", "target"]) {
            Some(to) => Action::EmailStartGeneric { to },
            None => missing("email", "recipient address"),
        },
        "email_compose" => {
            let Some(to) = text_field(map, &["to", "target"]) else {
                return missing("compose email", "recipient address");
            };
            Action::EmailCompose {
                to,
                subject: text_field_allow_empty(map, &["subject", "title"]).unwrap_or_default(),
                body: text_field_allow_empty(map, &["body", "content"]).unwrap_or_default(),
            }
        }
        "email_set_subject" => match text_field_allow_empty(map, &["subject", "title", "content"]) {
            Some(subject) => Action::EmailSetSubject { subject },
            None => missing("set subject", "subject"),
        },
        "email_set_body" => match text_field_allow_empty(map, &["content", "body"]) {
            Some(content) => Action::EmailSetBody { content },
            None => missing("set body", "content"),
        },
        "email_clear_subject" => Action::EmailClearSubject,
        "email_clear_body" => Action::EmailClearBody,
        "none" => Action::reply(text_field(map, &["reply"]).unwrap_or_else(|| IDLE_REPLY.to_owned())),
        other => {
            tracing::warn!(kind = other, "unknown action kind");
            Action::unusable(
                format!("I understood the action '{other}' but wasn't sure what to do."),
                ParseIssue::UnknownKind,
            )
        }
    }
}
