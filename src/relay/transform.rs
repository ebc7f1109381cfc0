use chrono::{DateTime, Local};
use regex::Regex;
use tracing::warn;

use crate::platform::{
    profile, ContentKind, InboundMessage, MediaKind, OutboundPayload, RenderStrategy,
};
use crate::relay::parser::ParsedPayload;
use crate::relay::rules::{Destination, RelayRule, ReplaceRule};

/// Render one parsed message for one destination of a matching rule.
pub fn transform(
    msg: &InboundMessage,
    parsed: &ParsedPayload,
    rule: &RelayRule,
    destination: &Destination,
) -> OutboundPayload {
    transform_at(msg, parsed, rule, destination, Local::now())
}

pub fn transform_at(
    msg: &InboundMessage,
    parsed: &ParsedPayload,
    rule: &RelayRule,
    destination: &Destination,
    now: DateTime<Local>,
) -> OutboundPayload {
    let residual = apply_replacements(&parsed.text, &rule.replace);
    let same_platform = destination.platform.eq_ignore_ascii_case(&msg.platform);
    let native_media = same_platform
        && profile(&destination.platform).renderer == RenderStrategy::NativeMedia;

    let mut segments = Vec::new();
    let mut path = None;
    match parsed.media {
        Some(kind) if same_platform => {
            segments.push(format!("{}{}", kind.native_label(), residual));
            if native_media {
                path = parsed.locator.clone();
            }
        }
        Some(kind) => {
            let mut placeholder = format!(
                "{} [{} {}]",
                kind.emoji(),
                profile(&msg.platform).display_name,
                kind.noun()
            );
            if let Some(label) = &parsed.source_label {
                if kind == MediaKind::File {
                    placeholder.push(' ');
                    placeholder.push_str(label);
                }
            }
            segments.push(placeholder);
            segments.push(residual);
        }
        None => segments.push(residual),
    }
    segments.push(rule.trailing_text());
    segments.push(annotation(msg, rule, now));

    let text = segments
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    OutboundPayload {
        platform: destination.platform.clone(),
        target_kind: destination.kind,
        target_id: destination.id.trim().to_string(),
        kind: if path.is_some() {
            ContentKind::File
        } else {
            ContentKind::Text
        },
        text,
        path,
    }
}

/// Apply replace rules in order, each as a global regex substitution.
/// Empty patterns are skipped; invalid regexes are replaced literally.
pub fn apply_replacements(text: &str, rules: &[ReplaceRule]) -> String {
    let mut out = text.to_string();
    for rule in rules.iter().filter(|r| !r.pattern.is_empty()) {
        out = match Regex::new(&rule.pattern) {
            Ok(re) => {
                let replacement = expand_template(&rule.replacement, re.captures_len() - 1);
                re.replace_all(&out, replacement.as_str()).into_owned()
            }
            Err(e) => {
                warn!(
                    "Replace pattern '{}' is not a valid regex ({}), replacing literally",
                    rule.pattern, e
                );
                out.replace(&rule.pattern, &rule.replacement)
            }
        };
    }
    out
}

/// Rewrite a host-style replacement (`$1`, `$&`, `$<name>`, `$$`) into the
/// `regex` crate's syntax. Any other `$` is literal, as are references to
/// groups the pattern does not have.
fn expand_template(template: &str, groups: usize) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let next = chars.get(i + 1).copied();
        match next {
            Some('$') => {
                out.push_str("$$");
                i += 2;
            }
            Some('&') => {
                out.push_str("${0}");
                i += 2;
            }
            Some(d) if d.is_ascii_digit() => {
                let one = d.to_digit(10).unwrap_or(0) as usize;
                let two = chars
                    .get(i + 2)
                    .and_then(|c| c.to_digit(10))
                    .map(|d2| one * 10 + d2 as usize);
                match two {
                    Some(n) if n >= 1 && n <= groups => {
                        out.push_str(&format!("${{{}}}", n));
                        i += 3;
                    }
                    _ if one >= 1 && one <= groups => {
                        out.push_str(&format!("${{{}}}", one));
                        i += 2;
                    }
                    _ => {
                        out.push_str("$$");
                        i += 1;
                    }
                }
            }
            Some('<') => match chars[i + 2..].iter().position(|&c| c == '>') {
                Some(len) if len > 0 => {
                    let name: String = chars[i + 2..i + 2 + len].iter().collect();
                    out.push_str(&format!("${{{}}}", name));
                    i += 3 + len;
                }
                _ => {
                    out.push_str("$$");
                    i += 1;
                }
            },
            _ => {
                out.push_str("$$");
                i += 1;
            }
        }
    }
    out
}

/// Source and time lines, each present only when its flag is set.
pub fn annotation(msg: &InboundMessage, rule: &RelayRule, now: DateTime<Local>) -> String {
    let mut lines = Vec::new();
    if rule.show_source {
        lines.push(format!(
            "[来源 {} {}:{}]",
            profile(&msg.platform).display_name,
            msg.target_kind().label(),
            msg.target_id()
        ));
    }
    if rule.show_time {
        lines.push(format!("[时间 {}]", now.format("%Y-%m-%d %H:%M:%S")));
    }
    lines.join("\n")
}
