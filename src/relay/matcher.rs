use crate::platform::InboundMessage;
use crate::relay::parser::ParsedPayload;
use crate::relay::rules::{is_any_keyword, RelayRule};

/// Why a rule did or did not accept a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Matched,
    SourceMismatch,
    NoKeyword,
    TypeNotAllowed,
}

/// Source gate: some listen filter names the message's platform and its
/// group id (or user id for private messages).
pub fn source_matches(rule: &RelayRule, msg: &InboundMessage) -> bool {
    let target = msg.target_id();
    rule.listen.iter().any(|filter| {
        filter.platform == msg.platform && filter.ids.iter().any(|id| id.trim() == target)
    })
}

/// Keyword gate: the `ANY` sentinel, or any non-empty keyword contained in
/// the raw body. Empty bodies pass only through the sentinel.
pub fn keyword_matches(rule: &RelayRule, body: &str) -> bool {
    rule.keywords
        .iter()
        .any(|keyword| is_any_keyword(keyword) || (!keyword.is_empty() && body.contains(keyword.as_str())))
}

pub fn type_allowed(rule: &RelayRule, parsed: &ParsedPayload) -> bool {
    rule.message_types.allows(parsed.category())
}

pub fn evaluate(rule: &RelayRule, msg: &InboundMessage, parsed: &ParsedPayload) -> Verdict {
    if !source_matches(rule, msg) {
        Verdict::SourceMismatch
    } else if !keyword_matches(rule, &msg.body) {
        Verdict::NoKeyword
    } else if !type_allowed(rule, parsed) {
        Verdict::TypeNotAllowed
    } else {
        Verdict::Matched
    }
}
