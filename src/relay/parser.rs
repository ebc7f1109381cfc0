//! Platform-aware extraction of media references and text from raw bodies.
//!
//! Stages run in a fixed priority order and the first one that recognizes
//! the body wins:
//!
//! 1. Embedded image marker: `[pic=<path>,isDecrypt=1]`
//! 2. CQ inline code: `[CQ:image,url=...]`, `[CQ:record,file=...]`, ...
//! 3. Out-of-band media: empty body plus a media-kind flag on the message
//! 4. XML envelope: `<msg>...</msg>` summarized to readable text
//! 5. Plain text
//!
//! A stage that recognizes its syntax but yields nothing usable (an empty
//! path, an envelope without any known field) makes the whole body plain
//! text rather than handing on to later stages.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::platform::{profile, InboundMessage, MediaKind, ParserStrategy};
use crate::relay::rules::MessageCategory;

static PIC_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[pic=([^,\]]*),isDecrypt=1\]").expect("valid pic marker regex"));

static CQ_MEDIA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[CQ:(image|video|record|voice|file)((?:,[^\]]*)?)\]").expect("valid CQ regex")
});

static XML_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("valid title regex"));

static XML_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(des|description)>(.*?)</(?:des|description)>")
        .expect("valid description regex")
});

static XML_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<refermsg>.*?<content>(.*?)</content>").expect("valid refermsg regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Image,
    Voice,
    Video,
    File,
    /// Media locator plus non-empty residual text
    Mixed,
}

impl From<MediaKind> for PayloadKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => PayloadKind::Image,
            MediaKind::Voice => PayloadKind::Voice,
            MediaKind::Video => PayloadKind::Video,
            MediaKind::File => PayloadKind::File,
        }
    }
}

/// Result of parsing one inbound body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPayload {
    pub kind: PayloadKind,
    /// Residual text with any media markup removed
    pub text: String,
    pub media: Option<MediaKind>,
    /// Local path or remote URL of the media
    pub locator: Option<String>,
    /// Short display name for the media, usually its file name
    pub source_label: Option<String>,
}

impl ParsedPayload {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Text,
            text: text.into(),
            media: None,
            locator: None,
            source_label: None,
        }
    }

    fn with_media(media: MediaKind, locator: Option<String>, text: String) -> Self {
        let kind = if locator.is_some() && !text.is_empty() {
            PayloadKind::Mixed
        } else {
            media.into()
        };
        let source_label = locator.as_deref().and_then(file_name);
        Self {
            kind,
            text,
            media: Some(media),
            locator,
            source_label,
        }
    }

    /// Category for the message-type gate; anything without media is text.
    pub fn category(&self) -> MessageCategory {
        self.media.map_or(MessageCategory::Text, Into::into)
    }
}

/// Outcome of one extraction stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<T> {
    Found(T),
    /// The syntax matched but carried nothing usable
    Indeterminate,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMatch {
    pub kind: MediaKind,
    pub locator: String,
    pub residual: String,
}

pub fn parse(msg: &InboundMessage) -> ParsedPayload {
    let body = msg.body.as_str();
    if profile(&msg.platform).parser == ParserStrategy::TextOnly {
        return ParsedPayload::plain(body);
    }

    let media_stages: [fn(&str) -> Extraction<MediaMatch>; 2] =
        [extract_pic_marker, extract_cq_media];
    for stage in media_stages {
        match stage(body) {
            Extraction::Found(m) => {
                return ParsedPayload::with_media(m.kind, Some(m.locator), m.residual)
            }
            Extraction::Indeterminate => {
                debug!("Media markup without a usable path, treating as text");
                return ParsedPayload::plain(body);
            }
            Extraction::NoMatch => {}
        }
    }

    if let Some(parsed) = out_of_band_media(msg) {
        return parsed;
    }

    match extract_xml_summary(body) {
        Extraction::Found(summary) => ParsedPayload::plain(summary),
        Extraction::Indeterminate => {
            debug!("XML envelope without known fields, treating as text");
            ParsedPayload::plain(body)
        }
        Extraction::NoMatch => ParsedPayload::plain(body),
    }
}

pub fn extract_pic_marker(body: &str) -> Extraction<MediaMatch> {
    let Some(caps) = PIC_MARKER.captures(body) else {
        return Extraction::NoMatch;
    };
    let path = caps[1].trim();
    if path.is_empty() {
        return Extraction::Indeterminate;
    }
    Extraction::Found(MediaMatch {
        kind: MediaKind::Image,
        locator: path.to_string(),
        residual: PIC_MARKER.replace_all(body, "").trim().to_string(),
    })
}

pub fn extract_cq_media(body: &str) -> Extraction<MediaMatch> {
    let Some(caps) = CQ_MEDIA.captures(body) else {
        return Extraction::NoMatch;
    };
    let kind = match &caps[1] {
        "image" => MediaKind::Image,
        "video" => MediaKind::Video,
        "record" | "voice" => MediaKind::Voice,
        _ => MediaKind::File,
    };

    let attrs: Vec<(&str, &str)> = caps[2]
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(_, value)| !value.trim().is_empty())
        .collect();
    let raw = attrs
        .iter()
        .find(|(key, _)| *key == "url")
        .or_else(|| attrs.iter().find(|(key, _)| *key == "file"))
        .map(|(_, value)| *value)
        .unwrap_or_default();

    let unescaped = unescape_cq(raw);
    let locator = match urlencoding::decode(&unescaped) {
        Ok(decoded) => decoded.trim().to_string(),
        Err(_) => unescaped.trim().to_string(),
    };
    if locator.is_empty() {
        return Extraction::Indeterminate;
    }

    let whole = &caps[0];
    Extraction::Found(MediaMatch {
        kind,
        locator,
        residual: body.replacen(whole, "", 1).trim().to_string(),
    })
}

/// Media flagged on the message itself, for adapters that strip the body.
fn out_of_band_media(msg: &InboundMessage) -> Option<ParsedPayload> {
    let kind = msg.media_kind?;
    let body = msg.body.trim();
    if !body.is_empty() && body != kind.native_label() {
        return None;
    }
    let locator = msg
        .file_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string);
    Some(ParsedPayload::with_media(kind, locator, String::new()))
}

pub fn extract_xml_summary(body: &str) -> Extraction<String> {
    let trimmed = body.trim();
    let has_root = trimmed.starts_with("<?xml") || trimmed.starts_with("<msg");
    if !has_root || !trimmed.contains("</msg>") {
        return Extraction::NoMatch;
    }

    let field = |re: &Regex, group: usize| {
        re.captures(trimmed)
            .and_then(|caps| caps.get(group).map(|m| unescape_xml(m.as_str())))
            .filter(|s| !s.is_empty())
    };

    let mut lines = Vec::new();
    if let Some(title) = field(&*XML_TITLE, 1) {
        lines.push(format!("【{}】", title));
    }
    if let Some(description) = field(&*XML_DESCRIPTION, 2) {
        lines.push(description);
    }
    if let Some(quoted) = field(&*XML_QUOTED, 1) {
        lines.push(format!("引用: {}", quoted));
    }

    if lines.is_empty() {
        Extraction::Indeterminate
    } else {
        Extraction::Found(lines.join("\n"))
    }
}

fn unescape_cq(value: &str) -> String {
    value
        .replace("&#44;", ",")
        .replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&amp;", "&")
}

fn unescape_xml(value: &str) -> String {
    let value = value.trim();
    let value = value
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
        .unwrap_or(value);
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn file_name(locator: &str) -> Option<String> {
    let without_query = locator.split(['?', '#']).next().unwrap_or(locator);
    without_query
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(platform: &str, body: &str) -> InboundMessage {
        InboundMessage {
            platform: platform.to_string(),
            user_id: "1".to_string(),
            group_id: Some("100".to_string()),
            body: body.to_string(),
            message_id: "m1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cq_image_with_text_is_mixed() {
        let parsed = parse(&inbound("qq", "[CQ:image,url=http%3A%2F%2Fx%2Fa.jpg]hello"));
        assert_eq!(parsed.kind, PayloadKind::Mixed);
        assert_eq!(parsed.media, Some(MediaKind::Image));
        assert_eq!(parsed.locator.as_deref(), Some("http://x/a.jpg"));
        assert_eq!(parsed.text, "hello");
        assert_eq!(parsed.source_label.as_deref(), Some("a.jpg"));
        assert_eq!(parsed.category(), MessageCategory::Image);
    }

    #[test]
    fn test_cq_prefers_url_over_file() {
        let body = "[CQ:image,file=abc.image,url=https://img.example/q?a=1&amp;b=2]";
        let parsed = parse(&inbound("qq", body));
        assert_eq!(parsed.kind, PayloadKind::Image);
        assert_eq!(parsed.locator.as_deref(), Some("https://img.example/q?a=1&b=2"));
        assert!(parsed.text.is_empty());
    }

    #[test]
    fn test_cq_record_is_voice() {
        let parsed = parse(&inbound("qq", "[CQ:record,file=voice%2F1.amr]"));
        assert_eq!(parsed.kind, PayloadKind::Voice);
        assert_eq!(parsed.locator.as_deref(), Some("voice/1.amr"));
    }

    #[test]
    fn test_cq_with_empty_url_falls_back_to_text() {
        let body = "[CQ:image,url=]look";
        let parsed = parse(&inbound("qq", body));
        assert_eq!(parsed, ParsedPayload::plain(body));
    }

    #[test]
    fn test_cq_with_empty_url_uses_file() {
        let parsed = parse(&inbound("qq", "[CQ:image,file=http%3A%2F%2Fx%2Fb.jpg,url=]hi"));
        assert_eq!(parsed.kind, PayloadKind::Mixed);
        assert_eq!(parsed.locator.as_deref(), Some("http://x/b.jpg"));
        assert_eq!(parsed.text, "hi");
    }

    #[test]
    fn test_pic_marker_extracted() {
        let body = r"see this [pic=C:\wx\img\123.jpg,isDecrypt=1]";
        let parsed = parse(&inbound("wxQianxun", body));
        assert_eq!(parsed.kind, PayloadKind::Mixed);
        assert_eq!(parsed.locator.as_deref(), Some(r"C:\wx\img\123.jpg"));
        assert_eq!(parsed.text, "see this");
        assert_eq!(parsed.source_label.as_deref(), Some("123.jpg"));
    }

    #[test]
    fn test_pic_marker_wins_over_cq_code() {
        let body = "[pic=/tmp/a.png,isDecrypt=1][CQ:video,url=v.mp4]";
        let parsed = parse(&inbound("wxQianxun", body));
        assert_eq!(parsed.media, Some(MediaKind::Image));
        assert_eq!(parsed.text, "[CQ:video,url=v.mp4]");
    }

    #[test]
    fn test_out_of_band_media_flag() {
        let mut msg = inbound("wxXyo", "");
        msg.media_kind = Some(MediaKind::Video);
        let parsed = parse(&msg);
        assert_eq!(parsed.kind, PayloadKind::Video);
        assert!(parsed.locator.is_none());
        assert!(parsed.text.is_empty());

        msg.body = "[视频]".to_string();
        msg.file_url = Some("/data/v.mp4".to_string());
        let parsed = parse(&msg);
        assert_eq!(parsed.locator.as_deref(), Some("/data/v.mp4"));
    }

    #[test]
    fn test_media_flag_ignored_when_body_has_text() {
        let mut msg = inbound("wxXyo", "caption");
        msg.media_kind = Some(MediaKind::Image);
        assert_eq!(parse(&msg), ParsedPayload::plain("caption"));
    }

    #[test]
    fn test_xml_envelope_summarized() {
        let body = "<?xml version=\"1.0\"?><msg><appmsg><title>Weekly report</title>\
                    <des><![CDATA[Numbers &amp; charts]]></des>\
                    <refermsg><content>earlier message</content></refermsg></appmsg></msg>";
        let parsed = parse(&inbound("wxXyo", body));
        assert_eq!(parsed.kind, PayloadKind::Text);
        assert_eq!(
            parsed.text,
            "【Weekly report】\nNumbers & charts\n引用: earlier message"
        );
    }

    #[test]
    fn test_truncated_xml_is_plain_text() {
        let body = "<msg><appmsg><title>cut off";
        assert_eq!(parse(&inbound("wxXyo", body)), ParsedPayload::plain(body));
    }

    #[test]
    fn test_xml_without_fields_is_plain_text() {
        let body = "<msg><emoji md5=\"x\"/></msg>";
        assert_eq!(extract_xml_summary(body), Extraction::Indeterminate);
        assert_eq!(parse(&inbound("wxXyo", body)), ParsedPayload::plain(body));
    }

    #[test]
    fn test_text_only_platform_skips_extraction() {
        let body = "[CQ:image,url=a.jpg]";
        assert_eq!(parse(&inbound("ssh", body)), ParsedPayload::plain(body));
    }

    #[test]
    fn test_plain_text() {
        let parsed = parse(&inbound("tgBot", "just words"));
        assert_eq!(parsed.kind, PayloadKind::Text);
        assert_eq!(parsed.category(), MessageCategory::Text);
    }
}
