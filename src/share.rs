//! Observer link construction and share-sheet payloads.
//!
//! The core builds the link and the message; the host performs the actual
//! share (native share sheet, clipboard, or the messaging-app fallback URL).

/// Builds the observer page link for a session.
pub fn tracking_link(base: &str, session_id: &str) -> String {
    format!(
        "{}/tracker.html?session={}",
        base.trim_end_matches('/'),
        session_id
    )
}

/// Payload for the native share sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePayload {
    pub title: String,
    pub text: String,
    pub url: String,
}

impl SharePayload {
    /// The standard "follow my journey" message around a tracking link.
    pub fn for_tracking_link(link: &str) -> Self {
        Self {
            title: "Follow my journey".to_string(),
            text: format!(
                "SAFETY ALERT: I am starting a tracked journey. Follow my live location: {}",
                link
            ),
            url: link.to_string(),
        }
    }
}

/// Fallback when no native share sheet exists: a pre-filled message link to
/// the messaging app.
pub fn whatsapp_share_url(text: &str) -> String {
    format!(
        "https://api.whatsapp.com/send?text={}",
        percent_encode(text)
    )
}

/// Percent-encodes a string for use as a URL query value (RFC 3986
/// unreserved characters pass through).
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        }
    }
    out
}
