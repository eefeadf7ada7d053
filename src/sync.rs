//! Inbox sync — copies Gmail inbox messages into the local store.
//!
//! Every listed message is fetched and upserted, so read state and content
//! of known messages are refreshed from Gmail. Per-message fetch or parse
//! failures are logged and counted; a fatal provider error (auth or
//! connection lost) aborts the sync.

use chrono::{DateTime, SubsecRound, Utc};
use mail_parser::MessageParser;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, ProviderError};
use crate::mailbox::gmail::{GmailClient, LABEL_INBOX, LABEL_UNREAD, RawMessage};
use crate::pipeline::types::MessageRecord;
use crate::store::MessageStore;

/// Gmail caps `maxResults` at 500 per page.
const PAGE_SIZE: usize = 500;

/// Counters for one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub listed: usize,
    pub stored_new: usize,
    /// Already stored; fields refreshed from Gmail.
    pub refreshed: usize,
    pub failed: usize,
}

/// Fetch inbox messages into `store`.
///
/// With `max`, only the first `max` inbox messages are considered;
/// otherwise every inbox message is.
pub async fn sync_inbox(
    client: &GmailClient,
    store: &dyn MessageStore,
    max: Option<usize>,
) -> Result<SyncReport, Error> {
    let ids = list_inbox_ids(client, max).await?;
    let mut report = SyncReport {
        listed: ids.len(),
        ..Default::default()
    };
    info!(listed = report.listed, "Listed inbox messages");

    for id in &ids {
        let raw = match client.get_raw(id).await {
            Ok(raw) => raw,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(message_id = %id, error = %e, "Failed to fetch message");
                report.failed += 1;
                continue;
            }
        };

        let Some(record) = parse_raw_message(&raw) else {
            warn!(message_id = %id, "Failed to parse message");
            report.failed += 1;
            continue;
        };

        if store.upsert_message(&record).await? {
            report.stored_new += 1;
        } else {
            report.refreshed += 1;
        }
        debug!(message_id = %id, sender = %record.sender, "Stored message");
    }

    info!(
        listed = report.listed,
        stored_new = report.stored_new,
        refreshed = report.refreshed,
        failed = report.failed,
        "Inbox sync complete"
    );
    Ok(report)
}

async fn list_inbox_ids(
    client: &GmailClient,
    max: Option<usize>,
) -> Result<Vec<String>, ProviderError> {
    let mut ids = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page_size = match max {
            Some(max) => (max - ids.len()).min(PAGE_SIZE),
            None => PAGE_SIZE,
        };
        if page_size == 0 {
            break;
        }

        let page = client
            .list_messages(LABEL_INBOX, Some(page_size), token.as_deref())
            .await?;
        ids.extend(page.ids.into_iter().take(page_size));
        match page.next_page_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }
    Ok(ids)
}

/// Build a [`MessageRecord`] from a raw Gmail message.
///
/// Returns `None` when the bytes are not a parseable RFC 5322 message.
pub fn parse_raw_message(raw: &RawMessage) -> Option<MessageRecord> {
    let parsed = MessageParser::default().parse(&raw.bytes)?;

    let sender = first_address(parsed.from()).unwrap_or_else(|| "unknown".into());
    let recipient = first_address(parsed.to());
    let subject = parsed.subject().unwrap_or_default().to_string();
    let body = extract_text(&parsed);

    // The Date header is what rule authors see; Gmail's internalDate is the
    // server receive time. Both are kept at whole seconds.
    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .or_else(|| {
            raw.internal_date_ms
                .and_then(|ms| DateTime::from_timestamp(ms.div_euclid(1000), 0))
        })
        .unwrap_or_else(|| Utc::now().trunc_subsecs(0));

    Some(MessageRecord {
        id: raw.id.clone(),
        sender,
        recipient,
        subject,
        body,
        received_at,
        is_read: !raw.label_ids.iter().any(|l| l == LABEL_UNREAD),
    })
}

fn first_address(address: Option<&mail_parser::Address>) -> Option<String> {
    address
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
}

/// Plain-text body, or the HTML body with tags removed.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Drop tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rules::FieldCondition;
    use crate::pipeline::types::{FieldName, PredicateKind};

    fn make_raw(id: &str, labels: &[&str], internal_date_ms: Option<i64>, mime: &str) -> RawMessage {
        RawMessage {
            id: id.into(),
            label_ids: labels.iter().map(|s| s.to_string()).collect(),
            internal_date_ms,
            bytes: mime.as_bytes().to_vec(),
        }
    }

    const PLAIN: &str = "From: Alice <alice@example.com>\r\n\
        To: bob@example.com\r\n\
        Subject: Quarterly report\r\n\
        Date: Fri, 01 Mar 2024 09:00:00 +0000\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Numbers attached.\r\n";

    #[test]
    fn parse_plain_message() {
        let raw = make_raw("m1", &["INBOX", "UNREAD"], Some(1_709_283_600_000), PLAIN);
        let record = parse_raw_message(&raw).unwrap();

        assert_eq!(record.id, "m1");
        assert_eq!(record.sender, "alice@example.com");
        assert_eq!(record.recipient.as_deref(), Some("bob@example.com"));
        assert_eq!(record.subject, "Quarterly report");
        assert_eq!(record.body, "Numbers attached.");
        assert_eq!(record.received_at.timestamp_millis(), 1_709_283_600_000);
        assert!(!record.is_read);
    }

    #[test]
    fn missing_unread_label_means_read() {
        let raw = make_raw("m1", &["INBOX"], Some(0), PLAIN);
        assert!(parse_raw_message(&raw).unwrap().is_read);
    }

    #[test]
    fn date_header_used_without_internal_date() {
        let raw = make_raw("m1", &[], None, PLAIN);
        let record = parse_raw_message(&raw).unwrap();
        assert_eq!(record.received_at.to_rfc3339(), "2024-03-01T09:00:00+00:00");
    }

    #[test]
    fn date_header_wins_over_internal_date() {
        // Gmail received it 3.417s after the sender's Date header.
        let raw = make_raw("m1", &["INBOX"], Some(1_709_283_603_417), PLAIN);
        let record = parse_raw_message(&raw).unwrap();
        assert_eq!(record.received_at.to_rfc3339(), "2024-03-01T09:00:00+00:00");

        let on_date = FieldCondition::new(FieldName::Received, PredicateKind::Equals, "2024-03-01T09:00:00Z").unwrap();
        assert!(on_date.matches(&record).unwrap());
    }

    #[test]
    fn internal_date_fallback_drops_millis() {
        let mime = "From: a@b.com\r\nSubject: No date\r\n\r\nbody\r\n";
        let record = parse_raw_message(&make_raw("m4", &[], Some(1_709_283_603_417), mime)).unwrap();
        assert_eq!(record.received_at.timestamp(), 1_709_283_603);
        assert_eq!(record.received_at.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn html_only_body_is_stripped() {
        let mime = "From: news@site.com\r\n\
            Subject: Weekly\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <html><body><p>Top <b>stories</b></p></body></html>\r\n";
        let record = parse_raw_message(&make_raw("m2", &[], Some(0), mime)).unwrap();
        assert!(record.body.contains("Top"));
        assert!(record.body.contains("stories"));
        assert!(!record.body.contains('<'));
    }

    #[test]
    fn missing_from_falls_back_to_unknown() {
        let mime = "Subject: Anonymous\r\n\r\nbody\r\n";
        let record = parse_raw_message(&make_raw("m3", &[], Some(0), mime)).unwrap();
        assert_eq!(record.sender, "unknown");
        assert!(record.recipient.is_none());
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<div><b>Bold</b> and <i>italic</i></div>"), "Bold and italic");
        assert_eq!(strip_html(r#"<a href="https://example.com">Link</a>"#), "Link");
        assert_eq!(strip_html("No HTML here"), "No HTML here");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn strip_html_separates_block_elements() {
        assert_eq!(strip_html("<p>One</p><p>Two</p>"), "One Two");
    }
}
