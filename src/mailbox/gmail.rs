//! Gmail REST adapter.
//!
//! `GmailClient` is the thin HTTP layer (message modify/trash, labels,
//! listing and raw fetch). `GmailMailbox` implements [`MailboxPort`] on top
//! of it and owns label resolution: names are matched case-insensitively
//! against the account's labels and created when missing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::GmailConfig;
use crate::error::ProviderError;
use crate::mailbox::MailboxPort;

const PROVIDER: &str = "gmail";

/// Longest response-body excerpt kept in an error message.
const ERROR_BODY_EXCERPT: usize = 200;

/// Gmail's `raw` format is base64url, with or without padding.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub const LABEL_INBOX: &str = "INBOX";
pub const LABEL_UNREAD: &str = "UNREAD";
pub const LABEL_STARRED: &str = "STARRED";

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

/// One page of message ids.
#[derive(Debug, Default)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessageResponse {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    internal_date: Option<String>,
    raw: String,
}

/// A message fetched with `format=raw`, decoded to RFC 5322 bytes.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub label_ids: Vec<String>,
    /// Milliseconds since the epoch, as reported by Gmail.
    pub internal_date_ms: Option<i64>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest<'a> {
    #[serde(skip_serializing_if = "no_ids")]
    add_label_ids: &'a [&'a str],
    #[serde(skip_serializing_if = "no_ids")]
    remove_label_ids: &'a [&'a str],
}

fn no_ids(ids: &&[&str]) -> bool {
    ids.is_empty()
}

// ── Client ──────────────────────────────────────────────────────────

/// HTTP client for the Gmail REST API.
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    config: GmailConfig,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/gmail/v1/users/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.user_id,
            path
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let response = request
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })
    }

    /// Add and remove label ids on one message.
    pub async fn modify(
        &self,
        message_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), ProviderError> {
        let body = ModifyRequest {
            add_label_ids: add,
            remove_label_ids: remove,
        };
        let url = self.url(&format!("messages/{message_id}/modify"));
        self.send(self.http.post(url).json(&body)).await?;
        debug!(message_id, ?add, ?remove, "Gmail modify");
        Ok(())
    }

    pub async fn trash(&self, message_id: &str) -> Result<(), ProviderError> {
        let url = self.url(&format!("messages/{message_id}/trash"));
        self.send(self.http.post(url)).await?;
        Ok(())
    }

    pub async fn list_labels(&self) -> Result<Vec<Label>, ProviderError> {
        let list: LabelList = self.json(self.http.get(self.url("labels"))).await?;
        Ok(list.labels)
    }

    pub async fn create_label(&self, name: &str) -> Result<Label, ProviderError> {
        let body = json!({
            "name": name,
            "labelListVisibility": "labelShow",
            "messageListVisibility": "show",
        });
        let label: Label = self.json(self.http.post(self.url("labels")).json(&body)).await?;
        info!(label = %label.name, id = %label.id, "Created Gmail label");
        Ok(label)
    }

    /// List one page of message ids carrying `label_id`.
    pub async fn list_messages(
        &self,
        label_id: &str,
        max_results: Option<usize>,
        page_token: Option<&str>,
    ) -> Result<MessagePage, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![("labelIds", label_id.to_string())];
        if let Some(max) = max_results {
            query.push(("maxResults", max.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let list: MessageList = self
            .json(self.http.get(self.url("messages")).query(&query))
            .await?;
        Ok(MessagePage {
            ids: list.messages.into_iter().map(|m| m.id).collect(),
            next_page_token: list.next_page_token,
        })
    }

    /// Fetch a message in `raw` format and decode it.
    pub async fn get_raw(&self, message_id: &str) -> Result<RawMessage, ProviderError> {
        let url = self.url(&format!("messages/{message_id}"));
        let response: RawMessageResponse = self
            .json(self.http.get(url).query(&[("format", "raw")]))
            .await?;

        let bytes = RAW_ENGINE
            .decode(response.raw.as_bytes())
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!("raw payload for {message_id} is not base64url: {e}"),
            })?;

        Ok(RawMessage {
            id: response.id,
            label_ids: response.label_ids,
            internal_date_ms: response.internal_date.and_then(|s| s.parse().ok()),
            bytes,
        })
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_connect() {
        ProviderError::ConnectionLost {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        }
    } else {
        ProviderError::RequestFailed {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        }
    }
}

/// Map a non-success HTTP status onto the provider error taxonomy.
fn status_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 => ProviderError::AuthFailed {
            provider: PROVIDER.into(),
        },
        429 => ProviderError::RateLimited {
            provider: PROVIDER.into(),
        },
        _ => ProviderError::RequestFailed {
            provider: PROVIDER.into(),
            reason: format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(ERROR_BODY_EXCERPT).collect::<String>()
            ),
        },
    }
}

// ── Port implementation ─────────────────────────────────────────────

/// [`MailboxPort`] backed by Gmail.
pub struct GmailMailbox {
    client: GmailClient,
    /// Lower-cased label name → label id. `None` until first listed.
    labels: Mutex<Option<HashMap<String, String>>>,
}

impl GmailMailbox {
    pub fn new(client: GmailClient) -> Self {
        Self {
            client,
            labels: Mutex::new(None),
        }
    }

    /// Resolve a label name to its id, creating the label if needed.
    ///
    /// The lock is held across the list/create calls so concurrent messages
    /// never create the same label twice.
    async fn resolve_label(&self, name: &str) -> Result<String, ProviderError> {
        let key = name.to_lowercase();
        let mut guard = self.labels.lock().await;

        if guard.is_none() {
            let listed = self.client.list_labels().await.map_err(|e| label_error(name, e))?;
            let map = listed
                .into_iter()
                .map(|l| (l.name.to_lowercase(), l.id))
                .collect::<HashMap<_, _>>();
            debug!(count = map.len(), "Cached Gmail labels");
            *guard = Some(map);
        }

        if let Some(id) = guard.as_ref().and_then(|m| m.get(&key)) {
            return Ok(id.clone());
        }

        let created = self.client.create_label(name).await.map_err(|e| label_error(name, e))?;
        if let Some(map) = guard.as_mut() {
            map.insert(key, created.id.clone());
        }
        Ok(created.id)
    }
}

/// Fatal errors pass through untouched; anything else is scoped to the label.
fn label_error(label: &str, e: ProviderError) -> ProviderError {
    if e.is_fatal() {
        e
    } else {
        ProviderError::Label {
            label: label.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl MailboxPort for GmailMailbox {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn set_read_state(&self, message_id: &str, read: bool) -> Result<(), ProviderError> {
        if read {
            self.client.modify(message_id, &[], &[LABEL_UNREAD]).await
        } else {
            self.client.modify(message_id, &[LABEL_UNREAD], &[]).await
        }
    }

    async fn set_starred(&self, message_id: &str, starred: bool) -> Result<(), ProviderError> {
        if starred {
            self.client.modify(message_id, &[LABEL_STARRED], &[]).await
        } else {
            self.client.modify(message_id, &[], &[LABEL_STARRED]).await
        }
    }

    async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), ProviderError> {
        let label_id = self.resolve_label(label).await?;
        self.client.modify(message_id, &[label_id.as_str()], &[]).await
    }

    async fn trash(&self, message_id: &str) -> Result<(), ProviderError> {
        self.client.trash(message_id).await
    }

    async fn set_inbox_presence(
        &self,
        message_id: &str,
        present: bool,
    ) -> Result<(), ProviderError> {
        if present {
            self.client.modify(message_id, &[LABEL_INBOX], &[]).await
        } else {
            self.client.modify(message_id, &[], &[LABEL_INBOX]).await
        }
    }
}
