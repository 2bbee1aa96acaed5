//! Gmail mailbox — Gmail REST API v1 over reqwest.
//!
//! Uses `users.messages.list`/`get` to fetch, `users.drafts.create` to save
//! replies and `users.getProfile` once at connect time to learn the sender
//! address and verify the token.
//!
//! # Authentication
//!
//! Either a ready access token (`GMAIL_ACCESS_TOKEN`) or an authorized-user
//! `token.json` holding a refresh token. The interactive consent flow is not
//! implemented; create `token.json` with any OAuth tool beforehand.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::mailbox::{DraftRequest, Header, Mailbox, MessagePart, RawMessage, compose_draft_mime};

const NAME: &str = "gmail";
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ── Wire types ──────────────────────────────────────────────────────

/// Authorized-user credentials file (`token.json`).
#[derive(Debug, Deserialize)]
struct AuthorizedUserFile {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// OAuth credentials for the refresh-token grant.
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
    pub token_uri: String,
}

impl std::fmt::Debug for GmailCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailCredentials")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl GmailCredentials {
    /// Load an authorized-user `token.json`.
    pub async fn load(path: &Path) -> Result<Self, MailboxError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MailboxError::AuthFailed {
                name: NAME.into(),
                reason: format!(
                    "cannot read {}: {e} (create it with a Gmail OAuth consent first)",
                    path.display()
                ),
            })?;
        let file: AuthorizedUserFile =
            serde_json::from_str(&raw).map_err(|e| MailboxError::AuthFailed {
                name: NAME.into(),
                reason: format!("invalid {}: {e}", path.display()),
            })?;

        Ok(Self {
            client_id: file.client_id,
            client_secret: SecretString::from(file.client_secret),
            refresh_token: SecretString::from(file.refresh_token),
            token_uri: file
                .token_uri
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    email_address: String,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: Option<String>,
    snippet: Option<String>,
    payload: Option<GmailPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftMessage {
    raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateDraftRequest {
    message: DraftMessage,
}

#[derive(Debug, Deserialize)]
struct DraftResponse {
    id: String,
}

impl From<GmailPart> for MessagePart {
    fn from(part: GmailPart) -> Self {
        Self {
            mime_type: part.mime_type.unwrap_or_default().to_lowercase(),
            headers: part
                .headers
                .unwrap_or_default()
                .into_iter()
                .map(|h| Header::new(h.name, h.value))
                .collect(),
            data: part.body.and_then(|b| b.data),
            parts: part
                .parts
                .unwrap_or_default()
                .into_iter()
                .map(MessagePart::from)
                .collect(),
        }
    }
}

impl From<GmailMessage> for RawMessage {
    fn from(message: GmailMessage) -> Self {
        Self {
            id: message.id,
            thread_id: message.thread_id,
            snippet: message.snippet.unwrap_or_default(),
            payload: message.payload.map(MessagePart::from).unwrap_or_default(),
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

fn build_client() -> Result<reqwest::Client, MailboxError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| MailboxError::Connection {
            name: NAME.into(),
            reason: format!("Failed to build HTTP client: {e}"),
        })
}

fn connection_error(e: reqwest::Error) -> MailboxError {
    MailboxError::Connection {
        name: NAME.into(),
        reason: e.to_string(),
    }
}

/// Map a non-success response to a mailbox error.
async fn handle_error(response: reqwest::Response) -> MailboxError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        401 | 403 => MailboxError::AuthFailed {
            name: NAME.into(),
            reason: format!("HTTP {status}: {body}"),
        },
        429 => MailboxError::RateLimited {
            name: NAME.into(),
            retry_after,
        },
        code => MailboxError::Api {
            name: NAME.into(),
            status: code,
            body,
        },
    }
}

async fn parse_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, MailboxError> {
    if !response.status().is_success() {
        return Err(handle_error(response).await);
    }
    response
        .json()
        .await
        .map_err(|e| MailboxError::InvalidMessage(format!("unexpected Gmail response: {e}")))
}

/// Exchange a refresh token for an access token.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    credentials: &GmailCredentials,
) -> Result<SecretString, MailboxError> {
    let params = [
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.expose_secret()),
        ("refresh_token", credentials.refresh_token.expose_secret()),
        ("grant_type", "refresh_token"),
    ];

    let response = client
        .post(&credentials.token_uri)
        .form(&params)
        .send()
        .await
        .map_err(connection_error)?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(MailboxError::AuthFailed {
            name: NAME.into(),
            reason: format!("token refresh failed ({status}): {body}"),
        });
    }

    let token: TokenResponse = response.json().await.map_err(|e| MailboxError::AuthFailed {
        name: NAME.into(),
        reason: format!("invalid token response: {e}"),
    })?;
    debug!("Refreshed Gmail access token");
    Ok(SecretString::from(token.access_token))
}

/// Mailbox backed by a Gmail account.
pub struct GmailMailbox {
    client: reqwest::Client,
    api_base: String,
    access_token: SecretString,
    email_address: String,
}

impl std::fmt::Debug for GmailMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailMailbox")
            .field("api_base", &self.api_base)
            .field("email_address", &self.email_address)
            .finish_non_exhaustive()
    }
}

impl GmailMailbox {
    /// Authenticate from config and verify the account.
    pub async fn connect(config: &MailboxConfig) -> Result<Self, MailboxError> {
        let client = build_client()?;
        let access_token = match &config.gmail_access_token {
            Some(token) => token.clone(),
            None => {
                let credentials = GmailCredentials::load(&config.gmail_token_path).await?;
                refresh_access_token(&client, &credentials).await?
            }
        };
        Self::connect_with(client, GMAIL_API_BASE, access_token).await
    }

    /// Connect to an explicit API base with a ready access token.
    pub async fn connect_to(
        api_base: impl Into<String>,
        access_token: SecretString,
    ) -> Result<Self, MailboxError> {
        Self::connect_with(build_client()?, api_base, access_token).await
    }

    async fn connect_with(
        client: reqwest::Client,
        api_base: impl Into<String>,
        access_token: SecretString,
    ) -> Result<Self, MailboxError> {
        let mut mailbox = Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            access_token,
            email_address: String::new(),
        };

        let profile: ProfileResponse = mailbox.get_json("/profile", &[]).await?;
        info!(email = %profile.email_address, "Connected to Gmail");
        mailbox.email_address = profile.email_address;
        Ok(mailbox)
    }

    /// Address of the authenticated account.
    pub fn email_address(&self) -> &str {
        &self.email_address
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, MailboxError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, endpoint))
            .bearer_auth(self.access_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(connection_error)?;
        parse_json(response).await
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, query: &str, max_results: u32) -> Result<Vec<RawMessage>, MailboxError> {
        let list: MessageListResponse = self
            .get_json(
                "/messages",
                &[
                    ("q", query.to_string()),
                    ("maxResults", max_results.to_string()),
                ],
            )
            .await?;

        let mut messages = Vec::with_capacity(list.messages.len());
        for message_ref in list.messages.iter().take(max_results as usize) {
            let message: GmailMessage = self
                .get_json(
                    &format!("/messages/{}", message_ref.id),
                    &[("format", "full".to_string())],
                )
                .await?;
            messages.push(RawMessage::from(message));
        }

        debug!(count = messages.len(), "Fetched Gmail messages");
        Ok(messages)
    }

    async fn create_draft(&self, draft: &DraftRequest) -> Result<String, MailboxError> {
        let mime = compose_draft_mime(&self.email_address, draft)?;
        let body = CreateDraftRequest {
            message: DraftMessage {
                raw: BASE64_URL_SAFE.encode(mime),
                thread_id: draft.thread_id.clone(),
            },
        };

        let response = self
            .client
            .post(format!("{}/drafts", self.api_base))
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(connection_error)?;

        let created: DraftResponse = parse_json(response).await?;
        Ok(created.id)
    }
}
