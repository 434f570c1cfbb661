//! Thin request/response wrappers over the Mock Chat backend.
//!
//! Every method here is a single HTTP exchange with no independent
//! logic; the interesting behavior lives in [`crate::stream`] and
//! [`crate::view`]. Backend `{error: "..."}` bodies are forwarded
//! verbatim, 401 maps to [`ChatError::Unauthorized`], and a 404 on a
//! conversation lookup maps to [`ChatError::InvalidKey`].

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::model::{
    AgentLoginRequest, AgentLoginResponse, Conversation, CreateConversationRequest,
    CreateConversationResponse, EndConversationRequest, ErrorBody, LoginRequest, LoginResponse,
    MarkReadRequest, Message, Role, SendMessageRequest,
};

/// Which conversations a listing should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationFilter {
    /// Every conversation (`?all=true`).
    All,
    /// Conversations owned by one trainer (`?trainer=NAME`).
    Trainer(String),
}

/// HTTP client for the backend API.
///
/// Holds two `reqwest` clients: one with a per-request read timeout for
/// plain calls, and one with only a connect timeout for the SSE stream
/// (a read timeout would cut a healthy stream off mid-flight).
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: Client,
    stream_client: Client,
}

impl ApiClient {
    /// Start building a client aimed at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    /// Build a client straight from a [`ClientConfig`] and an optional
    /// session token.
    pub fn from_config(config: &ClientConfig, token: Option<String>) -> Self {
        let mut builder = Self::builder(&config.base_url)
            .connect_timeout(config.connect_timeout)
            .request_timeout(config.request_timeout);
        if let Some(token) = token {
            builder = builder.token(token);
        }
        builder.build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }

    // -----------------------------------------------------------------------
    // Conversation lifecycle
    // -----------------------------------------------------------------------

    /// `POST /conversation` — create a conversation; the returned key is
    /// surfaced to the operator for out-of-band sharing with the agent.
    pub async fn create_conversation(
        &self,
        trainer_name: &str,
        associate_name: &str,
    ) -> Result<CreateConversationResponse, ChatError> {
        let body = CreateConversationRequest {
            trainer_name: trainer_name.to_string(),
            associate_name: associate_name.to_string(),
        };
        self.post_json("conversation", &body, None).await
    }

    /// `GET /conversations` — list rows, filtered server-side.
    pub async fn list_conversations(
        &self,
        filter: ConversationFilter,
    ) -> Result<Vec<Conversation>, ChatError> {
        let path = match filter {
            ConversationFilter::All => "conversations?all=true".to_string(),
            ConversationFilter::Trainer(name) => format!("conversations?trainer={name}"),
        };
        self.get_json(&path, None).await
    }

    /// `GET /conversation?convKey=...` — single lookup, used to validate
    /// a key at agent join time. 404 means the key is bad.
    pub async fn get_conversation(&self, conv_key: &str) -> Result<Conversation, ChatError> {
        self.get_json(&format!("conversation?convKey={conv_key}"), Some(conv_key))
            .await
    }

    /// `POST /endConversation` — trainer/admin ends the conversation.
    pub async fn end_conversation(
        &self,
        conv_key: &str,
        trainer_name: &str,
    ) -> Result<(), ChatError> {
        let body = EndConversationRequest {
            conv_key: conv_key.to_string(),
            trainer_name: trainer_name.to_string(),
        };
        self.post_no_body("endConversation", &body, Some(conv_key)).await
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// `GET /messages?convKey=...` — full message history, server order.
    pub async fn get_messages(&self, conv_key: &str) -> Result<Vec<Message>, ChatError> {
        self.get_json(&format!("messages?convKey={conv_key}"), Some(conv_key))
            .await
    }

    /// `POST /messages` — send; the response is the inserted record
    /// carrying the server-assigned `id` used for dedup reconciliation.
    pub async fn send_message(
        &self,
        conv_key: &str,
        sender_name: &str,
        sender_role: Role,
        text: &str,
    ) -> Result<Message, ChatError> {
        let body = SendMessageRequest {
            conv_key: conv_key.to_string(),
            sender_name: sender_name.to_string(),
            sender_role,
            text: text.to_string(),
        };
        self.post_json("messages", &body, Some(conv_key)).await
    }

    /// `POST /messageRead` — update read-state so unread badges settle.
    pub async fn mark_read(&self, conv_key: &str, user_name: &str) -> Result<(), ChatError> {
        let body = MarkReadRequest {
            conv_key: conv_key.to_string(),
            user_name: user_name.to_string(),
        };
        self.post_no_body("messageRead", &body, Some(conv_key)).await
    }

    /// Open `GET /messages?convKey=...` as an SSE stream. The caller
    /// (the stream layer) owns reading and reconnecting.
    pub async fn open_message_stream(
        &self,
        conv_key: &str,
    ) -> Result<reqwest::Response, ChatError> {
        let url = self.url(&format!("messages?convKey={conv_key}"));
        debug!(%url, "opening message stream");
        let resp = self
            .with_auth(self.stream_client.get(&url))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| ChatError::Connect { url: url.clone(), detail: e.to_string() })?;
        let status = resp.status();
        if !status.is_success() {
            let bytes = resp.bytes().await.unwrap_or_default();
            return Err(map_error(status.as_u16(), &url, &bytes, Some(conv_key)));
        }
        Ok(resp)
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    /// `POST /auth/login` — trainer/admin credential login.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ChatError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post_json("auth/login", &body, None).await
    }

    /// `POST /agent-login` — passwordless agent entry by key.
    pub async fn agent_login(&self, conv_key: &str) -> Result<AgentLoginResponse, ChatError> {
        let body = AgentLoginRequest { conv_key: conv_key.to_string() };
        self.post_json("agent-login", &body, Some(conv_key)).await
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        conv_key: Option<&str>,
    ) -> Result<T, ChatError> {
        let url = self.url(path);
        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ChatError::Connect { url: url.clone(), detail: e.to_string() })?;
        decode_response(resp, &url, conv_key).await
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        conv_key: Option<&str>,
    ) -> Result<T, ChatError> {
        let url = self.url(path);
        let resp = self
            .with_auth(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::Connect { url: url.clone(), detail: e.to_string() })?;
        decode_response(resp, &url, conv_key).await
    }

    async fn post_no_body<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
        conv_key: Option<&str>,
    ) -> Result<(), ChatError> {
        let url = self.url(path);
        let resp = self
            .with_auth(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::Connect { url: url.clone(), detail: e.to_string() })?;
        let status = resp.status();
        if !status.is_success() {
            let bytes = resp.bytes().await.unwrap_or_default();
            return Err(map_error(status.as_u16(), &url, &bytes, conv_key));
        }
        Ok(())
    }
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    url: &str,
    conv_key: Option<&str>,
) -> Result<T, ChatError> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| ChatError::Decode { detail: e.to_string() })?;
    if !status.is_success() {
        return Err(map_error(status.as_u16(), url, &bytes, conv_key));
    }
    serde_json::from_slice(&bytes).map_err(|e| ChatError::Decode {
        detail: format!("{url}: {e}"),
    })
}

/// Map a non-2xx response to the error taxonomy. Pure so it can be
/// tested without a server.
fn map_error(status: u16, url: &str, body: &[u8], conv_key: Option<&str>) -> ChatError {
    if status == 401 {
        return ChatError::Unauthorized;
    }
    if status == 404 {
        if let Some(conv_key) = conv_key {
            return ChatError::InvalidKey { conv_key: conv_key.to_string() };
        }
    }
    if let Ok(body) = serde_json::from_slice::<ErrorBody>(body) {
        return ChatError::Backend { message: body.error };
    }
    ChatError::Http { status, url: url.to_string() }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    token: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Attach a bearer token (trainer/admin sessions; agents have none).
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-request read timeout (default 10 s). Never
    /// applied to the SSE stream.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ApiClient {
        // reqwest::Client::builder() can fail in extreme environments;
        // fall back to a default client instead of panicking.
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .unwrap_or_default();
        let stream_client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .unwrap_or_default();
        ApiClient {
            base_url: self.base_url,
            token: self.token,
            client,
            stream_client,
        }
    }
}
