use clap::ValueEnum;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Who a participant is within a conversation.
///
/// The backend spells the agent side both `agent` and `associate`
/// depending on the endpoint, so both are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Trainer,
    Admin,
    #[serde(alias = "associate")]
    Agent,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Trainer => write!(f, "trainer"),
            Role::Admin => write!(f, "admin"),
            Role::Agent => write!(f, "agent"),
            Role::System => write!(f, "system"),
        }
    }
}

impl Role {
    /// Trainer and admin share the privileged actions (create, end, export).
    pub fn is_operator(&self) -> bool {
        matches!(self, Role::Trainer | Role::Admin)
    }
}

/// The local user, as stored in the session and recovered from JWTs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub role: Role,
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// A conversation row as returned by the backend.
///
/// Response bodies are snake_case but a couple of deployments emit
/// camelCase, so every field carries an alias. Conversations are never
/// deleted client-side; `ended` is the terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(alias = "convKey")]
    pub conv_key: String,
    #[serde(alias = "trainerName")]
    pub trainer_name: String,
    #[serde(alias = "associateName")]
    pub associate_name: String,
    /// Server-assigned ISO-8601 start time.
    #[serde(default, alias = "startTime")]
    pub start_time: String,
    #[serde(default)]
    pub ended: bool,
    #[serde(default, alias = "unreadCount")]
    pub unread_count: u64,
    #[serde(default, alias = "msgCount")]
    pub msg_count: u64,
}

impl Conversation {
    /// A queued conversation is one nobody has spoken in yet.
    ///
    /// Source variants disagreed between `msg_count == 0` and
    /// `unread_count == 0`; message count is the only definition that
    /// distinguishes a fresh conversation from a fully-read one.
    pub fn is_queued(&self) -> bool {
        self.msg_count == 0
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Marker text the backend injects as a system message when a trainer
/// ends the conversation.
const END_MARKERS: [&str; 2] = ["conversation ended", "conversation has ended"];

/// One immutable message. Server insertion order is display order; `id`
/// is the dedup key shared between the POST echo and the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "senderName", alias = "sender_name", alias = "sender")]
    pub sender_name: String,
    #[serde(alias = "senderRole")]
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    /// Whether this message is the inline end-of-conversation signal.
    pub fn signals_end(&self) -> bool {
        if self.role != Role::System {
            return false;
        }
        let text = self.text.to_lowercase();
        END_MARKERS.iter().any(|m| text.contains(m))
    }

    /// Whether the message came from someone other than `user`.
    pub fn is_incoming_for(&self, user: &UserProfile) -> bool {
        self.sender_name != user.name || self.role != user.role
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// One SSE payload from `GET /messages?convKey=...`, decoded once at the
/// stream boundary. Payloads with an unknown `type` fail to decode and
/// are dropped by the stream layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Full snapshot replacing the view.
    Init { messages: Vec<Message> },
    /// Incremental batch appended to the view.
    New { messages: Vec<Message> },
    /// Someone is typing; carries no messages and is never deduped.
    Typing {
        #[serde(rename = "userName", alias = "user_name")]
        user_name: String,
    },
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub trainer_name: String,
    pub associate_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationResponse {
    #[serde(rename = "convKey", alias = "conv_key", alias = "key")]
    pub conv_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conv_key: String,
    pub sender_name: String,
    pub sender_role: Role,
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub conv_key: String,
    pub user_name: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLoginRequest {
    pub conv_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLoginResponse {
    pub conv_key: String,
    pub agent_name: String,
    #[serde(default)]
    pub trainer_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndConversationRequest {
    pub conv_key: String,
    pub trainer_name: String,
}

/// Structured `{error: "..."}` body the backend attaches to failures.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
