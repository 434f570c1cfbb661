//! Persisted local session, mirroring the browser client's localStorage
//! slots: token, user, role, conversation key, trainer name.
//!
//! There is no client-side expiry; the only thing that invalidates a
//! session is the backend rejecting its token (401), at which point the
//! caller clears the store and returns to the entry screen.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ChatError;
use crate::model::{Role, UserProfile};

/// The persisted fields. All optional: an agent session has a key but
/// no token, a fresh trainer login has a token but no key yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<UserProfile>,
    pub conv_key: Option<String>,
    pub trainer_name: Option<String>,
}

impl Session {
    /// Logged in means either a token-backed trainer/admin session or a
    /// key-only agent session (agents have no password, hence no token).
    pub fn is_logged_in(&self) -> bool {
        match &self.user {
            Some(user) => self.token.is_some() || user.role == Role::Agent,
            None => false,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().map(|u| u.role)
    }
}

/// File-backed store for [`Session`], JSON on disk.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    session: Session,
}

impl SessionStore {
    /// Open the store at `path`. A missing file is an empty session,
    /// a corrupt one is discarded with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ChatError> {
        let path = path.into();
        let session = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "discarding corrupt session file");
                Session::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Session::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, session })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a trainer/admin login: token plus user profile.
    pub fn set_login(&mut self, token: String, user: UserProfile) -> Result<(), ChatError> {
        self.session.token = Some(token);
        self.session.user = Some(user);
        self.persist()
    }

    /// Store a passwordless agent session bound to a conversation key.
    pub fn set_agent(
        &mut self,
        conv_key: String,
        agent_name: String,
        trainer_name: Option<String>,
    ) -> Result<(), ChatError> {
        self.session.user = Some(UserProfile { name: agent_name, role: Role::Agent });
        self.session.conv_key = Some(conv_key);
        self.session.trainer_name = trainer_name;
        self.persist()
    }

    pub fn set_conversation(&mut self, conv_key: String) -> Result<(), ChatError> {
        self.session.conv_key = Some(conv_key);
        self.persist()
    }

    /// Drop the conversation fields but keep the login. Used when a key
    /// turns out to be invalid or the conversation has ended.
    pub fn clear_conversation(&mut self) -> Result<(), ChatError> {
        self.session.conv_key = None;
        self.session.trainer_name = None;
        self.persist()
    }

    /// Full logout: wipe everything, as the auth guard does on 401.
    pub fn clear(&mut self) -> Result<(), ChatError> {
        self.session = Session::default();
        self.persist()
    }

    fn persist(&self) -> Result<(), ChatError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.session).map_err(|e| ChatError::Decode {
            detail: format!("session serialize: {e}"),
        })?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JWT payload peeking
// ---------------------------------------------------------------------------

/// Shape of the claims we care about inside the token payload.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    name: String,
    role: Role,
}

/// Recover `{name, role}` from a JWT without verifying the signature —
/// verification is the backend's job; the client only needs the display
/// identity. Returns `None` (with a warning) for anything malformed.
pub fn user_from_token(token: &str) -> Option<UserProfile> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .map_err(|e| warn!(error = %e, "invalid JWT payload encoding"))
        .ok()?;
    match serde_json::from_slice::<TokenClaims>(&bytes) {
        Ok(claims) => Some(UserProfile { name: claims.name, role: claims.role }),
        Err(e) => {
            warn!(error = %e, "JWT payload is not the expected claims shape");
            None
        }
    }
}
