//! Session data model and its persisted envelope
//!
//! A `Session` holds its tokens as an `Option<TokenPair>`, so a half-present
//! credential cannot be represented in memory. The persisted envelope keeps
//! the flat `accessToken`/`refreshToken` fields the backend and older
//! clients expect; converting back rejects partial pairs.

use common::Secret;
use serde::{Deserialize, Deserializer, Serialize};

/// Envelope schema version written by this crate.
pub const PERSISTED_VERSION: u32 = 1;

/// Denormalized profile snapshot kept alongside the tokens.
///
/// Only `id`, `name`, `email` and `role` are interpreted. Anything else the
/// backend sends (flags, avatar, clinic id, ...) rides along in `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            role: role.into(),
            attributes: serde_json::Map::new(),
        }
    }
}

/// Backends are inconsistent about numeric vs string user ids.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Access + refresh token, always together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    access: Secret<String>,
    refresh: Secret<String>,
}

impl TokenPair {
    /// Returns `None` unless both tokens are non-empty.
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Option<Self> {
        Some(Self {
            access: Secret::non_empty(access)?,
            refresh: Secret::non_empty(refresh)?,
        })
    }

    pub fn access(&self) -> &Secret<String> {
        &self.access
    }

    pub fn refresh(&self) -> &Secret<String> {
        &self.refresh
    }
}

/// Everything a successful login hands to the session store.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Option<UserIdentity>,
    pub profile_completed: bool,
    pub remember_me: bool,
}

/// The authoritative credential state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    tokens: Option<TokenPair>,
    pub user: Option<UserIdentity>,
    /// Fixed at login; decides which backend holds the session.
    pub remember_me: bool,
    pub profile_completed: bool,
}

impl Session {
    /// Build a session from a login grant. Empty tokens yield an
    /// unauthenticated session that still carries the user snapshot.
    pub fn from_grant(grant: LoginGrant) -> Self {
        Self {
            tokens: TokenPair::new(grant.access_token, grant.refresh_token),
            user: grant.user,
            remember_me: grant.remember_me,
            profile_completed: grant.profile_completed,
        }
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    pub fn access_token(&self) -> Option<&Secret<String>> {
        self.tokens.as_ref().map(TokenPair::access)
    }

    pub fn refresh_token(&self) -> Option<&Secret<String>> {
        self.tokens.as_ref().map(TokenPair::refresh)
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    pub(crate) fn replace_tokens(&mut self, tokens: Option<TokenPair>) {
        self.tokens = tokens;
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            state: PersistedState {
                access_token: self.access_token().cloned(),
                refresh_token: self.refresh_token().cloned(),
                user: self.user.clone(),
                remember_me: self.remember_me,
                profile_completed: self.profile_completed,
                is_authenticated: self.is_authenticated(),
            },
            version: PERSISTED_VERSION,
        }
    }

    /// Rebuild a session from storage. Returns `None` for a partial token
    /// pair; the stored `isAuthenticated` flag is ignored and recomputed.
    pub fn from_persisted(persisted: PersistedSession) -> Option<Self> {
        let state = persisted.state;
        let access = state.access_token.filter(|t| !t.expose().is_empty());
        let refresh = state.refresh_token.filter(|t| !t.expose().is_empty());
        let tokens = match (access, refresh) {
            (Some(access), Some(refresh)) => Some(TokenPair { access, refresh }),
            (None, None) => None,
            _ => return None,
        };
        Some(Self {
            tokens,
            user: state.user,
            remember_me: state.remember_me,
            profile_completed: state.profile_completed,
        })
    }
}

/// The JSON envelope written to storage: `{"state": {...}, "version": 1}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub state: PersistedState,
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub access_token: Option<Secret<String>>,
    #[serde(default)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default)]
    pub user: Option<UserIdentity>,
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub profile_completed: bool,
    #[serde(default)]
    pub is_authenticated: bool,
}
