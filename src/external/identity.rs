//! Identity and role lookup
//!
//! Authentication and role policy belong to the identity service. The
//! workflow engine only asks who the caller is, which role they hold and which
//! partner organization they belong to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "PO")]
    PartnerOperator,
    #[serde(rename = "PRBO")]
    PartnerRepresentative,
    #[serde(rename = "SMBO")]
    SheetManager,
    #[serde(rename = "SGVBO")]
    SheetViewer,
    #[serde(rename = "SYSADMIN")]
    SystemAdmin,
}

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub username: String,
    pub role: Role,
    /// Partner organization, absent for back-office staff.
    #[serde(default)]
    pub organization: Option<String>,
}

impl Caller {
    pub fn new(username: impl Into<String>, role: Role, organization: Option<&str>) -> Self {
        Self {
            username: username.into(),
            role,
            organization: organization.map(str::to_string),
        }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::PartnerOperator
    }

    /// True when both callers belong to the same partner organization.
    pub fn shares_organization_with(&self, other: &Caller) -> bool {
        match (&self.organization, &other.organization) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("credential rejected: {0}")]
    Unauthenticated(String),
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves a credential to the caller it was issued to.
    async fn authenticate(&self, credential: &str) -> Result<Caller, IdentityError>;

    /// Looks up another user, e.g. the operator being assigned.
    async fn lookup(&self, username: &str) -> Result<Option<Caller>, IdentityError>;
}

/// Fixed user table. A user's credential is their username unless a token is
/// registered for them.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    users: HashMap<String, Caller>,
    tokens: HashMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, caller: Caller) -> Self {
        self.users.insert(caller.username.clone(), caller);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>, username: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), username.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, credential: &str) -> Result<Caller, IdentityError> {
        let username = self
            .tokens
            .get(credential)
            .map(String::as_str)
            .unwrap_or(credential);
        self.users
            .get(username)
            .cloned()
            .ok_or_else(|| IdentityError::Unauthenticated("unknown credential".to_string()))
    }

    async fn lookup(&self, username: &str) -> Result<Option<Caller>, IdentityError> {
        Ok(self.users.get(username).cloned())
    }
}
