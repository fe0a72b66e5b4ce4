//! Bearer tokens gating status mutation.
//!
//! Tokens are opaque random hex strings kept in a flat set and persisted as
//! `{"valid_tokens": [...]}`. They carry no identity and never expire.

use std::collections::BTreeSet;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::error::PolicyError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    valid_tokens: BTreeSet<String>,
}

pub struct TokenRegistry {
    path: PathBuf,
    tokens: RwLock<BTreeSet<String>>,
}

impl TokenRegistry {
    /// Load the token file. A missing file is an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PolicyError> {
        let path = path.into();
        let tokens = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeSet::new(),
            Ok(text) => serde_json::from_str::<TokenFile>(&text)?.valid_tokens,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(TokenRegistry {
            path,
            tokens: RwLock::new(tokens),
        })
    }

    /// Generate and persist a new token.
    pub fn issue(&self) -> Result<String, PolicyError> {
        let token = hex::encode(rand::random::<[u8; 16]>());
        let mut tokens = self.tokens.write();
        let mut next = tokens.clone();
        next.insert(token.clone());
        self.save(&next)?;
        *tokens = next;
        tracing::info!("Issued access token");
        Ok(token)
    }

    pub fn is_valid(&self, token: &str) -> bool {
        self.tokens.read().contains(token)
    }

    /// Remove a token. Revoking an unknown token is not an error.
    pub fn revoke(&self, token: &str) -> Result<bool, PolicyError> {
        let mut tokens = self.tokens.write();
        if !tokens.contains(token) {
            return Ok(false);
        }
        let mut next = tokens.clone();
        next.remove(token);
        self.save(&next)?;
        *tokens = next;
        tracing::info!("Revoked access token");
        Ok(true)
    }

    /// Check an `Authorization` header value of the form `Token <t>`.
    /// Returns the token on success.
    pub fn authorize<'a>(&self, header: Option<&'a str>) -> Result<&'a str, PolicyError> {
        let token = header
            .and_then(|h| h.trim().strip_prefix("Token "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PolicyError::Unauthorized("Invalid or missing token".into()))?;
        if !self.is_valid(token) {
            tracing::warn!("Rejected unknown access token");
            return Err(PolicyError::Forbidden("Invalid token".into()));
        }
        Ok(token)
    }

    fn save(&self, tokens: &BTreeSet<String>) -> Result<(), PolicyError> {
        let file = TokenFile {
            valid_tokens: tokens.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}
