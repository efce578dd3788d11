#![forbid(unsafe_code)]

//! Entity identifiers.
//!
//! Every row is keyed by a 24 character lowercase hex string: a 4 byte
//! big-endian unix timestamp followed by 8 random bytes. Handlers parse path
//! segments into [`EntityId`] before touching the store so a malformed id is
//! always a validation error, never a lookup miss.

use std::fmt;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ID_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier must be {ID_LEN} characters long, got {0}")]
    Length(usize),
    #[error("identifier must only contain hexadecimal characters")]
    NotHex,
}

impl EntityId {
    /// Mints a fresh identifier for the current second.
    pub fn generate() -> Self {
        let seconds = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let mut random = [0u8; 8];
        OsRng.fill_bytes(&mut random);

        let mut raw = String::with_capacity(ID_LEN);
        for byte in seconds.to_be_bytes().iter().chain(random.iter()) {
            raw.push_str(&format!("{byte:02x}"));
        }
        Self(raw)
    }

    pub fn parse(value: &str) -> Result<Self, IdError> {
        let value = value.trim();
        if value.len() != ID_LEN {
            return Err(IdError::Length(value.len()));
        }
        if !value.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(IdError::NotHex);
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Wraps a value read back from the store. Rows are only ever written with
    /// generated ids so no validation happens here.
    pub(crate) fn from_store(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
