//! Storage built on an embedded `sled` database.
//!
//! Every entity type lives in its own tree, keyed by its uuid. Entities that
//! belong to a parent, like campaign recipients, are stored in a separate
//! child tree keyed by the parent id followed by the big-endian position,
//! which keeps them ordered and individually addressable.

mod sled;

use ::sled::transaction::ConflictableTransactionError;
use uuid::Uuid;

use crate::{Error, ErrorKind, Result};

pub use self::sled::SledDb as Database;

pub trait Identifiable {
    fn get_id(&self) -> Uuid;
}

pub trait Collectable {
    fn get_collection_name() -> &'static str;
}

pub type ChildKey = [u8; 20];

/// Builds the key of the `index`-th child of `parent`.
pub fn child_key(parent: Uuid, index: u32) -> ChildKey {
    let mut key = [0u8; 20];
    key[..16].copy_from_slice(parent.as_bytes());
    key[16..].copy_from_slice(&index.to_be_bytes());
    key
}

/// Splits a child key back into the parent id and position.
pub fn parse_child_key(key: &[u8]) -> Result<(Uuid, u32)> {
    if key.len() != 20 {
        return Err(ErrorKind::DbError(format!("malformed child key of length {}", key.len())).into());
    }
    let parent = Uuid::from_slice(&key[..16])?;
    let mut index = [0u8; 4];
    index.copy_from_slice(&key[16..]);
    Ok((parent, u32::from_be_bytes(index)))
}

/// Aborts a running transaction with one of our errors.
pub fn abort<E: Into<Error>>(e: E) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(e.into())
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let t: T = pot::from_slice(bytes)?;
    Ok(t)
}

pub fn encode<T: serde::Serialize>(item: &T) -> Result<Vec<u8>> {
    let bytes = pot::to_vec(item)?;
    Ok(bytes)
}
