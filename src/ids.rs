use std::fmt;

use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};

/// Alphabet for public ids (URL safe, 64 symbols).
const ALPHABET: &[u8] = b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Length of a generated public id. 21 symbols of a 64-symbol alphabet is 126 bits.
pub const PUBLIC_ID_LEN: usize = 21;

/// Identifier handed out to clients for any entity.
///
/// Drawn from the OS RNG, so it carries no information about creation order,
/// row count or the record store's own key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PublicId(String);

impl PublicId {
    /// Fresh, random public id.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let id = (0..PUBLIC_ID_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// True if the value could have been produced by [`PublicId::generate`].
    /// Malformed ids can never resolve, so callers skip the store round trip.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == PUBLIC_ID_LEN && self.0.bytes().all(|b| ALPHABET.contains(&b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PublicId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PublicId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primary key assigned by the record store.
///
/// Intentionally not `Serialize`: a response type that embeds one does not compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct InternalKey(i64);

impl InternalKey {
    pub(crate) fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_well_formed() {
        let id = PublicId::generate();
        assert_eq!(id.as_str().len(), PUBLIC_ID_LEN);
        assert!(id.is_well_formed());
    }

    #[test]
    fn generated_ids_do_not_repeat() {
        let ids: HashSet<PublicId> = (0..10_000).map(|_| PublicId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn rejects_foreign_shapes() {
        assert!(!PublicId::from("42").is_well_formed());
        assert!(!PublicId::from("").is_well_formed());
        assert!(!PublicId::from("aaaaaaaaaaaaaaaaaaaa!").is_well_formed());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = PublicId::from("V1StGXR8_Z5jdHi6B-myT");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"V1StGXR8_Z5jdHi6B-myT\"");
    }
}
