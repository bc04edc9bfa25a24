//! Tagged wrapper for sensitive values
//!
//! Brand integration tokens authenticate conversion ingestion and must
//! never leak through response bodies, debug output, or logs. `Secret<T>`
//! redacts the value on every display surface; callers inside the owning
//! boundary reach the inner value through [`Secret::expose`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::encode::IsNull;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::Postgres;
use std::fmt;

const REDACTED: &str = "[REDACTED]";

/// Opaque container for a sensitive value of type `T`
#[derive(Clone, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Secret(value)
    }

    /// Grants access to the inner value; call sites mark the owning boundary
    pub fn expose(&self) -> &T {
        &self.0
    }

    /// Consumes the wrapper, returning the inner value
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Secret(value)
    }
}

/// Serializes as the redaction marker so GET surfaces always mask the value
impl<T> Serialize for Secret<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Secret)
    }
}

// sqlx passthroughs: a Secret column reads and binds exactly like its
// inner type, so models can carry Secret<String> fields directly.

impl<T: sqlx::Type<Postgres>> sqlx::Type<Postgres> for Secret<T> {
    fn type_info() -> PgTypeInfo {
        T::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        T::compatible(ty)
    }
}

impl<'r, T: sqlx::Decode<'r, Postgres>> sqlx::Decode<'r, Postgres> for Secret<T> {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        T::decode(value).map(Secret)
    }
}

impl<'q, T: sqlx::Encode<'q, Postgres>> sqlx::Encode<'q, Postgres> for Secret<T> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        self.0.encode_by_ref(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_are_redacted() {
        let token = Secret::new("tok_super_secret".to_string());
        assert_eq!(format!("{:?}", token), "[REDACTED]");
        assert_eq!(format!("{}", token), "[REDACTED]");
    }

    #[test]
    fn serialization_is_redacted() {
        let token = Secret::new("tok_super_secret".to_string());
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn expose_returns_inner_value() {
        let token = Secret::new("tok_super_secret".to_string());
        assert_eq!(token.expose(), "tok_super_secret");
        assert_eq!(token.into_inner(), "tok_super_secret");
    }

    #[test]
    fn deserializes_from_plain_value() {
        let token: Secret<String> = serde_json::from_str("\"tok_rotated\"").unwrap();
        assert_eq!(token.expose(), "tok_rotated");
    }
}
