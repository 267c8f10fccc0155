//! Tenant identifiers.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;

use crate::error::{RowGuardError, RowGuardResult};

/// Longest identifier accepted in [`TenantIdFormat::Text`] form.
const MAX_TEXT_LEN: usize = 128;

/// An opaque identifier naming a tenant.
///
/// A `TenantId` is never empty. Whether it is acceptable to a particular
/// database is decided by [`TenantIdFormat::validate`] when a dialect renders
/// it, not at construction.
///
/// Serializes as a string. Deserializes from a string or an integer, so
/// `{"tenantId": 7}` and `{"tenantId": "7"}` both work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct TenantId(SmolStr);

impl TenantId {
    /// Create a new tenant ID, trimming surrounding whitespace.
    pub fn new(id: impl AsRef<str>) -> RowGuardResult<Self> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(RowGuardError::invalid_tenant("tenant id must not be empty"));
        }
        Ok(Self(SmolStr::new(id)))
    }

    /// Get the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret the ID as a signed 64-bit integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = RowGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = RowGuardError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TenantIdVisitor;

        impl Visitor<'_> for TenantIdVisitor {
            type Value = TenantId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-empty string or an integer tenant id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TenantId, E> {
                TenantId::new(v).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<TenantId, E> {
                Ok(TenantId::from(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<TenantId, E> {
                Ok(TenantId(SmolStr::new(v.to_string())))
            }
        }

        deserializer.deserialize_any(TenantIdVisitor)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0.to_string()
    }
}

impl From<i64> for TenantId {
    fn from(i: i64) -> Self {
        Self(SmolStr::new(i.to_string()))
    }
}

impl From<i32> for TenantId {
    fn from(i: i32) -> Self {
        Self(SmolStr::new(i.to_string()))
    }
}

impl From<uuid::Uuid> for TenantId {
    fn from(u: uuid::Uuid) -> Self {
        Self(SmolStr::new(u.hyphenated().to_string()))
    }
}

/// The shape of tenant identifiers the database-side policy expects.
///
/// Session statements interpolate the tenant as a literal (neither
/// `SET` nor `sp_set_session_context` accept bind parameters the same way),
/// so each format whitelists exactly the characters that are safe inside
/// that literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantIdFormat {
    /// Signed 64-bit integer.
    #[default]
    Integer,
    /// Canonical hyphenated UUID.
    Uuid,
    /// Restricted text: ASCII letters, digits, `_`, `.` and `-`.
    Text,
}

impl TenantIdFormat {
    /// Validate a tenant ID, returning the literal body to interpolate.
    pub fn validate(&self, id: &TenantId) -> RowGuardResult<String> {
        match self {
            Self::Integer => id.as_i64().map(|n| n.to_string()).ok_or_else(|| {
                RowGuardError::invalid_tenant(format!("'{}' is not an integer", id))
            }),
            Self::Uuid => uuid::Uuid::parse_str(id.as_str())
                .map(|u| u.hyphenated().to_string())
                .map_err(|_| RowGuardError::invalid_tenant(format!("'{}' is not a UUID", id))),
            Self::Text => {
                let s = id.as_str();
                let safe = s.len() <= MAX_TEXT_LEN
                    && s
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
                if safe {
                    Ok(s.to_string())
                } else {
                    Err(RowGuardError::invalid_tenant(format!(
                        "'{}' contains characters outside [A-Za-z0-9_.-] or exceeds {} bytes",
                        s, MAX_TEXT_LEN
                    )))
                }
            }
        }
    }

    /// Whether rendered values are numeric literals (unquoted).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer)
    }
}

impl FromStr for TenantIdFormat {
    type Err = RowGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "bigint" => Ok(Self::Integer),
            "uuid" => Ok(Self::Uuid),
            "text" | "string" => Ok(Self::Text),
            other => Err(RowGuardError::config(format!(
                "unknown tenant id format: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_creation() {
        let id = TenantId::new("  42 ").unwrap();
        assert_eq!(id.as_str(), "42");
        assert_eq!(id.as_i64(), Some(42));

        let id: TenantId = 7_i64.into();
        assert_eq!(id.to_string(), "7");

        assert!(TenantId::new("   ").is_err());
        assert!("".parse::<TenantId>().is_err());
    }

    #[test]
    fn test_tenant_id_serde_rejects_empty() {
        let id: TenantId = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(id.as_str(), "acme");
        assert!(serde_json::from_str::<TenantId>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acme\"");
    }

    #[test]
    fn test_tenant_id_deserializes_from_integer() {
        let id: TenantId = serde_json::from_str("42").unwrap();
        assert_eq!(id, TenantId::from(42_i64));
        let id: TenantId = serde_json::from_str("-3").unwrap();
        assert_eq!(id.as_i64(), Some(-3));
        assert!(serde_json::from_str::<TenantId>("1.5").is_err());
    }

    #[test]
    fn test_integer_format() {
        let format = TenantIdFormat::Integer;
        assert_eq!(format.validate(&TenantId::from(-1_i64)).unwrap(), "-1");
        assert!(format.validate(&TenantId::new("7; DROP TABLE orders").unwrap()).is_err());
        assert!(format.validate(&TenantId::new("1e3").unwrap()).is_err());
    }

    #[test]
    fn test_uuid_format() {
        let format = TenantIdFormat::Uuid;
        let id = TenantId::new("67E55044-10B1-426F-9247-BB680E5FE0C8").unwrap();
        assert_eq!(
            format.validate(&id).unwrap(),
            "67e55044-10b1-426f-9247-bb680e5fe0c8"
        );
        assert!(format.validate(&TenantId::new("not-a-uuid").unwrap()).is_err());
    }

    #[test]
    fn test_text_format() {
        let format = TenantIdFormat::Text;
        assert_eq!(
            format.validate(&TenantId::new("acme-corp_1.eu").unwrap()).unwrap(),
            "acme-corp_1.eu"
        );
        assert!(format.validate(&TenantId::new("o'brien").unwrap()).is_err());
        assert!(format.validate(&TenantId::new("a b").unwrap()).is_err());
        assert!(format.validate(&TenantId::new("x".repeat(129)).unwrap()).is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("BIGINT".parse::<TenantIdFormat>().unwrap(), TenantIdFormat::Integer);
        assert_eq!("uuid".parse::<TenantIdFormat>().unwrap(), TenantIdFormat::Uuid);
        assert!("blob".parse::<TenantIdFormat>().is_err());
    }
}
