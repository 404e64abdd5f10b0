//! Core identifier types for gateway release orchestration.
//!
//! Configuration entities (gateways, stages, resource versions, data planes)
//! are owned by the relational CRUD layer and keep their numeric keys. The
//! records this core creates use 32-byte blake3 digests, hex-encoded for
//! display, so that retried attempts derive the same identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw relational key.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Return the raw relational key.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Big-endian bytes, used for ordered storage keys.
            #[must_use]
            pub const fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self).map_err(|_| IdError::InvalidNumber)
            }
        }
    };
}

macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an identifier from raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Parse an identifier from a hex-encoded string.
            ///
            /// # Errors
            ///
            /// Returns an error if the string is not valid hex or not exactly 64 characters.
            pub fn from_hex(s: &str) -> Result<Self, IdError> {
                let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
                let arr: [u8; 32] = bytes.try_into().map_err(|_| IdError::InvalidLength {
                    expected: 32,
                    got: s.len() / 2,
                })?;
                Ok(Self(arr))
            }

            /// Return the underlying bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Return the hex-encoded string representation.
            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_hex(&value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_hex()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

numeric_id!(
    /// Relational key of a gateway.
    GatewayId
);
numeric_id!(
    /// Relational key of a gateway stage (environment).
    StageId
);
numeric_id!(
    /// Relational key of an immutable resource version snapshot.
    ResourceVersionId
);
numeric_id!(
    /// Relational key of a data plane runtime.
    DataPlaneId
);

digest_id!(
    /// Identifier shared by every history row and task of one dispatch call.
    ///
    /// Callers that may retry a dispatch pass a stable key through
    /// [`AttemptId::from_key`]; everything derived from the attempt is then
    /// identical on the retry.
    AttemptId
);
digest_id!(
    /// Identifier of one `ReleaseHistory` row, derived from
    /// `(attempt, stage, data plane)`.
    HistoryId
);
digest_id!(
    /// Identifier of one `DataPlaneReleaseTask`, derived from
    /// `(attempt, stage, data plane, intent)`.
    TaskId
);

impl DataPlaneId {
    /// Placeholder recorded on history rows that failed before any data
    /// plane was resolved. Relational keys start at 1.
    pub const UNRESOLVED: Self = Self(0);

    /// Returns true for [`DataPlaneId::UNRESOLVED`].
    #[must_use]
    pub const fn is_unresolved(self) -> bool {
        self.0 == 0
    }
}

const ATTEMPT_DOMAIN: &[u8] = b"apigw-release/attempt";
const HISTORY_DOMAIN: &[u8] = b"apigw-release/history";
const TASK_DOMAIN: &[u8] = b"apigw-release/task";

impl AttemptId {
    /// Generate a new unique `AttemptId`.
    ///
    /// The ID is derived from the gateway, the trigger source and the current timestamp.
    #[must_use]
    pub fn generate(gateway_id: GatewayId, source: &str) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let mut hasher = blake3::Hasher::new();
        hasher.update(ATTEMPT_DOMAIN);
        hasher.update(&gateway_id.to_be_bytes());
        hasher.update(source.as_bytes());
        hasher.update(&timestamp.to_le_bytes());

        Self(*hasher.finalize().as_bytes())
    }

    /// Derive a stable `AttemptId` from a caller-supplied key.
    #[must_use]
    pub fn from_key(gateway_id: GatewayId, key: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ATTEMPT_DOMAIN);
        hasher.update(&gateway_id.to_be_bytes());
        hasher.update(b"key:");
        hasher.update(key.as_bytes());

        Self(*hasher.finalize().as_bytes())
    }
}

impl HistoryId {
    /// Derive the history row identifier for one target of an attempt.
    #[must_use]
    pub fn derive(attempt: &AttemptId, stage_id: StageId, data_plane_id: DataPlaneId) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(HISTORY_DOMAIN);
        hasher.update(attempt.as_bytes());
        hasher.update(&stage_id.to_be_bytes());
        hasher.update(&data_plane_id.to_be_bytes());

        Self(*hasher.finalize().as_bytes())
    }
}

/// What a rollout task does to its data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskIntent {
    /// Install or update the stage configuration.
    Deploy,
    /// Remove the stage configuration.
    Teardown,
}

impl TaskIntent {
    const fn tag(self) -> u8 {
        match self {
            Self::Deploy => 1,
            Self::Teardown => 2,
        }
    }
}

impl TaskId {
    /// Derive the task identifier for one target of an attempt.
    #[must_use]
    pub fn derive(
        attempt: &AttemptId,
        stage_id: StageId,
        data_plane_id: DataPlaneId,
        intent: TaskIntent,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(TASK_DOMAIN);
        hasher.update(attempt.as_bytes());
        hasher.update(&stage_id.to_be_bytes());
        hasher.update(&data_plane_id.to_be_bytes());
        hasher.update(&[intent.tag()]);

        Self(*hasher.finalize().as_bytes())
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },

    /// The input is not a non-negative integer.
    #[error("invalid numeric identifier")]
    InvalidNumber,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_id_parse_and_display() {
        let id: GatewayId = "42".parse().unwrap();
        assert_eq!(id, GatewayId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!(matches!(
            "-1".parse::<StageId>(),
            Err(IdError::InvalidNumber)
        ));
    }

    #[test]
    fn attempt_id_from_key_is_stable() {
        let gateway = GatewayId::new(1);
        let a = AttemptId::from_key(gateway, "deploy-7");
        let b = AttemptId::from_key(gateway, "deploy-7");
        assert_eq!(a, b);

        assert_ne!(a, AttemptId::from_key(gateway, "deploy-8"));
        assert_ne!(a, AttemptId::from_key(GatewayId::new(2), "deploy-7"));
    }

    #[test]
    fn attempt_id_generate_unique() {
        let gateway = GatewayId::new(1);
        let a = AttemptId::generate(gateway, "manual-publish");
        let b = AttemptId::generate(gateway, "manual-publish");
        // Due to timestamp, these should be different (with high probability)
        assert_ne!(a, b);
    }

    #[test]
    fn history_id_depends_on_every_component() {
        let attempt = AttemptId::from_key(GatewayId::new(1), "k");
        let base = HistoryId::derive(&attempt, StageId::new(1), DataPlaneId::new(1));

        assert_ne!(base, HistoryId::derive(&attempt, StageId::new(2), DataPlaneId::new(1)));
        assert_ne!(base, HistoryId::derive(&attempt, StageId::new(1), DataPlaneId::new(2)));

        let other = AttemptId::from_key(GatewayId::new(1), "k2");
        assert_ne!(base, HistoryId::derive(&other, StageId::new(1), DataPlaneId::new(1)));
    }

    #[test]
    fn task_id_differs_by_intent() {
        let attempt = AttemptId::from_key(GatewayId::new(1), "k");
        let deploy = TaskId::derive(&attempt, StageId::new(1), DataPlaneId::new(1), TaskIntent::Deploy);
        let teardown =
            TaskId::derive(&attempt, StageId::new(1), DataPlaneId::new(1), TaskIntent::Teardown);
        assert_ne!(deploy, teardown);
    }

    #[test]
    fn digest_id_invalid_hex() {
        assert!(matches!(HistoryId::from_hex("not-hex"), Err(IdError::InvalidHex)));
        assert!(matches!(
            TaskId::from_hex("deadbeef"),
            Err(IdError::InvalidLength { .. })
        ));
    }

    #[test]
    fn digest_id_serde_json() {
        let attempt = AttemptId::from_key(GatewayId::new(9), "serde");
        let json = serde_json::to_string(&attempt).unwrap();
        assert_eq!(json, format!("\"{}\"", attempt.to_hex()));
        let parsed: AttemptId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, attempt);
    }

    #[test]
    fn numeric_id_serde_is_transparent() {
        let json = serde_json::to_string(&DataPlaneId::new(5)).unwrap();
        assert_eq!(json, "5");
        let parsed: DataPlaneId = serde_json::from_str("5").unwrap();
        assert_eq!(parsed, DataPlaneId::new(5));
    }
}
