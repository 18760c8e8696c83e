//! Fixed-size value types: hashes, addresses, and validator identities.
//!
//! Serialization is format-aware: human-readable formats (JSON config and
//! genesis files) carry `0x`-prefixed hex strings, binary formats (the
//! database encoding) carry the raw bytes.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

macro_rules! impl_fixed_bytes {
    ($name:ident, $len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Byte width of the value.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Returns the all-zero value.
            pub fn zero() -> Self {
                Self::ZERO
            }

            /// True when every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Builds the value from a slice, checking the length.
            pub fn from_slice(data: &[u8]) -> Result<Self, CoreError> {
                if data.len() != $len {
                    return Err(CoreError::InvalidLength {
                        expected: $len,
                        got: data.len(),
                    });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(data);
                Ok(Self(out))
            }

            /// Raw bytes of the value.
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let stripped = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(stripped)?;
                Self::from_slice(&bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
                } else {
                    serializer.serialize_bytes(&self.0)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct BytesVisitor;

                impl<'de> Visitor<'de> for BytesVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "{} bytes or a hex string", $len)
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        v.parse().map_err(de::Error::custom)
                    }

                    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                        $name::from_slice(v).map_err(de::Error::custom)
                    }

                    fn visit_seq<A: de::SeqAccess<'de>>(
                        self,
                        mut seq: A,
                    ) -> Result<Self::Value, A::Error> {
                        let mut out = [0u8; $len];
                        for (i, slot) in out.iter_mut().enumerate() {
                            *slot = seq
                                .next_element()?
                                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                        }
                        Ok($name(out))
                    }
                }

                if deserializer.is_human_readable() {
                    deserializer.deserialize_str(BytesVisitor)
                } else {
                    deserializer.deserialize_bytes(BytesVisitor)
                }
            }
        }
    };
}

impl_fixed_bytes!(H256, 32, "A 32-byte hash.");
impl_fixed_bytes!(Address, 20, "A 20-byte account address.");
impl_fixed_bytes!(NodeId, 64, "A 64-byte node identity (uncompressed public key).");

impl Default for H256 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::ZERO
    }
}

impl H256 {
    /// SHA-256 of arbitrary bytes.
    pub fn hash_of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }
}

impl Address {
    /// Derives an address from a node identity by truncating its hash.
    pub fn from_node_id(id: &NodeId) -> Self {
        let digest = Sha256::digest(id.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..32]);
        Self(out)
    }
}

/// One entry of the configured validator set: identity plus dial address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorNode {
    /// Node identity.
    pub id: NodeId,
    /// TCP endpoint the consensus layer dials.
    pub address: SocketAddr,
}

impl ValidatorNode {
    /// Creates a validator entry.
    pub fn new(id: NodeId, address: SocketAddr) -> Self {
        Self { id, address }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h: H256 = "0x0101010101010101010101010101010101010101010101010101010101010101"
            .parse()
            .unwrap();
        assert_eq!(h.0, [1u8; 32]);
        assert_eq!(
            h.to_string(),
            "0x0101010101010101010101010101010101010101010101010101010101010101"
        );
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("0x0102".parse::<Address>().is_err());
        assert!(H256::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn json_uses_hex_strings() {
        let addr = Address([0xab; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn bincode_uses_raw_bytes() {
        let id = NodeId([7u8; 64]);
        let bytes = bincode::serialize(&id).unwrap();
        let back: NodeId = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn zero_checks() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address([1u8; 20]).is_zero());
    }
}
