//! Node identity keys.
//!
//! A node is identified by a secp256k1 keypair. The public half, encoded
//! uncompressed without the tag byte, is the 64-byte [`NodeId`] carried in
//! validator sets and peer records.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::error::{CoreError, Result};
use crate::types::{Address, NodeId, H256};

/// The node's secp256k1 identity key.
#[derive(Clone)]
pub struct NodeKey {
    secret: SecretKey,
    public: PublicKey,
}

impl NodeKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        Self { secret, public }
    }

    /// Loads a key from its 32-byte hex encoding.
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret);
        Ok(Self { secret, public })
    }

    /// Hex encoding of the secret key, for the node key file.
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    /// The 64-byte node identity derived from the public key.
    pub fn node_id(&self) -> NodeId {
        let uncompressed = self.public.serialize_uncompressed();
        let mut out = [0u8; 64];
        out.copy_from_slice(&uncompressed[1..65]);
        NodeId(out)
    }

    /// The account address derived from the node identity.
    pub fn address(&self) -> Address {
        Address::from_node_id(&self.node_id())
    }

    /// Signs a 32-byte digest, returning the 65-byte recoverable form.
    pub fn sign(&self, digest: &H256) -> Result<[u8; 65]> {
        let message = Message::from_digest(digest.0);
        let sig = Secp256k1::new().sign_ecdsa_recoverable(&message, &self.secret);
        let (recovery, compact) = sig.serialize_compact();
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&compact);
        out[64] = recovery.to_i32() as u8;
        Ok(out)
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half.
        f.debug_struct("NodeKey")
            .field("node_id", &self.node_id())
            .finish()
    }
}

/// Recovers the signing node identity from a digest and signature.
pub fn recover_node_id(digest: &H256, signature: &[u8; 65]) -> Result<NodeId> {
    let recovery = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
    let sig = RecoverableSignature::from_compact(&signature[..64], recovery)
        .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
    let message = Message::from_digest(digest.0);
    let public = Secp256k1::new()
        .recover_ecdsa(&message, &sig)
        .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
    let uncompressed = public.serialize_uncompressed();
    let mut out = [0u8; 64];
    out.copy_from_slice(&uncompressed[1..65]);
    Ok(NodeId(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let key = NodeKey::generate();
        let restored = NodeKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(restored.node_id(), key.node_id());
    }

    #[test]
    fn sign_and_recover() {
        let key = NodeKey::generate();
        let digest = H256::hash_of(b"seal me");
        let sig = key.sign(&digest).unwrap();
        assert_eq!(recover_node_id(&digest, &sig).unwrap(), key.node_id());
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(NodeKey::from_hex("zz").is_err());
        assert!(NodeKey::from_hex("0x01").is_err());
    }
}
