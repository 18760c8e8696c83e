//! Duplicate-sign evidence.
//!
//! Validators caught signing two different messages for the same height
//! are reported through these records. The slashing plugin receives a
//! decoder so it never parses wire bytes itself.

use serde::{Deserialize, Serialize};

use phoenix_core::{H256, NodeId};

use crate::error::{ConsensusError, Result};

/// Which duplicate message the validator produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    DuplicatePrepare,
    DuplicateVote,
    DuplicateViewChange,
}

/// One duplicate-sign report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// The offending validator.
    pub validator: NodeId,
    /// Height both messages were signed for.
    pub number: u64,
    /// Category of the offense.
    pub kind: EvidenceKind,
    /// Digests of the two conflicting messages.
    pub first: H256,
    pub second: H256,
}

impl Evidence {
    /// An evidence record is well formed only if the two signed digests
    /// actually differ.
    pub fn is_valid(&self) -> bool {
        self.first != self.second
    }
}

/// Signature of the decoder handed to the slashing plugin.
pub type EvidenceDecoder = fn(&str) -> Result<Vec<Evidence>>;

/// Decodes a JSON array of evidence records, rejecting malformed ones.
pub fn decode_evidences(raw: &str) -> Result<Vec<Evidence>> {
    let list: Vec<Evidence> =
        serde_json::from_str(raw).map_err(|e| ConsensusError::Evidence(e.to_string()))?;
    for ev in &list {
        if !ev.is_valid() {
            return Err(ConsensusError::Evidence(format!(
                "identical digests in report against {}",
                ev.validator
            )));
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(first: u8, second: u8) -> Evidence {
        Evidence {
            validator: NodeId([1; 64]),
            number: 7,
            kind: EvidenceKind::DuplicateVote,
            first: H256([first; 32]),
            second: H256([second; 32]),
        }
    }

    #[test]
    fn decodes_valid_reports() {
        let json = serde_json::to_string(&vec![report(1, 2)]).unwrap();
        let decoded = decode_evidences(&json).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].kind, EvidenceKind::DuplicateVote);
    }

    #[test]
    fn rejects_identical_digests() {
        let json = serde_json::to_string(&vec![report(3, 3)]).unwrap();
        assert!(decode_evidences(&json).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_evidences("not json").is_err());
    }
}
