use super::transaction::{Transaction, TxHash};
use crate::Result;

use std::collections::BTreeMap;

/// A block in the chain. `block_id` is the chain height of the block.
///
/// Transactions are kept in a `BTreeMap` so that serialization, and
/// therefore the block hash, is identical on every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub transactions: BTreeMap<TxHash, Transaction>,
    pub prev_block_hash: String,
    pub block_id: u64,
}

impl Block {
    pub fn new(
        transactions: BTreeMap<TxHash, Transaction>,
        prev_block_hash: String,
        block_id: u64,
    ) -> Block {
        Block { transactions, prev_block_hash, block_id }
    }

    pub fn genesis() -> Block {
        Block::new(BTreeMap::new(), String::new(), 0)
    }

    /// The raw blake3 digest of the block under a given nonce.
    pub fn digest(&self, nonce: u64) -> Result<[u8; 32]> {
        let mut encoded = bincode::serialize(self)?;
        encoded.extend_from_slice(&nonce.to_be_bytes());
        Ok(blake3::hash(&encoded).as_bytes().clone())
    }

    /// Hex-encoded block hash, as referenced by successor blocks.
    pub fn hash(&self, nonce: u64) -> Result<String> {
        Ok(hex::encode(self.digest(nonce)?))
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "block {} ({} txs)", self.block_id, self.transactions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_shape() {
        let genesis = Block::genesis();
        assert_eq!(genesis.block_id, 0);
        assert_eq!(genesis.prev_block_hash, "");
        assert!(genesis.transactions.is_empty());
    }

    #[test]
    fn hash_is_deterministic() {
        let mut transactions = BTreeMap::new();
        let tx = Transaction::new(vec![7, 7, 7]);
        transactions.insert(tx.hash(), tx);
        let a = Block::new(transactions.clone(), "prev".to_owned(), 1);
        let b = Block::new(transactions, "prev".to_owned(), 1);
        assert_eq!(a.hash(0).unwrap(), b.hash(0).unwrap());
        assert_ne!(a.hash(0).unwrap(), a.hash(1).unwrap());
    }
}
