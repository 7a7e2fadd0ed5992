//! Block signing and verification.
//!
//! A proposed block travels in a [BlockContainer] carrying the proposer's
//! public key and an ed25519 signature over the block hash.

use crate::ledger::Block;
use crate::Result;

use ed25519_dalek::{Keypair, PublicKey, Signature, Signer, Verifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockContainer {
    pub block: Block,
    pub public_key: PublicKey,
    pub signature: Signature,
}

pub fn sign_block(keypair: &Keypair, block: &Block) -> Result<BlockContainer> {
    let hash = block.hash(0)?;
    let signature = keypair.sign(hash.as_bytes());
    Ok(BlockContainer { block: block.clone(), public_key: keypair.public, signature })
}

pub fn verify_block(container: &BlockContainer) -> bool {
    match container.block.hash(0) {
        Ok(hash) => {
            container.public_key.verify(hash.as_bytes(), &container.signature).is_ok()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn signed_blocks_verify() {
        let mut csprng = OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        let container = sign_block(&keypair, &Block::genesis()).unwrap();
        assert!(verify_block(&container));
    }

    #[test]
    fn tampered_blocks_fail_verification() {
        let mut csprng = OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        let mut container = sign_block(&keypair, &Block::genesis()).unwrap();
        container.block.block_id = 5;
        assert!(!verify_block(&container));
    }
}
