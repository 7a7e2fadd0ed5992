/// Hex-encoded blake3 digest of a transaction's contents.
pub type TxHash = String;

/// An opaque payload, identified by the hash of its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(data: Vec<u8>) -> Transaction {
        Transaction { data }
    }

    pub fn hash(&self) -> TxHash {
        hex::encode(blake3::hash(&self.data).as_bytes())
    }
}
