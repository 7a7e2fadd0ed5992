pub mod address;
pub mod block;
pub mod chain;
pub mod transaction;

pub use address::Address;
pub use block::Block;
pub use chain::{Chain, GetTip, InsertBlock, SetPruner, TipResult};
pub use transaction::{Transaction, TxHash};
