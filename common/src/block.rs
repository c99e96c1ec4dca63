// Height of a block in the chain
pub type BlockHeight = u64;
