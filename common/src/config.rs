// Network-wide constants shared by the satellite and its collaborators.

// Sector is the atomic unit of storage on hosts
// 4 MiB, every upload and download is accounted in sectors
pub const SECTOR_SIZE: u64 = 1 << 22;

// Block cadence of the underlying chain
// ~10 minutes per block
pub const BLOCKS_PER_HOUR: u64 = 6;
pub const BLOCKS_PER_DAY: u64 = 24 * BLOCKS_PER_HOUR;
pub const BLOCKS_PER_WEEK: u64 = 7 * BLOCKS_PER_DAY;
pub const BLOCKS_PER_MONTH: u64 = 30 * BLOCKS_PER_DAY;

// Levy applied by the network on every file contract payout
// 3.9%, rounded down
pub const CONTRACT_TAX_NUMERATOR: u64 = 39;
pub const CONTRACT_TAX_DENOMINATOR: u64 = 1000;
