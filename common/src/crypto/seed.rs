use sha3::{Digest, Sha3_512};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const WALLET_SEED_SIZE: usize = 32;
pub const RENTER_SEED_SIZE: usize = 64;

// Primary seed of the satellite wallet.
// Never persisted by this crate, always zeroed when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WalletSeed([u8; WALLET_SEED_SIZE]);

impl WalletSeed {
    pub fn new(bytes: [u8; WALLET_SEED_SIZE]) -> Self {
        WalletSeed(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; WALLET_SEED_SIZE] {
        &self.0
    }
}

// Per-renter seed derived from the wallet primary seed and the account email.
// Usable as key material, so it is zeroed on every drop path.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RenterSeed([u8; RENTER_SEED_SIZE]);

impl RenterSeed {
    pub fn as_bytes(&self) -> &[u8; RENTER_SEED_SIZE] {
        &self.0
    }
}

// Derive the seed of a renter account.
// The derivation is deterministic: the same wallet seed and email
// always produce the same renter seed.
pub fn derive_renter_seed(wallet_seed: &WalletSeed, email: &str) -> RenterSeed {
    let mut hasher = Sha3_512::new();
    hasher.update(wallet_seed.as_bytes());
    hasher.update(email.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; RENTER_SEED_SIZE];
    bytes.copy_from_slice(&digest);
    RenterSeed(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let seed = WalletSeed::new([7; WALLET_SEED_SIZE]);
        let a = derive_renter_seed(&seed, "renter@example.com");
        let b = derive_renter_seed(&seed, "renter@example.com");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derivation_depends_on_email() {
        let seed = WalletSeed::new([7; WALLET_SEED_SIZE]);
        let a = derive_renter_seed(&seed, "renter@example.com");
        let b = derive_renter_seed(&seed, "other@example.com");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
