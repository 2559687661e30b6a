//! The Multiparty BFV scheme, as described by Christian Mouchet et al. in
//! [Multiparty BFV](https://eprint.iacr.org/2020/304.pdf).
//!
//! Each party holds an additive share of the collective secret key; the
//! collective secret is never materialized. Every protocol follows the same
//! pattern: each party derives a share from its secret-key share and public
//! inputs (a [`CommonRandomPoly`] where applicable), shares are combined
//! with the commutative [`Aggregate`] operation in any order, and the
//! aggregate is finalized into a public artifact or applied to a
//! ciphertext.
//!
//! The conversion and refresh protocols come in two plaintext flavors that
//! share the same RLWE-level cores: an integer flavor whose additive
//! shares live in the plaintext ring Z_t ([`EncToSharesShare`],
//! [`RefreshShare`], ...), and a fixed-point flavor for approximate
//! plaintexts whose shares are bounded integers embedded directly into the
//! ciphertext ring ([`BoundedEncToSharesShare`], [`BoundedRefreshShare`],
//! ...).

mod aggregate;
mod crs;
mod enc_to_shares;
mod fixed_point;
mod galois_key_gen;
mod public_key_gen;
mod public_key_switch;
mod refresh;
mod relin_key_gen;
pub mod round;
mod secret_key_switch;

pub use aggregate::Aggregate;
pub use crs::{CommonRandomPoly, CommonRandomString};
pub use enc_to_shares::{AdditiveShare, EncToSharesShare, SharesToEncShare};
pub use fixed_point::{
    minimum_level_for_bounded_refresh, BoundedAdditiveShare, BoundedEncToSharesShare,
    BoundedRefreshShare, BoundedSharesToEncShare,
};
pub use galois_key_gen::GaloisKeyShare;
pub use public_key_gen::PublicKeyShare;
pub use public_key_switch::PublicKeySwitchShare;
pub use refresh::{minimum_level_for_refresh, RefreshShare};
pub use relin_key_gen::{RelinKeyGenerator, RelinKeyShare};
pub use secret_key_switch::{DecryptionShare, SecretKeySwitchShare};

/// Protocol tags used as the first byte of every serialized share.
pub(crate) mod tags {
    pub(crate) const CKG: u8 = 1;
    pub(crate) const RKG_R1: u8 = 2;
    pub(crate) const RKG_R2: u8 = 3;
    pub(crate) const RTG: u8 = 4;
    pub(crate) const CKS: u8 = 5;
    pub(crate) const PCKS: u8 = 6;
    pub(crate) const E2S: u8 = 7;
    pub(crate) const S2E: u8 = 8;
    pub(crate) const RFR: u8 = 9;
    pub(crate) const E2S_BOUNDED: u8 = 10;
    pub(crate) const S2E_BOUNDED: u8 = 11;
    pub(crate) const RFR_BOUNDED: u8 = 12;
}
