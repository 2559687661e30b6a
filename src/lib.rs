#![crate_name = "fhe_multiparty"]
#![crate_type = "lib"]
#![warn(missing_docs, unused_imports)]

//! Multiparty (threshold) BFV protocols, as described by Mouchet et al. in
//! [Multiparty BFV](https://eprint.iacr.org/2020/304.pdf), built on the
//! fhe.rs mathematical stack.
//!
//! N parties hold additive shares of a collective secret key. The protocols
//! in [`mbfv`] let them jointly produce public material (public key,
//! relinearization key, rotation keys), switch and decrypt ciphertexts, and
//! refresh the noise of a ciphertext through a single interactive round,
//! without ever reconstructing the collective secret. The [`bfv`] module is
//! the single-party scheme layer the protocols are expressed against.

mod errors;

pub mod bfv;
pub mod mbfv;
pub use errors::{Error, ParametersError, Result};
