#![warn(missing_docs, unused_imports)]

//! The Brakerski-Fan-Vercauteren homomorphic encryption scheme: the
//! single-party layer the multiparty protocols are expressed against.

mod ciphertext;
mod encoding;
mod keys;
mod ops;
mod parameters;
mod plaintext;

pub use ciphertext::Ciphertext;
pub(crate) use ciphertext::{read_poly, read_u8, write_poly};
pub use encoding::Encoding;
pub(crate) use keys::KeySwitchingKey;
pub use keys::{GaloisKey, PublicKey, RelinearizationKey, SecretKey};
pub use ops::Multiplicator;
pub use parameters::{BfvParameters, BfvParametersBuilder};
pub use plaintext::Plaintext;
pub(crate) use plaintext::{scale_down, scale_up};
