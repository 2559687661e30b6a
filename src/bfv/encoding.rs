//! The encoding type for BFV.

use fhe_traits::FhePlaintextEncoding;

/// How a vector of values maps onto the plaintext polynomial, at a given
/// level of the modulus chain.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Encoding {
    /// Values become the coefficients of the plaintext polynomial, so
    /// homomorphic operations act as polynomial operations. This is also
    /// the domain in which the additive shares of the conversion and
    /// refresh protocols live.
    Poly {
        /// The level the plaintext targets.
        level: usize,
    },
    /// Values fill the SIMD slots of the plaintext, so homomorphic
    /// operations act component-wise and Galois keys rotate the slots.
    /// Requires a plaintext modulus congruent to 1 modulo twice the
    /// degree.
    Simd {
        /// The level the plaintext targets.
        level: usize,
    },
}

impl Encoding {
    /// A poly encoding at level 0.
    pub fn poly() -> Self {
        Self::Poly { level: 0 }
    }

    /// A simd encoding at level 0.
    pub fn simd() -> Self {
        Self::Simd { level: 0 }
    }

    /// A poly encoding at a given level.
    pub fn poly_at_level(level: usize) -> Self {
        Self::Poly { level }
    }

    /// A simd encoding at a given level.
    pub fn simd_at_level(level: usize) -> Self {
        Self::Simd { level }
    }

    /// The level this encoding targets.
    pub(crate) fn level(&self) -> usize {
        match self {
            Self::Poly { level } | Self::Simd { level } => *level,
        }
    }
}

impl From<&Encoding> for String {
    fn from(e: &Encoding) -> Self {
        format!("{e:?}")
    }
}

impl From<Encoding> for String {
    fn from(e: Encoding) -> Self {
        String::from(&e)
    }
}

impl FhePlaintextEncoding for Encoding {}
