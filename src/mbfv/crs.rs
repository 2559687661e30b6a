//! Common reference string and the common random polynomials derived from
//! it.

use std::sync::Arc;

use crate::bfv::BfvParameters;
use crate::Result;
use fhe_math::rq::Poly;
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A handle on a _common reference string_.
///
/// Every party constructs the handle from the same 32-byte seed, published
/// out of band. The handle is a deterministic PRNG: two handles built from
/// the same seed produce bit-identical byte streams, so the same sequence of
/// [`CommonRandomPoly`] sampling calls yields bit-identical polynomials on
/// every party, on every architecture. `SampleCRP` never reads system
/// randomness.
#[derive(Debug, Clone)]
pub struct CommonRandomString {
    prng: ChaCha8Rng,
}

impl CommonRandomString {
    /// Create the handle from the shared seed.
    pub fn new(seed: <ChaCha8Rng as SeedableRng>::Seed) -> Self {
        Self {
            prng: ChaCha8Rng::from_seed(seed),
        }
    }
}

impl RngCore for CommonRandomString {
    fn next_u32(&mut self) -> u32 {
        self.prng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.prng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.prng.fill_bytes(dest)
    }
}

impl CryptoRng for CommonRandomString {}

/// A polynomial sampled from the common reference string.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CommonRandomPoly {
    pub(crate) poly: Poly,
}

impl CommonRandomPoly {
    /// Sample a new CRP at level 0.
    pub fn new<R: RngCore + CryptoRng>(par: &Arc<BfvParameters>, crs: &mut R) -> Result<Self> {
        Self::new_leveled(par, 0, crs)
    }

    /// Sample a new CRP vector at level 0.
    ///
    /// The size of the vector is equal to the number of ciphertext moduli,
    /// as required for the relinearization and rotation key generation
    /// protocols.
    pub fn new_vec<R: RngCore + CryptoRng>(
        par: &Arc<BfvParameters>,
        crs: &mut R,
    ) -> Result<Vec<Self>> {
        (0..par.moduli().len())
            .map(|_| Self::new(par, crs))
            .collect()
    }

    /// Sample a new CRP at the given level.
    pub fn new_leveled<R: RngCore + CryptoRng>(
        par: &Arc<BfvParameters>,
        level: usize,
        crs: &mut R,
    ) -> Result<Self> {
        let ctx = par.ctx_at_level(level)?;
        let poly = Poly::random(ctx, fhe_math::rq::Representation::Ntt, crs);
        Ok(Self { poly })
    }

    /// The level of this CRP.
    pub fn level(&self, par: &Arc<BfvParameters>) -> Result<usize> {
        par.level_of_ctx(self.poly.ctx())
    }
}

#[cfg(test)]
mod tests {
    use super::{CommonRandomPoly, CommonRandomString};
    use crate::bfv::BfvParameters;
    use std::error::Error;

    #[test]
    fn deterministic_across_parties() -> Result<(), Box<dyn Error>> {
        let params = BfvParameters::default_arc(4, 16);

        let mut crs_a = CommonRandomString::new([42u8; 32]);
        let mut crs_b = CommonRandomString::new([42u8; 32]);

        // Same handle, same call sequence: bit-identical CRPs.
        let crp_a = CommonRandomPoly::new(&params, &mut crs_a)?;
        let crp_b = CommonRandomPoly::new(&params, &mut crs_b)?;
        assert_eq!(crp_a, crp_b);

        let vec_a = CommonRandomPoly::new_vec(&params, &mut crs_a)?;
        let vec_b = CommonRandomPoly::new_vec(&params, &mut crs_b)?;
        assert_eq!(vec_a, vec_b);

        let lvl_a = CommonRandomPoly::new_leveled(&params, 2, &mut crs_a)?;
        let lvl_b = CommonRandomPoly::new_leveled(&params, 2, &mut crs_b)?;
        assert_eq!(lvl_a, lvl_b);
        assert_eq!(lvl_a.level(&params)?, 2);

        // A different seed diverges.
        let mut crs_c = CommonRandomString::new([43u8; 32]);
        let crp_c = CommonRandomPoly::new(&params, &mut crs_c)?;
        assert_ne!(crp_a, crp_c);

        Ok(())
    }
}
