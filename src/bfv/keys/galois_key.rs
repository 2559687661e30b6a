//! Galois keys for the BFV encryption scheme

use super::key_switching_key::KeySwitchingKey;
use crate::bfv::{Ciphertext, SecretKey};
use crate::{Error, Result};
use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation, SubstitutionExponent};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

/// Galois key for the BFV encryption scheme.
/// A Galois key is a special type of key switching key,
/// which switch from `s(x^i)` to `s(x)` where `s(x)` is the secret key.
#[derive(Debug, PartialEq, Eq)]
pub struct GaloisKey {
    pub(crate) element: SubstitutionExponent,
    pub(crate) ksk: KeySwitchingKey,
}

impl GaloisKey {
    /// Generate a [`GaloisKey`] from a [`SecretKey`].
    pub fn new<R: RngCore + CryptoRng>(
        sk: &SecretKey,
        exponent: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let ctx = sk.par.ctx_at_level(0)?;
        let element = SubstitutionExponent::new(ctx, exponent).map_err(Error::MathError)?;

        let s = Zeroizing::new(Poly::try_convert_from(
            sk.coeffs.as_ref(),
            ctx,
            false,
            Representation::PowerBasis,
        )?);
        let s_sub = Zeroizing::new(s.substitute(&element)?);

        let ksk = KeySwitchingKey::new(sk, s_sub.as_ref(), 0, 0, rng)?;

        Ok(Self { element, ksk })
    }

    /// Relinearize a [`Ciphertext`] using the [`GaloisKey`]
    pub fn relinearize(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        if ct.len() != 2 {
            return Err(Error::TooManyValues(ct.len(), 2));
        }
        if ct.level != self.ksk.ciphertext_level {
            return Err(Error::ParameterMismatch(
                "the ciphertext level does not match the Galois key".to_string(),
            ));
        }

        let mut c2 = ct[1].substitute(&self.element)?;
        c2.change_representation(Representation::PowerBasis);
        let (mut c0, c1) = self.ksk.key_switch(&c2)?;

        c0 += &ct[0].substitute(&self.element)?;

        Ok(Ciphertext {
            par: ct.par.clone(),
            seed: None,
            c: vec![c0, c1],
            level: self.ksk.ciphertext_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::GaloisKey;
    use crate::bfv::{BfvParameters, Encoding, Plaintext, SecretKey};
    use fhe_traits::{FheDecoder, FheDecrypter, FheEncoder, FheEncrypter};
    use rand::thread_rng;
    use std::error::Error;

    #[test]
    fn rotations() -> Result<(), Box<dyn Error>> {
        let mut rng = thread_rng();
        for params in [
            BfvParameters::default_arc(6, 16),
            BfvParameters::default_arc(3, 16),
        ] {
            for _ in 0..10 {
                let sk = SecretKey::random(&params, &mut rng);
                let v = params.plaintext.random_vec(params.degree(), &mut rng);
                let row_size = params.degree() >> 1;

                let pt = Plaintext::try_encode(&v, Encoding::simd(), &params)?;
                let ct = sk.try_encrypt(&pt, &mut rng)?;

                // A Galois element must be odd.
                assert!(GaloisKey::new(&sk, 4, &mut rng).is_err());

                // Element 3 rotates the columns by one to the left.
                let gk = GaloisKey::new(&sk, 3, &mut rng)?;
                let ct2 = gk.relinearize(&ct)?;
                let pt2 = sk.try_decrypt(&ct2)?;
                let mut expected = vec![0u64; params.degree()];
                expected[..row_size - 1].copy_from_slice(&v[1..row_size]);
                expected[row_size - 1] = v[0];
                expected[row_size..2 * row_size - 1].copy_from_slice(&v[row_size + 1..]);
                expected[2 * row_size - 1] = v[row_size];
                assert_eq!(&Vec::<u64>::try_decode(&pt2, Encoding::simd())?, &expected);

                // Element 2N - 1 swaps the rows.
                let gk = GaloisKey::new(&sk, params.galois_element_for_row_swap(), &mut rng)?;
                let ct2 = gk.relinearize(&ct)?;
                let pt2 = sk.try_decrypt(&ct2)?;
                let mut expected = vec![0u64; params.degree()];
                expected[..row_size].copy_from_slice(&v[row_size..]);
                expected[row_size..].copy_from_slice(&v[..row_size]);
                assert_eq!(&Vec::<u64>::try_decode(&pt2, Encoding::simd())?, &expected);
            }
        }
        Ok(())
    }
}
