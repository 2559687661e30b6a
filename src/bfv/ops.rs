//! Homomorphic operations for the BFV encryption scheme.

use std::sync::Arc;

use fhe_math::{
    rns::ScalingFactor,
    rq::{scaler::Scaler, Context, Representation},
    zq::primes::generate_prime,
};
use num_bigint::BigUint;

use crate::{
    bfv::{BfvParameters, Ciphertext, RelinearizationKey},
    Error, Result,
};

/// Multiplicator that implements a strategy for multiplying. In particular,
/// the following information can be specified:
/// - The basis at which the multiplication will occur;
/// - The scaling factor after multiplication;
/// - Whether relinearization should be used;
/// - Whether the result is modulus switched down one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multiplicator {
    par: Arc<BfvParameters>,
    pub(crate) extender: Scaler,
    pub(crate) down_scaler: Scaler,
    pub(crate) base_ctx: Arc<Context>,
    pub(crate) mul_ctx: Arc<Context>,
    rk: Option<RelinearizationKey>,
    mod_switch: bool,
    level: usize,
}

impl Multiplicator {
    /// Construct a multiplicator using a custom extended basis and
    /// post-multiplication scaling factor.
    pub fn new(
        extended_basis: &[u64],
        post_mul_scaling_factor: ScalingFactor,
        level: usize,
        par: &Arc<BfvParameters>,
    ) -> Result<Self> {
        let base_ctx = par.ctx_at_level(level)?;
        let mul_ctx = Arc::new(Context::new(extended_basis, par.degree())?);
        let extender = Scaler::new(base_ctx, &mul_ctx, ScalingFactor::one())?;
        let down_scaler = Scaler::new(&mul_ctx, base_ctx, post_mul_scaling_factor)?;
        Ok(Self {
            par: par.clone(),
            extender,
            down_scaler,
            base_ctx: base_ctx.clone(),
            mul_ctx,
            rk: None,
            mod_switch: false,
            level,
        })
    }

    /// Default multiplication strategy using relinearization.
    pub fn default(rk: &RelinearizationKey) -> Result<Self> {
        let ctx = rk.ksk.par.ctx_at_level(rk.ksk.ciphertext_level)?;

        let modulus_size = rk.ksk.par.moduli_sizes()[..ctx.moduli().len()]
            .iter()
            .sum::<usize>();
        let n_moduli = (modulus_size + 60).div_ceil(62);

        let mut extended_basis = Vec::with_capacity(ctx.moduli().len() + n_moduli);
        extended_basis.append(&mut ctx.moduli().to_vec());
        let mut upper_bound = 1 << 62;
        while extended_basis.len() != ctx.moduli().len() + n_moduli {
            upper_bound = generate_prime(62, 2 * rk.ksk.par.degree() as u64, upper_bound).unwrap();
            if !extended_basis.contains(&upper_bound) && !ctx.moduli().contains(&upper_bound) {
                extended_basis.push(upper_bound)
            }
        }

        let mut multiplicator = Multiplicator::new(
            &extended_basis,
            ScalingFactor::new(&BigUint::from(rk.ksk.par.plaintext()), ctx.modulus()),
            rk.ksk.ciphertext_level,
            &rk.ksk.par,
        )?;

        multiplicator.enable_relinearization(rk)?;
        Ok(multiplicator)
    }

    /// Enable relinearization after multiplication.
    pub fn enable_relinearization(&mut self, rk: &RelinearizationKey) -> Result<()> {
        let rk_ctx = self.par.ctx_at_level(rk.ksk.ciphertext_level)?;
        if rk_ctx != &self.base_ctx {
            return Err(Error::ParameterMismatch(
                "invalid relinearization key context".to_string(),
            ));
        }
        self.rk = Some(rk.clone());
        Ok(())
    }

    /// Enable modulus switching after multiplication (and relinearization, if
    /// applicable).
    pub fn enable_mod_switching(&mut self) -> Result<()> {
        if self.par.ctx_at_level(self.par.max_level())? == &self.base_ctx {
            Err(Error::DefaultError(
                "Cannot modulo switch as this is already the last level".to_string(),
            ))
        } else {
            self.mod_switch = true;
            Ok(())
        }
    }

    /// Multiply two ciphertexts using the defined multiplication strategy.
    pub fn multiply(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext> {
        if lhs.par != self.par || rhs.par != self.par {
            return Err(Error::ParameterMismatch(
                "ciphertexts do not have the same parameters".to_string(),
            ));
        }
        if lhs.level != self.level || rhs.level != self.level {
            return Err(Error::ParameterMismatch(
                "ciphertexts are not at the expected level".to_string(),
            ));
        }
        if lhs.len() != 2 || rhs.len() != 2 {
            return Err(Error::DefaultError(
                "Multiplication can only be performed on ciphertexts of size 2".to_string(),
            ));
        }

        // Extend
        let c00 = lhs[0].scale(&self.extender)?;
        let c01 = lhs[1].scale(&self.extender)?;
        let c10 = rhs[0].scale(&self.extender)?;
        let c11 = rhs[1].scale(&self.extender)?;

        // Multiply
        let mut c0 = &c00 * &c10;
        let mut c1 = &c00 * &c11;
        c1 += &(&c01 * &c10);
        let mut c2 = &c01 * &c11;
        c0.change_representation(Representation::PowerBasis);
        c1.change_representation(Representation::PowerBasis);
        c2.change_representation(Representation::PowerBasis);

        // Scale
        let c0 = c0.scale(&self.down_scaler)?;
        let c1 = c1.scale(&self.down_scaler)?;
        let c2 = c2.scale(&self.down_scaler)?;

        let mut c = vec![c0, c1, c2];

        // Relinearize
        if let Some(rk) = self.rk.as_ref() {
            let (c0r, c1r) = rk.relinearizes_poly(&c[2])?;
            c[0].change_representation(Representation::Ntt);
            c[1].change_representation(Representation::Ntt);
            c[0] += &c0r;
            c[1] += &c1r;
            c.truncate(2);
        }

        // We construct a ciphertext, but it may not have the right
        // representation for the polynomials yet.
        let mut c = Ciphertext {
            par: self.par.clone(),
            seed: None,
            c,
            level: self.level,
        };

        if self.mod_switch {
            c.c.iter_mut().for_each(|p| {
                if p.representation() != &Representation::PowerBasis {
                    p.change_representation(Representation::PowerBasis)
                }
            });
            for p in c.c.iter_mut() {
                p.switch_down()?;
                p.change_representation(Representation::Ntt);
            }
            c.level += 1;
        } else {
            c.c.iter_mut().for_each(|p| {
                if p.representation() != &Representation::Ntt {
                    p.change_representation(Representation::Ntt)
                }
            });
        }

        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use crate::bfv::{BfvParameters, Encoding, Plaintext, RelinearizationKey, SecretKey};
    use fhe_traits::{FheDecoder, FheDecrypter, FheEncoder, FheEncrypter};
    use rand::thread_rng;
    use std::error::Error;

    use super::Multiplicator;

    #[test]
    fn mul() -> Result<(), Box<dyn Error>> {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(3, 16);
        for _ in 0..10 {
            // We will encode `values` in an Simd format, and check that the
            // product is computed correctly.
            let values = par.plaintext.random_vec(par.degree(), &mut rng);
            let mut expected = values.clone();
            par.plaintext.mul_vec(&mut expected, &values);

            let sk = SecretKey::random(&par, &mut rng);
            let rk = RelinearizationKey::new(&sk, &mut rng)?;
            let pt = Plaintext::try_encode(&values, Encoding::simd(), &par)?;
            let ct1 = sk.try_encrypt(&pt, &mut rng)?;
            let ct2 = sk.try_encrypt(&pt, &mut rng)?;

            let mut multiplicator = Multiplicator::default(&rk)?;
            let ct3 = multiplicator.multiply(&ct1, &ct2)?;
            let pt = sk.try_decrypt(&ct3)?;
            assert_eq!(Vec::<u64>::try_decode(&pt, Encoding::simd())?, expected);

            multiplicator.enable_mod_switching()?;
            let ct3 = multiplicator.multiply(&ct1, &ct2)?;
            assert_eq!(ct3.level(), 1);
            let pt = sk.try_decrypt(&ct3)?;
            assert_eq!(Vec::<u64>::try_decode(&pt, Encoding::simd())?, expected);
        }
        Ok(())
    }

    #[test]
    fn mul_no_relin() -> Result<(), Box<dyn Error>> {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(6, 16);
        for _ in 0..10 {
            let values = par.plaintext.random_vec(par.degree(), &mut rng);
            let mut expected = values.clone();
            par.plaintext.mul_vec(&mut expected, &values);

            let sk = SecretKey::random(&par, &mut rng);
            let rk = RelinearizationKey::new(&sk, &mut rng)?;
            let pt = Plaintext::try_encode(&values, Encoding::simd(), &par)?;
            let ct1 = sk.try_encrypt(&pt, &mut rng)?;
            let ct2 = sk.try_encrypt(&pt, &mut rng)?;

            let mut multiplicator = Multiplicator::default(&rk)?;
            multiplicator.rk = None;
            let ct3 = multiplicator.multiply(&ct1, &ct2)?;
            assert_eq!(ct3.len(), 3);
            let pt = sk.try_decrypt(&ct3)?;
            assert_eq!(Vec::<u64>::try_decode(&pt, Encoding::simd())?, expected);
        }
        Ok(())
    }
}
