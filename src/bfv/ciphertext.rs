//! Ciphertext type in the BFV encryption scheme.

use crate::bfv::parameters::BfvParameters;
use crate::{Error, Result};
use fhe_math::rq::{Poly, Representation};
use fhe_traits::{
    DeserializeParametrized, DeserializeWithContext, FheCiphertext, FheParametrized, Serialize,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::ops::{Add, Deref, DerefMut, Sub};
use std::sync::Arc;

/// A ciphertext encrypting a plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    /// The parameters of the underlying BFV encryption scheme.
    pub(crate) par: Arc<BfvParameters>,

    /// The seed that generated the polynomial c1 in a fresh ciphertext.
    pub(crate) seed: Option<<ChaCha8Rng as SeedableRng>::Seed>,

    /// The ciphertext elements.
    pub(crate) c: Vec<Poly>,

    /// The ciphertext level
    pub(crate) level: usize,
}

impl Deref for Ciphertext {
    type Target = [Poly];

    fn deref(&self) -> &Self::Target {
        &self.c
    }
}

impl DerefMut for Ciphertext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.c
    }
}

impl Ciphertext {
    /// Create a ciphertext from a vector of polynomials.
    /// A ciphertext must contain at least two polynomials, and all polynomials
    /// must be in Ntt representation and with the same context.
    pub fn new(c: Vec<Poly>, par: &Arc<BfvParameters>) -> Result<Self> {
        if c.len() < 2 {
            return Err(Error::TooFewValues(c.len(), 2));
        }

        let ctx = c[0].ctx();
        let level = par.level_of_ctx(ctx)?;

        for ci in c.iter() {
            if ci.representation() != &Representation::Ntt {
                return Err(Error::MathError(fhe_math::Error::IncorrectRepresentation(
                    ci.representation().clone(),
                    Representation::Ntt,
                )));
            }
            if ci.ctx() != ctx {
                return Err(Error::MathError(fhe_math::Error::InvalidContext));
            }
        }

        Ok(Self {
            par: par.clone(),
            seed: None,
            c,
            level,
        })
    }

    /// The level of this ciphertext.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Truncate the underlying vector of polynomials.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.c.truncate(len)
    }

    /// Modulo switch the ciphertext to the next level.
    pub fn mod_switch_to_next_level(&mut self) -> Result<()> {
        if self.level < self.par.max_level() {
            self.seed = None;
            for ci in self.c.iter_mut() {
                ci.change_representation(Representation::PowerBasis);
                ci.switch_down()?;
                ci.change_representation(Representation::Ntt);
            }
            self.level += 1
        }
        Ok(())
    }

    /// Modulo switch the ciphertext to the last level.
    pub fn mod_switch_to_last_level(&mut self) -> Result<()> {
        while self.level < self.par.max_level() {
            self.mod_switch_to_next_level()?;
        }
        Ok(())
    }
}

impl Add<&Ciphertext> for &Ciphertext {
    type Output = Ciphertext;

    fn add(self, rhs: &Ciphertext) -> Ciphertext {
        assert_eq!(self.par, rhs.par);
        assert_eq!(self.level, rhs.level);
        assert_eq!(self.c.len(), rhs.c.len());
        let c = self
            .c
            .iter()
            .zip(rhs.c.iter())
            .map(|(a, b)| a + b)
            .collect();
        Ciphertext {
            par: self.par.clone(),
            seed: None,
            c,
            level: self.level,
        }
    }
}

impl Sub<&Ciphertext> for &Ciphertext {
    type Output = Ciphertext;

    fn sub(self, rhs: &Ciphertext) -> Ciphertext {
        assert_eq!(self.par, rhs.par);
        assert_eq!(self.level, rhs.level);
        assert_eq!(self.c.len(), rhs.c.len());
        let c = self
            .c
            .iter()
            .zip(rhs.c.iter())
            .map(|(a, b)| a - b)
            .collect();
        Ciphertext {
            par: self.par.clone(),
            seed: None,
            c,
            level: self.level,
        }
    }
}

impl FheCiphertext for Ciphertext {}

impl FheParametrized for Ciphertext {
    type Parameters = BfvParameters;
}

impl Serialize for Ciphertext {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.level as u8);
        match self.seed {
            Some(seed) => {
                out.push(1);
                out.extend_from_slice(&seed);
            }
            None => out.push(0),
        }
        let stored = if self.seed.is_some() {
            &self.c[..self.c.len() - 1]
        } else {
            &self.c[..]
        };
        out.push(self.c.len() as u8);
        for ci in stored {
            let bytes = ci.to_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }
}

impl DeserializeParametrized for Ciphertext {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        let level = read_u8(&mut bytes)? as usize;
        if level > par.max_level() {
            return Err(Error::SerializationError);
        }
        let ctx = par.ctx_at_level(level)?;

        let seed = match read_u8(&mut bytes)? {
            0 => None,
            1 => {
                let mut seed = <ChaCha8Rng as SeedableRng>::Seed::default();
                if bytes.len() < seed.len() {
                    return Err(Error::SerializationError);
                }
                let seed_len = seed.len();
                seed.copy_from_slice(&bytes[..seed_len]);
                bytes = &bytes[seed.len()..];
                Some(seed)
            }
            _ => return Err(Error::SerializationError),
        };

        let len = read_u8(&mut bytes)? as usize;
        if len < 2 {
            return Err(Error::SerializationError);
        }
        let stored = if seed.is_some() { len - 1 } else { len };

        let mut c = Vec::with_capacity(len);
        for _ in 0..stored {
            c.push(read_poly(&mut bytes, ctx)?);
        }
        if let Some(seed) = seed {
            let mut c_last = Poly::random_from_seed(ctx, Representation::Ntt, seed);
            unsafe { c_last.allow_variable_time_computations() }
            c.push(c_last);
        }
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }

        Ok(Ciphertext {
            par: par.clone(),
            seed,
            c,
            level,
        })
    }
}

pub(crate) fn read_u8(bytes: &mut &[u8]) -> Result<u8> {
    let (first, rest) = bytes.split_first().ok_or(Error::SerializationError)?;
    *bytes = rest;
    Ok(*first)
}

pub(crate) fn read_poly(bytes: &mut &[u8], ctx: &Arc<fhe_math::rq::Context>) -> Result<Poly> {
    if bytes.len() < 4 {
        return Err(Error::SerializationError);
    }
    let len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
    *bytes = &bytes[4..];
    if bytes.len() < len {
        return Err(Error::SerializationError);
    }
    let p = Poly::from_bytes(&bytes[..len], ctx).map_err(|_| Error::SerializationError)?;
    *bytes = &bytes[len..];
    Ok(p)
}

pub(crate) fn write_poly(out: &mut Vec<u8>, p: &Poly) {
    let bytes = p.to_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use crate::bfv::{BfvParameters, Ciphertext, Encoding, Plaintext, SecretKey};
    use fhe_traits::{DeserializeParametrized, FheDecrypter, FheEncoder, FheEncrypter, Serialize};
    use rand::thread_rng;
    use std::error::Error;

    #[test]
    fn add_sub() -> Result<(), Box<dyn Error>> {
        let mut rng = thread_rng();
        let params = BfvParameters::default_arc(1, 16);
        let sk = SecretKey::random(&params, &mut rng);

        let a = params.plaintext.random_vec(params.degree(), &mut rng);
        let b = params.plaintext.random_vec(params.degree(), &mut rng);
        let mut expected = a.clone();
        params.plaintext.add_vec(&mut expected, &b);

        let pt_a = Plaintext::try_encode(&a, Encoding::poly(), &params)?;
        let pt_b = Plaintext::try_encode(&b, Encoding::poly(), &params)?;
        let ct_a = sk.try_encrypt(&pt_a, &mut rng)?;
        let ct_b = sk.try_encrypt(&pt_b, &mut rng)?;

        let pt = sk.try_decrypt(&(&ct_a + &ct_b))?;
        assert_eq!(pt.value.to_vec(), expected);

        Ok(())
    }

    #[test]
    fn serialize() -> Result<(), Box<dyn Error>> {
        let mut rng = thread_rng();
        for params in [
            BfvParameters::default_arc(1, 16),
            BfvParameters::default_arc(6, 16),
        ] {
            let sk = SecretKey::random(&params, &mut rng);
            let v = params.plaintext.random_vec(params.degree(), &mut rng);
            let pt = Plaintext::try_encode(&v, Encoding::simd(), &params)?;

            // A fresh symmetric encryption carries a seed.
            let ct: Ciphertext = sk.try_encrypt(&pt, &mut rng)?;
            assert!(ct.seed.is_some());
            let ct2 = Ciphertext::from_bytes(&ct.to_bytes(), &params)?;
            assert_eq!(ct.to_bytes(), ct2.to_bytes());
            assert_eq!(sk.try_decrypt(&ct2)?.value, pt.value);

            // A sum does not.
            let ct = &ct + &ct;
            assert!(ct.seed.is_none());
            let ct2 = Ciphertext::from_bytes(&ct.to_bytes(), &params)?;
            assert_eq!(ct.to_bytes(), ct2.to_bytes());
        }
        Ok(())
    }

    #[test]
    fn mod_switch() -> Result<(), Box<dyn Error>> {
        let mut rng = thread_rng();
        let params = BfvParameters::default_arc(6, 16);
        let sk = SecretKey::random(&params, &mut rng);
        let v = params.plaintext.random_vec(params.degree(), &mut rng);
        let pt = Plaintext::try_encode(&v, Encoding::poly(), &params)?;
        let mut ct: Ciphertext = sk.try_encrypt(&pt, &mut rng)?;

        assert_eq!(ct.level, 0);
        ct.mod_switch_to_last_level()?;
        assert_eq!(ct.level, params.max_level());

        let decrypted = sk.try_decrypt(&ct)?;
        assert_eq!(decrypted.value, pt.value);

        Ok(())
    }
}
