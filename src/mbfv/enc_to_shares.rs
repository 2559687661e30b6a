//! The encryption-to-shares and shares-to-encryption protocols, in the
//! integer plaintext flavor: additive shares live in the plaintext ring
//! Z_t and are embedded by Delta-scaling. See [`super::fixed_point`] for
//! the bounded-integer flavor used with approximate plaintexts.

use std::sync::Arc;

use fhe_math::rq::Poly;
use fhe_traits::{DeserializeParametrized, FheParametrized, Serialize};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::bfv::{
    read_poly, read_u8, scale_down, scale_up, write_poly, BfvParameters, Ciphertext, SecretKey,
};
use crate::{Error, Result};

use super::public_key_gen::zero_encryption_share_poly;
use super::secret_key_switch::decryption_share_poly;
use super::{tags, Aggregate, CommonRandomPoly};

/// One party's additive share of a plaintext, an element of the plaintext
/// ring held in the clear by that party.
///
/// The invariant maintained by the E2S / S2E protocols is that the sum of
/// all parties' additive shares, modulo the plaintext modulus, equals the
/// plaintext of the reference ciphertext.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AdditiveShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) value: Box<[u64]>,
}

impl Zeroize for AdditiveShare {
    fn zeroize(&mut self) {
        self.value.zeroize();
    }
}

impl ZeroizeOnDrop for AdditiveShare {}

impl AdditiveShare {
    /// The share as a vector of plaintext-ring coefficients.
    pub fn value(&self) -> &[u64] {
        &self.value
    }
}

impl Aggregate for AdditiveShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        self.par.plaintext.add_vec(&mut self.value, &other.value);
        Ok(())
    }
}

/// A party's public share in the encryption-to-shares protocol.
///
/// E2S converts a ciphertext under the collective key into one additive
/// share of its plaintext per party. Structurally this is a key switch
/// towards a zero output key, with a fresh uniform mask folded into the
/// public share; the negated mask is the party's secret additive share.
/// After aggregation of the public shares, the designated combiner calls
/// [`EncToSharesShare::get_share`] to fold the decoded ciphertext into its
/// own additive share.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EncToSharesShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) level: usize,
    pub(crate) h_share: Poly,
}

impl EncToSharesShare {
    /// Participate in a new E2S protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: the ciphertext to convert
    /// 3. *Public input*: the smudging variance
    ///
    /// Returns the party's secret additive share together with the public
    /// share to be aggregated.
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        smudging_variance: usize,
        rng: &mut R,
    ) -> Result<(AdditiveShare, EncToSharesShare)> {
        if sk_share.par != ct.par {
            return Err(Error::ParameterMismatch(
                "the key and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if ct.len() != 2 {
            return Err(Error::TooManyValues(ct.len(), 2));
        }

        let par = sk_share.par.clone();

        // h_i = s_i * c1 + e_i + Delta * m_i, with m_i a fresh uniform mask.
        let mut h = decryption_share_poly(sk_share, ct, smudging_variance, rng)?;
        let mask = Zeroizing::new(par.plaintext.random_vec(par.degree(), rng));
        let m_poly = Zeroizing::new(scale_up(&mask, ct.level(), &par)?);
        h += m_poly.as_ref();

        // The party keeps -m_i.
        let mut neg_mask = mask.clone();
        par.plaintext.neg_vec(&mut neg_mask);

        Ok((
            AdditiveShare {
                par: par.clone(),
                value: neg_mask.to_vec().into_boxed_slice(),
            },
            EncToSharesShare {
                par,
                level: ct.level(),
                h_share: h,
            },
        ))
    }

    /// Fold the decoded masked plaintext into the combiner's own additive
    /// share. Called on the aggregate of all public shares, by exactly one
    /// party.
    pub fn get_share(&self, ct: &Ciphertext, own: &AdditiveShare) -> Result<AdditiveShare> {
        if self.par != ct.par || self.par != own.par {
            return Err(Error::ParameterMismatch(
                "the share and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if self.level != ct.level() {
            return Err(Error::ParameterMismatch(
                "the share was generated for a ciphertext at a different level".to_string(),
            ));
        }

        let c = &ct[0] + &self.h_share;
        let mut w = scale_down(c, self.level, &self.par)?;
        self.par.plaintext.add_vec(&mut w, &own.value);

        Ok(AdditiveShare {
            par: self.par.clone(),
            value: w.into_boxed_slice(),
        })
    }
}

impl Aggregate for EncToSharesShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par || self.level != other.level {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        self.h_share += &other.h_share;
        Ok(())
    }
}

impl FheParametrized for EncToSharesShare {
    type Parameters = BfvParameters;
}

impl Serialize for EncToSharesShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::E2S, self.level as u8];
        write_poly(&mut out, &self.h_share);
        out
    }
}

impl DeserializeParametrized for EncToSharesShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::E2S {
            return Err(Error::SerializationError);
        }
        let level = read_u8(&mut bytes)? as usize;
        if level > par.max_level() {
            return Err(Error::SerializationError);
        }
        let h_share = read_poly(&mut bytes, par.ctx_at_level(level)?)?;
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            level,
            h_share,
        })
    }
}

/// A party's public share in the shares-to-encryption protocol.
///
/// S2E re-encrypts the parties' additive shares into a ciphertext under the
/// collective key: each party publishes a symmetric encryption of its
/// additive share against the common random polynomial, and the aggregate
/// pairs with the CRP into a fresh ciphertext.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SharesToEncShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) level: usize,
    pub(crate) h_share: Poly,
}

impl SharesToEncShare {
    /// Participate in a new S2E protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Private input*: the party's additive share
    /// 3. *Public input*: a common random polynomial, which becomes the
    ///    `c_1` component of the output ciphertext
    /// 4. *Public input*: the smudging variance
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        additive_share: &AdditiveShare,
        crp: &CommonRandomPoly,
        smudging_variance: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if sk_share.par != additive_share.par {
            return Err(Error::ParameterMismatch(
                "the key and the share use different BFV parameters".to_string(),
            ));
        }
        let par = sk_share.par.clone();
        let level = par.level_of_ctx(crp.poly.ctx())?;

        // h_i = -a * s_i + e_i + Delta * x_i
        let mut h = zero_encryption_share_poly(sk_share, &crp.poly, smudging_variance, rng)?;
        let x_poly = Zeroizing::new(scale_up(&additive_share.value, level, &par)?);
        h += x_poly.as_ref();

        Ok(Self {
            par,
            level,
            h_share: h,
        })
    }

    /// Pair the aggregated shares with the CRP into a ciphertext encrypting
    /// the sum of the parties' additive shares.
    pub fn get_encryption(&self, crp: &CommonRandomPoly) -> Result<Ciphertext> {
        if self.par.level_of_ctx(crp.poly.ctx())? != self.level {
            return Err(Error::ParameterMismatch(
                "the CRP does not match the level of the aggregated shares".to_string(),
            ));
        }
        Ciphertext::new(vec![self.h_share.clone(), crp.poly.clone()], &self.par)
    }
}

impl Aggregate for SharesToEncShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par || self.level != other.level {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        self.h_share += &other.h_share;
        Ok(())
    }
}

impl FheParametrized for SharesToEncShare {
    type Parameters = BfvParameters;
}

impl Serialize for SharesToEncShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::S2E, self.level as u8];
        write_poly(&mut out, &self.h_share);
        out
    }
}

impl DeserializeParametrized for SharesToEncShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::S2E {
            return Err(Error::SerializationError);
        }
        let level = read_u8(&mut bytes)? as usize;
        if level > par.max_level() {
            return Err(Error::SerializationError);
        }
        let h_share = read_poly(&mut bytes, par.ctx_at_level(level)?)?;
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            level,
            h_share,
        })
    }
}
