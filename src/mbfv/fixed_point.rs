//! The fixed-point (approximate) flavor of the conversion and refresh
//! protocols.
//!
//! An approximate plaintext is not an element of Z_t: the message occupies
//! the low bits of the ciphertext ring coefficients, scaled by the
//! encoder, so a mask in the integer plaintext ring would destroy it.
//! Additive shares are instead integers bounded by `2^log_bound`, with
//! `log_bound` large enough to statistically hide the scaled message, and
//! they are embedded into (and extracted from) the ciphertext ring
//! coefficients directly, through a centered lift. The single-party
//! encoder mapping ring elements to complex vectors stays outside this
//! crate; the protocols here hold the same RLWE-level share cores as the
//! integer flavor and differ only in the mask domain.

use std::sync::Arc;

use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use fhe_traits::{DeserializeParametrized, FheParametrized, Serialize};
use num_bigint::{BigInt, BigUint, Sign};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use crate::bfv::{read_poly, read_u8, write_poly, BfvParameters, Ciphertext, SecretKey};
use crate::{Error, Result};

use super::public_key_gen::zero_encryption_share_poly;
use super::secret_key_switch::decryption_share_poly;
use super::{tags, Aggregate, CommonRandomPoly};

/// Check that the modulus at `level` leaves room for the aggregate of
/// `n_parties` masks of `log_bound` bits, plus the centered lift.
fn check_mask_headroom(
    par: &Arc<BfvParameters>,
    level: usize,
    log_bound: usize,
    n_parties: usize,
) -> Result<()> {
    let n_bits = usize::BITS as usize - n_parties.leading_zeros() as usize;
    let q_bits: usize = par.moduli_sizes()[..par.moduli_sizes().len() - level]
        .iter()
        .sum();
    if q_bits > log_bound + n_bits + 1 {
        Ok(())
    } else {
        Err(Error::PrecisionExhausted)
    }
}

/// Compute the deepest ciphertext level at which the fixed-point refresh
/// can run on plaintexts scaled by `2^log_scale`, with `security_bits`
/// bits of statistical security, together with the bit bound of the
/// masks.
///
/// Returns [`Error::PrecisionExhausted`] when no level of these parameters
/// supports a refresh, in which case the refresh family is unavailable.
pub fn minimum_level_for_bounded_refresh(
    par: &Arc<BfvParameters>,
    n_parties: usize,
    security_bits: usize,
    log_scale: usize,
) -> Result<(usize, usize)> {
    let log_bound = security_bits + log_scale;
    for level in (0..=par.max_level()).rev() {
        if check_mask_headroom(par, level, log_bound, n_parties).is_ok() {
            return Ok((level, log_bound));
        }
    }
    Err(Error::PrecisionExhausted)
}

/// Sample `degree` uniform integers below `2^log_bound`.
fn sample_mask<R: RngCore + CryptoRng>(
    log_bound: usize,
    degree: usize,
    rng: &mut R,
) -> Vec<BigUint> {
    let n_bytes = log_bound.div_ceil(8);
    let top_mask = 0xffu8 >> ((8 - log_bound % 8) % 8);
    (0..degree)
        .map(|_| {
            let mut bytes = Zeroizing::new(vec![0u8; n_bytes]);
            rng.fill_bytes(&mut bytes);
            if let Some(last) = bytes.last_mut() {
                *last &= top_mask;
            }
            BigUint::from_bytes_le(&bytes)
        })
        .collect()
}

/// Embed non-negative mask coefficients into the ciphertext ring at the
/// given level.
fn mask_to_poly(mask: &[BigUint], level: usize, par: &Arc<BfvParameters>) -> Result<Poly> {
    let ctx = par.ctx_at_level(level)?;
    let mut p = Poly::try_convert_from(mask, ctx, false, Representation::PowerBasis)?;
    p.change_representation(Representation::Ntt);
    Ok(p)
}

/// Embed signed share coefficients into the ciphertext ring at the given
/// level, reducing them modulo the ring modulus.
fn share_to_poly(coeffs: &[BigInt], level: usize, par: &Arc<BfvParameters>) -> Result<Poly> {
    let ctx = par.ctx_at_level(level)?;
    let q = BigInt::from(ctx.modulus().clone());
    let reduced: Vec<BigUint> = coeffs
        .iter()
        .map(|c| {
            let mut r = c % &q;
            if r.sign() == Sign::Minus {
                r += &q;
            }
            r.to_biguint().unwrap()
        })
        .collect();
    let mut p = Poly::try_convert_from(reduced.as_slice(), ctx, false, Representation::PowerBasis)?;
    p.change_representation(Representation::Ntt);
    Ok(p)
}

/// The centered coefficients of a ring element, lifted to the integers.
fn centered_coefficients(mut c: Poly) -> Vec<BigInt> {
    c.disallow_variable_time_computations();
    c.change_representation(Representation::PowerBasis);
    let q = c.ctx().modulus().clone();
    let half = &q >> 1;
    let out = Vec::<BigUint>::from(&c)
        .into_iter()
        .map(|v| {
            if v > half {
                BigInt::from(v) - BigInt::from(q.clone())
            } else {
                BigInt::from(v)
            }
        })
        .collect();
    c.zeroize();
    out
}

/// One party's bounded-integer additive share of an approximate plaintext.
///
/// The invariant maintained by the bounded E2S / S2E protocols is that the
/// sum of all parties' shares, over the integers, equals the centered
/// coefficients of the underlying plaintext ring element up to the
/// smudging noise, within the precision of the approximate plaintext.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BoundedAdditiveShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) log_bound: usize,
    pub(crate) coeffs: Box<[BigInt]>,
}

impl BoundedAdditiveShare {
    /// The share as a vector of integer coefficients.
    pub fn coefficients(&self) -> &[BigInt] {
        &self.coeffs
    }

    /// The bit bound of the masks this share was built from.
    pub fn log_bound(&self) -> usize {
        self.log_bound
    }
}

impl Aggregate for BoundedAdditiveShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par || self.log_bound != other.log_bound {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        for (c, other_c) in self.coeffs.iter_mut().zip(other.coeffs.iter()) {
            *c += other_c;
        }
        Ok(())
    }
}

/// A party's public share in the bounded encryption-to-shares protocol.
///
/// The key-switch-towards-zero core is the same as in the integer flavor;
/// the mask is a bounded integer vector subtracted from the public share
/// directly in the ciphertext ring, and kept by the party as its secret
/// share. [`BoundedEncToSharesShare::get_share`] on the aggregate folds
/// the centered decoding of the ciphertext into the combiner's share.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BoundedEncToSharesShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) level: usize,
    pub(crate) log_bound: usize,
    pub(crate) h_share: Poly,
}

impl BoundedEncToSharesShare {
    /// Participate in a new bounded E2S protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: the ciphertext to convert
    /// 3. *Public input*: the mask bit bound, from
    ///    [`minimum_level_for_bounded_refresh`]
    /// 4. *Public input*: the number of parties, bounding the aggregate mask
    /// 5. *Public input*: the smudging variance
    ///
    /// Fails with [`Error::PrecisionExhausted`] when the ciphertext level
    /// cannot absorb the aggregate mask.
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        log_bound: usize,
        n_parties: usize,
        smudging_variance: usize,
        rng: &mut R,
    ) -> Result<(BoundedAdditiveShare, BoundedEncToSharesShare)> {
        if sk_share.par != ct.par {
            return Err(Error::ParameterMismatch(
                "the key and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if ct.len() != 2 {
            return Err(Error::TooManyValues(ct.len(), 2));
        }
        let par = sk_share.par.clone();
        check_mask_headroom(&par, ct.level(), log_bound, n_parties)?;

        // h_i = s_i * c1 + e_i - m_i; the party keeps m_i.
        let mut h = decryption_share_poly(sk_share, ct, smudging_variance, rng)?;
        let mask = sample_mask(log_bound, par.degree(), rng);
        h -= &mask_to_poly(&mask, ct.level(), &par)?;

        let coeffs: Vec<BigInt> = mask.into_iter().map(BigInt::from).collect();
        Ok((
            BoundedAdditiveShare {
                par: par.clone(),
                log_bound,
                coeffs: coeffs.into_boxed_slice(),
            },
            BoundedEncToSharesShare {
                par,
                level: ct.level(),
                log_bound,
                h_share: h,
            },
        ))
    }

    /// Fold the centered decoding of the masked ciphertext into the
    /// combiner's own share. Called on the aggregate of all public shares,
    /// by exactly one party.
    pub fn get_share(
        &self,
        ct: &Ciphertext,
        own: &BoundedAdditiveShare,
    ) -> Result<BoundedAdditiveShare> {
        if self.par != ct.par || self.par != own.par {
            return Err(Error::ParameterMismatch(
                "the share and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if self.level != ct.level() || self.log_bound != own.log_bound {
            return Err(Error::ParameterMismatch(
                "the share was generated for a different protocol instance".to_string(),
            ));
        }

        let w = centered_coefficients(&ct[0] + &self.h_share);
        let coeffs: Vec<BigInt> = own
            .coeffs
            .iter()
            .zip(w.into_iter())
            .map(|(own_c, w_c)| own_c + w_c)
            .collect();

        Ok(BoundedAdditiveShare {
            par: self.par.clone(),
            log_bound: self.log_bound,
            coeffs: coeffs.into_boxed_slice(),
        })
    }
}

impl Aggregate for BoundedEncToSharesShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par || self.level != other.level || self.log_bound != other.log_bound
        {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        self.h_share += &other.h_share;
        Ok(())
    }
}

impl FheParametrized for BoundedEncToSharesShare {
    type Parameters = BfvParameters;
}

impl Serialize for BoundedEncToSharesShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::E2S_BOUNDED, self.level as u8];
        out.extend_from_slice(&(self.log_bound as u16).to_le_bytes());
        write_poly(&mut out, &self.h_share);
        out
    }
}

impl DeserializeParametrized for BoundedEncToSharesShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::E2S_BOUNDED {
            return Err(Error::SerializationError);
        }
        let level = read_u8(&mut bytes)? as usize;
        if level > par.max_level() {
            return Err(Error::SerializationError);
        }
        let lo = read_u8(&mut bytes)?;
        let hi = read_u8(&mut bytes)?;
        let log_bound = u16::from_le_bytes([lo, hi]) as usize;
        let h_share = read_poly(&mut bytes, par.ctx_at_level(level)?)?;
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            level,
            log_bound,
            h_share,
        })
    }
}

/// A party's public share in the bounded shares-to-encryption protocol.
///
/// Each party publishes a symmetric encryption of zero against the CRP
/// with its bounded share folded into the ciphertext ring, and the
/// aggregate pairs with the CRP into a ciphertext of the summed shares.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BoundedSharesToEncShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) level: usize,
    pub(crate) log_bound: usize,
    pub(crate) h_share: Poly,
}

impl BoundedSharesToEncShare {
    /// Participate in a new bounded S2E protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Private input*: the party's bounded additive share
    /// 3. *Public input*: a common random polynomial, which becomes the
    ///    `c_1` component of the output ciphertext
    /// 4. *Public input*: the smudging variance
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        additive_share: &BoundedAdditiveShare,
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

        // h_i = -a * s_i + e_i + x_i
        let mut h = zero_encryption_share_poly(sk_share, &crp.poly, smudging_variance, rng)?;
        h += &share_to_poly(&additive_share.coeffs, level, &par)?;

        Ok(Self {
            par,
            level,
            log_bound: additive_share.log_bound,
            h_share: h,
        })
    }

    /// Pair the aggregated shares with the CRP into a ciphertext of the
    /// summed shares.
    pub fn get_encryption(&self, crp: &CommonRandomPoly) -> Result<Ciphertext> {
        if self.par.level_of_ctx(crp.poly.ctx())? != self.level {
            return Err(Error::ParameterMismatch(
                "the CRP does not match the level of the aggregated shares".to_string(),
            ));
        }
        Ciphertext::new(vec![self.h_share.clone(), crp.poly.clone()], &self.par)
    }
}

impl Aggregate for BoundedSharesToEncShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par || self.level != other.level || self.log_bound != other.log_bound
        {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        self.h_share += &other.h_share;
        Ok(())
    }
}

impl FheParametrized for BoundedSharesToEncShare {
    type Parameters = BfvParameters;
}

impl Serialize for BoundedSharesToEncShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::S2E_BOUNDED, self.level as u8];
        out.extend_from_slice(&(self.log_bound as u16).to_le_bytes());
        write_poly(&mut out, &self.h_share);
        out
    }
}

impl DeserializeParametrized for BoundedSharesToEncShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::S2E_BOUNDED {
            return Err(Error::SerializationError);
        }
        let level = read_u8(&mut bytes)? as usize;
        if level > par.max_level() {
            return Err(Error::SerializationError);
        }
        let lo = read_u8(&mut bytes)?;
        let hi = read_u8(&mut bytes)?;
        let log_bound = u16::from_le_bytes([lo, hi]) as usize;
        let h_share = read_poly(&mut bytes, par.ctx_at_level(level)?)?;
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            level,
            log_bound,
            h_share,
        })
    }
}

/// A party's share in the bounded collective refresh protocol.
///
/// The compound of a bounded E2S half at the input level and a bounded S2E
/// half at the output level, produced in one pass with a single mask.
/// [`BoundedRefreshShare::finalize`] re-encrypts the centered decoding of
/// the masked ciphertext at the output level;
/// [`BoundedRefreshShare::transform`] interposes a public element-wise
/// function, which must be an additive relabeling of the coefficients
/// (e.g. a permutation), executed identically by every party.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BoundedRefreshShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) in_level: usize,
    pub(crate) out_level: usize,
    pub(crate) log_bound: usize,
    pub(crate) e2s_share: Poly,
    pub(crate) s2e_share: Poly,
}

impl BoundedRefreshShare {
    /// Participate in a new bounded refresh protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: the ciphertext to refresh
    /// 3. *Public input*: a CRP at the output level
    /// 4. *Public input*: the mask bit bound, from
    ///    [`minimum_level_for_bounded_refresh`]
    /// 5. *Public input*: the number of parties, bounding the aggregate mask
    /// 6. *Public input*: the smudging variance
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        crp: &CommonRandomPoly,
        log_bound: usize,
        n_parties: usize,
        smudging_variance: usize,
        rng: &mut R,
    ) -> Result<Self> {
        Self::new_inner(
            sk_share,
            ct,
            crp,
            log_bound,
            n_parties,
            smudging_variance,
            |_| (),
            rng,
        )
    }

    /// Participate in a new bounded masked-transform protocol: a refresh
    /// that also applies `transform` to the plaintext coefficients.
    #[allow(clippy::too_many_arguments)]
    pub fn new_transformed<F, R>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        crp: &CommonRandomPoly,
        log_bound: usize,
        n_parties: usize,
        smudging_variance: usize,
        transform: F,
        rng: &mut R,
    ) -> Result<Self>
    where
        F: Fn(&mut [BigInt]),
        R: RngCore + CryptoRng,
    {
        Self::new_inner(
            sk_share,
            ct,
            crp,
            log_bound,
            n_parties,
            smudging_variance,
            transform,
            rng,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new_inner<F, R>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        crp: &CommonRandomPoly,
        log_bound: usize,
        n_parties: usize,
        smudging_variance: usize,
        transform: F,
        rng: &mut R,
    ) -> Result<Self>
    where
        F: Fn(&mut [BigInt]),
        R: RngCore + CryptoRng,
    {
        if sk_share.par != ct.par {
            return Err(Error::ParameterMismatch(
                "the key and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if ct.len() != 2 {
            return Err(Error::TooManyValues(ct.len(), 2));
        }
        let par = sk_share.par.clone();
        let in_level = ct.level();
        let out_level = par.level_of_ctx(crp.poly.ctx())?;
        check_mask_headroom(&par, in_level, log_bound, n_parties)?;

        let mask = sample_mask(log_bound, par.degree(), rng);

        // Bounded E2S half: h_i = s_i * c1 + e1_i - m_i.
        let mut e2s_share = decryption_share_poly(sk_share, ct, smudging_variance, rng)?;
        e2s_share -= &mask_to_poly(&mask, in_level, &par)?;

        // Bounded S2E half: h'_i = -a * s_i + e2_i + tau(m_i).
        let mut coeffs: Vec<BigInt> = mask.into_iter().map(BigInt::from).collect();
        transform(&mut coeffs);
        let mut s2e_share =
            zero_encryption_share_poly(sk_share, &crp.poly, smudging_variance, rng)?;
        s2e_share += &share_to_poly(&coeffs, out_level, &par)?;

        Ok(Self {
            par,
            in_level,
            out_level,
            log_bound,
            e2s_share,
            s2e_share,
        })
    }

    /// Refresh the ciphertext using the aggregated shares: decode the
    /// masked coefficients at the input level with a centered lift and
    /// re-encrypt them against the CRP at the output level.
    pub fn finalize(&self, ct: &Ciphertext, crp: &CommonRandomPoly) -> Result<Ciphertext> {
        self.transform(ct, |_| (), crp)
    }

    /// Refresh the ciphertext while applying `transform` to the plaintext
    /// coefficients.
    ///
    /// `transform` must be the same pure function every party passed to
    /// [`BoundedRefreshShare::new_transformed`].
    pub fn transform<F>(
        &self,
        ct: &Ciphertext,
        transform: F,
        crp: &CommonRandomPoly,
    ) -> Result<Ciphertext>
    where
        F: Fn(&mut [BigInt]),
    {
        if self.par != ct.par {
            return Err(Error::ParameterMismatch(
                "the share and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if self.in_level != ct.level() {
            return Err(Error::ParameterMismatch(
                "the share was generated for a ciphertext at a different level".to_string(),
            ));
        }
        if self.par.level_of_ctx(crp.poly.ctx())? != self.out_level {
            return Err(Error::ParameterMismatch(
                "the CRP does not match the output level of the shares".to_string(),
            ));
        }

        let mut w = centered_coefficients(&ct[0] + &self.e2s_share);
        transform(&mut w);
        let mut c0 = share_to_poly(&w, self.out_level, &self.par)?;
        c0 += &self.s2e_share;

        Ciphertext::new(vec![c0, crp.poly.clone()], &self.par)
    }
}

impl Aggregate for BoundedRefreshShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par
            || self.in_level != other.in_level
            || self.out_level != other.out_level
            || self.log_bound != other.log_bound
        {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        self.e2s_share += &other.e2s_share;
        self.s2e_share += &other.s2e_share;
        Ok(())
    }
}

impl FheParametrized for BoundedRefreshShare {
    type Parameters = BfvParameters;
}

impl Serialize for BoundedRefreshShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            tags::RFR_BOUNDED,
            self.in_level as u8,
            self.out_level as u8,
        ];
        out.extend_from_slice(&(self.log_bound as u16).to_le_bytes());
        write_poly(&mut out, &self.e2s_share);
        write_poly(&mut out, &self.s2e_share);
        out
    }
}

impl DeserializeParametrized for BoundedRefreshShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::RFR_BOUNDED {
            return Err(Error::SerializationError);
        }
        let in_level = read_u8(&mut bytes)? as usize;
        let out_level = read_u8(&mut bytes)? as usize;
        if in_level > par.max_level() || out_level > par.max_level() {
            return Err(Error::SerializationError);
        }
        let lo = read_u8(&mut bytes)?;
        let hi = read_u8(&mut bytes)?;
        let log_bound = u16::from_le_bytes([lo, hi]) as usize;
        let e2s_share = read_poly(&mut bytes, par.ctx_at_level(in_level)?)?;
        let s2e_share = read_poly(&mut bytes, par.ctx_at_level(out_level)?)?;
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            in_level,
            out_level,
            log_bound,
            e2s_share,
            s2e_share,
        })
    }
}
