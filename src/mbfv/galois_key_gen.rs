//! The collective rotation-key (Galois-key) generation protocol.

use std::sync::Arc;

use crate::bfv::{
    read_poly, read_u8, write_poly, BfvParameters, GaloisKey, KeySwitchingKey, SecretKey,
};
use crate::errors::Result;
use crate::Error;
use fhe_math::rns::RnsContext;
use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation, SubstitutionExponent};
use fhe_traits::{DeserializeParametrized, FheParametrized, Serialize};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use super::{tags, Aggregate, CommonRandomPoly};

/// A party's share in the rotation-key generation protocol.
///
/// For a Galois element `g` defining the automorphism `s(x) -> s(x^g)`,
/// the aggregated shares pair with the CRP vector into a [`GaloisKey`]
/// rewriting `c_1(x^g) * s(x^g)` back to a term linear in `s(x)`. The
/// Galois element for row swaps and column rotations of the SIMD plaintext
/// can be obtained from the parameters.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct GaloisKeyShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) element: usize,
    pub(crate) h_share: Box<[Poly]>,
}

impl GaloisKeyShare {
    /// Participate in a new rotation-key generation protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: the Galois element
    /// 3. *Public input*: common random polynomial vector
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        element: usize,
        crp: &[CommonRandomPoly],
        rng: &mut R,
    ) -> Result<Self> {
        let par = sk_share.par.clone();
        let ctx = par.ctx_at_level(0)?;
        if ctx.moduli().len() == 1 {
            return Err(Error::DefaultError(
                "These parameters do not support key switching".to_string(),
            ));
        }
        if crp.len() != ctx.moduli().len() {
            return Err(Error::ParameterMismatch(
                "the CRP vector must have one polynomial per ciphertext modulus".to_string(),
            ));
        }
        let substitution = SubstitutionExponent::new(ctx, element).map_err(Error::MathError)?;

        let s = Zeroizing::new(Poly::try_convert_from(
            sk_share.coeffs.as_ref(),
            ctx,
            false,
            Representation::PowerBasis,
        )?);
        let s_sub = Zeroizing::new(s.substitute(&substitution)?);
        let s_ntt = sk_share.to_poly(ctx)?;

        let rns = RnsContext::new(&par.moduli[..crp.len()])?;
        let h_share = crp
            .iter()
            .enumerate()
            .map(|(i, a)| {
                // h_i[j] = -a_j * s_i + g_j * s_i(x^g) + e
                let g = rns.get_garner(i).unwrap();
                let mut g_s_sub = Zeroizing::new(g * s_sub.as_ref());
                g_s_sub.change_representation(Representation::Ntt);

                let e = Zeroizing::new(Poly::small(ctx, Representation::Ntt, par.variance, rng)?);

                let mut h = -a.poly.clone();
                h.disallow_variable_time_computations();
                h *= s_ntt.as_ref();
                h += g_s_sub.as_ref();
                h += e.as_ref();
                Ok(h)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            par,
            element,
            h_share: h_share.into_boxed_slice(),
        })
    }

    /// Finalize the aggregated shares into a [`GaloisKey`], pairing them
    /// with the CRP vector they were generated against.
    pub fn into_galois_key(&self, crp: &[CommonRandomPoly]) -> Result<GaloisKey> {
        let ctx = self.par.ctx_at_level(0)?;
        if crp.len() != self.h_share.len() {
            return Err(Error::ParameterMismatch(
                "the CRP vector does not match the aggregated shares".to_string(),
            ));
        }
        let element = SubstitutionExponent::new(ctx, self.element).map_err(Error::MathError)?;

        let mut c0 = self.h_share.to_vec();
        c0.iter_mut().for_each(|c| {
            unsafe { c.allow_variable_time_computations() }
            c.change_representation(Representation::NttShoup);
        });
        let mut c1 = crp.iter().map(|a| a.poly.clone()).collect::<Vec<_>>();
        c1.iter_mut().for_each(|c| {
            unsafe { c.allow_variable_time_computations() }
            c.change_representation(Representation::NttShoup);
        });

        let ksk = KeySwitchingKey {
            par: self.par.clone(),
            seed: None,
            c0: c0.into_boxed_slice(),
            c1: c1.into_boxed_slice(),
            ciphertext_level: 0,
            ctx_ciphertext: ctx.clone(),
            ksk_level: 0,
            ctx_ksk: ctx.clone(),
        };
        Ok(GaloisKey { element, ksk })
    }
}

impl Aggregate for GaloisKeyShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par || self.element != other.element {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        for (h, other_h) in self.h_share.iter_mut().zip(other.h_share.iter()) {
            *h += other_h;
        }
        Ok(())
    }
}

impl FheParametrized for GaloisKeyShare {
    type Parameters = BfvParameters;
}

impl Serialize for GaloisKeyShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::RTG, 0];
        out.extend_from_slice(&(self.element as u16).to_le_bytes());
        out.push(self.h_share.len() as u8);
        for h in self.h_share.iter() {
            write_poly(&mut out, h);
        }
        out
    }
}

impl DeserializeParametrized for GaloisKeyShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::RTG || read_u8(&mut bytes)? != 0 {
            return Err(Error::SerializationError);
        }
        let lo = read_u8(&mut bytes)?;
        let hi = read_u8(&mut bytes)?;
        let element = u16::from_le_bytes([lo, hi]) as usize;
        let count = read_u8(&mut bytes)? as usize;
        if count != par.moduli.len() {
            return Err(Error::SerializationError);
        }
        let ctx = par.ctx_at_level(0)?;
        let mut h_share = Vec::with_capacity(count);
        for _ in 0..count {
            h_share.push(read_poly(&mut bytes, ctx)?);
        }
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            element,
            h_share: h_share.into_boxed_slice(),
        })
    }
}
