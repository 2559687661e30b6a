//! The collective public key-switching protocol.

use std::sync::Arc;

use fhe_math::rq::{Poly, Representation};
use fhe_traits::{DeserializeParametrized, FheParametrized, Serialize};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::bfv::{read_poly, read_u8, write_poly, BfvParameters, Ciphertext, PublicKey, SecretKey};
use crate::{Error, Result};

use super::{tags, Aggregate};

/// A party's share in the collective public key-switching protocol.
///
/// Each party uses the `PublicKeySwitchShare` to generate their share of the
/// re-keyed ciphertext and participate in the "Protocol 4: PubKeySwitch"
/// protocol detailed in [Multiparty BFV](https://eprint.iacr.org/2020/304.pdf) (p7).
/// The target public key may belong to a party outside the protocol. The
/// aggregated share is applied to the input ciphertext with
/// [`PublicKeySwitchShare::key_switch`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublicKeySwitchShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) level: usize,
    pub(crate) h0_share: Poly,
    pub(crate) h1_share: Poly,
}

impl PublicKeySwitchShare {
    /// Participate in a new PubKeySwitch protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: the output public key
    /// 3. *Public input*: the ciphertext to key switch
    /// 4. *Public input*: the smudging variance, flooding the secret-bearing
    ///    half of the share
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        public_key: &PublicKey,
        ct: &Ciphertext,
        smudging_variance: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if sk_share.par != public_key.par || public_key.par != ct.par {
            return Err(Error::ParameterMismatch(
                "the keys and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if ct.len() != 2 {
            return Err(Error::TooManyValues(ct.len(), 2));
        }

        let par = sk_share.par.clone();

        // Bring the public key to the ciphertext level.
        let mut pk_ct = public_key.c.clone();
        while pk_ct.level() != ct.level() {
            pk_ct.mod_switch_to_next_level()?;
        }
        let ctx = par.ctx_at_level(ct.level())?;

        let s = sk_share.to_poly(ctx)?;

        let u = Zeroizing::new(Poly::small(ctx, Representation::Ntt, par.variance, rng)?);
        let e0 = Zeroizing::new(Poly::small(
            ctx,
            Representation::Ntt,
            smudging_variance,
            rng,
        )?);
        let e1 = Zeroizing::new(Poly::small(ctx, Representation::Ntt, par.variance, rng)?);

        // h0_i = u_i * pk_0 + s_i * c_1 + e0_i
        let mut h0 = pk_ct[0].clone();
        h0.disallow_variable_time_computations();
        h0 *= u.as_ref();
        let mut s_c1 = Zeroizing::new(ct[1].clone());
        s_c1.disallow_variable_time_computations();
        *s_c1.as_mut() *= s.as_ref();
        h0 += s_c1.as_ref();
        h0 += e0.as_ref();

        // h1_i = u_i * pk_1 + e1_i
        let mut h1 = pk_ct[1].clone();
        h1.disallow_variable_time_computations();
        h1 *= u.as_ref();
        h1 += e1.as_ref();

        Ok(Self {
            par,
            level: ct.level(),
            h0_share: h0,
            h1_share: h1,
        })
    }

    /// Apply the aggregated share to the input ciphertext, yielding a
    /// ciphertext decryptable under the target public key's secret.
    pub fn key_switch(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        if self.par != ct.par {
            return Err(Error::ParameterMismatch(
                "the share and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if self.level != ct.level() {
            return Err(Error::ParameterMismatch(
                "the share was generated for a ciphertext at a different level".to_string(),
            ));
        }

        let c0 = &ct[0] + &self.h0_share;
        let c1 = self.h1_share.clone();
        Ciphertext::new(vec![c0, c1], &self.par)
    }
}

impl Aggregate for PublicKeySwitchShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par || self.level != other.level {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        self.h0_share += &other.h0_share;
        self.h1_share += &other.h1_share;
        Ok(())
    }
}

impl FheParametrized for PublicKeySwitchShare {
    type Parameters = BfvParameters;
}

impl Serialize for PublicKeySwitchShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::PCKS, self.level as u8];
        write_poly(&mut out, &self.h0_share);
        write_poly(&mut out, &self.h1_share);
        out
    }
}

impl DeserializeParametrized for PublicKeySwitchShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::PCKS {
            return Err(Error::SerializationError);
        }
        let level = read_u8(&mut bytes)? as usize;
        if level > par.max_level() {
            return Err(Error::SerializationError);
        }
        let ctx = par.ctx_at_level(level)?;
        let h0_share = read_poly(&mut bytes, ctx)?;
        let h1_share = read_poly(&mut bytes, ctx)?;
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            level,
            h0_share,
            h1_share,
        })
    }
}
