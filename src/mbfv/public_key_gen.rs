//! The collective public-key generation protocol.

use std::sync::Arc;

use crate::bfv::{read_poly, read_u8, write_poly, BfvParameters, Ciphertext, PublicKey, SecretKey};
use crate::errors::Result;
use crate::Error;
use fhe_math::rq::{Poly, Representation};
use fhe_traits::{DeserializeParametrized, FheParametrized, Serialize};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use super::{tags, Aggregate, CommonRandomPoly};

/// The RLWE-level core shared by every share that publishes a symmetric
/// encryption of zero against a common random polynomial `a`:
/// `-a * s_i + e_i`. The collective public key, the shares-to-encryption
/// conversion and the re-encryption half of the refresh protocols all
/// start from this polynomial, in both plaintext flavors.
pub(crate) fn zero_encryption_share_poly<R: RngCore + CryptoRng>(
    sk_share: &SecretKey,
    a: &Poly,
    variance: usize,
    rng: &mut R,
) -> Result<Poly> {
    let s = sk_share.to_poly(a.ctx())?;
    let e = Zeroizing::new(Poly::small(a.ctx(), Representation::Ntt, variance, rng)?);

    let mut h = -a.clone();
    h.disallow_variable_time_computations();
    h *= s.as_ref();
    h += e.as_ref();
    Ok(h)
}

/// A party's share in the collective public-key generation protocol.
///
/// Each party uses the `PublicKeyShare` to generate their share of the
/// public key and participate in the "Protocol 1: EncKeyGen" protocol
/// detailed in [Multiparty BFV](https://eprint.iacr.org/2020/304.pdf) (p6).
/// Aggregate the shares of all parties, then call
/// [`PublicKeyShare::into_public_key`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublicKeyShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) crp: CommonRandomPoly,
    pub(crate) p0_share: Poly,
}

impl PublicKeyShare {
    /// Participate in a new EncKeyGen protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: common random polynomial
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        crp: CommonRandomPoly,
        rng: &mut R,
    ) -> Result<Self> {
        let par = sk_share.par.clone();
        if crp.poly.ctx() != par.ctx_at_level(0)? {
            return Err(Error::ParameterMismatch(
                "the CRP was not sampled at level 0".to_string(),
            ));
        }

        let p0_share = zero_encryption_share_poly(sk_share, &crp.poly, par.variance, rng)?;
        Ok(Self { par, crp, p0_share })
    }

    /// Turn the aggregate of all parties' shares into the collective public
    /// key `(sum of shares, a)`, a valid encryption of zero under the
    /// collective secret.
    pub fn into_public_key(self) -> Result<PublicKey> {
        Ok(PublicKey {
            c: Ciphertext::new(vec![self.p0_share, self.crp.poly], &self.par)?,
            par: self.par,
        })
    }
}

impl Aggregate for PublicKeyShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par || self.crp != other.crp {
            return Err(Error::ParameterMismatch(
                "shares from different protocol instances".to_string(),
            ));
        }
        self.p0_share += &other.p0_share;
        Ok(())
    }
}

impl FheParametrized for PublicKeyShare {
    type Parameters = BfvParameters;
}

impl Serialize for PublicKeyShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::CKG, 0];
        write_poly(&mut out, &self.p0_share);
        write_poly(&mut out, &self.crp.poly);
        out
    }
}

impl DeserializeParametrized for PublicKeyShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::CKG || read_u8(&mut bytes)? != 0 {
            return Err(Error::SerializationError);
        }
        let ctx = par.ctx_at_level(0)?;
        let p0_share = read_poly(&mut bytes, ctx)?;
        let crp = read_poly(&mut bytes, ctx)?;
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            crp: CommonRandomPoly { poly: crp },
            p0_share,
        })
    }
}
