//! Plaintext type in the BFV encryption scheme.

use crate::{
    bfv::{BfvParameters, Encoding},
    Error, Result,
};
use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use fhe_math::zq::Modulus;
use fhe_traits::{FheDecoder, FheEncoder, FheParametrized, FhePlaintext};
use itertools::Itertools;
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

/// A plaintext object, that encodes a vector according to a specific encoding.
#[derive(Debug, Clone, Eq)]
pub struct Plaintext {
    /// The parameters of the underlying BFV encryption scheme.
    pub(crate) par: Arc<BfvParameters>,
    /// The value after encoding.
    pub(crate) value: Box<[u64]>,
    /// The encoding of the plaintext, if known
    pub(crate) encoding: Option<Encoding>,
    /// The plaintext as a polynomial.
    pub(crate) poly_ntt: Poly,
    /// The level of the plaintext
    pub(crate) level: usize,
}

impl Zeroize for Plaintext {
    fn zeroize(&mut self) {
        self.value.zeroize();
        self.poly_ntt.zeroize();
    }
}

impl FheParametrized for Plaintext {
    type Parameters = BfvParameters;
}

impl FhePlaintext for Plaintext {
    type Encoding = Encoding;
}

/// Scale a vector of plaintext values up into the ciphertext ring at the
/// given level, i.e. compute the polynomial `Delta * m` used by encryptions
/// and by the share-embedding steps of the multiparty protocols.
pub(crate) fn scale_up(value: &[u64], level: usize, par: &Arc<BfvParameters>) -> Result<Poly> {
    let ctx = par.ctx_at_level(level)?;
    let mut m_v = Zeroizing::new(value.to_vec());
    par.plaintext.scalar_mul_vec(&mut m_v, par.q_mod_t[level]);
    let mut m = Poly::try_convert_from(m_v.as_slice(), ctx, false, Representation::PowerBasis)?;
    m.change_representation(Representation::Ntt);
    m *= &par.delta[level];
    Ok(m)
}

/// Scale a ciphertext-ring polynomial (in Ntt representation, with the
/// `c_1 * s` part already folded in) back down to a vector of plaintext
/// values. This is the tail of the decryption procedure, shared with the
/// collective decryption and encryption-to-shares protocols.
pub(crate) fn scale_down(mut c: Poly, level: usize, par: &Arc<BfvParameters>) -> Result<Vec<u64>> {
    c.disallow_variable_time_computations();
    c.change_representation(Representation::PowerBasis);

    let d = Zeroizing::new(c.scale(&par.scalers[level])?);
    let v = Zeroizing::new(
        Vec::<u64>::from(d.as_ref())
            .into_iter()
            .map(|vi| vi + *par.plaintext)
            .collect_vec(),
    );
    let mut w = v[..par.degree()].to_vec();
    let q = Modulus::new(par.moduli[0])?;
    q.reduce_vec(&mut w);
    par.plaintext.reduce_vec(&mut w);

    c.zeroize();

    Ok(w)
}

impl Plaintext {
    pub(crate) fn to_poly(&self) -> Result<Poly> {
        scale_up(&self.value, self.level, &self.par)
    }

    /// Generate a zero plaintext.
    pub fn zero(encoding: Encoding, par: &Arc<BfvParameters>) -> Result<Self> {
        let level = encoding.level();
        let ctx = par.ctx_at_level(level)?;
        let value = vec![0u64; par.degree()];
        let poly_ntt = Poly::zero(ctx, Representation::Ntt);
        Ok(Self {
            par: par.clone(),
            value: value.into_boxed_slice(),
            encoding: Some(encoding),
            poly_ntt,
            level,
        })
    }

    /// Returns the level of this plaintext.
    pub fn level(&self) -> usize {
        self.level
    }
}

// Implement the equality manually; we want to say that two plaintexts are
// equal even if one of them doesn't store its encoding information.
impl PartialEq for Plaintext {
    fn eq(&self, other: &Self) -> bool {
        let mut eq = self.par == other.par;
        eq &= self.value == other.value;
        eq &= self.level == other.level;
        if self.encoding.is_some() && other.encoding.is_some() {
            eq &= self.encoding.as_ref().unwrap() == other.encoding.as_ref().unwrap()
        }
        eq
    }
}

// Encoding and decoding.

impl<'a, const N: usize, T> FheEncoder<&'a [T; N]> for Plaintext
where
    Plaintext: FheEncoder<&'a [T], Error = Error>,
{
    type Error = Error;
    fn try_encode(value: &'a [T; N], encoding: Encoding, par: &Arc<BfvParameters>) -> Result<Self> {
        Plaintext::try_encode(value.as_ref(), encoding, par)
    }
}

impl<'a, T> FheEncoder<&'a Vec<T>> for Plaintext
where
    Plaintext: FheEncoder<&'a [T], Error = Error>,
{
    type Error = Error;
    fn try_encode(value: &'a Vec<T>, encoding: Encoding, par: &Arc<BfvParameters>) -> Result<Self> {
        Plaintext::try_encode(value.as_ref(), encoding, par)
    }
}

impl<'a> FheEncoder<&'a [u64]> for Plaintext {
    type Error = Error;
    fn try_encode(value: &'a [u64], encoding: Encoding, par: &Arc<BfvParameters>) -> Result<Self> {
        if value.len() > par.degree() {
            return Err(Error::TooManyValues(value.len(), par.degree()));
        }
        if matches!(encoding, Encoding::Simd { .. }) && par.op.is_none() {
            return Err(Error::EncodingNotSupported("Simd".to_string()));
        }
        let level = encoding.level();
        let ctx = par.ctx_at_level(level)?;

        let mut v = Zeroizing::new(vec![0u64; par.degree()]);
        match encoding {
            Encoding::Poly { .. } => v[..value.len()].copy_from_slice(value),
            Encoding::Simd { .. } => {
                for (i, vi) in value.iter().enumerate() {
                    v[par.matrix_reps_index_map[i]] = *vi;
                }
                par.op.as_ref().unwrap().backward(&mut v);
            }
        };

        let mut poly = Poly::try_convert_from(v.as_slice(), ctx, false, Representation::PowerBasis)?;
        poly.change_representation(Representation::Ntt);

        Ok(Plaintext {
            par: par.clone(),
            value: v.to_vec().into_boxed_slice(),
            encoding: Some(encoding),
            poly_ntt: poly,
            level,
        })
    }
}

impl<'a> FheEncoder<&'a [i64]> for Plaintext {
    type Error = Error;
    fn try_encode(value: &'a [i64], encoding: Encoding, par: &Arc<BfvParameters>) -> Result<Self> {
        let w = Zeroizing::new(par.plaintext.reduce_vec_i64(value));
        Plaintext::try_encode(w.as_ref() as &[u64], encoding, par)
    }
}

impl FheDecoder<Plaintext> for Vec<u64> {
    fn try_decode<O>(pt: &Plaintext, encoding: O) -> Result<Vec<u64>>
    where
        O: Into<Option<Encoding>>,
    {
        let encoding = encoding.into();
        let enc: Encoding;
        if pt.encoding.is_none() && encoding.is_none() {
            return Err(Error::UnspecifiedInput("No encoding specified".to_string()));
        } else if pt.encoding.is_some() {
            enc = pt.encoding.as_ref().unwrap().clone();
            if let Some(arg_enc) = encoding {
                if arg_enc != enc {
                    return Err(Error::EncodingMismatch(arg_enc.into(), enc.into()));
                }
            }
        } else {
            enc = encoding.unwrap();
        }

        let mut w = pt.value.to_vec();

        match enc {
            Encoding::Poly { .. } => Ok(w),
            Encoding::Simd { .. } => {
                if let Some(op) = &pt.par.op {
                    op.forward(&mut w);
                    let mut w_reordered = w.clone();
                    for i in 0..pt.par.degree() {
                        w_reordered[i] = w[pt.par.matrix_reps_index_map[i]]
                    }
                    w.zeroize();
                    Ok(w_reordered)
                } else {
                    Err(Error::EncodingNotSupported("Simd".to_string()))
                }
            }
        }
    }

    type Error = Error;
}

impl FheDecoder<Plaintext> for Vec<i64> {
    fn try_decode<E>(pt: &Plaintext, encoding: E) -> Result<Vec<i64>>
    where
        E: Into<Option<Encoding>>,
    {
        let v = Vec::<u64>::try_decode(pt, encoding)?;
        Ok(unsafe { pt.par.plaintext.center_vec_vt(&v) })
    }

    type Error = Error;
}
