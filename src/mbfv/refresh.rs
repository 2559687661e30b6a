//! The collective refresh protocol ("bootstrapping by interaction"), and
//! its masked-transform extension, in the integer plaintext flavor. See
//! [`super::fixed_point`] for the bounded-integer flavor used with
//! approximate plaintexts.

use std::sync::Arc;

use fhe_math::rq::Poly;
use fhe_traits::{DeserializeParametrized, FheParametrized, Serialize};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::bfv::{
    read_poly, read_u8, scale_down, scale_up, write_poly, BfvParameters, Ciphertext, SecretKey,
};
use crate::{Error, Result};

use super::public_key_gen::zero_encryption_share_poly;
use super::secret_key_switch::decryption_share_poly;
use super::{tags, Aggregate, CommonRandomPoly};

/// Statistical security, in bits, of the additive masking enforced by the
/// refresh protocol.
const STATISTICAL_SECURITY: usize = 128;

/// Compute the deepest ciphertext level at which the refresh protocol can
/// run while the masking retains `security_bits` bits of statistical
/// security, together with the bit bound of the masking.
///
/// Returns [`Error::PrecisionExhausted`] when no level of these parameters
/// supports a refresh, in which case the refresh family is unavailable.
pub fn minimum_level_for_refresh(
    par: &Arc<BfvParameters>,
    n_parties: usize,
    security_bits: usize,
) -> Result<(usize, usize)> {
    let t_bits = 64 - par.plaintext().leading_zeros() as usize;
    let n_bits = usize::BITS as usize - n_parties.leading_zeros() as usize;
    let log_bound = t_bits + security_bits + n_bits + 1;

    for level in (0..=par.max_level()).rev() {
        let q_bits: usize = par.moduli_sizes()[..par.moduli_sizes().len() - level]
            .iter()
            .sum();
        if q_bits > log_bound + 1 {
            return Ok((level, log_bound));
        }
    }
    Err(Error::PrecisionExhausted)
}

/// A party's share in the collective refresh protocol.
///
/// The share carries both halves of the interaction: an
/// encryption-to-shares half at the input ciphertext level and a
/// shares-to-encryption half at the output level, produced in one pass so a
/// single round of communication carries the full contribution. The same
/// uniform mask ties the two halves together; the mask never leaves the
/// party.
///
/// [`RefreshShare::finalize`] on the aggregate decodes the masked plaintext
/// and re-encrypts it against the CRP, yielding a ciphertext with a fresh
/// noise budget. [`RefreshShare::transform`] interposes a public
/// element-wise function between the two halves; the function must be a
/// permutation (or any other additive relabeling) of the plaintext
/// coefficients, executed identically by every party.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RefreshShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) in_level: usize,
    pub(crate) out_level: usize,
    pub(crate) e2s_share: Poly,
    pub(crate) s2e_share: Poly,
}

impl RefreshShare {
    /// Participate in a new refresh protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: the ciphertext to refresh
    /// 3. *Public input*: a CRP at the output level
    /// 4. *Public input*: the number of parties, bounding the aggregate mask
    /// 5. *Public input*: the smudging variance
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        crp: &CommonRandomPoly,
        n_parties: usize,
        smudging_variance: usize,
        rng: &mut R,
    ) -> Result<Self> {
        Self::new_inner(sk_share, ct, crp, n_parties, smudging_variance, |_| (), rng)
    }

    /// Participate in a new masked-transform protocol: a refresh that also
    /// applies `transform` to the plaintext.
    pub fn new_transformed<F, R>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        crp: &CommonRandomPoly,
        n_parties: usize,
        smudging_variance: usize,
        transform: F,
        rng: &mut R,
    ) -> Result<Self>
    where
        F: Fn(&mut [u64]),
        R: RngCore + CryptoRng,
    {
        Self::new_inner(
            sk_share,
            ct,
            crp,
            n_parties,
            smudging_variance,
            transform,
            rng,
        )
    }

    fn new_inner<F, R>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        crp: &CommonRandomPoly,
        n_parties: usize,
        smudging_variance: usize,
        transform: F,
        rng: &mut R,
    ) -> Result<Self>
    where
        F: Fn(&mut [u64]),
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

        let (deepest, _) = minimum_level_for_refresh(&par, n_parties, STATISTICAL_SECURITY)?;
        if in_level > deepest {
            return Err(Error::PrecisionExhausted);
        }

        let mask = Zeroizing::new(par.plaintext.random_vec(par.degree(), rng));

        // Encryption-to-shares half, at the input level:
        // h_i = s_i * c1 + e1_i + Delta_in * m_i
        let mut e2s_share = decryption_share_poly(sk_share, ct, smudging_variance, rng)?;
        let m_in = Zeroizing::new(scale_up(&mask, in_level, &par)?);
        e2s_share += m_in.as_ref();

        // Shares-to-encryption half, at the output level, embedding the
        // (transformed) negated mask:
        // h'_i = -a * s_i + e2_i + Delta_out * tau(-m_i)
        let mut neg_mask = mask.clone();
        par.plaintext.neg_vec(&mut neg_mask);
        transform(&mut neg_mask);
        let mut s2e_share =
            zero_encryption_share_poly(sk_share, &crp.poly, smudging_variance, rng)?;
        let m_out = Zeroizing::new(scale_up(&neg_mask, out_level, &par)?);
        s2e_share += m_out.as_ref();

        Ok(Self {
            par,
            in_level,
            out_level,
            e2s_share,
            s2e_share,
        })
    }

    /// Refresh the ciphertext using the aggregated shares: decode the masked
    /// plaintext at the input level and re-encrypt it against the CRP at the
    /// output level.
    pub fn finalize(&self, ct: &Ciphertext, crp: &CommonRandomPoly) -> Result<Ciphertext> {
        self.transform(ct, |_| (), crp)
    }

    /// Refresh the ciphertext while applying `transform` to the plaintext.
    ///
    /// `transform` must be the same pure function every party passed to
    /// [`RefreshShare::new_transformed`].
    pub fn transform<F>(
        &self,
        ct: &Ciphertext,
        transform: F,
        crp: &CommonRandomPoly,
    ) -> Result<Ciphertext>
    where
        F: Fn(&mut [u64]),
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

        // Decode the masked plaintext, transform it, and scale it back up at
        // the output level.
        let c = &ct[0] + &self.e2s_share;
        let mut w = scale_down(c, self.in_level, &self.par)?;
        transform(&mut w);
        let mut c0 = scale_up(&w, self.out_level, &self.par)?;
        c0 += &self.s2e_share;

        Ciphertext::new(vec![c0, crp.poly.clone()], &self.par)
    }
}

impl Aggregate for RefreshShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.par != other.par
            || self.in_level != other.in_level
            || self.out_level != other.out_level
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

impl FheParametrized for RefreshShare {
    type Parameters = BfvParameters;
}

impl Serialize for RefreshShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::RFR, self.in_level as u8, self.out_level as u8];
        write_poly(&mut out, &self.e2s_share);
        write_poly(&mut out, &self.s2e_share);
        out
    }
}

impl DeserializeParametrized for RefreshShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::RFR {
            return Err(Error::SerializationError);
        }
        let in_level = read_u8(&mut bytes)? as usize;
        let out_level = read_u8(&mut bytes)? as usize;
        if in_level > par.max_level() || out_level > par.max_level() {
            return Err(Error::SerializationError);
        }
        let e2s_share = read_poly(&mut bytes, par.ctx_at_level(in_level)?)?;
        let s2e_share = read_poly(&mut bytes, par.ctx_at_level(out_level)?)?;
        if !bytes.is_empty() {
            return Err(Error::SerializationError);
        }
        Ok(Self {
            par: par.clone(),
            in_level,
            out_level,
            e2s_share,
            s2e_share,
        })
    }
}

#[cfg(test)]
mod tests {
    use fhe_traits::{
        DeserializeParametrized, FheDecoder, FheDecrypter, FheEncoder, FheEncrypter, Serialize,
    };
    use rand::thread_rng;
    use std::sync::Arc;

    use crate::{
        bfv::{
            BfvParameters, Ciphertext, Encoding, Multiplicator, Plaintext, PublicKey,
            RelinearizationKey, SecretKey,
        },
        mbfv::{Aggregate, CommonRandomPoly, CommonRandomString, PublicKeyShare},
        Error,
    };

    use super::{minimum_level_for_refresh, RefreshShare};

    const SMUDGING_VARIANCE: usize = 16;

    struct Setup {
        par: Arc<BfvParameters>,
        sk_shares: Vec<SecretKey>,
        // The summed secret, used by the test harness only, to measure noise
        // and decrypt directly.
        sk_group: SecretKey,
        public_key: PublicKey,
    }

    fn setup(par: &Arc<BfvParameters>, n_parties: usize) -> Setup {
        let mut rng = thread_rng();
        let mut crs = CommonRandomString::new([41u8; 32]);
        let crp = CommonRandomPoly::new(par, &mut crs).unwrap();

        let sk_shares: Vec<SecretKey> = (0..n_parties)
            .map(|_| SecretKey::random(par, &mut rng))
            .collect();
        let group_coeffs: Vec<i64> = (0..par.degree())
            .map(|i| sk_shares.iter().map(|sk| sk.coeffs[i]).sum())
            .collect();
        let sk_group = SecretKey::new(group_coeffs, par);

        let public_key = PublicKeyShare::try_from_shares(
            sk_shares
                .iter()
                .map(|sk| PublicKeyShare::new(sk, crp.clone(), &mut rng)),
        )
        .unwrap()
        .into_public_key()
        .unwrap();

        Setup {
            par: par.clone(),
            sk_shares,
            sk_group,
            public_key,
        }
    }

    fn run_refresh(setup: &Setup, ct: &Ciphertext, crp: &CommonRandomPoly) -> Ciphertext {
        let mut rng = thread_rng();
        RefreshShare::try_from_shares(setup.sk_shares.iter().map(|sk| {
            RefreshShare::new(
                sk,
                ct,
                crp,
                setup.sk_shares.len(),
                SMUDGING_VARIANCE,
                &mut rng,
            )
        }))
        .unwrap()
        .finalize(ct, crp)
        .unwrap()
    }

    #[test]
    fn refresh_restores_the_noise_budget() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(4, 16);
        let setup = setup(&par, 3);
        let mut crs = CommonRandomString::new([42u8; 32]);

        let v = par.plaintext.random_vec(par.degree(), &mut rng);
        let pt = Plaintext::try_encode(&v, Encoding::simd(), &par).unwrap();
        let ct = setup.public_key.try_encrypt(&pt, &mut rng).unwrap();

        // Consume some of the noise budget with a multiplication.
        let rlk = RelinearizationKey::new(&setup.sk_group, &mut rng).unwrap();
        let mut multiplicator = Multiplicator::default(&rlk).unwrap();
        multiplicator.enable_mod_switching().unwrap();
        let ct = multiplicator.multiply(&ct, &ct).unwrap();
        let mut expected = v.clone();
        par.plaintext.mul_vec(&mut expected, &v);
        assert_eq!(ct.level(), 1);

        // Refresh back to the full modulus chain.
        let crp = CommonRandomPoly::new_leveled(&par, 0, &mut crs).unwrap();
        let ct_fresh = run_refresh(&setup, &ct, &crp);
        assert_eq!(ct_fresh.level(), 0);

        let pt_fresh = setup.sk_group.try_decrypt(&ct_fresh).unwrap();
        assert_eq!(
            Vec::<u64>::try_decode(&pt_fresh, Encoding::simd()).unwrap(),
            expected
        );

        // The refreshed ciphertext is at the full modulus chain with fresh
        // noise, far below the failure threshold.
        assert!(unsafe { setup.sk_group.measure_noise(&ct_fresh).unwrap() } <= 30);

        // The refreshed ciphertext supports at least one more
        // multiplication.
        let multiplicator = Multiplicator::default(&rlk).unwrap();
        let ct2 = multiplicator.multiply(&ct_fresh, &ct_fresh).unwrap();
        let expected_clone = expected.clone();
        par.plaintext.mul_vec(&mut expected, &expected_clone);
        let pt2 = setup.sk_group.try_decrypt(&ct2).unwrap();
        assert_eq!(
            Vec::<u64>::try_decode(&pt2, Encoding::simd()).unwrap(),
            expected
        );
    }

    #[test]
    fn masked_transform_permutes_the_plaintext() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(4, 16);
        let setup = setup(&par, 3);
        let mut crs = CommonRandomString::new([43u8; 32]);

        let v = par.plaintext.random_vec(par.degree(), &mut rng);
        let pt = Plaintext::try_encode(&v, Encoding::poly(), &par).unwrap();
        let ct = setup.public_key.try_encrypt(&pt, &mut rng).unwrap();

        // A public permutation of the plaintext coefficients, identical at
        // every party.
        let n = par.degree();
        let permutation: Vec<usize> = (0..n).map(|i| (5 * i) % n).collect();
        let permute = |w: &mut [u64]| {
            let orig = w.to_vec();
            for (i, wi) in w.iter_mut().enumerate() {
                *wi = orig[permutation[i]];
            }
        };

        let crp = CommonRandomPoly::new_leveled(&par, 0, &mut crs).unwrap();
        let agg = RefreshShare::try_from_shares(setup.sk_shares.iter().map(|sk| {
            RefreshShare::new_transformed(
                sk,
                &ct,
                &crp,
                setup.sk_shares.len(),
                SMUDGING_VARIANCE,
                permute,
                &mut rng,
            )
        }))
        .unwrap();
        let ct_perm = agg.transform(&ct, permute, &crp).unwrap();

        let expected: Vec<u64> = (0..n).map(|i| v[permutation[i]]).collect();
        let pt_perm = setup.sk_group.try_decrypt(&ct_perm).unwrap();
        assert_eq!(
            Vec::<u64>::try_decode(&pt_perm, Encoding::poly()).unwrap(),
            expected
        );
    }

    #[test]
    fn refresh_requires_a_noise_budget() {
        let mut rng = thread_rng();

        // Two 62-bit moduli cannot hide a 128-bit mask bound.
        let par = BfvParameters::default_arc(2, 16);
        assert_eq!(
            minimum_level_for_refresh(&par, 3, 128),
            Err(Error::PrecisionExhausted)
        );

        // Four moduli support a refresh down to level 1, but not level 2.
        let par = BfvParameters::default_arc(4, 16);
        let (deepest, _) = minimum_level_for_refresh(&par, 3, 128).unwrap();
        assert_eq!(deepest, 1);

        let setup = setup(&par, 3);
        let mut crs = CommonRandomString::new([44u8; 32]);
        let crp = CommonRandomPoly::new_leveled(&par, 0, &mut crs).unwrap();

        let v = par.plaintext.random_vec(par.degree(), &mut rng);
        let pt = Plaintext::try_encode(&v, Encoding::poly(), &par).unwrap();
        let mut ct = setup.public_key.try_encrypt(&pt, &mut rng).unwrap();
        ct.mod_switch_to_next_level().unwrap();
        ct.mod_switch_to_next_level().unwrap();
        assert_eq!(ct.level(), 2);

        assert_eq!(
            RefreshShare::new(&setup.sk_shares[0], &ct, &crp, 3, SMUDGING_VARIANCE, &mut rng)
                .err(),
            Some(Error::PrecisionExhausted)
        );
    }

    #[test]
    fn share_transport_matches_in_memory_aggregation() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(4, 16);
        let setup = setup(&par, 3);
        let mut crs = CommonRandomString::new([45u8; 32]);
        let crp = CommonRandomPoly::new_leveled(&par, 0, &mut crs).unwrap();

        let v = par.plaintext.random_vec(par.degree(), &mut rng);
        let pt = Plaintext::try_encode(&v, Encoding::poly(), &par).unwrap();
        let mut ct = setup.public_key.try_encrypt(&pt, &mut rng).unwrap();
        ct.mod_switch_to_next_level().unwrap();

        let shares: Vec<RefreshShare> = setup
            .sk_shares
            .iter()
            .map(|sk| RefreshShare::new(sk, &ct, &crp, 3, SMUDGING_VARIANCE, &mut rng).unwrap())
            .collect();

        // A share survives transport byte-exactly, its halves intact.
        let transported: Vec<RefreshShare> = shares
            .iter()
            .map(|sh| {
                let bytes = sh.to_bytes();
                let sh2 = RefreshShare::from_bytes(&bytes, &par).unwrap();
                assert_eq!(*sh, sh2);
                assert_eq!(bytes, sh2.to_bytes());
                sh2
            })
            .collect();

        // Aggregating transported shares gives a byte-identical aggregate,
        // and the refreshed ciphertext still decrypts correctly.
        let agg1 = RefreshShare::from_shares(shares).unwrap();
        let agg2 = RefreshShare::from_shares(transported).unwrap();
        assert_eq!(agg1.to_bytes(), agg2.to_bytes());

        let ct_fresh = agg2.finalize(&ct, &crp).unwrap();
        assert_eq!(ct_fresh.level(), 0);
        let pt2 = setup.sk_group.try_decrypt(&ct_fresh).unwrap();
        assert_eq!(pt2.value.to_vec(), v);
    }
}
