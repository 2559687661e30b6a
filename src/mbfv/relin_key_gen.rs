//! The two-round relinearization key generation protocol.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::bfv::{
    read_poly, read_u8, write_poly, BfvParameters, KeySwitchingKey, RelinearizationKey, SecretKey,
};
use crate::errors::Result;
use crate::Error;
use fhe_math::rns::RnsContext;
use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use fhe_traits::{DeserializeParametrized, FheParametrized, Serialize};
use itertools::izip;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use super::round::{R1Aggregated, Round, R1, R2};
use super::{tags, Aggregate, CommonRandomPoly};

/// A party's share in the relinearization key generation protocol.
/// Use the [`RelinKeyGenerator`] to create these shares.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RelinKeyShare<R: Round = R1> {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) h0: Box<[Poly]>,
    pub(crate) h1: Box<[Poly]>,
    _phantom_data: PhantomData<R>,
}

/// A builder for creating relinearization key generation shares per party.
///
/// Each party uses the `RelinKeyGenerator` to generate their shares and
/// participate in the "Protocol 2: RelinKeyGen" protocol detailed in
/// [Multiparty BFV](https://eprint.iacr.org/2020/304.pdf) (p6). The
/// generator holds the party's ephemeral secret `u_i`, which ties the two
/// rounds together. Round-1 shares are aggregated and the aggregate is
/// [frozen](RelinKeyShare::freeze); every party must observe the same
/// frozen aggregate before generating its round-2 share, and the same
/// aggregate finalizes the key.
pub struct RelinKeyGenerator<'a, 'b> {
    sk_share: &'a SecretKey,
    crp: &'b [CommonRandomPoly],
    u: Zeroizing<Poly>,
}

impl<'a, 'b> RelinKeyGenerator<'a, 'b> {
    /// Create a new relin key generator for a given party.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: common random polynomial vector
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &'a SecretKey,
        crp: &'b [CommonRandomPoly],
        rng: &mut R,
    ) -> Result<Self> {
        let par = sk_share.par.clone();
        let ctx = par.ctx_at_level(0)?;
        if ctx.moduli().len() == 1 {
            Err(Error::DefaultError(
                "These parameters do not support key switching".to_string(),
            ))
        } else if crp.len() != ctx.moduli().len() {
            Err(Error::ParameterMismatch(
                "the CRP vector must have one polynomial per ciphertext modulus".to_string(),
            ))
        } else {
            let u = Zeroizing::new(Poly::small(ctx, Representation::Ntt, par.variance, rng)?);
            Ok(Self { sk_share, crp, u })
        }
    }

    /// Generate this party's share for round 1.
    pub fn round_1<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<RelinKeyShare<R1>> {
        <RelinKeyShare<R1>>::new(self.sk_share, self.crp, &self.u, rng)
    }

    /// Generate this party's share for round 2, given the frozen round-1
    /// aggregate.
    pub fn round_2<R: RngCore + CryptoRng>(
        &self,
        r1: &RelinKeyShare<R1Aggregated>,
        rng: &mut R,
    ) -> Result<RelinKeyShare<R2>> {
        <RelinKeyShare<R2>>::new(self.sk_share, &self.u, r1, rng)
    }
}

impl RelinKeyShare<R1> {
    fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        crp: &[CommonRandomPoly],
        u: &Zeroizing<Poly>,
        rng: &mut R,
    ) -> Result<Self> {
        let par = sk_share.par.clone();
        let h0 = Self::generate_h0(sk_share, crp, u, rng)?;
        let h1 = Self::generate_h1(sk_share, crp, rng)?;
        Ok(Self {
            par,
            h0,
            h1,
            _phantom_data: PhantomData,
        })
    }

    /// h0_i[j] = -a_j * u_i + g_j * s_i + e
    fn generate_h0<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        crp: &[CommonRandomPoly],
        u: &Zeroizing<Poly>,
        rng: &mut R,
    ) -> Result<Box<[Poly]>> {
        let par = sk_share.par.clone();
        let ctx = par.ctx_at_level(0)?;

        let s = Zeroizing::new(Poly::try_convert_from(
            sk_share.coeffs.as_ref(),
            ctx,
            false,
            Representation::PowerBasis,
        )?);
        let rns = RnsContext::new(&par.moduli[..crp.len()])?;
        let h0 = crp
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let g = rns.get_garner(i).unwrap();
                let mut g_s = Zeroizing::new(g * s.as_ref());
                g_s.change_representation(Representation::Ntt);

                let e = Zeroizing::new(Poly::small(ctx, Representation::Ntt, par.variance, rng)?);

                let mut h = -a.poly.clone();
                h.disallow_variable_time_computations();
                h *= u.as_ref();
                h += g_s.as_ref();
                h += e.as_ref();
                Ok(h)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(h0.into_boxed_slice())
    }

    /// h1_i[j] = a_j * s_i + e
    fn generate_h1<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        crp: &[CommonRandomPoly],
        rng: &mut R,
    ) -> Result<Box<[Poly]>> {
        let par = sk_share.par.clone();
        let ctx = par.ctx_at_level(0)?;
        let s = sk_share.to_poly(ctx)?;

        let h1 = crp
            .iter()
            .map(|a| {
                let mut h = a.poly.clone();
                h.disallow_variable_time_computations();
                let e = Zeroizing::new(Poly::small(ctx, Representation::Ntt, par.variance, rng)?);
                h *= s.as_ref();
                h += e.as_ref();
                Ok(h)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(h1.into_boxed_slice())
    }

    /// Freeze the aggregate of all parties' round-1 shares.
    ///
    /// The frozen aggregate is broadcast back to the parties; each party
    /// must observe the same frozen value before generating its round-2
    /// share.
    pub fn freeze(self) -> RelinKeyShare<R1Aggregated> {
        RelinKeyShare {
            par: self.par,
            h0: self.h0,
            h1: self.h1,
            _phantom_data: PhantomData,
        }
    }
}

impl RelinKeyShare<R2> {
    fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        u: &Zeroizing<Poly>,
        r1: &RelinKeyShare<R1Aggregated>,
        rng: &mut R,
    ) -> Result<Self> {
        let par = sk_share.par.clone();
        if par != r1.par {
            return Err(Error::ParameterMismatch(
                "the round-1 aggregate uses different BFV parameters".to_string(),
            ));
        }
        let h0 = Self::generate_h0(sk_share, &r1.h0, rng)?;
        let h1 = Self::generate_h1(sk_share, u, &r1.h1, rng)?;
        Ok(Self {
            par,
            h0,
            h1,
            _phantom_data: PhantomData,
        })
    }

    /// h0'_i[j] = s_i * H0[j] + e
    fn generate_h0<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        r1_h0: &[Poly],
        rng: &mut R,
    ) -> Result<Box<[Poly]>> {
        let par = sk_share.par.clone();
        let ctx = par.ctx_at_level(0)?;
        let s = sk_share.to_poly(ctx)?;

        let h0 = r1_h0
            .iter()
            .map(|h| {
                let e = Zeroizing::new(Poly::small(ctx, Representation::Ntt, par.variance, rng)?);

                let mut h_prime = h.clone();
                h_prime.disallow_variable_time_computations();
                h_prime *= s.as_ref();
                h_prime += e.as_ref();
                Ok(h_prime)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(h0.into_boxed_slice())
    }

    /// h1'_i[j] = (u_i - s_i) * H1[j] + e
    fn generate_h1<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        u: &Zeroizing<Poly>,
        r1_h1: &[Poly],
        rng: &mut R,
    ) -> Result<Box<[Poly]>> {
        let par = sk_share.par.clone();
        let ctx = par.ctx_at_level(0)?;
        let s = sk_share.to_poly(ctx)?;

        let u_s = Zeroizing::new(u.as_ref() - s.as_ref());

        let h1 = r1_h1
            .iter()
            .map(|h| {
                let mut h_prime = h.clone();
                h_prime.disallow_variable_time_computations();
                let e = Zeroizing::new(Poly::small(ctx, Representation::Ntt, par.variance, rng)?);
                h_prime *= u_s.as_ref();
                h_prime += e.as_ref();
                Ok(h_prime)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(h1.into_boxed_slice())
    }

    /// Finalize the relinearization key from the aggregated round-2 shares
    /// and the frozen round-1 aggregate they were built from.
    pub fn into_relin_key(&self, r1: &RelinKeyShare<R1Aggregated>) -> Result<RelinearizationKey> {
        if self.par != r1.par {
            return Err(Error::ParameterMismatch(
                "the round-1 aggregate uses different BFV parameters".to_string(),
            ));
        }
        let par = self.par.clone();
        let ctx = par.ctx_at_level(0)?.clone();

        let mut c0 = self.h0.to_vec();
        izip!(c0.iter_mut(), self.h1.iter()).for_each(|(c0, h1)| {
            *c0 += h1;
            c0.change_representation(Representation::NttShoup);
        });

        let mut c1 = r1.h1.to_vec();
        c1.iter_mut().for_each(|c1| {
            c1.change_representation(Representation::NttShoup);
        });

        let ksk = KeySwitchingKey {
            par,
            seed: None,
            c0: c0.into_boxed_slice(),
            c1: c1.into_boxed_slice(),
            ciphertext_level: 0,
            ctx_ciphertext: ctx.clone(),
            ksk_level: 0,
            ctx_ksk: ctx,
        };
        Ok(RelinearizationKey { ksk })
    }
}

fn merge_digits<R: Round>(share: &mut RelinKeyShare<R>, other: &RelinKeyShare<R>) -> Result<()> {
    if share.par != other.par {
        return Err(Error::ParameterMismatch(
            "shares from different protocol instances".to_string(),
        ));
    }
    izip!(
        share.h0.iter_mut(),
        share.h1.iter_mut(),
        other.h0.iter(),
        other.h1.iter()
    )
    .for_each(|(h0, h1, other_h0, other_h1)| {
        *h0 += other_h0;
        *h1 += other_h1;
    });
    Ok(())
}

impl Aggregate for RelinKeyShare<R1> {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        merge_digits(self, other)
    }
}

impl Aggregate for RelinKeyShare<R2> {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        merge_digits(self, other)
    }
}

impl<R: Round> FheParametrized for RelinKeyShare<R> {
    type Parameters = BfvParameters;
}

fn share_to_bytes(tag: u8, h0: &[Poly], h1: &[Poly]) -> Vec<u8> {
    let mut out = vec![tag, 0, h0.len() as u8];
    for h in h0.iter().chain(h1.iter()) {
        write_poly(&mut out, h);
    }
    out
}

fn share_from_bytes(
    tag: u8,
    bytes: &[u8],
    par: &Arc<BfvParameters>,
) -> Result<(Box<[Poly]>, Box<[Poly]>)> {
    let mut bytes = bytes;
    if read_u8(&mut bytes)? != tag || read_u8(&mut bytes)? != 0 {
        return Err(Error::SerializationError);
    }
    let count = read_u8(&mut bytes)? as usize;
    if count != par.moduli.len() {
        return Err(Error::SerializationError);
    }
    let ctx = par.ctx_at_level(0)?;
    let mut h0 = Vec::with_capacity(count);
    let mut h1 = Vec::with_capacity(count);
    for _ in 0..count {
        h0.push(read_poly(&mut bytes, ctx)?);
    }
    for _ in 0..count {
        h1.push(read_poly(&mut bytes, ctx)?);
    }
    if !bytes.is_empty() {
        return Err(Error::SerializationError);
    }
    Ok((h0.into_boxed_slice(), h1.into_boxed_slice()))
}

impl Serialize for RelinKeyShare<R1> {
    fn to_bytes(&self) -> Vec<u8> {
        share_to_bytes(tags::RKG_R1, &self.h0, &self.h1)
    }
}

impl DeserializeParametrized for RelinKeyShare<R1> {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let (h0, h1) = share_from_bytes(tags::RKG_R1, bytes, par)?;
        Ok(Self {
            par: par.clone(),
            h0,
            h1,
            _phantom_data: PhantomData,
        })
    }
}

impl Serialize for RelinKeyShare<R1Aggregated> {
    fn to_bytes(&self) -> Vec<u8> {
        share_to_bytes(tags::RKG_R1, &self.h0, &self.h1)
    }
}

impl DeserializeParametrized for RelinKeyShare<R1Aggregated> {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let (h0, h1) = share_from_bytes(tags::RKG_R1, bytes, par)?;
        Ok(Self {
            par: par.clone(),
            h0,
            h1,
            _phantom_data: PhantomData,
        })
    }
}

impl Serialize for RelinKeyShare<R2> {
    fn to_bytes(&self) -> Vec<u8> {
        share_to_bytes(tags::RKG_R2, &self.h0, &self.h1)
    }
}

impl DeserializeParametrized for RelinKeyShare<R2> {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let (h0, h1) = share_from_bytes(tags::RKG_R2, bytes, par)?;
        Ok(Self {
            par: par.clone(),
            h0,
            h1,
            _phantom_data: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use fhe_traits::{DeserializeParametrized, FheDecoder, FheEncoder, FheEncrypter, Serialize};
    use rand::thread_rng;

    use crate::{
        bfv::{BfvParameters, Encoding, Multiplicator, Plaintext, SecretKey},
        mbfv::{
            round::{R1Aggregated, R1, R2},
            Aggregate, CommonRandomPoly, CommonRandomString, DecryptionShare, PublicKeyShare,
            RelinKeyGenerator, RelinKeyShare,
        },
    };

    const SMUDGING_VARIANCE: usize = 16;

    #[test]
    fn relinearization_works() {
        let mut rng = thread_rng();
        for par in [
            BfvParameters::default_arc(3, 16),
            BfvParameters::default_arc(6, 16),
        ] {
            for n_parties in [2, 5] {
                let mut crs = CommonRandomString::new([13u8; 32]);
                let crp = CommonRandomPoly::new_vec(&par, &mut crs).unwrap();
                let crp_pk = CommonRandomPoly::new(&par, &mut crs).unwrap();

                let party_sks: Vec<SecretKey> = (0..n_parties)
                    .map(|_| SecretKey::random(&par, &mut rng))
                    .collect();
                let party_rlks: Vec<RelinKeyGenerator> = party_sks
                    .iter()
                    .map(|sk| RelinKeyGenerator::new(sk, &crp, &mut rng).unwrap())
                    .collect();

                let public_key = PublicKeyShare::try_from_shares(
                    party_sks
                        .iter()
                        .map(|sk| PublicKeyShare::new(sk, crp_pk.clone(), &mut rng)),
                )
                .unwrap()
                .into_public_key()
                .unwrap();

                // Round 1: aggregate and freeze.
                let rlk_r1 = RelinKeyShare::<R1>::try_from_shares(
                    party_rlks.iter().map(|g| g.round_1(&mut rng)),
                )
                .unwrap()
                .freeze();

                // Round 2: aggregate and finalize against the frozen
                // round-1 aggregate.
                let rlk = RelinKeyShare::<R2>::try_from_shares(
                    party_rlks.iter().map(|g| g.round_2(&rlk_r1, &mut rng)),
                )
                .unwrap()
                .into_relin_key(&rlk_r1)
                .unwrap();

                // Create a couple random encrypted polynomials
                let v1 = par.plaintext.random_vec(par.degree(), &mut rng);
                let v2 = par.plaintext.random_vec(par.degree(), &mut rng);
                let pt1 = Plaintext::try_encode(&v1, Encoding::simd(), &par).unwrap();
                let pt2 = Plaintext::try_encode(&v2, Encoding::simd(), &par).unwrap();
                let ct1 = public_key.try_encrypt(&pt1, &mut rng).unwrap();
                let ct2 = public_key.try_encrypt(&pt2, &mut rng).unwrap();

                // Multiply and relinearize them
                let mut multiplicator = Multiplicator::default(&rlk).unwrap();
                multiplicator.enable_mod_switching().unwrap();
                let ct = multiplicator.multiply(&ct1, &ct2).unwrap();
                assert_eq!(ct.len(), 2);

                // Parties perform a collective decryption
                let pt = DecryptionShare::try_from_shares(
                    party_sks
                        .iter()
                        .map(|s| DecryptionShare::new(s, &ct, SMUDGING_VARIANCE, &mut rng)),
                )
                .unwrap()
                .decrypt(&ct)
                .unwrap();

                let mut expected = v1.clone();
                par.plaintext.mul_vec(&mut expected, &v2);
                assert_eq!(
                    Vec::<u64>::try_decode(&pt, Encoding::simd_at_level(pt.level())).unwrap(),
                    expected
                );
            }
        }
    }

    #[test]
    fn shares_survive_transport() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(3, 16);
        let mut crs = CommonRandomString::new([14u8; 32]);
        let crp = CommonRandomPoly::new_vec(&par, &mut crs).unwrap();

        let party_sks: Vec<SecretKey> = (0..3).map(|_| SecretKey::random(&par, &mut rng)).collect();
        let party_rlks: Vec<RelinKeyGenerator> = party_sks
            .iter()
            .map(|sk| RelinKeyGenerator::new(sk, &crp, &mut rng).unwrap())
            .collect();

        // Round-1 shares cross the wire before aggregation.
        let r1_shares: Vec<RelinKeyShare<R1>> = party_rlks
            .iter()
            .map(|g| {
                let share = g.round_1(&mut rng).unwrap();
                let bytes = share.to_bytes();
                let share2 = RelinKeyShare::<R1>::from_bytes(&bytes, &par).unwrap();
                assert_eq!(bytes, share2.to_bytes());
                share2
            })
            .collect();
        let rlk_r1 = RelinKeyShare::<R1>::from_shares(r1_shares).unwrap().freeze();

        // The frozen aggregate is broadcast; parties receive it over the
        // wire too.
        let rlk_r1_received =
            RelinKeyShare::<R1Aggregated>::from_bytes(&rlk_r1.to_bytes(), &par).unwrap();

        // Round-2 shares cross the wire as well; the finalization then
        // needs the frozen round-1 aggregate explicitly.
        let r2_shares: Vec<RelinKeyShare<R2>> = party_rlks
            .iter()
            .map(|g| {
                let share = g.round_2(&rlk_r1_received, &mut rng).unwrap();
                RelinKeyShare::<R2>::from_bytes(&share.to_bytes(), &par).unwrap()
            })
            .collect();
        let rlk = RelinKeyShare::<R2>::from_shares(r2_shares)
            .unwrap()
            .into_relin_key(&rlk_r1)
            .unwrap();

        // The key still works: multiply-relinearize-decrypt.
        let mut multiplicator = Multiplicator::default(&rlk).unwrap();
        multiplicator.enable_mod_switching().unwrap();

        let crp_pk = CommonRandomPoly::new(&par, &mut crs).unwrap();
        let public_key = PublicKeyShare::try_from_shares(
            party_sks
                .iter()
                .map(|sk| PublicKeyShare::new(sk, crp_pk.clone(), &mut rng)),
        )
        .unwrap()
        .into_public_key()
        .unwrap();
        let v = par.plaintext.random_vec(par.degree(), &mut rng);
        let pt = Plaintext::try_encode(&v, Encoding::simd(), &par).unwrap();
        let ct = public_key.try_encrypt(&pt, &mut rng).unwrap();
        let ct = multiplicator.multiply(&ct, &ct).unwrap();

        let pt = DecryptionShare::try_from_shares(
            party_sks
                .iter()
                .map(|s| DecryptionShare::new(s, &ct, SMUDGING_VARIANCE, &mut rng)),
        )
        .unwrap()
        .decrypt(&ct)
        .unwrap();
        let mut expected = v.clone();
        par.plaintext.mul_vec(&mut expected, &v);
        assert_eq!(
            Vec::<u64>::try_decode(&pt, Encoding::simd_at_level(pt.level())).unwrap(),
            expected
        );
    }
}
