//! The collective key-switching protocol, and the collective decryption
//! protocol derived from it.

use std::sync::Arc;

use fhe_math::rq::{traits::TryConvertFrom, Poly, Representation};
use fhe_traits::{DeserializeParametrized, FheParametrized, Serialize};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::bfv::{
    read_poly, read_u8, scale_down, write_poly, BfvParameters, Ciphertext, Plaintext, SecretKey,
};
use crate::{Error, Result};

use super::{tags, Aggregate};

/// The RLWE-level core shared by every share that key switches a
/// ciphertext towards the zero key: `s_i * c_1 + e_i`. Collective
/// decryption, the encryption-to-shares conversion and the decoding half
/// of the refresh protocols all start from this polynomial, in both
/// plaintext flavors.
pub(crate) fn decryption_share_poly<R: RngCore + CryptoRng>(
    sk_share: &SecretKey,
    ct: &Ciphertext,
    smudging_variance: usize,
    rng: &mut R,
) -> Result<Poly> {
    let ctx = ct[0].ctx();
    let s = sk_share.to_poly(ctx)?;
    let e = Zeroizing::new(Poly::small(
        ctx,
        Representation::Ntt,
        smudging_variance,
        rng,
    )?);

    let mut h = ct[1].clone();
    h.disallow_variable_time_computations();
    h *= s.as_ref();
    h += e.as_ref();
    Ok(h)
}

/// A party's share in the collective key-switching protocol.
///
/// Each party uses the `SecretKeySwitchShare` to generate their share of
/// the re-keyed ciphertext and participate in the "Protocol 3: KeySwitch"
/// protocol detailed in [Multiparty BFV](https://eprint.iacr.org/2020/304.pdf) (p7).
/// The aggregated share is applied to the input ciphertext with
/// [`SecretKeySwitchShare::key_switch`].
///
/// Note: this protocol assumes the output key is split into the same number
/// of parties as the input key.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SecretKeySwitchShare {
    pub(crate) par: Arc<BfvParameters>,
    pub(crate) level: usize,
    pub(crate) h_share: Poly,
}

impl SecretKeySwitchShare {
    /// Participate in a new KeySwitch protocol.
    ///
    /// 1. *Private input*: BFV input secret key share
    /// 2. *Private input*: BFV output secret key share
    /// 3. *Public input*: the ciphertext to key switch
    /// 4. *Public input*: the smudging variance, flooding the share so that
    ///    it does not leak the party's secrets (see [`Poly::small`] for the
    ///    admissible range)
    pub fn new<R: RngCore + CryptoRng>(
        sk_input_share: &SecretKey,
        sk_output_share: &SecretKey,
        ct: &Ciphertext,
        smudging_variance: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if sk_input_share.par != sk_output_share.par || sk_output_share.par != ct.par {
            return Err(Error::ParameterMismatch(
                "the keys and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        // This protocol supports ciphertexts of length 2 only.
        if ct.len() != 2 {
            return Err(Error::TooManyValues(ct.len(), 2));
        }

        let par = sk_input_share.par.clone();
        let ctx = ct[0].ctx();
        let s_in = sk_input_share.to_poly(ctx)?;
        let s_out = sk_output_share.to_poly(ctx)?;

        let e = Zeroizing::new(Poly::small(
            ctx,
            Representation::Ntt,
            smudging_variance,
            rng,
        )?);

        // h_i = (s_in,i - s_out,i) * c1 + e_i
        let mut h_share = s_in.as_ref() - s_out.as_ref();
        h_share.disallow_variable_time_computations();
        h_share *= &ct[1];
        h_share += e.as_ref();

        Ok(Self {
            par,
            level: ct.level(),
            h_share,
        })
    }

    /// Apply the aggregated share to the input ciphertext, yielding a
    /// ciphertext decryptable under the output collective key.
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

        let c0 = &ct[0] + &self.h_share;
        let c1 = ct[1].clone();
        Ciphertext::new(vec![c0, c1], &self.par)
    }
}

impl Aggregate for SecretKeySwitchShare {
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

impl FheParametrized for SecretKeySwitchShare {
    type Parameters = BfvParameters;
}

impl Serialize for SecretKeySwitchShare {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![tags::CKS, self.level as u8];
        write_poly(&mut out, &self.h_share);
        out
    }
}

impl DeserializeParametrized for SecretKeySwitchShare {
    type Error = Error;

    fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let mut bytes = bytes;
        if read_u8(&mut bytes)? != tags::CKS {
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

/// A party's share in the collective decryption protocol.
///
/// This is the special case of the key-switching protocol with an output
/// key of zero: the aggregated share applied to the ciphertext leaves the
/// plaintext in the clear. Use [`DecryptionShare::decrypt`] on the
/// aggregate.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DecryptionShare {
    pub(crate) sks_share: SecretKeySwitchShare,
}

impl DecryptionShare {
    /// Participate in a new collective decryption protocol.
    ///
    /// 1. *Private input*: BFV secret key share
    /// 2. *Public input*: the ciphertext to decrypt
    /// 3. *Public input*: the smudging variance
    pub fn new<R: RngCore + CryptoRng>(
        sk_share: &SecretKey,
        ct: &Ciphertext,
        smudging_variance: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if sk_share.par != ct.par {
            return Err(Error::ParameterMismatch(
                "the key and the ciphertext use different BFV parameters".to_string(),
            ));
        }
        if ct.len() != 2 {
            return Err(Error::TooManyValues(ct.len(), 2));
        }

        let h_share = decryption_share_poly(sk_share, ct, smudging_variance, rng)?;
        Ok(DecryptionShare {
            sks_share: SecretKeySwitchShare {
                par: sk_share.par.clone(),
                level: ct.level(),
                h_share,
            },
        })
    }

    /// Recover the plaintext from the aggregated share and the ciphertext.
    pub fn decrypt(&self, ct: &Ciphertext) -> Result<Plaintext> {
        let switched = self.sks_share.key_switch(ct)?;

        // The c1 * s part has already been folded into c0 by the key switch;
        // all that is left is to scale down.
        let par = &self.sks_share.par;
        let w = scale_down(switched[0].clone(), switched.level(), par)?;

        let mut poly = Poly::try_convert_from(
            &w as &[u64],
            switched[0].ctx(),
            false,
            Representation::PowerBasis,
        )?;
        poly.change_representation(Representation::Ntt);

        Ok(Plaintext {
            par: par.clone(),
            value: w.into_boxed_slice(),
            encoding: None,
            poly_ntt: poly,
            level: switched.level(),
        })
    }
}

impl Aggregate for DecryptionShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        self.sks_share.aggregate(&other.sks_share)
    }
}

#[cfg(test)]
mod tests {
    use fhe_traits::{DeserializeParametrized, FheDecoder, FheEncoder, FheEncrypter, Serialize};
    use rand::thread_rng;

    use crate::{
        bfv::{BfvParameters, Encoding, Plaintext, PublicKey, SecretKey},
        mbfv::{
            Aggregate, CommonRandomPoly, CommonRandomString, DecryptionShare, PublicKeyShare,
            SecretKeySwitchShare,
        },
    };

    const SMUDGING_VARIANCE: usize = 16;

    struct Party {
        sk_share: SecretKey,
        pk_share: PublicKeyShare,
    }

    fn gen_parties(
        par: &std::sync::Arc<BfvParameters>,
        crp: &CommonRandomPoly,
        n: usize,
    ) -> Vec<Party> {
        let mut rng = thread_rng();
        (0..n)
            .map(|_| {
                let sk_share = SecretKey::random(par, &mut rng);
                let pk_share = PublicKeyShare::new(&sk_share, crp.clone(), &mut rng).unwrap();
                Party { sk_share, pk_share }
            })
            .collect()
    }

    fn gen_public_key(parties: &[Party]) -> PublicKey {
        PublicKeyShare::from_shares(parties.iter().map(|p| p.pk_share.clone()))
            .unwrap()
            .into_public_key()
            .unwrap()
    }

    #[test]
    fn encrypt_decrypt() {
        let mut rng = thread_rng();
        for par in [
            BfvParameters::default_arc(1, 16),
            BfvParameters::default_arc(6, 16),
        ] {
            for n_parties in [2, 3, 5] {
                let mut crs = CommonRandomString::new([7u8; 32]);
                let crp = CommonRandomPoly::new(&par, &mut crs).unwrap();
                let parties = gen_parties(&par, &crp, n_parties);
                let public_key = gen_public_key(&parties);

                // Use it to encrypt a random plaintext.
                let pt1 = Plaintext::try_encode(
                    &par.plaintext.random_vec(par.degree(), &mut rng),
                    Encoding::poly(),
                    &par,
                )
                .unwrap();
                let ct = public_key.try_encrypt(&pt1, &mut rng).unwrap();

                // Parties perform a collective decryption.
                let pt2 = DecryptionShare::try_from_shares(parties.iter().map(|p| {
                    DecryptionShare::new(&p.sk_share, &ct, SMUDGING_VARIANCE, &mut rng)
                }))
                .unwrap()
                .decrypt(&ct)
                .unwrap();

                assert_eq!(pt1.value, pt2.value);
            }
        }
    }

    #[test]
    fn encrypt_keyswitch_decrypt() {
        let mut rng = thread_rng();
        for par in [
            BfvParameters::default_arc(1, 16),
            BfvParameters::default_arc(6, 16),
        ] {
            let mut crs = CommonRandomString::new([8u8; 32]);
            let crp = CommonRandomPoly::new(&par, &mut crs).unwrap();

            // Parties collectively generate a public key.
            let parties = gen_parties(&par, &crp, 3);
            let public_key = gen_public_key(&parties);

            let pt1 = Plaintext::try_encode(
                &par.plaintext.random_vec(par.degree(), &mut rng),
                Encoding::poly(),
                &par,
            )
            .unwrap();
            let ct1 = public_key.try_encrypt(&pt1, &mut rng).unwrap();

            // Key switch ct1 to a different set of parties.
            let out_parties = gen_parties(&par, &crp, 3);
            let sks = SecretKeySwitchShare::try_from_shares(
                parties.iter().zip(out_parties.iter()).map(|(ip, op)| {
                    SecretKeySwitchShare::new(
                        &ip.sk_share,
                        &op.sk_share,
                        &ct1,
                        SMUDGING_VARIANCE,
                        &mut rng,
                    )
                }),
            )
            .unwrap();
            let ct2 = sks.key_switch(&ct1).unwrap();

            // The second set of parties then does a collective decryption.
            let pt2 = DecryptionShare::try_from_shares(
                out_parties
                    .iter()
                    .map(|p| DecryptionShare::new(&p.sk_share, &ct2, SMUDGING_VARIANCE, &mut rng)),
            )
            .unwrap()
            .decrypt(&ct2)
            .unwrap();

            assert_eq!(pt1.value, pt2.value);
        }
    }

    #[test]
    fn collective_keys_enable_homomorphic_addition() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(4, 16);
        let mut crs = CommonRandomString::new([9u8; 32]);
        let crp = CommonRandomPoly::new(&par, &mut crs).unwrap();
        let parties = gen_parties(&par, &crp, 5);
        let public_key = gen_public_key(&parties);

        let a = par.plaintext.random_vec(par.degree(), &mut rng);
        let b = par.plaintext.random_vec(par.degree(), &mut rng);
        let mut expected = a.clone();
        par.plaintext.add_vec(&mut expected, &b);

        let pt_a = Plaintext::try_encode(&a, Encoding::poly(), &par).unwrap();
        let pt_b = Plaintext::try_encode(&b, Encoding::poly(), &par).unwrap();
        let ct_a = public_key.try_encrypt(&pt_a, &mut rng).unwrap();
        let ct_b = public_key.try_encrypt(&pt_b, &mut rng).unwrap();
        let ct = &ct_a + &ct_b;

        let pt = DecryptionShare::try_from_shares(
            parties
                .iter()
                .map(|p| DecryptionShare::new(&p.sk_share, &ct, SMUDGING_VARIANCE, &mut rng)),
        )
        .unwrap()
        .decrypt(&ct)
        .unwrap();

        assert_eq!(
            Vec::<u64>::try_decode(&pt, Encoding::poly()).unwrap(),
            expected
        );
    }

    #[test]
    fn share_transport_roundtrip() {
        let mut rng = thread_rng();
        let par = BfvParameters::default_arc(4, 16);
        let mut crs = CommonRandomString::new([10u8; 32]);
        let crp = CommonRandomPoly::new(&par, &mut crs).unwrap();
        let parties = gen_parties(&par, &crp, 3);
        let public_key = gen_public_key(&parties);

        let pt = Plaintext::try_encode(
            &par.plaintext.random_vec(par.degree(), &mut rng),
            Encoding::poly(),
            &par,
        )
        .unwrap();
        let ct = public_key.try_encrypt(&pt, &mut rng).unwrap();

        let shares: Vec<SecretKeySwitchShare> = parties
            .iter()
            .map(|p| {
                DecryptionShare::new(&p.sk_share, &ct, SMUDGING_VARIANCE, &mut rng)
                    .unwrap()
                    .sks_share
            })
            .collect();

        // Shares survive a wire transport byte-exactly, and the aggregate of
        // deserialized shares matches the in-memory aggregate.
        let transported: Vec<SecretKeySwitchShare> = shares
            .iter()
            .map(|sh| {
                let bytes = sh.to_bytes();
                let sh2 = SecretKeySwitchShare::from_bytes(&bytes, &par).unwrap();
                assert_eq!(bytes, sh2.to_bytes());
                sh2
            })
            .collect();

        let agg1 = SecretKeySwitchShare::from_shares(shares).unwrap();
        let agg2 = SecretKeySwitchShare::from_shares(transported).unwrap();
        assert_eq!(agg1.to_bytes(), agg2.to_bytes());

        let pt2 = DecryptionShare { sks_share: agg2 }.decrypt(&ct).unwrap();
        assert_eq!(pt.value, pt2.value);
    }
}
