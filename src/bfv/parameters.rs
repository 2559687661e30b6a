//! Create parameters for the BFV encryption scheme

use crate::{Error, ParametersError, Result};
use fhe_math::{
    ntt::NttOperator,
    rns::{RnsContext, ScalingFactor},
    rq::{scaler::Scaler, traits::TryConvertFrom, Context, Poly, Representation},
    zq::{primes::generate_prime, Modulus},
};
use fhe_traits::FheParameters;
use itertools::Itertools;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::fmt::Debug;
use std::sync::Arc;

/// Parameters for the BFV encryption scheme.
#[derive(PartialEq, Eq)]
pub struct BfvParameters {
    /// Number of coefficients in a polynomial.
    polynomial_degree: usize,

    /// Modulus of the plaintext.
    plaintext_modulus: u64,

    /// Vector of coprime moduli q_i for the ciphertext.
    pub(crate) moduli: Box<[u64]>,

    /// Vector of the sizes of the coprime moduli q_i for the ciphertext.
    moduli_sizes: Box<[usize]>,

    /// Error variance
    pub(crate) variance: usize,

    /// Context for the underlying polynomials, one per level.
    pub(crate) ctx: Vec<Arc<Context>>,

    /// Ntt operator for the SIMD plaintext, if possible.
    pub(crate) op: Option<Arc<NttOperator>>,

    /// Scaling polynomial for the plaintext, one per level.
    pub(crate) delta: Box<[Poly]>,

    /// Q modulo the plaintext modulus, one per level.
    pub(crate) q_mod_t: Box<[u64]>,

    /// Down scalers for the plaintext, one per level.
    pub(crate) scalers: Box<[Scaler]>,

    /// Plaintext Modulus
    pub(crate) plaintext: Modulus,

    /// SEAL-style bit-reversed index map for the SIMD encoding.
    pub(crate) matrix_reps_index_map: Box<[usize]>,
}

impl Debug for BfvParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BfvParameters")
            .field("polynomial_degree", &self.polynomial_degree)
            .field("plaintext_modulus", &self.plaintext_modulus)
            .field("moduli", &self.moduli)
            .finish()
    }
}

impl FheParameters for BfvParameters {}

unsafe impl Send for BfvParameters {}

impl BfvParameters {
    /// Returns the underlying polynomial degree
    pub const fn degree(&self) -> usize {
        self.polynomial_degree
    }

    /// Returns a reference to the ciphertext moduli
    pub fn moduli(&self) -> &[u64] {
        &self.moduli
    }

    /// Returns a reference to the sizes of the ciphertext moduli
    pub fn moduli_sizes(&self) -> &[usize] {
        &self.moduli_sizes
    }

    /// Returns the plaintext modulus
    pub const fn plaintext(&self) -> u64 {
        self.plaintext_modulus
    }

    /// Returns the maximum level allowed by these parameters.
    ///
    /// Levels count down the modulus chain: level 0 uses the full chain,
    /// `max_level()` the shortest one.
    pub fn max_level(&self) -> usize {
        self.moduli.len() - 1
    }

    /// Returns the context corresponding to the level.
    pub fn ctx_at_level(&self, level: usize) -> Result<&Arc<Context>> {
        self.ctx
            .get(level)
            .ok_or_else(|| Error::DefaultError(format!("Invalid level: {level}")))
    }

    /// Returns the level of a given context.
    pub fn level_of_ctx(&self, ctx: &Arc<Context>) -> Result<usize> {
        self.ctx
            .iter()
            .position(|c| c == ctx)
            .ok_or_else(|| Error::DefaultError("Invalid context".to_string()))
    }

    /// The Galois element swapping the two rows of the SIMD plaintext.
    pub fn galois_element_for_row_swap(&self) -> usize {
        2 * self.polynomial_degree - 1
    }

    /// The Galois element rotating the columns of the SIMD plaintext by
    /// `step` to the left.
    pub fn galois_element_for_column_rotation(&self, step: usize) -> usize {
        let m = 2 * self.polynomial_degree;
        let mut g = 1usize;
        for _ in 0..step {
            g = (g * 3) % m;
        }
        g
    }

    #[cfg(test)]
    /// Returns default parameters for tests.
    pub fn default_arc(num_moduli: usize, degree: usize) -> Arc<Self> {
        if !degree.is_power_of_two() || degree < 8 {
            panic!("Invalid degree");
        }
        BfvParametersBuilder::new()
            .set_degree(degree)
            .set_plaintext_modulus(1153)
            .set_moduli_sizes(&vec![62usize; num_moduli])
            .build_arc()
            .unwrap()
    }
}

/// Builder for parameters for the Bfv encryption scheme.
#[derive(Debug)]
pub struct BfvParametersBuilder {
    degree: usize,
    plaintext: u64,
    variance: usize,
    ciphertext_moduli: Vec<u64>,
    ciphertext_moduli_sizes: Vec<usize>,
}

impl BfvParametersBuilder {
    /// Creates a new instance of the builder
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            degree: Default::default(),
            plaintext: Default::default(),
            variance: 10,
            ciphertext_moduli: Default::default(),
            ciphertext_moduli_sizes: Default::default(),
        }
    }

    /// Sets the polynomial degree. Returns an error if the degree is not
    /// a power of two larger or equal to 8.
    pub fn set_degree(&mut self, degree: usize) -> &mut Self {
        self.degree = degree;
        self
    }

    /// Sets the plaintext modulus. Returns an error if the plaintext is not
    /// between 2 and 2^62 - 1.
    pub fn set_plaintext_modulus(&mut self, plaintext: u64) -> &mut Self {
        self.plaintext = plaintext;
        self
    }

    /// Sets the sizes of the ciphertext moduli.
    /// Only one of `set_moduli_sizes` and `set_moduli` can be specified.
    pub fn set_moduli_sizes(&mut self, sizes: &[usize]) -> &mut Self {
        sizes.clone_into(&mut self.ciphertext_moduli_sizes);
        self
    }

    /// Sets the ciphertext moduli to use.
    /// Only one of `set_moduli_sizes` and `set_moduli` can be specified.
    pub fn set_moduli(&mut self, moduli: &[u64]) -> &mut Self {
        moduli.clone_into(&mut self.ciphertext_moduli);
        self
    }

    /// Sets the error variance. Returns an error if the variance is not
    /// between one and sixteen.
    pub fn set_variance(&mut self, variance: usize) -> &mut Self {
        self.variance = variance;
        self
    }

    /// Generate ciphertext moduli with the specified sizes
    fn generate_moduli(moduli_sizes: &[usize], degree: usize) -> Result<Vec<u64>> {
        let mut moduli = vec![];
        for size in moduli_sizes {
            if *size > 62 || *size < 10 {
                return Err(Error::ParametersError(ParametersError::InvalidModulusSize(
                    *size, 10, 62,
                )));
            }

            let mut upper_bound = 1 << size;
            loop {
                if let Some(prime) = generate_prime(*size, 2 * degree as u64, upper_bound) {
                    if !moduli.contains(&prime) {
                        moduli.push(prime);
                        break;
                    } else {
                        upper_bound = prime;
                    }
                } else {
                    return Err(Error::ParametersError(ParametersError::NotEnoughPrimes(
                        *size, degree,
                    )));
                }
            }
        }

        Ok(moduli)
    }

    /// Build a new `BfvParameters` inside an `Arc`.
    pub fn build_arc(&self) -> Result<Arc<BfvParameters>> {
        self.build().map(Arc::new)
    }

    /// Build a new `BfvParameters`.
    pub fn build(&self) -> Result<BfvParameters> {
        // Check that the degree is a power of 2 (and large enough).
        if self.degree < 8 || !self.degree.is_power_of_two() {
            return Err(Error::ParametersError(ParametersError::InvalidDegree(
                self.degree,
            )));
        }

        // This checks that the plaintext modulus is valid.
        let plaintext_modulus = Modulus::new(self.plaintext).map_err(|e| {
            Error::ParametersError(ParametersError::InvalidPlaintext(e.to_string()))
        })?;

        // Check that one of `ciphertext_moduli` and `ciphertext_moduli_sizes`
        // is specified.
        if !self.ciphertext_moduli.is_empty() && !self.ciphertext_moduli_sizes.is_empty() {
            return Err(Error::ParametersError(ParametersError::TooManySpecified(
                "Only one of `ciphertext_moduli` and `ciphertext_moduli_sizes` can be specified"
                    .to_string(),
            )));
        } else if self.ciphertext_moduli.is_empty() && self.ciphertext_moduli_sizes.is_empty() {
            return Err(Error::ParametersError(ParametersError::TooFewSpecified(
                "One of `ciphertext_moduli` and `ciphertext_moduli_sizes` must be specified"
                    .to_string(),
            )));
        }

        // Get or generate the moduli
        let mut moduli = self.ciphertext_moduli.clone();
        if !self.ciphertext_moduli_sizes.is_empty() {
            moduli = Self::generate_moduli(&self.ciphertext_moduli_sizes, self.degree)?
        }

        // Recomputes the moduli sizes
        let moduli_sizes = moduli
            .iter()
            .map(|m| 64 - m.leading_zeros() as usize)
            .collect_vec();

        let op = NttOperator::new(&plaintext_modulus, self.degree).map(Arc::new);

        let plaintext_ctx = Arc::new(Context::new(&moduli[..1], self.degree)?);

        let mut ctx = Vec::with_capacity(moduli.len());
        let mut delta_polys = Vec::with_capacity(moduli.len());
        let mut q_mod_t_values = Vec::with_capacity(moduli.len());
        let mut scalers = Vec::with_capacity(moduli.len());

        let mut delta_rests = vec![];
        for m in &moduli {
            let q = Modulus::new(*m)?;
            delta_rests.push(q.inv(q.neg(self.plaintext)).unwrap())
        }

        for i in 0..moduli.len() {
            let level_moduli = &moduli[..moduli.len() - i];
            let ctx_i = Arc::new(Context::new(level_moduli, self.degree)?);
            let rns = RnsContext::new(level_moduli)?;

            // The scaling polynomial is the constant (-t)^(-1) mod Q_i.
            let mut delta = Poly::try_convert_from(
                &[rns.lift((&delta_rests[..moduli.len() - i]).into())],
                &ctx_i,
                true,
                Representation::PowerBasis,
            )?;
            delta.change_representation(Representation::NttShoup);
            delta_polys.push(delta);

            q_mod_t_values.push((rns.modulus() % self.plaintext).to_u64().unwrap());

            scalers.push(Scaler::new(
                &ctx_i,
                &plaintext_ctx,
                ScalingFactor::new(&BigUint::from(self.plaintext), rns.modulus()),
            )?);

            ctx.push(ctx_i);
        }

        // We use the same code as SEAL
        // https://github.com/microsoft/SEAL/blob/82b07db635132e297282649e2ab5908999089ad2/native/src/seal/batchencoder.cpp
        let row_size = self.degree >> 1;
        let m = self.degree << 1;
        let gen = 3;
        let mut pos = 1;
        let mut matrix_reps_index_map = vec![0usize; self.degree];
        for i in 0..row_size {
            let index1 = (pos - 1) >> 1;
            let index2 = (m - pos - 1) >> 1;
            matrix_reps_index_map[i] = index1.reverse_bits() >> (self.degree.leading_zeros() + 1);
            matrix_reps_index_map[row_size | i] =
                index2.reverse_bits() >> (self.degree.leading_zeros() + 1);
            pos *= gen;
            pos &= m - 1;
        }

        Ok(BfvParameters {
            polynomial_degree: self.degree,
            plaintext_modulus: self.plaintext,
            moduli: moduli.into(),
            moduli_sizes: moduli_sizes.into(),
            variance: self.variance,
            ctx,
            op,
            delta: delta_polys.into(),
            q_mod_t: q_mod_t_values.into(),
            scalers: scalers.into(),
            plaintext: plaintext_modulus,
            matrix_reps_index_map: matrix_reps_index_map.into(),
        })
    }
}
