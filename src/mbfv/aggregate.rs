//! Aggregation of protocol shares.

use crate::errors::Result;
use crate::Error;

/// A share that can absorb another party's share of the same protocol
/// instance.
///
/// Every share in this crate is a ring element (or a tuple of ring
/// elements), and absorption is component-wise modular addition, so
/// aggregation is commutative and associative: a higher layer may deliver
/// shares in any order and combine them pairwise or through any fan-in
/// tree, with a bit-identical result. Shares generated for a different
/// parameter set, level, or protocol input are rejected with
/// [`Error::ParameterMismatch`].
pub trait Aggregate: Sized {
    /// Fold another party's share into this one, in place.
    fn aggregate(&mut self, other: &Self) -> Result<()>;

    /// Combine the shares of all parties, in any delivery order.
    ///
    /// Returns an error if no share is supplied, or if two shares belong
    /// to different protocol instances.
    fn from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = Self>,
    {
        let mut shares = iter.into_iter();
        let mut acc = shares.next().ok_or(Error::TooFewValues(0, 1))?;
        for share in shares {
            acc.aggregate(&share)?;
        }
        Ok(acc)
    }

    /// Combine shares as they come out of the share constructors, failing
    /// on the first constructor error.
    fn try_from_shares<T>(iter: T) -> Result<Self>
    where
        T: IntoIterator<Item = Result<Self>>,
    {
        let mut shares = iter.into_iter();
        let mut acc = shares.next().ok_or(Error::TooFewValues(0, 1))??;
        for share in shares {
            acc.aggregate(&share?)?;
        }
        Ok(acc)
    }
}
