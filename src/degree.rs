use core::fmt;

use crate::error::{Error, Result};

/// The fan-out configuration of a tree.
///
/// A degree `n` lets every node hold at most `n - 1` keys (and an internal node
/// at most `n` children); a node that reaches `n` keys splits. Non-root nodes
/// must keep at least `ceil(n / 2) - 1` keys, otherwise they borrow from or
/// merge with a sibling.
///
/// Leaves and internal nodes share the same maximum degree.
///
/// # Examples
///
/// ```
/// use bplus_index::Degree;
///
/// let degree = Degree::new(5).unwrap();
/// assert_eq!(degree.get(), 5);
/// assert!(Degree::new(2).is_err());
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Degree(usize);

impl Degree {
    /// The smallest degree that still produces non-empty halves on every split.
    pub const MIN: usize = 3;

    /// The degree a new tree starts with.
    pub const DEFAULT: Self = Self(4);

    /// Validates `degree` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDegree`] if `degree < Degree::MIN`.
    pub fn new(degree: usize) -> Result<Self> {
        if degree < Self::MIN {
            return Err(Error::InvalidDegree {
                degree,
                min: Self::MIN,
            });
        }
        Ok(Self(degree))
    }

    /// Returns the maximum degree (`leaf_max_degree`).
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    #[inline]
    pub(crate) const fn leaf_max(self) -> usize {
        self.0
    }

    #[inline]
    pub(crate) const fn leaf_min(self) -> usize {
        self.leaf_max().div_ceil(2)
    }

    #[inline]
    pub(crate) const fn nonleaf_max(self) -> usize {
        self.0
    }

    #[inline]
    pub(crate) const fn nonleaf_min(self) -> usize {
        self.nonleaf_max().div_ceil(2)
    }

    /// Fewest keys a non-root leaf may hold.
    #[inline]
    pub(crate) const fn min_leaf_keys(self) -> usize {
        self.leaf_min() - 1
    }

    /// Fewest keys a non-root internal node may hold.
    #[inline]
    pub(crate) const fn min_internal_keys(self) -> usize {
        self.nonleaf_min() - 1
    }

    /// Index of the first key moved into the new right leaf on a split.
    #[inline]
    pub(crate) const fn leaf_split_point(self) -> usize {
        self.leaf_max() / 2
    }
}

impl Default for Degree {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Degree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<usize> for Degree {
    type Error = Error;

    fn try_from(degree: usize) -> Result<Self> {
        Self::new(degree)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_is_four() {
        let degree = Degree::default();
        assert_eq!(degree.get(), 4);
        assert_eq!(degree.leaf_min(), 2);
        assert_eq!(degree.nonleaf_min(), 2);
        assert_eq!(degree.min_leaf_keys(), 1);
        assert_eq!(degree.min_internal_keys(), 1);
        assert_eq!(degree.leaf_split_point(), 2);
    }

    #[test]
    fn minimums_round_up_for_odd_degrees() {
        for (n, min) in [(3, 2), (5, 3), (6, 3), (7, 4)] {
            let degree = Degree::new(n).unwrap();
            assert_eq!(degree.leaf_min(), min, "degree {n}");
            assert_eq!(degree.nonleaf_min(), min, "degree {n}");
            assert_eq!(degree.min_leaf_keys(), min - 1, "degree {n}");
            assert_eq!(degree.min_internal_keys(), min - 1, "degree {n}");
        }
    }

    #[test]
    fn rejects_degenerate_degrees() {
        for degree in 0..Degree::MIN {
            assert!(matches!(
                Degree::new(degree),
                Err(Error::InvalidDegree { degree: d, min: Degree::MIN }) if d == degree
            ));
        }
    }

    proptest! {
        // Both halves of every split must fit inside the size bounds.
        #[test]
        fn splits_respect_bounds(n in Degree::MIN..512usize) {
            let degree = Degree::new(n).unwrap();
            let max_keys = n - 1;

            let left = degree.leaf_split_point();
            let right = n - left;
            prop_assert!(left >= degree.min_leaf_keys() && left <= max_keys);
            prop_assert!(right >= degree.min_leaf_keys() && right <= max_keys);

            let mid = n / 2;
            let left = mid;
            let right = n - mid - 1;
            prop_assert!(left >= degree.min_internal_keys() && left <= max_keys);
            prop_assert!(right >= degree.min_internal_keys() && right <= max_keys);
        }

        // A merge of an underflowing node with a sibling that cannot lend must fit in one node.
        #[test]
        fn merges_respect_bounds(n in Degree::MIN..512usize) {
            let degree = Degree::new(n).unwrap();
            let max_keys = n - 1;

            let leaf_merge = (degree.min_leaf_keys().saturating_sub(1)) + degree.min_leaf_keys();
            prop_assert!(leaf_merge <= max_keys);

            let internal_merge = (degree.min_internal_keys().saturating_sub(1)) + degree.min_internal_keys() + 1;
            prop_assert!(internal_merge <= max_keys);
        }
    }
}
