//! Description-length terms of the (nested) stochastic block model.
//!
//! All counts are real-valued so that weighted graphs are handled through
//! `ln Γ`:
//!
//! ```text
//! lfact(x)        = ln Γ(x + 1)
//! ldfact(x)       = lfact(x / 2) + (x / 2) ln 2          (ln x!! for even x)
//! lbinom(n, k)    = lfact(n) - lfact(k) - lfact(n - k)
//! lmultiset(n, k) = lbinom(n + k - 1, k)                 ((n multichoose k))
//! ```
//!
//! Level 0 pays the microcanonical SBM likelihood (plain, degree-corrected
//! or with a planted reference prior). Upper levels model the block matrix
//! of the level below as a uniform multigraph given their own partition.
//! Every level pays the partition prior, and the top level additionally
//! pays for the total edge count.

use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;
use std::sync::Arc;

/// Finite stand-in returned for configurations whose description length
/// overflows.
pub const DEGENERATE_ENTROPY: f64 = 1e300;

/// `ln Γ(x + 1)`
#[inline]
pub fn lfact(x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    SpecialGamma::ln_gamma(x + 1.0).0
}

/// `ln x!!` for even `x`, extended to real arguments
#[inline]
pub fn ldfact(x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    lfact(x / 2.0) + (x / 2.0) * std::f64::consts::LN_2
}

/// Log binomial coefficient; `-inf` outside `0 <= k <= n`.
#[inline]
pub fn lbinom(n: f64, k: f64) -> f64 {
    if k < 0.0 || k > n {
        return f64::NEG_INFINITY;
    }
    if k == 0.0 || k == n {
        return 0.0;
    }
    lfact(n) - lfact(k) - lfact(n - k)
}

/// Log of the number of multisets of size `k` from `n` kinds.
///
/// `lmultiset(0, 0) = 0`, while placing `k > 0` items into zero kinds is
/// impossible (`+inf`).
#[inline]
pub fn lmultiset(n: f64, k: f64) -> f64 {
    if k <= 0.0 {
        return 0.0;
    }
    if n <= 0.0 {
        return f64::INFINITY;
    }
    SpecialGamma::ln_gamma(n + k).0 - lfact(k) - SpecialGamma::ln_gamma(n).0
}

/// `x ln y` with `0 ln 0 = 0`
#[inline]
pub fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x * y.ln()
    }
}

/// Replace a non-finite total by [`DEGENERATE_ENTROPY`].
#[inline]
pub fn clamp_entropy(s: f64) -> f64 {
    if s.is_finite() {
        s.min(DEGENERATE_ENTROPY)
    } else {
        DEGENERATE_ENTROPY
    }
}

/// Model variant requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Plain microcanonical SBM
    Plain,
    /// Degree-corrected SBM
    #[default]
    DegreeCorrected,
    /// Plain SBM with a reference partition as structural prior
    Planted,
}

/// Entropy model of one hierarchy level, fixed when the level is built.
#[derive(Debug, Clone)]
pub enum EntropyModel {
    /// `-Σ ln M_rs! - Σ ln M_rr!! + Σ e_r ln n_r`
    Plain,
    /// `-Σ ln M_rs! - Σ ln M_rr!! + Σ ln e_r! - Σ ln k_i!` plus the
    /// uniform degree prior `Σ ln((n_r multichoose e_r))`
    DegreeCorrected,
    /// Plain plus `strength * Σ_r [ln n_r! - Σ_c ln n_rc!]` where `n_rc`
    /// counts members of block `r` with reference label `c`
    Planted {
        /// reference label per vertex
        reference: Arc<Vec<usize>>,
        /// weight of the structural prior
        strength: f64,
    },
    /// Upper level: `Σ_{r<s} ln((n_r n_s multichoose M_rs))
    /// + Σ_r ln((n_r (n_r + 1) / 2 multichoose M_rr / 2))`
    Nested,
}

impl EntropyModel {
    /// Build the level-0 model for a variant
    pub fn level_zero(
        variant: ModelVariant,
        reference: Option<Arc<Vec<usize>>>,
        strength: f64,
    ) -> Option<Self> {
        match variant {
            ModelVariant::Plain => Some(EntropyModel::Plain),
            ModelVariant::DegreeCorrected => Some(EntropyModel::DegreeCorrected),
            ModelVariant::Planted => reference.map(|reference| EntropyModel::Planted {
                reference,
                strength,
            }),
        }
    }

    /// Whether the pair terms depend on block sizes, so that a change in
    /// `n_r` touches every pair in row `r`.
    pub fn pairs_depend_on_sizes(&self) -> bool {
        matches!(self, EntropyModel::Nested)
    }

    /// Whether per-block reference label counts are tracked
    pub fn is_planted(&self) -> bool {
        matches!(self, EntropyModel::Planted { .. })
    }

    /// Pair term for blocks `r != s` (undirected: `r < s`; directed: the
    /// ordered pair), given the edge count and both sizes.
    #[inline]
    pub fn pair_term(&self, m_rs: f64, n_r: f64, n_s: f64) -> f64 {
        match self {
            EntropyModel::Nested => lmultiset(n_r * n_s, m_rs),
            _ => -lfact(m_rs),
        }
    }

    /// Diagonal pair term. `m_rr` is twice the intra-block weight when
    /// undirected and the plain intra-block weight when directed.
    #[inline]
    pub fn diag_term(&self, m_rr: f64, n_r: f64, directed: bool) -> f64 {
        match (self, directed) {
            (EntropyModel::Nested, false) => lmultiset(n_r * (n_r + 1.0) / 2.0, m_rr / 2.0),
            (EntropyModel::Nested, true) => lmultiset(n_r * n_r, m_rr),
            (_, false) => -ldfact(m_rr),
            (_, true) => -lfact(m_rr),
        }
    }

    /// Per-block term excluding the partition prior. `e_out`/`e_in` are
    /// the block degree totals (`e_in` is ignored when undirected).
    /// `mixing` is `Σ_c ln n_rc!` for the planted model.
    #[inline]
    pub fn block_term(&self, n_r: f64, e_out: f64, e_in: f64, directed: bool, mixing: f64) -> f64 {
        let e_tot = if directed { e_out + e_in } else { e_out };
        match self {
            EntropyModel::Plain => xlogy(e_tot, n_r),
            EntropyModel::DegreeCorrected => {
                if directed {
                    lfact(e_out) + lfact(e_in) + lmultiset(n_r, e_out) + lmultiset(n_r, e_in)
                } else {
                    lfact(e_out) + lmultiset(n_r, e_out)
                }
            }
            EntropyModel::Planted { strength, .. } => {
                xlogy(e_tot, n_r) + strength * (lfact(n_r) - mixing)
            }
            EntropyModel::Nested => 0.0,
        }
    }
}

/// Partition prior `ln N + ln C(N-1, B-1) + ln N! - Σ_r ln n_r!` without
/// the block sum, which is paid per block.
#[inline]
pub fn partition_prior_global(total: f64, nonempty: usize) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let b = nonempty as f64;
    total.ln() + lbinom(total - 1.0, b - 1.0) + lfact(total)
}

/// Prior on the total edge count paid by the top level
#[inline]
pub fn edge_count_prior(nonempty: usize, total_edges: f64, directed: bool) -> f64 {
    let b = nonempty as f64;
    let pairs = if directed { b * b } else { b * (b + 1.0) / 2.0 };
    lmultiset(pairs, total_edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_lfact_matches_factorial() {
        assert_abs_diff_eq!(lfact(0.0), 0.0);
        assert_abs_diff_eq!(lfact(1.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lfact(5.0), 120f64.ln(), epsilon = 1e-10);
        // 6!! = 48
        assert_abs_diff_eq!(ldfact(6.0), 48f64.ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_binomials() {
        assert_abs_diff_eq!(lbinom(5.0, 2.0), 10f64.ln(), epsilon = 1e-10);
        assert_eq!(lbinom(3.0, 4.0), f64::NEG_INFINITY);
        // ((3 multichoose 2)) = C(4, 2) = 6
        assert_abs_diff_eq!(lmultiset(3.0, 2.0), 6f64.ln(), epsilon = 1e-10);
        assert_eq!(lmultiset(0.0, 0.0), 0.0);
        assert_eq!(lmultiset(0.0, 1.0), f64::INFINITY);
    }

    #[test]
    fn test_partition_prior() {
        // N = 4, B = 2: ln 4 + ln C(3, 1) + ln 4!
        let expected = 4f64.ln() + 3f64.ln() + 24f64.ln();
        assert_abs_diff_eq!(partition_prior_global(4.0, 2), expected, epsilon = 1e-10);
        // single block over one kind of pair has a single configuration
        assert_abs_diff_eq!(edge_count_prior(1, 10.0, false), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_entropy(f64::NAN), DEGENERATE_ENTROPY);
        assert_eq!(clamp_entropy(f64::INFINITY), DEGENERATE_ENTROPY);
        assert_eq!(clamp_entropy(-3.0), -3.0);
    }

    #[test]
    fn test_planted_is_zero_for_pure_blocks() {
        let model = EntropyModel::Planted {
            reference: Arc::new(vec![0, 0, 1]),
            strength: 1.0,
        };
        let pure = model.block_term(2.0, 0.0, 0.0, false, lfact(2.0));
        assert_abs_diff_eq!(pure, 0.0, epsilon = 1e-12);
        let mixed = model.block_term(2.0, 0.0, 0.0, false, 0.0);
        assert!(mixed > 0.0);
    }
}
