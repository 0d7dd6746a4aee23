//! Statistics over sampled partitions: label alignment, co-clustering,
//! stability and cross-level consistency.
//!
//! All functions take draws whose labels were already aligned to a
//! reference with [`align_to_reference`]; aligned labels `< k_ref` name the
//! reference block they overlap most, labels `>= k_ref` are blocks the
//! reference does not have.

use crate::metrics::{contingency, num_labels};
use nalgebra::DMatrix;

/// Map the labels of a draw onto reference labels by greedy maximum
/// overlap. Labels left unmatched get `k_ref, k_ref + 1, ...` in order of
/// first appearance.
pub fn align_to_reference(labels: &[usize], reference: &[usize]) -> Vec<usize> {
    let k_ref = num_labels(reference);
    let table = contingency(labels, reference);

    let mut pairs: Vec<(usize, usize, usize)> = vec![];
    for (a, row) in table.iter().enumerate() {
        for (b, &c) in row.iter().enumerate() {
            if c > 0 {
                pairs.push((c, a, b));
            }
        }
    }
    pairs.sort_unstable_by(|x, y| y.0.cmp(&x.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

    let mut target = vec![usize::MAX; table.len()];
    let mut taken = vec![false; k_ref];
    for (_, a, b) in pairs {
        if target[a] == usize::MAX && !taken[b] {
            target[a] = b;
            taken[b] = true;
        }
    }

    let mut next = k_ref;
    labels
        .iter()
        .map(|&a| {
            if target[a] == usize::MAX {
                target[a] = next;
                next += 1;
            }
            target[a]
        })
        .collect()
}

/// Row-normalized marginal matrix from integer counts (`n x k`)
pub fn marginals_from_counts(counts: &[Vec<u64>], n: usize, k: usize) -> DMatrix<f64> {
    let mut out = DMatrix::<f64>::zeros(n, k);
    for (i, row) in counts.iter().enumerate().take(n) {
        let total: u64 = row.iter().sum();
        if total == 0 {
            continue;
        }
        for (c, &x) in row.iter().enumerate().take(k) {
            out[(i, c)] = x as f64 / total as f64;
        }
    }
    out
}

/// Mean-field entropy `-Σ_i Σ_c p_ic ln p_ic`
pub fn mf_entropy(marginals: &DMatrix<f64>) -> f64 {
    marginals
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum()
}

/// Fraction of draws in which each pair of vertices shares a block.
///
/// The result is dense: `n^2` floats, built in place. Time is
/// `O(Σ_draws Σ_blocks n_b^2)`. Large graphs should turn it off through
/// `PosteriorOptions::affinity`.
pub fn co_clustering(draws: &[&[usize]], n: usize) -> DMatrix<f64> {
    let mut out = DMatrix::<f64>::zeros(n, n);
    for labels in draws {
        let k = num_labels(labels);
        let mut members: Vec<Vec<usize>> = vec![vec![]; k];
        for (v, &c) in labels.iter().enumerate() {
            members[c].push(v);
        }
        for group in &members {
            for &i in group {
                for &j in group {
                    out[(i, j)] += 1.0;
                }
            }
        }
    }
    out /= draws.len().max(1) as f64;
    out
}

/// Mean Jaccard agreement of each vertex's block across all pairs of
/// draws. With fewer than two draws every vertex is perfectly stable.
pub fn vertex_stability(draws: &[&[usize]], n: usize) -> Vec<f64> {
    if draws.len() < 2 {
        return vec![1.0; n];
    }
    let sizes: Vec<Vec<usize>> = draws
        .iter()
        .map(|labels| {
            let mut s = vec![0usize; num_labels(labels)];
            labels.iter().for_each(|&c| s[c] += 1);
            s
        })
        .collect();

    let mut total = vec![0.0; n];
    let mut pairs = 0usize;
    for i in 0..draws.len() {
        for j in (i + 1)..draws.len() {
            let table = contingency(draws[i], draws[j]);
            for v in 0..n {
                let (a, b) = (draws[i][v], draws[j][v]);
                let inter = table[a][b] as f64;
                let union = (sizes[i][a] + sizes[j][b]) as f64 - inter;
                total[v] += inter / union;
            }
            pairs += 1;
        }
    }
    total.into_iter().map(|x| x / pairs as f64).collect()
}

/// Mean vertex stability over the members of each reference block
pub fn block_stability(stability: &[f64], reference: &[usize]) -> Vec<f64> {
    let k = num_labels(reference);
    let mut sum = vec![0.0; k];
    let mut count = vec![0usize; k];
    for (v, &c) in reference.iter().enumerate() {
        sum[c] += stability[v];
        count[c] += 1;
    }
    sum.into_iter()
        .zip(count)
        .map(|(s, c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect()
}

/// Parent of every reference block of level `l` at level `l + 1`
pub fn reference_parents(lower: &[usize], upper: &[usize]) -> Vec<usize> {
    let mut parent = vec![usize::MAX; num_labels(lower)];
    for (&a, &b) in lower.iter().zip(upper.iter()) {
        parent[a] = b;
    }
    parent
}

/// Per vertex and adjacent level pair `(l, l + 1)`: fraction of draws whose
/// aligned level-`l` block sits, in the reference hierarchy, under the
/// aligned level-`l + 1` block.
///
/// `draws[d][l]` are the aligned labels of draw `d` at level `l`;
/// `reference[l]` the reference labels. Returns `n x (depth - 1)`.
pub fn cross_level_consistency(draws: &[Vec<Vec<usize>>], reference: &[Vec<usize>]) -> DMatrix<f64> {
    let depth = reference.len();
    let n = reference.first().map(|r| r.len()).unwrap_or(0);
    let pairs = depth.saturating_sub(1);
    let mut counts = vec![0u64; n * pairs];

    let parents: Vec<Vec<usize>> = (0..pairs)
        .map(|l| reference_parents(&reference[l], &reference[l + 1]))
        .collect();

    for draw in draws {
        for l in 0..pairs {
            for v in 0..n {
                let (a, b) = (draw[l][v], draw[l + 1][v]);
                if parents[l].get(a).is_some_and(|&p| p == b) {
                    counts[v * pairs + l] += 1;
                }
            }
        }
    }

    let d = draws.len().max(1) as f64;
    DMatrix::from_fn(n, pairs, |v, l| counts[v * pairs + l] as f64 / d)
}
