//! Partition utilities: relabelling, contingency tables, modularity and
//! partition similarity.

use crate::graph::Graph;
use fnv::FnvHashMap;

/// Relabel to `0..k` in order of first appearance.
///
/// Returns `(labels, raw_of_dense)` where `raw_of_dense[c]` is the original
/// label mapped to `c`.
pub fn renumber(labels: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let mut map: FnvHashMap<usize, usize> = FnvHashMap::default();
    let mut raw_of_dense = vec![];
    let dense = labels
        .iter()
        .map(|&l| {
            *map.entry(l).or_insert_with(|| {
                raw_of_dense.push(l);
                raw_of_dense.len() - 1
            })
        })
        .collect();
    (dense, raw_of_dense)
}

/// Number of distinct labels
pub fn num_labels(labels: &[usize]) -> usize {
    labels.iter().max().map(|&x| x + 1).unwrap_or(0)
}

/// Dense contingency table `counts[a][b]` of two labelings of the same items
pub fn contingency(labels_a: &[usize], labels_b: &[usize]) -> Vec<Vec<usize>> {
    debug_assert_eq!(labels_a.len(), labels_b.len());
    let (ka, kb) = (num_labels(labels_a), num_labels(labels_b));
    let mut counts = vec![vec![0usize; kb]; ka];
    for (&a, &b) in labels_a.iter().zip(labels_b.iter()) {
        counts[a][b] += 1;
    }
    counts
}

/// Newman-Girvan modularity of `labels` with resolution γ. Directed graphs
/// use the directed null model `k⁺_i k⁻_j / m`.
pub fn modularity(graph: &Graph, labels: &[usize], resolution: f64) -> f64 {
    let m = graph.total_weight();
    if m <= 0.0 || labels.len() != graph.num_vertices() {
        return 0.0;
    }
    let k = num_labels(labels);
    let mut internal = vec![0.0; k];
    let mut out_tot = vec![0.0; k];
    let mut in_tot = vec![0.0; k];

    for &(u, v, w) in graph.edges() {
        if labels[u] == labels[v] {
            internal[labels[u]] += w;
        }
    }
    for v in 0..graph.num_vertices() {
        out_tot[labels[v]] += graph.out_degree(v);
        in_tot[labels[v]] += graph.in_degree(v);
    }

    (0..k)
        .map(|c| {
            if graph.is_directed() {
                internal[c] / m - resolution * out_tot[c] * in_tot[c] / (m * m)
            } else {
                let a = out_tot[c] / (2.0 * m);
                internal[c] / m - resolution * a * a
            }
        })
        .sum()
}

fn entropy_of_counts(counts: impl Iterator<Item = usize>, n: f64) -> f64 {
    counts
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Mutual information (nats) of two labelings
pub fn mutual_info(labels_a: &[usize], labels_b: &[usize]) -> f64 {
    let n = labels_a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let table = contingency(labels_a, labels_b);
    let row: Vec<usize> = table.iter().map(|r| r.iter().sum()).collect();
    let col: Vec<usize> = (0..table.first().map(|r| r.len()).unwrap_or(0))
        .map(|b| table.iter().map(|r| r[b]).sum())
        .collect();

    let mut mi = 0.0;
    for (a, r) in table.iter().enumerate() {
        for (b, &nab) in r.iter().enumerate() {
            if nab > 0 {
                let nab = nab as f64;
                mi += nab / n * (n * nab / (row[a] as f64 * col[b] as f64)).ln();
            }
        }
    }
    mi.max(0.0)
}

/// Normalized mutual information `2 I(A;B) / (H(A) + H(B))`; two single-block
/// labelings are identical and score 1.
pub fn normalized_mutual_info(labels_a: &[usize], labels_b: &[usize]) -> f64 {
    let n = labels_a.len() as f64;
    if n == 0.0 {
        return 1.0;
    }
    let mut ca = vec![0usize; num_labels(labels_a)];
    let mut cb = vec![0usize; num_labels(labels_b)];
    labels_a.iter().for_each(|&a| ca[a] += 1);
    labels_b.iter().for_each(|&b| cb[b] += 1);
    let ha = entropy_of_counts(ca.into_iter(), n);
    let hb = entropy_of_counts(cb.into_iter(), n);
    if ha + hb <= 0.0 {
        return 1.0;
    }
    (2.0 * mutual_info(labels_a, labels_b) / (ha + hb)).clamp(0.0, 1.0)
}

/// Adjusted Rand index
pub fn adjusted_rand_index(labels_a: &[usize], labels_b: &[usize]) -> f64 {
    let n = labels_a.len();
    if n < 2 {
        return 1.0;
    }
    let table = contingency(labels_a, labels_b);
    let choose2 = |x: usize| -> f64 { (x * x.saturating_sub(1)) as f64 / 2.0 };

    let sum_nij: f64 = table.iter().flatten().map(|&x| choose2(x)).sum();
    let sum_ni: f64 = table.iter().map(|r| choose2(r.iter().sum())).sum();
    let kb = table.first().map(|r| r.len()).unwrap_or(0);
    let sum_nj: f64 = (0..kb)
        .map(|b| choose2(table.iter().map(|r| r[b]).sum()))
        .sum();
    let n_c2 = choose2(n);

    let expected = sum_ni * sum_nj / n_c2;
    let max_index = (sum_ni + sum_nj) / 2.0;
    if (max_index - expected).abs() < 1e-10 {
        return 1.0;
    }
    (sum_nij - expected) / (max_index - expected)
}

/// Whether two labelings induce the same partition (up to renaming)
pub fn same_partition(labels_a: &[usize], labels_b: &[usize]) -> bool {
    labels_a.len() == labels_b.len() && renumber(labels_a).0 == renumber(labels_b).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_renumber_first_seen() {
        let (dense, raw) = renumber(&[5, 5, 2, 9, 2]);
        assert_eq!(dense, vec![0, 0, 1, 2, 1]);
        assert_eq!(raw, vec![5, 2, 9]);
    }

    #[test]
    fn test_similarity_of_identical_partitions() {
        let a = vec![0, 0, 1, 1, 2, 2];
        let b = vec![2, 2, 0, 0, 1, 1];
        assert_abs_diff_eq!(normalized_mutual_info(&a, &b), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(adjusted_rand_index(&a, &b), 1.0, epsilon = 1e-12);
        assert!(same_partition(&a, &b));
        assert!(!same_partition(&a, &[0, 0, 0, 1, 1, 1]));
    }

    #[test]
    fn test_independent_partitions_score_low() {
        let a = vec![0, 0, 1, 1];
        let b = vec![0, 1, 0, 1];
        assert_abs_diff_eq!(normalized_mutual_info(&a, &b), 0.0, epsilon = 1e-12);
        assert!(adjusted_rand_index(&a, &b) < 0.0);
    }

    #[test]
    fn test_modularity_two_triangles() {
        let edges = vec![
            (0, 1, 1.0),
            (1, 2, 1.0),
            (0, 2, 1.0),
            (3, 4, 1.0),
            (4, 5, 1.0),
            (3, 5, 1.0),
            (2, 3, 1.0),
        ];
        let g = Graph::from_edges(6, &edges, false).unwrap();
        // Q = 2 * (3/7 - (7/14)^2)
        let q = modularity(&g, &[0, 0, 0, 1, 1, 1], 1.0);
        assert_abs_diff_eq!(q, 2.0 * (3.0 / 7.0 - 0.25), epsilon = 1e-12);
        assert_abs_diff_eq!(modularity(&g, &[0; 6], 1.0), 0.0, epsilon = 1e-12);
    }
}
