use nsbm::error::NsbmError;
use nsbm::metrics::adjusted_rand_index;
use nsbm::{Graph, Nsbm, NsbmOptions, NestedSnapshot, SamplerStatus};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

fn clique_edges(offset: usize, size: usize, edges: &mut Vec<(usize, usize, f64)>) {
    for i in 0..size {
        for j in (i + 1)..size {
            edges.push((offset + i, offset + j, 1.0));
        }
    }
}

fn two_cliques(size: usize) -> Graph {
    let mut edges = vec![];
    clique_edges(0, size, &mut edges);
    clique_edges(size, size, &mut edges);
    Graph::from_edges(2 * size, &edges, false).unwrap()
}

/// Poisson-weighted planted graph: mean weight `lambda_in` inside a
/// cluster, `lambda_out` across.
fn poisson_planted(n_per: usize, k: usize, lambda_in: f64, lambda_out: f64, seed: u64) -> (Graph, Vec<usize>) {
    let n = n_per * k;
    let mut rng = SmallRng::seed_from_u64(seed);
    let truth: Vec<usize> = (0..n).map(|i| i / n_per).collect();
    let p_in = Poisson::new(lambda_in).unwrap();
    let p_out = Poisson::new(lambda_out).unwrap();
    let mut edges = vec![];
    for i in 0..n {
        for j in (i + 1)..n {
            let w: f64 = if truth[i] == truth[j] {
                p_in.sample(&mut rng)
            } else {
                p_out.sample(&mut rng)
            };
            if w > 0.0 {
                edges.push((i, j, w));
            }
        }
    }
    for c in 1..k {
        edges.push(((c - 1) * n_per, c * n_per, 1.0));
    }
    (Graph::from_edges(n, &edges, false).unwrap(), truth)
}

#[test]
fn disconnected_cliques_give_two_then_one() -> nsbm::Result<()> {
    let graph = two_cliques(50);
    let result = Nsbm::new(NsbmOptions::default()).fit(&graph)?;

    assert_eq!(result.blocks, vec![2, 1]);
    let labels = &result.labels[0];
    assert!(labels[..50].iter().all(|&c| c == labels[0]));
    assert!(labels[50..].iter().all(|&c| c == labels[50]));
    assert_ne!(labels[0], labels[50]);
    assert_eq!(result.labels[1], vec![0; 100]);
    Ok(())
}

#[test]
fn single_level_cap() -> nsbm::Result<()> {
    let graph = two_cliques(10);
    let result = Nsbm::new(NsbmOptions {
        max_levels: 1,
        ..NsbmOptions::default()
    })
    .fit(&graph)?;
    assert_eq!(result.depth(), 1);
    assert_eq!(result.labels.len(), 1);
    Ok(())
}

#[test]
fn empty_graph_fails_fast() {
    let empty = Graph::from_edges(0, &[], false).unwrap();
    let err = Nsbm::new(NsbmOptions::default()).fit(&empty);
    assert!(matches!(err, Err(NsbmError::InvalidInput(_))));

    let lonely = Graph::from_edges(1, &[], false).unwrap();
    assert!(matches!(
        Nsbm::new(NsbmOptions::default()).fit(&lonely),
        Err(NsbmError::InvalidInput(_))
    ));

    let edgeless = Graph::from_edges(5, &[], false).unwrap();
    assert!(matches!(
        Nsbm::new(NsbmOptions::default()).fit(&edgeless),
        Err(NsbmError::InvalidInput(_))
    ));
}

#[test]
fn disconnected_rejected_when_required() {
    let graph = two_cliques(5);
    let err = Nsbm::new(NsbmOptions {
        require_connected: true,
        ..NsbmOptions::default()
    })
    .fit(&graph);
    assert!(matches!(err, Err(NsbmError::InvalidInput(_))));
}

#[test]
fn same_seed_same_labels() -> nsbm::Result<()> {
    let (graph, _) = poisson_planted(12, 4, 2.0, 0.1, 1);
    let opts = NsbmOptions {
        seed: 2024,
        max_sweeps: 150,
        ..NsbmOptions::default()
    };
    let a = Nsbm::new(opts.clone()).fit(&graph)?;
    let b = Nsbm::new(opts).fit(&graph)?;
    assert_eq!(a.labels, b.labels);
    assert_eq!(a.entropy, b.entropy);
    Ok(())
}

#[test]
fn block_counts_never_increase_upward() -> nsbm::Result<()> {
    for seed in 0..3 {
        let (graph, truth) = poisson_planted(10, 6, 1.5, 0.05, seed);
        let result = Nsbm::new(NsbmOptions {
            seed,
            max_sweeps: 150,
            ..NsbmOptions::default()
        })
        .fit(&graph)?;
        assert!(
            result.blocks.windows(2).all(|w| w[1] <= w[0]),
            "{:?}",
            result.blocks
        );
        let ari = adjusted_rand_index(&result.labels[0], &truth);
        println!("seed {}: blocks={:?}, ARI={:.3}", seed, result.blocks, ari);
    }
    Ok(())
}

#[test]
fn snapshot_round_trip_continues_identically() -> nsbm::Result<()> {
    let (graph, _) = poisson_planted(10, 3, 2.0, 0.2, 8);
    let nsbm = Nsbm::new(NsbmOptions {
        max_sweeps: 100,
        ..NsbmOptions::default()
    });
    let fitted = nsbm.fit(&graph)?;

    let json = fitted.snapshot.to_json()?;
    let snapshot = NestedSnapshot::from_json(&json)?;
    assert_eq!(snapshot, fitted.snapshot);

    let first = nsbm.resume(&graph, &snapshot)?;
    let second = nsbm.resume(&graph, &fitted.snapshot)?;
    assert_eq!(first.labels, second.labels);
    assert_eq!(first.reports[0].best_entropy, second.reports[0].best_entropy);
    assert_eq!(first.reports[0].final_entropy, second.reports[0].final_entropy);
    assert!(first.status().is_terminal());

    let other = two_cliques(15);
    assert!(matches!(
        nsbm.resume(&other, &snapshot),
        Err(NsbmError::Snapshot(_))
    ));
    Ok(())
}

#[test]
fn one_draw_marginals_equal_assignment() -> nsbm::Result<()> {
    let (graph, _) = poisson_planted(10, 3, 2.0, 0.1, 4);
    let result = Nsbm::new(NsbmOptions {
        n_draws: 1,
        max_sweeps: 100,
        ..NsbmOptions::default()
    })
    .fit(&graph)?;

    let posterior = result.posterior.as_ref().unwrap();
    for (l, labels) in result.labels.iter().enumerate() {
        let m = &posterior.marginals[l];
        for (v, &c) in labels.iter().enumerate() {
            for col in 0..m.ncols() {
                let expected = if col == c { 1.0 } else { 0.0 };
                assert_eq!(m[(v, col)], expected);
            }
        }
    }
    Ok(())
}

#[test]
fn level_beyond_depth_is_out_of_range() -> nsbm::Result<()> {
    let (graph, _) = poisson_planted(8, 3, 2.0, 0.1, 2);
    let result = Nsbm::new(NsbmOptions {
        n_draws: 2,
        n_jobs: 1,
        max_sweeps: 60,
        ..NsbmOptions::default()
    })
    .fit(&graph)?;

    let depth = result.depth();
    assert_eq!(result.level_labels(depth - 1)?.len(), graph.num_vertices());
    assert!(matches!(
        result.level_labels(depth + 3),
        Err(NsbmError::LevelOutOfRange { requested, depth: d }) if requested == depth + 3 && d == depth
    ));

    let posterior = result.posterior.as_ref().unwrap();
    assert!(posterior.marginal(depth - 1).is_ok());
    assert!(matches!(
        posterior.marginal(depth),
        Err(NsbmError::LevelOutOfRange { .. })
    ));
    Ok(())
}

#[test]
fn marginal_rows_sum_to_one() -> nsbm::Result<()> {
    let (graph, _) = poisson_planted(8, 3, 1.0, 0.3, 6);
    let result = Nsbm::new(NsbmOptions {
        n_draws: 6,
        n_chains: 3,
        thin: 2,
        burnin: 1,
        max_sweeps: 60,
        ..NsbmOptions::default()
    })
    .fit(&graph)?;

    let posterior = result.posterior.as_ref().unwrap();
    assert_eq!(posterior.n_draws, 18);
    for m in &posterior.marginals {
        for v in 0..graph.num_vertices() {
            assert!((m.row(v).sum() - 1.0).abs() < 1e-6);
        }
    }
    for hist in &posterior.group_marginals {
        assert_eq!(hist.iter().sum::<usize>(), 18);
    }
    assert_eq!(posterior.affinity.as_ref().map(|a| a.nrows()), Some(graph.num_vertices()));
    Ok(())
}

#[test]
fn nonconvergence_is_reported_not_raised() -> nsbm::Result<()> {
    let mut rng = SmallRng::seed_from_u64(0);
    let n = 40;
    let edges: Vec<(usize, usize, f64)> = (0..200)
        .map(|_| (rng.random_range(0..n), rng.random_range(0..n), 1.0))
        .collect();
    let graph = Graph::from_edges(n, &edges, false)?;
    let result = Nsbm::new(NsbmOptions {
        max_sweeps: 2,
        wait: 50,
        ..NsbmOptions::default()
    })
    .fit(&graph)?;
    assert_eq!(result.status(), SamplerStatus::MaxIterationsReached);
    Ok(())
}
