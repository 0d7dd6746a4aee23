use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::chain::McmcChain;
use crate::traits::SweepState;

/// Chain runner configuration.
///
/// A chain first discards `warmup` sweeps, records the current state, then
/// records again after every `thin` further sweeps until `n_samples` draws
/// are kept. With `warmup = 0` the first draw is the initial state itself.
#[derive(Debug, Clone)]
pub struct ChainRunner {
    pub n_samples: usize,
    pub warmup: usize,
    pub thin: usize,
    pub seed: u64,
}

impl ChainRunner {
    pub fn new(n_samples: usize, warmup: usize) -> Self {
        Self {
            n_samples,
            warmup,
            thin: 1,
            seed: 42,
        }
    }

    /// Run a single chain from a copy of `init`.
    pub fn run<S: SweepState>(&self, init: &S) -> Result<McmcChain<S::Draw>, S::Error> {
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut current = init.clone();

        for _ in 0..self.warmup {
            current.sweep(&mut rng)?;
        }

        let mut chain = McmcChain {
            samples: Vec::with_capacity(self.n_samples),
            entropies: Vec::with_capacity(self.n_samples),
        };

        for i in 0..self.n_samples {
            if i > 0 {
                for _ in 0..self.thin.max(1) {
                    current.sweep(&mut rng)?;
                }
            }
            chain.push(current.draw(), current.entropy());
        }

        Ok(chain)
    }

    /// Run `n_chains` independent chains in parallel via rayon.
    ///
    /// Each chain gets `seed + chain_idx` for reproducibility. Chains run on
    /// a dedicated pool of `n_jobs` threads (`0` means all cores). The
    /// output is ordered by chain index regardless of completion order.
    pub fn run_parallel<S>(
        &self,
        n_chains: usize,
        n_jobs: usize,
        init: &S,
    ) -> Result<Vec<McmcChain<S::Draw>>, S::Error>
    where
        S: SweepState,
        S::Error: From<rayon::ThreadPoolBuildError>,
    {
        self.run_parallel_with(n_chains, n_jobs, init, |_| {})
    }

    /// Same as [`ChainRunner::run_parallel`], calling `on_done(chain_idx)`
    /// from the worker thread as each chain finishes.
    pub fn run_parallel_with<S, F>(
        &self,
        n_chains: usize,
        n_jobs: usize,
        init: &S,
        on_done: F,
    ) -> Result<Vec<McmcChain<S::Draw>>, S::Error>
    where
        S: SweepState,
        S::Error: From<rayon::ThreadPoolBuildError>,
        F: Fn(usize) + Sync,
    {
        let n_threads = if n_jobs == 0 {
            num_cpus::get()
        } else {
            n_jobs
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads.min(n_chains.max(1)))
            .build()?;

        log::debug!(
            "running {} chains on {} threads",
            n_chains,
            pool.current_num_threads()
        );

        pool.install(|| {
            (0..n_chains)
                .into_par_iter()
                .map(|i| {
                    let runner = ChainRunner {
                        n_samples: self.n_samples,
                        warmup: self.warmup,
                        thin: self.thin,
                        seed: self.seed.wrapping_add(i as u64),
                    };
                    let chain = runner.run(init);
                    on_done(i);
                    chain
                })
                .collect::<Vec<_>>()
        })
        .into_iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Random walk on integers pulled toward zero.
    #[derive(Clone)]
    struct Walker {
        x: i64,
        sweeps: usize,
    }

    #[derive(Debug)]
    struct WalkError;

    impl From<rayon::ThreadPoolBuildError> for WalkError {
        fn from(_: rayon::ThreadPoolBuildError) -> Self {
            WalkError
        }
    }

    impl SweepState for Walker {
        type Draw = (i64, usize);
        type Error = WalkError;

        fn sweep(&mut self, rng: &mut SmallRng) -> Result<(), WalkError> {
            let step: i64 = if rng.random::<f64>() < 0.5 { 1 } else { -1 };
            self.x += step;
            self.sweeps += 1;
            Ok(())
        }

        fn entropy(&self) -> f64 {
            (self.x * self.x) as f64
        }

        fn draw(&self) -> (i64, usize) {
            (self.x, self.sweeps)
        }
    }

    #[test]
    fn test_first_draw_is_initial_state() {
        let runner = ChainRunner::new(1, 0);
        let init = Walker { x: 7, sweeps: 0 };
        let chain = runner.run(&init).unwrap();
        assert_eq!(chain.samples, vec![(7, 0)]);
        assert_eq!(chain.entropies, vec![49.0]);
    }

    #[test]
    fn test_warmup_and_thinning() {
        let runner = ChainRunner {
            n_samples: 4,
            warmup: 3,
            thin: 2,
            seed: 1,
        };
        let chain = runner.run(&Walker { x: 0, sweeps: 0 }).unwrap();
        let sweeps: Vec<usize> = chain.samples.iter().map(|s| s.1).collect();
        assert_eq!(sweeps, vec![3, 5, 7, 9]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let runner = ChainRunner {
            n_samples: 5,
            warmup: 2,
            thin: 3,
            seed: 11,
        };
        let init = Walker { x: 0, sweeps: 0 };
        let chains = runner.run_parallel(3, 2, &init).unwrap();
        assert_eq!(chains.len(), 3);

        for (i, chain) in chains.iter().enumerate() {
            let single = ChainRunner {
                seed: 11 + i as u64,
                ..runner.clone()
            }
            .run(&init)
            .unwrap();
            assert_eq!(chain.samples, single.samples);
        }
    }

    #[test]
    fn test_completion_hook_sees_every_chain() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let done = AtomicUsize::new(0);
        let runner = ChainRunner::new(2, 1);
        let chains = runner
            .run_parallel_with(4, 0, &Walker { x: 0, sweeps: 0 }, |_| {
                done.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(chains.len(), 4);
        assert_eq!(done.load(Ordering::Relaxed), 4);
    }
}
