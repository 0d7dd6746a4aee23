/// Collected draws of one chain (or several merged chains) with the
/// objective value at each draw.
#[derive(Debug, Clone)]
pub struct McmcChain<D> {
    pub samples: Vec<D>,
    pub entropies: Vec<f64>,
}

impl<D> Default for McmcChain<D> {
    fn default() -> Self {
        Self {
            samples: vec![],
            entropies: vec![],
        }
    }
}

impl<D> McmcChain<D> {
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn push(&mut self, sample: D, entropy: f64) {
        self.samples.push(sample);
        self.entropies.push(entropy);
    }

    /// Append the draws of `other` after ours.
    pub fn merge(mut self, other: Self) -> Self {
        self.samples.extend(other.samples);
        self.entropies.extend(other.entropies);
        self
    }

    /// Mean objective across draws
    pub fn mean_entropy(&self) -> Option<f64> {
        if self.entropies.is_empty() {
            return None;
        }
        Some(self.entropies.iter().sum::<f64>() / self.entropies.len() as f64)
    }

    /// Smallest objective value seen and its draw index
    pub fn best(&self) -> Option<(usize, f64)> {
        self.entropies
            .iter()
            .copied()
            .enumerate()
            .fold(None, |acc, (i, s)| match acc {
                Some((_, best)) if best <= s => acc,
                _ => Some((i, s)),
            })
    }
}
