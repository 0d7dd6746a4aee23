use rand::rngs::SmallRng;

/// A Markov chain state that can be advanced by whole sweeps.
///
/// The random stream is owned by the caller (one per chain), so that a
/// state never touches process-wide randomness.
pub trait SweepState: Clone + Send + Sync {
    /// What gets recorded at every retained draw
    type Draw: Send;
    /// Error raised by a failing sweep
    type Error: Send;

    /// Advance the chain by one full sweep.
    fn sweep(&mut self, rng: &mut SmallRng) -> Result<(), Self::Error>;

    /// Current objective (lower is better).
    fn entropy(&self) -> f64;

    /// Record the current state.
    fn draw(&self) -> Self::Draw;
}
