use crossbeam::utils::Backoff;

/// How a blocked queue producer or consumer waits for the queue state to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaitStrategy {
    /// Parks the thread on a condition variable.
    #[default]
    Block,
    /// Busy-spins on the queue state.
    Spin,
    /// Yields the thread between checks.
    Yield,
    /// Spins, then yields with exponentially growing pauses.
    Backoff,
}

impl WaitStrategy {
    /// Pauses once between two checks of the queue state.
    ///
    /// [Block](WaitStrategy::Block) waits on a condition variable instead and
    /// never reaches here.
    pub(crate) fn pause(&self, backoff: &Backoff) {
        match self {
            Self::Block | Self::Yield => std::thread::yield_now(),
            Self::Spin => std::hint::spin_loop(),
            Self::Backoff => backoff.snooze(),
        }
    }
}
