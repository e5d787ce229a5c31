//!
//! Reconnect policies: each outage walks a fresh sequence of delays
//! supplied by the strategy.
//!

use crate::imports::*;

pub trait ReconnectStrategy: Send + Sync + 'static {
    /// Fresh sequence of delays for one outage. When the iterator is
    /// exhausted the connection fails permanently.
    fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send>;
}

/// Sleeps for each value of a fixed, ordered sequence of delays and
/// gives up once the sequence is exhausted.
#[derive(Debug, Clone)]
pub struct IntervalStrategy {
    pub delays: Vec<Duration>,
}

impl IntervalStrategy {
    pub fn new(delays: Vec<Duration>) -> Self {
        IntervalStrategy { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        IntervalStrategy {
            delays: secs.iter().map(|secs| Duration::from_secs(*secs)).collect(),
        }
    }

    /// Strategy that never reconnects.
    pub fn none() -> Self {
        IntervalStrategy { delays: Vec::new() }
    }
}

impl Default for IntervalStrategy {
    fn default() -> Self {
        IntervalStrategy::from_secs(&[1, 2, 4, 8, 16])
    }
}

impl ReconnectStrategy for IntervalStrategy {
    fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        Box::new(self.delays.clone().into_iter())
    }
}

/// Reconnects immediately and without bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStrategy;

impl ReconnectStrategy for RawStrategy {
    fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        Box::new(std::iter::repeat(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_sequence() {
        let delays: Vec<_> = IntervalStrategy::default().delays().collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16]
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn interval_strategy_is_bounded() {
        let strategy = IntervalStrategy::from_secs(&[1, 2]);
        assert_eq!(strategy.delays().count(), 2);
        assert_eq!(IntervalStrategy::none().delays().count(), 0);
    }

    #[test]
    fn each_outage_gets_a_fresh_sequence() {
        let strategy = IntervalStrategy::from_secs(&[3]);
        let mut first = strategy.delays();
        assert_eq!(first.next(), Some(Duration::from_secs(3)));
        assert_eq!(first.next(), None);
        assert_eq!(strategy.delays().next(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn raw_strategy_is_unbounded_and_immediate() {
        let mut delays = RawStrategy.delays();
        for _ in 0..1000 {
            assert_eq!(delays.next(), Some(Duration::ZERO));
        }
    }
}
