use std::time::Duration;

/// Exponential backoff doubling from `initial` up to `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            max,
            next: initial.min(max),
        }
    }

    /// Delay to wait before the next retry
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_initial() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(300));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn delays_double_until_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(30));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30, 30]);
    }

    #[test]
    fn initial_above_max_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
