use crate::config::UploadConfig;
use rand::Rng;
use std::time::Duration;

/// Wait between upload cycles
///
/// Grows geometrically while the collector is unavailable and snaps back to the base
/// delay as soon as a cycle succeeds or finds nothing to send.
#[derive(Debug, Clone)]
pub struct UploadDelay {
    base: Duration,
    min: Duration,
    max: Duration,
    multiplier: f64,
    jitter_ratio: f64,
    current: Duration,
}

impl UploadDelay {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            base: config.base_delay(),
            min: config.min_delay(),
            max: config.max_delay(),
            multiplier: config.backoff_multiplier,
            jitter_ratio: config.jitter_ratio,
            current: config.base_delay(),
        }
    }

    /// Delay before jitter
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn is_backing_off(&self) -> bool {
        self.current > self.base
    }

    /// Apply one backoff step after a retriable failure
    pub fn increase(&mut self) {
        let next = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::from_secs_f64(next.min(self.max.as_secs_f64()));
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Time to sleep before the next cycle: current delay ±jitter, never below the minimum
    pub fn next_wait(&self) -> Duration {
        let current_ms = self.current.as_millis() as u64;
        let jitter_range = (current_ms as f64 * self.jitter_ratio) as u64;

        let jittered = if jitter_range == 0 {
            current_ms
        } else {
            let jitter = rand::thread_rng().gen_range(0..=jitter_range * 2);
            current_ms.saturating_sub(jitter_range).saturating_add(jitter)
        };

        Duration::from_millis(jittered).max(self.min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay() -> UploadDelay {
        UploadDelay::from_config(&UploadConfig {
            base_delay_ms: 1_000,
            min_delay_ms: 500,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
            ..UploadConfig::default()
        })
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut delay = delay();
        assert_eq!(delay.current(), Duration::from_secs(1));
        assert!(!delay.is_backing_off());

        delay.increase();
        assert_eq!(delay.current(), Duration::from_secs(2));
        delay.increase();
        assert_eq!(delay.current(), Duration::from_secs(4));
        delay.increase();
        assert_eq!(delay.current(), Duration::from_secs(5));
        delay.increase();
        assert_eq!(delay.current(), Duration::from_secs(5));
        assert!(delay.is_backing_off());

        delay.reset();
        assert_eq!(delay.current(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let delay = delay();
        for _ in 0..100 {
            let wait = delay.next_wait();
            assert!(wait >= Duration::from_millis(800), "{:?}", wait);
            assert!(wait <= Duration::from_millis(1_200), "{:?}", wait);
        }
    }

    #[test]
    fn test_wait_never_below_minimum() {
        let delay = UploadDelay::from_config(&UploadConfig {
            base_delay_ms: 500,
            min_delay_ms: 500,
            jitter_ratio: 0.5,
            ..UploadConfig::default()
        });
        for _ in 0..100 {
            assert!(delay.next_wait() >= Duration::from_millis(500));
        }
    }
}
