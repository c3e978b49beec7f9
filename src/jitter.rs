//! Jitter for retry delays.
//!
//! `Proportional(f)` spreads each delay uniformly across `delay * (1 ± f)` and never returns a
//! negative wait. The default retry configuration uses `f = 0.1`.
//!
//! RNG: `rand`'s thread-local generator by default; deterministic RNGs can be injected via
//! `apply_with_rng`.

use rand::{rng, Rng};
use std::time::Duration;

use crate::error::ConfigError;

/// Fraction used when jitter is simply switched on.
pub const DEFAULT_JITTER_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Jitter {
    /// Exact backoff delay.
    #[default]
    None,
    /// Uniform noise within `±fraction` of the delay.
    Proportional(f64),
}

impl Jitter {
    /// `±10%` noise.
    pub fn standard() -> Self {
        Jitter::Proportional(DEFAULT_JITTER_FRACTION)
    }

    pub fn proportional(fraction: f64) -> Result<Self, ConfigError> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::InvalidJitter(fraction));
        }
        Ok(Jitter::Proportional(fraction))
    }

    /// Map the `jitter: bool` switch of a retry configuration onto a strategy.
    pub fn enabled(on: bool) -> Self {
        if on {
            Self::standard()
        } else {
            Jitter::None
        }
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match *self {
            Jitter::None => delay,
            Jitter::Proportional(fraction) => {
                let secs = delay.as_secs_f64();
                let spread = secs * fraction;
                if spread <= 0.0 || !spread.is_finite() {
                    return delay;
                }
                let offset = rng.random_range(-spread..=spread);
                Duration::try_from_secs_f64((secs + offset).max(0.0)).unwrap_or(delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_returns_exact_delay() {
        assert_eq!(Jitter::None.apply(Duration::from_secs(3)), Duration::from_secs(3));
        assert_eq!(Jitter::enabled(false), Jitter::None);
    }

    #[test]
    fn proportional_stays_within_ten_percent() {
        let jitter = Jitter::enabled(true);
        let mut rng = StdRng::seed_from_u64(7);
        let delay = Duration::from_secs(10);
        for _ in 0..500 {
            let jittered = jitter.apply_with_rng(delay, &mut rng);
            assert!(jittered >= Duration::from_secs(9), "{jittered:?} below lower bound");
            assert!(jittered <= Duration::from_secs(11), "{jittered:?} above upper bound");
        }
    }

    #[test]
    fn proportional_actually_varies() {
        let jitter = Jitter::standard();
        let mut rng = StdRng::seed_from_u64(99);
        let samples: Vec<_> =
            (0..20).map(|_| jitter.apply_with_rng(Duration::from_secs(1), &mut rng)).collect();
        assert!(samples.iter().any(|d| *d != samples[0]));
    }

    #[test]
    fn full_spread_never_goes_negative() {
        let jitter = Jitter::proportional(1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let jittered = jitter.apply_with_rng(Duration::from_millis(100), &mut rng);
            assert!(jittered <= Duration::from_millis(200));
        }
    }

    #[test]
    fn zero_delay_is_untouched() {
        assert_eq!(Jitter::standard().apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn rejects_out_of_range_fraction() {
        assert!(matches!(Jitter::proportional(1.5), Err(ConfigError::InvalidJitter(_))));
        assert!(Jitter::proportional(-0.1).is_err());
    }
}
