use crate::config::RateConfig;
use crate::provider::ProviderError;
use std::time::{Duration, Instant};

const MIB: u64 = 1024 * 1024;

/// Message fragments that identify a provider slow-down signal regardless of
/// which provider produced it.
const THROTTLE_TOKENS: &[&str] = &[
    "throttle",
    "rate limit",
    "rate exceeded",
    "quota exceeded",
    "slow down",
    "service unavailable",
];

/// Provider error codes that mean the same thing.
const THROTTLE_CODES: &[&str] = &[
    "Throttling",
    "ServiceUnavailable",
    "SlowDown",
    "TooManyRequests",
];

/// Adaptive pause between sends. One governor lives inside one worker
/// invocation and is never shared; every invocation starts back at
/// `base_delay` and the provider's own throttle signals are the only
/// cross-worker coordination.
#[derive(Debug)]
pub struct RateGovernor {
    config: RateConfig,
    current_delay: Duration,
    consecutive_throttles: u32,
    last_throttle_at: Option<Instant>,
}

impl RateGovernor {
    pub fn new(config: RateConfig) -> Self {
        let current_delay = config.base_delay.clamp(config.min_delay, config.max_delay);
        Self {
            config,
            current_delay,
            consecutive_throttles: 0,
            last_throttle_at: None,
        }
    }

    /// Delay to apply before the next send, surcharged by total attachment
    /// size and clamped to `[min_delay, max_delay]`.
    pub fn delay_for(&self, attachment_bytes: u64) -> Duration {
        let delayed = self.current_delay.mul_f64(size_multiplier(attachment_bytes));
        delayed.clamp(self.config.min_delay, self.config.max_delay)
    }

    /// The provider asked us to slow down: double the adaptive delay.
    pub fn note_throttle(&mut self) {
        self.current_delay = self
            .current_delay
            .saturating_mul(2)
            .min(self.config.max_delay);
        self.consecutive_throttles += 1;
        self.last_throttle_at = Some(Instant::now());
        tracing::warn!(
            delay_ms = self.current_delay.as_millis() as u64,
            consecutive_throttles = self.consecutive_throttles,
            "Provider throttle observed, send delay doubled"
        );
    }

    /// A send went through. Once the recovery period since the last throttle
    /// has passed, decay the delay by 10% per success back toward
    /// `min_delay`. A governor that never saw a throttle counts as recovered.
    pub fn note_success(&mut self) {
        let recovered = match self.last_throttle_at {
            Some(at) => at.elapsed() > self.config.throttle_recovery_period,
            None => true,
        };
        if recovered {
            self.current_delay = self
                .current_delay
                .mul_f64(0.9)
                .max(self.config.min_delay);
            self.consecutive_throttles = 0;
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn consecutive_throttles(&self) -> u32 {
        self.consecutive_throttles
    }
}

/// Surcharge bucket for the combined attachment payload of one message.
pub fn size_multiplier(attachment_bytes: u64) -> f64 {
    if attachment_bytes <= MIB {
        1.0
    } else if attachment_bytes <= 5 * MIB {
        1.5
    } else if attachment_bytes <= 10 * MIB {
        2.0
    } else {
        3.0
    }
}

/// Classify a provider error as a throttle/rate-limit condition.
pub fn is_throttle(err: &ProviderError) -> bool {
    if let Some(code) = err.code() {
        if THROTTLE_CODES.iter().any(|c| code.eq_ignore_ascii_case(c)) {
            return true;
        }
    }
    let message = err.message().to_lowercase();
    THROTTLE_TOKENS.iter().any(|t| message.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_ms: u64, min_ms: u64, max_ms: u64, recovery: Duration) -> RateConfig {
        RateConfig {
            base_delay: Duration::from_millis(base_ms),
            min_delay: Duration::from_millis(min_ms),
            max_delay: Duration::from_millis(max_ms),
            throttle_recovery_period: recovery,
        }
    }

    #[test]
    fn test_size_buckets() {
        assert_eq!(size_multiplier(0), 1.0);
        assert_eq!(size_multiplier(500 * 1024), 1.0);
        assert_eq!(size_multiplier(MIB), 1.0);
        assert_eq!(size_multiplier(3 * MIB), 1.5);
        assert_eq!(size_multiplier(5 * MIB), 1.5);
        assert_eq!(size_multiplier(8 * MIB), 2.0);
        assert_eq!(size_multiplier(10 * MIB), 2.0);
        assert_eq!(size_multiplier(20 * MIB), 3.0);
    }

    #[test]
    fn test_delay_always_within_bounds() {
        let governor = RateGovernor::new(config(100, 10, 150, Duration::from_secs(60)));
        for bytes in [0, MIB, 3 * MIB, 8 * MIB, 20 * MIB] {
            let delay = governor.delay_for(bytes);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_throttle_doubles_and_caps() {
        let mut governor = RateGovernor::new(config(100, 10, 500, Duration::from_secs(60)));

        let before = governor.delay_for(0);
        governor.note_throttle();
        assert_eq!(governor.current_delay(), Duration::from_millis(200));
        assert!(governor.delay_for(0) >= before);

        governor.note_throttle();
        assert_eq!(governor.current_delay(), Duration::from_millis(400));
        governor.note_throttle();
        // Capped at max_delay
        assert_eq!(governor.current_delay(), Duration::from_millis(500));
        assert_eq!(governor.consecutive_throttles(), 3);
    }

    #[test]
    fn test_success_decays_after_recovery_window() {
        let mut governor = RateGovernor::new(config(100, 10, 500, Duration::ZERO));
        governor.note_throttle();
        assert_eq!(governor.current_delay(), Duration::from_millis(200));

        // Recovery period of zero has elapsed by the time the next send lands
        std::thread::sleep(Duration::from_millis(2));
        governor.note_success();
        assert_eq!(governor.current_delay(), Duration::from_millis(180));
        assert_eq!(governor.consecutive_throttles(), 0);

        governor.note_success();
        assert_eq!(governor.current_delay(), Duration::from_millis(162));
    }

    #[test]
    fn test_success_inside_recovery_window_keeps_delay() {
        let mut governor = RateGovernor::new(config(100, 10, 500, Duration::from_secs(3600)));
        governor.note_throttle();
        governor.note_success();
        assert_eq!(governor.current_delay(), Duration::from_millis(200));
        assert_eq!(governor.consecutive_throttles(), 1);
    }

    #[test]
    fn test_decay_floors_at_min_delay() {
        let mut governor = RateGovernor::new(config(12, 10, 500, Duration::ZERO));
        for _ in 0..10 {
            governor.note_success();
        }
        assert_eq!(governor.current_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_throttle_classification_by_message() {
        for message in [
            "Rate limit exceeded for this identity",
            "throttled by upstream",
            "Quota exceeded",
            "please SLOW DOWN",
            "503 service unavailable",
        ] {
            let err = ProviderError::transport(None, message);
            assert!(is_throttle(&err), "{message} should classify as throttle");
        }

        let err = ProviderError::rejected(None, "mailbox does not exist");
        assert!(!is_throttle(&err));
    }

    #[test]
    fn test_throttle_classification_by_code() {
        for code in ["Throttling", "ServiceUnavailable", "SlowDown", "TooManyRequests"] {
            let err = ProviderError::rejected(Some(code.to_string()), "denied");
            assert!(is_throttle(&err), "{code} should classify as throttle");
        }

        let err = ProviderError::rejected(Some("MessageRejected".to_string()), "denied");
        assert!(!is_throttle(&err));
    }
}
