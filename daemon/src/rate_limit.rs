use governor::{clock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;

use crate::config::RateLimitConfig;

/// Token bucket over socket button presses, so a stuck client or a script
/// cannot flood the session queue.
pub struct CommandRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock>,
    enabled: bool,
}

impl CommandRateLimiter {
    /// # Panics
    /// Panics if `commands_per_second` or `burst_capacity` is 0.
    pub fn new(commands_per_second: u32, burst_capacity: u32, enabled: bool) -> Self {
        let quota = Quota::per_second(Self::non_zero(commands_per_second))
            .allow_burst(Self::non_zero(burst_capacity));

        Self {
            limiter: RateLimiter::direct(quota),
            enabled,
        }
    }

    /// Zero rates in the config disable limiting instead of panicking.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let usable = config.commands_per_second > 0 && config.burst_capacity > 0;
        if usable {
            Self::new(
                config.commands_per_second,
                config.burst_capacity,
                config.enabled,
            )
        } else {
            tracing::warn!("Rate limit values must be non-zero; rate limiting disabled");
            Self::new(1, 1, false)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Non-blocking: true if a press may go through now.
    pub fn check(&self) -> bool {
        if !self.enabled {
            return true;
        }

        self.limiter.check().is_ok()
    }

    fn non_zero(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).expect("commands_per_second and burst_capacity must be non-zero")
    }
}
