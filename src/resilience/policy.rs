//! Retry and gas policies shared by the submitters.

use std::time::Duration;

use crate::config::SafeConfig;
use crate::resilience::backoff::calculate_backoff;

/// Safety margin applied to a plain gas estimate.
pub const ESTIMATE_MARGIN: f64 = 1.1;
/// Gas used when a plain transfer cannot be estimated.
pub const DEFAULT_TRANSFER_GAS: u64 = 21_000;
/// Gas used when a contract execution cannot be estimated.
pub const DEFAULT_CONTRACT_GAS: u64 = 500_000;

/// Pick `explicit`, then `configured`, then `default`. Zero counts as unset.
pub fn resolve_setting<T>(explicit: Option<T>, configured: Option<T>, default: T) -> T
where
    T: PartialEq + Default + Copy,
{
    let unset = T::default();
    explicit
        .filter(|v| *v != unset)
        .or(configured.filter(|v| *v != unset))
        .unwrap_or(default)
}

/// Gas growth rules: multiply by `buffer`, never exceed `cap_multiplier`
/// times the first non-zero value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasPolicy {
    pub buffer: f64,
    pub cap_multiplier: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            buffer: 1.5,
            cap_multiplier: 10,
        }
    }
}

impl GasPolicy {
    /// Next gas limit after a gas-too-low failure.
    pub fn bump(&self, current: u64, original: u64) -> u64 {
        let next = (current as f64 * self.buffer).round() as u64;
        self.cap(next, original)
    }

    /// Apply the buffer to a fresh estimate.
    pub fn buffered(&self, estimate: u64, original: u64) -> u64 {
        self.bump(estimate, original)
    }

    pub fn cap(&self, gas: u64, original: u64) -> u64 {
        if original == 0 {
            return gas;
        }
        gas.min(original.saturating_mul(self.cap_multiplier))
    }
}

/// Resolved retry settings for one submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub gas: GasPolicy,
}

/// Per-call overrides; `None` or zero falls through to configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub gas_buffer: Option<f64>,
}

impl RetryPolicy {
    pub const DEFAULT_SAFE_RETRIES: u32 = 6;

    pub fn resolve(overrides: RetryOverrides, config: &SafeConfig) -> Self {
        let defaults = GasPolicy::default();
        Self {
            max_retries: resolve_setting(
                overrides.max_retries,
                Some(config.max_retries),
                Self::DEFAULT_SAFE_RETRIES,
            ),
            base_delay: Duration::from_millis(resolve_setting(
                None,
                Some(config.retry_base_delay_ms),
                1_000,
            )),
            max_delay: Duration::from_millis(resolve_setting(
                None,
                Some(config.retry_max_delay_ms),
                60_000,
            )),
            gas: GasPolicy {
                buffer: resolve_setting(overrides.gas_buffer, Some(config.gas_buffer), defaults.buffer),
                cap_multiplier: resolve_setting(
                    None,
                    Some(config.gas_cap_multiplier),
                    defaults.cap_multiplier,
                ),
            },
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt + 1,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_bump_is_monotonic_and_capped() {
        let policy = GasPolicy::default();
        assert_eq!(policy.bump(21_000, 21_000), 31_500);

        let mut gas = 21_000;
        for _ in 0..20 {
            let next = policy.bump(gas, 21_000);
            assert!(next >= gas);
            assert!(next <= 210_000);
            gas = next;
        }
        assert_eq!(gas, 210_000);
    }

    #[test]
    fn test_cap_without_original() {
        assert_eq!(GasPolicy::default().cap(1_000_000, 0), 1_000_000);
    }

    #[test]
    fn test_resolve_precedence() {
        assert_eq!(resolve_setting(Some(3), Some(5), 6), 3);
        assert_eq!(resolve_setting(None, Some(5), 6), 5);
        assert_eq!(resolve_setting(None, None, 6), 6);
        // zero means unset, not "no retries"
        assert_eq!(resolve_setting(Some(0), Some(5), 6), 5);
        assert_eq!(resolve_setting(Some(0), Some(0), 6), 6);
        assert_eq!(resolve_setting(Some(0.0), None, 1.5), 1.5);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = SafeConfig {
            max_retries: 4,
            gas_buffer: 2.0,
            ..SafeConfig::default()
        };
        let policy = RetryPolicy::resolve(RetryOverrides::default(), &config);
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.gas.buffer, 2.0);

        let policy = RetryPolicy::resolve(
            RetryOverrides { max_retries: Some(2), gas_buffer: None },
            &config,
        );
        assert_eq!(policy.max_retries, 2);
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::resolve(RetryOverrides::default(), &SafeConfig::default());
        assert!(policy.delay(0) >= Duration::from_secs(1));
        assert!(policy.delay(2) >= Duration::from_secs(4));
    }
}
