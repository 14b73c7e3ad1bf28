//! Environment-variable configuration for the coroutine runtime.
//!
//! ## `WIREHOUND_STACK_SIZE`
//!
//! Stack size for worker and detector coroutines, decimal (`65536`) or hex
//! (`0x10000`). Default: 64 KB. Larger stacks tolerate deeper call chains;
//! smaller stacks cut memory when running many coroutines.

use std::env;

/// Runtime configuration loaded from environment variables.
///
/// Load once at startup with [`RuntimeConfig::from_env()`] and apply via
/// `may::config().set_stack_size(..)` before any coroutine spawns.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes (default: 64 KB / 0x10000)
    pub stack_size: usize,
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let stack_size = match env::var("WIREHOUND_STACK_SIZE") {
            Ok(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(0x10000)
                } else {
                    val.parse().unwrap_or(0x10000)
                }
            }
            Err(_) => 0x10000,
        };
        RuntimeConfig { stack_size }
    }
}
