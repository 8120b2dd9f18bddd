use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::System;

/// Source of system-wide CPU usage for the compression throttle.
#[async_trait]
pub trait CpuSampler: Send + Sync {
    /// Current CPU usage in percent (0-100).
    async fn sample(&self) -> f32;
}

/// Samples real CPU usage through `sysinfo`.
///
/// A measurement needs two refreshes separated by sysinfo's minimum update
/// interval, so sampling runs on the blocking pool.
pub struct SystemCpuSampler {
    system: Arc<Mutex<System>>,
}

impl SystemCpuSampler {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SystemCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CpuSampler for SystemCpuSampler {
    async fn sample(&self) -> f32 {
        let system = Arc::clone(&self.system);
        let sampled = tokio::task::spawn_blocking(move || {
            let mut system = system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_cpu();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            system.refresh_cpu();
            system.global_cpu_info().cpu_usage()
        })
        .await;

        match sampled {
            Ok(usage) => usage,
            Err(e) => {
                // report busy so the queue backs off
                tracing::warn!("[CompressionQueue] CPU sampling failed: {}", e);
                100.0
            }
        }
    }
}

/// A sampler reporting a value set by the caller.
///
/// Useful for hosts that already track load themselves, and for tests.
#[derive(Debug, Default)]
pub struct FixedCpuSampler {
    usage_bits: AtomicU32,
}

impl FixedCpuSampler {
    pub fn new(usage: f32) -> Self {
        Self {
            usage_bits: AtomicU32::new(usage.to_bits()),
        }
    }

    pub fn set(&self, usage: f32) {
        self.usage_bits.store(usage.to_bits(), Ordering::Relaxed);
    }
}

#[async_trait]
impl CpuSampler for FixedCpuSampler {
    async fn sample(&self) -> f32 {
        f32::from_bits(self.usage_bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_sampler() {
        let sampler = FixedCpuSampler::new(42.5);
        assert_eq!(sampler.sample().await, 42.5);
        sampler.set(3.0);
        assert_eq!(sampler.sample().await, 3.0);
    }

    #[tokio::test]
    async fn test_system_sampler_in_range() {
        let usage = SystemCpuSampler::new().sample().await;
        assert!(usage >= 0.0 || usage.is_nan());
    }
}
