//! CPU-throttled background compression.

mod cpu;
mod queue;

pub use cpu::{CpuSampler, FixedCpuSampler, SystemCpuSampler};
pub use queue::CompressionQueue;
