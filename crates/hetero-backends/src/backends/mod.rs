//! Built-in backend implementations
//!
//! Only the CPU kinds ship with the runtime. Accelerator kinds are bound by
//! registering a factory with [`crate::BackendRegistry`].

pub mod cpu;

pub use cpu::CpuBackend;
