//! Concrete transport implementations.

pub mod vllm;

pub use vllm::VllmProvider;
