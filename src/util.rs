//! Shared utility modules used across Vicinity components.

pub mod simd;
