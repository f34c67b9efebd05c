//! Core data structures for vector search.
//!
//! This module contains the distance abstraction shared by every index type
//! and the row-major batch view used to pass vectors in and out.

pub mod distance;
pub mod vector;
