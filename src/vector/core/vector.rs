//! Row-major vector batches.

use crate::error::{Result, VicinityError};

/// A borrowed batch of vectors laid out row-major in one flat slice.
///
/// Row `i` occupies `data[i * dim..(i + 1) * dim]`. Indexes copy the rows they
/// need, so the caller's buffer is free to change once a call returns.
#[derive(Debug, Clone, Copy)]
pub struct VectorBatch<'a> {
    data: &'a [f32],
    dim: usize,
}

impl<'a> VectorBatch<'a> {
    /// Wrap `data` as rows of `dim` components.
    pub fn new(data: &'a [f32], dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(VicinityError::invalid_argument("Batch dimension must be > 0"));
        }
        if data.len() % dim != 0 {
            return Err(VicinityError::invalid_argument(format!(
                "Batch length {} is not a multiple of dimension {}",
                data.len(),
                dim
            )));
        }
        Ok(Self { data, dim })
    }

    /// A batch holding a single vector.
    pub fn single(vector: &'a [f32]) -> Result<Self> {
        Self::new(vector, vector.len())
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `index`. Panics when out of range, like slice indexing.
    #[inline]
    pub fn row(&self, index: usize) -> &'a [f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &'a [f32]> + 'a {
        self.data.chunks_exact(self.dim)
    }

    pub fn as_slice(&self) -> &'a [f32] {
        self.data
    }
}
