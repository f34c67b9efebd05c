//! SIMD distance kernels built on `wide::f32x8`.
//!
//! Inputs are processed eight lanes at a time; the tail that does not fill a
//! full register is folded in with scalar arithmetic.

use wide::f32x8;

const LANES: usize = 8;

#[inline]
fn load(chunk: &[f32]) -> f32x8 {
    let mut buf = [0.0f32; LANES];
    buf.copy_from_slice(chunk);
    f32x8::new(buf)
}

/// SIMD-optimized dot product for vectors.
///
/// Both slices must have the same length; extra elements of the longer slice
/// are ignored.
pub fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);

    let mut sum = f32x8::splat(0.0);
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let a_rem = a_chunks.remainder();
    let b_rem = b_chunks.remainder();

    for (ca, cb) in a_chunks.zip(b_chunks) {
        sum += load(ca) * load(cb);
    }

    // Sum the SIMD register
    let mut result = sum.to_array().iter().sum::<f32>();
    for (x, y) in a_rem.iter().zip(b_rem) {
        result += x * y;
    }
    result
}

/// SIMD-optimized squared Euclidean distance.
pub fn squared_l2_simd(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);

    let mut sum = f32x8::splat(0.0);
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let a_rem = a_chunks.remainder();
    let b_rem = b_chunks.remainder();

    for (ca, cb) in a_chunks.zip(b_chunks) {
        let diff = load(ca) - load(cb);
        sum += diff * diff;
    }

    let mut result = sum.to_array().iter().sum::<f32>();
    for (x, y) in a_rem.iter().zip(b_rem) {
        let d = x - y;
        result += d * d;
    }
    result
}

/// SIMD-optimized sum of squares (squared L2 norm).
pub fn squared_norm_simd(vector: &[f32]) -> f32 {
    dot_product_simd(vector, vector)
}
