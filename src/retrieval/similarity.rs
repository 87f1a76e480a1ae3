// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{Error, Result};

/// Computes cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]. A zero-magnitude input scores exactly 0, as
/// does any input holding non-finite components. Sums are accumulated in
/// `f64` so very large or very small components neither overflow nor
/// underflow.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot_product = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let magnitude = norm_a.sqrt() * norm_b.sqrt();
    if magnitude == 0.0 || !magnitude.is_finite() || !dot_product.is_finite() {
        return Ok(0.0);
    }

    let similarity = (dot_product / magnitude).clamp(-1.0, 1.0) as f32;
    // fold -0.0 into 0.0 so ranking ties stay in storage order
    Ok(similarity + 0.0)
}
