//! Storage form for chunk embeddings.
//!
//! A contract corpus accumulates one 768-dim float32 vector per chunk;
//! persisting them raw costs 3 KiB each. Stored vectors are instead kept as
//! uint8 bytes plus the per-vector linear map back to float32, a 4x cut
//! whose rounding error is well below what moves a cosine ranking.

use ndarray::Array1;

/// A chunk embedding as it lives in the `chunk_embeddings` table:
/// uint8 bytes plus the map `value ≈ byte * scale + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedEmbedding {
    pub bytes: Vec<u8>,
    pub scale: f32,
    pub offset: f32,
}

impl QuantizedEmbedding {
    /// Quantize a float32 vector, mapping its [min, max] span onto [0, 255].
    pub fn from_vector(embedding: &Array1<f32>) -> Self {
        let mut min_val = f32::INFINITY;
        let mut max_val = f32::NEG_INFINITY;
        for &v in embedding {
            min_val = min_val.min(v);
            max_val = max_val.max(v);
        }

        let range = max_val - min_val;
        if !(range > 1e-9) {
            // Constant or empty vector: every byte decodes to min_val
            return Self {
                bytes: vec![0u8; embedding.len()],
                scale: 0.0,
                offset: if min_val.is_finite() { min_val } else { 0.0 },
            };
        }

        let scale = range / f32::from(u8::MAX);
        let bytes = embedding
            .iter()
            .map(|&v| ((v - min_val) / scale).round().clamp(0.0, 255.0) as u8)
            .collect();

        Self {
            bytes,
            scale,
            offset: min_val,
        }
    }

    /// Reassemble a stored embedding from its persisted columns.
    pub fn from_parts(bytes: Vec<u8>, scale: f32, offset: f32) -> Self {
        Self {
            bytes,
            scale,
            offset,
        }
    }

    /// Decode back to float32.
    pub fn to_vector(&self) -> Array1<f32> {
        Array1::from_iter(
            self.bytes
                .iter()
                .map(|&b| f32::from(b) * self.scale + self.offset),
        )
    }

    pub fn dimension(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Synthetic 768-dim vector in the magnitude range nomic-embed-text
    /// actually produces.
    fn contract_like_vector() -> Array1<f32> {
        Array1::from_iter((0..768).map(|i| (i as f32 * 0.37).sin() * 0.08))
    }

    #[test]
    fn test_full_dim_roundtrip_within_quantization_step() {
        let original = contract_like_vector();
        let stored = QuantizedEmbedding::from_vector(&original);
        assert_eq!(stored.dimension(), 768);

        let restored = stored.to_vector();
        assert_eq!(restored.len(), 768);
        // Each value lands within half a quantization step of the original
        let tolerance = stored.scale * 0.5 + 1e-6;
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() <= tolerance, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_extreme_range_values_survive() {
        let original = array![-82.5, -0.004, 0.0, 0.003, 79.25];
        let stored = QuantizedEmbedding::from_vector(&original);
        let restored = stored.to_vector();

        // A ~160-unit span quantizes in steps of ~0.63; endpoints decode
        // exactly, interior values within one step.
        assert!((restored[0] - original[0]).abs() < 1e-3);
        assert!((restored[4] - original[4]).abs() < 1e-3);
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() <= stored.scale, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_constant_vector_decodes_exactly() {
        let stored = QuantizedEmbedding::from_vector(&array![0.5, 0.5, 0.5]);
        assert_eq!(stored.scale, 0.0);
        assert_eq!(stored.offset, 0.5);
        assert!(stored.bytes.iter().all(|&b| b == 0));
        assert_eq!(stored.to_vector(), array![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_parts_roundtrip_through_storage_columns() {
        let stored = QuantizedEmbedding::from_vector(&contract_like_vector());
        let reloaded =
            QuantizedEmbedding::from_parts(stored.bytes.clone(), stored.scale, stored.offset);
        assert_eq!(reloaded, stored);
    }
}
