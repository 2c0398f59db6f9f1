/// Little-endian f32 blob, the form `sqlite-vec` reads for `float[N]`
/// columns and `MATCH` arguments.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine distance from `vec0` (0.0 identical, 2.0 opposite) back to a
/// similarity in [-1.0, 1.0].
pub fn similarity_from_distance(distance: f64) -> f32 {
    (1.0 - distance).clamp(-1.0, 1.0) as f32
}
