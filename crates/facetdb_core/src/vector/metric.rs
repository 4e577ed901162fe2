//! Distance metrics for vector search.

/// How embedding distance is measured. All metrics are normalized so
/// that lower scores mean closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    L2,
    /// `1 - cosine similarity`; zero vectors score as farthest.
    Cosine,
    /// Negated inner product.
    Dot,
}

impl DistanceMetric {
    /// Stable name, used in the manifest.
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
        }
    }

    /// Parses a manifest name.
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "l2" => Some(DistanceMetric::L2),
            "cosine" => Some(DistanceMetric::Cosine),
            "dot" => Some(DistanceMetric::Dot),
            _ => None,
        }
    }

    /// Scores two same-length vectors; lower is closer.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = x - y;
                    d * d
                })
                .sum(),
            DistanceMetric::Cosine => {
                let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                if norm_a == 0.0 || norm_b == 0.0 {
                    return f32::MAX;
                }
                1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
            }
            DistanceMetric::Dot => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_is_squared_distance() {
        let d = DistanceMetric::L2.distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 25.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_parallel_vectors_is_zero() {
        let d = DistanceMetric::Cosine.distance(&[1.0, 2.0], &[2.0, 4.0]);
        assert!(d.abs() < 1e-6);
        let opposite = DistanceMetric::Cosine.distance(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((opposite - 2.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_treats_zero_vectors_as_farthest() {
        assert_eq!(DistanceMetric::Cosine.distance(&[0.0, 0.0], &[1.0, 0.0]), f32::MAX);
    }

    #[test]
    fn dot_ranks_larger_products_closer() {
        let near = DistanceMetric::Dot.distance(&[1.0, 1.0], &[2.0, 2.0]);
        let far = DistanceMetric::Dot.distance(&[1.0, 1.0], &[0.1, 0.1]);
        assert!(near < far);
    }

    #[test]
    fn names_round_trip() {
        for metric in [DistanceMetric::L2, DistanceMetric::Cosine, DistanceMetric::Dot] {
            assert_eq!(DistanceMetric::from_str(metric.as_str()), Some(metric));
        }
        assert_eq!(DistanceMetric::from_str("hamming"), None);
    }
}
