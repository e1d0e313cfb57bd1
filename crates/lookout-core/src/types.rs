use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Label used for a face that matches no reference.
pub const UNKNOWN_NAME: &str = "Unknown";

/// A detected face in frame pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Eyes (left, right), nose tip, mouth corners (left, right).
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Corners as `(top, right, bottom, left)` pixel coordinates, clamped to zero.
    pub fn trbl(&self) -> (i32, i32, i32, i32) {
        let px = |v: f32| v.max(0.0).round() as i32;
        (
            px(self.y),
            px(self.x + self.width),
            px(self.y + self.height),
            px(self.x),
        )
    }
}

/// Face encoding. ArcFace produces 512 values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Encoder that produced the values, when known.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    fn dot(&self, other: &Embedding) -> f32 {
        self.values.iter().zip(&other.values).map(|(a, b)| a * b).sum()
    }

    fn norm(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Cosine of the angle between two encodings; 0.0 if either is all zeros.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let lengths = self.norm() * other.norm();
        if lengths == 0.0 {
            return 0.0;
        }
        self.dot(other) / lengths
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        let squared: f32 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| {
                let d = a - b;
                d * d
            })
            .sum();
        squared.sqrt()
    }
}

/// One entry of the reference registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    /// File stem of the reference image.
    pub name: String,
    pub embedding: Embedding,
    /// Image the encoding was computed from.
    pub source: PathBuf,
}

/// How a probe encoding fared against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the chosen entry, or to the closest one on a miss.
    pub distance: f32,
    pub index: Option<usize>,
    pub name: Option<String>,
}

impl MatchResult {
    fn unmatched(closest: Option<f32>) -> Self {
        Self {
            matched: false,
            distance: closest.unwrap_or(0.0),
            index: None,
            name: None,
        }
    }

    fn found(entry: &Reference, index: usize, distance: f32) -> Self {
        Self {
            matched: true,
            distance,
            index: Some(index),
            name: Some(entry.name.clone()),
        }
    }

    /// Resolved display name, `"Unknown"` when nothing matched.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_NAME)
    }
}

/// Strategy for comparing a probe encoding against the reference gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[Reference], tolerance: f32) -> MatchResult;
}

fn distances<'a>(probe: &'a Embedding, gallery: &'a [Reference]) -> impl Iterator<Item = (usize, f32)> + 'a {
    gallery
        .iter()
        .enumerate()
        .map(move |(i, r)| (i, probe.euclidean_distance(&r.embedding)))
}

/// Registry order decides: the first entry within `tolerance` wins even if a
/// later one is closer.
pub struct FirstMatcher;

impl Matcher for FirstMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[Reference], tolerance: f32) -> MatchResult {
        let mut closest: Option<f32> = None;
        for (i, distance) in distances(probe, gallery) {
            if distance <= tolerance {
                return MatchResult::found(&gallery[i], i, distance);
            }
            closest = Some(closest.map_or(distance, |c| c.min(distance)));
        }
        MatchResult::unmatched(closest)
    }
}

/// The closest entry wins if it is within `tolerance`. Ties go to the
/// earlier entry.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[Reference], tolerance: f32) -> MatchResult {
        let nearest = distances(probe, gallery)
            .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            });

        match nearest {
            Some((i, d)) if d <= tolerance => MatchResult::found(&gallery[i], i, d),
            other => MatchResult::unmatched(other.map(|(_, d)| d)),
        }
    }
}

/// Which registry entry a face resolves to when several are within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    First,
    #[default]
    Nearest,
}

impl Matcher for MatchPolicy {
    fn compare(&self, probe: &Embedding, gallery: &[Reference], tolerance: f32) -> MatchResult {
        match self {
            MatchPolicy::First => FirstMatcher.compare(probe, gallery, tolerance),
            MatchPolicy::Nearest => NearestMatcher.compare(probe, gallery, tolerance),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "nearest" => Ok(MatchPolicy::Nearest),
            other => Err(format!("unknown match policy: {other} (expected first or nearest)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str, values: Vec<f32>) -> Reference {
        Reference {
            name: name.into(),
            embedding: Embedding::new(values),
            source: PathBuf::from(format!("{name}.jpg")),
        }
    }

    fn far_then_exact() -> Vec<Reference> {
        vec![reference("far", vec![1.5, 0.0]), reference("exact", vec![1.0, 0.0])]
    }

    #[test]
    fn similarity_of_parallel_and_zero_vectors() {
        let x = Embedding::new(vec![2.0, 0.0, 0.0]);
        assert!((x.similarity(&Embedding::new(vec![0.5, 0.0, 0.0])) - 1.0).abs() < 1e-6);
        assert_eq!(Embedding::new(vec![0.0, 0.0, 0.0]).similarity(&x), 0.0);
    }

    #[test]
    fn euclidean_distance_is_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn first_policy_stops_at_first_entry_within_tolerance() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = FirstMatcher.compare(&probe, &far_then_exact(), 0.6);
        assert_eq!((result.label(), result.index), ("far", Some(0)));
        assert!((result.distance - 0.5).abs() < 1e-6);
    }

    #[test]
    fn nearest_policy_prefers_closest_entry() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = NearestMatcher.compare(&probe, &far_then_exact(), 0.6);
        assert!(result.matched);
        assert_eq!((result.label(), result.index), ("exact", Some(1)));
    }

    #[test]
    fn nearest_policy_breaks_ties_by_order() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![reference("a", vec![1.0, 0.0]), reference("b", vec![0.0, 1.0])];
        assert_eq!(NearestMatcher.compare(&probe, &gallery, 2.0).label(), "a");
    }

    #[test]
    fn miss_reports_closest_distance() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![reference("other", vec![-1.0, 0.0]), reference("worse", vec![-3.0, 0.0])];
        for policy in [MatchPolicy::First, MatchPolicy::Nearest] {
            let result = policy.compare(&probe, &gallery, 0.6);
            assert!(!result.matched);
            assert_eq!(result.label(), UNKNOWN_NAME);
            assert!((result.distance - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_gallery_never_matches() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        for policy in [MatchPolicy::First, MatchPolicy::Nearest] {
            assert_eq!(policy.compare(&probe, &[], 0.6), MatchResult::unmatched(None));
        }
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("first".parse::<MatchPolicy>(), Ok(MatchPolicy::First));
        assert_eq!("Nearest".parse::<MatchPolicy>(), Ok(MatchPolicy::Nearest));
        assert!("best".parse::<MatchPolicy>().is_err());
    }

    #[test]
    fn trbl_clamps_negative_coordinates() {
        let b = BoundingBox {
            x: -4.0,
            y: 10.0,
            width: 20.0,
            height: 30.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert_eq!(b.trbl(), (10, 16, 40, 0));
    }
}
