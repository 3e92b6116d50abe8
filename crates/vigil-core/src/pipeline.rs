//! Per-frame match decision.

use crate::matcher::FaceMatcher;
use crate::types::{confidence_from_distance, Encoding, MatchResult, Suspect};
use std::sync::Arc;
use vigil_hw::Frame;

/// Linear downsample factor applied before detection.
pub const DEFAULT_DOWNSCALE: u32 = 4;

/// Default distance bound for accepting a match.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Downsamples, detects, and picks the closest registered suspect.
pub struct MatchPipeline {
    matcher: Arc<dyn FaceMatcher>,
    downscale: u32,
}

impl MatchPipeline {
    pub fn new(matcher: Arc<dyn FaceMatcher>, downscale: u32) -> Self {
        Self { matcher, downscale }
    }

    pub fn matcher(&self) -> &Arc<dyn FaceMatcher> {
        &self.matcher
    }

    /// Evaluate one frame against a registry snapshot.
    ///
    /// A face is accepted iff its closest suspect lies at `distance < threshold`.
    /// Faces are checked in detector order and the first accepted one is
    /// returned. Detection errors are logged and yield no match.
    pub fn evaluate(&self, frame: Arc<Frame>, suspects: &[Suspect], threshold: f32) -> MatchResult {
        if suspects.is_empty() {
            return MatchResult::no_match(frame, None);
        }

        let small = frame.downsample(self.downscale);
        let encodings = match self.matcher.detect_and_encode(&small) {
            Ok(encodings) => encodings,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "detection failed; treating frame as no match");
                return MatchResult::no_match(frame, None);
            }
        };

        let mut closest: Option<f32> = None;

        for (face, encoding) in encodings.iter().enumerate() {
            let Some((idx, distance)) = self.best_match(encoding, suspects) else {
                continue;
            };

            if distance < threshold {
                let suspect = &suspects[idx];
                tracing::debug!(
                    face,
                    suspect = %suspect.name,
                    distance,
                    threshold,
                    "face matched"
                );
                return MatchResult {
                    suspect: Some(suspect.clone()),
                    distance: Some(distance),
                    confidence: confidence_from_distance(distance),
                    frame,
                };
            }

            closest = Some(closest.map_or(distance, |c| c.min(distance)));
        }

        if !encodings.is_empty() {
            tracing::trace!(faces = encodings.len(), ?closest, threshold, "no face under threshold");
        }
        MatchResult::no_match(frame, closest)
    }

    /// `argmin` of the distance to every suspect. Ties keep the earlier suspect.
    ///
    /// Suspects whose encoding is not comparable with `probe`, and non-finite
    /// distances, are skipped.
    fn best_match(&self, probe: &Encoding, suspects: &[Suspect]) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, suspect) in suspects.iter().enumerate() {
            if !probe.is_comparable(&suspect.encoding) {
                tracing::debug!(
                    suspect = %suspect.name,
                    probe_len = probe.len(),
                    suspect_len = suspect.encoding.len(),
                    "encoding dimensions differ; skipping"
                );
                continue;
            }
            let d = self.matcher.distance(probe, &suspect.encoding);
            if !d.is_finite() {
                tracing::debug!(suspect = %suspect.name, distance = d, "non-finite distance; skipping");
                continue;
            }
            if best.map_or(true, |(_, b)| d < b) {
                best = Some((i, d));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatcherError;
    use crate::types::{Encoding, SuspectId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns scripted encodings; distance is the absolute difference of the
    /// first component, so tests can dial in exact distances.
    #[derive(Default)]
    struct FakeMatcher {
        faces: Vec<Encoding>,
        fail: bool,
        calls: AtomicUsize,
        seen_dims: Mutex<Option<(u32, u32)>>,
    }

    impl FakeMatcher {
        fn with_faces(values: &[f32]) -> Self {
            Self {
                faces: values.iter().map(|&v| Encoding::new(vec![v])).collect(),
                ..Default::default()
            }
        }
    }

    impl FaceMatcher for FakeMatcher {
        fn detect_and_encode(&self, frame: &Frame) -> Result<Vec<Encoding>, MatcherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_dims.lock().unwrap() = Some((frame.width, frame.height));
            if self.fail {
                return Err(MatcherError::Detection("model exploded".into()));
            }
            Ok(self.faces.clone())
        }

        fn distance(&self, a: &Encoding, b: &Encoding) -> f32 {
            (a.values[0] - b.values[0]).abs()
        }
    }

    fn frame() -> Arc<Frame> {
        Arc::new(Frame::from_gray(vec![0; 64 * 48], 64, 48).unwrap())
    }

    fn suspects(values: &[(&str, f32)]) -> Vec<Suspect> {
        values
            .iter()
            .enumerate()
            .map(|(i, (name, v))| Suspect {
                id: SuspectId(i),
                name: name.to_string(),
                details: format!("details for {name}"),
                encoding: Encoding::new(vec![*v]),
            })
            .collect()
    }

    fn pipeline(matcher: FakeMatcher) -> (MatchPipeline, Arc<FakeMatcher>) {
        let matcher = Arc::new(matcher);
        (MatchPipeline::new(matcher.clone(), DEFAULT_DOWNSCALE), matcher)
    }

    #[test]
    fn test_empty_registry_skips_detection() {
        let (p, m) = pipeline(FakeMatcher::with_faces(&[0.0]));
        let result = p.evaluate(frame(), &[], 0.9);
        assert!(!result.is_match());
        assert_eq!(m.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_closest_of_two_suspects() {
        // A at distance 0.9, B at distance 0.4 from the probe.
        let (p, _) = pipeline(FakeMatcher::with_faces(&[1.0]));
        let gallery = suspects(&[("A", 0.1), ("B", 0.6)]);

        let result = p.evaluate(frame(), &gallery, 0.6);

        assert_eq!(result.suspect_id(), Some(SuspectId(1)));
        assert_eq!(result.suspect.as_ref().unwrap().name, "B");
        assert!((result.confidence - 0.6).abs() < 1e-6);
        assert!((result.distance.unwrap() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_monotonic() {
        let gallery = suspects(&[("A", 0.0)]);
        let (p, _) = pipeline(FakeMatcher::with_faces(&[0.5]));

        // d = 0.5: accepted under 0.6, rejected under 0.5 (strict) and 0.4.
        assert!(p.evaluate(frame(), &gallery, 0.6).is_match());
        assert!(!p.evaluate(frame(), &gallery, 0.5).is_match());
        assert!(!p.evaluate(frame(), &gallery, 0.4).is_match());

        for t2 in [0.55f32, 0.7, 0.9] {
            for t1 in [0.3f32, 0.45, 0.5] {
                let accepted_t2 = p.evaluate(frame(), &gallery, t2).is_match();
                let accepted_t1 = p.evaluate(frame(), &gallery, t1).is_match();
                assert!(accepted_t2 && !accepted_t1, "t1={t1} t2={t2}");
            }
        }
    }

    #[test]
    fn test_rejected_reports_closest_distance() {
        let (p, _) = pipeline(FakeMatcher::with_faces(&[0.8, 0.7]));
        let result = p.evaluate(frame(), &suspects(&[("A", 0.0)]), 0.6);
        assert!(!result.is_match());
        assert!((result.distance.unwrap() - 0.7).abs() < 1e-6);
        assert!((result.confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_first_accepted_face_wins() {
        // Face 0 misses, face 1 matches A, face 2 matches B even more closely.
        let (p, _) = pipeline(FakeMatcher::with_faces(&[5.0, 0.15, 0.95]));
        let gallery = suspects(&[("A", 0.1), ("B", 1.0)]);

        let result = p.evaluate(frame(), &gallery, 0.6);
        assert_eq!(result.suspect.unwrap().name, "A");
    }

    #[test]
    fn test_detection_error_is_no_match() {
        let (p, m) = pipeline(FakeMatcher {
            fail: true,
            ..FakeMatcher::with_faces(&[0.0])
        });
        let result = p.evaluate(frame(), &suspects(&[("A", 0.0)]), 0.6);
        assert!(!result.is_match());
        assert_eq!(m.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_faces_is_no_match() {
        let (p, _) = pipeline(FakeMatcher::with_faces(&[]));
        let result = p.evaluate(frame(), &suspects(&[("A", 0.0)]), 0.6);
        assert!(!result.is_match());
        assert!(result.distance.is_none());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_frame_downsampled_before_detection() {
        let (p, m) = pipeline(FakeMatcher::with_faces(&[]));
        p.evaluate(frame(), &suspects(&[("A", 0.0)]), 0.6);
        assert_eq!(*m.seen_dims.lock().unwrap(), Some((16, 12)));
    }

    /// Returns fixed encodings and keeps the default Euclidean distance.
    struct FixedEncoder(Vec<Encoding>);

    impl FaceMatcher for FixedEncoder {
        fn detect_and_encode(&self, _frame: &Frame) -> Result<Vec<Encoding>, MatcherError> {
            Ok(self.0.clone())
        }
    }

    fn suspect_with(encoding: Encoding) -> Vec<Suspect> {
        vec![Suspect {
            id: SuspectId(0),
            name: "A".to_string(),
            details: String::new(),
            encoding,
        }]
    }

    #[test]
    fn test_empty_suspect_encoding_never_matches() {
        let p = MatchPipeline::new(
            Arc::new(FixedEncoder(vec![Encoding::new(vec![0.3; 128])])),
            DEFAULT_DOWNSCALE,
        );
        let result = p.evaluate(frame(), &suspect_with(Encoding::new(vec![])), 0.6);
        assert!(!result.is_match());
        assert!(result.distance.is_none());
    }

    #[test]
    fn test_dimension_mismatch_skipped() {
        let p = MatchPipeline::new(
            Arc::new(FixedEncoder(vec![
                Encoding::new(vec![]),
                Encoding::new(vec![0.1; 8]),
                Encoding::new(vec![0.0; 4]),
            ])),
            DEFAULT_DOWNSCALE,
        );
        let result = p.evaluate(frame(), &suspect_with(Encoding::new(vec![0.1; 4])), 0.6);
        // Only the 4-d face is compared: sqrt(4 * 0.01) = 0.2.
        assert!(result.is_match());
        assert!((result.distance.unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_distance_does_not_hide_matches() {
        let (p, _) = pipeline(FakeMatcher::with_faces(&[0.45]));
        let gallery = suspects(&[("Broken", f32::NAN), ("B", 0.5)]);

        let result = p.evaluate(frame(), &gallery, 0.6);
        assert_eq!(result.suspect.unwrap().name, "B");
        assert!((result.distance.unwrap() - 0.05).abs() < 1e-6);
    }
}
