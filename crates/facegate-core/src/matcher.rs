//! Nearest-reference matching with a fixed rejection threshold.
//!
//! The live descriptor is the query and the references are the corpus.
//! Reference sets are small, so every candidate is scanned; no index.

use crate::types::{Descriptor, DescriptorError, MatchResult, ReferenceIdentity, Verdict};

/// Distances strictly below this are the same identity. 0.6 is the usual
/// cutoff for 128-d face descriptors.
pub const DISTANCE_THRESHOLD: f32 = 0.6;

/// Strategy for measuring how far a reference descriptor is from the live one.
pub trait Matcher {
    fn distance(&self, live: &Descriptor, reference: &Descriptor) -> Result<f32, DescriptorError>;
}

/// Euclidean distance matcher.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn distance(&self, live: &Descriptor, reference: &Descriptor) -> Result<f32, DescriptorError> {
        live.euclidean_distance(reference)
    }
}

/// True when `distance` counts as a match. Equal to the threshold is a non-match.
pub fn is_match(distance: f32) -> bool {
    distance < DISTANCE_THRESHOLD
}

/// Distance from `live` to every usable reference, in reference order.
///
/// References without a descriptor, descriptors the matcher cannot
/// compare and non-finite distances are skipped.
pub fn rank<M: Matcher + ?Sized>(
    live: &Descriptor,
    references: &[ReferenceIdentity],
    matcher: &M,
) -> Vec<MatchResult> {
    let mut results = Vec::with_capacity(references.len());

    for reference in references {
        let Some(descriptor) = reference.descriptor.as_ref() else {
            tracing::debug!(label = %reference.label, "reference has no face; skipped");
            continue;
        };

        match matcher.distance(live, descriptor) {
            Ok(distance) if !distance.is_finite() => {
                tracing::warn!(label = %reference.label, distance, "reference distance not finite; skipped");
            }
            Ok(distance) => {
                tracing::debug!(label = %reference.label, distance, "reference distance");
                results.push(MatchResult {
                    label: reference.label.clone(),
                    distance,
                });
            }
            Err(e) => {
                tracing::warn!(label = %reference.label, error = %e, "reference not comparable; skipped");
            }
        }
    }

    results
}

/// Strict minimum by distance. On ties the earliest entry wins, and an
/// entry only replaces the current best when it compares strictly less, so a
/// NaN never displaces a real distance.
pub fn nearest(results: &[MatchResult]) -> Option<&MatchResult> {
    let mut best: Option<&MatchResult> = None;
    for result in results {
        match best {
            None => best = Some(result),
            Some(prev) if result.distance < prev.distance => best = Some(result),
            Some(_) => {}
        }
    }
    best
}

/// Decide a verification attempt.
///
/// `live` is the descriptor extracted from the current frame, if any. When it
/// is `None` no reference is examined.
pub fn decide<M: Matcher + ?Sized>(
    live: Option<&Descriptor>,
    references: &[ReferenceIdentity],
    matcher: &M,
) -> Verdict {
    let Some(live) = live else {
        return Verdict::NoFaceDetected;
    };

    let results = rank(live, references, matcher);
    let Some(best) = nearest(&results) else {
        return Verdict::NoValidReferences;
    };

    tracing::info!(label = %best.label, distance = best.distance, candidates = results.len(), "best match");

    if is_match(best.distance) {
        Verdict::Matched {
            label: best.label.clone(),
            distance: best.distance,
        }
    } else {
        Verdict::NotMatched {
            distance: best.distance,
        }
    }
}
