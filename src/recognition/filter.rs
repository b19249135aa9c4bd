//! Confidence filtering and publish selection

use crate::config::PublishPolicy;

use super::RecognizedToken;

/// Keep tokens whose confidence is strictly above `threshold`, in engine order
pub fn accept(tokens: Vec<RecognizedToken>, threshold: f32) -> Vec<RecognizedToken> {
    tokens
        .into_iter()
        .filter(|token| token.confidence > threshold)
        .collect()
}

/// Tokens to write to the result file this cycle, in write order
///
/// With [`PublishPolicy::Last`] every accepted token with text is written in
/// turn, so the last one is what stays on disk. With
/// [`PublishPolicy::HighestConfidence`] only the most confident one is written
/// (the earliest wins a tie). Tokens without text are never written.
pub fn select_for_publish(
    accepted: &[RecognizedToken],
    policy: PublishPolicy,
) -> Vec<&RecognizedToken> {
    let mut candidates = accepted.iter().filter(|token| token.has_text());
    match policy {
        PublishPolicy::Last => candidates.collect(),
        PublishPolicy::HighestConfidence => {
            let Some(first) = candidates.next() else {
                return Vec::new();
            };
            let best = candidates.fold(first, |best, token| {
                if token.confidence > best.confidence {
                    token
                } else {
                    best
                }
            });
            vec![best]
        }
    }
}
