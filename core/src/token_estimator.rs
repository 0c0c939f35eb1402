//! Approximate token pricing for message fragments.
//!
//! Estimation must never block persistence or sending: unknown shapes
//! price at zero with a developer-visible warning, and the exact
//! tokenizer degrades to a byte-length heuristic when the model's
//! encoding is unavailable.

use colloquy_protocol::Fragment;
use colloquy_protocol::Part;
use colloquy_protocol::Role;
use colloquy_utils_tokenizer::Tokenizer;
use colloquy_utils_tokenizer::approx_count;
use tracing::warn;

use crate::model_registry::ModelProfile;

/// Fixed cost charged per priced fragment to approximate encoding glue.
const FRAGMENT_GLUE_TOKENS: u64 = 4;
/// Fixed cost charged once per non-empty message.
const MESSAGE_OVERHEAD_TOKENS: u64 = 3;
/// Square edge assumed for assistant images with untracked dimensions;
/// assistants are assumed to downsize images before re-embedding them.
const ASSISTANT_THUMBNAIL_EDGE: u32 = 384;
/// Square edge assumed for user/system images with untracked dimensions.
const DEFAULT_IMAGE_EDGE: u32 = 1024;

pub struct TokenEstimator {
    profile: ModelProfile,
    tokenizer: Option<Tokenizer>,
}

impl TokenEstimator {
    /// Builds an estimator for `profile`. A failure to load the exact
    /// encoding is not an error; the estimator falls back to the
    /// heuristic counter.
    pub fn new(profile: ModelProfile) -> Self {
        let tokenizer = profile.tokenizer_id.and_then(|id| match Tokenizer::for_name(id) {
            Ok(tokenizer) => Some(tokenizer),
            Err(e) => {
                warn!("tokenizer {id} unavailable for {}: {e}", profile.slug);
                None
            }
        });
        Self { profile, tokenizer }
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Estimated cost of sending `fragments` as one `role` message.
    ///
    /// Void fragments and unknown part shapes contribute zero, so
    /// appending a fragment can never lower the estimate.
    pub fn estimate_message(&self, role: Role, fragments: &[Fragment]) -> u64 {
        let mut total = 0u64;
        let mut priced_any = false;
        for fragment in fragments {
            if fragment.is_void() {
                continue;
            }
            let Some(cost) = self.part_cost(role, &fragment.part) else {
                continue;
            };
            total += cost + FRAGMENT_GLUE_TOKENS;
            priced_any = true;
        }
        if priced_any {
            total += MESSAGE_OVERHEAD_TOKENS;
        }
        total
    }

    /// `None` means "not priced at all" (unknown shape), as opposed to a
    /// known shape that happens to cost zero tokens.
    fn part_cost(&self, role: Role, part: &Part) -> Option<u64> {
        match part {
            Part::Text { text } => Some(self.count_text(text)),
            Part::Error { error, .. } => Some(self.count_text(error)),
            Part::ImageRef { width, height, .. } => Some(self.image_cost(role, *width, *height)),
            // Asset dimensions are not tracked on the reference.
            Part::Reference { .. } => Some(self.image_cost(role, None, None)),
            Part::Doc { data, doc_ref, .. } => {
                Some(self.count_text(doc_ref) + self.count_text(&data.text))
            }
            Part::ToolInvocation { invocation, .. } => {
                let serialized = serde_json::to_string(invocation).unwrap_or_default();
                Some(self.count_text(&serialized))
            }
            Part::ToolResponse { response, .. } => {
                let serialized = serde_json::to_string(response).unwrap_or_default();
                Some(self.count_text(&serialized))
            }
            // Void-only parts can still show up here on malformed data;
            // they are not priced.
            Part::Annotations { .. } | Part::ModelAux { .. } | Part::Placeholder { .. } => Some(0),
            Part::Other(value) => {
                let label = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("<untyped>");
                warn!("not pricing unknown part shape {label:?} for {}", self.profile.slug);
                None
            }
        }
    }

    fn image_cost(&self, role: Role, width: Option<u32>, height: Option<u32>) -> u64 {
        let (w, h) = match (width, height) {
            (Some(w), Some(h)) => (w, h),
            _ => match role {
                Role::Assistant => (ASSISTANT_THUMBNAIL_EDGE, ASSISTANT_THUMBNAIL_EDGE),
                Role::User | Role::System => (DEFAULT_IMAGE_EDGE, DEFAULT_IMAGE_EDGE),
            },
        };
        self.profile.image_sizing.cost(w, h)
    }

    fn count_text(&self, text: &str) -> u64 {
        match &self.tokenizer {
            Some(tokenizer) => tokenizer.count(text) as u64,
            None => approx_count(text) as u64,
        }
    }
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("profile", &self.profile.slug)
            .field("exact", &self.tokenizer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use colloquy_protocol::parts::DataRef;
    use colloquy_protocol::parts::ModelAuxKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model_registry::fallback_model_profile;
    use crate::model_registry::find_model_profile;

    fn heuristic_estimator() -> TokenEstimator {
        TokenEstimator::new(fallback_model_profile("test-model"))
    }

    #[test]
    fn text_message_costs_more_than_nothing() {
        let est = heuristic_estimator();
        let fragments = vec![Fragment::content(Part::text("Hi"))];
        let cost = est.estimate_message(Role::User, &fragments);
        assert!(cost > 0);
        assert_eq!(est.estimate_message(Role::User, &[]), 0);
    }

    #[test]
    fn void_fragments_cost_nothing() {
        let est = heuristic_estimator();
        let mut fragments = vec![Fragment::content(Part::text("body"))];
        let base = est.estimate_message(Role::Assistant, &fragments);
        fragments.push(Fragment::void(Part::model_aux(
            ModelAuxKind::Reasoning,
            "a very long reasoning trace that would cost plenty of tokens",
        )));
        assert_eq!(est.estimate_message(Role::Assistant, &fragments), base);
    }

    #[test]
    fn appending_never_decreases_the_estimate() {
        let est = heuristic_estimator();
        let mut fragments: Vec<Fragment> = Vec::new();
        let mut last = 0;
        let candidates = [
            Fragment::content(Part::text("one")),
            Fragment::void(Part::placeholder("...")),
            Fragment::content(Part::Other(json!({"type": "mystery"}))),
            Fragment::content(Part::image_ref(
                DataRef::Url {
                    url: "https://example.com/i.png".to_string(),
                },
                None,
                Some(512),
                Some(512),
            )),
        ];
        for candidate in candidates {
            fragments.push(candidate);
            let cost = est.estimate_message(Role::User, &fragments);
            assert!(cost >= last, "estimate decreased: {cost} < {last}");
            last = cost;
        }
    }

    #[test]
    fn unknown_part_shape_prices_at_zero() {
        let est = heuristic_estimator();
        let fragments = vec![Fragment::content(Part::Other(json!({"type": "mystery"})))];
        assert_eq!(est.estimate_message(Role::User, &fragments), 0);
    }

    #[test]
    fn assistant_images_without_dimensions_use_the_thumbnail() {
        let profile = find_model_profile("gpt-4o").unwrap();
        let sizing = profile.image_sizing;
        let est = TokenEstimator::new(profile);
        let no_dims = vec![Fragment::content(Part::image_ref(
            DataRef::Url {
                url: "https://example.com/i.png".to_string(),
            },
            None,
            None,
            None,
        ))];
        let assistant = est.estimate_message(Role::Assistant, &no_dims);
        let user = est.estimate_message(Role::User, &no_dims);
        assert_eq!(
            assistant - FRAGMENT_GLUE_TOKENS - MESSAGE_OVERHEAD_TOKENS,
            sizing.cost(ASSISTANT_THUMBNAIL_EDGE, ASSISTANT_THUMBNAIL_EDGE)
        );
        assert_eq!(
            user - FRAGMENT_GLUE_TOKENS - MESSAGE_OVERHEAD_TOKENS,
            sizing.cost(DEFAULT_IMAGE_EDGE, DEFAULT_IMAGE_EDGE)
        );
        assert!(assistant < user);
    }
}
