use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tally_core::{
    AliasId, MatchConfidence, MatchMethod, MatchingConfig, Resident, ResidentId,
    ResidentPaymentAlias,
};

use crate::normalize::{compile_prefixes, narration_key, normalize_narration, NormalizedNarration};
use crate::util::similarity;

/// One possible resident for a narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub resident_id: ResidentId,
    pub score: f64,
    pub tier: MatchConfidence,
    pub method: MatchMethod,
    /// The name or alias fragment that produced the score.
    pub matched_value: String,
    pub alias_id: Option<AliasId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewReason {
    EmptyNarration,
    NoCandidates { floor: f64 },
    BelowHighTier { best: f64, tier: MatchConfidence, high_threshold: f64 },
    CloseCandidates { top: f64, runner_up: f64, close_delta: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchDecision {
    AutoAssign(RankedCandidate),
    NeedsReview(ReviewReason),
}

impl MatchDecision {
    /// Operator-facing account of which rule produced the decision.
    pub fn explain(&self) -> String {
        match self {
            MatchDecision::AutoAssign(c) if c.method == MatchMethod::ExactAlias => {
                format!("matched by learned alias '{}'", c.matched_value)
            }
            MatchDecision::AutoAssign(c) => format!(
                "matched '{}' with similarity {:.2} (high confidence, no close rival)",
                c.matched_value, c.score
            ),
            MatchDecision::NeedsReview(ReviewReason::EmptyNarration) => {
                "narration has no name-like text after removing bank codes".to_string()
            }
            MatchDecision::NeedsReview(ReviewReason::NoCandidates { floor }) => {
                format!("no resident scored at or above the {floor:.2} similarity floor")
            }
            MatchDecision::NeedsReview(ReviewReason::BelowHighTier {
                best,
                tier,
                high_threshold,
            }) => format!(
                "best candidate scored {best:.2} ({tier} confidence); auto-match needs {high_threshold:.2}"
            ),
            MatchDecision::NeedsReview(ReviewReason::CloseCandidates {
                top,
                runner_up,
                close_delta,
            }) => format!(
                "top candidates {top:.2} and {runner_up:.2} are within {close_delta:.2} of each other"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub normalized: NormalizedNarration,
    pub candidates: Vec<RankedCandidate>,
    pub decision: MatchDecision,
}

/// Similarity between a narration key and a name key, robust to extra words
/// around the name and to reordered name parts.
pub fn name_similarity(narration_key: &str, name_key: &str) -> f64 {
    if narration_key.is_empty() || name_key.is_empty() {
        return 0.0;
    }
    let narr: Vec<&str> = narration_key.split(' ').collect();
    let name: Vec<&str> = name_key.split(' ').collect();
    let sorted_name = sorted_join(&name);

    let mut best = similarity(narration_key, name_key).max(similarity(&sorted_join(&narr), &sorted_name));
    if narr.len() > name.len() {
        for window in narr.windows(name.len()) {
            let joined = window.join(" ");
            best = best
                .max(similarity(&joined, name_key))
                .max(similarity(&sorted_join(window), &sorted_name));
        }
    }
    best
}

fn sorted_join(words: &[&str]) -> String {
    let mut sorted = words.to_vec();
    sorted.sort_unstable();
    sorted.join(" ")
}

/// `fragment` occurs in `key` as a whole-word sequence.
fn contains_words(key: &str, fragment: &str) -> bool {
    !fragment.is_empty() && format!(" {key} ").contains(&format!(" {fragment} "))
}

fn by_score_then_id(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.resident_id.cmp(&b.resident_id))
}

/// Auto-assigns only a lone high-confidence candidate with no rival
/// within `close_delta`; everything else goes to an operator.
pub struct MatchPolicy<'a> {
    config: &'a MatchingConfig,
}

impl MatchPolicy<'_> {
    pub fn decide(&self, candidates: &[RankedCandidate]) -> MatchDecision {
        let Some(top) = candidates.first() else {
            return MatchDecision::NeedsReview(ReviewReason::NoCandidates {
                floor: self.config.min_similarity,
            });
        };
        if top.tier != MatchConfidence::High {
            return MatchDecision::NeedsReview(ReviewReason::BelowHighTier {
                best: top.score,
                tier: top.tier,
                high_threshold: self.config.high_threshold,
            });
        }
        if let Some(runner_up) = candidates.get(1) {
            // Tolerance keeps a gap of exactly close_delta on the review side.
            if top.score - runner_up.score <= self.config.close_delta + 1e-9 {
                return MatchDecision::NeedsReview(ReviewReason::CloseCandidates {
                    top: top.score,
                    runner_up: runner_up.score,
                    close_delta: self.config.close_delta,
                });
            }
        }
        MatchDecision::AutoAssign(top.clone())
    }
}

pub struct ResidentMatcher {
    config: MatchingConfig,
    extra_prefixes: Vec<Regex>,
}

impl ResidentMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        let extra_prefixes = compile_prefixes(&config.extra_channel_prefixes);
        Self {
            config,
            extra_prefixes,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn normalize(&self, narration: &str) -> NormalizedNarration {
        normalize_narration(narration, &self.extra_prefixes)
    }

    /// The longest active alias found in the key, for residents still in the directory.
    fn exact_alias(
        &self,
        key: &str,
        active_residents: &HashSet<ResidentId>,
        aliases: &[ResidentPaymentAlias],
    ) -> Option<RankedCandidate> {
        aliases
            .iter()
            .filter(|a| a.is_active && active_residents.contains(&a.resident_id))
            .filter(|a| contains_words(key, &a.fragment))
            .max_by(|a, b| {
                a.fragment
                    .len()
                    .cmp(&b.fragment.len())
                    .then(a.hit_count.cmp(&b.hit_count))
                    .then(b.id.cmp(&a.id))
            })
            .map(|a| RankedCandidate {
                resident_id: a.resident_id,
                score: 1.0,
                tier: MatchConfidence::High,
                method: MatchMethod::ExactAlias,
                matched_value: a.fragment.clone(),
                alias_id: Some(a.id),
            })
    }

    /// Ranks residents for a normalized narration, best first.
    ///
    /// An alias hit short-circuits to a single candidate. Otherwise every
    /// resident is scored on the best of its full name and its aliases, and
    /// candidates under the similarity floor are dropped.
    pub fn rank(
        &self,
        normalized: &NormalizedNarration,
        residents: &[Resident],
        aliases: &[ResidentPaymentAlias],
    ) -> Vec<RankedCandidate> {
        let key = &normalized.key;
        if key.is_empty() {
            return Vec::new();
        }

        let active: HashSet<ResidentId> = residents.iter().map(|r| r.id).collect();
        if let Some(hit) = self.exact_alias(key, &active, aliases) {
            return vec![hit];
        }

        let mut candidates: Vec<RankedCandidate> = residents
            .iter()
            .filter_map(|resident| {
                let name_key = narration_key(&resident.full_name);
                let mut best = (name_similarity(key, &name_key), resident.full_name.clone(), None);
                for alias in aliases
                    .iter()
                    .filter(|a| a.is_active && a.resident_id == resident.id)
                {
                    let score = name_similarity(key, &alias.fragment);
                    if score > best.0 {
                        best = (score, alias.fragment.clone(), Some(alias.id));
                    }
                }
                let (score, matched_value, alias_id) = best;
                let tier = self.config.tier(score)?;
                Some(RankedCandidate {
                    resident_id: resident.id,
                    score,
                    tier,
                    method: MatchMethod::Fuzzy,
                    matched_value,
                    alias_id,
                })
            })
            .collect();

        candidates.sort_by(by_score_then_id);
        candidates
    }

    pub fn policy(&self) -> MatchPolicy<'_> {
        MatchPolicy {
            config: &self.config,
        }
    }

    pub fn match_narration(
        &self,
        narration: &str,
        residents: &[Resident],
        aliases: &[ResidentPaymentAlias],
    ) -> MatchOutcome {
        let normalized = self.normalize(narration);
        if normalized.is_empty() {
            return MatchOutcome {
                normalized,
                candidates: Vec::new(),
                decision: MatchDecision::NeedsReview(ReviewReason::EmptyNarration),
            };
        }
        let candidates = self.rank(&normalized, residents, aliases);
        let decision = self.policy().decide(&candidates);
        MatchOutcome {
            normalized,
            candidates,
            decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resident(id: i64, name: &str) -> Resident {
        Resident {
            id: ResidentId(id),
            full_name: name.to_string(),
        }
    }

    fn alias(id: i64, fragment: &str, resident_id: i64) -> ResidentPaymentAlias {
        ResidentPaymentAlias {
            id: AliasId(id),
            fragment: fragment.to_string(),
            resident_id: ResidentId(resident_id),
            hit_count: 1,
            last_used_at: None,
            is_active: true,
            version: 1,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    fn candidate(id: i64, score: f64, matcher: &ResidentMatcher) -> RankedCandidate {
        RankedCandidate {
            resident_id: ResidentId(id),
            score,
            tier: matcher.config().tier(score).unwrap(),
            method: MatchMethod::Fuzzy,
            matched_value: format!("resident {id}"),
            alias_id: None,
        }
    }

    fn matcher() -> ResidentMatcher {
        ResidentMatcher::new(MatchingConfig::default())
    }

    #[test]
    fn mobile_transfer_fuzzy_matches_resident() {
        let residents = vec![resident(1, "John Doe"), resident(2, "Mary Smith")];
        let outcome = matcher().match_narration("FBNMOBILEJOHN DOE/Nk", &residents, &[]);

        assert_eq!(outcome.normalized.display, "John Doe");
        match &outcome.decision {
            MatchDecision::AutoAssign(c) => {
                assert_eq!(c.resident_id, ResidentId(1));
                assert_eq!(c.method, MatchMethod::Fuzzy);
                assert_eq!(c.tier, MatchConfidence::High);
            }
            other => panic!("expected auto-assign, got {other:?}"),
        }
    }

    #[test]
    fn close_candidates_need_review_even_above_high_floor() {
        let m = matcher();
        let candidates = vec![candidate(1, 0.91, &m), candidate(2, 0.89, &m)];
        let decision = m.policy().decide(&candidates);
        assert!(matches!(
            decision,
            MatchDecision::NeedsReview(ReviewReason::CloseCandidates { .. })
        ));
        assert!(decision.explain().contains("0.91"));
    }

    #[test]
    fn single_medium_candidate_needs_review() {
        let m = matcher();
        let decision = m.policy().decide(&[candidate(1, 0.75, &m)]);
        assert!(matches!(
            decision,
            MatchDecision::NeedsReview(ReviewReason::BelowHighTier { tier: MatchConfidence::Medium, .. })
        ));
    }

    #[test]
    fn clear_winner_is_assigned() {
        let m = matcher();
        let decision = m.policy().decide(&[candidate(1, 0.97, &m), candidate(2, 0.70, &m)]);
        assert!(matches!(decision, MatchDecision::AutoAssign(ref c) if c.resident_id == ResidentId(1)));
    }

    #[test]
    fn exact_alias_beats_fuzzy() {
        let residents = vec![resident(1, "John Doe"), resident(2, "Chukwuemeka Obi")];
        // The sender name looks like John Doe but the alias says otherwise.
        let aliases = vec![alias(10, "john doe", 2)];
        let m = matcher();
        let first = m.match_narration("NIP/JOHN DOE", &residents, &aliases);
        let second = m.match_narration("NIP/JOHN DOE", &residents, &aliases);

        assert_eq!(first.candidates.len(), 1);
        assert_eq!(first.candidates[0].method, MatchMethod::ExactAlias);
        assert_eq!(first.candidates[0].resident_id, ResidentId(2));
        assert_eq!(first.decision, second.decision);
    }

    #[test]
    fn alias_found_inside_longer_narration() {
        let residents = vec![resident(1, "Ngozi Eze")];
        let aliases = vec![alias(5, "mama nkechi", 1), alias(6, "nkechi", 1)];
        let outcome = matcher().match_narration("TRF FROM MAMA NKECHI BLOCK C", &residents, &aliases);
        assert_eq!(outcome.candidates[0].matched_value, "mama nkechi");
    }

    #[test]
    fn inactive_alias_is_ignored() {
        let residents = vec![resident(1, "Ngozi Eze"), resident(2, "Mama Nkechi Stores")];
        let mut a = alias(5, "mama nkechi", 1);
        a.is_active = false;
        let outcome = matcher().match_narration("MAMA NKECHI", &residents, &[a]);
        assert!(outcome.candidates.iter().all(|c| c.method == MatchMethod::Fuzzy));
    }

    #[test]
    fn alias_for_departed_resident_is_ignored() {
        let residents = vec![resident(1, "John Doe")];
        let aliases = vec![alias(10, "john doe", 99)];
        let outcome = matcher().match_narration("JOHN DOE", &residents, &aliases);
        assert_eq!(outcome.candidates[0].resident_id, ResidentId(1));
        assert_eq!(outcome.candidates[0].method, MatchMethod::Fuzzy);
    }

    #[test]
    fn unrelated_narration_has_no_candidates() {
        let residents = vec![resident(1, "John Doe")];
        let outcome = matcher().match_narration("SMS ALERT CHARGES", &residents, &[]);
        assert!(outcome.candidates.is_empty());
        assert!(outcome.decision.explain().contains("floor"));
    }

    #[test]
    fn pure_code_narration_is_explained() {
        let outcome = matcher().match_narration("NIP/0123456789", &[resident(1, "John Doe")], &[]);
        assert_eq!(outcome.decision, MatchDecision::NeedsReview(ReviewReason::EmptyNarration));
    }

    #[test]
    fn window_and_order_tolerant_similarity() {
        assert_eq!(name_similarity("payment from john doe for dues", "john doe"), 1.0);
        assert_eq!(name_similarity("doe john", "john doe"), 1.0);
        assert!(name_similarity("jon doe", "john doe") < 0.9);
        assert_eq!(name_similarity("", "john doe"), 0.0);
    }

    #[test]
    fn candidates_sorted_by_score_then_id() {
        let residents = vec![resident(3, "Ada Obi"), resident(1, "Ada Obi"), resident(2, "Ada Obiora")];
        let outcome = matcher().match_narration("ADA OBI", &residents, &[]);
        let ids: Vec<i64> = outcome.candidates.iter().map(|c| c.resident_id.0).collect();
        assert_eq!(ids[..2], [1, 3]);
        // Two identical names can never be auto-assigned.
        assert!(matches!(outcome.decision, MatchDecision::NeedsReview(_)));
    }
}
