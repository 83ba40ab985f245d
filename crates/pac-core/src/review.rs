//! ============================================================================
//! Review & Merge Coordinator
//! ============================================================================
//! Post-session triage over the frozen candidate buffer. Merges are
//! server-authoritative: the coordinator plans a merge, the caller runs
//! the POST, and the coordinator applies the receipt. One merge may be
//! in flight at a time; the plan/commit split keeps that enforceable
//! without holding locks across the network call.
//! ============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::buffer::CandidateBuffer;
use crate::types::{MergeSuggestion, MergedGroup, ReviewStatus, VerifiedOfficer};

/// Suggestions below this confidence are not shown.
pub const MERGE_THRESHOLD: f64 = 0.85;

/// Suggestions at or above this confidence are flagged for auto-merge.
pub const AUTO_MERGE_THRESHOLD: f64 = 0.95;

#[derive(Debug, Error, PartialEq)]
pub enum ReviewError {
    #[error("another merge is already in flight")]
    MergeInFlight,
    #[error("no suggestion pairs officers {0} and {1}")]
    UnknownSuggestion(u64, u64),
    #[error("officer {0} already belongs to a merged group")]
    AlreadyMerged(u64),
    #[error("manual merge needs at least two distinct officers")]
    TooFewOfficers,
    #[error("unknown officer id {0}")]
    UnknownOfficer(u64),
    #[error("officer {0} has no server identity to merge")]
    NotMergeable(u64),
}

/// What the caller must POST to commit a planned merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergePlan {
    pub officer_ids: Vec<u64>,
    pub confidence: f64,
    pub auto_merged: bool,
}

/// Final product of the review phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutput {
    /// Officer id paired with its final decision
    pub decisions: Vec<(u64, ReviewStatus)>,
    pub merged_groups: Vec<MergedGroup>,
    /// One primary per merged group plus every accepted unmerged candidate
    pub verified_officers: Vec<VerifiedOfficer>,
}

pub struct MergeCoordinator {
    media_id: u64,
    buffer: CandidateBuffer,
    suggestions: Vec<MergeSuggestion>,
    merged_groups: Vec<MergedGroup>,
    in_flight: Option<MergePlan>,
}

impl MergeCoordinator {
    /// Take over the session's frozen buffer for triage.
    pub fn new(media_id: u64, buffer: CandidateBuffer) -> Self {
        Self {
            media_id,
            buffer,
            suggestions: Vec::new(),
            merged_groups: Vec::new(),
            in_flight: None,
        }
    }

    pub fn media_id(&self) -> u64 {
        self.media_id
    }

    pub fn suggestions(&self) -> &[MergeSuggestion] {
        &self.suggestions
    }

    pub fn merged_groups(&self) -> &[MergedGroup] {
        &self.merged_groups
    }

    pub fn buffer(&self) -> &CandidateBuffer {
        &self.buffer
    }

    pub fn merge_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Install server suggestions: filtered to the display threshold,
    /// ordered by confidence descending, auto-merge flag derived.
    pub fn load_suggestions(&mut self, mut raw: Vec<MergeSuggestion>) {
        raw.retain(|s| s.confidence >= MERGE_THRESHOLD && s.officer_a_id != s.officer_b_id);
        // Drop anything pairing an officer already merged in this session
        raw.retain(|s| !self.is_merged(s.officer_a_id) && !self.is_merged(s.officer_b_id));
        for s in raw.iter_mut() {
            s.auto_merge = s.confidence >= AUTO_MERGE_THRESHOLD;
        }
        raw.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!("Loaded {} merge suggestions", raw.len());
        self.suggestions = raw;
    }

    // Suggestions, plans, and groups all speak the server's appearance
    // id space; the buffer's local ids stay a UI concern.
    fn is_merged(&self, appearance_id: u64) -> bool {
        self.merged_groups.iter().any(|g| g.contains(appearance_id))
    }

    fn appearance_of(&self, local_id: u64) -> Result<u64, ReviewError> {
        let candidate = self
            .buffer
            .get(local_id)
            .ok_or(ReviewError::UnknownOfficer(local_id))?;
        candidate
            .appearance_id
            .ok_or(ReviewError::NotMergeable(local_id))
    }

    /// Plan accepting the suggestion pairing `a` and `b`. The returned
    /// plan must be committed or abandoned before the next merge.
    pub fn begin_accept(&mut self, a: u64, b: u64) -> Result<MergePlan, ReviewError> {
        if self.in_flight.is_some() {
            return Err(ReviewError::MergeInFlight);
        }
        let suggestion = self
            .suggestions
            .iter()
            .find(|s| s.involves(a) && s.involves(b))
            .ok_or(ReviewError::UnknownSuggestion(a, b))?;
        for id in [a, b] {
            if self.is_merged(id) {
                return Err(ReviewError::AlreadyMerged(id));
            }
        }
        let plan = MergePlan {
            officer_ids: vec![suggestion.officer_a_id, suggestion.officer_b_id],
            confidence: suggestion.confidence,
            auto_merged: suggestion.auto_merge,
        };
        self.in_flight = Some(plan.clone());
        Ok(plan)
    }

    /// Plan a user-driven merge of two or more selected candidates,
    /// addressed by their local buffer ids.
    pub fn begin_manual(&mut self, local_ids: &[u64]) -> Result<MergePlan, ReviewError> {
        if self.in_flight.is_some() {
            return Err(ReviewError::MergeInFlight);
        }
        let mut distinct: Vec<u64> = Vec::new();
        for &local_id in local_ids {
            let appearance_id = self.appearance_of(local_id)?;
            if self.is_merged(appearance_id) {
                return Err(ReviewError::AlreadyMerged(appearance_id));
            }
            if !distinct.contains(&appearance_id) {
                distinct.push(appearance_id);
            }
        }
        if distinct.len() < 2 {
            return Err(ReviewError::TooFewOfficers);
        }
        distinct.sort_unstable();
        let plan = MergePlan {
            officer_ids: distinct,
            confidence: 0.0,
            auto_merged: false,
        };
        self.in_flight = Some(plan.clone());
        Ok(plan)
    }

    /// Commit a confirmed merge: create the group and retire every
    /// suggestion touching any merged member.
    pub fn merge_succeeded(&mut self, group_id: u64) -> Option<&MergedGroup> {
        let plan = self.in_flight.take()?;
        let primary_id = *plan.officer_ids.iter().min()?;
        let group = MergedGroup {
            group_id,
            primary_id,
            member_ids: plan.officer_ids.clone(),
            confidence: plan.confidence,
        };
        self.suggestions
            .retain(|s| !plan.officer_ids.iter().any(|&id| s.involves(id)));
        info!(
            "Merged {} officers into group {} (primary {})",
            group.member_ids.len(),
            group_id,
            primary_id
        );
        self.merged_groups.push(group);
        self.merged_groups.last()
    }

    /// The POST failed; the suggestion stays and the slot frees up.
    pub fn merge_failed(&mut self) {
        self.in_flight = None;
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    pub fn decide(&mut self, officer_id: u64, approved: bool, now: i64) -> bool {
        self.buffer.decide(officer_id, approved, now)
    }

    pub fn undo(&mut self, officer_id: u64) -> bool {
        self.buffer.undo(officer_id)
    }

    /// Approve every candidate at or above `threshold` in one pass.
    /// Candidates below it are left untouched.
    pub fn approve_all_above(&mut self, threshold: f64, now: i64) -> usize {
        let ids: Vec<u64> = self
            .buffer
            .iter()
            .filter(|c| c.confidence >= threshold)
            .map(|c| c.id)
            .collect();
        for &id in &ids {
            self.buffer.decide(id, true, now);
        }
        ids.len()
    }

    /// Flip every candidate to rejected.
    pub fn reject_all(&mut self, now: i64) -> usize {
        let ids: Vec<u64> = self.buffer.iter().map(|c| c.id).collect();
        for &id in &ids {
            self.buffer.decide(id, false, now);
        }
        ids.len()
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Project the final review product. Accepted means approved or
    /// still pending; merged members fold into their group's primary.
    pub fn finish(&self) -> ReviewOutput {
        let decisions = self
            .buffer
            .iter()
            .map(|c| (c.id, c.review.status.clone()))
            .collect();

        let mut verified = Vec::new();
        for group in &self.merged_groups {
            let primary = self
                .buffer
                .iter()
                .find(|c| c.appearance_id == Some(group.primary_id));
            if let Some(primary) = primary {
                let merged_appearance_ids = group
                    .member_ids
                    .iter()
                    .filter(|&&id| id != group.primary_id)
                    .copied()
                    .collect();
                verified.push(VerifiedOfficer {
                    candidate: primary.clone(),
                    group_id: Some(group.group_id),
                    merged_appearance_ids,
                });
            }
        }
        for candidate in self.buffer.export_accepted() {
            if candidate.appearance_id.map(|id| self.is_merged(id)).unwrap_or(false) {
                continue;
            }
            verified.push(VerifiedOfficer {
                candidate,
                group_id: None,
                merged_appearance_ids: Vec::new(),
            });
        }

        ReviewOutput {
            decisions,
            merged_groups: self.merged_groups.clone(),
            verified_officers: verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CandidateWire;

    fn wire(appearance_id: u64, confidence: f64) -> CandidateWire {
        CandidateWire {
            appearance_id: Some(appearance_id),
            confidence,
            ..CandidateWire::default()
        }
    }

    fn coordinator_with(candidates: &[(u64, f64)]) -> MergeCoordinator {
        let mut buffer = CandidateBuffer::new();
        for &(appearance_id, confidence) in candidates {
            buffer.add(wire(appearance_id, confidence), Some(9));
        }
        buffer.freeze();
        MergeCoordinator::new(9, buffer)
    }

    fn suggestion(a: u64, b: u64, confidence: f64) -> MergeSuggestion {
        MergeSuggestion {
            officer_a_id: a,
            officer_b_id: b,
            confidence,
            crop_a: None,
            crop_b: None,
            auto_merge: false,
        }
    }

    fn ids(coordinator: &MergeCoordinator) -> Vec<u64> {
        coordinator.buffer().iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_load_sorts_filters_and_flags() {
        let mut c = coordinator_with(&[(101, 0.9), (102, 0.9), (103, 0.9)]);
        c.load_suggestions(vec![
            suggestion(101, 102, 0.86),
            suggestion(102, 103, 0.97),
            suggestion(101, 103, 0.5),
            suggestion(104, 104, 0.99),
        ]);
        let loaded = c.suggestions();
        assert_eq!(loaded.len(), 2);
        assert_eq!((loaded[0].officer_a_id, loaded[0].officer_b_id), (102, 103));
        assert!(loaded[0].auto_merge);
        assert!(!loaded[1].auto_merge);
    }

    #[test]
    fn test_accept_retires_overlapping_suggestions() {
        let mut c = coordinator_with(&[(101, 0.9), (102, 0.9), (103, 0.9)]);
        c.load_suggestions(vec![
            suggestion(101, 102, 0.96),
            suggestion(102, 103, 0.9),
            suggestion(104, 105, 0.9),
        ]);

        let plan = c.begin_accept(101, 102).unwrap();
        assert_eq!(plan.officer_ids, vec![101, 102]);
        assert!(plan.auto_merged);
        let group = c.merge_succeeded(77).unwrap().clone();
        assert_eq!(group.primary_id, 101);
        assert_eq!(group.member_ids, vec![101, 102]);

        // The 102-103 suggestion shared an officer and is gone
        assert_eq!(c.suggestions().len(), 1);
        assert!(c.suggestions()[0].involves(104));
    }

    #[test]
    fn test_duplicate_merge_rejected_before_post() {
        let mut c = coordinator_with(&[(101, 0.9), (102, 0.9)]);
        c.load_suggestions(vec![suggestion(101, 102, 0.9), suggestion(102, 103, 0.9)]);

        c.begin_accept(101, 102).unwrap();
        c.merge_succeeded(77).unwrap();

        // Officer 102 is already merged; no second POST is planned
        assert_eq!(
            c.begin_accept(102, 103),
            Err(ReviewError::UnknownSuggestion(102, 103))
        );
        let local = ids(&c);
        assert_eq!(
            c.begin_manual(&[local[0], local[1]]).unwrap_err(),
            ReviewError::AlreadyMerged(101)
        );
    }

    #[test]
    fn test_single_merge_in_flight() {
        let mut c = coordinator_with(&[(101, 0.9)]);
        c.load_suggestions(vec![suggestion(101, 102, 0.9), suggestion(103, 104, 0.9)]);

        c.begin_accept(101, 102).unwrap();
        assert_eq!(c.begin_accept(103, 104), Err(ReviewError::MergeInFlight));

        c.merge_failed();
        // The failed suggestion is still available
        assert!(c.begin_accept(101, 102).is_ok());
    }

    #[test]
    fn test_manual_merge_needs_two_distinct() {
        let mut c = coordinator_with(&[(101, 0.9), (102, 0.9)]);
        let local = ids(&c);
        assert_eq!(
            c.begin_manual(&[local[0], local[0]]),
            Err(ReviewError::TooFewOfficers)
        );
        assert_eq!(c.begin_manual(&[999, local[0]]), Err(ReviewError::UnknownOfficer(999)));

        let plan = c.begin_manual(&[local[1], local[0]]).unwrap();
        assert_eq!(plan.confidence, 0.0);
        assert!(!plan.auto_merged);
        assert_eq!(plan.officer_ids, vec![101, 102]);
    }

    #[test]
    fn test_bulk_decisions_compose() {
        let mut c = coordinator_with(&[(101, 0.96), (102, 0.7), (103, 0.99)]);
        c.reject_all(1_000);
        assert_eq!(c.approve_all_above(0.95, 1_001), 2);

        for candidate in c.buffer().iter() {
            let expect_approved = candidate.confidence >= 0.95;
            assert_eq!(
                candidate.review.status == ReviewStatus::Approved,
                expect_approved,
                "confidence {}",
                candidate.confidence
            );
        }
    }

    #[test]
    fn test_finish_one_primary_per_group_plus_accepted() {
        let mut c = coordinator_with(&[(101, 0.9), (102, 0.9), (103, 0.9), (104, 0.4)]);
        let local = ids(&c);

        // Merge the first two, reject the last, leave the third pending
        c.begin_manual(&[local[0], local[1]]).unwrap();
        c.merge_succeeded(77).unwrap();
        c.decide(local[3], false, 1_000);

        let output = c.finish();
        assert_eq!(output.merged_groups.len(), 1);
        assert_eq!(output.verified_officers.len(), 2);

        let primary = &output.verified_officers[0];
        assert_eq!(primary.group_id, Some(77));
        assert_eq!(primary.candidate.id, local[0].min(local[1]));
        assert_eq!(primary.merged_appearance_ids, vec![102]);

        let unmerged = &output.verified_officers[1];
        assert_eq!(unmerged.candidate.id, local[2]);
        assert_eq!(unmerged.group_id, None);

        assert_eq!(output.decisions.len(), 4);
    }
}
