//! ============================================================================
//! Candidate Buffer
//! ============================================================================
//! Ordered, deduplicated collection of detected-officer candidates with
//! per-item review state and user corrections. Append-only while the
//! session is active; idempotent by identity so replayed events after a
//! reconnect never duplicate or clobber user work.
//! ============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::CandidateWire;
use crate::types::{Candidate, CandidateEdits, CandidateReview, ReviewStatus};

/// Badge override length cap; the server validates the rest.
pub const MAX_BADGE_LEN: usize = 64;

/// Identity key for dedup: appearance id when present, else the
/// (media, timestamp, face crop) triple, else a locally minted id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdentityKey {
    Appearance(u64),
    Triple(u64, String, String),
    Local(u64),
}

/// One field a user may correct on a candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum CandidateEdit {
    Name(String),
    Badge(String),
    Force(String),
    Rank(String),
    Roles(Vec<String>),
    Notes(String),
}

/// Result of feeding one wire candidate into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New identity; counts toward stats.faces
    Inserted(u64),
    /// Known identity; AI fields refreshed, edits/decisions untouched
    Updated(u64),
    /// Buffer is frozen; the event was dropped
    Dropped,
}

/// Ordered candidate collection for one live session.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    candidates: Vec<Candidate>,
    index: HashMap<IdentityKey, usize>,
    next_local_id: u64,
    frozen: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn get(&self, id: u64) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    /// Add or refresh a candidate from the wire. `media_id` is the session's
    /// media row when known; it participates in the fallback identity key.
    pub fn add(&mut self, wire: CandidateWire, media_id: Option<u64>) -> AddOutcome {
        if self.frozen {
            debug!("Dropping candidate arrival after freeze");
            return AddOutcome::Dropped;
        }

        let key = self.identity_key(&wire, media_id);

        if let Some(&pos) = self.index.get(&key) {
            let id = self.candidates[pos].id;
            self.refresh_ai_fields(pos, wire);
            return AddOutcome::Updated(id);
        }

        let id = self.next_local_id;
        self.next_local_id += 1;

        let candidate = Candidate {
            id,
            appearance_id: wire.appearance_id,
            officer_id: wire.officer_id,
            confidence: wire.confidence,
            timestamp: wire.timestamp,
            face_crop_ref: wire.face_crop_ref,
            body_crop_ref: wire.body_crop_ref,
            quality: wire.quality,
            ai_name: wire.ai_name,
            ai_name_confidence: wire.ai_name_confidence,
            ocr_badge_result: wire.ocr_badge_result,
            ocr_badge_confidence: wire.ocr_badge_confidence,
            ocr_name_result: wire.ocr_name_result,
            ocr_name_confidence: wire.ocr_name_confidence,
            ai_force: wire.ai_force,
            ai_rank: wire.ai_rank,
            ai_meta: wire.ai_meta,
            edits: CandidateEdits::default(),
            review: CandidateReview::default(),
        };

        self.index.insert(key, self.candidates.len());
        self.candidates.push(candidate);
        AddOutcome::Inserted(id)
    }

    fn identity_key(&mut self, wire: &CandidateWire, media_id: Option<u64>) -> IdentityKey {
        if let Some(appearance_id) = wire.appearance_id {
            return IdentityKey::Appearance(appearance_id);
        }
        if let (Some(media), Some(face)) = (media_id, wire.face_crop_ref.as_ref()) {
            if !wire.timestamp.is_empty() {
                return IdentityKey::Triple(media, wire.timestamp.clone(), face.clone());
            }
        }
        // No stable server identity; mint a local one (never dedups)
        IdentityKey::Local(self.next_local_id)
    }

    /// Duplicate arrival: AI-provided fields win, user state never changes.
    fn refresh_ai_fields(&mut self, pos: usize, wire: CandidateWire) {
        let c = &mut self.candidates[pos];
        c.officer_id = wire.officer_id.or(c.officer_id);
        c.confidence = wire.confidence;
        c.face_crop_ref = wire.face_crop_ref.or(c.face_crop_ref.take());
        c.body_crop_ref = wire.body_crop_ref.or(c.body_crop_ref.take());
        c.quality = wire.quality;
        c.ai_name = wire.ai_name.or(c.ai_name.take());
        c.ai_name_confidence = wire.ai_name_confidence.or(c.ai_name_confidence);
        c.ocr_badge_result = wire.ocr_badge_result.or(c.ocr_badge_result.take());
        c.ocr_badge_confidence = wire.ocr_badge_confidence.or(c.ocr_badge_confidence);
        c.ocr_name_result = wire.ocr_name_result.or(c.ocr_name_result.take());
        c.ocr_name_confidence = wire.ocr_name_confidence.or(c.ocr_name_confidence);
        c.ai_force = wire.ai_force.or(c.ai_force.take());
        c.ai_rank = wire.ai_rank.or(c.ai_rank.take());
        c.ai_meta = wire.ai_meta.or(c.ai_meta.take());
    }

    /// Apply a user correction. Name-like fields are uppercased; badge text
    /// is capped at MAX_BADGE_LEN.
    pub fn set_edit(&mut self, id: u64, edit: CandidateEdit) -> bool {
        let Some(candidate) = self.candidates.iter_mut().find(|c| c.id == id) else {
            return false;
        };

        match edit {
            CandidateEdit::Name(v) => {
                candidate.edits.name_override = Some(v.trim().to_uppercase());
            }
            CandidateEdit::Badge(v) => {
                let capped: String = v.trim().chars().take(MAX_BADGE_LEN).collect();
                candidate.edits.badge_override = Some(capped);
            }
            CandidateEdit::Force(v) => candidate.edits.force_override = Some(v),
            CandidateEdit::Rank(v) => candidate.edits.rank_override = Some(v),
            CandidateEdit::Roles(v) => candidate.edits.roles = Some(v),
            CandidateEdit::Notes(v) => candidate.edits.notes = Some(v),
        }
        true
    }

    /// Record an approve/reject decision.
    pub fn decide(&mut self, id: u64, approved: bool, now: i64) -> bool {
        let Some(candidate) = self.candidates.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        candidate.review = CandidateReview {
            status: if approved {
                ReviewStatus::Approved
            } else {
                ReviewStatus::Rejected
            },
            decided_at: Some(now),
        };
        true
    }

    /// Return a candidate to pending. Edits are preserved.
    pub fn undo(&mut self, id: u64) -> bool {
        let Some(candidate) = self.candidates.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        candidate.review = CandidateReview::default();
        true
    }

    /// Stop accepting arrivals. Called on completion and early finish.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// All non-rejected candidates, in arrival order. Pending items count
    /// as approved at export time (early finish treats them as implicitly
    /// approved; otherwise the review UI has already decided them).
    pub fn export_accepted(&self) -> Vec<Candidate> {
        self.candidates
            .iter()
            .filter(|c| c.review.status != ReviewStatus::Rejected)
            .cloned()
            .collect()
    }

    /// Snapshot of all candidates for presentation.
    pub fn all(&self) -> Vec<Candidate> {
        self.candidates.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(appearance_id: Option<u64>, confidence: f64, timestamp: &str) -> CandidateWire {
        CandidateWire {
            appearance_id,
            officer_id: None,
            confidence,
            timestamp: timestamp.into(),
            face_crop_ref: None,
            body_crop_ref: None,
            quality: Default::default(),
            ai_name: None,
            ai_name_confidence: None,
            ocr_badge_result: None,
            ocr_badge_confidence: None,
            ocr_name_result: None,
            ocr_name_confidence: None,
            ai_force: None,
            ai_rank: None,
            ai_meta: None,
        }
    }

    #[test]
    fn test_add_mints_ordered_ids() {
        let mut buffer = CandidateBuffer::new();
        let a = buffer.add(wire(Some(101), 0.9, "00:00"), None);
        let b = buffer.add(wire(Some(102), 0.8, "00:05"), None);
        assert_eq!(a, AddOutcome::Inserted(0));
        assert_eq!(b, AddOutcome::Inserted(1));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_duplicate_appearance_id_dedups() {
        let mut buffer = CandidateBuffer::new();
        buffer.add(wire(Some(101), 0.9, "00:00"), None);

        let mut dup = wire(Some(101), 0.95, "00:00");
        dup.ai_name = Some("NEW NAME".into());
        let outcome = buffer.add(dup, None);

        assert_eq!(outcome, AddOutcome::Updated(0));
        assert_eq!(buffer.len(), 1);
        let c = buffer.get(0).unwrap();
        assert!((c.confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(c.ai_name.as_deref(), Some("NEW NAME"));
    }

    #[test]
    fn test_duplicate_never_clobbers_edits_or_decision() {
        let mut buffer = CandidateBuffer::new();
        buffer.add(wire(Some(101), 0.9, "00:00"), None);
        buffer.set_edit(0, CandidateEdit::Name("smith".into()));
        buffer.decide(0, true, 1000);

        buffer.add(wire(Some(101), 0.95, "00:00"), None);
        let c = buffer.get(0).unwrap();
        assert_eq!(c.edits.name_override.as_deref(), Some("SMITH"));
        assert_eq!(c.review.status, ReviewStatus::Approved);
    }

    #[test]
    fn test_triple_identity_fallback() {
        let mut buffer = CandidateBuffer::new();
        let mut a = wire(None, 0.9, "00:10");
        a.face_crop_ref = Some("face1.jpg".into());
        let mut b = wire(None, 0.91, "00:10");
        b.face_crop_ref = Some("face1.jpg".into());

        assert_eq!(buffer.add(a, Some(9)), AddOutcome::Inserted(0));
        assert_eq!(buffer.add(b, Some(9)), AddOutcome::Updated(0));
    }

    #[test]
    fn test_no_identity_never_dedups() {
        let mut buffer = CandidateBuffer::new();
        assert_eq!(buffer.add(wire(None, 0.9, "00:10"), None), AddOutcome::Inserted(0));
        assert_eq!(buffer.add(wire(None, 0.9, "00:10"), None), AddOutcome::Inserted(1));
    }

    #[test]
    fn test_name_edit_uppercased_badge_capped() {
        let mut buffer = CandidateBuffer::new();
        buffer.add(wire(Some(101), 0.9, "00:00"), None);
        buffer.set_edit(0, CandidateEdit::Name("  smith ".into()));
        buffer.set_edit(0, CandidateEdit::Badge("x".repeat(200)));

        let c = buffer.get(0).unwrap();
        assert_eq!(c.edits.name_override.as_deref(), Some("SMITH"));
        assert_eq!(c.edits.badge_override.as_ref().unwrap().len(), 64);
    }

    #[test]
    fn test_undo_restores_pending_preserves_edits() {
        let mut buffer = CandidateBuffer::new();
        buffer.add(wire(Some(101), 0.9, "00:00"), None);
        buffer.set_edit(0, CandidateEdit::Notes("note".into()));
        buffer.decide(0, false, 1000);
        assert_eq!(buffer.get(0).unwrap().review.status, ReviewStatus::Rejected);

        buffer.undo(0);
        let c = buffer.get(0).unwrap();
        assert_eq!(c.review.status, ReviewStatus::Pending);
        assert_eq!(c.review.decided_at, None);
        assert_eq!(c.edits.notes.as_deref(), Some("note"));
    }

    #[test]
    fn test_freeze_drops_arrivals() {
        let mut buffer = CandidateBuffer::new();
        buffer.add(wire(Some(101), 0.9, "00:00"), None);
        buffer.freeze();
        assert_eq!(buffer.add(wire(Some(102), 0.8, "00:05"), None), AddOutcome::Dropped);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_export_accepted_excludes_rejected_only() {
        let mut buffer = CandidateBuffer::new();
        buffer.add(wire(Some(101), 0.9, "00:00"), None);
        buffer.add(wire(Some(102), 0.8, "00:05"), None);
        buffer.add(wire(Some(103), 0.7, "00:10"), None);
        buffer.decide(1, false, 1000);
        buffer.decide(0, true, 1000);

        let exported = buffer.export_accepted();
        assert_eq!(exported.len(), 2);
        assert!(exported.iter().all(|c| c.appearance_id != Some(102)));
    }

    #[test]
    fn test_ops_on_unknown_id() {
        let mut buffer = CandidateBuffer::new();
        assert!(!buffer.decide(42, true, 0));
        assert!(!buffer.undo(42));
        assert!(!buffer.set_edit(42, CandidateEdit::Notes("x".into())));
    }
}
