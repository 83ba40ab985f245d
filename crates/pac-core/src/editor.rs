//! ============================================================================
//! Per-Officer Editor
//! ============================================================================
//! Sequential pass over the verified set. Corrections are staged in a
//! map keyed by officer id and handed back only when the walk finishes;
//! nothing is persisted between steps.
//! ============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::buffer::MAX_BADGE_LEN;
use crate::types::VerifiedOfficer;

/// UK police forces selectable in the editor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoliceForce {
    MetropolitanPolice,
    CityOfLondonPolice,
    KentPolice,
    EssexPolice,
    SussexPolice,
    ThamesValleyPolice,
    GreaterManchesterPolice,
    MerseysidePolice,
    WestMidlandsPolice,
    WestYorkshirePolice,
    PoliceScotland,
    BritishTransportPolice,
}

impl PoliceForce {
    pub const ALL: [PoliceForce; 12] = [
        PoliceForce::MetropolitanPolice,
        PoliceForce::CityOfLondonPolice,
        PoliceForce::KentPolice,
        PoliceForce::EssexPolice,
        PoliceForce::SussexPolice,
        PoliceForce::ThamesValleyPolice,
        PoliceForce::GreaterManchesterPolice,
        PoliceForce::MerseysidePolice,
        PoliceForce::WestMidlandsPolice,
        PoliceForce::WestYorkshirePolice,
        PoliceForce::PoliceScotland,
        PoliceForce::BritishTransportPolice,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            PoliceForce::MetropolitanPolice => "Metropolitan Police",
            PoliceForce::CityOfLondonPolice => "City of London Police",
            PoliceForce::KentPolice => "Kent Police",
            PoliceForce::EssexPolice => "Essex Police",
            PoliceForce::SussexPolice => "Sussex Police",
            PoliceForce::ThamesValleyPolice => "Thames Valley Police",
            PoliceForce::GreaterManchesterPolice => "Greater Manchester Police",
            PoliceForce::MerseysidePolice => "Merseyside Police",
            PoliceForce::WestMidlandsPolice => "West Midlands Police",
            PoliceForce::WestYorkshirePolice => "West Yorkshire Police",
            PoliceForce::PoliceScotland => "Police Scotland",
            PoliceForce::BritishTransportPolice => "British Transport Police",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfficerRank {
    Constable,
    Sergeant,
    Inspector,
    ChiefInspector,
    Superintendent,
    ChiefSuperintendent,
    Commander,
    AssistantChiefConstable,
    DeputyChiefConstable,
    ChiefConstable,
}

impl OfficerRank {
    pub const ALL: [OfficerRank; 10] = [
        OfficerRank::Constable,
        OfficerRank::Sergeant,
        OfficerRank::Inspector,
        OfficerRank::ChiefInspector,
        OfficerRank::Superintendent,
        OfficerRank::ChiefSuperintendent,
        OfficerRank::Commander,
        OfficerRank::AssistantChiefConstable,
        OfficerRank::DeputyChiefConstable,
        OfficerRank::ChiefConstable,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            OfficerRank::Constable => "Constable",
            OfficerRank::Sergeant => "Sergeant",
            OfficerRank::Inspector => "Inspector",
            OfficerRank::ChiefInspector => "Chief Inspector",
            OfficerRank::Superintendent => "Superintendent",
            OfficerRank::ChiefSuperintendent => "Chief Superintendent",
            OfficerRank::Commander => "Commander",
            OfficerRank::AssistantChiefConstable => "Assistant Chief Constable",
            OfficerRank::DeputyChiefConstable => "Deputy Chief Constable",
            OfficerRank::ChiefConstable => "Chief Constable",
        }
    }
}

/// Observed deployment roles, multi-select.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OfficerRole {
    PublicOrder,
    ForwardIntelligence,
    EvidenceGatherer,
    PoliceLiaison,
    Medic,
    DogHandler,
    MountedUnit,
    Command,
}

impl OfficerRole {
    pub const ALL: [OfficerRole; 8] = [
        OfficerRole::PublicOrder,
        OfficerRole::ForwardIntelligence,
        OfficerRole::EvidenceGatherer,
        OfficerRole::PoliceLiaison,
        OfficerRole::Medic,
        OfficerRole::DogHandler,
        OfficerRole::MountedUnit,
        OfficerRole::Command,
    ];
}

/// Staged corrections for one officer. Empty drafts are not emitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OfficerEdits {
    pub name: Option<String>,
    pub badge: Option<String>,
    pub force: Option<PoliceForce>,
    pub rank: Option<OfficerRank>,
    pub roles: Vec<OfficerRole>,
    pub notes: Option<String>,
}

impl OfficerEdits {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.badge.is_none()
            && self.force.is_none()
            && self.rank.is_none()
            && self.roles.is_empty()
            && self.notes.is_none()
    }
}

/// What the field widgets show for the current officer: the staged
/// value when one exists, else the candidate's effective value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldPreview {
    pub name: Option<String>,
    pub badge: Option<String>,
    pub force: Option<String>,
    pub rank: Option<String>,
}

/// One sequential editing walk. `finish` consumes the session and emits
/// the staged map; dropping the session without finishing discards it.
pub struct EditorSession {
    officers: Vec<VerifiedOfficer>,
    cursor: usize,
    edits: HashMap<u64, OfficerEdits>,
}

impl EditorSession {
    pub fn new(officers: Vec<VerifiedOfficer>) -> Self {
        Self {
            officers,
            cursor: 0,
            edits: HashMap::new(),
        }
    }

    pub fn current(&self) -> Option<&VerifiedOfficer> {
        self.officers.get(self.cursor)
    }

    /// (1-based step, total steps) for the progress header.
    pub fn position(&self) -> (usize, usize) {
        (self.cursor + 1, self.officers.len())
    }

    pub fn is_last(&self) -> bool {
        self.cursor + 1 >= self.officers.len()
    }

    pub fn next(&mut self) -> bool {
        if self.is_last() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn previous(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    fn draft(&mut self) -> Option<&mut OfficerEdits> {
        let id = self.current()?.candidate.id;
        Some(self.edits.entry(id).or_default())
    }

    pub fn set_name(&mut self, name: &str) {
        let name = name.trim().to_uppercase();
        if let Some(draft) = self.draft() {
            draft.name = if name.is_empty() { None } else { Some(name) };
        }
    }

    pub fn set_badge(&mut self, badge: &str) {
        let badge: String = badge.trim().chars().take(MAX_BADGE_LEN).collect();
        if let Some(draft) = self.draft() {
            draft.badge = if badge.is_empty() { None } else { Some(badge) };
        }
    }

    pub fn set_force(&mut self, force: Option<PoliceForce>) {
        if let Some(draft) = self.draft() {
            draft.force = force;
        }
    }

    pub fn set_rank(&mut self, rank: Option<OfficerRank>) {
        if let Some(draft) = self.draft() {
            draft.rank = rank;
        }
    }

    pub fn toggle_role(&mut self, role: OfficerRole) {
        if let Some(draft) = self.draft() {
            if let Some(pos) = draft.roles.iter().position(|r| *r == role) {
                draft.roles.remove(pos);
            } else {
                draft.roles.push(role);
            }
        }
    }

    pub fn set_notes(&mut self, notes: &str) {
        let notes = notes.trim();
        if let Some(draft) = self.draft() {
            draft.notes = if notes.is_empty() {
                None
            } else {
                Some(notes.to_string())
            };
        }
    }

    /// Field values for the current step: staged over effective.
    pub fn preview(&self) -> FieldPreview {
        let Some(officer) = self.current() else {
            return FieldPreview::default();
        };
        let candidate = &officer.candidate;
        let staged = self.edits.get(&candidate.id);

        FieldPreview {
            name: staged
                .and_then(|e| e.name.clone())
                .or_else(|| candidate.effective_name().map(String::from)),
            badge: staged
                .and_then(|e| e.badge.clone())
                .or_else(|| candidate.effective_badge().map(String::from)),
            force: staged
                .and_then(|e| e.force.map(|f| f.display_name().to_string()))
                .or_else(|| candidate.effective_force().map(String::from)),
            rank: staged
                .and_then(|e| e.rank.map(|r| r.display_name().to_string()))
                .or_else(|| candidate.effective_rank().map(String::from)),
        }
    }

    /// Complete the walk and emit every non-empty staged draft.
    pub fn finish(self) -> HashMap<u64, OfficerEdits> {
        self.edits
            .into_iter()
            .filter(|(_, edits)| !edits.is_empty())
            .collect()
    }
}
