//! Counters reported by a reconciliation run.

use serde::{Deserialize, Serialize};

use super::fetch::DropReason;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub created_count: u32,
    pub reused_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCounts {
    /// Distinct recurring patterns observed, before the occurrence threshold
    pub count: u32,
}

/// Room-schedule entries discarded by the attribution filter, per reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounts {
    pub room_mismatch: u32,
    pub no_class: u32,
    pub teacher_count: u32,
    pub subject_count: u32,
    pub malformed: u32,
}

impl DropCounts {
    pub fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::RoomMismatch => self.room_mismatch += 1,
            DropReason::NoClass => self.no_class += 1,
            DropReason::TeacherCount => self.teacher_count += 1,
            DropReason::SubjectCount => self.subject_count += 1,
            DropReason::Malformed => self.malformed += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.room_mismatch + self.no_class + self.teacher_count + self.subject_count + self.malformed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub classes: EntityCounts,
    pub courses: EntityCounts,
    pub times: SlotCounts,
    pub dropped: DropCounts,
    /// Name lookups that matched more than one local record
    pub ambiguous_matches: u32,
}
