//! Storage location of a tar, as recorded by the tar referential.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a tar. Only ever moves forward:
/// `BuildingOnDisk -> ReadyOnDisk -> OnTape`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TarLocation {
    /// Still being appended to; size and digest unknown.
    BuildingOnDisk,
    /// Closed, size and digest known, not confirmed on tape.
    ReadyOnDisk,
    /// Confirmed copied to tape; the disk copy is a disposable cache.
    OnTape {
        /// Cartridge holding the copy.
        tape_code: String,
        /// File index of the tar on the cartridge.
        file_position: u32,
    },
}

impl TarLocation {
    /// Position in the lifecycle.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::BuildingOnDisk => 0,
            Self::ReadyOnDisk => 1,
            Self::OnTape { .. } => 2,
        }
    }

    /// Whether moving from `self` to `next` is a single forward step.
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        next.rank() == self.rank() + 1
    }

    /// Whether the local disk copy may be deleted.
    #[must_use]
    pub const fn is_on_tape(&self) -> bool {
        matches!(self, Self::OnTape { .. })
    }

    /// Upper-case name used in logs and error messages.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::BuildingOnDisk => "BUILDING_ON_DISK",
            Self::ReadyOnDisk => "READY_ON_DISK",
            Self::OnTape { .. } => "ON_TAPE",
        }
    }
}

impl fmt::Display for TarLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnTape {
                tape_code,
                file_position,
            } => write!(f, "ON_TAPE({tape_code}#{file_position})"),
            other => f.write_str(other.kind_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_tape() -> TarLocation {
        TarLocation::OnTape {
            tape_code: "VIT0001".to_owned(),
            file_position: 12,
        }
    }

    #[test]
    fn test_forward_only_transitions() {
        let building = TarLocation::BuildingOnDisk;
        let ready = TarLocation::ReadyOnDisk;
        assert!(building.can_transition_to(&ready));
        assert!(ready.can_transition_to(&on_tape()));

        assert!(!building.can_transition_to(&on_tape()));
        assert!(!ready.can_transition_to(&building));
        assert!(!on_tape().can_transition_to(&ready));
        assert!(!ready.can_transition_to(&ready));
    }

    #[test]
    fn test_tagged_json_layout() {
        let json = serde_json::to_value(on_tape()).expect("serialize");
        assert_eq!(json["type"], "on_tape");
        assert_eq!(json["tape_code"], "VIT0001");
        assert_eq!(json["file_position"], 12);

        let ready: TarLocation =
            serde_json::from_str(r#"{"type":"ready_on_disk"}"#).expect("deserialize");
        assert_eq!(ready, TarLocation::ReadyOnDisk);
    }

    #[test]
    fn test_unknown_location_kind_is_rejected() {
        let parsed = serde_json::from_str::<TarLocation>(r#"{"type":"on_cloud"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(TarLocation::BuildingOnDisk.to_string(), "BUILDING_ON_DISK");
        assert_eq!(on_tape().to_string(), "ON_TAPE(VIT0001#12)");
    }
}
