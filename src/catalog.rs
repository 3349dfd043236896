//! The static API catalog: a read-only tree describing every
//! identifier a program may read or write, keyed by dotted path. Built once
//! at process start via `lazy_static`, the same way `udashboard`'s
//! `v1`/`config` modules build their static style tables, and never mutated
//! afterwards; the catalog is the only shared resource in this crate.

use crate::instruction::{Opcode, Operand, OperandType};
use lazy_static::lazy_static;
use std::collections::HashMap;

/// The declared kind of a catalog leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Number,
    Bool,
    Object,
    Function,
    ReadOnly,
}

/// One leaf of the catalog tree.
#[derive(Debug, Clone)]
pub struct Leaf {
    pub path: &'static str,
    pub kind: Kind,
    pub writable: bool,
    pub range: Option<(i32, i32)>,
    /// Operand encoding used when this leaf is read.
    pub read: Option<(OperandType, i32)>,
    /// Opcode used when this leaf is the target of an assignment.
    pub write_op: Option<Opcode>,
}

impl Leaf {
    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or(self.path)
    }

    pub fn read_operand(&self) -> Option<Operand> {
        self.read.map(|(operand_type, value)| Operand { operand_type, value })
    }

    pub fn in_range(&self, value: i64) -> bool {
        match self.range {
            Some((min, max)) => value >= min as i64 && value <= max as i64,
            None => true,
        }
    }
}

/// Fixed mode-index table for `flight.mode.<name>`.
pub const FLIGHT_MODES: &[(&str, i32)] = &[
    ("arm", 0),
    ("angle", 1),
    ("horizon", 2),
    ("navAltHold", 3),
    ("navPosHold", 4),
    ("navRth", 5),
    ("navWp", 6),
    ("headFree", 7),
    ("failsafe", 8),
    ("navLaunch", 9),
    ("manualOverride", 10),
    ("navCruise", 11),
];

pub fn flight_mode_index(name: &str) -> Option<i32> {
    FLIGHT_MODES.iter().find(|(n, _)| *n == name).map(|(_, i)| *i)
}

pub fn flight_mode_name(index: i32) -> Option<&'static str> {
    FLIGHT_MODES.iter().find(|(_, i)| *i == index).map(|(n, _)| *n)
}

/// The catalog itself: a flat map from dotted path to leaf, populated from
/// the nested namespace tables below.
pub struct Catalog {
    leaves: HashMap<&'static str, Leaf>,
}

impl Catalog {
    pub fn lookup(&self, path: &str) -> Option<&Leaf> {
        self.leaves.get(path)
    }

    /// All root namespace names this catalog knows about, for validating
    /// `const { ... } = inav;` destructuring and for the decompiler's
    /// boilerplate line.
    pub fn roots(&self) -> impl Iterator<Item = &'static str> {
        ["flight", "rc", "override", "waypoint", "time", "gvar"].into_iter()
    }

    pub fn is_known_root(&self, name: &str) -> bool {
        self.roots().any(|r| r == name)
    }

    /// Reverse lookup used by the decompiler: which leaf, if any, reads
    /// via this exact `(OperandType, value)` encoding.
    pub fn leaf_for_read(&self, operand_type: OperandType, value: i32) -> Option<&Leaf> {
        self.leaves.values().find(|leaf| leaf.read == Some((operand_type, value)))
    }

    /// Reverse lookup used by the decompiler: which leaf, if any, is
    /// written through this opcode. Ambiguous for `Opcode::Set`, which
    /// both `gvar[i] = ...` and `waypoint.index = ...` lower to; callers
    /// disambiguate `gvar` writes by operand shape before falling back
    /// to this.
    pub fn leaf_for_write_op(&self, op: Opcode) -> Option<&Leaf> {
        self.leaves.values().find(|leaf| leaf.write_op == Some(op))
    }

    fn build() -> Catalog {
        let mut leaves = HashMap::new();
        for leaf in FLIGHT_LEAVES.iter().chain(OVERRIDE_LEAVES.iter()).chain(WAYPOINT_LEAVES.iter()).chain(TIME_LEAVES.iter()) {
            leaves.insert(leaf.path, leaf.clone());
        }
        for (name, index) in FLIGHT_MODES {
            let path: &'static str = Box::leak(format!("flight.mode.{}", name).into_boxed_str());
            leaves.insert(
                path,
                Leaf {
                    path,
                    kind: Kind::Bool,
                    writable: false,
                    range: None,
                    read: Some((OperandType::FlightMode, *index)),
                    write_op: None,
                },
            );
        }
        Catalog { leaves }
    }
}

macro_rules! leaf {
    ($path:literal, $kind:expr, readonly, $operand_type:expr, $value:expr) => {
        Leaf {
            path: $path,
            kind: $kind,
            writable: false,
            range: None,
            read: Some(($operand_type, $value)),
            write_op: None,
        }
    };
    ($path:literal, $kind:expr, readonly, $operand_type:expr, $value:expr, range $min:expr, $max:expr) => {
        Leaf {
            path: $path,
            kind: $kind,
            writable: false,
            range: Some(($min, $max)),
            read: Some(($operand_type, $value)),
            write_op: None,
        }
    };
    ($path:literal, $kind:expr, writable, $op:expr) => {
        Leaf {
            path: $path,
            kind: $kind,
            writable: true,
            range: None,
            read: None,
            write_op: Some($op),
        }
    };
    ($path:literal, $kind:expr, writable, $op:expr, range $min:expr, $max:expr) => {
        Leaf {
            path: $path,
            kind: $kind,
            writable: true,
            range: Some(($min, $max)),
            read: None,
            write_op: Some($op),
        }
    };
}

lazy_static! {
    static ref FLIGHT_LEAVES: Vec<Leaf> = vec![
        leaf!("flight.homeDistance", Kind::Number, readonly, OperandType::Flight, 0),
        leaf!("flight.homeDirection", Kind::Number, readonly, OperandType::Flight, 1),
        leaf!("flight.altitude", Kind::Number, readonly, OperandType::Flight, 2),
        leaf!("flight.vario", Kind::Number, readonly, OperandType::Flight, 3),
        leaf!("flight.speed", Kind::Number, readonly, OperandType::Flight, 4),
        leaf!("flight.heading", Kind::Number, readonly, OperandType::Flight, 5, range -180, 180),
        leaf!("flight.yaw", Kind::Number, readonly, OperandType::Flight, 6, range -180, 180),
        leaf!("flight.pitch", Kind::Number, readonly, OperandType::Flight, 7, range -180, 180),
        leaf!("flight.roll", Kind::Number, readonly, OperandType::Flight, 8, range -180, 180),
        leaf!("flight.cellVoltage", Kind::Number, readonly, OperandType::Flight, 9),
        leaf!("flight.rssi", Kind::Number, readonly, OperandType::Flight, 10, range 0, 100),
        leaf!("flight.gpsSats", Kind::Number, readonly, OperandType::Flight, 11),
        leaf!("flight.throttlePos", Kind::Number, readonly, OperandType::Flight, 12, range 0, 100),
        leaf!("flight.armTimer", Kind::Number, readonly, OperandType::Flight, 13),
        leaf!("flight.activeWaypoint", Kind::Number, readonly, OperandType::Waypoints, 0),
    ];

    static ref OVERRIDE_LEAVES: Vec<Leaf> = vec![
        leaf!("override.vtx.power", Kind::Number, writable, Opcode::SetVtxPowerLevel, range 0, 5),
        leaf!("override.vtx.band", Kind::Number, writable, Opcode::SetVtxBand, range 0, 5),
        leaf!("override.vtx.channel", Kind::Number, writable, Opcode::SetVtxChannel, range 0, 8),
        leaf!("override.throttleScale", Kind::Number, writable, Opcode::OverrideThrottleScale, range 0, 100),
        leaf!("override.throttle", Kind::Number, writable, Opcode::OverrideThrottle),
        leaf!("override.armingSafety", Kind::Bool, writable, Opcode::OverrideArmingSafety),
        leaf!("override.osdLayout", Kind::Number, writable, Opcode::SetOsdLayout),
        leaf!("override.invertRoll", Kind::Bool, writable, Opcode::InvertRoll),
        leaf!("override.invertPitch", Kind::Bool, writable, Opcode::InvertPitch),
        leaf!("override.invertYaw", Kind::Bool, writable, Opcode::InvertYaw),
        leaf!("override.swapRollYaw", Kind::Bool, writable, Opcode::SwapRollYaw),
        leaf!("override.headingTarget", Kind::Number, writable, Opcode::SetHeadingTarget, range -180, 180),
        leaf!("override.loiter", Kind::Bool, writable, Opcode::LoiterOverride),
        leaf!("override.profile", Kind::Number, writable, Opcode::SetProfile, range 0, 3),
        leaf!("override.minGroundSpeed", Kind::Number, writable, Opcode::OverrideMinGroundSpeed),
        leaf!("override.gimbalSensitivity", Kind::Number, writable, Opcode::SetGimbalSensitivity),
        leaf!("override.ledPinPwm", Kind::Number, writable, Opcode::LedPinPwm),
        leaf!("override.portSet", Kind::Number, writable, Opcode::PortSet),
        leaf!("override.disableGpsFix", Kind::Bool, writable, Opcode::DisableGpsFix),
        leaf!("override.resetMagCalibration", Kind::Bool, writable, Opcode::ResetMagCalibration),
        // Indexed: `override.rc[i] = value`. Codegen special-cases the
        // operand layout (channel index goes in operand_a, not the value),
        // so this leaf exists only so the analyzer accepts it as writable.
        leaf!("override.rc", Kind::Number, writable, Opcode::RcChannelOverride),
    ];

    static ref WAYPOINT_LEAVES: Vec<Leaf> = vec![
        leaf!("waypoint.index", Kind::Number, writable, Opcode::Set, range 0, 59),
        leaf!("waypoint.action", Kind::Number, readonly, OperandType::Waypoints, 1),
    ];

    static ref TIME_LEAVES: Vec<Leaf> = vec![
        leaf!("time.now", Kind::Number, readonly, OperandType::Flight, 14),
        leaf!("time.armTimer", Kind::Number, readonly, OperandType::Flight, 13),
    ];

    pub static ref CATALOG: Catalog = Catalog::build();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_leaf_resolves() {
        let leaf = CATALOG.lookup("flight.homeDistance").unwrap();
        assert!(!leaf.writable);
        assert_eq!(leaf.read, Some((OperandType::Flight, 0)));
    }

    #[test]
    fn writable_leaf_carries_opcode() {
        let leaf = CATALOG.lookup("override.vtx.power").unwrap();
        assert!(leaf.writable);
        assert_eq!(leaf.write_op, Some(Opcode::SetVtxPowerLevel));
    }

    #[test]
    fn unknown_path_is_none() {
        assert!(CATALOG.lookup("flight.doesNotExist").is_none());
    }

    #[test]
    fn flight_mode_round_trips() {
        let idx = flight_mode_index("failsafe").unwrap();
        assert_eq!(flight_mode_name(idx), Some("failsafe"));
        assert!(CATALOG.lookup("flight.mode.failsafe").is_some());
    }
}
