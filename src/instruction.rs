//! The target wire format: operand pairs, the frozen opcode enumeration, and
//! the fixed-width instruction record uploaded to the device.
//!
//! These two enumerations are part of the wire contract: their integer
//! values are frozen and must match the on-device firmware exactly. Per the
//! earlier revisions of the source this
//! toolchain descends from carried two incompatible opcode numberings for
//! register ops and VTX ops; this module freezes exactly one and treats the
//! other as historical.

use serde::Serialize;
use std::fmt;

/// Rule table capacity enforced by the on-device engine.
pub const MAX_SLOTS: usize = 64;

/// Number of persistent integer registers.
pub const MAX_REGISTERS: usize = 8;

/// Clamp range for register values.
pub const REGISTER_RANGE: (i32, i32) = (-1_000_000, 1_000_000);

/// Sentinel meaning "no activator" on the wire.
pub const NO_ACTIVATOR: i32 = -1;

/// Tag half of an operand pair. Eight variants, frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum OperandType {
    Value = 0,
    RcChannel = 1,
    Flight = 2,
    FlightMode = 3,
    LcResult = 4,
    Gvar = 5,
    Pid = 6,
    Waypoints = 7,
}

impl OperandType {
    /// Accept the historical alternate spelling used for "result of another
    /// record" in some revisions of the source.
    /// Source-level test fixtures may use either name; only one, `LcResult`,
    /// is ever produced by this toolchain.
    pub fn from_source_name(name: &str) -> Option<OperandType> {
        match name {
            "VALUE" => Some(OperandType::Value),
            "RC_CHANNEL" => Some(OperandType::RcChannel),
            "FLIGHT" => Some(OperandType::Flight),
            "FLIGHT_MODE" => Some(OperandType::FlightMode),
            "LC_RESULT" | "LOGIC_CONDITION" => Some(OperandType::LcResult),
            "GVAR" => Some(OperandType::Gvar),
            "PID" => Some(OperandType::Pid),
            "WAYPOINTS" => Some(OperandType::Waypoints),
            _ => None,
        }
    }
}

/// One operand slot: a tagged pair `(operand_type, operand_value)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Operand {
    pub operand_type: OperandType,
    pub value: i32,
}

impl Operand {
    pub fn value(v: i32) -> Operand {
        Operand { operand_type: OperandType::Value, value: v }
    }

    pub fn rc_channel(index: i32) -> Operand {
        Operand { operand_type: OperandType::RcChannel, value: index }
    }

    pub fn flight(code: i32) -> Operand {
        Operand { operand_type: OperandType::Flight, value: code }
    }

    pub fn flight_mode(index: i32) -> Operand {
        Operand { operand_type: OperandType::FlightMode, value: index }
    }

    pub fn lc_result(slot: usize) -> Operand {
        Operand { operand_type: OperandType::LcResult, value: slot as i32 }
    }

    pub fn gvar(index: i32) -> Operand {
        Operand { operand_type: OperandType::Gvar, value: index }
    }

    /// The zero `(VALUE, 0)` operand used to fill an unused slot half.
    pub fn none() -> Operand {
        Operand::value(0)
    }
}

/// The frozen operation enumeration. 57 variants; integer
/// values are part of the wire contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum Opcode {
    True = 0,
    Equal = 1,
    GreaterThan = 2,
    LowerThan = 3,
    Low = 4,
    Mid = 5,
    High = 6,
    And = 7,
    Or = 8,
    Xor = 9,
    Nand = 10,
    Nor = 11,
    Not = 12,
    Sticky = 13,
    Add = 14,
    Sub = 15,
    Mul = 16,
    Div = 17,
    Modulus = 18,
    Min = 19,
    Max = 20,
    Set = 21,
    Inc = 22,
    Dec = 23,
    Sin = 24,
    Cos = 25,
    Tan = 26,
    MapInput = 27,
    MapOutput = 28,
    OverrideThrottleScale = 29,
    OverrideThrottle = 30,
    OverrideArmingSafety = 31,
    SetVtxPowerLevel = 32,
    SetVtxBand = 33,
    SetVtxChannel = 34,
    SetOsdLayout = 35,
    InvertRoll = 36,
    InvertPitch = 37,
    InvertYaw = 38,
    SwapRollYaw = 39,
    SetHeadingTarget = 40,
    LoiterOverride = 41,
    SetProfile = 42,
    RcChannelOverride = 43,
    FlightAxisAngleOverride = 44,
    FlightAxisRateOverride = 45,
    OverrideMinGroundSpeed = 46,
    SetGimbalSensitivity = 47,
    LedPinPwm = 48,
    PortSet = 49,
    DisableGpsFix = 50,
    ResetMagCalibration = 51,
    Edge = 52,
    Delay = 53,
    Timer = 54,
    Delta = 55,
    ApproxEqual = 56,
}

impl Opcode {
    /// Whether this opcode's result is consumed as a boolean by an
    /// activator reference.
    pub fn produces_bool(self) -> bool {
        matches!(
            self,
            Opcode::True
                | Opcode::Equal
                | Opcode::GreaterThan
                | Opcode::LowerThan
                | Opcode::Low
                | Opcode::Mid
                | Opcode::High
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Nand
                | Opcode::Nor
                | Opcode::Not
                | Opcode::Sticky
                | Opcode::Edge
                | Opcode::Delay
                | Opcode::Timer
                | Opcode::Delta
                | Opcode::ApproxEqual
        )
    }

    /// Whether this opcode writes to a register or a catalog-backed
    /// writable leaf rather than computing an intermediate value (used for
    /// the decompiler's action/condition split and for compile stats).
    pub fn is_action(self) -> bool {
        matches!(
            self,
            Opcode::Set
                | Opcode::Inc
                | Opcode::Dec
                | Opcode::OverrideThrottleScale
                | Opcode::OverrideThrottle
                | Opcode::OverrideArmingSafety
                | Opcode::SetVtxPowerLevel
                | Opcode::SetVtxBand
                | Opcode::SetVtxChannel
                | Opcode::SetOsdLayout
                | Opcode::InvertRoll
                | Opcode::InvertPitch
                | Opcode::InvertYaw
                | Opcode::SwapRollYaw
                | Opcode::SetHeadingTarget
                | Opcode::LoiterOverride
                | Opcode::SetProfile
                | Opcode::RcChannelOverride
                | Opcode::FlightAxisAngleOverride
                | Opcode::FlightAxisRateOverride
                | Opcode::OverrideMinGroundSpeed
                | Opcode::SetGimbalSensitivity
                | Opcode::LedPinPwm
                | Opcode::PortSet
                | Opcode::DisableGpsFix
                | Opcode::ResetMagCalibration
        )
    }
}

/// One record in the rule table: a fixed-width tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub slot: usize,
    pub enabled: bool,
    /// `None` is the wire's `-1`: "gated by nothing, always evaluated".
    pub activator: Option<usize>,
    pub operation: Opcode,
    pub operand_a: Operand,
    pub operand_b: Operand,
    pub flags: i32,
}

impl Instruction {
    /// Render the exact ASCII command line expected by the device CLI
    /// Byte-equivalence of this text is a correctness
    /// criterion, not a cosmetic detail.
    pub fn to_command(&self) -> String {
        format!(
            "logic {} {} {} {} {} {} {} {} {}",
            self.slot,
            self.enabled as i32,
            self.activator.map(|s| s as i32).unwrap_or(NO_ACTIVATOR),
            self.operation as i32,
            self.operand_a.operand_type as i32,
            self.operand_a.value,
            self.operand_b.operand_type as i32,
            self.operand_b.value,
            self.flags,
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_command())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_matches_wire_format() {
        let insn = Instruction {
            slot: 0,
            enabled: true,
            activator: None,
            operation: Opcode::GreaterThan,
            operand_a: Operand::flight(10),
            operand_b: Operand::value(100),
            flags: 0,
        };
        assert_eq!(insn.to_command(), "logic 0 1 -1 2 2 10 0 100 0");
    }

    #[test]
    fn activator_renders_as_referencing_slot() {
        let insn = Instruction {
            slot: 1,
            enabled: true,
            activator: Some(0),
            operation: Opcode::SetVtxPowerLevel,
            operand_a: Operand::value(3),
            operand_b: Operand::none(),
            flags: 0,
        };
        assert_eq!(insn.to_command(), "logic 1 1 0 32 0 3 0 0 0");
    }

    #[test]
    fn opcode_enum_is_frozen_at_57_variants() {
        assert_eq!(Opcode::ApproxEqual as i32, 56);
    }
}
