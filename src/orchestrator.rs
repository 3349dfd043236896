//! Wires the pipeline stages together and shapes their output into the
//! two result types a caller actually wants: a compiled
//! rule table plus warnings, or reconstructed source plus warnings.
//!
//! First hard error at any stage aborts the whole pipeline; warnings from
//! every stage that ran are preserved regardless, the same "collect as
//! far as we can get and report everything we found" shape `udashboard`'s
//! `config` loader uses for a directory of malformed files.

use crate::diagnostics::{CompileError, DecompileError, Diagnostic};
use crate::instruction::Instruction;
use crate::{analyzer, codegen, decompiler, optimizer, parser, vars};
use serde::Serialize;

/// The compile contract's `stats` shape, plus the
/// capacity figures a CLI/tooling caller needs to show headroom.
#[derive(Debug, Serialize)]
pub struct CompileStats {
    pub handlers: usize,
    pub conditions: usize,
    pub actions: usize,
    pub slots_used: usize,
    pub slots_total: usize,
    pub gvars_used: usize,
    pub gvars_total: usize,
}

#[derive(Debug, Serialize)]
pub struct CompileOutput {
    pub success: bool,
    pub commands: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: CompileStats,
}

/// The decompile contract's `stats` shape.
#[derive(Debug, Serialize)]
pub struct DecompileStats {
    pub total: usize,
    pub enabled: usize,
    pub groups: usize,
}

#[derive(Debug, Serialize)]
pub struct DecompileOutput {
    pub success: bool,
    pub source: String,
    pub warnings: Vec<String>,
    pub stats: DecompileStats,
}

#[tracing::instrument(skip(source))]
pub fn compile(source: &str) -> Result<CompileOutput, CompileError> {
    let program = parser::parse(source)?;
    let mut warnings: Vec<Diagnostic> = Vec::new();

    let semantic = analyzer::analyze(&program)?;
    warnings.extend(semantic.into_vec());

    let mut lowered = vars::lower(&program)?;
    let registers_used = lowered.register_prelude.len();

    optimizer::optimize(&mut lowered.handlers);

    let handlers = lowered.handlers.len();
    let instructions = codegen::generate(&lowered)?;
    let conditions = instructions.iter().filter(|i| i.operation.produces_bool()).count();
    let actions = instructions.iter().filter(|i| i.operation.is_action()).count();

    Ok(CompileOutput {
        success: true,
        stats: CompileStats {
            handlers,
            conditions,
            actions,
            slots_used: instructions.len(),
            slots_total: crate::instruction::MAX_SLOTS,
            gvars_used: registers_used,
            gvars_total: crate::instruction::MAX_REGISTERS,
        },
        commands: instructions.iter().map(Instruction::to_command).collect(),
        warnings: warnings.iter().map(Diagnostic::to_string).collect(),
    })
}

#[tracing::instrument(skip(instructions))]
pub fn decompile(instructions: &[Instruction]) -> Result<DecompileOutput, DecompileError> {
    let total = instructions.len();
    let enabled = instructions.iter().filter(|i| i.enabled).count();
    let (source, diagnostics, groups) = decompiler::decompile(instructions)?;
    Ok(DecompileOutput { success: true, source, warnings: diagnostics.as_strings(), stats: DecompileStats { total, enabled, groups } })
}

/// Parses `logic <slot> <enabled> <activator> <op> <a_type> <a_val>
/// <b_type> <b_val> <flags>` lines, the inverse of
/// [`Instruction::to_command`], for feeding a dumped rule table back
/// through [`decompile`].
pub fn parse_commands(text: &str) -> Result<Vec<Instruction>, DecompileError> {
    use crate::instruction::{Opcode, Operand, OperandType};

    fn opcode_from_i32(v: i32) -> Option<Opcode> {
        const VARIANTS: [Opcode; 57] = [
            Opcode::True, Opcode::Equal, Opcode::GreaterThan, Opcode::LowerThan, Opcode::Low, Opcode::Mid, Opcode::High,
            Opcode::And, Opcode::Or, Opcode::Xor, Opcode::Nand, Opcode::Nor, Opcode::Not, Opcode::Sticky, Opcode::Add,
            Opcode::Sub, Opcode::Mul, Opcode::Div, Opcode::Modulus, Opcode::Min, Opcode::Max, Opcode::Set, Opcode::Inc,
            Opcode::Dec, Opcode::Sin, Opcode::Cos, Opcode::Tan, Opcode::MapInput, Opcode::MapOutput,
            Opcode::OverrideThrottleScale, Opcode::OverrideThrottle, Opcode::OverrideArmingSafety, Opcode::SetVtxPowerLevel,
            Opcode::SetVtxBand, Opcode::SetVtxChannel, Opcode::SetOsdLayout, Opcode::InvertRoll, Opcode::InvertPitch,
            Opcode::InvertYaw, Opcode::SwapRollYaw, Opcode::SetHeadingTarget, Opcode::LoiterOverride, Opcode::SetProfile,
            Opcode::RcChannelOverride, Opcode::FlightAxisAngleOverride, Opcode::FlightAxisRateOverride,
            Opcode::OverrideMinGroundSpeed, Opcode::SetGimbalSensitivity, Opcode::LedPinPwm, Opcode::PortSet,
            Opcode::DisableGpsFix, Opcode::ResetMagCalibration, Opcode::Edge, Opcode::Delay, Opcode::Timer, Opcode::Delta,
            Opcode::ApproxEqual,
        ];
        VARIANTS.get(v as usize).copied()
    }

    fn operand_type_from_i32(v: i32) -> Option<OperandType> {
        match v {
            0 => Some(OperandType::Value),
            1 => Some(OperandType::RcChannel),
            2 => Some(OperandType::Flight),
            3 => Some(OperandType::FlightMode),
            4 => Some(OperandType::LcResult),
            5 => Some(OperandType::Gvar),
            6 => Some(OperandType::Pid),
            7 => Some(OperandType::Waypoints),
            _ => None,
        }
    }

    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 10 || fields[0] != "logic" {
            continue;
        }
        let nums: Vec<i64> = fields[1..].iter().filter_map(|f| f.parse::<i64>().ok()).collect();
        if nums.len() != 9 {
            continue;
        }
        // nums[0]=slot, [1]=enabled, [2]=activator, [3]=op, [4]=a_type,
        // [5]=a_val, [6]=b_type, [7]=b_val, [8]=flags — mirrors the field
        // order `Instruction::to_command` writes.
        let activator = if nums[2] == -1 { None } else { Some(nums[2] as usize) };
        let operation = opcode_from_i32(nums[3] as i32).unwrap_or(Opcode::True);
        let operand_a = Operand {
            operand_type: operand_type_from_i32(nums[4] as i32).unwrap_or(OperandType::Value),
            value: nums[5] as i32,
        };
        let operand_b = Operand {
            operand_type: operand_type_from_i32(nums[6] as i32).unwrap_or(OperandType::Value),
            value: nums[7] as i32,
        };
        out.push(Instruction {
            slot: nums[0] as usize,
            enabled: nums[1] != 0,
            activator,
            operation,
            operand_a,
            operand_b,
            flags: nums[8] as i32,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_simple_if() {
        let src = "if (flight.homeDistance > 100) {\n  override.vtx.power = 5;\n}\n";
        let out = compile(src).unwrap();
        assert!(out.success);
        assert_eq!(out.commands.len(), 2);
        assert_eq!(out.stats.slots_used, 2);
    }

    #[test]
    fn surfaces_parse_error() {
        let src = "if (flight.homeDistance > ) { override.vtx.power = 5; }";
        assert!(compile(src).is_err());
    }

    #[test]
    fn decompile_round_trips_command_text() {
        let src = "if (flight.homeDistance > 100) {\n  override.vtx.power = 5;\n}\n";
        let compiled = compile(src).unwrap();
        let instructions = parse_commands(&compiled.commands.join("\n")).unwrap();
        let decompiled = decompile(&instructions).unwrap();
        assert!(decompiled.source.contains("if (flight.homeDistance > 100)"));
        assert!(decompiled.source.contains("override.vtx.power = 5;"));
    }
}
