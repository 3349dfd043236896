//! End-to-end scenarios exercising the full parse → analyze → lower →
//! optimize → codegen pipeline (and the decompiler on its output).

use lcc::diagnostics::{AllocationError, CompileError, SemanticError};
use lcc::instruction::{Opcode, MAX_REGISTERS, MAX_SLOTS};
use lcc::orchestrator;
use pretty_assertions::assert_eq;

#[test]
fn vtx_by_distance_matches_literal_wire_text() {
    // Exact byte-equivalent command lines for a known-good scenario.
    let src = "const { flight, override } = inav;\nif (flight.homeDistance > 100) { override.vtx.power = 3; }";
    let out = orchestrator::compile(src).unwrap();
    assert_eq!(
        out.commands,
        vec!["logic 0 1 -1 2 2 0 0 100 0".to_string(), "logic 1 1 0 32 0 3 0 0 0".to_string(),],
    );
}

#[test]
fn vtx_power_scales_with_distance() {
    let src = r#"
        if (flight.homeDistance > 500) {
            override.vtx.power = 5;
        }
        if (flight.homeDistance > 1000) {
            override.vtx.power = 3;
        }
    "#;
    let out = orchestrator::compile(src).unwrap();
    assert!(out.success);
    assert_eq!(out.stats.slots_used, 4);
}

#[test]
fn on_arm_captures_home_heading() {
    // GT(arm_timer, 0), EDGE(lc=0, duration), then
    // the body action gated on the EDGE slot — three records total.
    let src = r#"
        on.arm({ delay: 500 }, () => {
            override.headingTarget = flight.heading;
        });
    "#;
    let out = orchestrator::compile(src).unwrap();
    assert_eq!(out.stats.slots_used, 3);
    let edge_marker = format!(" {} ", Opcode::Edge as i32);
    assert!(out.commands.iter().any(|c| c.contains(&edge_marker)));
    assert!(out.commands[1].contains(&edge_marker));
    assert!(out.commands[2].ends_with(" 0"));
    assert_eq!(out.commands[2].split(' ').nth(2), Some("1"));
}

#[test]
fn complex_guard_combines_and_or() {
    let src = r#"
        if (flight.altitude > 50 && flight.speed > 5 || flight.rssi < 20) {
            override.armingSafety = 1;
        }
    "#;
    let out = orchestrator::compile(src).unwrap();
    assert!(out.success);
    assert!(out.stats.slots_used >= 4);
}

#[test]
fn register_arithmetic_uses_gvar_set() {
    let src = r#"
        var counter = 0;
        on.always(() => {
            counter += 1;
        });
    "#;
    let out = orchestrator::compile(src).unwrap();
    assert!(out.commands.iter().any(|c| c.contains(&format!(" {} ", Opcode::Set as i32))));
}

#[test]
fn register_self_increment_uses_dedicated_opcode() {
    // Spec scenario 4: `gvar[0] = gvar[0] + 1;` compiles to one record
    // using the register-increment opcode, operand_a = (VALUE, 0),
    // operand_b = (VALUE, 1) — not a generic Add followed by a Set.
    let src = "on.always(() => { gvar[0] = gvar[0] + 1; });";
    let out = orchestrator::compile(src).unwrap();
    assert_eq!(out.commands, vec![format!("logic 0 1 -1 {} 0 0 0 1 0", Opcode::Inc as i32)]);
}

#[test]
fn decompile_round_trips_scenario_one() {
    let src = r#"
        if (flight.homeDistance > 500) {
            override.vtx.power = 5;
        }
    "#;
    let compiled = orchestrator::compile(src).unwrap();
    let instructions = orchestrator::parse_commands(&compiled.commands.join("\n")).unwrap();
    let decompiled = orchestrator::decompile(&instructions).unwrap();
    assert!(decompiled.source.contains("flight.homeDistance > 500"));
    assert!(decompiled.source.contains("override.vtx.power = 5"));
}

#[test]
fn sixty_fifth_record_overflows_the_table() {
    let mut src = String::new();
    for i in 0..33 {
        src.push_str(&format!("if (flight.homeDistance > {}) {{ gvar[0] = {}; }}\n", i, i));
    }
    let err = orchestrator::compile(&src).unwrap_err();
    match err {
        CompileError::Codegen(lcc::diagnostics::CodegenError::TableOverflow { cap, .. }) => {
            assert_eq!(cap, MAX_SLOTS);
        }
        other => panic!("expected table overflow, got {:?}", other),
    }
}

#[test]
fn ninth_register_exhausts_allocation() {
    let mut src = String::new();
    for i in 0..9 {
        src.push_str(&format!("var v{} = 0;\n", i));
    }
    let err = orchestrator::compile(&src).unwrap_err();
    match err {
        CompileError::Allocation(AllocationError::RegisterExhausted { .. }) => {}
        other => panic!("expected register exhaustion, got {:?}", other),
    }
    assert_eq!(MAX_REGISTERS, 8);
}

#[test]
fn cyclic_constant_is_rejected() {
    let src = r#"
        const a = b;
        const b = a;
        if (a > 1) { gvar[0] = 1; }
    "#;
    let err = orchestrator::compile(src).unwrap_err();
    match err {
        CompileError::Semantic(SemanticError::CyclicConstant { .. }) => {}
        other => panic!("expected cyclic constant error, got {:?}", other),
    }
}

#[test]
fn negated_sibling_condition_reuses_the_slot() {
    let src = r#"
        if (flight.armTimer > 0) {
            gvar[0] = 1;
        }
        if (!(flight.armTimer > 0)) {
            gvar[1] = 1;
        }
    "#;
    let out = orchestrator::compile(src).unwrap();
    // One shared comparison slot, one extra NOT, two actions: 4 records.
    assert_eq!(out.stats.slots_used, 4);
}
