//! Decompiler: reconstructs readable source from a rule
//! table. Best-effort by nature — register names, `let` bindings, and
//! arrow-function sugar are gone once compiled, so the output favors
//! plain `if`/`on.always` handlers with literal conditions over guessing
//! at what the original author's higher-level shape might have been.

use crate::ast::*;
use crate::catalog::{flight_mode_name, Catalog, CATALOG};
use crate::diagnostics::{Diagnostics, DecompileError, Span};
use crate::instruction::{Instruction, Opcode, Operand, OperandType, MAX_SLOTS};
use std::collections::{HashMap, HashSet};

const UNKNOWN_SPAN: Span = Span { line: 0, column: 0 };

pub struct Decompiler<'a> {
    instructions: &'a [Instruction],
    catalog: &'a Catalog,
    diagnostics: Diagnostics,
    used_roots: HashSet<String>,
    groups: usize,
}

/// `(source, diagnostics, groups)` — `groups` is the number of top-level
/// statements emitted (one per activator, plus orphaned on.always actions),
/// matching the `stats.groups` field of the decompile output contract.
pub fn decompile(instructions: &[Instruction]) -> Result<(String, Diagnostics, usize), DecompileError> {
    if instructions.len() > MAX_SLOTS {
        return Err(DecompileError::TooManyRecords { count: instructions.len(), cap: MAX_SLOTS });
    }
    let mut d = Decompiler { instructions, catalog: &CATALOG, diagnostics: Diagnostics::new(), used_roots: HashSet::new(), groups: 0 };
    let source = d.run();
    Ok((source, d.diagnostics, d.groups))
}

impl<'a> Decompiler<'a> {
    fn run(&mut self) -> String {
        let referenced: HashSet<usize> = self
            .instructions
            .iter()
            .filter(|i| i.enabled)
            .flat_map(|i| {
                let mut refs = Vec::new();
                if let Some(a) = i.activator {
                    refs.push(a);
                }
                if i.operand_a.operand_type == OperandType::LcResult {
                    refs.push(i.operand_a.value as usize);
                }
                if i.operand_b.operand_type == OperandType::LcResult {
                    refs.push(i.operand_b.value as usize);
                }
                refs
            })
            .collect();

        let mut groups: HashMap<Option<usize>, Vec<&Instruction>> = HashMap::new();
        for insn in self.instructions.iter().filter(|i| i.enabled) {
            if referenced.contains(&insn.slot) {
                continue;
            }
            if !insn.operation.is_action() {
                if insn.activator.is_none() {
                    // A bare condition slot, never consumed as an action's
                    // activator and never referenced by another
                    // instruction: dead code on the device, nothing to
                    // emit, but worth flagging.
                    self.diagnostics.warn(format!("slot {} computes a value that is never used", insn.slot));
                }
                continue;
            }
            if let Some(a) = insn.activator {
                if a >= self.instructions.len() || !self.instructions[a].enabled || !self.instructions[a].operation.produces_bool() {
                    self.diagnostics.warn_at(format!("action at slot {} references an invalid activator; treating as unconditional", insn.slot), UNKNOWN_SPAN);
                    groups.entry(None).or_default().push(insn);
                    continue;
                }
            }
            groups.entry(insn.activator).or_default().push(insn);
        }

        let mut bodies = Vec::new();
        let mut activator_order: Vec<Option<usize>> = groups.keys().copied().collect();
        activator_order.sort_by_key(|a| a.map(|v| v as i64).unwrap_or(-1));
        self.groups = activator_order.len();
        for activator in activator_order {
            let actions = &groups[&activator];
            let body: Vec<AssignStmt> = actions.iter().map(|i| self.rebuild_action(i)).collect();
            let text = match activator {
                None => format!("on.always(() => {{\n{}\n}});", self.render_body(&body)),
                Some(slot) => self.render_handler(slot, &body),
            };
            bodies.push(text);
        }

        let mut roots: Vec<&str> = self.used_roots.iter().map(|s| s.as_str()).collect();
        roots.sort_unstable();
        let mut out = String::new();
        if !roots.is_empty() {
            out.push_str(&format!("const {{ {} }} = inav;\n\n", roots.join(", ")));
        }
        out.push_str(&bodies.join("\n\n"));
        out.push('\n');
        for warning in self.diagnostics.as_strings() {
            out.push_str(&format!("// warning: {}\n", warning));
        }
        out
    }

    /// Renders the handler whose gating slot is `slot`, recognizing the
    /// special shapes (`edge`/`sticky`/`delay`/`timer`/`whenChanged`)
    /// before falling back to a plain `if`.
    fn render_handler(&mut self, slot: usize, body: &[AssignStmt]) -> String {
        let insn = &self.instructions[slot];
        match insn.operation {
            Opcode::Edge => {
                let cond = self.rebuild_operand_as_expr(insn.operand_a);
                let ms = insn.operand_b.value;
                format!("edge(() => {}, {{ duration: {} }}, () => {{\n{}\n}});", render_expr(&cond), ms, self.render_body(body))
            }
            Opcode::Delay => {
                let cond = self.rebuild_operand_as_expr(insn.operand_a);
                let ms = insn.operand_b.value;
                format!("delay(() => {}, {{ duration: {} }}, () => {{\n{}\n}});", render_expr(&cond), ms, self.render_body(body))
            }
            Opcode::Timer => {
                let on_ms = self.rebuild_operand_as_expr(insn.operand_a);
                let off_ms = self.rebuild_operand_as_expr(insn.operand_b);
                format!("timer({}, {}, () => {{\n{}\n}});", render_expr(&on_ms), render_expr(&off_ms), self.render_body(body))
            }
            Opcode::Sticky => {
                let on = self.rebuild_operand_as_expr(insn.operand_a);
                let off = self.rebuild_operand_as_expr(insn.operand_b);
                format!("sticky(() => {}, () => {}, () => {{\n{}\n}});", render_expr(&on), render_expr(&off), self.render_body(body))
            }
            Opcode::Delta => {
                let value = self.rebuild_operand_as_expr(insn.operand_a);
                let threshold = self.rebuild_operand_as_expr(insn.operand_b);
                format!("whenChanged({}, {}, () => {{\n{}\n}});", render_expr(&value), render_expr(&threshold), self.render_body(body))
            }
            _ => {
                let cond = self.rebuild_condition(slot);
                format!("if ({}) {{\n{}\n}}", render_expr(&cond), self.render_body(body))
            }
        }
    }

    fn render_body(&self, body: &[AssignStmt]) -> String {
        body.iter().map(render_assign).collect::<Vec<_>>().join("\n")
    }

    fn rebuild_action(&mut self, insn: &Instruction) -> AssignStmt {
        let target = self.target_for(insn);
        let value = self.value_for(insn, &target);
        AssignStmt { target, op: AssignOp::Assign, value: Some(value), span: UNKNOWN_SPAN }
    }

    /// The value half of an action record. `Set`/`RcChannelOverride` carry
    /// their write address in `operand_a` and the value in `operand_b`
    /// (the reverse of every other action opcode, which take the value in
    /// `operand_a`); `Inc`/`Dec` carry no value operand at all, and are
    /// spelled back out as the self-referential arithmetic codegen
    /// collapsed them from.
    fn value_for(&mut self, insn: &Instruction, target: &Expr) -> Expr {
        match insn.operation {
            // A gvar write (`operand_a` names the register address) and a
            // channel override both carry their value in `operand_b`; a
            // catalog leaf written through the same `Set` opcode (e.g.
            // `waypoint.index`) carries it in `operand_a` like every other
            // action, so only take the `operand_b` branch when `operand_a`
            // is actually an address rather than a value.
            Opcode::Set if insn.operand_a.operand_type == OperandType::Gvar => self.rebuild_operand_as_expr(insn.operand_b),
            Opcode::RcChannelOverride => self.rebuild_operand_as_expr(insn.operand_b),
            Opcode::Inc | Opcode::Dec => {
                let amount = self.rebuild_operand_as_expr(insn.operand_b);
                let op = if insn.operation == Opcode::Inc { BinOp::Add } else { BinOp::Sub };
                Expr::Binary { op, left: Box::new(target.clone()), right: Box::new(amount), span: UNKNOWN_SPAN }
            }
            _ => self.rebuild_operand_as_expr(insn.operand_a),
        }
    }

    fn target_for(&mut self, insn: &Instruction) -> Expr {
        if insn.operation == Opcode::Set && insn.operand_a.operand_type == OperandType::Gvar {
            self.used_roots.insert("gvar".to_string());
            return Expr::Member {
                path: vec!["gvar".to_string()],
                index: Some(Box::new(Expr::Literal(Literal::Int(insn.operand_a.value as i64)))),
                span: UNKNOWN_SPAN,
            };
        }
        if matches!(insn.operation, Opcode::Inc | Opcode::Dec) {
            self.used_roots.insert("gvar".to_string());
            return Expr::Member {
                path: vec!["gvar".to_string()],
                index: Some(Box::new(Expr::Literal(Literal::Int(insn.operand_a.value as i64)))),
                span: UNKNOWN_SPAN,
            };
        }
        if insn.operation == Opcode::RcChannelOverride {
            self.used_roots.insert("override".to_string());
            return Expr::Member {
                path: vec!["override".to_string(), "rc".to_string()],
                index: Some(Box::new(Expr::Literal(Literal::Int(insn.operand_a.value as i64)))),
                span: UNKNOWN_SPAN,
            };
        }
        match self.catalog.leaf_for_write_op(insn.operation) {
            Some(leaf) => {
                self.used_roots.insert(leaf.root().to_string());
                Expr::member(leaf.path.split('.').map(str::to_string).collect(), UNKNOWN_SPAN)
            }
            None => {
                self.diagnostics.warn(format!("slot {}: no catalog leaf for write opcode {:?}; synthesizing a name", insn.slot, insn.operation));
                Expr::ident(format!("unknown_target_{:?}", insn.operation), UNKNOWN_SPAN)
            }
        }
    }

    /// Rebuilds the boolean-valued expression for activator slot `slot`.
    fn rebuild_condition(&mut self, slot: usize) -> Expr {
        if slot >= self.instructions.len() {
            self.diagnostics.warn(format!("dangling reference to slot {}", slot));
            return Expr::Literal(Literal::Bool(true));
        }
        let insn = self.instructions[slot];
        match insn.operation {
            Opcode::True => Expr::Literal(Literal::Bool(true)),
            Opcode::Not => {
                let inner = self.rebuild_operand_as_expr(insn.operand_a);
                if let Some(negated) = invertible_comparison(&inner) {
                    negated
                } else {
                    Expr::Unary { op: UnOp::Not, arg: Box::new(inner), span: UNKNOWN_SPAN }
                }
            }
            Opcode::And | Opcode::Or => {
                let left = self.rebuild_operand_as_expr(insn.operand_a);
                let right = self.rebuild_operand_as_expr(insn.operand_b);
                let op = if insn.operation == Opcode::And { LogicalOp::And } else { LogicalOp::Or };
                Expr::Logical { op, left: Box::new(left), right: Box::new(right), span: UNKNOWN_SPAN }
            }
            Opcode::Equal | Opcode::GreaterThan | Opcode::LowerThan => {
                let left = self.rebuild_operand_as_expr(insn.operand_a);
                let right = self.rebuild_operand_as_expr(insn.operand_b);
                let op = match insn.operation {
                    Opcode::Equal => BinOp::Eq,
                    Opcode::GreaterThan => BinOp::Gt,
                    Opcode::LowerThan => BinOp::Lt,
                    _ => unreachable!(),
                };
                Expr::Binary { op, left: Box::new(left), right: Box::new(right), span: UNKNOWN_SPAN }
            }
            _ => {
                self.diagnostics.warn(format!("slot {}: unsupported condition opcode {:?}; emitting placeholder", slot, insn.operation));
                Expr::Literal(Literal::Bool(true))
            }
        }
    }

    /// Reconstructs the expression computed at a value-producing slot
    /// (arithmetic and `Math.abs`), reached when an `LC_RESULT` operand
    /// points at a slot whose opcode computes a value rather than a
    /// boolean. Kept separate from `rebuild_condition` so the two never
    /// re-dispatch into each other on the same slot.
    fn rebuild_value(&mut self, slot: usize) -> Expr {
        if slot >= self.instructions.len() {
            self.diagnostics.warn(format!("dangling reference to slot {}", slot));
            return Expr::Literal(Literal::Int(0));
        }
        let insn = self.instructions[slot];
        match insn.operation {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Modulus => {
                let op = match insn.operation {
                    Opcode::Add => BinOp::Add,
                    Opcode::Sub => BinOp::Sub,
                    Opcode::Mul => BinOp::Mul,
                    Opcode::Div => BinOp::Div,
                    Opcode::Modulus => BinOp::Mod,
                    _ => unreachable!(),
                };
                let left = self.rebuild_operand_as_expr(insn.operand_a);
                let right = self.rebuild_operand_as_expr(insn.operand_b);
                Expr::Binary { op, left: Box::new(left), right: Box::new(right), span: UNKNOWN_SPAN }
            }
            Opcode::Max if self.is_abs_pattern(&insn) => {
                let arg = self.rebuild_operand_as_expr(insn.operand_a);
                Expr::Call { callee: Callee::MathAbs, args: vec![arg], span: UNKNOWN_SPAN }
            }
            _ => {
                self.diagnostics.warn(format!("slot {}: unsupported value opcode {:?}; emitting placeholder", slot, insn.operation));
                Expr::ident(format!("unknown_value_{}", slot), UNKNOWN_SPAN)
            }
        }
    }

    /// Recognizes the `Max(x, lc=Sub(0, x))` shape `Math.abs` lowers to
    /// (`codegen::lower_condition`'s `Math.abs` arm), so the decompiler can
    /// render `Math.abs(x)` instead of a bare `max`, which this grammar has
    /// no source-level spelling for.
    fn is_abs_pattern(&self, insn: &Instruction) -> bool {
        if insn.operand_b.operand_type != OperandType::LcResult {
            return false;
        }
        match self.instructions.get(insn.operand_b.value as usize) {
            Some(sub) => sub.operation == Opcode::Sub && sub.operand_a == Operand::value(0) && sub.operand_b == insn.operand_a,
            None => false,
        }
    }

    /// Resolves one operand to an expression: a literal, a named catalog
    /// path, or (for `LC_RESULT`) a recursively rebuilt subexpression.
    fn rebuild_operand_as_expr(&mut self, operand: Operand) -> Expr {
        match operand.operand_type {
            OperandType::Value => Expr::Literal(Literal::Int(operand.value as i64)),
            OperandType::Gvar => {
                self.used_roots.insert("gvar".to_string());
                Expr::Member { path: vec!["gvar".to_string()], index: Some(Box::new(Expr::Literal(Literal::Int(operand.value as i64)))), span: UNKNOWN_SPAN }
            }
            OperandType::RcChannel => {
                self.used_roots.insert("rc".to_string());
                Expr::Member { path: vec!["rc".to_string()], index: Some(Box::new(Expr::Literal(Literal::Int(operand.value as i64)))), span: UNKNOWN_SPAN }
            }
            OperandType::FlightMode => match flight_mode_name(operand.value) {
                Some(name) => {
                    self.used_roots.insert("flight".to_string());
                    Expr::member(vec!["flight".into(), "mode".into(), name.into()], UNKNOWN_SPAN)
                }
                None => {
                    self.diagnostics.warn(format!("unknown flight mode index {}", operand.value));
                    Expr::ident(format!("flight_mode_{}", operand.value), UNKNOWN_SPAN)
                }
            },
            OperandType::Flight | OperandType::Waypoints => match self.catalog.leaf_for_read(operand.operand_type, operand.value) {
                Some(leaf) => {
                    self.used_roots.insert(leaf.root().to_string());
                    Expr::member(leaf.path.split('.').map(str::to_string).collect(), UNKNOWN_SPAN)
                }
                None => {
                    self.diagnostics.warn(format!("unknown operand encoding ({:?}, {})", operand.operand_type, operand.value));
                    Expr::ident(format!("unknown_{:?}_{}", operand.operand_type, operand.value), UNKNOWN_SPAN)
                }
            },
            OperandType::LcResult => {
                let slot = operand.value as usize;
                let produces_bool = self.instructions.get(slot).map_or(true, |i| i.operation.produces_bool());
                if produces_bool {
                    self.rebuild_condition(slot)
                } else {
                    self.rebuild_value(slot)
                }
            }
            OperandType::Pid => {
                self.diagnostics.warn(format!("PID operand ({}) has no source-level name; synthesizing one", operand.value));
                Expr::ident(format!("pid_{}", operand.value), UNKNOWN_SPAN)
            }
        }
    }
}

/// Recognizes `NOT(GreaterThan(a,b))` / `NOT(LowerThan(a,b))` / `NOT(Equal
/// (a,b))` and rewrites them as `<=`, `>=`, `!=` for readability, undoing
/// the lowering `lower_comparison` in `codegen.rs` performs.
fn invertible_comparison(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Binary { op, left, right, span } => {
            let negated = op.negated()?;
            Some(Expr::Binary { op: negated, left: left.clone(), right: right.clone(), span: *span })
        }
        _ => None,
    }
}

fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(Literal::Int(n)) => n.to_string(),
        Expr::Literal(Literal::Bool(b)) => b.to_string(),
        Expr::Member { path, index, .. } => match index {
            Some(idx) => format!("{}[{}]", path.join("."), render_expr(idx)),
            None => path.join("."),
        },
        Expr::Binary { op, left, right, .. } => format!("{} {} {}", render_expr(left), op.as_str(), render_expr(right)),
        Expr::Logical { op, left, right, .. } => {
            let sym = match op {
                LogicalOp::And => "&&",
                LogicalOp::Or => "||",
            };
            format!("{} {} {}", render_expr(left), sym, render_expr(right))
        }
        Expr::Unary { arg, .. } => format!("!{}", render_expr(arg)),
        Expr::Call { args, .. } => format!("Math.abs({})", render_expr(&args[0])),
    }
}

fn render_assign(stmt: &AssignStmt) -> String {
    let target = render_expr(&stmt.target);
    match &stmt.value {
        Some(v) => format!("  {} = {};", target, render_expr(v)),
        None => format!("  {};", target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Operand;

    fn insn(slot: usize, activator: Option<usize>, op: Opcode, a: Operand, b: Operand) -> Instruction {
        Instruction { slot, enabled: true, activator, operation: op, operand_a: a, operand_b: b, flags: 0 }
    }

    #[test]
    fn reconstructs_simple_if() {
        let table = vec![
            insn(0, None, Opcode::GreaterThan, Operand::flight(0), Operand::value(100)),
            insn(1, Some(0), Opcode::SetVtxPowerLevel, Operand::value(3), Operand::none()),
        ];
        let (src, _warnings, _groups) = decompile(&table).unwrap();
        assert!(src.contains("if (flight.homeDistance > 100)"));
        assert!(src.contains("override.vtx.power = 3;"));
    }

    #[test]
    fn reconstructs_on_always() {
        let table = vec![insn(0, None, Opcode::SetVtxPowerLevel, Operand::value(1), Operand::none())];
        let (src, _, _) = decompile(&table).unwrap();
        assert!(src.contains("on.always"));
    }

    #[test]
    fn warns_on_invalid_activator() {
        let table = vec![insn(0, Some(5), Opcode::SetVtxPowerLevel, Operand::value(1), Operand::none())];
        let (_src, warnings, _groups) = decompile(&table).unwrap();
        assert!(!warnings.is_empty());
    }

    #[test]
    fn reconstructs_register_increment() {
        let table = vec![insn(0, None, Opcode::Inc, Operand::value(0), Operand::value(1))];
        let (src, _, _) = decompile(&table).unwrap();
        assert!(src.contains("gvar[0] = gvar[0] + 1;"), "got: {}", src);
    }

    #[test]
    fn reconstructs_waypoint_index_write_distinct_from_gvar_set() {
        let table = vec![insn(0, None, Opcode::Set, Operand::value(7), Operand::none())];
        let (src, _, _) = decompile(&table).unwrap();
        assert!(src.contains("waypoint.index = 7;"), "got: {}", src);
    }

    #[test]
    fn reconstructs_math_abs_condition_without_infinite_recursion() {
        // Mirrors codegen's own `Math.abs` lowering: Sub(0, x), then
        // Max(x, lc=sub), then GreaterThan(lc=max, 30).
        let table = vec![
            insn(0, None, Opcode::Sub, Operand::value(0), Operand::flight(8)),
            insn(1, None, Opcode::Max, Operand::flight(8), Operand::lc_result(0)),
            insn(2, None, Opcode::GreaterThan, Operand::lc_result(1), Operand::value(30)),
            insn(3, Some(2), Opcode::SetVtxPowerLevel, Operand::value(1), Operand::none()),
        ];
        let (src, _, _) = decompile(&table).unwrap();
        assert!(src.contains("Math.abs(flight.roll) > 30"), "got: {}", src);
    }

    #[test]
    fn reconstructs_register_arithmetic_from_another_slot_without_infinite_recursion() {
        // Mirrors codegen's `gvar[0] = gvar[1] + 5;` lowering: Add(gvar1, 5),
        // then Set(gvar0, lc=add).
        let table = vec![
            insn(0, None, Opcode::Add, Operand::gvar(1), Operand::value(5)),
            insn(1, None, Opcode::Set, Operand::gvar(0), Operand::lc_result(0)),
        ];
        let (src, _, _) = decompile(&table).unwrap();
        assert!(src.contains("gvar[0] = gvar[1] + 5;"), "got: {}", src);
    }

    #[test]
    fn unsupported_value_opcode_emits_placeholder_instead_of_recursing() {
        let table = vec![
            insn(0, None, Opcode::Sin, Operand::value(1), Operand::none()),
            insn(1, None, Opcode::Set, Operand::gvar(0), Operand::lc_result(0)),
        ];
        let (_src, warnings, _) = decompile(&table).unwrap();
        assert!(warnings.iter().any(|w| w.contains("unsupported value opcode")), "got: {:?}", warnings);
    }

    #[test]
    fn rejects_oversized_table() {
        let table: Vec<Instruction> = (0..70).map(|i| insn(i, None, Opcode::True, Operand::none(), Operand::none())).collect();
        let err = decompile(&table).unwrap_err();
        assert!(matches!(err, DecompileError::TooManyRecords { .. }));
    }
}
