//! Code generator: lowers the optimized handler list into
//! the fixed-width rule table. Subexpression results are threaded upward
//! as slot indices returned from the lowering calls, never stored back
//! into the AST; see the note atop `ast.rs`.

use crate::ast::*;
use crate::catalog::{flight_mode_index, Catalog, CATALOG};
use crate::diagnostics::CodegenError;
use crate::instruction::{Instruction, Opcode, Operand, OperandType, MAX_SLOTS, REGISTER_RANGE};
use crate::vars::Lowered;

pub struct Generator<'a> {
    catalog: &'a Catalog,
    instructions: Vec<Instruction>,
    /// Structural cache of already-lowered boolean subexpressions, so two
    /// syntactically identical conditions share one slot.
    condition_cache: Vec<(Expr, usize)>,
    /// Condition slot produced for each handler, indexed by handler
    /// position, so a later sibling's `reuse_inverted_of` can reference it.
    handler_condition_slot: Vec<Option<usize>>,
}

pub fn generate(lowered: &Lowered) -> Result<Vec<Instruction>, CodegenError> {
    let mut gen = Generator {
        catalog: &CATALOG,
        instructions: Vec::new(),
        condition_cache: Vec::new(),
        handler_condition_slot: Vec::new(),
    };
    gen.emit_register_prelude(&lowered.register_prelude)?;
    for (i, handler) in lowered.handlers.iter().enumerate() {
        gen.emit_handler(i, handler)?;
    }
    Ok(gen.instructions)
}

impl<'a> Generator<'a> {
    fn push(&mut self, activator: Option<usize>, operation: Opcode, operand_a: Operand, operand_b: Operand, statement: &str) -> Result<usize, CodegenError> {
        let slot = self.instructions.len();
        if slot >= MAX_SLOTS {
            return Err(CodegenError::TableOverflow { slot, cap: MAX_SLOTS, statement: statement.to_string() });
        }
        self.instructions.push(Instruction { slot, enabled: true, activator, operation, operand_a, operand_b, flags: 0 });
        Ok(slot)
    }

    fn emit_register_prelude(&mut self, prelude: &[(usize, Expr)]) -> Result<(), CodegenError> {
        for (index, init) in prelude {
            let value = self.lower_value(init)?;
            let value = clip_to_register_range(value);
            self.push(None, Opcode::Set, Operand::gvar(*index as i32), value, "var initializer")?;
        }
        Ok(())
    }

    fn emit_handler(&mut self, _index: usize, handler: &EventHandler) -> Result<(), CodegenError> {
        let activator = self.handler_activator(handler)?;
        self.handler_condition_slot.push(activator);
        for stmt in &handler.body {
            self.emit_assignment(activator, stmt)?;
        }
        Ok(())
    }

    /// Resolves the gating slot (if any) that every action in this handler
    /// is conditioned on.
    fn handler_activator(&mut self, handler: &EventHandler) -> Result<Option<usize>, CodegenError> {
        if let Some(source) = handler.reuse_inverted_of {
            let base = self.handler_condition_slot[source].ok_or_else(|| CodegenError::Arity {
                construct: handler.kind.name().to_string(),
                expected: 1,
                found: 0,
            })?;
            let slot = self.push(None, Opcode::Not, Operand::lc_result(base), Operand::none(), handler.kind.name())?;
            return Ok(Some(slot));
        }
        match &handler.kind {
            HandlerKind::OnAlways => Ok(None),
            HandlerKind::If { condition } => Ok(Some(self.lower_condition(condition)?)),
            HandlerKind::OnArm { delay } => {
                // on.arm({delay:s}) lowers to: condition arm_timer > 0,
                // then EDGE over that with duration = delay seconds.
                let span = condition_span(delay);
                let arm_timer = Expr::member(vec!["flight".into(), "armTimer".into()], span);
                let armed = Expr::Binary { op: BinOp::Gt, left: Box::new(arm_timer), right: Box::new(Expr::Literal(Literal::Int(0))), span };
                let base = self.lower_condition(&armed)?;
                let seconds = self.literal_i32(delay, "on.arm delay")?;
                let slot = self.push(None, Opcode::Edge, Operand::lc_result(base), Operand::value(seconds), "on.arm")?;
                Ok(Some(slot))
            }
            HandlerKind::Edge { condition, duration } => {
                let base = self.lower_condition(condition)?;
                let ms = self.literal_i32(duration, "edge duration")?;
                let slot = self.push(None, Opcode::Edge, Operand::lc_result(base), Operand::value(ms), "edge")?;
                Ok(Some(slot))
            }
            HandlerKind::Delay { condition, duration } => {
                let base = self.lower_condition(condition)?;
                let ms = self.literal_i32(duration, "delay duration")?;
                let slot = self.push(None, Opcode::Delay, Operand::lc_result(base), Operand::value(ms), "delay")?;
                Ok(Some(slot))
            }
            HandlerKind::Sticky { on, off } => {
                let on_slot = self.lower_condition(on)?;
                let off_slot = self.lower_condition(off)?;
                let slot = self.push(None, Opcode::Sticky, Operand::lc_result(on_slot), Operand::lc_result(off_slot), "sticky")?;
                Ok(Some(slot))
            }
            HandlerKind::Timer { on_ms, off_ms } => {
                let a = self.lower_value(on_ms)?;
                let b = self.lower_value(off_ms)?;
                let slot = self.push(None, Opcode::Timer, a, b, "timer")?;
                Ok(Some(slot))
            }
            HandlerKind::WhenChanged { value, threshold } => {
                let a = self.lower_value(value)?;
                let b = self.lower_value(threshold)?;
                let slot = self.push(None, Opcode::Delta, a, b, "whenChanged")?;
                Ok(Some(slot))
            }
        }
    }

    fn literal_i32(&self, expr: &Expr, construct: &str) -> Result<i32, CodegenError> {
        match crate::optimizer::fold(expr).as_literal_int() {
            Some(n) => Ok(n as i32),
            None => Err(CodegenError::NonLiteralArgument { construct: construct.to_string() }),
        }
    }

    /// Lowers `expr` to a slot index whose result is a boolean, consulting
    /// (and populating) the structural cache first.
    fn lower_condition(&mut self, expr: &Expr) -> Result<usize, CodegenError> {
        if let Some((_, slot)) = self.condition_cache.iter().find(|(cached, _)| cached.structurally_eq(expr)) {
            return Ok(*slot);
        }
        let slot = match expr {
            Expr::Literal(Literal::Bool(b)) => {
                if *b {
                    self.push(None, Opcode::True, Operand::none(), Operand::none(), "true")?
                } else {
                    let t = self.push(None, Opcode::True, Operand::none(), Operand::none(), "false")?;
                    self.push(None, Opcode::Not, Operand::lc_result(t), Operand::none(), "false")?
                }
            }
            Expr::Unary { op: UnOp::Not, arg, .. } => {
                let inner = self.lower_condition(arg)?;
                self.push(None, Opcode::Not, Operand::lc_result(inner), Operand::none(), "!")?
            }
            Expr::Logical { op, left, right, .. } => {
                let l = self.lower_condition(left)?;
                let r = self.lower_condition(right)?;
                let opcode = match op {
                    LogicalOp::And => Opcode::And,
                    LogicalOp::Or => Opcode::Or,
                };
                self.push(None, opcode, Operand::lc_result(l), Operand::lc_result(r), "&&/||")?
            }
            Expr::Binary { op, left, right, .. } if op.is_comparison() => {
                let (opcode, a, b) = self.lower_comparison(*op, left, right)?;
                self.push(None, opcode, a, b, "comparison")?
            }
            // A bare boolean-valued member (e.g. `flight.mode.arm`) used
            // directly as a condition: no instruction needed for the read
            // itself, but the activator model wants a slot, so wrap it in
            // an `Equal` test against `true`.
            Expr::Member { .. } => {
                let operand = self.lower_value(expr)?;
                self.push(None, Opcode::Equal, operand, Operand::value(1), "boolean read")?
            }
            other => return Err(CodegenError::NonLiteralArgument { construct: format!("{:?}", other) }),
        };
        self.condition_cache.push((expr.clone(), slot));
        Ok(slot)
    }

    /// Comparisons the device has no direct opcode for (`>=`, `<=`) lower
    /// to the closest frozen opcode plus a `NOT`, per the convention
    /// settled in DESIGN.md.
    fn lower_comparison(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<(Opcode, Operand, Operand), CodegenError> {
        let a = self.lower_value(left)?;
        let b = self.lower_value(right)?;
        Ok(match op {
            BinOp::Eq => (Opcode::Equal, a, b),
            BinOp::Gt => (Opcode::GreaterThan, a, b),
            BinOp::Lt => (Opcode::LowerThan, a, b),
            BinOp::Gte | BinOp::Lte | BinOp::Neq => {
                let base_opcode = match op {
                    BinOp::Gte => Opcode::LowerThan,
                    BinOp::Lte => Opcode::GreaterThan,
                    BinOp::Neq => Opcode::Equal,
                    _ => unreachable!(),
                };
                let base_slot = self.push(None, base_opcode, a, b, "comparison")?;
                return Ok((Opcode::Not, Operand::lc_result(base_slot), Operand::none()));
            }
        })
    }

    /// Lowers `expr` to an `Operand`: a direct read when one exists (a
    /// literal, a catalog leaf, a `gvar`/`rc` index), otherwise an emitted
    /// instruction referenced through `LC_RESULT`.
    fn lower_value(&mut self, expr: &Expr) -> Result<Operand, CodegenError> {
        match expr {
            Expr::Literal(Literal::Int(n)) => Ok(Operand::value(*n as i32)),
            Expr::Literal(Literal::Bool(b)) => Ok(Operand::value(*b as i32)),
            Expr::Member { path, index, .. } if path.len() == 1 && path[0] == "gvar" => {
                let idx = self.index_value(index, "gvar")?;
                Ok(Operand::gvar(idx))
            }
            Expr::Member { path, index, .. } if path.len() == 1 && path[0] == "rc" => {
                let idx = self.index_value(index, "rc")?;
                Ok(Operand::rc_channel(idx))
            }
            Expr::Member { path, .. } if path.len() == 3 && path[0] == "flight" && path[1] == "mode" => {
                let name = &path[2];
                let idx = flight_mode_index(name)
                    .ok_or_else(|| CodegenError::NonLiteralArgument { construct: format!("flight.mode.{}", name) })?;
                Ok(Operand::flight_mode(idx))
            }
            Expr::Member { path, .. } => {
                let full = path.join(".");
                let leaf = self
                    .catalog
                    .lookup(&full)
                    .ok_or_else(|| CodegenError::NonLiteralArgument { construct: full.clone() })?;
                leaf.read_operand().ok_or_else(|| CodegenError::NonLiteralArgument { construct: full })
            }
            Expr::Call { callee: Callee::MathAbs, args, .. } => {
                let inner = self.lower_value(&args[0])?;
                let zero = Operand::value(0);
                let slot = self.push(None, Opcode::Sub, zero, inner, "Math.abs")?;
                let slot = self.push(None, Opcode::Max, inner, Operand::lc_result(slot), "Math.abs")?;
                Ok(Operand::lc_result(slot))
            }
            Expr::Binary { op, left, right, .. } if !op.is_comparison() => {
                let a = self.lower_value(left)?;
                let b = self.lower_value(right)?;
                let opcode = match op {
                    BinOp::Add => Opcode::Add,
                    BinOp::Sub => Opcode::Sub,
                    BinOp::Mul => Opcode::Mul,
                    BinOp::Div => Opcode::Div,
                    BinOp::Mod => Opcode::Modulus,
                    _ => unreachable!(),
                };
                let slot = self.push(None, opcode, a, b, "arithmetic")?;
                Ok(Operand::lc_result(slot))
            }
            Expr::Binary { .. } | Expr::Logical { .. } | Expr::Unary { .. } => {
                let slot = self.lower_condition(expr)?;
                Ok(Operand::lc_result(slot))
            }
        }
    }

    fn index_value(&self, index: &Option<Box<Expr>>, what: &str) -> Result<i32, CodegenError> {
        match index {
            Some(idx) => self.literal_i32(idx, what),
            None => Err(CodegenError::NonLiteralArgument { construct: format!("bare '{}'", what) }),
        }
    }

    fn emit_assignment(&mut self, activator: Option<usize>, stmt: &AssignStmt) -> Result<(), CodegenError> {
        if is_gvar(&stmt.target) {
            if let Some((opcode, amount)) = self.self_register_op(stmt) {
                let index = self.gvar_index(&stmt.target)?;
                let amount = self.lower_value(&amount)?;
                self.push(activator, opcode, Operand::value(index), amount, "register inc/dec")?;
                return Ok(());
            }
        }
        match stmt.op {
            AssignOp::Assign => {
                let value = self.lower_value(stmt.value.as_ref().expect("Assign always carries a value"))?;
                self.emit_write(activator, &stmt.target, value)
            }
            AssignOp::Increment | AssignOp::Decrement => {
                let op = if stmt.op == AssignOp::Increment { BinOp::Add } else { BinOp::Sub };
                let synthetic = Expr::Binary {
                    op,
                    left: Box::new(stmt.target.clone()),
                    right: Box::new(Expr::Literal(Literal::Int(1))),
                    span: stmt.span,
                };
                let value = self.lower_value(&synthetic)?;
                self.emit_write(activator, &stmt.target, value)
            }
            AssignOp::AddAssign | AssignOp::SubAssign | AssignOp::MulAssign | AssignOp::DivAssign => {
                let op = match stmt.op {
                    AssignOp::AddAssign => BinOp::Add,
                    AssignOp::SubAssign => BinOp::Sub,
                    AssignOp::MulAssign => BinOp::Mul,
                    AssignOp::DivAssign => BinOp::Div,
                    _ => unreachable!(),
                };
                if !is_gvar(&stmt.target) {
                    return Err(CodegenError::UnsupportedCompoundTarget { target: format!("{:?}", stmt.target) });
                }
                let synthetic = Expr::Binary {
                    op,
                    left: Box::new(stmt.target.clone()),
                    right: Box::new(stmt.value.clone().expect("compound assignment always carries a value")),
                    span: stmt.span,
                };
                let value = self.lower_value(&synthetic)?;
                self.emit_write(activator, &stmt.target, value)
            }
        }
    }

    /// Recognizes a register-on-itself arithmetic shape — `gvar[i]++`,
    /// `gvar[i] += n`, or the spelled-out `gvar[i] = gvar[i] + n` — and
    /// returns the dedicated opcode plus the amount to apply, so these
    /// compile to the short `Inc`/`Dec` form instead of a generic
    /// arithmetic instruction followed by a `Set`.
    fn self_register_op(&self, stmt: &AssignStmt) -> Option<(Opcode, Expr)> {
        match stmt.op {
            AssignOp::Increment => Some((Opcode::Inc, Expr::Literal(Literal::Int(1)))),
            AssignOp::Decrement => Some((Opcode::Dec, Expr::Literal(Literal::Int(1)))),
            AssignOp::AddAssign => Some((Opcode::Inc, stmt.value.clone().expect("AddAssign carries a value"))),
            AssignOp::SubAssign => Some((Opcode::Dec, stmt.value.clone().expect("SubAssign carries a value"))),
            AssignOp::Assign => match stmt.value.as_ref()? {
                Expr::Binary { op: BinOp::Add, left, right, .. } if left.structurally_eq(&stmt.target) => {
                    Some((Opcode::Inc, (**right).clone()))
                }
                Expr::Binary { op: BinOp::Sub, left, right, .. } if left.structurally_eq(&stmt.target) => {
                    Some((Opcode::Dec, (**right).clone()))
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn gvar_index(&self, target: &Expr) -> Result<i32, CodegenError> {
        match target {
            Expr::Member { path, index, .. } if path.len() == 1 && path[0] == "gvar" => self.index_value(index, "gvar"),
            _ => Err(CodegenError::NonLiteralArgument { construct: format!("{:?}", target) }),
        }
    }

    fn emit_write(&mut self, activator: Option<usize>, target: &Expr, value: Operand) -> Result<(), CodegenError> {
        match target {
            Expr::Member { path, index, .. } if path.len() == 1 && path[0] == "gvar" => {
                let idx = self.index_value(index, "gvar")?;
                let value = clip_to_register_range(value);
                self.push(activator, Opcode::Set, Operand::gvar(idx), value, "gvar assignment")?;
                Ok(())
            }
            Expr::Member { path, index, .. } if path.len() == 2 && path[0] == "override" && path[1] == "rc" => {
                let idx = self.index_value(index, "override.rc")?;
                self.push(activator, Opcode::RcChannelOverride, Operand::rc_channel(idx), value, "override.rc assignment")?;
                Ok(())
            }
            Expr::Member { path, .. } => {
                let full = path.join(".");
                let leaf = self
                    .catalog
                    .lookup(&full)
                    .ok_or_else(|| CodegenError::NonLiteralArgument { construct: full.clone() })?;
                let op = leaf.write_op.ok_or_else(|| CodegenError::NonLiteralArgument { construct: full })?;
                let value = clip_to_range(value, leaf.range);
                self.push(activator, op, value, Operand::none(), "assignment")?;
                Ok(())
            }
            other => Err(CodegenError::NonLiteralArgument { construct: format!("{:?}", other) }),
        }
    }
}

/// Clips a literal write value to the target leaf's declared range, the
/// runtime behavior the analyzer's "range clip" warning describes.
/// Non-literal (`LC_RESULT`/`GVAR`/etc.) operands aren't statically known
/// and pass through unclipped, same as the analyzer's own literal-only
/// check.
fn clip_to_range(value: Operand, range: Option<(i32, i32)>) -> Operand {
    match (value.operand_type, range) {
        (OperandType::Value, Some((min, max))) => Operand::value(value.value.clamp(min, max)),
        _ => value,
    }
}

/// Clips a literal register write to the §3.5 `[-1_000_000, 1_000_000]`
/// register-value range. Non-literal operands (an `LC_RESULT` or another
/// register read) aren't statically known and pass through unclipped,
/// same convention as `clip_to_range`.
fn clip_to_register_range(value: Operand) -> Operand {
    match value.operand_type {
        OperandType::Value => Operand::value(value.value.clamp(REGISTER_RANGE.0, REGISTER_RANGE.1)),
        _ => value,
    }
}

fn is_gvar(expr: &Expr) -> bool {
    matches!(expr, Expr::Member { path, .. } if path.len() == 1 && path[0] == "gvar")
}

fn condition_span(expr: &Expr) -> crate::diagnostics::Span {
    expr.span()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::vars::lower;

    fn compile_instructions(src: &str) -> Vec<Instruction> {
        let program = parse(src).unwrap();
        crate::analyzer::analyze(&program).unwrap();
        let mut lowered = lower(&program).unwrap();
        crate::optimizer::optimize(&mut lowered.handlers);
        generate(&lowered).unwrap()
    }

    #[test]
    fn lowers_simple_if_to_two_instructions() {
        let instructions = compile_instructions(
            "const { flight, override } = inav;\nif (flight.homeDistance > 100) { override.vtx.power = 3; }",
        );
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].operation, Opcode::GreaterThan);
        assert_eq!(instructions[1].operation, Opcode::SetVtxPowerLevel);
        assert_eq!(instructions[1].activator, Some(0));
    }

    #[test]
    fn on_always_has_no_activator() {
        let instructions = compile_instructions(
            "const { override, on } = inav;\non.always(() => { override.vtx.power = 1; });",
        );
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].activator, None);
    }

    #[test]
    fn self_increment_assignment_lowers_to_dedicated_opcode() {
        let instructions = compile_instructions("on.always(() => { gvar[0] = gvar[0] + 1; });");
        assert_eq!(instructions[0].operation, Opcode::Inc);
        assert_eq!(instructions[0].operand_a, Operand::value(0));
        assert_eq!(instructions[0].operand_b, Operand::value(1));
    }

    #[test]
    fn plain_plus_plus_also_uses_dedicated_opcode() {
        let instructions = compile_instructions("on.always(() => { gvar[2]++; });");
        assert_eq!(instructions[0].operation, Opcode::Inc);
        assert_eq!(instructions[0].operand_a, Operand::value(2));
        assert_eq!(instructions[0].operand_b, Operand::value(1));
    }

    #[test]
    fn self_decrement_via_compound_assign_uses_dedicated_opcode() {
        let instructions = compile_instructions("on.always(() => { gvar[3] -= 2; });");
        assert_eq!(instructions[0].operation, Opcode::Dec);
        assert_eq!(instructions[0].operand_a, Operand::value(3));
        assert_eq!(instructions[0].operand_b, Operand::value(2));
    }

    #[test]
    fn out_of_range_literal_write_is_clipped_to_the_catalog_bound() {
        let instructions = compile_instructions("if (true) { override.vtx.power = 99; }");
        assert_eq!(instructions[1].operand_a, Operand::value(5));
    }

    #[test]
    fn gvar_write_is_clipped_to_the_register_range() {
        let instructions = compile_instructions("on.always(() => { gvar[0] = 2000000; });");
        assert_eq!(instructions[0].operand_b, Operand::value(1_000_000));
    }

    #[test]
    fn var_initializer_is_clipped_to_the_register_range() {
        let instructions = compile_instructions("var counter = -5000000;\non.always(() => { gvar[1] = 1; });");
        assert_eq!(instructions[0].operand_b, Operand::value(-1_000_000));
    }

    #[test]
    fn overflows_past_64_slots() {
        let mut src = String::from("const { flight, override } = inav;\n");
        for i in 0..40 {
            src.push_str(&format!("if (flight.homeDistance > {}) {{ override.vtx.power = 1; }}\n", i));
        }
        let program = parse(&src).unwrap();
        crate::analyzer::analyze(&program).unwrap();
        let mut lowered = lower(&program).unwrap();
        crate::optimizer::optimize(&mut lowered.handlers);
        let err = generate(&lowered).unwrap_err();
        assert!(matches!(err, CodegenError::TableOverflow { .. }));
    }
}
