//! Semantic analyzer. Validates identifier use against the
//! catalog, writability, ranges, handler shapes, and runs the global dead
//! code / always-true / write-write / uninitialized-register passes. Hard
//! errors abort; soft warnings accumulate in the shared `Diagnostics`
//! buffer threaded through a context struct.

use crate::ast::*;
use crate::catalog::{Catalog, CATALOG};
use crate::diagnostics::{Diagnostics, SemanticError, Span};
use crate::instruction::{MAX_REGISTERS, REGISTER_RANGE};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
enum DeclKind {
    Const(Expr),
    Var,
}

pub struct Analyzer<'a> {
    catalog: &'a Catalog,
    declared: HashMap<String, DeclKind>,
    /// Statement index of each `let`/`const` declaration, used to enforce
    /// the grammar's "reference to a *prior* let/const" rule independent of
    /// cycle detection (which must see the whole table to work at all).
    const_positions: HashMap<String, usize>,
    imported_roots: HashSet<String>,
    diagnostics: Diagnostics,
    /// Targets written inside `on.always` handlers, for the cross-handler
    /// race warning ("write-write conflict").
    always_writes: HashMap<String, Vec<Span>>,
    /// Explicit `gvar[i]` indices seen in read vs. write position, for the
    /// uninitialized-register pass.
    gvar_written: HashSet<i64>,
    gvar_read: HashMap<i64, Span>,
}

pub fn analyze(program: &Program) -> Result<Diagnostics, SemanticError> {
    let mut analyzer = Analyzer {
        catalog: &CATALOG,
        declared: HashMap::new(),
        const_positions: HashMap::new(),
        imported_roots: HashSet::new(),
        diagnostics: Diagnostics::new(),
        always_writes: HashMap::new(),
        gvar_written: HashSet::new(),
        gvar_read: HashMap::new(),
    };
    analyzer.run(program)?;
    Ok(analyzer.diagnostics)
}

impl<'a> Analyzer<'a> {
    /// Two passes: the first collects every `let`/`const`/`var` declaration
    /// (and destructured root) before any statement's contents are
    /// validated, so a constant may reference a binding declared later in
    /// the program; the second pass validates every statement's contents
    /// against the now fully-populated declaration table. Without this
    /// split, `const a = b; const b = a;` would report `a`'s reference to
    /// `b` as an unknown identifier (not yet declared at that point in a
    /// single forward pass) rather than the mutual cycle it actually is.
    fn run(&mut self, program: &Program) -> Result<(), SemanticError> {
        for (position, stmt) in program.statements.iter().enumerate() {
            match stmt {
                Statement::Destructuring { names, span } => {
                    for name in names {
                        if !self.catalog.is_known_root(name) {
                            return Err(SemanticError::UnknownIdentifier { path: name.clone(), span: *span });
                        }
                        if !self.imported_roots.insert(name.clone()) {
                            return Err(SemanticError::DuplicateDeclaration { name: name.clone(), span: *span });
                        }
                    }
                }
                Statement::LetConst { name, value, span } => {
                    if self.declared.contains_key(name) {
                        return Err(SemanticError::DuplicateDeclaration { name: name.clone(), span: *span });
                    }
                    self.declared.insert(name.clone(), DeclKind::Const(value.clone()));
                    self.const_positions.insert(name.clone(), position);
                }
                Statement::VarDecl { name, span, .. } => {
                    if self.declared.contains_key(name) {
                        return Err(SemanticError::DuplicateDeclaration { name: name.clone(), span: *span });
                    }
                    self.declared.insert(name.clone(), DeclKind::Var);
                }
                Statement::EventHandler(_) => {}
            }
        }

        for (position, stmt) in program.statements.iter().enumerate() {
            match stmt {
                Statement::Destructuring { .. } => {}
                Statement::LetConst { value, .. } => {
                    self.check_const_expr(value, position, &mut HashSet::new())?;
                    self.check_expr_uses(value)?;
                }
                Statement::VarDecl { init, .. } => {
                    self.check_expr_uses(init)?;
                }
                Statement::EventHandler(handler) => self.check_handler(handler)?,
            }
        }
        self.check_global_passes(program);
        Ok(())
    }

    /// A `let`/`const` initializer must be "effectively constant": a
    /// literal, a binary expression over literals/other constants, or a
    /// reference to a *prior* `let`/`const`. `own_position` is the
    /// statement index of the binding currently being checked (the
    /// referenced name's own position, one level down, for each recursive
    /// step) so a genuine forward reference can be told apart from a cyclic
    /// one: cycle detection needs to see the whole declaration table
    /// regardless of order, but a forward reference that *isn't* part of a
    /// cycle still violates "prior" once the cycle check clears it.
    fn check_const_expr(&self, expr: &Expr, own_position: usize, visiting: &mut HashSet<String>) -> Result<(), SemanticError> {
        match expr {
            Expr::Literal(_) => Ok(()),
            Expr::Member { path, index: None, span } if path.len() == 1 => {
                let name = &path[0];
                match self.declared.get(name) {
                    Some(DeclKind::Const(inner)) => {
                        if !visiting.insert(name.clone()) {
                            return Err(SemanticError::CyclicConstant { name: name.clone(), span: *span });
                        }
                        let ref_position = *self.const_positions.get(name).unwrap_or(&own_position);
                        let result = self.check_const_expr(inner, ref_position, visiting);
                        visiting.remove(name);
                        result?;
                        if ref_position >= own_position {
                            return Err(SemanticError::NonConstInitializer { name: name.clone(), span: *span });
                        }
                        Ok(())
                    }
                    Some(DeclKind::Var) => Err(SemanticError::NonConstInitializer { name: name.clone(), span: *span }),
                    None => Err(SemanticError::UnknownIdentifier { path: name.clone(), span: *span }),
                }
            }
            Expr::Member { path, span, .. } => {
                Err(SemanticError::NonConstInitializer { name: path.join("."), span: *span })
            }
            Expr::Binary { left, right, .. } => {
                self.check_const_expr(left, own_position, visiting)?;
                self.check_const_expr(right, own_position, visiting)
            }
            Expr::Unary { arg, .. } => self.check_const_expr(arg, own_position, visiting),
            Expr::Logical { span, .. } | Expr::Call { span, .. } => {
                Err(SemanticError::NonConstInitializer { name: String::new(), span: *span })
            }
        }
    }

    fn check_handler(&mut self, handler: &EventHandler) -> Result<(), SemanticError> {
        match &handler.kind {
            HandlerKind::OnAlways => {}
            HandlerKind::OnArm { delay } => self.check_expr_uses(delay)?,
            HandlerKind::If { condition } => self.check_expr_uses(condition)?,
            HandlerKind::Edge { condition, duration } => {
                self.check_expr_uses(condition)?;
                self.check_expr_uses(duration)?;
            }
            HandlerKind::Sticky { on, off } => {
                self.check_expr_uses(on)?;
                self.check_expr_uses(off)?;
            }
            HandlerKind::Delay { condition, duration } => {
                self.check_expr_uses(condition)?;
                self.check_expr_uses(duration)?;
            }
            HandlerKind::Timer { on_ms, off_ms } => {
                self.check_expr_uses(on_ms)?;
                self.check_expr_uses(off_ms)?;
            }
            HandlerKind::WhenChanged { value, threshold } => {
                self.check_expr_uses(value)?;
                self.check_expr_uses(threshold)?;
            }
        }

        let mut seen_targets: HashMap<String, Span> = HashMap::new();
        for stmt in &handler.body {
            self.check_assign_target(&stmt.target)?;
            if let Some(value) = &stmt.value {
                self.check_expr_uses(value)?;
                self.check_literal_range(&stmt.target, value);
            }
            let key = self.target_key(&stmt.target);
            if let Some(_first_span) = seen_targets.insert(key.clone(), stmt.span) {
                self.diagnostics.warn_at(
                    format!("multiple writes to '{}' within this handler; the last one wins", key),
                    stmt.span,
                );
            }
            if matches!(handler.kind, HandlerKind::OnAlways) {
                self.always_writes.entry(key).or_default().push(stmt.span);
            }
        }
        Ok(())
    }

    fn target_key(&self, target: &Expr) -> String {
        match target {
            Expr::Member { path, index, .. } => {
                let base = path.join(".");
                match index {
                    Some(idx) => format!("{}[{}]", base, self.render_index(idx)),
                    None => base,
                }
            }
            _ => "<expr>".to_string(),
        }
    }

    fn render_index(&self, idx: &Expr) -> String {
        idx.as_literal_int().map(|n| n.to_string()).unwrap_or_else(|| "?".to_string())
    }

    /// Catches an out-of-range literal at the assignment site against the
    /// target leaf's declared `range`. Per the error taxonomy this is a
    /// soft "range clip" warning, not a hard error: the device clips the
    /// written value to the declared range at runtime (`codegen::emit_write`
    /// performs the same clip so the emitted operand matches what actually
    /// lands on the register/leaf), so a program that writes an
    /// out-of-range literal still compiles, just with a warning. Values
    /// built from `let`/`const` arithmetic aren't folded yet at this stage
    /// — `vars`/`optimizer` run after the analyzer — so this only catches
    /// the common case of a bare literal.
    fn check_literal_range(&mut self, target: &Expr, value: &Expr) {
        let Expr::Member { path, .. } = target else { return };
        if path.len() == 1 && path[0] == "rc" {
            return;
        }
        let Some(n) = value.as_literal_int() else { return };
        if path.len() == 1 && path[0] == "gvar" {
            let (min, max) = REGISTER_RANGE;
            if n < min as i64 || n > max as i64 {
                self.diagnostics.warn_at(
                    SemanticError::OutOfRange { path: "gvar".to_string(), value: n, min: min as i64, max: max as i64, span: target.span() }
                        .to_string(),
                    target.span(),
                );
            }
            return;
        }
        let full = path.join(".");
        if let Some(leaf) = self.catalog.lookup(&full) {
            if !leaf.in_range(n) {
                let (min, max) = leaf.range.unwrap();
                self.diagnostics.warn_at(
                    SemanticError::OutOfRange { path: full, value: n, min: min as i64, max: max as i64, span: target.span() }.to_string(),
                    target.span(),
                );
            }
        }
    }

    fn check_assign_target(&mut self, target: &Expr) -> Result<(), SemanticError> {
        match target {
            Expr::Member { path, index, span } => {
                if path.len() == 1 && path[0] == "gvar" {
                    if let Some(idx) = index {
                        if let Some(n) = idx.as_literal_int() {
                            if !(0..MAX_REGISTERS as i64).contains(&n) {
                                return Err(SemanticError::RegisterIndexOutOfRange { index: n, span: *span });
                            }
                            self.gvar_written.insert(n);
                        }
                        self.check_expr_uses(idx)?;
                    }
                    return Ok(());
                }
                if path.len() == 1 && path[0] == "rc" {
                    // RC input channels are read-only; overriding a channel
                    // goes through a dedicated `override.*` leaf instead.
                    return Err(SemanticError::NotWritable { path: "rc".to_string(), span: *span });
                }
                if path.len() == 1 {
                    if let Some(DeclKind::Var) = self.declared.get(&path[0]) {
                        return Ok(());
                    }
                    if let Some(DeclKind::Const(_)) = self.declared.get(&path[0]) {
                        return Err(SemanticError::ImmutableReassignment { name: path[0].clone(), span: *span });
                    }
                }
                let full = path.join(".");
                match self.catalog.lookup(&full) {
                    Some(leaf) if leaf.writable => {
                        if let Some(idx) = index {
                            self.check_expr_uses(idx)?;
                        }
                        Ok(())
                    }
                    Some(_) => Err(SemanticError::NotWritable { path: full, span: *span }),
                    None => Err(SemanticError::UnknownIdentifier { path: full, span: *span }),
                }
            }
            other => Err(SemanticError::NotWritable { path: format!("{:?}", other), span: other.span() }),
        }
    }

    /// Resolves every identifier reachable from `expr` against the catalog
    /// or a declared binding.
    fn check_expr_uses(&mut self, expr: &Expr) -> Result<(), SemanticError> {
        match expr {
            Expr::Literal(_) => Ok(()),
            Expr::Member { path, index, span } => {
                if let Some(idx) = index {
                    self.check_expr_uses(idx)?;
                }
                if path.len() == 1 && (path[0] == "gvar" || path[0] == "rc") {
                    if path[0] == "gvar" {
                        if let Some(idx) = index {
                            if let Some(n) = idx.as_literal_int() {
                                if !(0..MAX_REGISTERS as i64).contains(&n) {
                                    return Err(SemanticError::RegisterIndexOutOfRange { index: n, span: *span });
                                }
                                self.gvar_read.entry(n).or_insert(*span);
                            }
                        }
                    }
                    return Ok(());
                }
                if path.len() == 1 {
                    if self.declared.contains_key(&path[0]) {
                        return Ok(());
                    }
                }
                let full = path.join(".");
                match self.catalog.lookup(&full) {
                    Some(_) => Ok(()),
                    None => Err(SemanticError::UnknownIdentifier { path: full, span: *span }),
                }
            }
            Expr::Binary { left, right, op, span } => {
                self.check_expr_uses(left)?;
                self.check_expr_uses(right)?;
                if matches!(op, BinOp::Gte | BinOp::Lte) {
                    // Supported by lowering to the closest frozen opcode
                    // `a >= b` lowers to
                    // `!(a < b)`, `a <= b` to `!(a > b)`. Not rejected.
                    let _ = span;
                }
                Ok(())
            }
            Expr::Logical { left, right, .. } => {
                self.check_expr_uses(left)?;
                self.check_expr_uses(right)
            }
            Expr::Unary { arg, .. } => self.check_expr_uses(arg),
            Expr::Call { args, .. } => {
                for a in args {
                    self.check_expr_uses(a)?;
                }
                Ok(())
            }
        }
    }

    fn check_global_passes(&mut self, program: &Program) {
        for stmt in &program.statements {
            if let Statement::EventHandler(h) = stmt {
                if let Some(cond) = handler_condition(&h.kind) {
                    self.check_dead_code(cond, h.span);
                    self.check_always_true(cond, h.span);
                }
            }
        }

        for (target, spans) in &self.always_writes {
            if spans.len() > 1 {
                self.diagnostics.warn_at(
                    format!(
                        "'{}' is written by {} separate on.always handlers; evaluation order is undefined",
                        target,
                        spans.len()
                    ),
                    spans[0],
                );
            }
        }

        let mut read_indices: Vec<_> = self.gvar_read.keys().copied().collect();
        read_indices.sort_unstable();
        for idx in read_indices {
            if !self.gvar_written.contains(&idx) {
                let span = self.gvar_read[&idx];
                self.diagnostics.warn_at(format!("gvar[{}] is read but never assigned", idx), span);
            }
        }
    }

    fn check_dead_code(&mut self, expr: &Expr, span: Span) {
        if let Expr::Binary { op: BinOp::Eq, left, right, .. } = expr {
            if let (Some(a), Some(b)) = (left.as_literal_int(), right.as_literal_int()) {
                if a != b {
                    self.diagnostics.warn_at("comparison of unequal literals is always false (dead code)", span);
                } else {
                    self.diagnostics.warn_at("comparison of equal literals is always true (dead code)", span);
                }
            }
        }
        if let Expr::Logical { op: LogicalOp::And, left, right, .. } = expr {
            if let (Some((lpath, lop, lbound)), Some((rpath, rop, rbound))) =
                (comparison_bound(left), comparison_bound(right))
            {
                if lpath == rpath && contradictory(lop, lbound, rop, rbound) {
                    self.diagnostics.warn_at(
                        format!("'{} {} {}' and '{} {} {}' can never both hold (dead code)", lpath, lop.as_str(), lbound, rpath, rop.as_str(), rbound),
                        span,
                    );
                }
            }
            self.check_dead_code(left, span);
            self.check_dead_code(right, span);
        }
        if let Expr::Logical { left, right, .. } = expr {
            self.check_dead_code(left, span);
            self.check_dead_code(right, span);
        }
    }

    fn check_always_true(&mut self, expr: &Expr, span: Span) {
        if let Expr::Binary { op, left, right, .. } = expr {
            if left.structurally_eq(right) && matches!(op, BinOp::Eq | BinOp::Gte | BinOp::Lte) {
                self.diagnostics.warn_at("condition is always true for any value; consider on.always instead", span);
            }
        }
        if let Expr::Literal(Literal::Bool(true)) = expr {
            self.diagnostics.warn_at("condition is a literal 'true'; consider on.always instead", span);
        }
    }
}

fn handler_condition(kind: &HandlerKind) -> Option<&Expr> {
    match kind {
        HandlerKind::If { condition } | HandlerKind::Edge { condition, .. } | HandlerKind::Delay { condition, .. } => Some(condition),
        _ => None,
    }
}

fn comparison_bound(expr: &Expr) -> Option<(String, BinOp, i64)> {
    match expr {
        Expr::Binary { op, left, right, .. } if op.is_comparison() => {
            if let Expr::Member { path, index: None, .. } = left.as_ref() {
                if let Some(n) = right.as_literal_int() {
                    return Some((path.join("."), *op, n));
                }
            }
            None
        }
        _ => None,
    }
}

fn contradictory(lop: BinOp, lbound: i64, rop: BinOp, rbound: i64) -> bool {
    let lower_excl = matches!(lop, BinOp::Gt) || matches!(rop, BinOp::Gt);
    let (lo, hi) = match (lop, rop) {
        (BinOp::Gt | BinOp::Gte, BinOp::Lt | BinOp::Lte) => (lbound, rbound),
        (BinOp::Lt | BinOp::Lte, BinOp::Gt | BinOp::Gte) => (rbound, lbound),
        _ => return false,
    };
    if lower_excl {
        lo >= hi
    } else {
        lo > hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn rejects_unknown_identifier() {
        let program = parse("if (flight.noSuchField > 1) { override.vtx.power = 1; }").unwrap();
        let err = analyze(&program).unwrap_err();
        assert!(matches!(err, SemanticError::UnknownIdentifier { .. }));
    }

    #[test]
    fn rejects_write_to_readonly() {
        let program = parse("if (true) { flight.homeDistance = 1; }").unwrap();
        let err = analyze(&program).unwrap_err();
        assert!(matches!(err, SemanticError::NotWritable { .. }));
    }

    #[test]
    fn rejects_reassignment_of_const() {
        let program = parse("let x = 1;\nif (true) { x = 2; }").unwrap();
        let err = analyze(&program).unwrap_err();
        assert!(matches!(err, SemanticError::ImmutableReassignment { .. }));
    }

    #[test]
    fn detects_cyclic_constants() {
        let program = parse("let x = y;\nlet y = x;\nif (true) {}").unwrap();
        let err = analyze(&program).unwrap_err();
        assert!(matches!(err, SemanticError::CyclicConstant { .. }));
    }

    #[test]
    fn forward_reference_between_constants_is_not_cyclic() {
        // `y` resolves without a cycle, but it's declared after `x` — a
        // real forward reference, distinct from the mutual cycle above.
        let program = parse("let x = y;\nlet y = 10;\nif (x > 1) { gvar[0] = 1; }").unwrap();
        let err = analyze(&program).unwrap_err();
        assert!(matches!(err, SemanticError::NonConstInitializer { .. }));
    }

    #[test]
    fn prior_constant_reference_is_accepted() {
        let program = parse("let y = 10;\nlet x = y;\nif (x > 1) { gvar[0] = 1; }").unwrap();
        assert!(analyze(&program).is_ok());
    }

    #[test]
    fn out_of_range_literal_is_a_warning_not_a_hard_error() {
        let program = parse("if (true) { override.vtx.power = 99; }").unwrap();
        let diags = analyze(&program).unwrap();
        assert!(diags.as_strings().iter().any(|w| w.contains("outside declared range")));
    }

    #[test]
    fn out_of_range_gvar_literal_is_a_warning() {
        let program = parse("if (true) { gvar[0] = 2000000; }").unwrap();
        let diags = analyze(&program).unwrap();
        assert!(diags.as_strings().iter().any(|w| w.contains("outside declared range")), "{:?}", diags.as_strings());
    }

    #[test]
    fn warns_on_write_write_conflict() {
        let program = parse("on.always(() => { override.vtx.power = 1; override.vtx.power = 2; });").unwrap();
        let diags = analyze(&program).unwrap();
        assert!(!diags.is_empty());
    }
}
