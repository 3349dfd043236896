//! Variable and register handling: inlines every `let`/
//! `const` binding to its resolved value and assigns each `var` binding a
//! persistent register, allocated from the highest index downward while
//! skipping any index an author names explicitly with `gvar[i]`. Runs
//! after the analyzer has confirmed every constant initializer is
//! acyclic and every identifier resolves.

use crate::ast::*;
use crate::diagnostics::{AllocationError, Span};
use crate::instruction::MAX_REGISTERS;
use std::collections::HashMap;

/// The program with every `let`/`const`/`var` reference resolved: bindings
/// are gone, replaced by their inlined value or by an explicit `gvar[i]`
/// member access.
pub struct Lowered {
    pub handlers: Vec<EventHandler>,
    /// `(register index, initial value)` pairs, in declaration order, for
    /// the codegen stage to emit as a startup prelude.
    pub register_prelude: Vec<(usize, Expr)>,
    pub destructured_roots: Vec<String>,
}

pub fn lower(program: &Program) -> Result<Lowered, AllocationError> {
    let mut consts: HashMap<String, Expr> = HashMap::new();
    let mut reserved: std::collections::HashSet<usize> = std::collections::HashSet::new();
    let mut var_order: Vec<(String, Expr, Span)> = Vec::new();
    let mut destructured_roots = Vec::new();

    for stmt in &program.statements {
        match stmt {
            Statement::Destructuring { names, .. } => destructured_roots.extend(names.iter().cloned()),
            Statement::LetConst { name, value, .. } => {
                let resolved = inline(value, &consts);
                consts.insert(name.clone(), resolved);
            }
            Statement::VarDecl { name, init, span } => {
                let resolved = inline(init, &consts);
                collect_reserved_gvar(&resolved, &mut reserved);
                var_order.push((name.clone(), resolved, *span));
            }
            Statement::EventHandler(h) => collect_reserved_in_handler(h, &consts, &mut reserved),
        }
    }

    let mut var_index: HashMap<String, usize> = HashMap::new();
    let mut next_free = MAX_REGISTERS;
    let mut register_prelude = Vec::new();
    for (name, init, _span) in &var_order {
        let idx = loop {
            if next_free == 0 {
                return Err(AllocationError::RegisterExhausted { name: name.clone() });
            }
            next_free -= 1;
            if !reserved.contains(&next_free) {
                break next_free;
            }
        };
        var_index.insert(name.clone(), idx);
        register_prelude.push((idx, init.clone()));
    }

    let mut handlers = Vec::new();
    for stmt in &program.statements {
        if let Statement::EventHandler(h) = stmt {
            handlers.push(substitute_handler(h, &consts, &var_index));
        }
    }

    Ok(Lowered { handlers, register_prelude, destructured_roots })
}

/// Replace every reference to a `let`/`const` name with its fully resolved
/// value. Constants are processed in declaration order, so `consts` never
/// holds an entry whose own value still references another identifier.
fn inline(expr: &Expr, consts: &HashMap<String, Expr>) -> Expr {
    match expr {
        Expr::Literal(_) => expr.clone(),
        Expr::Member { path, index, span } => {
            let index = index.as_ref().map(|i| Box::new(inline(i, consts)));
            if path.len() == 1 {
                if let Some(bound) = consts.get(&path[0]) {
                    return bound.clone();
                }
            }
            Expr::Member { path: path.clone(), index, span: *span }
        }
        Expr::Binary { op, left, right, span } => Expr::Binary {
            op: *op,
            left: Box::new(inline(left, consts)),
            right: Box::new(inline(right, consts)),
            span: *span,
        },
        Expr::Logical { op, left, right, span } => Expr::Logical {
            op: *op,
            left: Box::new(inline(left, consts)),
            right: Box::new(inline(right, consts)),
            span: *span,
        },
        Expr::Unary { op, arg, span } => Expr::Unary { op: *op, arg: Box::new(inline(arg, consts)), span: *span },
        Expr::Call { callee, args, span } => {
            Expr::Call { callee: *callee, args: args.iter().map(|a| inline(a, consts)).collect(), span: *span }
        }
    }
}

fn substitute_handler(handler: &EventHandler, consts: &HashMap<String, Expr>, vars: &HashMap<String, usize>) -> EventHandler {
    let kind = match &handler.kind {
        HandlerKind::OnAlways => HandlerKind::OnAlways,
        HandlerKind::OnArm { delay } => HandlerKind::OnArm { delay: sub(delay, consts, vars) },
        HandlerKind::If { condition } => HandlerKind::If { condition: sub(condition, consts, vars) },
        HandlerKind::Edge { condition, duration } => {
            HandlerKind::Edge { condition: sub(condition, consts, vars), duration: sub(duration, consts, vars) }
        }
        HandlerKind::Sticky { on, off } => HandlerKind::Sticky { on: sub(on, consts, vars), off: sub(off, consts, vars) },
        HandlerKind::Delay { condition, duration } => {
            HandlerKind::Delay { condition: sub(condition, consts, vars), duration: sub(duration, consts, vars) }
        }
        HandlerKind::Timer { on_ms, off_ms } => {
            HandlerKind::Timer { on_ms: sub(on_ms, consts, vars), off_ms: sub(off_ms, consts, vars) }
        }
        HandlerKind::WhenChanged { value, threshold } => {
            HandlerKind::WhenChanged { value: sub(value, consts, vars), threshold: sub(threshold, consts, vars) }
        }
    };
    let body = handler
        .body
        .iter()
        .map(|stmt| AssignStmt {
            target: sub(&stmt.target, consts, vars),
            op: stmt.op,
            value: stmt.value.as_ref().map(|v| sub(v, consts, vars)),
            span: stmt.span,
        })
        .collect();
    EventHandler { kind, body, span: handler.span, reuse_inverted_of: handler.reuse_inverted_of }
}

/// Like `inline`, but additionally rewrites single-name `var` references
/// into an explicit `gvar[i]` member access.
fn sub(expr: &Expr, consts: &HashMap<String, Expr>, vars: &HashMap<String, usize>) -> Expr {
    match expr {
        Expr::Literal(_) => expr.clone(),
        Expr::Member { path, index, span } => {
            let index = index.as_ref().map(|i| Box::new(sub(i, consts, vars)));
            if path.len() == 1 {
                if let Some(bound) = consts.get(&path[0]) {
                    return bound.clone();
                }
                if let Some(&reg) = vars.get(&path[0]) {
                    return Expr::Member {
                        path: vec!["gvar".to_string()],
                        index: Some(Box::new(Expr::Literal(Literal::Int(reg as i64)))),
                        span: *span,
                    };
                }
            }
            Expr::Member { path: path.clone(), index, span: *span }
        }
        Expr::Binary { op, left, right, span } => {
            Expr::Binary { op: *op, left: Box::new(sub(left, consts, vars)), right: Box::new(sub(right, consts, vars)), span: *span }
        }
        Expr::Logical { op, left, right, span } => {
            Expr::Logical { op: *op, left: Box::new(sub(left, consts, vars)), right: Box::new(sub(right, consts, vars)), span: *span }
        }
        Expr::Unary { op, arg, span } => Expr::Unary { op: *op, arg: Box::new(sub(arg, consts, vars)), span: *span },
        Expr::Call { callee, args, span } => {
            Expr::Call { callee: *callee, args: args.iter().map(|a| sub(a, consts, vars)).collect(), span: *span }
        }
    }
}

fn collect_reserved_gvar(expr: &Expr, reserved: &mut std::collections::HashSet<usize>) {
    if let Expr::Member { path, index: Some(idx), .. } = expr {
        if path.len() == 1 && path[0] == "gvar" {
            if let Some(n) = idx.as_literal_int() {
                if n >= 0 {
                    reserved.insert(n as usize);
                }
            }
        }
    }
    match expr {
        Expr::Member { index: Some(idx), .. } => collect_reserved_gvar(idx, reserved),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            collect_reserved_gvar(left, reserved);
            collect_reserved_gvar(right, reserved);
        }
        Expr::Unary { arg, .. } => collect_reserved_gvar(arg, reserved),
        Expr::Call { args, .. } => args.iter().for_each(|a| collect_reserved_gvar(a, reserved)),
        _ => {}
    }
}

fn collect_reserved_in_handler(handler: &EventHandler, consts: &HashMap<String, Expr>, reserved: &mut std::collections::HashSet<usize>) {
    let mut exprs: Vec<Expr> = Vec::new();
    match &handler.kind {
        HandlerKind::OnAlways => {}
        HandlerKind::OnArm { delay } => exprs.push(delay.clone()),
        HandlerKind::If { condition } => exprs.push(condition.clone()),
        HandlerKind::Edge { condition, duration } => {
            exprs.push(condition.clone());
            exprs.push(duration.clone());
        }
        HandlerKind::Sticky { on, off } => {
            exprs.push(on.clone());
            exprs.push(off.clone());
        }
        HandlerKind::Delay { condition, duration } => {
            exprs.push(condition.clone());
            exprs.push(duration.clone());
        }
        HandlerKind::Timer { on_ms, off_ms } => {
            exprs.push(on_ms.clone());
            exprs.push(off_ms.clone());
        }
        HandlerKind::WhenChanged { value, threshold } => {
            exprs.push(value.clone());
            exprs.push(threshold.clone());
        }
    }
    for stmt in &handler.body {
        exprs.push(stmt.target.clone());
        if let Some(v) = &stmt.value {
            exprs.push(v.clone());
        }
    }
    for e in &exprs {
        let resolved = inline(e, consts);
        collect_reserved_gvar(&resolved, reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn inlines_constants() {
        let program = parse("let threshold = 10 + 5;\nif (flight.homeDistance > threshold) { override.vtx.power = 1; }").unwrap();
        let lowered = lower(&program).unwrap();
        let HandlerKind::If { condition } = &lowered.handlers[0].kind else { panic!("expected if") };
        let Expr::Binary { right, .. } = condition else { panic!("expected binary") };
        // Not yet constant-folded here (that's the optimizer's job) but no
        // longer a bare identifier reference.
        assert!(matches!(right.as_ref(), Expr::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn allocates_registers_highest_first_and_skips_explicit_indices() {
        let program = parse("var a = 1;\nvar b = 2;\nif (gvar[7] > 0) { a = 2; b = 3; }").unwrap();
        let lowered = lower(&program).unwrap();
        let mut indices: Vec<usize> = lowered.register_prelude.iter().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![5, 6]);
    }

    #[test]
    fn exhausts_registers_past_capacity() {
        let mut src = String::new();
        for i in 0..9 {
            src.push_str(&format!("var v{} = {};\n", i, i));
        }
        src.push_str("if (true) {}");
        let program = parse(&src).unwrap();
        let err = lower(&program).unwrap_err();
        assert!(matches!(err, AllocationError::RegisterExhausted { .. }));
    }
}
