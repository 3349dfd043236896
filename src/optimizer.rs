//! Constant folding and common-subexpression elimination.
//! Runs on the lowered handler list, after `vars::lower` has already
//! inlined every `let`/`const`/`var` reference, so every expression here is
//! either a catalog path, an explicit `gvar`/`rc` index, or a literal.

use crate::ast::*;

/// Folds every condition and assignment value in place. Folding is
/// idempotent: re-running it over already-folded output is a no-op.
pub fn optimize(handlers: &mut [EventHandler]) {
    for handler in handlers.iter_mut() {
        fold_handler(handler);
    }
    mark_inverted_duplicates(handlers);
}

fn fold_handler(handler: &mut EventHandler) {
    match &mut handler.kind {
        HandlerKind::OnAlways => {}
        HandlerKind::OnArm { delay } => *delay = fold(delay),
        HandlerKind::If { condition } => *condition = fold(condition),
        HandlerKind::Edge { condition, duration } => {
            *condition = fold(condition);
            *duration = fold(duration);
        }
        HandlerKind::Sticky { on, off } => {
            *on = fold(on);
            *off = fold(off);
        }
        HandlerKind::Delay { condition, duration } => {
            *condition = fold(condition);
            *duration = fold(duration);
        }
        HandlerKind::Timer { on_ms, off_ms } => {
            *on_ms = fold(on_ms);
            *off_ms = fold(off_ms);
        }
        HandlerKind::WhenChanged { value, threshold } => {
            *value = fold(value);
            *threshold = fold(threshold);
        }
    }
    for stmt in handler.body.iter_mut() {
        stmt.target = fold(&stmt.target);
        if let Some(v) = &stmt.value {
            stmt.value = Some(fold(v));
        }
    }
}

/// Recursively evaluates arithmetic/comparison/logical subtrees whose
/// operands are already literals. Leaves catalog paths and register
/// accesses untouched — their values aren't known until runtime.
pub fn fold(expr: &Expr) -> Expr {
    match expr {
        Expr::Literal(_) => expr.clone(),
        Expr::Member { path, index, span } => {
            Expr::Member { path: path.clone(), index: index.as_ref().map(|i| Box::new(fold(i))), span: *span }
        }
        Expr::Unary { op: UnOp::Not, arg, span } => {
            let folded = fold(arg);
            match folded {
                Expr::Literal(Literal::Bool(b)) => Expr::Literal(Literal::Bool(!b)),
                _ => Expr::Unary { op: UnOp::Not, arg: Box::new(folded), span: *span },
            }
        }
        Expr::Call { callee, args, span } => {
            let args: Vec<Expr> = args.iter().map(fold).collect();
            if let (Callee::MathAbs, [Expr::Literal(Literal::Int(n))]) = (callee, args.as_slice()) {
                return Expr::Literal(Literal::Int(n.abs()));
            }
            Expr::Call { callee: *callee, args, span: *span }
        }
        Expr::Logical { op, left, right, span } => {
            let left = fold(left);
            let right = fold(right);
            match (op, &left, &right) {
                (LogicalOp::And, Expr::Literal(Literal::Bool(a)), Expr::Literal(Literal::Bool(b))) => {
                    Expr::Literal(Literal::Bool(*a && *b))
                }
                (LogicalOp::Or, Expr::Literal(Literal::Bool(a)), Expr::Literal(Literal::Bool(b))) => {
                    Expr::Literal(Literal::Bool(*a || *b))
                }
                _ => Expr::Logical { op: *op, left: Box::new(left), right: Box::new(right), span: *span },
            }
        }
        Expr::Binary { op, left, right, span } => {
            let left = fold(left);
            let right = fold(right);
            if let (Expr::Literal(Literal::Int(a)), Expr::Literal(Literal::Int(b))) = (&left, &right) {
                let (a, b) = (*a, *b);
                if op.is_comparison() {
                    let result = match op {
                        BinOp::Lt => a < b,
                        BinOp::Gt => a > b,
                        BinOp::Lte => a <= b,
                        BinOp::Gte => a >= b,
                        BinOp::Eq => a == b,
                        BinOp::Neq => a != b,
                        _ => unreachable!(),
                    };
                    return Expr::Literal(Literal::Bool(result));
                }
                let folded = match op {
                    BinOp::Add => Some(a + b),
                    BinOp::Sub => Some(a - b),
                    BinOp::Mul => Some(a * b),
                    BinOp::Div if b != 0 => Some(a / b),
                    BinOp::Mod if b != 0 => Some(a % b),
                    _ => None,
                };
                if let Some(n) = folded {
                    return Expr::Literal(Literal::Int(n));
                }
            }
            Expr::Binary { op: *op, left: Box::new(left), right: Box::new(right), span: *span }
        }
    }
}

fn primary_condition(kind: &HandlerKind) -> Option<&Expr> {
    match kind {
        HandlerKind::If { condition } | HandlerKind::Edge { condition, .. } | HandlerKind::Delay { condition, .. } => Some(condition),
        _ => None,
    }
}

/// Marks handlers whose condition is the exact logical negation of an
/// earlier sibling's, so codegen can reuse that slot with one extra `NOT`
/// instead of re-lowering the whole subtree.
fn mark_inverted_duplicates(handlers: &mut [EventHandler]) {
    for i in 0..handlers.len() {
        let Some(earlier) = primary_condition(&handlers[i].kind).cloned() else { continue };
        for j in (i + 1)..handlers.len() {
            if handlers[j].reuse_inverted_of.is_some() {
                continue;
            }
            let is_match = match primary_condition(&handlers[j].kind) {
                Some(later) => later.is_negation_of(&earlier) || earlier.is_negation_of(later),
                None => false,
            };
            if is_match {
                handlers[j].reuse_inverted_of = Some(i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Span;

    fn lit(n: i64) -> Expr {
        Expr::Literal(Literal::Int(n))
    }

    #[test]
    fn folds_arithmetic() {
        let e = Expr::Binary { op: BinOp::Add, left: Box::new(lit(2)), right: Box::new(lit(3)), span: Span::new(1, 1) };
        assert_eq!(fold(&e).as_literal_int(), Some(5));
    }

    #[test]
    fn folding_is_idempotent() {
        let e = Expr::Binary { op: BinOp::Mul, left: Box::new(lit(4)), right: Box::new(lit(5)), span: Span::new(1, 1) };
        let once = fold(&e);
        let twice = fold(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn folds_literal_comparison_to_bool() {
        let e = Expr::Binary { op: BinOp::Gt, left: Box::new(lit(5)), right: Box::new(lit(2)), span: Span::new(1, 1) };
        assert_eq!(fold(&e), Expr::Literal(Literal::Bool(true)));
    }

    #[test]
    fn marks_negated_sibling_condition() {
        let span = Span::new(1, 1);
        let cond = Expr::Binary {
            op: BinOp::Gt,
            left: Box::new(Expr::ident("flight.homeDistance", span)),
            right: Box::new(lit(100)),
            span,
        };
        let not_cond = Expr::Unary { op: UnOp::Not, arg: Box::new(cond.clone()), span };
        let mut handlers = vec![
            EventHandler { kind: HandlerKind::If { condition: cond }, body: vec![], span, reuse_inverted_of: None },
            EventHandler { kind: HandlerKind::If { condition: not_cond }, body: vec![], span, reuse_inverted_of: None },
        ];
        optimize(&mut handlers);
        assert_eq!(handlers[1].reuse_inverted_of, Some(0));
    }
}
