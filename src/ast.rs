//! AST node shapes. The generator hands parent scopes the
//! slot index of a subexpression's result rather than storing cross-links
//! in the tree itself rather than a nested AST with back-references, so
//! this module stays a plain owned tree with no back-pointers.

use crate::diagnostics::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
}

impl BinOp {
    /// Human-readable spelling, used by the decompiler and by diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Lte => "<=",
            BinOp::Gte => ">=",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Lte | BinOp::Gte | BinOp::Eq | BinOp::Neq)
    }

    pub fn negated(self) -> Option<BinOp> {
        match self {
            BinOp::Lt => Some(BinOp::Gte),
            BinOp::Gt => Some(BinOp::Lte),
            BinOp::Lte => Some(BinOp::Gt),
            BinOp::Gte => Some(BinOp::Lt),
            BinOp::Eq => Some(BinOp::Neq),
            BinOp::Neq => Some(BinOp::Eq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
}

/// The only first-class function this grammar supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    MathAbs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
}

/// Expression nodes. `Member` covers both a bare identifier (a one-element
/// path) and a dotted catalog path up to three segments deep, optionally
/// indexed (`rc[0]`, `gvar[0]`, `override.axisAngle[0]`).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Dotted path, e.g. `["flight", "homeDistance"]`, or a single-element
    /// path naming a `let`/`const`/`var` binding.
    Member { path: Vec<String>, index: Option<Box<Expr>>, span: Span },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr>, span: Span },
    Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr>, span: Span },
    Unary { op: UnOp, arg: Box<Expr>, span: Span },
    Call { callee: Callee, args: Vec<Expr>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_) => Span::new(0, 0),
            Expr::Member { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. } => *span,
        }
    }

    pub fn ident(name: impl Into<String>, span: Span) -> Expr {
        Expr::Member { path: vec![name.into()], index: None, span }
    }

    pub fn member(path: Vec<String>, span: Span) -> Expr {
        Expr::Member { path, index: None, span }
    }

    pub fn is_literal_int(&self) -> bool {
        matches!(self, Expr::Literal(Literal::Int(_)))
    }

    pub fn as_literal_int(&self) -> Option<i64> {
        match self {
            Expr::Literal(Literal::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Structural equality ignoring source spans, used by CSE: the
    /// comparison is syntactic, a deep-equal over the AST shape.
    pub fn structurally_eq(&self, other: &Expr) -> bool {
        use Expr::*;
        match (self, other) {
            (Literal(a), Literal(b)) => a == b,
            (Member { path: p1, index: i1, .. }, Member { path: p2, index: i2, .. }) => {
                p1 == p2
                    && match (i1, i2) {
                        (Some(a), Some(b)) => a.structurally_eq(b),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (Binary { op: o1, left: l1, right: r1, .. }, Binary { op: o2, left: l2, right: r2, .. }) => {
                o1 == o2 && l1.structurally_eq(l2) && r1.structurally_eq(r2)
            }
            (Logical { op: o1, left: l1, right: r1, .. }, Logical { op: o2, left: l2, right: r2, .. }) => {
                o1 == o2 && l1.structurally_eq(l2) && r1.structurally_eq(r2)
            }
            (Unary { op: o1, arg: a1, .. }, Unary { op: o2, arg: a2, .. }) => o1 == o2 && a1.structurally_eq(a2),
            (Call { callee: c1, args: a1, .. }, Call { callee: c2, args: a2, .. }) => {
                c1 == c2 && a1.len() == a2.len() && a1.iter().zip(a2).all(|(x, y)| x.structurally_eq(y))
            }
            _ => false,
        }
    }

    /// True when `other` is the logical negation of `self`, recognized
    /// syntactically: `!self == other`, or comparison operators that are
    /// exact opposites (CSE's "inversion marker").
    pub fn is_negation_of(&self, other: &Expr) -> bool {
        match other {
            Expr::Unary { op: UnOp::Not, arg, .. } => self.structurally_eq(arg),
            Expr::Binary { op, left, right, .. } => match self {
                Expr::Binary { op: sop, left: sleft, right: sright, .. } => {
                    sleft.structurally_eq(left) && sright.structurally_eq(right) && sop.negated() == Some(*op)
                }
                _ => false,
            },
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    Increment,
    Decrement,
}

/// One statement inside an event handler body. Event
/// handler bodies may contain only assignments.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    pub target: Expr,
    pub op: AssignOp,
    /// `None` for `++x` / `x--`.
    pub value: Option<Expr>,
    pub span: Span,
}

/// Discriminant unifying every handler-shaped construct under one node
/// rather than modeling each as a disjoint node type.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerKind {
    OnAlways,
    /// `delay` is kept as an `Expr` rather than a literal:
    /// classes "non-literal duration" as a codegen-stage shape-hard error,
    /// not a parse-stage one, since a `let`-bound constant is legal here
    /// and only resolves to a literal after inlining.
    OnArm { delay: Expr },
    If { condition: Expr },
    Edge { condition: Expr, duration: Expr },
    Sticky { on: Expr, off: Expr },
    Delay { condition: Expr, duration: Expr },
    Timer { on_ms: Expr, off_ms: Expr },
    WhenChanged { value: Expr, threshold: Expr },
}

impl HandlerKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::OnAlways => "on.always",
            HandlerKind::OnArm { .. } => "on.arm",
            HandlerKind::If { .. } => "if",
            HandlerKind::Edge { .. } => "edge",
            HandlerKind::Sticky { .. } => "sticky",
            HandlerKind::Delay { .. } => "delay",
            HandlerKind::Timer { .. } => "timer",
            HandlerKind::WhenChanged { .. } => "whenChanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventHandler {
    pub kind: HandlerKind,
    pub body: Vec<AssignStmt>,
    pub span: Span,
    /// Set by the optimizer's CSE pass when this handler's condition is
    /// known to be the exact negation of an already-emitted sibling
    /// condition; codegen then reuses that slot plus one `NOT` instead of
    /// re-lowering the whole condition.
    pub reuse_inverted_of: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `let name = constExpr;` / `const name = constExpr;` — both are
    /// immutable compile-time bindings.
    LetConst { name: String, value: Expr, span: Span },
    /// `var name = initExpr;` — mutable, allocated a register.
    VarDecl { name: String, init: Expr, span: Span },
    /// `const { names } = inav;`
    Destructuring { names: Vec<String>, span: Span },
    EventHandler(EventHandler),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::LetConst { span, .. } => *span,
            Statement::VarDecl { span, .. } => *span,
            Statement::Destructuring { span, .. } => *span,
            Statement::EventHandler(h) => h.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}
