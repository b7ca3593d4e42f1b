//! Expression tree to executable form: identifier resolution, function
//! lookup with arity checks, and constant folding.

use std::collections::HashMap;
use std::str::FromStr;

use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use super::parser::{BinaryOp, Expr, MAX_DEPTH, MAX_OPERATORS, UnaryOp, parse};

/// Errors raised while turning an expression into executable form.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{message} at position {position}")]
    Syntax { message: String, position: usize },

    #[error("Unknown function `{name}` at position {position}")]
    UnknownFunction { name: String, position: usize },

    #[error("Unknown variable `{name}` at position {position}")]
    UnknownVariable { name: String, position: usize },

    #[error("`{name}` takes {expected} arguments, got {actual} at position {position}")]
    Arity {
        name: String,
        expected: String,
        actual: usize,
        position: usize,
    },

    #[error("Expression nests deeper than {MAX_DEPTH} levels at position {position}")]
    TooDeep { position: usize },

    #[error("Expression has more than {MAX_OPERATORS} binary operators at position {position}")]
    TooManyOperators { position: usize },
}

impl CompileError {
    pub fn position(&self) -> usize {
        match self {
            CompileError::Syntax { position, .. }
            | CompileError::UnknownFunction { position, .. }
            | CompileError::UnknownVariable { position, .. }
            | CompileError::Arity { position, .. }
            | CompileError::TooDeep { position }
            | CompileError::TooManyOperators { position } => *position,
        }
    }
}

// =============================================================================
// Built-ins
// =============================================================================

/// Built-in functions. Names are lowercase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Min,
    Max,
    Abs,
    Sqrt,
    /// Natural logarithm, same as `ln`.
    Log,
    Ln,
    Log10,
    Exp,
    Sin,
    Cos,
    Tan,
    Atan2,
    Pow,
    /// `clamp(v, lo = 0, hi = 1)`
    Clamp,
    Avg,
    Floor,
    Ceil,
    Round,
    /// `iif(cond, if_true, if_false = 0)`
    Iif,
}

impl Builtin {
    /// Accepted argument count range; `None` upper bound means variadic.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Builtin::Min | Builtin::Max | Builtin::Avg => (1, None),
            Builtin::Atan2 | Builtin::Pow => (2, Some(2)),
            Builtin::Clamp => (1, Some(3)),
            Builtin::Iif => (2, Some(3)),
            _ => (1, Some(1)),
        }
    }

    fn accepts(self, count: usize) -> bool {
        let (min, max) = self.arity();
        count >= min && max.is_none_or(|max| count <= max)
    }

    fn describe_arity(self) -> String {
        match self.arity() {
            (min, None) => format!("at least {min}"),
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{min} to {max}"),
        }
    }

    pub(crate) fn apply(self, args: &[f64]) -> f64 {
        let arg = |i: usize| args.get(i).copied();
        let a = arg(0).unwrap_or(0.0);
        match self {
            Builtin::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Builtin::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Builtin::Avg => args.iter().sum::<f64>() / args.len().max(1) as f64,
            Builtin::Abs => a.abs(),
            Builtin::Sqrt => a.sqrt(),
            Builtin::Log | Builtin::Ln => a.ln(),
            Builtin::Log10 => a.log10(),
            Builtin::Exp => a.exp(),
            Builtin::Sin => a.sin(),
            Builtin::Cos => a.cos(),
            Builtin::Tan => a.tan(),
            Builtin::Atan2 => a.atan2(arg(1).unwrap_or(0.0)),
            Builtin::Pow => a.powf(arg(1).unwrap_or(0.0)),
            Builtin::Clamp => {
                let lo = arg(1).unwrap_or(0.0);
                let hi = arg(2).unwrap_or(1.0);
                a.max(lo).min(hi)
            }
            Builtin::Floor => a.floor(),
            Builtin::Ceil => a.ceil(),
            Builtin::Round => a.round(),
            Builtin::Iif => {
                if truthy(a) {
                    arg(1).unwrap_or(0.0)
                } else {
                    arg(2).unwrap_or(0.0)
                }
            }
        }
    }
}

/// Named constants, folded at compile time.
pub(crate) fn constant(name: &str) -> Option<f64> {
    match name {
        "PI" => Some(std::f64::consts::PI),
        "E" => Some(std::f64::consts::E),
        _ => None,
    }
}

pub(crate) fn is_builtin_name(name: &str) -> bool {
    constant(name).is_some() || Builtin::from_str(name).is_ok()
}

#[inline]
pub(crate) fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

#[inline]
fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

// =============================================================================
// Compiled form
// =============================================================================

/// Executable expression with variables resolved to slots.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Const(f64),
    Var(usize),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    Call(Builtin, Vec<Node>),
}

impl Node {
    pub(crate) fn unary(op: UnaryOp, v: f64) -> f64 {
        match op {
            UnaryOp::Neg => -v,
            UnaryOp::Not => flag(!truthy(v)),
        }
    }

    pub(crate) fn binary(op: BinaryOp, a: f64, b: f64) -> f64 {
        match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Less => flag(a < b),
            BinaryOp::Greater => flag(a > b),
            BinaryOp::LessEq => flag(a <= b),
            BinaryOp::GreaterEq => flag(a >= b),
            BinaryOp::Eq => flag(a == b),
            BinaryOp::NotEq => flag(a != b),
            BinaryOp::And => flag(truthy(a) && truthy(b)),
            BinaryOp::Or => flag(truthy(a) || truthy(b)),
        }
    }

    fn as_const(&self) -> Option<f64> {
        match self {
            Node::Const(v) => Some(*v),
            _ => None,
        }
    }

    fn collect_slots(&self, out: &mut Vec<usize>) {
        match self {
            Node::Const(_) => {}
            Node::Var(slot) => out.push(*slot),
            Node::Unary(_, a) => a.collect_slots(out),
            Node::Binary(_, a, b) => {
                a.collect_slots(out);
                b.collect_slots(out);
            }
            Node::Conditional(c, t, f) => {
                c.collect_slots(out);
                t.collect_slots(out);
                f.collect_slots(out);
            }
            Node::Call(_, args) => args.iter().for_each(|a| a.collect_slots(out)),
        }
    }
}

/// Variable name to slot index.
#[derive(Debug, Clone, Default)]
pub(crate) struct VariableTable {
    slots: HashMap<String, usize>,
}

impl VariableTable {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let slots = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        Self { slots }
    }

    fn slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }
}

/// A compiled channel expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledExpr {
    pub root: Node,
    /// Sorted, deduplicated slots the expression reads.
    pub slots: Vec<usize>,
}

/// Parse and compile `input` against `variables`.
pub(crate) fn compile(input: &str, variables: &VariableTable) -> Result<CompiledExpr, CompileError> {
    let expr = parse(input)?;
    let root = lower(&expr, variables)?;
    let mut slots = Vec::new();
    root.collect_slots(&mut slots);
    slots.sort_unstable();
    slots.dedup();
    Ok(CompiledExpr { root, slots })
}

fn lower(expr: &Expr, variables: &VariableTable) -> Result<Node, CompileError> {
    let node = match expr {
        Expr::Number(v) => Node::Const(*v),
        Expr::Ident { name, position } => {
            if let Some(v) = constant(name) {
                Node::Const(v)
            } else if let Some(slot) = variables.slot(name) {
                Node::Var(slot)
            } else {
                return Err(CompileError::UnknownVariable {
                    name: name.clone(),
                    position: *position,
                });
            }
        }
        Expr::Unary(op, a) => {
            let a = lower(a, variables)?;
            match a.as_const() {
                Some(v) => Node::Const(Node::unary(*op, v)),
                None => Node::Unary(*op, Box::new(a)),
            }
        }
        Expr::Binary(op, a, b) => {
            let a = lower(a, variables)?;
            let b = lower(b, variables)?;
            match (a.as_const(), b.as_const()) {
                (Some(x), Some(y)) => Node::Const(Node::binary(*op, x, y)),
                _ => Node::Binary(*op, Box::new(a), Box::new(b)),
            }
        }
        Expr::Conditional(c, t, f) => {
            let c = lower(c, variables)?;
            let t = lower(t, variables)?;
            let f = lower(f, variables)?;
            match c.as_const() {
                Some(v) if truthy(v) => t,
                Some(_) => f,
                None => Node::Conditional(Box::new(c), Box::new(t), Box::new(f)),
            }
        }
        Expr::Call {
            name,
            args,
            position,
        } => {
            let builtin = Builtin::from_str(name).map_err(|_| CompileError::UnknownFunction {
                name: name.clone(),
                position: *position,
            })?;
            if !builtin.accepts(args.len()) {
                return Err(CompileError::Arity {
                    name: name.clone(),
                    expected: builtin.describe_arity(),
                    actual: args.len(),
                    position: *position,
                });
            }
            let args = args
                .iter()
                .map(|a| lower(a, variables))
                .collect::<Result<Vec<_>, _>>()?;
            let consts: Option<Vec<f64>> = args.iter().map(Node::as_const).collect();
            match consts {
                Some(values) => Node::Const(builtin.apply(&values)),
                None => Node::Call(builtin, args),
            }
        }
    };
    Ok(node)
}
