//! Per-pixel tree interpreter.

use super::compile::{CompiledExpr, Node, truthy};

/// A variable whose buffer does not cover the pixel being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MissingSample {
    pub slot: usize,
}

/// Variable buffers indexed by slot, read at one pixel index.
pub(crate) struct PixelContext<'a> {
    pub sources: &'a [&'a [f32]],
    pub index: usize,
}

impl PixelContext<'_> {
    #[inline]
    fn read(&self, slot: usize) -> Result<f64, MissingSample> {
        self.sources
            .get(slot)
            .and_then(|buf| buf.get(self.index))
            .map(|&v| v as f64)
            .ok_or(MissingSample { slot })
    }
}

impl CompiledExpr {
    /// Evaluate at one pixel, mapping non-finite results to 0.
    #[inline]
    pub(crate) fn eval_pixel(&self, ctx: &PixelContext<'_>) -> Result<f32, MissingSample> {
        let v = eval(&self.root, ctx)? as f32;
        Ok(if v.is_finite() { v } else { 0.0 })
    }
}

fn eval(node: &Node, ctx: &PixelContext<'_>) -> Result<f64, MissingSample> {
    Ok(match node {
        Node::Const(v) => *v,
        Node::Var(slot) => ctx.read(*slot)?,
        Node::Unary(op, a) => Node::unary(*op, eval(a, ctx)?),
        Node::Binary(op, a, b) => Node::binary(*op, eval(a, ctx)?, eval(b, ctx)?),
        Node::Conditional(c, t, f) => {
            if truthy(eval(c, ctx)?) {
                eval(t, ctx)?
            } else {
                eval(f, ctx)?
            }
        }
        Node::Call(builtin, args) => {
            let mut values = smallvec::SmallVec::<[f64; 4]>::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, ctx)?);
            }
            builtin.apply(&values)
        }
    })
}
