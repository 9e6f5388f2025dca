//! Generators whose parameters arrive as inputs.
//!
//! A length of `0` fills the first output buffer to its capacity.

use crate::stage::{find_role, EvalContext, Input};

fn param(inputs: &[Input], role: &str, default: f64) -> f64 {
    find_role(inputs, role)
        .and_then(|input| input.operand.single())
        .unwrap_or(default)
}

fn length(inputs: &[Input], ctx: &EvalContext) -> usize {
    let requested = param(inputs, "length", 0.0);
    if requested.is_finite() && requested >= 1.0 {
        requested as usize
    } else {
        ctx.output_capacity
    }
}

/// `length` copies of `value`.
pub fn constant(inputs: &[Input], ctx: &EvalContext) -> Vec<f64> {
    vec![param(inputs, "value", 0.0); length(inputs, ctx)]
}

/// `length` evenly spaced values from `start` to `stop` inclusive.
pub fn ramp(inputs: &[Input], ctx: &EvalContext) -> Vec<f64> {
    let start = param(inputs, "start", 0.0);
    let stop = param(inputs, "stop", 100.0);
    let n = length(inputs, ctx);
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
