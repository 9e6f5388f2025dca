//! Element-wise arithmetic over mixed scalar and series inputs.
//!
//! Inputs of unequal length are broadcast before folding:
//! - every series shorter than the longest one is padded with its own last
//!   value,
//! - a scalar stands for that value at every position,
//! - an empty series makes the whole result empty, even next to scalars.
//!
//! With scalar-only inputs the result holds one value.

use crate::stage::{Input, Operand};

/// Inputs aligned to a common length.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    operands: Vec<Operand>,
    len: usize,
}

impl Broadcast {
    /// Aligns `inputs`, moving the input playing `priority` to the front.
    /// Returns `None` when the result must be empty.
    pub fn new(inputs: Vec<Input>, priority: Option<&str>) -> Option<Self> {
        let mut operands: Vec<Operand> = Vec::with_capacity(inputs.len());
        let (first, rest): (Vec<Input>, Vec<Input>) = match priority {
            Some(role) => inputs.into_iter().partition(|input| input.has_role(role)),
            None => (Vec::new(), inputs),
        };
        operands.extend(first.into_iter().chain(rest).map(|input| input.operand));

        let mut len = 0;
        for operand in &operands {
            match operand {
                Operand::Series(values) if values.is_empty() => return None,
                Operand::Series(values) => len = len.max(values.len()),
                Operand::Scalar(_) => len = len.max(1),
            }
        }
        if len == 0 {
            return None;
        }

        for operand in &mut operands {
            if let Operand::Series(values) = operand {
                if let Some(&last) = values.last() {
                    values.resize(len, last);
                }
            }
        }
        Some(Self { operands, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The aligned value of operand `operand` at position `index`.
    pub fn value(&self, operand: usize, index: usize) -> f64 {
        match &self.operands[operand] {
            Operand::Scalar(v) => *v,
            Operand::Series(values) => values[index],
        }
    }

    pub fn width(&self) -> usize {
        self.operands.len()
    }

    /// Every operand expanded to a full-length series.
    pub fn expanded(&self) -> Vec<Vec<f64>> {
        (0..self.width())
            .map(|operand| (0..self.len).map(|i| self.value(operand, i)).collect())
            .collect()
    }
}

/// Folds the aligned inputs left to right at every position.
pub fn fold(inputs: Vec<Input>, priority: Option<&str>, op: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let Some(aligned) = Broadcast::new(inputs, priority) else {
        return Vec::new();
    };
    (0..aligned.len())
        .map(|i| {
            (1..aligned.width()).fold(aligned.value(0, i), |acc, operand| {
                op(acc, aligned.value(operand, i))
            })
        })
        .collect()
}
