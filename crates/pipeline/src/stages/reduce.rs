//! Reductions of one input series to a single value.
//!
//! The reduced input is the one playing role `y`, or the first input.

use crate::stage::{find_role, Input};

fn primary(inputs: &[Input]) -> &[f64] {
    find_role(inputs, "y")
        .or_else(|| inputs.first())
        .map_or(&[][..], |input| input.operand.as_slice())
}

pub fn max(inputs: &[Input]) -> Option<Vec<f64>> {
    let values = primary(inputs);
    if values.is_empty() {
        return None;
    }
    Some(vec![values.iter().copied().fold(f64::NEG_INFINITY, f64::max)])
}

pub fn min(inputs: &[Input]) -> Option<Vec<f64>> {
    let values = primary(inputs);
    if values.is_empty() {
        return None;
    }
    Some(vec![values.iter().copied().fold(f64::INFINITY, f64::min)])
}

pub fn sum(inputs: &[Input]) -> Option<Vec<f64>> {
    Some(vec![primary(inputs).iter().sum()])
}

pub fn count(inputs: &[Input]) -> Option<Vec<f64>> {
    Some(vec![primary(inputs).len() as f64])
}

fn finite(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| v.is_finite())
}

fn mean(values: &[f64]) -> Option<(f64, usize)> {
    let (sum, n) = finite(values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| (sum / n as f64, n))
}

/// Mean of the finite values. Nothing is written without one.
pub fn average(inputs: &[Input]) -> Option<Vec<f64>> {
    mean(primary(inputs)).map(|(avg, _)| vec![avg])
}

/// Sample standard deviation of the finite values, NaN below two.
pub fn standard_deviation(inputs: &[Input]) -> Option<Vec<f64>> {
    let values = primary(inputs);
    let (avg, n) = mean(values)?;
    if n < 2 {
        return Some(vec![f64::NAN]);
    }
    let squares: f64 = finite(values).map(|v| (v - avg) * (v - avg)).sum();
    Some(vec![(squares / (n - 1) as f64).sqrt()])
}
