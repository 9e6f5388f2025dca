//! Transforms that produce a series from series.

use crate::stage::{find_role, Input};

/// All inputs concatenated in declaration order.
pub fn append(inputs: &[Input]) -> Vec<f64> {
    inputs
        .iter()
        .flat_map(|input| input.operand.as_slice().iter().copied())
        .collect()
}

/// Differences of consecutive values of the first input.
pub fn differentiate(inputs: &[Input]) -> Vec<f64> {
    let values = inputs.first().map_or(&[][..], |input| input.operand.as_slice());
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Running sum of the first input.
pub fn integrate(inputs: &[Input]) -> Vec<f64> {
    let values = inputs.first().map_or(&[][..], |input| input.operand.as_slice());
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

/// Position of the first crossing of `threshold` by `y`.
///
/// A crossing needs a value on the opposite side first. The position is
/// read from `x` when it is long enough, else it is the index. No crossing
/// yields an empty result.
pub fn threshold(inputs: &[Input], falling: bool) -> Vec<f64> {
    let level = find_role(inputs, "threshold")
        .and_then(|input| input.operand.single())
        .unwrap_or(0.0);
    let Some(y) = find_role(inputs, "y").map(|input| input.operand.as_slice()) else {
        return Vec::new();
    };
    let x = find_role(inputs, "x").map(|input| input.operand.as_slice());

    let mut armed = false;
    for (i, &value) in y.iter().enumerate() {
        let beyond = if falling { value < level } else { value > level };
        if !beyond {
            armed = true;
        } else if armed {
            let position = x.and_then(|x| x.get(i).copied()).unwrap_or(i as f64);
            return vec![position];
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_concatenates_scalars_and_series() {
        let inputs = vec![
            Input::series(vec![1.0, 2.0]),
            Input::scalar(3.0),
            Input::series(vec![]),
        ];
        assert_eq!(append(&inputs), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn differentiate_and_integrate() {
        let inputs = vec![Input::series(vec![1.0, 4.0, 9.0, 16.0])];
        assert_eq!(differentiate(&inputs), vec![3.0, 5.0, 7.0]);
        assert_eq!(integrate(&inputs), vec![1.0, 5.0, 14.0, 30.0]);
        assert!(differentiate(&[Input::series(vec![1.0])]).is_empty());
    }

    #[test]
    fn threshold_requires_a_crossing() {
        let y = Input::series(vec![2.0, 0.5, 1.5, 3.0]).with_role("y");
        let level = Input::scalar(1.0).with_role("threshold");
        assert_eq!(threshold(&[y.clone(), level.clone()], false), vec![2.0]);

        let x = Input::series(vec![0.0, 0.1, 0.2, 0.3]).with_role("x");
        assert_eq!(threshold(&[y.clone(), x, level.clone()], false), vec![0.2]);

        assert_eq!(threshold(&[y, level.clone()], true), vec![1.0]);

        let never = Input::series(vec![2.0, 3.0]).with_role("y");
        assert!(threshold(&[never, level], false).is_empty());
    }
}
