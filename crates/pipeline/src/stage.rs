//! Analysis modules: inputs, outputs and the closed set of transforms.
//!
//! Every module follows the same contract. It gathers its inputs (whole
//! buffer contents or fixed values), hands them to its [`ModuleKind`] and
//! writes the single resulting sequence to each of its outputs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arena::{BufferArena, BufferId};
use crate::stages::{arithmetic, generate, reduce, series};

/// A resolved module input.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleInput {
    /// The full current contents of a buffer.
    Buffer { buffer: BufferId, role: Option<String> },
    /// A fixed value.
    Value { value: f64, role: Option<String> },
}

impl ModuleInput {
    pub fn role(&self) -> Option<&str> {
        match self {
            ModuleInput::Buffer { role, .. } | ModuleInput::Value { role, .. } => role.as_deref(),
        }
    }

    pub fn buffer(&self) -> Option<BufferId> {
        match self {
            ModuleInput::Buffer { buffer, .. } => Some(*buffer),
            ModuleInput::Value { .. } => None,
        }
    }
}

/// A resolved module output.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutput {
    pub buffer: BufferId,
    pub role: Option<String>,
    /// Replace the buffer contents instead of appending to them.
    pub clear: bool,
}

/// Inclusive range of cycle numbers. A missing end is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CycleRange {
    #[serde(default)]
    pub from: Option<u64>,
    #[serde(default)]
    pub to: Option<u64>,
}

impl CycleRange {
    pub fn contains(&self, cycle: u64) -> bool {
        self.from.map_or(true, |from| cycle >= from) && self.to.map_or(true, |to| cycle <= to)
    }
}

/// One gathered input value.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(f64),
    Series(Vec<f64>),
}

impl Operand {
    /// The value a single-number parameter reads: a scalar, or the last
    /// value of a series.
    pub fn single(&self) -> Option<f64> {
        match self {
            Operand::Scalar(v) => Some(*v),
            Operand::Series(values) => values.last().copied(),
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        match self {
            Operand::Scalar(v) => std::slice::from_ref(v),
            Operand::Series(values) => values,
        }
    }
}

/// An input as the transform sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub role: Option<String>,
    pub operand: Operand,
}

impl Input {
    pub fn scalar(value: f64) -> Self {
        Self {
            role: None,
            operand: Operand::Scalar(value),
        }
    }

    pub fn series(values: Vec<f64>) -> Self {
        Self {
            role: None,
            operand: Operand::Series(values),
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }
}

/// Finds the input playing `role`.
pub fn find_role<'a>(inputs: &'a [Input], role: &str) -> Option<&'a Input> {
    inputs.iter().find(|input| input.has_role(role))
}

/// What a transform may know besides its inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalContext {
    pub timestamp: f64,
    /// Capacity of the first output buffer, `0` when unbounded or absent.
    pub output_capacity: usize,
}

/// The closed set of transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Max,
    Min,
    Sum,
    Count,
    Average,
    StandardDeviation,
    Append,
    Differentiate,
    Integrate,
    Threshold {
        #[serde(default)]
        falling: bool,
    },
    ConstGenerator,
    RampGenerator,
}

impl ModuleKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ModuleKind::Add => "add",
            ModuleKind::Subtract => "subtract",
            ModuleKind::Multiply => "multiply",
            ModuleKind::Divide => "divide",
            ModuleKind::Power => "power",
            ModuleKind::Max => "max",
            ModuleKind::Min => "min",
            ModuleKind::Sum => "sum",
            ModuleKind::Count => "count",
            ModuleKind::Average => "average",
            ModuleKind::StandardDeviation => "standard_deviation",
            ModuleKind::Append => "append",
            ModuleKind::Differentiate => "differentiate",
            ModuleKind::Integrate => "integrate",
            ModuleKind::Threshold { .. } => "threshold",
            ModuleKind::ConstGenerator => "const_generator",
            ModuleKind::RampGenerator => "ramp_generator",
        }
    }

    /// Computes the result sequence. `None` leaves every output untouched.
    pub fn evaluate(&self, inputs: Vec<Input>, ctx: &EvalContext) -> Option<Vec<f64>> {
        match self {
            ModuleKind::Add => Some(arithmetic::fold(inputs, None, |a, b| a + b)),
            ModuleKind::Subtract => Some(arithmetic::fold(inputs, Some("minuend"), |a, b| a - b)),
            ModuleKind::Multiply => Some(arithmetic::fold(inputs, None, |a, b| a * b)),
            ModuleKind::Divide => Some(arithmetic::fold(inputs, Some("dividend"), |a, b| a / b)),
            ModuleKind::Power => Some(arithmetic::fold(inputs, Some("base"), f64::powf)),
            ModuleKind::Max => reduce::max(&inputs),
            ModuleKind::Min => reduce::min(&inputs),
            ModuleKind::Sum => reduce::sum(&inputs),
            ModuleKind::Count => reduce::count(&inputs),
            ModuleKind::Average => reduce::average(&inputs),
            ModuleKind::StandardDeviation => reduce::standard_deviation(&inputs),
            ModuleKind::Append => Some(series::append(&inputs)),
            ModuleKind::Differentiate => Some(series::differentiate(&inputs)),
            ModuleKind::Integrate => Some(series::integrate(&inputs)),
            ModuleKind::Threshold { falling } => Some(series::threshold(&inputs, *falling)),
            ModuleKind::ConstGenerator => Some(generate::constant(&inputs, ctx)),
            ModuleKind::RampGenerator => Some(generate::ramp(&inputs, ctx)),
        }
    }
}

/// A module bound to buffers of one arena.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisModule {
    pub name: String,
    pub kind: ModuleKind,
    pub inputs: Vec<ModuleInput>,
    pub outputs: Vec<ModuleOutput>,
    /// Cycles this module runs in; empty means every cycle.
    pub cycles: Vec<CycleRange>,
}

impl AnalysisModule {
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            cycles: Vec::new(),
        }
    }

    pub fn input(mut self, input: ModuleInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, buffer: BufferId, clear: bool) -> Self {
        self.outputs.push(ModuleOutput {
            buffer,
            role: None,
            clear,
        });
        self
    }

    pub fn runs_in_cycle(&self, cycle: u64) -> bool {
        self.cycles.is_empty() || self.cycles.iter().any(|range| range.contains(cycle))
    }

    /// Reads every input. `None` when there is nothing to evaluate.
    pub fn gather(&self, arena: &BufferArena) -> Option<Vec<Input>> {
        if self.inputs.is_empty() {
            return None;
        }
        self.inputs
            .iter()
            .map(|input| {
                let operand = match input {
                    ModuleInput::Buffer { buffer, .. } => {
                        Operand::Series(arena.get(*buffer)?.to_vec())
                    }
                    ModuleInput::Value { value, .. } => Operand::Scalar(*value),
                };
                Some(Input {
                    role: input.role().map(str::to_string),
                    operand,
                })
            })
            .collect()
    }

    /// Runs one evaluation and writes the result to every output. Returns
    /// whether outputs were touched.
    pub fn update(&self, arena: &BufferArena, timestamp: f64) -> bool {
        let Some(inputs) = self.gather(arena) else {
            debug!("Module '{}' has no inputs to evaluate", self.name);
            return false;
        };
        let ctx = EvalContext {
            timestamp,
            output_capacity: self
                .outputs
                .first()
                .and_then(|output| arena.get(output.buffer))
                .map_or(0, |buffer| buffer.capacity()),
        };
        let Some(result) = self.kind.evaluate(inputs, &ctx) else {
            return false;
        };
        for output in &self.outputs {
            let Some(buffer) = arena.get(output.buffer) else {
                continue;
            };
            if output.clear {
                buffer.replace_values(&result, true);
            } else {
                buffer.append_from_slice(&result, true);
            }
        }
        true
    }

    pub fn input_buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.inputs.iter().filter_map(ModuleInput::buffer)
    }

    pub fn output_buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.outputs.iter().map(|output| output.buffer)
    }
}
