//! Analysis graph construction.
//!
//! Buffer names are resolved against the arena exactly once, here. Anything
//! that does not resolve is a configuration error.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::HashSet;
use tracing::warn;

use crate::arena::{BufferArena, BufferId};
use crate::config::{InputConfig, ModuleConfig, SystemConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::stage::{AnalysisModule, ModuleInput, ModuleOutput};

/// Lower bound of the cooldown between a request and its cycle, in seconds.
pub const MINIMUM_COOLDOWN: f64 = 1.0 / 50.0;

/// Upper bound of the cooldown, one day.
pub const MAXIMUM_COOLDOWN: f64 = 86_400.0;

/// Gate that skips cycles until a buffer holds enough values.
#[derive(Debug, Clone, PartialEq)]
pub struct RequireFill {
    pub buffer: BufferId,
    pub threshold: usize,
    /// Buffer whose last value overrides `threshold`.
    pub dynamic: Option<BufferId>,
}

/// Resolved scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    /// Static cooldown in seconds.
    pub minimum_period: f64,
    /// Buffer whose last value overrides `minimum_period`.
    pub dynamic_period: Option<BufferId>,
    pub require_fill: Option<RequireFill>,
    /// Only run when requested. Otherwise every finished cycle schedules
    /// the next one while the analysis is running.
    pub on_user_input: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            minimum_period: MINIMUM_COOLDOWN,
            dynamic_period: None,
            require_fill: None,
            on_user_input: false,
        }
    }
}

/// Modules in evaluation order plus the buffer sets derived from them.
#[derive(Debug, Clone)]
pub struct AnalysisGraph {
    modules: Vec<AnalysisModule>,
    input_buffers: Vec<BufferId>,
    output_buffers: Vec<BufferId>,
    pure_inputs: Vec<BufferId>,
    settings: AnalysisSettings,
}

fn distinct(ids: impl Iterator<Item = BufferId>) -> Vec<BufferId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}

impl AnalysisGraph {
    pub fn new(modules: Vec<AnalysisModule>, settings: AnalysisSettings) -> Self {
        let input_buffers = distinct(modules.iter().flat_map(|m| m.input_buffers()));
        let output_buffers = distinct(modules.iter().flat_map(|m| m.output_buffers()));
        let produced: HashSet<BufferId> = output_buffers.iter().copied().collect();
        let pure_inputs = input_buffers
            .iter()
            .copied()
            .filter(|id| !produced.contains(id))
            .collect();
        let graph = Self {
            modules,
            input_buffers,
            output_buffers,
            pure_inputs,
            settings,
        };
        graph.warn_on_feedback();
        graph
    }

    /// Resolves `config` against the buffers already created in `arena`.
    pub fn build(config: &SystemConfig, arena: &BufferArena) -> PipelineResult<Self> {
        let modules = config
            .modules
            .iter()
            .enumerate()
            .map(|(index, module)| resolve_module(index, module, arena))
            .collect::<PipelineResult<Vec<_>>>()?;

        let analysis = &config.analysis;
        let optional = |name: &Option<String>| -> PipelineResult<Option<BufferId>> {
            name.as_deref().map(|n| arena.resolve(n)).transpose()
        };
        let require_fill = match optional(&analysis.require_fill)? {
            Some(buffer) => Some(RequireFill {
                buffer,
                threshold: analysis.require_fill_threshold,
                dynamic: optional(&analysis.require_fill_dynamic)?,
            }),
            None => None,
        };
        let settings = AnalysisSettings {
            minimum_period: analysis.sleep,
            dynamic_period: optional(&analysis.dynamic_sleep)?,
            require_fill,
            on_user_input: analysis.on_user_input,
        };
        Ok(Self::new(modules, settings))
    }

    pub fn modules(&self) -> &[AnalysisModule] {
        &self.modules
    }

    pub fn input_buffers(&self) -> &[BufferId] {
        &self.input_buffers
    }

    pub fn output_buffers(&self) -> &[BufferId] {
        &self.output_buffers
    }

    /// Input buffers no module writes to.
    pub fn pure_inputs(&self) -> &[BufferId] {
        &self.pure_inputs
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    // Modules still run in declaration order; a feedback edge only means a
    // module reads a value written earlier in the same or a previous cycle.
    fn warn_on_feedback(&self) {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..self.modules.len()).map(|i| graph.add_node(i)).collect();
        for (from, producer) in self.modules.iter().enumerate() {
            let written: HashSet<BufferId> = producer.output_buffers().collect();
            for (to, consumer) in self.modules.iter().enumerate() {
                if from != to && consumer.input_buffers().any(|id| written.contains(&id)) {
                    graph.add_edge(nodes[from], nodes[to], ());
                }
            }
        }
        if let Err(cycle) = toposort(&graph, None) {
            let module = &self.modules[graph[cycle.node_id()]];
            warn!(
                "Analysis graph has a feedback loop through module '{}'",
                module.name
            );
        }
    }
}

fn resolve_module(
    index: usize,
    config: &ModuleConfig,
    arena: &BufferArena,
) -> PipelineResult<AnalysisModule> {
    let name = config
        .name
        .clone()
        .unwrap_or_else(|| format!("{}{}", config.kind.type_name(), index));
    let invalid = |message: String| PipelineError::InvalidModule {
        module: name.clone(),
        message,
    };

    let inputs = config
        .inputs
        .iter()
        .map(|input| match input {
            InputConfig::Buffer { buffer, role } => arena
                .resolve(buffer)
                .map(|buffer| ModuleInput::Buffer {
                    buffer,
                    role: role.clone(),
                })
                .map_err(|_| invalid(format!("input buffer '{}' does not exist", buffer))),
            InputConfig::Value { value, role } => Ok(ModuleInput::Value {
                value: *value,
                role: role.clone(),
            }),
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    let outputs = config
        .outputs
        .iter()
        .map(|output| {
            arena
                .resolve(&output.buffer)
                .map(|buffer| ModuleOutput {
                    buffer,
                    role: output.role.clone(),
                    clear: output.clear,
                })
                .map_err(|_| invalid(format!("output buffer '{}' does not exist", output.buffer)))
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok(AnalysisModule {
        name,
        kind: config.kind.clone(),
        inputs,
        outputs,
        cycles: config.cycles.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StorageKind;
    use crate::control::Dispatcher;
    use crate::stage::ModuleKind;

    fn arena(names: &[&str]) -> BufferArena {
        let dispatcher = Dispatcher::new();
        let mut arena = BufferArena::new(dispatcher.notifier());
        for name in names {
            arena
                .create(name, StorageKind::Memory { size: 0 }, false, vec![])
                .unwrap();
        }
        arena
    }

    #[test]
    fn derives_pure_inputs() {
        let arena = arena(&["sensor", "scaled", "total"]);
        let config = SystemConfig::from_json_str(
            r#"{
                "buffers": [{"name": "sensor"}, {"name": "scaled"}, {"name": "total"}],
                "modules": [
                    {"type": "multiply", "inputs": [{"buffer": "sensor"}, {"value": 2}],
                     "outputs": [{"buffer": "scaled"}]},
                    {"type": "sum", "inputs": [{"buffer": "scaled"}],
                     "outputs": [{"buffer": "total"}]}
                ]
            }"#,
        )
        .unwrap();
        let graph = AnalysisGraph::build(&config, &arena).unwrap();
        let id = |n: &str| arena.resolve(n).unwrap();
        assert_eq!(graph.input_buffers(), &[id("sensor"), id("scaled")]);
        assert_eq!(graph.output_buffers(), &[id("scaled"), id("total")]);
        assert_eq!(graph.pure_inputs(), &[id("sensor")]);
        assert_eq!(graph.modules()[0].name, "multiply0");
        assert_eq!(graph.modules()[1].kind, ModuleKind::Sum);
    }

    #[test]
    fn unknown_buffers_fail_fast() {
        let arena = arena(&["a"]);
        let mut config = SystemConfig::from_json_str(
            r#"{
                "buffers": [{"name": "a"}],
                "modules": [{"name": "copy", "type": "append",
                             "inputs": [{"buffer": "a"}], "outputs": [{"buffer": "a"}]}]
            }"#,
        )
        .unwrap();
        config.modules[0].inputs.push(InputConfig::Buffer {
            buffer: "missing".to_string(),
            role: None,
        });
        let err = AnalysisGraph::build(&config, &arena).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidModule { ref module, .. } if module == "copy"));

        config.modules[0].inputs.pop();
        config.analysis.dynamic_sleep = Some("nope".to_string());
        assert!(matches!(
            AnalysisGraph::build(&config, &arena),
            Err(PipelineError::BufferNotFound { .. })
        ));
    }
}
