//! # Flow
//! A flow is a named, composite unit of orchestration. Every step of a flow declares the data items it `requires` and
//! the ones it `provides`; a step depends on another when it requires something the other provides.
//!
//! ## Steps
//! * [FlowStep]: a leaf step, with the plugins that may be called to complete it.
//! * [Flow]: a nested flow, itself a step of its parent.
//! * [ReferenceFlowStep]: a placeholder naming another flow of a [catalog](crate::flow::catalog::FlowCatalog). It is
//!   replaced by that flow through [Flow::build_reference] before the steps can be ordered.
//!
//! ## Ordering
//! [Flow::sort_steps] orders the immediate steps of a flow so that every step comes after the steps it depends on.
//! Among independent steps, the one declared first comes first. A cycle is an error, never broken arbitrarily.

use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Formatter;
use std::str::FromStr;
use log::debug;
use serde::{Deserialize, Serialize};
use crate::flow::errors::FlowError;

pub mod catalog;
pub mod serializer;

/// How many times a step must or may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompletionType {
    /// Exactly once.
    #[default]
    Once,
    AtLeastOnce,
    ZeroOrMore,
    /// Zero or one time.
    Optional,
}

impl CompletionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionType::Once => "once",
            CompletionType::AtLeastOnce => "atLeastOnce",
            CompletionType::ZeroOrMore => "zeroOrMore",
            CompletionType::Optional => "optional",
        }
    }
}

impl fmt::Display for CompletionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive; `at_least_once`, `AtLeastOnce` and `atleastonce` all parse.
impl FromStr for CompletionType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "once" => Ok(CompletionType::Once),
            "atleastonce" => Ok(CompletionType::AtLeastOnce),
            "zeroormore" => Ok(CompletionType::ZeroOrMore),
            "optional" => Ok(CompletionType::Optional),
            _ => Err(FlowError::UnknownCompletionType(s.to_string())),
        }
    }
}

impl TryFrom<String> for CompletionType {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CompletionType> for String {
    fn from(value: CompletionType) -> Self {
        value.as_str().to_string()
    }
}

/// What every kind of step declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    pub goal: String,
    pub completion_type: CompletionType,
    pub starting_message: Option<String>,
    pub transition_message: Option<String>,
    requires: BTreeSet<String>,
    provides: BTreeSet<String>,
    passthrough: BTreeSet<String>,
    referenced_passthrough: BTreeSet<String>,
}

impl StepInfo {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    pub fn requires(&self) -> &BTreeSet<String> {
        &self.requires
    }

    pub fn provides(&self) -> &BTreeSet<String> {
        &self.provides
    }

    /// Passthrough arguments, both declared and received from a referenced flow.
    pub fn passthrough(&self) -> BTreeSet<String> {
        self.passthrough.union(&self.referenced_passthrough).cloned().collect()
    }

    /// Passthrough arguments received while hydrating a reference.
    pub fn referenced_passthrough(&self) -> &BTreeSet<String> {
        &self.referenced_passthrough
    }

    pub fn add_requires<S: Into<String>>(&mut self, requires: impl IntoIterator<Item=S>) {
        self.requires.extend(requires.into_iter().map(Into::into));
    }

    pub fn add_provides<S: Into<String>>(&mut self, provides: impl IntoIterator<Item=S>) {
        self.provides.extend(provides.into_iter().map(Into::into));
    }

    fn add_passthrough_unchecked<S: Into<String>>(&mut self, passthrough: impl IntoIterator<Item=S>) {
        self.passthrough.extend(passthrough.into_iter().map(Into::into));
    }

    pub(crate) fn add_referenced_passthrough<'a>(&mut self, passthrough: impl IntoIterator<Item=&'a String>) {
        self.referenced_passthrough.extend(passthrough.into_iter().cloned());
    }
}

/// Passthrough arguments must be among what the step requires.
fn check_passthrough<S: AsRef<str>>(goal: &str,
                                    requires: &BTreeSet<String>,
                                    passthrough: &[S]) -> Result<(), FlowError> {
    for argument in passthrough {
        let argument: &str = argument.as_ref();
        if !requires.contains(argument) {
            return Err(FlowError::InvalidPassthrough {
                step: goal.to_string(),
                argument: argument.to_string(),
            });
        }
    }
    Ok(())
}

/// A leaf step of a flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowStep {
    pub info: StepInfo,
    /// Plugins whose functions may be called to complete the step.
    pub plugins: Vec<String>,
}

impl FlowStep {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            info: StepInfo::new(goal),
            plugins: Vec::new(),
        }
    }

    pub fn with_requires<S: Into<String>>(mut self, requires: impl IntoIterator<Item=S>) -> Self {
        self.info.add_requires(requires);
        self
    }

    pub fn with_provides<S: Into<String>>(mut self, provides: impl IntoIterator<Item=S>) -> Self {
        self.info.add_provides(provides);
        self
    }

    pub fn with_completion_type(mut self, completion_type: CompletionType) -> Self {
        self.info.completion_type = completion_type;
        self
    }

    pub fn with_plugins<S: Into<String>>(mut self, plugins: impl IntoIterator<Item=S>) -> Self {
        self.plugins.extend(plugins.into_iter().map(Into::into));
        self
    }

    /// Fails if an argument is not required by the step.
    pub fn add_passthrough<S: AsRef<str>>(&mut self, passthrough: &[S]) -> Result<(), FlowError> {
        check_passthrough(&self.info.goal, &self.info.requires, passthrough)?;
        self.info.add_passthrough_unchecked(passthrough.iter().map(|p| p.as_ref().to_string()));
        Ok(())
    }
}

/// A placeholder for another flow, looked up by name during hydration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceFlowStep {
    pub flow_name: String,
    /// Completion type, messages and passthrough here override those of the referenced flow.
    pub info: StepInfo,
}

impl ReferenceFlowStep {
    pub fn new(flow_name: impl Into<String>) -> Self {
        Self {
            flow_name: flow_name.into(),
            info: StepInfo::default(),
        }
    }

    pub fn with_completion_type(mut self, completion_type: CompletionType) -> Self {
        self.info.completion_type = completion_type;
        self
    }

    /// Passthrough of a reference is forwarded to the referenced flow, so it is not checked here.
    pub fn with_passthrough<S: Into<String>>(mut self, passthrough: impl IntoIterator<Item=S>) -> Self {
        self.info.add_passthrough_unchecked(passthrough);
        self
    }

    /// Turn `referenced` into the step replacing this reference.
    pub(crate) fn hydrate(&self, mut referenced: Flow) -> Flow {
        referenced.info.completion_type = self.info.completion_type;
        if self.info.starting_message.is_some() {
            referenced.info.starting_message = self.info.starting_message.clone();
        }
        if self.info.transition_message.is_some() {
            referenced.info.transition_message = self.info.transition_message.clone();
        }

        let passthrough = self.info.passthrough();
        referenced.info.add_referenced_passthrough(&passthrough);
        for step in referenced.steps.iter_mut() {
            step.info_mut().add_referenced_passthrough(&passthrough);
        }
        referenced
    }
}

/// Any step of a flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Action(FlowStep),
    Reference(ReferenceFlowStep),
    Flow(Flow),
}

impl Step {
    pub fn info(&self) -> &StepInfo {
        match self {
            Step::Action(step) => &step.info,
            Step::Reference(step) => &step.info,
            Step::Flow(flow) => &flow.info,
        }
    }

    pub fn info_mut(&mut self) -> &mut StepInfo {
        match self {
            Step::Action(step) => &mut step.info,
            Step::Reference(step) => &mut step.info,
            Step::Flow(flow) => &mut flow.info,
        }
    }

    pub fn goal(&self) -> &str {
        &self.info().goal
    }

    pub fn completion_type(&self) -> CompletionType {
        self.info().completion_type
    }

    /// Requirements of the step. A nested flow also requires what its steps need and do not provide themselves.
    pub fn requires(&self) -> BTreeSet<String> {
        match self {
            Step::Flow(flow) => flow.requires(),
            other => other.info().requires.clone(),
        }
    }

    pub fn provides(&self) -> &BTreeSet<String> {
        &self.info().provides
    }

    /// Whether this step requires something `other` provides.
    pub fn depends_on(&self, other: &Step) -> bool {
        let provides = other.provides();
        self.requires().iter().any(|r| provides.contains(r))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Step::Reference(_))
    }
}

impl From<FlowStep> for Step {
    fn from(step: FlowStep) -> Self {
        Step::Action(step)
    }
}

impl From<ReferenceFlowStep> for Step {
    fn from(step: ReferenceFlowStep) -> Self {
        Step::Reference(step)
    }
}

impl From<Flow> for Step {
    fn from(flow: Flow) -> Self {
        Step::Flow(flow)
    }
}

/// A named composite step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flow {
    pub name: String,
    pub info: StepInfo,
    pub(crate) steps: Vec<Step>,
}

impl Flow {
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info: StepInfo::new(goal),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: impl Into<Step>) -> Self {
        self.add_step(step);
        self
    }

    pub fn with_provides<S: Into<String>>(mut self, provides: impl IntoIterator<Item=S>) -> Self {
        self.info.add_provides(provides);
        self
    }

    pub fn with_requires<S: Into<String>>(mut self, requires: impl IntoIterator<Item=S>) -> Self {
        self.info.add_requires(requires);
        self
    }

    pub fn with_completion_type(mut self, completion_type: CompletionType) -> Self {
        self.info.completion_type = completion_type;
        self
    }

    pub fn add_step(&mut self, step: impl Into<Step>) {
        self.steps.push(step.into());
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Declared requirements plus whatever the steps require and no step provides.
    pub fn requires(&self) -> BTreeSet<String> {
        let provided: BTreeSet<String> = self.steps.iter()
            .flat_map(|s| s.provides().iter().cloned())
            .collect();
        let mut requires = self.info.requires.clone();
        requires.extend(self.steps.iter()
            .flat_map(|s| s.requires())
            .filter(|r| !provided.contains(r)));
        requires
    }

    /// Declared outputs of the flow. Advisory, see [Flow::undeclared_provides].
    pub fn provides(&self) -> &BTreeSet<String> {
        &self.info.provides
    }

    /// Outputs of the steps that the flow does not declare.
    pub fn undeclared_provides(&self) -> BTreeSet<String> {
        self.steps.iter()
            .flat_map(|s| s.provides().iter())
            .filter(|p| !self.info.provides.contains(*p))
            .cloned()
            .collect()
    }

    /// Fails if an argument is not required by the flow.
    pub fn add_passthrough<S: AsRef<str>>(&mut self, passthrough: &[S]) -> Result<(), FlowError> {
        check_passthrough(&self.info.goal, &self.requires(), passthrough)?;
        self.info.add_passthrough_unchecked(passthrough.iter().map(|p| p.as_ref().to_string()));
        Ok(())
    }

    /// Order the immediate steps so that each comes after the steps it depends on.
    ///
    /// References must be hydrated first.
    pub fn sort_steps(&self) -> Result<Vec<&Step>, FlowError> {
        if let Some(Step::Reference(reference)) = self.steps.iter().find(|s| s.is_reference()) {
            return Err(FlowError::UnhydratedReference {
                flow: self.name.clone(),
                reference: reference.flow_name.clone(),
            });
        }

        let mut remaining: Vec<&Step> = self.steps.iter().collect();
        let mut sorted = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let independent = remaining.iter().position(|step| {
                !remaining.iter().any(|other| !std::ptr::eq(*step, *other) && step.depends_on(other))
            });
            let Some(index) = independent else {
                return Err(FlowError::CircularDependency {
                    flow: self.name.clone(),
                    steps: remaining.iter().map(|s| s.goal().to_string()).collect(),
                });
            };
            sorted.push(remaining.remove(index));
        }
        debug!("Sorted steps of flow {}: {:?}", self.name, sorted.iter().map(|s| s.goal()).collect::<Vec<_>>());
        Ok(sorted)
    }
}

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum FlowError {
        #[error("The flow '{flow}' contains circular dependencies among steps: {}", .steps.join(", "))]
        CircularDependency { flow: String, steps: Vec<String> },

        #[error("Referenced flow {flow_name} is not found")]
        ReferenceNotFound { flow_name: String },

        #[error("Flow '{flow}' still references flow '{reference}', build the references first")]
        UnhydratedReference { flow: String, reference: String },

        #[error("Passthrough argument '{argument}' of step '{step}' must be one of its requires")]
        InvalidPassthrough { step: String, argument: String },

        #[error("Unknown completion type '{0}'")]
        UnknownCompletionType(String),

        #[error("Flow '{0}' is already registered")]
        DuplicateFlow(String),

        #[error("{} flow(s) failed: {}", .0.len(), format_errors(.0))]
        Aggregate(Vec<FlowError>),

        #[error(transparent)]
        Yaml(#[from] serde_yaml::Error),

        #[error(transparent)]
        Json(#[from] serde_json::Error),
    }

    fn format_errors(errors: &[FlowError]) -> String {
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod test_flow {
    use super::errors::FlowError;
    use super::{CompletionType, Flow, FlowStep, ReferenceFlowStep, Step};

    fn goals(steps: &[&Step]) -> Vec<String> {
        steps.iter().map(|s| s.goal().to_string()).collect()
    }

    #[test]
    fn test_completion_type_parsing() {
        assert_eq!(CompletionType::AtLeastOnce, "atLeastOnce".parse::<CompletionType>().unwrap());
        assert_eq!(CompletionType::AtLeastOnce, "AtLeastOnce".parse::<CompletionType>().unwrap());
        assert_eq!(CompletionType::ZeroOrMore, "zero_or_more".parse::<CompletionType>().unwrap());
        assert_eq!(CompletionType::Optional, "OPTIONAL".parse::<CompletionType>().unwrap());
        assert!(matches!("twice".parse::<CompletionType>(), Err(FlowError::UnknownCompletionType(_))));
        assert_eq!("zeroOrMore", CompletionType::ZeroOrMore.to_string());
        assert_eq!(CompletionType::Once, CompletionType::default());
    }

    #[test]
    fn test_sort_by_dependencies() {
        let flow = Flow::new("flow", "goal")
            .with_step(FlowStep::new("Step3").with_requires(["a", "b"]))
            .with_step(FlowStep::new("Step2").with_requires(["a"]).with_provides(["b"]))
            .with_step(FlowStep::new("Step1").with_provides(["a"]));
        assert_eq!(vec!["Step1", "Step2", "Step3"], goals(&flow.sort_steps().unwrap()));
    }

    #[test]
    fn test_sort_keeps_declaration_order_of_independent_steps() {
        let flow = Flow::new("flow", "goal")
            .with_step(FlowStep::new("Step1").with_provides(["a"]))
            .with_step(FlowStep::new("Step2").with_requires(["a"]).with_provides(["b"]))
            .with_step(FlowStep::new("Step3").with_requires(["a", "b"]))
            .with_step(FlowStep::new("x"))
            .with_step(FlowStep::new("y").with_requires(["unrelated"]));
        assert_eq!(vec!["Step1", "Step2", "Step3", "x", "y"], goals(&flow.sort_steps().unwrap()));
    }

    #[test]
    fn test_sort_detects_cycles() {
        let flow = Flow::new("cyclic", "goal")
            .with_step(FlowStep::new("free"))
            .with_step(FlowStep::new("Step1").with_requires(["x"]).with_provides(["y"]))
            .with_step(FlowStep::new("Step2").with_requires(["y"]).with_provides(["x"]));
        match flow.sort_steps() {
            Err(FlowError::CircularDependency { flow, steps }) => {
                assert_eq!("cyclic", flow);
                assert_eq!(vec!["Step1", "Step2"], steps);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_step_requiring_its_own_output_is_not_a_cycle() {
        let flow = Flow::new("flow", "goal")
            .with_step(FlowStep::new("refine").with_requires(["draft"]).with_provides(["draft"]));
        assert_eq!(vec!["refine"], goals(&flow.sort_steps().unwrap()));
    }

    #[test]
    fn test_sort_rejects_unhydrated_references() {
        let flow = Flow::new("flow", "goal")
            .with_step(FlowStep::new("a"))
            .with_step(ReferenceFlowStep::new("other"));
        assert!(matches!(flow.sort_steps(), Err(FlowError::UnhydratedReference { reference, .. }) if reference == "other"));
    }

    #[test]
    fn test_nested_flow_requires_and_dependencies() {
        let nested = Flow::new("nested", "nested goal")
            .with_step(FlowStep::new("inner1").with_requires(["a"]).with_provides(["b"]))
            .with_step(FlowStep::new("inner2").with_requires(["b"]).with_provides(["c"]))
            .with_provides(["c"]);
        assert_eq!(vec!["a".to_string()], nested.requires().into_iter().collect::<Vec<_>>());
        assert!(nested.undeclared_provides().contains("b"));

        let flow = Flow::new("outer", "goal")
            .with_step(nested)
            .with_step(FlowStep::new("source").with_provides(["a"]));
        assert_eq!(vec!["source", "nested goal"], goals(&flow.sort_steps().unwrap()));
    }

    #[test]
    fn test_passthrough_must_be_required() {
        let mut step = FlowStep::new("step").with_requires(["a"]);
        assert!(step.add_passthrough(&["a"]).is_ok());
        assert!(matches!(
            step.add_passthrough(&["b"]),
            Err(FlowError::InvalidPassthrough { argument, .. }) if argument == "b"
        ));
        assert_eq!(1, step.info.passthrough().len());

        let mut flow = Flow::new("flow", "goal").with_step(FlowStep::new("s").with_requires(["x"]));
        assert!(flow.add_passthrough(&["x"]).is_ok());
        assert!(flow.add_passthrough(&["y"]).is_err());
    }

    #[test]
    fn test_error_messages() {
        let error = FlowError::Aggregate(vec![
            FlowError::ReferenceNotFound { flow_name: "a".to_string() },
            FlowError::DuplicateFlow("b".to_string()),
        ]);
        assert_eq!(
            "2 flow(s) failed: Referenced flow a is not found; Flow 'b' is already registered",
            error.to_string()
        );
    }
}
