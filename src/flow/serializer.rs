//! YAML and JSON documents for [Flow]s.
//!
//! A document is read into a [FlowModel] and then converted into the domain types. Field names are camelCase when
//! written and matched case-insensitively when read, so `completionType`, `CompletionType` and `completion_type`
//! all name the same field. A step with a `flowName` is a reference, a step with a `steps` list (even an empty one) is
//! a nested flow and anything else is a leaf step.

use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::flow::{CompletionType, Flow, FlowStep, ReferenceFlowStep, Step, StepInfo};
use crate::flow::errors::FlowError;

const FIELDS: [&str; 11] = [
    "name",
    "goal",
    "requires",
    "provides",
    "passthrough",
    "completionType",
    "startingMessage",
    "transitionMessage",
    "plugins",
    "flowName",
    "steps",
];

/// The document form of a flow or of any of its steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowModel {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub goal: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub passthrough: Vec<String>,
    pub completion_type: CompletionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_name: Option<String>,
    /// Present for flows, absent for leaf steps and references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<FlowModel>>,
}

impl FlowModel {
    pub fn from_yaml(yaml: &str) -> Result<Self, FlowError> {
        let document: Value = serde_yaml::from_str(yaml)?;
        Self::from_document(document)
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let document: Value = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    fn from_document(document: Value) -> Result<Self, FlowError> {
        let normalized = normalize_keys(document);
        trace!("Normalized flow document: {}", normalized);
        Ok(serde_json::from_value(normalized)?)
    }

    fn into_step(mut self) -> Result<Step, FlowError> {
        if let Some(flow_name) = self.flow_name.take().filter(|n| !n.is_empty()) {
            let mut reference = ReferenceFlowStep::new(flow_name)
                .with_completion_type(self.completion_type)
                .with_passthrough(self.passthrough);
            reference.info.goal = self.goal;
            reference.info.starting_message = self.starting_message;
            reference.info.transition_message = self.transition_message;
            return Ok(Step::Reference(reference));
        }
        if self.steps.is_some() {
            return Ok(Step::Flow(self.into_flow()?));
        }

        let mut step = FlowStep::new(self.goal)
            .with_provides(self.provides)
            .with_requires(self.requires)
            .with_completion_type(self.completion_type)
            .with_plugins(self.plugins);
        step.add_passthrough(&self.passthrough)?;
        step.info.starting_message = self.starting_message;
        step.info.transition_message = self.transition_message;
        Ok(Step::Action(step))
    }

    /// Steps first, so that passthrough is checked against requirements gathered from them.
    pub fn into_flow(self) -> Result<Flow, FlowError> {
        let mut flow = Flow::new(self.name, self.goal)
            .with_provides(self.provides)
            .with_requires(self.requires)
            .with_completion_type(self.completion_type);
        flow.info.starting_message = self.starting_message;
        flow.info.transition_message = self.transition_message;
        for step in self.steps.unwrap_or_default() {
            flow.add_step(step.into_step()?);
        }
        flow.add_passthrough(&self.passthrough)?;
        Ok(flow)
    }

    fn with_info(mut self, info: &StepInfo) -> Self {
        self.goal = info.goal.clone();
        self.requires = info.requires().iter().cloned().collect();
        self.provides = info.provides().iter().cloned().collect();
        // Passthrough received from a referenced flow is rebuilt by hydration.
        self.passthrough = info.passthrough.iter().cloned().collect();
        self.completion_type = info.completion_type;
        self.starting_message = info.starting_message.clone();
        self.transition_message = info.transition_message.clone();
        self
    }
}

impl From<&Flow> for FlowModel {
    fn from(flow: &Flow) -> Self {
        FlowModel {
            name: flow.name.clone(),
            steps: Some(flow.steps().iter().map(FlowModel::from).collect()),
            ..Default::default()
        }.with_info(&flow.info)
    }
}

impl From<&Step> for FlowModel {
    fn from(step: &Step) -> Self {
        match step {
            Step::Action(step) => FlowModel {
                plugins: step.plugins.clone(),
                ..Default::default()
            }.with_info(&step.info),
            Step::Reference(reference) => FlowModel {
                flow_name: Some(reference.flow_name.clone()),
                ..Default::default()
            }.with_info(&reference.info),
            Step::Flow(flow) => FlowModel::from(flow),
        }
    }
}

impl TryFrom<FlowModel> for Flow {
    type Error = FlowError;

    fn try_from(model: FlowModel) -> Result<Self, Self::Error> {
        model.into_flow()
    }
}

impl Flow {
    pub fn from_yaml(yaml: &str) -> Result<Flow, FlowError> {
        FlowModel::from_yaml(yaml)?.into_flow()
    }

    pub fn from_json(json: &str) -> Result<Flow, FlowError> {
        FlowModel::from_json(json)?.into_flow()
    }

    pub fn to_yaml(&self) -> Result<String, FlowError> {
        Ok(serde_yaml::to_string(&FlowModel::from(self))?)
    }

    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(&FlowModel::from(self))?)
    }
}

/// Rename keys to their canonical camelCase spelling, recursing into `steps`. Null values are dropped so that the
/// field takes its default.
fn normalize_keys(document: Value) -> Value {
    match document {
        Value::Object(map) => Value::Object(map.into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(key, value)| {
                let key = canonical_key(&key).map(str::to_string).unwrap_or(key);
                let value = if key == "steps" { normalize_steps(value) } else { value };
                (key, value)
            })
            .collect()),
        other => other,
    }
}

fn normalize_steps(steps: Value) -> Value {
    match steps {
        Value::Array(steps) => Value::Array(steps.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn canonical_key(key: &str) -> Option<&'static str> {
    let folded: String = key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();
    FIELDS.iter()
        .find(|field| field.to_ascii_lowercase() == folded)
        .copied()
}

#[cfg(test)]
mod test_serializer {
    use crate::flow::{CompletionType, Flow, FlowStep, Step};
    use crate::flow::errors::FlowError;
    use super::{canonical_key, FlowModel};

    const BREAKFAST: &str = r#"
name: breakfast_flow
goal: Make breakfast
provides:
  - breakfast
steps:
  - goal: Make coffee
    plugins:
      - CoffeeMakerPlugin
    requires:
      - coffee_bean
    provides:
      - coffee
    passthrough:
      - coffee_bean
  - goal: Recipe
    plugins:
      - WebSearchPlugin
      - CalendarPlugin
    provides:
      - ingredients
    completionType: AtLeastOnce
    transitionMessage: Do you want another recipe?
  - flowName: lunch_flow
    completionType: optional
    startingMessage: Would you like lunch too?
  - goal: Buy ingredients
    plugins:
      - ShoppingPlugin
    requires:
      - ingredients
    provides:
      - groceries
  - goal: Cook
    Requires:
      - groceries
      - coffee
    Provides:
      - breakfast
    completion_type: once
"#;

    #[test]
    fn test_deserialize_breakfast() {
        let flow = Flow::from_yaml(BREAKFAST).unwrap();
        assert_eq!("breakfast_flow", flow.name);
        assert_eq!("Make breakfast", flow.info.goal);
        assert_eq!(5, flow.steps().len());
        assert!(flow.provides().contains("breakfast"));

        let Step::Action(coffee) = &flow.steps()[0] else { panic!("expected an action step") };
        assert_eq!("Make coffee", coffee.info.goal);
        assert_eq!(vec!["CoffeeMakerPlugin"], coffee.plugins);
        assert!(coffee.info.passthrough().contains("coffee_bean"));

        let recipe = &flow.steps()[1];
        assert_eq!(CompletionType::AtLeastOnce, recipe.completion_type());
        assert_eq!(Some("Do you want another recipe?"), recipe.info().transition_message.as_deref());

        let Step::Reference(lunch) = &flow.steps()[2] else { panic!("expected a reference step") };
        assert_eq!("lunch_flow", lunch.flow_name);
        assert_eq!(CompletionType::Optional, lunch.info.completion_type);

        let cook = &flow.steps()[4];
        assert_eq!(2, cook.requires().len());
        assert_eq!(CompletionType::Once, cook.completion_type());
        assert!(flow.requires().contains("coffee_bean"));
    }

    #[test]
    fn test_json_with_nested_flow() {
        let json = r#"{
            "Name": "outer",
            "goal": "outer goal",
            "steps": [
                {"goal": "source", "provides": ["a"]},
                {"name": "inner", "goal": "inner goal", "steps": [
                    {"goal": "leaf", "requires": ["a"], "provides": ["b"]}
                ], "passthrough": ["a"]}
            ]
        }"#;
        let flow = Flow::from_json(json).unwrap();
        assert_eq!("outer", flow.name);
        let Step::Flow(inner) = &flow.steps()[1] else { panic!("expected a nested flow") };
        assert_eq!("inner", inner.name);
        assert!(inner.info.passthrough().contains("a"));
        assert_eq!(
            vec!["source", "inner goal"],
            flow.sort_steps().unwrap().iter().map(|s| s.goal()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_invalid_passthrough_is_rejected() {
        let yaml = "name: f\ngoal: g\nsteps:\n  - goal: s\n    requires: [a]\n    passthrough: [b]\n";
        assert!(matches!(Flow::from_yaml(yaml), Err(FlowError::InvalidPassthrough { argument, .. }) if argument == "b"));
    }

    #[test]
    fn test_unknown_completion_type_is_rejected() {
        let json = r#"{"name": "f", "goal": "g", "completionType": "twice"}"#;
        assert!(matches!(Flow::from_json(json), Err(FlowError::Json(_))));
    }

    #[test]
    fn test_malformed_documents_fail() {
        assert!(matches!(Flow::from_yaml("name: [unclosed"), Err(FlowError::Yaml(_))));
        assert!(matches!(Flow::from_json("{"), Err(FlowError::Json(_))));
    }

    #[test]
    fn test_yaml_round_trip_preserves_structure() {
        let flow = Flow::from_yaml(BREAKFAST).unwrap();
        let yaml = flow.to_yaml().unwrap();
        assert!(yaml.contains("completionType: atLeastOnce"));
        assert!(yaml.contains("flowName: lunch_flow"));
        assert_eq!(flow, Flow::from_yaml(&yaml).unwrap());
    }

    #[test]
    fn test_nested_flow_without_steps_stays_a_flow() {
        let flow = Flow::new("outer", "goal")
            .with_step(Flow::new("empty", "nothing to do"))
            .with_step(FlowStep::new("leaf"));
        let yaml = flow.to_yaml().unwrap();
        let read = Flow::from_yaml(&yaml).unwrap();
        assert_eq!(flow, read);
        assert!(matches!(&read.steps()[0], Step::Flow(nested) if nested.name == "empty"));
        assert!(matches!(&read.steps()[1], Step::Action(_)));

        let read = Flow::from_json(r#"{"name": "f", "goal": "g", "steps": [{"name": "n", "goal": "x", "steps": []}]}"#).unwrap();
        assert!(matches!(&read.steps()[0], Step::Flow(_)));
    }

    #[test]
    fn test_json_output_is_camel_case() {
        let flow = Flow::new("f", "g")
            .with_step(FlowStep::new("s").with_provides(["x"]).with_completion_type(CompletionType::ZeroOrMore));
        let json = flow.to_json().unwrap();
        assert!(json.contains("\"completionType\": \"zeroOrMore\""));
        assert!(!json.contains("flowName"));
        let model: FlowModel = serde_json::from_str(&json).unwrap();
        assert_eq!(1, model.steps.map_or(0, |steps| steps.len()));
    }

    #[test]
    fn test_canonical_keys() {
        assert_eq!(Some("completionType"), canonical_key("completion_type"));
        assert_eq!(Some("flowName"), canonical_key("FLOWNAME"));
        assert_eq!(Some("startingMessage"), canonical_key("starting-message"));
        assert_eq!(None, canonical_key("unknown"));
    }
}
