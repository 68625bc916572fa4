//! Named flows and the hydration of flow references.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use async_trait::async_trait;
use log::{debug, info, warn};
use crate::flow::{Flow, Step};
use crate::flow::errors::FlowError;

/// A source of flows by name.
#[async_trait]
pub trait FlowCatalog: Send + Sync {
    async fn get_flows(&self) -> Vec<Flow>;

    async fn get_flow(&self, flow_name: &str) -> Option<Flow>;

    /// Returns `false` if a flow with the same name is already registered.
    async fn register_flow(&self, flow: Flow) -> bool;
}

impl Flow {
    /// A copy of this flow where every immediate reference step is replaced by the flow it names.
    ///
    /// The referenced flow takes the completion type of the reference, and its messages when the reference sets them.
    /// The passthrough of the reference is given to the referenced flow and to each of its steps. Only one level is
    /// resolved: references inside the referenced flow are left as they are in `catalog`.
    pub async fn build_reference(&self, catalog: &dyn FlowCatalog) -> Result<Flow, FlowError> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match step {
                Step::Reference(reference) => {
                    let referenced = catalog.get_flow(&reference.flow_name).await
                        .ok_or_else(|| FlowError::ReferenceNotFound { flow_name: reference.flow_name.clone() })?;
                    debug!("Flow {} references flow {}", self.name, reference.flow_name);
                    steps.push(Step::Flow(reference.hydrate(referenced)));
                }
                other => steps.push(other.clone()),
            }
        }
        Ok(Flow {
            name: self.name.clone(),
            info: self.info.clone(),
            steps,
        })
    }
}

/// Flows kept in memory, keyed by name.
#[derive(Debug, Default)]
pub struct InMemoryFlowCatalog {
    flows: RwLock<HashMap<String, Flow>>,
}

impl InMemoryFlowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all `flows`, then hydrate each of them against the registered set.
    ///
    /// Flows may reference each other in any order. Every duplicate name and failed hydration is reported together.
    pub async fn with_flows(flows: impl IntoIterator<Item=Flow>) -> Result<Self, FlowError> {
        let catalog = Self::new();
        let mut errors = Vec::new();
        let mut names = Vec::new();
        for flow in flows {
            let name = flow.name.clone();
            if catalog.insert(flow) {
                names.push(name);
            } else {
                errors.push(FlowError::DuplicateFlow(name));
            }
        }

        let mut hydrated = Vec::with_capacity(names.len());
        for name in &names {
            let Some(flow) = catalog.get(name) else { continue };
            match flow.build_reference(&catalog).await {
                Ok(flow) => hydrated.push(flow),
                Err(e) => {
                    warn!("Failed to build references of flow {}: {}", name, e);
                    errors.push(e);
                }
            }
        }
        if !errors.is_empty() {
            return Err(FlowError::Aggregate(errors));
        }

        let mut registered = catalog.flows.write().unwrap_or_else(PoisonError::into_inner);
        for flow in hydrated {
            registered.insert(flow.name.clone(), flow);
        }
        drop(registered);
        info!("Loaded {} flows into catalog", names.len());
        Ok(catalog)
    }

    fn get(&self, flow_name: &str) -> Option<Flow> {
        self.flows.read().unwrap_or_else(PoisonError::into_inner).get(flow_name).cloned()
    }

    fn insert(&self, flow: Flow) -> bool {
        let mut flows = self.flows.write().unwrap_or_else(PoisonError::into_inner);
        if flows.contains_key(&flow.name) {
            return false;
        }
        flows.insert(flow.name.clone(), flow);
        true
    }
}

#[async_trait]
impl FlowCatalog for InMemoryFlowCatalog {
    async fn get_flows(&self) -> Vec<Flow> {
        self.flows.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    async fn get_flow(&self, flow_name: &str) -> Option<Flow> {
        self.get(flow_name)
    }

    async fn register_flow(&self, flow: Flow) -> bool {
        self.insert(flow)
    }
}
