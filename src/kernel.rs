//! # Kernel
//! The collaborators a template talks to when it calls functions.
//!
//! ## KernelArguments
//! The render context: a mapping from argument name to an arbitrary [serde_json::Value]. Keys are case-sensitive.
//! Cloning is cheap enough to be done once per function call, which is how calls stay free of side effects on the
//! caller's arguments.
//!
//! ## KernelFunction
//! Anything callable by name from a template. A function exposes [FunctionMetadata] so that a positional argument in
//! a template can be bound to its first declared parameter.
//!
//! ## Kernel
//! A collection of [KernelPlugin]s, each a named group of functions. The kernel is the default [FunctionRegistry].

use std::fmt;
use std::fmt::Formatter;
use std::future::Future;
use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use crate::utils::JsonMap;


/// Arguments of one render pass or one function call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelArguments {
    values: JsonMap,
}

impl KernelArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Insert or overwrite an argument. Returns the previous value if any.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=(&String, &Value)> {
        self.values.iter()
    }
}

impl From<JsonMap> for KernelArguments {
    fn from(values: JsonMap) -> Self {
        Self { values }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for KernelArguments {
    fn from_iter<T: IntoIterator<Item=(K, V)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
        }
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for KernelArguments {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// A declared parameter of a [KernelFunction].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_required: bool,
}

impl ParameterMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Name, description and ordered parameters of a [KernelFunction].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterMetadata>,
}

impl FunctionMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterMetadata) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// A function that can be called from a template.
#[async_trait]
pub trait KernelFunction: Send + Sync {
    fn metadata(&self) -> &FunctionMetadata;

    /// Invoke the function. Implementations doing I/O should observe `cancellation`.
    async fn invoke(&self, arguments: KernelArguments, cancellation: CancellationToken) -> Result<Value>;
}

type NativeBody = Box<dyn Fn(KernelArguments, CancellationToken) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A [KernelFunction] backed by a Rust closure returning a future.
pub struct NativeFunction {
    metadata: FunctionMetadata,
    body: NativeBody,
}

impl NativeFunction {
    pub fn new<F, Fut>(metadata: FunctionMetadata, body: F) -> Self
        where F: Fn(KernelArguments, CancellationToken) -> Fut + Send + Sync + 'static,
              Fut: Future<Output=Result<Value>> + Send + 'static {
        Self {
            metadata,
            body: Box::new(move |arguments, cancellation| body(arguments, cancellation).boxed()),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelFunction for NativeFunction {
    fn metadata(&self) -> &FunctionMetadata {
        &self.metadata
    }

    async fn invoke(&self, arguments: KernelArguments, cancellation: CancellationToken) -> Result<Value> {
        (self.body)(arguments, cancellation).await
    }
}

/// Looks functions up by plugin name and function name.
pub trait FunctionRegistry: Send + Sync {
    /// Without a plugin name, any plugin exposing `function_name` may answer.
    fn get_function(&self, plugin_name: Option<&str>, function_name: &str) -> Option<Arc<dyn KernelFunction>>;
}

/// A named group of functions.
#[derive(Clone)]
pub struct KernelPlugin {
    pub name: String,
    pub description: String,
    functions: Vec<Arc<dyn KernelFunction>>,
}

impl KernelPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            functions: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_function(mut self, function: impl KernelFunction + 'static) -> Self {
        self.add_function(Arc::new(function));
        self
    }

    /// Add a function, replacing any function of the same (case-insensitive) name.
    pub fn add_function(&mut self, function: Arc<dyn KernelFunction>) {
        let name = function.metadata().name.clone();
        self.functions.retain(|f| !f.metadata().name.eq_ignore_ascii_case(&name));
        self.functions.push(function);
    }

    pub fn get_function(&self, name: &str) -> Option<Arc<dyn KernelFunction>> {
        self.functions.iter()
            .find(|f| f.metadata().name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn functions(&self) -> impl Iterator<Item=&FunctionMetadata> {
        self.functions.iter().map(|f| f.metadata())
    }
}

impl fmt::Debug for KernelPlugin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelPlugin")
            .field("name", &self.name)
            .field("functions", &self.functions().map(|m| m.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

/// The default [FunctionRegistry]: plugins in registration order.
#[derive(Debug, Clone, Default)]
pub struct Kernel {
    plugins: Vec<KernelPlugin>,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: KernelPlugin) -> Self {
        self.add_plugin(plugin);
        self
    }

    /// Add a plugin, replacing any plugin of the same (case-insensitive) name.
    pub fn add_plugin(&mut self, plugin: KernelPlugin) {
        self.plugins.retain(|p| !p.name.eq_ignore_ascii_case(&plugin.name));
        self.plugins.push(plugin);
    }

    pub fn get_plugin(&self, name: &str) -> Option<&KernelPlugin> {
        self.plugins.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn plugins(&self) -> &[KernelPlugin] {
        &self.plugins
    }
}

impl FunctionRegistry for Kernel {
    fn get_function(&self, plugin_name: Option<&str>, function_name: &str) -> Option<Arc<dyn KernelFunction>> {
        match plugin_name {
            Some(plugin_name) => self.get_plugin(plugin_name)
                .and_then(|plugin| plugin.get_function(function_name)),
            None => self.plugins.iter()
                .find_map(|plugin| plugin.get_function(function_name)),
        }
    }
}

#[cfg(test)]
mod test_kernel {
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use super::{FunctionMetadata, FunctionRegistry, Kernel, KernelArguments, KernelPlugin, NativeFunction, ParameterMetadata};

    fn echo(name: &str) -> NativeFunction {
        let metadata = FunctionMetadata::new(name)
            .with_parameter(ParameterMetadata::new("input").required());
        let tag = name.to_string();
        NativeFunction::new(metadata, move |args, _| {
            let tag = tag.clone();
            async move {
                let input = args.get("input").cloned().unwrap_or(Value::Null);
                Ok(json!({ "by": tag, "input": input }))
            }
        })
    }

    #[test]
    fn test_arguments_are_case_sensitive() {
        let args = KernelArguments::from([("name", "alice")]);
        assert_eq!(Some(&json!("alice")), args.get("name"));
        assert_eq!(None, args.get("Name"));
        assert!(args.contains_name("name"));
        assert_eq!(1, args.len());
    }

    #[test]
    fn test_clone_does_not_touch_original() {
        let original = KernelArguments::from([("a", 1)]);
        let mut copy = original.clone();
        copy.insert("a", 2);
        copy.insert("b", 3);
        assert_eq!(Some(&json!(1)), original.get("a"));
        assert!(!original.contains_name("b"));
    }

    #[test]
    fn test_lookup() {
        let kernel = Kernel::new()
            .with_plugin(KernelPlugin::new("first").with_function(echo("shared")))
            .with_plugin(KernelPlugin::new("Second").with_function(echo("shared")).with_function(echo("only")));

        assert!(kernel.get_function(Some("second"), "ONLY").is_some());
        assert!(kernel.get_function(Some("first"), "only").is_none());
        assert!(kernel.get_function(None, "only").is_some());
        assert!(kernel.get_function(Some("missing"), "shared").is_none());
        assert!(kernel.get_function(None, "missing").is_none());
    }

    #[test]
    fn test_replace_plugin_with_same_name() {
        let kernel = Kernel::new()
            .with_plugin(KernelPlugin::new("p").with_function(echo("a")))
            .with_plugin(KernelPlugin::new("P").with_function(echo("b")));
        assert_eq!(1, kernel.plugins().len());
        assert!(kernel.get_function(Some("p"), "a").is_none());
        assert!(kernel.get_function(Some("p"), "b").is_some());
    }

    #[tokio::test]
    async fn test_native_function_invoke() {
        let kernel = Kernel::new().with_plugin(KernelPlugin::new("p").with_function(echo("f")));
        let function = kernel.get_function(Some("p"), "f").unwrap();
        let result = function
            .invoke(KernelArguments::from([("input", "hi")]), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(json!({"by": "f", "input": "hi"}), result);
        assert_eq!("input", function.metadata().parameters[0].name);
    }
}
