//! # Prompt
//! A prompt is simply a string, rendered from a [PromptTemplate].
//!
//! ## PromptTemplate
//! A prompt template is a string with code regions in the format of `{{ ... }}`. It is tokenized once into
//! [Block]s when constructed; syntax that can never be valid (an unclosed `{{`, an unclosed quote, a function name
//! with two dots) fails right there. The template is cheap to clone and can be rendered concurrently.
//!
//! Inside a code region you can write
//! * a variable, `{{$name}}`, replaced by the argument `name`, or by nothing if there is no such argument;
//! * a quoted value, `{{'text'}}`;
//! * a function call, `{{plugin.function $input option='value'}}`, replaced by what the function returns.
//!
//! ## PromptTemplateConfig
//! Metadata of a template: its name, description and input variables. Input variables with a default value fill
//! the gap when the caller does not supply them.
//!
//! ## Rendering
//! [PromptTemplate::render] walks the blocks in order. The only suspension point is a function call, which honors
//! the given [CancellationToken]. Any error discards the partial output.


use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use crate::blocks::{Block, NamedArgValue};
use crate::blocks::tokenizer::tokenize_template;
use crate::kernel::{FunctionRegistry, KernelArguments};
use crate::prompt::errors::{RenderError, TemplateError};
use crate::utils::string::value_to_text;


/// An input variable of a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputVariable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Used when the caller does not supply the variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub is_required: bool,
}

impl InputVariable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            default: None,
            is_required: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }
}

/// Configuration of a prompt template, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub template: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_variables: Vec<InputVariable>,
}

impl PromptTemplateConfig {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_variable(mut self, variable: InputVariable) -> Self {
        self.input_variables.push(variable);
        self
    }

    /// Add defaults for input variables missing from `arguments`. Borrows `arguments` when nothing is missing.
    pub fn add_default_values<'a>(&self, arguments: &'a KernelArguments) -> Cow<'a, KernelArguments> {
        let mut arguments = Cow::Borrowed(arguments);
        for variable in &self.input_variables {
            if let Some(default) = &variable.default {
                if !arguments.contains_name(&variable.name) {
                    arguments.to_mut().insert(variable.name.clone(), default.clone());
                }
            }
        }
        arguments
    }
}

/// A tokenized prompt template.
#[derive(Debug, Clone)]
#[readonly::make]
pub struct PromptTemplate {
    blocks: Arc<Vec<Block>>,

    /// Names of all variables the template refers to, readonly
    #[readonly]
    pub variables: HashSet<String>,

    /// The configuration the template was built from, readonly
    #[readonly]
    pub config: Arc<PromptTemplateConfig>,
}

impl PromptTemplate {
    /// Create a prompt template from a string without metadata.
    pub fn new(template: impl Into<String>) -> Result<Self, TemplateError> {
        Self::with_config(PromptTemplateConfig::new(template))
    }

    /// Create a prompt template from its configuration.
    pub fn with_config(config: PromptTemplateConfig) -> Result<Self, TemplateError> {
        let blocks = tokenize_template(&config.template)?;
        if !blocks.iter().any(|b| matches!(b, Block::Code(_))) {
            debug!("Prompt template has no code block, it renders as-is:\n{}", config.template);
        }
        let mut variables = HashSet::new();
        collect_variables(&blocks, &mut variables);
        Ok(Self {
            blocks: Arc::new(blocks),
            variables,
            config: Arc::new(config),
        })
    }

    /// Get the prompt template as a string.
    #[inline]
    pub fn str(&self) -> &str {
        &self.config.template
    }

    #[inline]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Check every block, reporting the first problem.
    pub fn validate(&self) -> Result<(), String> {
        self.blocks.iter().try_for_each(Block::validate)
    }

    /// Render the template into a prompt.
    ///
    /// `arguments` is never modified; defaults of input variables and function call arguments are applied to copies.
    pub async fn render(&self,
                        registry: &dyn FunctionRegistry,
                        arguments: &KernelArguments,
                        cancellation: &CancellationToken) -> Result<String, RenderError> {
        let arguments = self.config.add_default_values(arguments);
        let mut prompt = String::with_capacity(self.str().len());
        // the tokenizer only emits text and code at the top level
        for block in self.blocks.iter() {
            match block {
                Block::Code(code) => {
                    let value = code.render(registry, &arguments, cancellation).await?;
                    prompt.push_str(&value_to_text(&value));
                }
                other => prompt.push_str(other.content()),
            }
        }
        Ok(prompt)
    }
}

fn collect_variables(blocks: &[Block], variables: &mut HashSet<String>) {
    for block in blocks {
        match block {
            Block::Variable(v) => {
                variables.insert(v.name.clone());
            }
            Block::NamedArg(arg) => {
                if let NamedArgValue::Variable(v) = &arg.value {
                    variables.insert(v.name.clone());
                }
            }
            Block::Code(code) => collect_variables(&code.blocks, variables),
            Block::Text(_) | Block::Value(_) | Block::FunctionId(_) => {}
        }
    }
}

pub mod errors {
    use thiserror::Error;
    use crate::blocks::BlockKind;

    /// Error when a template can never be valid. Raised while tokenizing, never deferred.
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum TemplateError {
        #[error("Unterminated code block: '{{{{' at byte {position} has no matching '}}}}'")]
        UnterminatedCode { position: usize },

        #[error("Unterminated quote at byte {position}")]
        UnterminatedQuote { position: usize },

        #[error("A function name can contain at most one dot separating the plugin name from the function name, got '{content}'")]
        FunctionIdTooManyDots { content: String },

        #[error("A function named argument must contain a name and value separated by a '=' character.")]
        InvalidNamedArg { content: String },
    }

    impl TemplateError {
        /// Move byte positions by `offset`, for errors found in a substring.
        pub(crate) fn shifted(self, offset: usize) -> Self {
            match self {
                TemplateError::UnterminatedCode { position } => TemplateError::UnterminatedCode { position: position + offset },
                TemplateError::UnterminatedQuote { position } => TemplateError::UnterminatedQuote { position: position + offset },
                other => other,
            }
        }
    }

    /// Error when rendering fails. No partial output is produced.
    #[derive(Debug, Error)]
    pub enum RenderError {
        #[error("{message}")]
        InvalidBlock { message: String },

        #[error("Unexpected first token type: {kind}")]
        UnexpectedFirstToken { kind: BlockKind },

        #[error("Function {function} not found")]
        FunctionNotFound { function: String },

        #[error("Function {function} does not take any arguments but it is being called in the template with {argument_count} arguments.")]
        NoParameters { function: String, argument_count: usize },

        #[error("Ambiguity found as a named parameter '{name}' cannot be set for the first parameter when there is also a positional value: '{value}' provided. Function: {function}")]
        AmbiguousArgument { name: String, value: String, function: String },

        #[error("Rendering was cancelled")]
        Cancelled,

        /// The error of the invoked function, unchanged.
        #[error(transparent)]
        Invocation(anyhow::Error),
    }
}

#[cfg(test)]
mod test_prompt {
    use std::collections::HashSet;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use crate::kernel::{FunctionMetadata, Kernel, KernelArguments, KernelPlugin, NativeFunction, ParameterMetadata};
    use super::errors::{RenderError, TemplateError};
    use super::{InputVariable, PromptTemplate, PromptTemplateConfig};

    fn text_kernel() -> Kernel {
        let upper = NativeFunction::new(
            FunctionMetadata::new("upper").with_parameter(ParameterMetadata::new("input")),
            |args: KernelArguments, _| async move {
                let input = args.get("input").and_then(Value::as_str).unwrap_or_default();
                Ok(json!(input.to_uppercase()))
            },
        );
        let join = NativeFunction::new(
            FunctionMetadata::new("join")
                .with_parameter(ParameterMetadata::new("left"))
                .with_parameter(ParameterMetadata::new("right")),
            |args: KernelArguments, _| async move {
                let left = args.get("left").and_then(Value::as_str).unwrap_or_default().to_string();
                let right = args.get("right").and_then(Value::as_str).unwrap_or_default();
                Ok(json!(left + right))
            },
        );
        let count = NativeFunction::new(FunctionMetadata::new("count"), |_, _| async { Ok(json!([1, 2, 3])) });
        Kernel::new().with_plugin(
            KernelPlugin::new("text")
                .with_function(upper)
                .with_function(join)
                .with_function(count)
        )
    }

    async fn render(template: &str, args: &KernelArguments) -> Result<String, RenderError> {
        PromptTemplate::new(template)
            .unwrap()
            .render(&text_kernel(), args, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_render_text_only() {
        let args = KernelArguments::new();
        assert_eq!("no code here {{ }}", render("no code here {{ }}", &args).await.unwrap());
        assert_eq!("", render("", &args).await.unwrap());
    }

    #[tokio::test]
    async fn test_render_variables_and_values() {
        let args = KernelArguments::from([("name", json!("Alice")), ("age", json!(30))]);
        let prompt = render("Hi {{$name}} ({{ $age }}), {{'welcome'}}! {{$missing}}.", &args).await.unwrap();
        assert_eq!("Hi Alice (30), welcome! .", prompt);
    }

    #[tokio::test]
    async fn test_render_function_calls() {
        let args = KernelArguments::from([("name", "bob")]);
        let prompt = render(
            "{{text.upper $name}} {{join 'a' right=\"b\"}} {{text.join left=$name right='!'}} {{count}}",
            &args,
        ).await.unwrap();
        assert_eq!("BOB ab bob! [1,2,3]", prompt);
    }

    #[tokio::test]
    async fn test_render_error_discards_output() {
        let args = KernelArguments::new();
        let result = render("partial {{text.missing}}", &args).await;
        assert!(matches!(result, Err(RenderError::FunctionNotFound { .. })));
        let result = render("partial {{$a $b}}", &args).await;
        assert!(matches!(result, Err(RenderError::InvalidBlock { .. })));
    }

    #[tokio::test]
    async fn test_defaults_fill_missing_input_variables() {
        let config = PromptTemplateConfig::new("{{$greeting}}, {{$name}}")
            .with_input_variable(InputVariable::new("greeting").with_default("Hello"))
            .with_input_variable(InputVariable::new("name").with_default("stranger").required());
        let template = PromptTemplate::with_config(config).unwrap();
        let kernel = Kernel::new();
        let cancel = CancellationToken::new();

        let args = KernelArguments::from([("name", "Carol")]);
        assert_eq!("Hello, Carol", template.render(&kernel, &args, &cancel).await.unwrap());
        assert!(!args.contains_name("greeting"));
        assert_eq!("Hello, stranger", template.render(&kernel, &KernelArguments::new(), &cancel).await.unwrap());
    }

    #[test]
    fn test_config_from_json() {
        let config = PromptTemplateConfig::from_json(r#"{
            "name": "greet",
            "template": "Hello {{$name}}",
            "inputVariables": [{"name": "name", "default": "world", "isRequired": true}]
        }"#).unwrap();
        assert_eq!(Some("greet".to_string()), config.name);
        assert_eq!(Some(json!("world")), config.input_variables[0].default);
        assert!(config.input_variables[0].is_required);
        assert_eq!("Hello {{$name}}", PromptTemplate::with_config(config).unwrap().str());
    }

    #[test]
    fn test_variables_are_collected() {
        let template = PromptTemplate::new("{{$a}} {{f $b c=$d e='f'}}").unwrap();
        let expected: HashSet<String> = ["a", "b", "d"].into_iter().map(String::from).collect();
        assert_eq!(expected, template.variables);
    }

    #[test]
    fn test_parse_errors_fail_construction() {
        assert!(matches!(PromptTemplate::new("{{ a.b.c }}"), Err(TemplateError::FunctionIdTooManyDots { .. })));
        assert!(matches!(PromptTemplate::new("oops {{ $x"), Err(TemplateError::UnterminatedCode { position: 5 })));
    }

    #[test]
    fn test_validate_reports_first_problem() {
        let template = PromptTemplate::new("{{ f $a $b }} {{ x='y' }}").unwrap();
        assert_eq!(
            Err("Functions only support named arguments after the first argument. Argument 2 is not named.".to_string()),
            template.validate()
        );
        assert!(PromptTemplate::new("{{ f $a b=$c }}").unwrap().validate().is_ok());
    }

    #[test]
    fn test_template_error_messages() {
        assert_eq!(
            "Unterminated code block: '{{' at byte 3 has no matching '}}'",
            TemplateError::UnterminatedCode { position: 3 }.to_string()
        );
    }
}
