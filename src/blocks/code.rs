//! The `{{ ... }}` block: either a single value/variable, or a function call with its arguments.
//!
//! A function call has the shape `{{plugin.function first_arg name1=... name2=...}}`. The optional first argument
//! may be positional, and binds to the function's first declared parameter. Every other argument must be named.

use log::{error, trace};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use crate::blocks::{Block, BlockKind, FunctionIdBlock};
use crate::blocks::tokenizer::tokenize_code;
use crate::kernel::{FunctionMetadata, FunctionRegistry, KernelArguments};
use crate::prompt::errors::{RenderError, TemplateError};
use crate::utils::string::value_to_text;


#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct CodeBlock {
    pub content: String,
    pub blocks: Vec<Block>,
}

impl CodeBlock {
    pub fn new(blocks: Vec<Block>, content: impl AsRef<str>) -> Self {
        Self {
            content: content.as_ref().trim().to_string(),
            blocks,
        }
    }

    /// Tokenize the inside of a `{{ }}` region.
    pub fn parse(content: impl AsRef<str>) -> Result<Self, TemplateError> {
        let content = content.as_ref();
        Ok(Self::new(tokenize_code(content)?, content))
    }

    /// Check every child, then the shape of the call. The first problem wins.
    pub fn validate(&self) -> Result<(), String> {
        for block in &self.blocks {
            block.validate()?;
        }

        match self.blocks.as_slice() {
            [] => Err("A code block must contain at least one token".to_string()),
            [Block::NamedArg(_), ..] => Err("Unexpected named argument found. Expected function name first.".to_string()),
            [_] => Ok(()),
            [first, second, rest @ ..] => {
                if first.kind() != BlockKind::FunctionId {
                    return Err(format!("Unexpected second token found: {}", second.content()));
                }
                if !matches!(second.kind(), BlockKind::Value | BlockKind::Variable | BlockKind::NamedArg) {
                    return Err("The first arg of a function must be a quoted string, variable or named argument".to_string());
                }
                match rest.iter().position(|b| b.kind() != BlockKind::NamedArg) {
                    Some(index) => Err(format!("Functions only support named arguments after the first argument. \
                    Argument {} is not named.", index + 2)),
                    None => Ok(()),
                }
            }
        }
    }

    /// Render the block against `arguments`.
    ///
    /// A single value or variable renders directly. A function call is looked up in `registry` and invoked with a
    /// copy of `arguments` enriched with the call's own arguments; `arguments` itself is never modified.
    /// `cancellation` is honored before and during the invocation.
    pub async fn render(&self,
                        registry: &dyn FunctionRegistry,
                        arguments: &KernelArguments,
                        cancellation: &CancellationToken) -> Result<Value, RenderError> {
        if let Err(message) = self.validate() {
            error!("{}", message);
            return Err(RenderError::InvalidBlock { message });
        }
        trace!("Rendering code: `{}`", self.content);

        match &self.blocks[0] {
            Block::Value(value) => Ok(value.render()),
            Block::Variable(variable) => Ok(variable.render(arguments)),
            Block::FunctionId(function_id) => self.render_function_call(function_id, registry, arguments, cancellation).await,
            other => Err(RenderError::UnexpectedFirstToken { kind: other.kind() }),
        }
    }

    async fn render_function_call(&self,
                                  function_id: &FunctionIdBlock,
                                  registry: &dyn FunctionRegistry,
                                  arguments: &KernelArguments,
                                  cancellation: &CancellationToken) -> Result<Value, RenderError> {
        let function_name = function_id.qualified_name();
        let function = registry
            .get_function(function_id.plugin_name.as_deref(), &function_id.function_name)
            .ok_or_else(|| RenderError::FunctionNotFound { function: function_name.clone() })?;

        let mut call_arguments = arguments.clone();
        if self.blocks.len() > 1 {
            self.enrich_function_arguments(&function_name, function.metadata(), &mut call_arguments)?;
        }

        if cancellation.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(RenderError::Cancelled),
            result = function.invoke(call_arguments, cancellation.clone()) => result,
        };

        result.map_err(|e| {
            error!("Function {} execution failed with error {}", function_name, e);
            RenderError::Invocation(e)
        })
    }

    /// Bind the positional argument to the first declared parameter, then every named argument by name.
    fn enrich_function_arguments(&self,
                                 function_name: &str,
                                 metadata: &FunctionMetadata,
                                 arguments: &mut KernelArguments) -> Result<(), RenderError> {
        let first_arg = &self.blocks[1];
        // Argument values may be sensitive, hence trace
        trace!("Passing variable/value: `{}`", first_arg.content());

        let Some(first_parameter) = metadata.parameters.first() else {
            return Err(RenderError::NoParameters {
                function: function_name.to_string(),
                argument_count: self.blocks.len() - 1,
            });
        };

        let mut positional: Option<(&str, Value)> = None;
        let mut named_args_start = 1;
        if first_arg.kind() != BlockKind::NamedArg {
            let value = first_arg.render_value(arguments).unwrap_or(Value::Null);
            arguments.insert(first_parameter.name.clone(), value.clone());
            positional = Some((first_parameter.name.as_str(), value));
            named_args_start = 2;
        }

        // validation leaves only named arguments here
        let named_args = self.blocks[named_args_start..].iter().filter_map(|block| match block {
            Block::NamedArg(arg) => Some(arg),
            _ => None,
        });
        for arg in named_args {
            trace!("Passing variable/value: `{}`", arg.content);

            if let Some((parameter, value)) = &positional {
                if parameter.eq_ignore_ascii_case(&arg.name) {
                    return Err(RenderError::AmbiguousArgument {
                        name: arg.name.clone(),
                        value: value_to_text(value).into_owned(),
                        function: function_name.to_string(),
                    });
                }
            }

            let value = arg.value(arguments);
            arguments.insert(arg.name.clone(), value);
        }
        Ok(())
    }
}
