//! # Blocks
//! A template is parsed once into a flat list of [Block]s. Blocks never change after construction, so one parsed
//! template can be rendered by many concurrent callers.
//!
//! Outside of `{{ }}` everything is a [TextBlock]. Inside, the [tokenizer] produces a [CodeBlock] whose children are
//! quoted values ([ValBlock]), variables ([VarBlock]), named arguments ([NamedArgBlock]) and function names
//! ([FunctionIdBlock]).
//!
//! ## Validity
//! A few mistakes can never be fixed and fail at construction with a [TemplateError]. Everything else is checked
//! by [Block::validate], which reports a human-readable message instead of failing. Rendering validates first.

use std::fmt;
use std::fmt::Formatter;
use log::warn;
use serde_json::Value;
use crate::kernel::KernelArguments;
use crate::prompt::errors::TemplateError;
use crate::utils::string::{is_quote, is_quoted, is_valid_function_id, is_valid_name, strip_quotes, NAMED_ARG_SEPARATOR, NAMESPACE_SEPARATOR, VAR_PREFIX};

pub mod code;
pub mod tokenizer;

pub use code::CodeBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Text,
    Value,
    Variable,
    NamedArg,
    FunctionId,
    Code,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::Text => "Text",
            BlockKind::Value => "Value",
            BlockKind::Variable => "Variable",
            BlockKind::NamedArg => "NamedArg",
            BlockKind::FunctionId => "FunctionId",
            BlockKind::Code => "Code",
        };
        f.write_str(name)
    }
}

/// One classified unit of template syntax.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(TextBlock),
    Value(ValBlock),
    Variable(VarBlock),
    NamedArg(NamedArgBlock),
    FunctionId(FunctionIdBlock),
    Code(CodeBlock),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Text(_) => BlockKind::Text,
            Block::Value(_) => BlockKind::Value,
            Block::Variable(_) => BlockKind::Variable,
            Block::NamedArg(_) => BlockKind::NamedArg,
            Block::FunctionId(_) => BlockKind::FunctionId,
            Block::Code(_) => BlockKind::Code,
        }
    }

    /// The trimmed source text of the block. Text blocks keep their text verbatim.
    pub fn content(&self) -> &str {
        match self {
            Block::Text(b) => &b.content,
            Block::Value(b) => &b.content,
            Block::Variable(b) => &b.content,
            Block::NamedArg(b) => &b.content,
            Block::FunctionId(b) => &b.content,
            Block::Code(b) => &b.content,
        }
    }

    /// Check the block and report the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Block::Text(_) => Ok(()),
            Block::Value(b) => b.validate(),
            Block::Variable(b) => b.validate(),
            Block::NamedArg(b) => b.validate(),
            Block::FunctionId(b) => b.validate(),
            Block::Code(b) => b.validate(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Render blocks that need no function call. `None` for function ids and code blocks.
    pub fn render_value(&self, arguments: &KernelArguments) -> Option<Value> {
        match self {
            Block::Text(b) => Some(Value::String(b.content.clone())),
            Block::Value(b) => Some(b.render()),
            Block::Variable(b) => Some(b.render(arguments)),
            Block::NamedArg(b) => Some(b.value(arguments)),
            Block::FunctionId(_) | Block::Code(_) => None,
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.content())
    }
}

/// Literal text outside of `{{ }}`.
#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct TextBlock {
    pub content: String,
}

impl TextBlock {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

/// A quoted literal, `'value'` or `"value"`.
#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct ValBlock {
    pub content: String,
    /// The content without its quotes, or the content itself if it is not quoted.
    pub value: String,
}

impl ValBlock {
    pub fn new(content: impl AsRef<str>) -> Self {
        let content = content.as_ref().trim().to_string();
        let value = strip_quotes(&content).to_string();
        Self { content, value }
    }

    pub fn validate(&self) -> Result<(), String> {
        if is_quoted(&self.content) {
            Ok(())
        } else {
            Err("A value must have single quotes or double quotes on both sides".to_string())
        }
    }

    pub fn render(&self) -> Value {
        Value::String(self.value.clone())
    }
}

/// A variable reference, `$name`.
#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct VarBlock {
    pub content: String,
    /// The name without the `$` prefix.
    pub name: String,
}

impl VarBlock {
    pub fn new(content: impl AsRef<str>) -> Self {
        let content = content.as_ref().trim().to_string();
        let mut chars = content.chars();
        let name = match chars.next() {
            Some(_) => chars.as_str().to_string(),
            None => String::new(),
        };
        Self { content, name }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.content.is_empty() {
            return Err(format!("A variable must start with the symbol {} and have a name", VAR_PREFIX));
        }
        if !self.content.starts_with(VAR_PREFIX) {
            return Err(format!("A variable must start with the symbol {}", VAR_PREFIX));
        }
        if self.name.is_empty() {
            return Err("The variable name is empty".to_string());
        }
        if !is_valid_name(&self.name) {
            return Err(format!("The variable name '{}' contains invalid characters. \
            Only alphanumeric chars and underscore are allowed.", self.name));
        }
        Ok(())
    }

    /// Look the variable up. A missing variable renders as `Null` and is only warned about.
    pub fn render(&self, arguments: &KernelArguments) -> Value {
        match arguments.get(&self.name) {
            Some(value) => value.clone(),
            None => {
                warn!("Variable `{}{}` not found", VAR_PREFIX, self.name);
                Value::Null
            }
        }
    }
}

/// The value side of a named argument.
#[derive(Debug, Clone, PartialEq)]
pub enum NamedArgValue {
    Literal(ValBlock),
    Variable(VarBlock),
}

/// A named argument of a function call, `name='value'` or `name=$variable`.
#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct NamedArgBlock {
    /// Normalized as `name=value`, without spaces around `=`.
    pub content: String,
    pub name: String,
    pub value: NamedArgValue,
}

impl NamedArgBlock {
    pub fn new(text: impl AsRef<str>) -> Result<Self, TemplateError> {
        let text = text.as_ref().trim();
        let (name, raw_value) = split_named_arg(text)
            .ok_or_else(|| TemplateError::InvalidNamedArg { content: text.to_string() })?;
        let value = if raw_value.starts_with(VAR_PREFIX) {
            NamedArgValue::Variable(VarBlock::new(raw_value))
        } else {
            NamedArgValue::Literal(ValBlock::new(raw_value))
        };
        Ok(Self {
            content: format!("{}{}{}", name, NAMED_ARG_SEPARATOR, raw_value),
            name: name.to_string(),
            value,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_name(&self.name) {
            return Err(format!("The argument name '{}' contains invalid characters. \
            Only alphanumeric chars and underscore are allowed.", self.name));
        }
        let checked = match &self.value {
            NamedArgValue::Literal(v) => v.validate(),
            NamedArgValue::Variable(v) => v.validate(),
        };
        checked.map_err(|e| format!("There was an issue with the named argument value for '{}': {}", self.name, e))
    }

    /// Resolve the value, looking variables up in `arguments`.
    pub fn value(&self, arguments: &KernelArguments) -> Value {
        match &self.value {
            NamedArgValue::Literal(v) => v.render(),
            NamedArgValue::Variable(v) => v.render(arguments),
        }
    }
}

/// Split `name=value` at the one separator. A quoted value may contain `=`, nothing else may.
fn split_named_arg(text: &str) -> Option<(&str, &str)> {
    let (name, value) = text.split_once(NAMED_ARG_SEPARATOR)?;
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() || value.is_empty() {
        return None;
    }
    let quoted = value.chars().next().is_some_and(is_quote);
    if !quoted && value.contains(NAMED_ARG_SEPARATOR) {
        return None;
    }
    Some((name, value))
}

/// A function name, optionally qualified by its plugin, `plugin.function`.
#[derive(Debug, Clone, PartialEq)]
#[readonly::make]
pub struct FunctionIdBlock {
    pub content: String,
    pub plugin_name: Option<String>,
    pub function_name: String,
}

impl FunctionIdBlock {
    pub fn new(text: impl AsRef<str>) -> Result<Self, TemplateError> {
        let content = text.as_ref().trim().to_string();
        let parts: Vec<&str> = content.split(NAMESPACE_SEPARATOR).collect();
        let (plugin_name, function_name) = match parts.as_slice() {
            [function] => (None, function.to_string()),
            [plugin, function] => (Some(plugin.to_string()), function.to_string()),
            _ => return Err(TemplateError::FunctionIdTooManyDots { content }),
        };
        Ok(Self { content, plugin_name, function_name })
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_function_id(&self.content) {
            return Err(format!("The function identifier '{}' contains invalid characters. \
            Only alphanumeric chars, underscore and a single dot are allowed.", self.content));
        }
        Ok(())
    }

    /// `plugin.function`, or only the function name.
    pub fn qualified_name(&self) -> String {
        match &self.plugin_name {
            Some(plugin) => format!("{}{}{}", plugin, NAMESPACE_SEPARATOR, self.function_name),
            None => self.function_name.clone(),
        }
    }
}
