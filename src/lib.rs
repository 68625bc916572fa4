//! # flowprompt
//!
//! Prompt templates with embedded function calls, and flows of steps ordered by the data they exchange.
//!
//! ## Usage
//! `flowprompt` is not released on crates.io. To use it, add a path or git dependency in `Cargo.toml`
//! ```toml
//! flowprompt = { path = "../flowprompt" }
//! ```
//!
//! ## Concepts
//!
//! ### Prompt Template
//!
//! A template is plain text with code regions, for example
//!
//! ```text
//! You are a helpful assistant. The weather in {{$city}} is {{weather.today city=$city}}.
//! ```
//!
//! A [`PromptTemplate`](crate::prompt::PromptTemplate) is tokenized into [blocks](crate::blocks) when it is built, and
//! is rendered against [`KernelArguments`](crate::kernel::KernelArguments). Function calls are dispatched through a
//! [`FunctionRegistry`](crate::kernel::FunctionRegistry), usually a [`Kernel`](crate::kernel::Kernel).
//!
//! ### Flow
//!
//! A [`Flow`](crate::flow::Flow) is a goal broken down into steps. Steps declare what they `requires` and `provides`,
//! and [`Flow::sort_steps`](crate::flow::Flow::sort_steps) puts every step after the ones it depends on.
//!
//! A flow may name another flow instead of spelling out its steps. Such references are resolved against a
//! [`FlowCatalog`](crate::flow::catalog::FlowCatalog). Flows are usually written in YAML, see
//! [serializer](crate::flow::serializer).
//!
//! ## Logging
//! `flowprompt` logs through the [log](https://docs.rs/log) facade. Install any logger to see what it does.
//!
//! ## License
//!
//! `flowprompt` is licensed under Apache license.

pub mod kernel;
pub mod blocks;
pub mod prompt;
pub mod flow;
pub mod utils;
