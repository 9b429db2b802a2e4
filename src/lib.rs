//! Embedded-code template compilation and rendering with source-accurate
//! error reporting.
//!
//! `weft` compiles text templates interleaved with executable fragments
//! (`<%= expr %>` / `<% stmt %>`) into reusable, thread-safe compiled units,
//! evaluates them against caller-supplied dynamic scopes and named locals,
//! and translates runtime failure locations back to the original template
//! file and line.
//!
//! # Modules
//!
//! - [`template`] — [`Template`] construction and the render entry points
//! - `trim` — trim-mode preprocessing with line-correspondence tracking
//! - [`codegen`] — source-to-procedure-body generation and the [`LineMap`]
//! - `program` — internal compiler for generated bodies
//! - [`cache`] — keyed compile-or-fetch with per-key single flight
//! - `eval` — evaluator/binder executing units against a [`Scope`]
//! - [`scope`] — the dynamic receiver interface and a map-backed impl
//! - [`value`] — dynamic values exchanged across the boundary
//! - [`error`] — configuration / compile / evaluation error taxonomy
//!
//! # Example
//!
//! ```
//! use weft::{Locals, MapScope, Template, Value};
//!
//! let template = Template::new("Hey <%= name %>!");
//! let mut scope = MapScope::new();
//! let locals = Locals::from([("name".to_string(), Value::from("Joe"))]);
//! assert_eq!(template.render(&mut scope, &locals).unwrap(), "Hey Joe!");
//! ```

pub mod cache;
pub mod codegen;
pub mod error;
mod eval;
mod program;
pub mod scope;
pub mod template;
mod trim;
pub mod value;

pub use cache::{CompilationCache, CompiledUnit};
pub use codegen::LineMap;
pub use error::{CompileError, Error, EvalErrorKind, EvaluationError};
pub use scope::{MapScope, Scope};
pub use template::{Locals, Template, TemplateOptions, DEFAULT_OUTVAR};
pub use value::Value;
