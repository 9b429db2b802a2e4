//! Template construction and render entry points.
//!
//! A [`Template`] is immutable after construction: source text, originating
//! path, starting line, and options are fixed, and trim preprocessing plus
//! code generation run eagerly so every render works from the same generated
//! body and line map. Compilation is deferred to the first render per locals
//! signature and cached for the life of the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CompilationCache, CompiledUnit};
use crate::codegen::{self, LineMap};
use crate::error::{CompileError, Error};
use crate::eval;
use crate::program::ProgramError;
use crate::scope::Scope;
use crate::trim::{self, TrimMode};
use crate::value::Value;

/// Named local variables bound for a single render call.
pub type Locals = HashMap<String, Value>;

/// Default buffer variable: attribute-style, so statement code can address
/// the in-progress buffer when exposure is enabled.
pub const DEFAULT_OUTVAR: &str = "@_erbout";

const DEFAULT_PATH: &str = "(template)";

static NEXT_TEMPLATE_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL_CACHE: Lazy<Arc<CompilationCache>> =
    Lazy::new(|| Arc::new(CompilationCache::new()));

/// Rendering options, as supplied by the collaborator that loaded the
/// template. Unrecognized trim modes and malformed outvar names fail
/// construction with [`Error::Configuration`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOptions {
    /// Trim mode: absent for none, `"-"` to strip the newline after `-%>`,
    /// `"%"` for whole-line statement syntax.
    pub trim: Option<String>,

    /// Buffer variable name. An attribute-style name (leading `@`) can alias
    /// a scope attribute; see [`TemplateOptions::expose_buffer`].
    pub outvar: Option<String>,

    /// Make the in-progress buffer readable and writable through the scope
    /// attribute named by `outvar` during evaluation.
    #[serde(alias = "exposeBuffer")]
    pub expose_buffer: bool,
}

/// An immutable compiled-on-demand template.
#[derive(Debug)]
pub struct Template {
    id: u64,
    source: String,
    path: String,
    start_line: u32,
    outvar: String,
    expose_buffer: bool,
    body: String,
    line_map: Arc<LineMap>,
    cache: Arc<CompilationCache>,
}

impl Template {
    /// Construct a template with default path, starting line, and options.
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_options(source, DEFAULT_PATH, 1, TemplateOptions::default())
            .expect("default options are always valid")
    }

    /// Construct a template from source text, its originating path, the
    /// 1-based line it starts on in that file, and rendering options.
    pub fn with_options(
        source: impl Into<String>,
        path: impl Into<String>,
        start_line: u32,
        options: TemplateOptions,
    ) -> Result<Self, Error> {
        let source = source.into();
        let path = path.into();
        if start_line == 0 {
            return Err(Error::configuration("starting line must be >= 1"));
        }
        let trim = TrimMode::parse(options.trim.as_deref())?;
        let outvar = options.outvar.unwrap_or_else(|| DEFAULT_OUTVAR.to_string());
        validate_outvar(&outvar)?;

        let preprocessed = trim::preprocess(&source, trim);
        let generated = codegen::generate(&preprocessed, &outvar);
        debug!(path = %path, start_line, ?trim, "template constructed");

        Ok(Self {
            id: NEXT_TEMPLATE_ID.fetch_add(1, Ordering::Relaxed),
            source,
            path,
            start_line,
            outvar,
            expose_buffer: options.expose_buffer,
            body: generated.body,
            line_map: generated.line_map,
            cache: GLOBAL_CACHE.clone(),
        })
    }

    /// Use a private compilation cache instead of the process-wide one.
    pub fn with_cache(mut self, cache: Arc<CompilationCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Render against `scope` with `locals` bound as named parameters.
    ///
    /// The locals signature (sorted, deduplicated names) selects — and on
    /// first use compiles — the unit this call executes. A scope shared
    /// across concurrent renders is a race the caller must avoid: the
    /// save/restore of an aliased outvar attribute around each render is
    /// not synchronized by the engine.
    pub fn render(&self, scope: &mut dyn Scope, locals: &Locals) -> Result<String, Error> {
        self.render_inner(scope, locals, None)
    }

    /// [`Template::render`] with a content block for `yield`.
    pub fn render_with_block(
        &self,
        scope: &mut dyn Scope,
        locals: &Locals,
        block: &dyn Fn() -> String,
    ) -> Result<String, Error> {
        self.render_inner(scope, locals, Some(block))
    }

    fn render_inner(
        &self,
        scope: &mut dyn Scope,
        locals: &Locals,
        block: Option<&dyn Fn() -> String>,
    ) -> Result<String, Error> {
        let names: Vec<&str> = locals.keys().map(String::as_str).collect();
        let unit = self.cache.obtain(self, &names)?;
        eval::render(&unit, scope, locals, block)
    }

    /// Compile-or-fetch the unit for a locals signature without rendering.
    pub fn compiled(&self, local_names: &[&str]) -> Result<Arc<CompiledUnit>, Error> {
        self.cache.obtain(self, local_names)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    pub fn outvar(&self) -> &str {
        &self.outvar
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn body(&self) -> &str {
        &self.body
    }

    pub(crate) fn expose_buffer(&self) -> bool {
        self.expose_buffer
    }

    pub(crate) fn line_map(&self) -> Arc<LineMap> {
        self.line_map.clone()
    }

    /// Locate a compiler diagnostic in the original source.
    pub(crate) fn compile_error(&self, error: ProgramError) -> Error {
        let line = self
            .line_map
            .original_line(error.line)
            .map(|original| self.start_line + original - 1)
            .unwrap_or(self.start_line);
        CompileError {
            path: self.path.clone(),
            line,
            message: error.message,
        }
        .into()
    }
}

/// An outvar must be a plain or attribute-style identifier; anything else
/// would corrupt the generated body.
fn validate_outvar(outvar: &str) -> Result<(), Error> {
    let name = outvar.strip_prefix('@').unwrap_or(outvar);
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(Error::configuration(format!(
            "invalid outvar {outvar:?} (expected an identifier, optionally prefixed with '@')"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::MapScope;

    #[test]
    fn test_defaults() {
        let tpl = Template::new("hi");
        assert_eq!(tpl.path(), "(template)");
        assert_eq!(tpl.start_line(), 1);
        assert_eq!(tpl.outvar(), DEFAULT_OUTVAR);
    }

    #[test]
    fn test_invalid_trim_mode_is_configuration_error() {
        let result = Template::with_options(
            "x",
            "t.erb",
            1,
            TemplateOptions {
                trim: Some("=".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_outvar_is_configuration_error() {
        let result = Template::with_options(
            "x",
            "t.erb",
            1,
            TemplateOptions {
                outvar: Some("not an ident".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_start_line_is_configuration_error() {
        let result = Template::with_options("x", "t.erb", 0, TemplateOptions::default());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: TemplateOptions = serde_json::from_str("{}").unwrap();
        assert!(options.trim.is_none());
        assert!(options.outvar.is_none());
        assert!(!options.expose_buffer);

        let options: TemplateOptions =
            serde_json::from_str(r#"{"trim": "-", "outvar": "@buf", "exposeBuffer": true}"#)
                .unwrap();
        assert_eq!(options.trim.as_deref(), Some("-"));
        assert_eq!(options.outvar.as_deref(), Some("@buf"));
        assert!(options.expose_buffer);
    }

    #[test]
    fn test_render_smoke() {
        let tpl = Template::new("Hello World!");
        let mut scope = MapScope::new();
        assert_eq!(tpl.render(&mut scope, &Locals::new()).unwrap(), "Hello World!");
    }
}
