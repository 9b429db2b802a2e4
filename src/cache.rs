//! Compilation cache: compile-or-fetch keyed by (template identity,
//! locals signature), with at-most-one compilation in flight per key.
//!
//! Template identity is reference identity (a process-unique id assigned at
//! construction), not a content hash — two templates with identical source
//! are distinct entries. The signature is the sorted, deduplicated set of
//! local names a render call binds; each distinct signature gets its own
//! [`CompiledUnit`] because the unit's parameter list is fixed per
//! signature.
//!
//! Concurrency: the map is a [`DashMap`], so requests for different keys
//! never block each other. Each entry holds a `OnceCell`; concurrent first
//! requests for the same key serialize on the cell, exactly one runs the
//! compiler, and every caller observes the same `Arc`'d unit. Failed
//! compilations leave the cell empty, so a later request may retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::codegen::LineMap;
use crate::error::Error;
use crate::eval;
use crate::program::{self, Program};
use crate::scope::Scope;
use crate::template::{Locals, Template};

/// Sorted, deduplicated local names — the cache-relevant half of a key.
pub(crate) type Signature = Vec<String>;

/// An executable procedure produced from a template's generated body.
///
/// Immutable once built; safe to invoke repeatedly from multiple threads.
#[derive(Debug)]
pub struct CompiledUnit {
    pub(crate) program: Program,
    pub(crate) signature: Signature,
    pub(crate) outvar: String,
    pub(crate) expose_buffer: bool,
    pub(crate) line_map: Arc<LineMap>,
    pub(crate) path: String,
    pub(crate) start_line: u32,
}

impl CompiledUnit {
    /// The sorted local names this unit binds as parameters.
    pub fn signature(&self) -> &[String] {
        &self.signature
    }

    /// Execute this unit directly, bypassing the cache lookup.
    ///
    /// Unlike [`crate::Template::render`], which derives the signature from
    /// the locals it is given, a pre-obtained unit has a fixed signature:
    /// every name in it must have an entry in `locals`, or the render fails
    /// with an evaluation error of kind `missing local`.
    pub fn render(
        &self,
        scope: &mut dyn Scope,
        locals: &Locals,
    ) -> Result<String, Error> {
        eval::render(self, scope, locals, None)
    }

    /// [`CompiledUnit::render`] with a content block for `yield`.
    pub fn render_with_block(
        &self,
        scope: &mut dyn Scope,
        locals: &Locals,
        block: &dyn Fn() -> String,
    ) -> Result<String, Error> {
        eval::render(self, scope, locals, Some(block))
    }
}

/// Process-lifetime cache of compiled units. Entries are never evicted;
/// signature cardinality per template is small and bounded by caller usage.
#[derive(Debug, Default)]
pub struct CompilationCache {
    units: DashMap<(u64, Signature), Arc<OnceCell<Arc<CompiledUnit>>>>,
    compiles: AtomicUsize,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached units.
    pub fn len(&self) -> usize {
        self.units.iter().filter(|e| e.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of compilations actually executed (not fetches). With the
    /// single-flight guarantee this equals the number of distinct keys that
    /// compiled successfully, plus any failed attempts.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }

    /// Compile-or-fetch the unit for `template` under the signature derived
    /// from `local_names` (order-independent, duplicates ignored).
    pub(crate) fn obtain(
        &self,
        template: &Template,
        local_names: &[&str],
    ) -> Result<Arc<CompiledUnit>, Error> {
        let mut signature: Signature = local_names.iter().map(|s| s.to_string()).collect();
        signature.sort();
        signature.dedup();

        let key = (template.id(), signature.clone());
        let cell = self
            .units
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        // The map entry guard is dropped here: compilation must not hold a
        // shard lock, or unrelated keys in the same shard would block.

        let unit = cell.get_or_try_init(|| {
            self.compiles.fetch_add(1, Ordering::Relaxed);
            debug!(
                path = %template.path(),
                signature = ?signature,
                "compiling template unit"
            );
            let program = program::compile(template.body(), template.outvar())
                .map_err(|e| template.compile_error(e))?;
            Ok::<_, Error>(Arc::new(CompiledUnit {
                program,
                signature: signature.clone(),
                outvar: template.outvar().to_string(),
                expose_buffer: template.expose_buffer(),
                line_map: template.line_map(),
                path: template.path().to_string(),
                start_line: template.start_line(),
            }))
        })?;
        Ok(unit.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Template, TemplateOptions};

    fn template(source: &str) -> Template {
        Template::new(source)
    }

    #[test]
    fn test_obtain_is_idempotent() {
        let cache = CompilationCache::new();
        let tpl = template("Hey <%= name %>!");
        let a = cache.obtain(&tpl, &["name"]).unwrap();
        let b = cache.obtain(&tpl, &["name"]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.compile_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_signature_is_order_independent_and_deduplicated() {
        let cache = CompilationCache::new();
        let tpl = template("x");
        let a = cache.obtain(&tpl, &["b", "a"]).unwrap();
        let b = cache.obtain(&tpl, &["a", "b", "a"]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.signature(), ["a", "b"]);
        assert_eq!(cache.compile_count(), 1);
    }

    #[test]
    fn test_distinct_signatures_get_distinct_units() {
        let cache = CompilationCache::new();
        let tpl = template("x");
        let a = cache.obtain(&tpl, &[]).unwrap();
        let b = cache.obtain(&tpl, &["name"]).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_identical_source_distinct_templates_are_distinct_keys() {
        let cache = CompilationCache::new();
        let t1 = template("same");
        let t2 = template("same");
        let a = cache.obtain(&t1, &[]).unwrap();
        let b = cache.obtain(&t2, &[]).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_failed_compile_is_not_cached_and_retries() {
        let cache = CompilationCache::new();
        let tpl = Template::with_options(
            "<% if true %>no end",
            "broken.erb",
            1,
            TemplateOptions::default(),
        )
        .unwrap();
        assert!(matches!(cache.obtain(&tpl, &[]), Err(Error::Compile(_))));
        assert!(matches!(cache.obtain(&tpl, &[]), Err(Error::Compile(_))));
        // Both attempts ran the compiler; nothing was cached.
        assert_eq!(cache.compile_count(), 2);
        assert_eq!(cache.len(), 0);
    }
}
