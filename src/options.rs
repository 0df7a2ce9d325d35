//! Session configuration.

use crate::expression::Value;
use crate::validate::{AdditivePolicy, CompatibilityPolicy};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Receives `@print` output: definition path, line, and the printed value if any.
pub type PrintHandler = dyn Fn(&Path, usize, Option<&Value>) + Send + Sync;

#[derive(Clone)]
pub struct Options {
    /// Accept fixed port IDs outside the regulated ranges reserved for standard and vendor types.
    pub allow_unregulated_fixed_port_id: bool,
    /// Evaluate `@assert` expressions but do not fail on false.
    pub skip_assertion_checks: bool,
    /// Report use of deprecated types from non-deprecated ones as errors instead of warnings.
    pub strict_deprecation: bool,
    /// Reject non-sealed definitions without an `@extent`.
    pub require_explicit_extent: bool,
    pub compatibility: Arc<dyn CompatibilityPolicy>,
    pub print_handler: Option<Arc<PrintHandler>>,
}

impl Options {
    pub fn with_print_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Path, usize, Option<&Value>) + Send + Sync + 'static,
    {
        self.print_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_compatibility<P: CompatibilityPolicy + 'static>(mut self, policy: P) -> Self {
        self.compatibility = Arc::new(policy);
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            allow_unregulated_fixed_port_id: false,
            skip_assertion_checks: false,
            strict_deprecation: false,
            require_explicit_extent: false,
            compatibility: Arc::new(AdditivePolicy::default()),
            print_handler: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("allow_unregulated_fixed_port_id", &self.allow_unregulated_fixed_port_id)
            .field("skip_assertion_checks", &self.skip_assertion_checks)
            .field("strict_deprecation", &self.strict_deprecation)
            .field("require_explicit_extent", &self.require_explicit_extent)
            .field("compatibility", &self.compatibility)
            .field("print_handler", &self.print_handler.is_some())
            .finish()
    }
}
