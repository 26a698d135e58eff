// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Compilation flags.

use serde::{Deserialize, Serialize};

/// Flags controlling one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileFlags {
    /// Compile every function as strict code
    pub strict: bool,

    /// Recognize direct `eval(...)` calls
    pub allow_eval: bool,

    /// Maximum display width of rendered source lines (0 = unlimited)
    pub max_diagnostic_width: usize,

    /// Run the optimizer
    pub optimize: bool,

    /// Emit debug locations and variable names
    pub debug_info: bool,

    /// Defer emission of nested function bodies
    pub lazy: bool,

    /// Color rendered diagnostics
    pub color: bool,
}

impl Default for CompileFlags {
    fn default() -> Self {
        Self {
            strict: true,
            allow_eval: false,
            max_diagnostic_width: 0,
            optimize: true,
            debug_info: false,
            lazy: false,
            color: false,
        }
    }
}

impl CompileFlags {
    /// Flags for sloppy-mode code.
    pub fn non_strict() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let flags = CompileFlags::default();
        assert!(flags.strict);
        assert!(!flags.allow_eval);
        assert!(flags.optimize);
        assert_eq!(flags.max_diagnostic_width, 0);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let flags: CompileFlags =
            serde_json::from_str(r#"{"strict": false, "max_diagnostic_width": 80}"#).unwrap();
        assert!(!flags.strict);
        assert_eq!(flags.max_diagnostic_width, 80);
        assert!(flags.optimize);
        assert!(!flags.lazy);
    }
}
