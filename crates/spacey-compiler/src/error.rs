// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the compiler

use thiserror::Error;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a compilation or a deferred emission outright.
///
/// Problems in the compiled program itself are reported as
/// [`Diagnostic`](crate::diagnostics::Diagnostic)s instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The parser rejected the source
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    /// Compilation finished but reported errors
    #[error("compilation failed with {0} error(s)")]
    CompilationFailed(usize),

    /// A function needs more registers than the encoding can address
    #[error("function '{function}' needs {registers} registers, the limit is {limit}")]
    TooManyRegisters {
        /// Name of the offending function
        function: String,
        /// Registers required
        registers: u32,
        /// Largest addressable frame
        limit: u32,
    },

    /// No function with this index exists in the module
    #[error("no function with index {0}")]
    UnknownFunction(u32),

    /// The function already has a body
    #[error("function {0} is not deferred")]
    NotDeferred(u32),

    /// An internal invariant was violated
    #[error("InternalError: {0}")]
    InternalError(String),
}
