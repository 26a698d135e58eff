// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Debug metadata consumed by debuggers.

use serde::{Deserialize, Serialize};

/// Source position of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLocation {
    /// Bytecode offset of the first instruction at this position
    pub address: u32,
    /// 1-based line
    pub line: u32,
    /// 1-based byte column
    pub column: u32,
    /// Index of the statement within its function
    pub statement: u32,
}

/// Debug metadata of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDebugInfo {
    /// Locations sorted by address; each covers the code up to the next
    pub locations: Vec<DebugLocation>,
    /// Names of the environment slots
    pub variables: Vec<String>,
    /// Registers holding named variables
    pub registers: Vec<(u32, String)>,
}

/// Result of [`DebugInfo::address_for_location`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugSearchResult {
    /// Function index
    pub function: u32,
    /// Bytecode offset
    pub address: u32,
    /// Line found
    pub line: u32,
    /// Column found
    pub column: u32,
}

/// Debug metadata of a module, indexed by function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    functions: Vec<Option<FunctionDebugInfo>>,
}

impl DebugInfo {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the metadata of a function, replacing any earlier record.
    pub fn set_function(&mut self, function: u32, info: FunctionDebugInfo) {
        let index = function as usize;
        if self.functions.len() <= index {
            self.functions.resize(index + 1, None);
        }
        self.functions[index] = Some(info);
    }

    /// Metadata of a function, if emitted.
    pub fn function(&self, function: u32) -> Option<&FunctionDebugInfo> {
        self.functions.get(function as usize)?.as_ref()
    }

    /// Location of the instruction at `address`.
    pub fn location_for_address(&self, function: u32, address: u32) -> Option<DebugLocation> {
        let locations = &self.function(function)?.locations;
        let after = locations.partition_point(|l| l.address <= address);
        after.checked_sub(1).map(|i| locations[i])
    }

    /// First address at `line`, and at `column` when given, searching the
    /// functions in index order.
    pub fn address_for_location(&self, line: u32, column: Option<u32>) -> Option<DebugSearchResult> {
        self.functions
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (i as u32, f)))
            .find_map(|(function, info)| {
                info.locations
                    .iter()
                    .find(|l| l.line == line && column.is_none_or(|c| c == l.column))
                    .map(|l| DebugSearchResult {
                        function,
                        address: l.address,
                        line: l.line,
                        column: l.column,
                    })
            })
    }

    /// Names of a function's environment slots.
    pub fn variable_names(&self, function: u32) -> &[String] {
        self.function(function)
            .map(|f| f.variables.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(address: u32, line: u32, column: u32) -> DebugLocation {
        DebugLocation {
            address,
            line,
            column,
            statement: line,
        }
    }

    fn sample() -> DebugInfo {
        let mut info = DebugInfo::new();
        info.set_function(
            0,
            FunctionDebugInfo {
                locations: vec![loc(0, 1, 1), loc(4, 2, 5), loc(9, 3, 1)],
                ..Default::default()
            },
        );
        info.set_function(
            2,
            FunctionDebugInfo {
                locations: vec![loc(0, 5, 3), loc(2, 5, 10)],
                variables: vec!["x".into(), "y".into()],
                registers: vec![],
            },
        );
        info
    }

    #[test]
    fn test_location_for_address() {
        let info = sample();
        assert_eq!(info.location_for_address(0, 0), Some(loc(0, 1, 1)));
        assert_eq!(info.location_for_address(0, 6), Some(loc(4, 2, 5)));
        assert_eq!(info.location_for_address(0, 100), Some(loc(9, 3, 1)));
        assert_eq!(info.location_for_address(1, 0), None);
    }

    #[test]
    fn test_address_for_location() {
        let info = sample();
        let found = info.address_for_location(5, None).unwrap();
        assert_eq!((found.function, found.address, found.column), (2, 0, 3));
        let found = info.address_for_location(5, Some(10)).unwrap();
        assert_eq!(found.address, 2);
        assert!(info.address_for_location(4, None).is_none());
    }

    #[test]
    fn test_variable_names() {
        let info = sample();
        assert_eq!(info.variable_names(2), ["x", "y"]);
        assert!(info.variable_names(0).is_empty());
        assert!(info.variable_names(7).is_empty());
    }
}
