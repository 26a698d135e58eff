// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Identifier loads and stores.
//!
//! Where a name lives was decided by the binder; this module only picks the
//! instruction for each storage class.

use super::IrGen;
use crate::ast::Identifier;
use crate::binder::{BindingId, Resolution, StorageClass};
use crate::diagnostics::Span;
use crate::ir::{InstKind, Operand};

impl<'a> IrGen<'a> {
    /// Reads an identifier.
    pub(super) fn load_identifier(&mut self, id: &Identifier) -> Operand {
        match self.tree.resolve(id) {
            Resolution::Global if id.name == "undefined" => Operand::undefined(),
            Resolution::Global => self.value(
                InstKind::TryLoadGlobalProperty {
                    name: id.name.clone(),
                },
                id.span,
            ),
            Resolution::Binding(binding) => self.load_binding(binding, id.span),
        }
    }

    /// Reads an identifier without throwing when it is an undeclared global.
    pub(super) fn load_identifier_quiet(&mut self, id: &Identifier) -> Operand {
        match self.tree.resolve(id) {
            Resolution::Global if id.name != "undefined" => self.value(
                InstKind::LoadProperty {
                    object: Operand::global_object(),
                    key: Operand::string(id.name.as_str()),
                },
                id.span,
            ),
            _ => self.load_identifier(id),
        }
    }

    pub(super) fn load_binding(&mut self, binding: BindingId, span: Span) -> Operand {
        match self.vars.get(&binding).copied() {
            Some(var) => self.value(InstKind::LoadFrame { var }, span),
            None => {
                let name = self.tree.binding(binding).name.clone();
                self.value(
                    InstKind::LoadProperty {
                        object: Operand::global_object(),
                        key: Operand::string(name),
                    },
                    span,
                )
            }
        }
    }

    /// Writes an identifier. `initializing` is set for declarations, which
    /// may write constants.
    pub(super) fn store_identifier(
        &mut self,
        id: &Identifier,
        value: Operand,
        initializing: bool,
        span: Span,
    ) {
        if self.tree.is_read_only_target(id) {
            tracing::trace!(name = %id.name, "store to read-only global dropped");
            return;
        }
        match self.tree.resolve(id) {
            Resolution::Global if self.strict() => {
                self.emit(
                    InstKind::TryStoreGlobalProperty {
                        value,
                        name: id.name.clone(),
                    },
                    span,
                );
            }
            Resolution::Global => {
                self.emit(
                    InstKind::StoreProperty {
                        value,
                        object: Operand::global_object(),
                        key: Operand::string(id.name.as_str()),
                    },
                    span,
                );
            }
            Resolution::Binding(binding) => {
                if self.tree.binding(binding).is_const && !initializing {
                    self.emit(
                        InstKind::ThrowConstAssignment {
                            name: id.name.clone(),
                        },
                        span,
                    );
                } else {
                    self.store_binding(binding, value, span);
                }
            }
        }
    }

    pub(super) fn store_binding(&mut self, binding: BindingId, value: Operand, span: Span) {
        match self.vars.get(&binding).copied() {
            Some(var) => {
                self.emit(InstKind::StoreFrame { value, var }, span);
            }
            None => {
                let b = self.tree.binding(binding);
                debug_assert_eq!(b.storage, StorageClass::GlobalProperty);
                let name = b.name.clone();
                self.emit(
                    InstKind::StoreProperty {
                        value,
                        object: Operand::global_object(),
                        key: Operand::string(name),
                    },
                    span,
                );
            }
        }
    }

    /// The `this` value of the current function. Arrows read the binding
    /// their enclosing function saved it in.
    pub(super) fn load_this(&mut self, span: Span) -> Operand {
        let info = self.tree.function(self.state.index);
        if info.is_arrow {
            return match info.this_binding {
                Some(binding) => self.load_binding(binding, span),
                None => Operand::global_object(),
            };
        }
        self.state.function.uses_this = true;
        if self.strict() {
            self.value(InstKind::LoadParam { index: 0 }, span)
        } else {
            self.value(InstKind::LoadThisNS, span)
        }
    }
}
