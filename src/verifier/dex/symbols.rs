/*!
 * Referenced Symbols
 * Accumulator for the external methods and fields one segment references
 */

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A method referenced by bytecode, in Java source notation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodRef {
    /// Dotted declaring class, e.g. `android.os.Bundle`
    pub class: String,
    pub name: String,
    pub parameters: Vec<String>,
    pub return_type: String,
}

impl MethodRef {
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        parameters: Vec<String>,
        return_type: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            parameters,
            return_type: return_type.into(),
        }
    }

    /// `[package…, class, method, parameter…, return]`
    pub fn token_path(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = self.class.split('.').collect();
        tokens.push(&self.name);
        tokens.extend(self.parameters.iter().map(String::as_str));
        tokens.push(&self.return_type);
        tokens
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({}) -> {}",
            self.class,
            self.name,
            self.parameters.join(", "),
            self.return_type
        )
    }
}

/// A field referenced by bytecode
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub field_type: String,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.class, self.name, self.field_type)
    }
}

/// Symbols referenced by one bytecode segment but defined outside it
#[derive(Debug, Default, Clone)]
pub struct DexSymbols {
    methods: BTreeSet<MethodRef>,
    fields: BTreeSet<FieldRef>,
    methods_by_class: AHashMap<String, AHashSet<String>>,
    fields_by_class: AHashMap<String, AHashSet<String>>,
}

impl DexSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method(&mut self, method: MethodRef) {
        self.methods_by_class
            .entry(method.class.clone())
            .or_default()
            .insert(method.name.clone());
        self.methods.insert(method);
    }

    pub fn add_field(&mut self, field: FieldRef) {
        self.fields_by_class
            .entry(field.class.clone())
            .or_default()
            .insert(field.name.clone());
        self.fields.insert(field);
    }

    /// Whether any overload of `class.method` is referenced
    pub fn has_referenced_method(&self, class: &str, method: &str) -> bool {
        self.methods_by_class
            .get(class)
            .is_some_and(|names| names.contains(method))
    }

    pub fn has_referenced_field(&self, class: &str, field: &str) -> bool {
        self.fields_by_class
            .get(class)
            .is_some_and(|names| names.contains(field))
    }

    /// Referenced methods in sorted order
    pub fn methods(&self) -> impl Iterator<Item = &MethodRef> {
        self.methods.iter()
    }

    /// Referenced fields in sorted order
    pub fn fields(&self) -> impl Iterator<Item = &FieldRef> {
        self.fields.iter()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.methods.clear();
        self.fields.clear();
        self.methods_by_class.clear();
        self.fields_by_class.clear();
    }
}
