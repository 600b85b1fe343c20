//! Declared field specs.

use std::collections::BTreeSet;

use tether_types::Tag;

use crate::error::{CoreError, CoreResult};

/// The declared persistent fields of one record class.
///
/// Fields are listed inherited-first, in declaration order. A class may
/// extend any number of parent specs but may not redeclare a field it
/// inherits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassSpec {
    name: String,
    ancestors: Vec<String>,
    fields: Vec<String>,
}

impl ClassSpec {
    pub fn builder(name: impl Into<String>) -> ClassSpecBuilder {
        ClassSpecBuilder {
            name: name.into(),
            ancestors: Vec::new(),
            inherited: Vec::new(),
            own: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of every class this one extends, directly or not.
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// Whether this class is `name` or extends it.
    pub fn is_a(&self, name: &str) -> bool {
        self.name == name || self.ancestors.iter().any(|a| a == name)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

/// Builder for [`ClassSpec`].
#[derive(Debug)]
pub struct ClassSpecBuilder {
    name: String,
    ancestors: Vec<String>,
    inherited: Vec<String>,
    own: Vec<String>,
}

impl ClassSpecBuilder {
    /// Inherit every field of `parent`.
    pub fn extends(mut self, parent: &ClassSpec) -> Self {
        let lineage = std::iter::once(&parent.name).chain(&parent.ancestors);
        for name in lineage {
            if !self.ancestors.contains(name) {
                self.ancestors.push(name.clone());
            }
        }
        for field in &parent.fields {
            // Diamonds reach the same ancestor field twice.
            if !self.inherited.contains(field) {
                self.inherited.push(field.clone());
            }
        }
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.own.push(name.into());
        self
    }

    pub fn fields<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |builder, name| builder.field(name))
    }

    pub fn build(self) -> CoreResult<ClassSpec> {
        if Tag::is_reserved(&self.name) {
            return Err(CoreError::ReservedClassName(self.name));
        }

        let mut seen: BTreeSet<&str> = self.inherited.iter().map(String::as_str).collect();
        for field in &self.own {
            if !seen.insert(field.as_str()) {
                return Err(CoreError::DuplicateFieldOverride {
                    class: self.name.clone(),
                    field: field.clone(),
                });
            }
        }

        let mut fields = self.inherited;
        fields.extend(self.own);
        Ok(ClassSpec {
            name: self.name,
            ancestors: self.ancestors,
            fields,
        })
    }
}
