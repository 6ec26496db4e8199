use std::fmt;

use serde::Serialize;

use crate::data::Value;
use crate::error::NormalizationError;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Spreadsheet,
    Database,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Spreadsheet => f.write_str("spreadsheet"),
            Provenance::Database => f.write_str("database"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl Field {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// An ordered set of uniquely named fields from one side of the sync.
///
/// `position` is the 1-based row number in the source snapshot (spreadsheet
/// rows count from the first data row under the header). Database rows also
/// remember the value as stored for any field normalization converted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Row {
    pub provenance: Provenance,
    pub position: usize,
    fields: Vec<Field>,
    #[serde(skip)]
    stored: Vec<Field>,
}

impl Row {
    pub fn new(provenance: Provenance, position: usize) -> Self {
        Self {
            provenance,
            position,
            fields: Vec::new(),
            stored: Vec::new(),
        }
    }

    /// Builds a row from `(name, value)` pairs, rejecting repeated names.
    pub fn from_pairs<I, S>(
        provenance: Provenance,
        position: usize,
        pairs: I,
    ) -> Result<Self, NormalizationError>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut row = Row::new(provenance, position);
        for (name, value) in pairs {
            row.push(name, value)?;
        }
        Ok(row)
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) -> Result<(), NormalizationError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(NormalizationError::DuplicateField { field: name });
        }
        self.fields.push(Field::new(name, value));
        Ok(())
    }

    /// Pushes a converted value, keeping `stored` for writes addressed back
    /// to the original row.
    pub fn push_converted(
        &mut self,
        name: impl Into<String>,
        value: Value,
        stored: Value,
    ) -> Result<(), NormalizationError> {
        let name = name.into();
        self.push(name.clone(), value)?;
        self.stored.push(Field::new(name, stored));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    /// The value exactly as the source holds it.
    pub fn stored(&self, name: &str) -> Option<&Value> {
        self.stored
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
            .or_else(|| self.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
