//! Keyed diff of spreadsheet rows against database rows.
//!
//! The spreadsheet is authoritative: for every matched key, each field the
//! [`ComparisonPolicy`] admits is compared with [`crate::data::Value::equivalent`] and the
//! spreadsheet value wins where they differ. Intents come out in spreadsheet
//! row order whatever order the database returned its rows in. Nothing here
//! touches the database.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    data::DEFAULT_FLOAT_EPSILON,
    error::{Result, SyncError},
    key::{Key, KeySpec, UnkeyableReason},
    row::{Field, Provenance, Row},
};

/// Which fields take part in the diff. Key fields never do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPolicy {
    /// Compare exactly these fields, in this order.
    Allow(Vec<String>),
    /// Compare every spreadsheet field except these.
    Deny(Vec<String>),
}

impl Default for ComparisonPolicy {
    fn default() -> Self {
        ComparisonPolicy::Deny(Vec::new())
    }
}

impl ComparisonPolicy {
    pub fn admits(&self, field: &str) -> bool {
        match self {
            ComparisonPolicy::Allow(fields) => fields.iter().any(|f| f == field),
            ComparisonPolicy::Deny(fields) => !fields.iter().any(|f| f == field),
        }
    }

    pub fn names(&self) -> &[String] {
        match self {
            ComparisonPolicy::Allow(fields) | ComparisonPolicy::Deny(fields) => fields,
        }
    }

    pub fn map_names(self, f: impl Fn(&str) -> String) -> Self {
        match self {
            ComparisonPolicy::Allow(fields) => {
                ComparisonPolicy::Allow(fields.iter().map(|n| f(n)).collect())
            }
            ComparisonPolicy::Deny(fields) => {
                ComparisonPolicy::Deny(fields.iter().map(|n| f(n)).collect())
            }
        }
    }

    fn candidates<'r>(&'r self, source: &'r Row) -> Vec<&'r str> {
        match self {
            ComparisonPolicy::Allow(fields) => fields.iter().map(String::as_str).collect(),
            ComparisonPolicy::Deny(_) => source.field_names().filter(|f| self.admits(f)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MutationIntent {
    pub key: Key,
    pub changed_fields: Vec<Field>,
    pub source_row: Row,
    pub target_row: Row,
}

impl MutationIntent {
    pub fn changed_names(&self) -> impl Iterator<Item = &str> {
        self.changed_fields.iter().map(|field| field.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnkeyableRow {
    pub row: Row,
    pub reason: UnkeyableReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationResult {
    pub intents: Vec<MutationIntent>,
    /// Matched keys whose compared fields were all equal, in spreadsheet order.
    pub unchanged_keys: Vec<Key>,
    /// Spreadsheet keys with no database row, in spreadsheet order.
    pub unmatched_spreadsheet_keys: Vec<Key>,
    /// Database keys no spreadsheet row claimed, in database order.
    pub unmatched_database_keys: Vec<Key>,
    pub unkeyable_rows: Vec<UnkeyableRow>,
}

impl ReconciliationResult {
    pub fn matched_count(&self) -> usize {
        self.intents.len() + self.unchanged_keys.len()
    }
}

pub struct Reconciler<'a> {
    key: &'a KeySpec,
    policy: &'a ComparisonPolicy,
    epsilon: f64,
}

impl<'a> Reconciler<'a> {
    pub fn new(key: &'a KeySpec, policy: &'a ComparisonPolicy) -> Self {
        Self {
            key,
            policy,
            epsilon: DEFAULT_FLOAT_EPSILON,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn reconcile(&self, sheet: &[Row], database: &[Row]) -> Result<ReconciliationResult> {
        let mut result = ReconciliationResult::default();

        let db_keyed = self.keyed(database, &mut result)?;
        let mut db_index: HashMap<&Key, &Row> = HashMap::with_capacity(db_keyed.len());
        for (key, row) in &db_keyed {
            db_index.insert(key, *row);
        }
        let sheet_keyed = self.keyed(sheet, &mut result)?;

        let mut matched: HashSet<&Key> = HashSet::with_capacity(sheet_keyed.len());
        for (key, source) in &sheet_keyed {
            let Some(target) = db_index.get(key) else {
                debug!("Spreadsheet row {} (key {key}) has no database row", source.position);
                result.unmatched_spreadsheet_keys.push(key.clone());
                continue;
            };
            matched.insert(key);
            let changed_fields = self.diff(source, target);
            if changed_fields.is_empty() {
                result.unchanged_keys.push(key.clone());
            } else {
                debug!("Key {key}: {} field(s) changed", changed_fields.len());
                result.intents.push(MutationIntent {
                    key: key.clone(),
                    changed_fields,
                    source_row: (*source).clone(),
                    target_row: (*target).clone(),
                });
            }
        }

        result.unmatched_database_keys = db_keyed
            .iter()
            .filter(|(key, _)| !matched.contains(key))
            .map(|(key, _)| key.clone())
            .collect();
        Ok(result)
    }

    /// Extracts keys in input order, moving unkeyable rows into `result` and
    /// failing on the first repeated key.
    fn keyed<'r>(
        &self,
        rows: &'r [Row],
        result: &mut ReconciliationResult,
    ) -> Result<Vec<(Key, &'r Row)>> {
        let mut keyed = Vec::with_capacity(rows.len());
        let mut seen: HashMap<Key, usize> = HashMap::with_capacity(rows.len());
        for row in rows {
            match self.key.extract(row) {
                Ok(key) => {
                    if let Some(first_row) = seen.insert(key.clone(), row.position) {
                        return Err(SyncError::DuplicateKey {
                            side: row.provenance,
                            key,
                            first_row,
                            second_row: row.position,
                        });
                    }
                    keyed.push((key, row));
                }
                Err(reason) => {
                    warn!(
                        "{} row {} cannot be reconciled: {reason}",
                        capitalized(row.provenance),
                        row.position
                    );
                    result.unkeyable_rows.push(UnkeyableRow {
                        row: row.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(keyed)
    }

    fn diff(&self, source: &Row, target: &Row) -> Vec<Field> {
        let mut changed = Vec::new();
        for name in self.policy.candidates(source) {
            if self.key.is_key_field(name) {
                continue;
            }
            // A field missing on either side is unknown, not a change.
            let (Some(new), Some(old)) = (source.get(name), target.get(name)) else {
                continue;
            };
            if !new.equivalent(old, self.epsilon) {
                changed.push(Field::new(name, new.clone()));
            }
        }
        changed
    }
}

fn capitalized(side: Provenance) -> &'static str {
    match side {
        Provenance::Spreadsheet => "Spreadsheet",
        Provenance::Database => "Database",
    }
}
