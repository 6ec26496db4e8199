//! Run configuration loaded from a YAML file.

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    data::{DEFAULT_FLOAT_EPSILON, Value},
    error::SyncError,
    normalize::{ColumnHint, HeaderCase},
    reconcile::ComparisonPolicy,
    source::credentials::SecretId,
    statement,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialConfig {
    pub project: String,
    pub secret: String,
    /// Root of the on-disk secret store. Without it credentials come from the
    /// environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<PathBuf>,
}

impl CredentialConfig {
    pub fn secret_id(&self) -> SecretId {
        SecretId::new(&self.project, &self.secret)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpreadsheetConfig {
    pub id: String,
    pub worksheet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// Scalar bound to a named query parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum QueryParam {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl QueryParam {
    pub fn to_value(&self) -> Value {
        match self {
            QueryParam::Boolean(b) => Value::Boolean(*b),
            QueryParam::Integer(i) => Value::Integer(*i),
            QueryParam::Float(f) => Value::Float(*f),
            QueryParam::Text(s) => Value::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub params: BTreeMap<String, QueryParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub target_table: String,
    pub key: Vec<String>,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub compare: ComparisonPolicy,
    #[serde(default = "default_epsilon")]
    pub float_epsilon: f64,
    #[serde(default)]
    pub header_case: HeaderCase,
    pub credentials: CredentialConfig,
    pub spreadsheet: SpreadsheetConfig,
    pub query: QueryConfig,
    #[serde(default)]
    pub columns: Vec<ColumnHint>,
}

fn default_epsilon() -> f64 {
    DEFAULT_FLOAT_EPSILON
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let mut config: SyncConfig =
            serde_yaml::from_reader(reader).context("Parsing config YAML")?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_paths(base);
        config.normalize_names();
        config
            .validate()
            .with_context(|| format!("Validating config {path:?}"))?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &Path| {
            if path.is_relative() {
                base.join(path)
            } else {
                path.to_path_buf()
            }
        };
        self.query.path = resolve(&self.query.path);
        if let Some(store) = &self.credentials.store {
            self.credentials.store = Some(resolve(store));
        }
        let sheet = Path::new(&self.spreadsheet.id);
        if sheet.is_relative() {
            self.spreadsheet.id = base.join(sheet).to_string_lossy().into_owned();
        }
    }

    /// Key and policy names address normalized fields.
    fn normalize_names(&mut self) {
        let case = self.header_case;
        self.key = self.key.iter().map(|name| case.apply(name)).collect();
        self.compare = std::mem::take(&mut self.compare).map_names(|name| case.apply(name));
    }

    pub fn validate(&self) -> std::result::Result<(), SyncError> {
        if self.key.is_empty() {
            return Err(SyncError::Config("at least one key field is required".into()));
        }
        statement::quote_table(&self.target_table)?;
        for name in self.key.iter().chain(self.compare.names()) {
            statement::validate_identifier(name)?;
        }
        for column in &self.columns {
            if let Some(field) = &column.field {
                statement::validate_identifier(field)?;
            }
        }
        if let ComparisonPolicy::Allow(fields) = &self.compare
            && fields.is_empty()
        {
            return Err(SyncError::Config("compare.allow must name at least one field".into()));
        }
        if !self.float_epsilon.is_finite() || self.float_epsilon <= 0.0 {
            return Err(SyncError::Config(format!(
                "float_epsilon must be a positive finite number, got {}",
                self.float_epsilon
            )));
        }
        Ok(())
    }

    /// Query parameters keyed as the driver expects them (`:name`).
    pub fn query_params(&self) -> Vec<(String, Value)> {
        self.query
            .params
            .iter()
            .map(|(name, param)| {
                let name = if name.starts_with(':') {
                    name.clone()
                } else {
                    format!(":{name}")
                };
                (name, param.to_value())
            })
            .collect()
    }
}
