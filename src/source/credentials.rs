//! Secret bundle lookup.
//!
//! A [`SecretStoreSource`] mirrors the `projects/<project>/secrets/<secret>`
//! naming of a cloud secret manager on the local filesystem, one JSON document
//! per secret. [`EnvCredentialSource`] reads the same three values from the
//! process environment.

use std::{env, fmt, fs::File, io::BufReader, path::PathBuf};

use log::debug;
use serde::Deserialize;

use crate::error::{Result, SyncError};

pub const ENV_USER: &str = "SHEET_SYNC_DB_USER";
pub const ENV_PASSWORD: &str = "SHEET_SYNC_DB_PASSWORD";
pub const ENV_DSN: &str = "SHEET_SYNC_DB_DSN";

#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct SecretBundle {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub dsn: String,
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dsn", &self.dsn)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretId {
    pub project: String,
    pub secret: String,
}

impl SecretId {
    pub fn new(project: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            secret: secret.into(),
        }
    }

    pub fn resource_name(&self) -> String {
        format!("projects/{}/secrets/{}", self.project, self.secret)
    }
}

pub trait CredentialSource {
    fn fetch(&self, id: &SecretId) -> Result<SecretBundle>;
}

#[derive(Debug, Clone)]
pub struct SecretStoreSource {
    root: PathBuf,
}

impl SecretStoreSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn secret_path(&self, id: &SecretId) -> PathBuf {
        self.root
            .join("projects")
            .join(&id.project)
            .join("secrets")
            .join(format!("{}.json", id.secret))
    }
}

impl CredentialSource for SecretStoreSource {
    fn fetch(&self, id: &SecretId) -> Result<SecretBundle> {
        let path = self.secret_path(id);
        debug!("Reading secret {} from {:?}", id.resource_name(), path);
        let file = File::open(&path).map_err(|err| {
            SyncError::Credential(format!("opening secret {}: {err}", id.resource_name()))
        })?;
        let bundle: SecretBundle = serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            SyncError::Credential(format!("parsing secret {}: {err}", id.resource_name()))
        })?;
        if bundle.dsn.trim().is_empty() {
            return Err(SyncError::Credential(format!(
                "secret {} has an empty dsn",
                id.resource_name()
            )));
        }
        Ok(bundle)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn fetch(&self, id: &SecretId) -> Result<SecretBundle> {
        debug!(
            "Reading credentials for {} from environment",
            id.resource_name()
        );
        let dsn = env::var(ENV_DSN)
            .map_err(|_| SyncError::Credential(format!("{ENV_DSN} is not set")))?;
        Ok(SecretBundle {
            user: env::var(ENV_USER).unwrap_or_default(),
            password: env::var(ENV_PASSWORD).unwrap_or_default(),
            dsn,
        })
    }
}
