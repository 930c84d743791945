// src/diagnostics.rs
//! What the storage client will see: environment and ADC credentials,
//! with secrets masked. Used by the `check-storage` binary.
use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};

use crate::error::{PipelineError, Result};

/// Variables that change how the GCS client authenticates or connects.
pub const STORAGE_ENV_VARS: &[&str] = &[
    "GOOGLE_APPLICATION_CREDENTIALS",
    "GOOGLE_CLOUD_PROJECT",
    "CLOUDSDK_CORE_PROJECT",
    "GOOGLE_CLOUD_REGION",
    "GOOGLE_API_KEY",
    "SCR_BUCKET",
    "HTTPS_PROXY",
    "HTTP_PROXY",
    "NO_PROXY",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvEntry {
    pub name: String,
    /// Masked when the name looks like a secret.
    pub value: Option<String>,
}

impl fmt::Display for EnvEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}=<unset>", self.name),
        }
    }
}

pub fn collect_env() -> Vec<EnvEntry> {
    collect_env_from(|k| env::var(k).ok())
}

pub fn collect_env_from(lookup: impl Fn(&str) -> Option<String>) -> Vec<EnvEntry> {
    STORAGE_ENV_VARS
        .iter()
        .map(|name| {
            let value = lookup(name).map(|v| {
                if is_secret_name(name) {
                    mask_secret(&v)
                } else {
                    v
                }
            });
            EnvEntry {
                name: name.to_string(),
                value,
            }
        })
        .collect()
}

fn is_secret_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper.contains("SECRET") || upper.contains("KEY")
}

/// First four characters and an ellipsis.
pub fn mask_secret(value: &str) -> String {
    let head: String = value.chars().take(4).collect();
    format!("{}...", head)
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_email: Option<String>,
    project_id: Option<String>,
    quota_project_id: Option<String>,
    private_key_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdcReport {
    pub path: PathBuf,
    pub kind: Option<String>,
    pub client_email: Option<String>,
    pub project_id: Option<String>,
    pub quota_project_id: Option<String>,
    pub private_key_id: Option<String>,
}

/// `GOOGLE_APPLICATION_CREDENTIALS`, else the gcloud ADC file under `$HOME`.
pub fn default_adc_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("GOOGLE_APPLICATION_CREDENTIALS") {
        return Some(PathBuf::from(p));
    }
    env::var("HOME").ok().map(|home| {
        Path::new(&home)
            .join(".config/gcloud/application_default_credentials.json")
    })
}

/// Summarise a credentials JSON. The private key is never deserialized.
pub fn inspect_adc(path: &Path) -> Result<AdcReport> {
    let text = fs::read_to_string(path)?;
    let creds: CredentialsFile =
        serde_json::from_str(&text).map_err(|e| PipelineError::load(path, e))?;
    Ok(AdcReport {
        path: path.to_path_buf(),
        kind: creds.kind,
        client_email: creds.client_email,
        project_id: creds.project_id,
        quota_project_id: creds.quota_project_id,
        private_key_id: creds.private_key_id.as_deref().map(mask_secret),
    })
}
