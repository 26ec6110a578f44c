//! Process settings
//!
//! The embedding server reads its settings from the environment. Every
//! variable has a default so a bare container still starts.

use std::path::PathBuf;

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the shared registration token
pub const REGISTER_TOKEN_VAR: &str = "REGISTER_TOKEN";
/// Environment variable holding the e-mail ledger path
pub const EMAIL_FILE_PATH_VAR: &str = "EMAIL_FILE_PATH";
/// Environment variable holding the support address
pub const SUPPORT_EMAIL_VAR: &str = "SUPPORT_EMAIL";
/// Environment variable holding the snapshot path
pub const SNAPSHOT_PATH_VAR: &str = "SNAPSHOT_PATH";

const DEFAULT_REGISTER_TOKEN: &str = "TestToken";
const DEFAULT_EMAIL_FILE_PATH: &str = "/app/db/email_file.txt";
const DEFAULT_SNAPSHOT_PATH: &str = "/app/db/state.json";

/// Settings shared by the session and its collaborators
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Settings {
    /// Token a registrant must present alongside their e-mail
    #[garde(length(min = 1))]
    pub register_token: String,
    /// Append-only ledger of registered e-mails, one per line
    #[garde(skip)]
    pub email_file_path: Option<PathBuf>,
    /// Address shown to participants who need help
    #[garde(email)]
    pub support_email: Option<String>,
    /// Where the JSON snapshot of the session lives
    #[garde(skip)]
    pub snapshot_path: PathBuf,
}

/// Errors that can occur when loading settings
#[derive(Error, Debug)]
pub enum Error {
    /// A setting failed validation
    #[error("invalid settings: {0}")]
    Invalid(#[from] garde::Report),
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            register_token: DEFAULT_REGISTER_TOKEN.to_owned(),
            email_file_path: Some(PathBuf::from(DEFAULT_EMAIL_FILE_PATH)),
            support_email: None,
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment
    ///
    /// # Errors
    ///
    /// Returns `Error::Invalid` if a provided value fails validation.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary key lookup
    ///
    /// Unset keys fall back to their defaults. An empty `SUPPORT_EMAIL` or
    /// `EMAIL_FILE_PATH` disables the corresponding feature.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invalid` if a provided value fails validation.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, Error> {
        let defaults = Self::default();

        let settings = Self {
            register_token: lookup(REGISTER_TOKEN_VAR).unwrap_or(defaults.register_token),
            email_file_path: match lookup(EMAIL_FILE_PATH_VAR) {
                Some(path) if path.trim().is_empty() => None,
                Some(path) => Some(PathBuf::from(path)),
                None => defaults.email_file_path,
            },
            support_email: lookup(SUPPORT_EMAIL_VAR)
                .map(|address| address.trim().to_owned())
                .filter(|address| !address.is_empty()),
            snapshot_path: lookup(SNAPSHOT_PATH_VAR)
                .map_or(defaults.snapshot_path, PathBuf::from),
        };

        settings.validate()?;

        Ok(settings)
    }
}
