//! Participant registration
//!
//! This module keeps the ledger of participants who opted in. The ledger is
//! append-only and does not deduplicate e-mails: the same address may
//! register twice and simply receives two participant ids. Accepted
//! addresses can additionally be appended to a plain text file, one per
//! line, for export to mailing tools.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

use crate::{constants, id::Id};

/// A registration request as submitted by a prospective participant
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegistrationForm {
    /// The participant's e-mail address
    #[garde(email, length(max = constants::registration::MAX_EMAIL_LENGTH))]
    pub email: String,
    /// Shared token handed out at the event
    #[garde(skip)]
    pub token: String,
    /// Whether the participant agreed to be contacted
    #[garde(skip)]
    #[serde(default)]
    pub consent: bool,
}

/// A registered participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Opaque identity issued at registration
    pub id: Id,
    /// Normalized e-mail address
    pub email: String,
    /// When the registration was accepted
    pub registered_at: SystemTime,
}

/// Errors that can occur while registering
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The e-mail address is not syntactically valid
    #[error("e-mail address is invalid")]
    InvalidEmail,
    /// The registration token does not match
    #[error("registration token is invalid")]
    InvalidToken,
    /// The participant did not give consent
    #[error("consent is required")]
    MissingConsent,
    /// Groups have been assigned, registration is over
    #[error("registration is closed")]
    Closed,
    /// The ledger reached its capacity
    #[error("maximum number of participants reached")]
    Full,
}

/// Reasons a stored ledger cannot be restored
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    /// Two participants share an id
    #[error("participant {0} appears twice")]
    DuplicateParticipant(Id),
}

/// Serialization helper for Registry
#[derive(Deserialize)]
struct RegistrySerde {
    participants: Vec<Participant>,
}

/// The participant ledger
///
/// Participants are kept in registration order; the id index is rebuilt
/// whenever the ledger is restored.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(try_from = "RegistrySerde")]
pub struct Registry {
    participants: Vec<Participant>,

    #[serde(skip_serializing)]
    index: HashMap<Id, usize>,
}

impl TryFrom<RegistrySerde> for Registry {
    type Error = RestoreError;

    fn try_from(serde: RegistrySerde) -> Result<Self, Self::Error> {
        Self::try_from_participants(serde.participants)
    }
}

impl Registry {
    /// Rebuilds a ledger from stored participants
    ///
    /// # Errors
    ///
    /// Returns `RestoreError::DuplicateParticipant` if two participants
    /// share an id.
    pub fn try_from_participants(participants: Vec<Participant>) -> Result<Self, RestoreError> {
        let mut index = HashMap::new();
        for (position, participant) in participants.iter().enumerate() {
            if index.insert(participant.id, position).is_some() {
                return Err(RestoreError::DuplicateParticipant(participant.id));
            }
        }

        Ok(Self {
            participants,
            index,
        })
    }

    /// Checks a registration form and returns the normalized e-mail
    ///
    /// The address is trimmed and lowercased before validation.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidEmail` - the address is malformed or too long
    /// * `Error::InvalidToken` - the token differs from `expected_token`
    /// * `Error::MissingConsent` - consent was not given
    pub fn check_form(form: &RegistrationForm, expected_token: &str) -> Result<String, Error> {
        let normalized = RegistrationForm {
            email: form.email.trim().to_lowercase(),
            ..form.clone()
        };

        if normalized.validate().is_err() {
            return Err(Error::InvalidEmail);
        }
        if normalized.token != expected_token {
            return Err(Error::InvalidToken);
        }
        if !normalized.consent {
            return Err(Error::MissingConsent);
        }

        Ok(normalized.email)
    }

    /// Appends a participant with a fresh id
    ///
    /// # Errors
    ///
    /// Returns `Error::Full` once the ledger holds
    /// `MAX_PARTICIPANT_COUNT` participants.
    pub fn admit(&mut self, email: String) -> Result<&Participant, Error> {
        if self.participants.len() >= constants::registration::MAX_PARTICIPANT_COUNT {
            return Err(Error::Full);
        }

        let participant = Participant {
            id: Id::new(),
            email,
            registered_at: SystemTime::now(),
        };
        let position = self.participants.len();
        self.index.insert(participant.id, position);
        self.participants.push(participant);

        Ok(&self.participants[position])
    }

    /// Looks up a participant by id
    pub fn get(&self, id: Id) -> Option<&Participant> {
        self.index
            .get(&id)
            .and_then(|position| self.participants.get(*position))
    }

    /// All participants in registration order
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Participant ids in registration order
    pub fn ids(&self) -> Vec<Id> {
        self.participants.iter().map(|p| p.id).collect()
    }

    /// Number of registered participants
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether nobody registered yet
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Plain text export of registered e-mails
#[derive(Debug, Clone)]
pub struct EmailFile {
    path: PathBuf,
}

impl EmailFile {
    /// Creates a handle to the ledger file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one address as a new line, creating the file if needed
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while opening or writing the file.
    pub fn append(&self, email: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{email}")
    }

    /// Reads every recorded address, skipping blank lines
    ///
    /// A missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than the file not existing.
    pub fn read_all(&self) -> io::Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
