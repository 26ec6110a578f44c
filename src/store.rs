//! Persistence boundary
//!
//! The session keeps its whole state in memory and hands a complete
//! snapshot to a [`Store`] after every mutation. A commit either persists
//! the full snapshot or fails without touching the previously stored one,
//! so a crash or rejected write never leaves a half-updated state behind.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::Settings, game::GameState, groups::Groups, quiz::Quiz, registration::Registry,
};

/// Errors raised by a store
///
/// Every store error is an infrastructure failure; the session aborts the
/// operation that triggered it.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading or writing the backing medium failed
    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The snapshot could not be encoded
    #[error("snapshot could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    /// The stored snapshot is unreadable or breaks an invariant
    #[error("stored state is corrupt: {0}")]
    Corrupt(String),
    /// The store refused the commit
    #[error("commit rejected: {0}")]
    Rejected(String),
}

/// Borrowed view of the session state, written on commit
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SnapshotRef<'a> {
    /// Registered participants
    pub registry: &'a Registry,
    /// Questions and their statuses
    pub quiz: &'a Quiz,
    /// Session phase
    pub game_state: GameState,
    /// Groups with their answers
    pub groups: &'a Groups,
}

/// Owned session state, read back on load
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    /// Registered participants
    pub registry: Registry,
    /// Questions and their statuses
    pub quiz: Quiz,
    /// Session phase
    pub game_state: GameState,
    /// Groups with their answers
    pub groups: Groups,
}

impl Snapshot {
    /// Decodes a snapshot and checks it
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupt` if the text is not a valid snapshot or the
    /// decoded state is inconsistent.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let snapshot: Self =
            serde_json::from_str(text).map_err(|e| Error::Corrupt(e.to_string()))?;
        snapshot.check()?;
        Ok(snapshot)
    }

    /// Checks the invariants spanning more than one part of the state
    ///
    /// Each part validates itself while it is decoded; this covers the
    /// rules between them: a `New` session has no groups, every group
    /// member is a registered participant, and every recorded answer names
    /// a known question and one of its options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupt` describing the first broken rule.
    pub fn check(&self) -> Result<(), Error> {
        if self.game_state == GameState::New && !self.groups.is_empty() {
            return Err(Error::Corrupt(format!(
                "{} groups exist before groups were assigned",
                self.groups.len()
            )));
        }

        for group in &self.groups {
            if let Some(member) = group
                .members()
                .iter()
                .find(|m| self.registry.get(**m).is_none())
            {
                return Err(Error::Corrupt(format!(
                    "group {} contains unknown participant {member}",
                    group.id()
                )));
            }

            for answer in group.answers() {
                let question = self.quiz.question(answer.question).ok_or_else(|| {
                    Error::Corrupt(format!(
                        "group {} answered unknown question {}",
                        group.id(),
                        answer.question
                    ))
                })?;
                if question.option(&answer.option).is_none() {
                    return Err(Error::Corrupt(format!(
                        "group {} answered \"{}\", which is not an option of question {}",
                        group.id(),
                        answer.option,
                        answer.question
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Durable home of the session state
///
/// Implementations must make `commit` all-or-nothing: after a failed
/// commit, `load` still returns the previously committed snapshot.
pub trait Store {
    /// Reads the last committed snapshot
    ///
    /// # Returns
    ///
    /// `None` if nothing was committed yet
    ///
    /// # Errors
    ///
    /// Returns an error if the medium is unreadable or the stored snapshot
    /// is corrupt.
    fn load(&self) -> Result<Option<Snapshot>, Error>;

    /// Persists a complete snapshot, replacing the previous one
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot was not persisted.
    fn commit(&self, snapshot: SnapshotRef<'_>) -> Result<(), Error>;
}

/// Stores the snapshot as a JSON file
///
/// Commits write a sibling temporary file first and rename it over the
/// target, which replaces the file in one step.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store backed by the configured snapshot path
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.snapshot_path.clone())
    }

    /// The snapshot location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Store for JsonFileStore {
    fn load(&self) -> Result<Option<Snapshot>, Error> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Snapshot::from_json(&text).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn commit(&self, snapshot: SnapshotRef<'_>) -> Result<(), Error> {
        let encoded = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        fs::write(&temp, encoded)?;
        fs::rename(&temp, &self.path)?;

        Ok(())
    }
}

/// Keeps the encoded snapshot in memory
///
/// Commits can be switched off to simulate an unreachable backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    encoded: Mutex<Option<String>>,
    rejecting: AtomicBool,
    commits: Mutex<usize>,
}

impl MemoryStore {
    /// Creates an empty store that accepts commits
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following commit fail (or succeed again)
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// The last committed snapshot as JSON
    pub fn contents(&self) -> Option<String> {
        self.encoded.lock().clone()
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> usize {
        *self.commits.lock()
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<Option<Snapshot>, Error> {
        self.encoded
            .lock()
            .as_deref()
            .map(Snapshot::from_json)
            .transpose()
    }

    fn commit(&self, snapshot: SnapshotRef<'_>) -> Result<(), Error> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(Error::Rejected("store is not accepting commits".to_owned()));
        }

        let encoded = serde_json::to_string(&snapshot)?;
        *self.encoded.lock() = Some(encoded);
        *self.commits.lock() += 1;

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{
        groups::{Channel, Group},
        id::Id,
        quiz::{AnswerOption, QuestionConfig, QuestionStatus, QuizConfig},
    };

    fn sample_state() -> (Registry, Quiz, Groups) {
        let mut registry = Registry::default();
        let member = registry.admit("ada@example.org".to_owned()).unwrap().id;

        let mut quiz = Quiz::from_config(QuizConfig {
            questions: vec![QuestionConfig {
                text: "Q".to_owned(),
                options: vec![AnswerOption {
                    text: "yes".to_owned(),
                    correct: true,
                    points: 1,
                }],
            }],
        })
        .unwrap();
        let question = quiz.questions()[0].id();
        quiz.set_status(question, QuestionStatus::Active).unwrap();

        let mut groups = Groups::try_from_groups(vec![Group::new(
            "Group 1".to_owned(),
            Channel::from("https://chat.example/1".to_owned()),
            vec![member],
        )])
        .unwrap();
        let group = groups.iter().next().unwrap().id();
        groups
            .record_answer(group, question, "yes".to_owned())
            .unwrap();

        (registry, quiz, groups)
    }

    fn snapshot<'a>(
        registry: &'a Registry,
        quiz: &'a Quiz,
        game_state: GameState,
        groups: &'a Groups,
    ) -> SnapshotRef<'a> {
        SnapshotRef {
            registry,
            quiz,
            game_state,
            groups,
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());

        let (registry, quiz, groups) = sample_state();
        store
            .commit(snapshot(&registry, &quiz, GameState::GroupsAssigned, &groups))
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.game_state, GameState::GroupsAssigned);
        assert_eq!(loaded.registry.len(), 1);
        assert_eq!(
            loaded.quiz.get_active().map(|q| q.id()),
            quiz.get_active().map(|q| q.id())
        );
        assert_eq!(
            loaded.groups.iter().next().unwrap().members(),
            registry.ids().as_slice()
        );
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn test_rejected_commit_keeps_previous_snapshot() {
        let store = MemoryStore::new();
        let (registry, quiz, groups) = sample_state();
        store
            .commit(snapshot(&registry, &quiz, GameState::GroupsAssigned, &groups))
            .unwrap();
        let before = store.contents();

        store.set_rejecting(true);
        let empty = Groups::default();
        assert!(matches!(
            store.commit(snapshot(&registry, &quiz, GameState::New, &empty)),
            Err(Error::Rejected(_))
        ));

        assert_eq!(store.contents(), before);
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn test_groups_in_new_state_are_corrupt() {
        let (registry, quiz, groups) = sample_state();
        let json =
            serde_json::to_string(&snapshot(&registry, &quiz, GameState::New, &groups)).unwrap();

        assert!(matches!(
            Snapshot::from_json(&json),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_unknown_member_is_corrupt() {
        let (_, quiz, groups) = sample_state();
        let registry = Registry::default();
        let json = serde_json::to_string(&snapshot(
            &registry,
            &quiz,
            GameState::GroupsAssigned,
            &groups,
        ))
        .unwrap();

        assert!(matches!(
            Snapshot::from_json(&json),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_answer_to_unknown_question_is_corrupt() {
        let (registry, _, groups) = sample_state();
        let quiz = Quiz::default();
        let json = serde_json::to_string(&snapshot(
            &registry,
            &quiz,
            GameState::GroupsAssigned,
            &groups,
        ))
        .unwrap();

        assert!(matches!(
            Snapshot::from_json(&json),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_repeated_participant_is_corrupt() {
        let (registry, quiz, groups) = sample_state();
        let json = serde_json::to_string(&snapshot(
            &registry,
            &quiz,
            GameState::GroupsAssigned,
            &groups,
        ))
        .unwrap();

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let participants = value["registry"]["participants"].as_array_mut().unwrap();
        let first = participants[0].clone();
        participants.push(first);

        assert!(matches!(
            Snapshot::from_json(&value.to_string()),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            Snapshot::from_json("{\"registry\": 3}"),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_json_file_store() {
        let dir = std::env::temp_dir().join(format!("huddle-store-{}", Id::new()));
        let store = JsonFileStore::from_settings(&Settings {
            snapshot_path: dir.join("state.json"),
            ..Settings::default()
        });
        assert_eq!(store.path(), dir.join("state.json"));

        assert!(store.load().unwrap().is_none());

        let (registry, quiz, groups) = sample_state();
        store
            .commit(snapshot(&registry, &quiz, GameState::GroupsAssigned, &groups))
            .unwrap();

        assert!(store.path().exists());
        assert!(!store.temp_path().exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.groups.len(), 1);

        fs::write(store.path(), "not json").unwrap();
        assert!(matches!(store.load(), Err(Error::Corrupt(_))));

        fs::remove_dir_all(&dir).unwrap();
    }
}
