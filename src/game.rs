//! Session state and control
//!
//! This module contains the [`Session`], the single context object that owns
//! the registry, the quiz and the group board of one event and exposes
//! every operation the participant, administrator and display surfaces
//! need.
//!
//! Each part of the state sits behind its own lock. Operations always take
//! the locks in the same order (registry, quiz, board), so they cannot
//! deadlock, and every mutating operation holds all three (one of them for
//! writing) which serializes mutations against each other. A mutation
//! builds the complete next state on a copy, commits the copy to the
//! [`Store`], and only publishes it once the commit succeeded: readers
//! either see the state before or after an operation, never a part of it.

use std::io;

use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    groups::{self, Channel, Group, Groups},
    id::Id,
    leaderboard::{self, QuestionResults, QuestionScore, ScoreEntry},
    mail::{self, Delivery, Envelope, Mailer},
    partition,
    quiz::{self, QuestionStatus, Quiz},
    registration::{self, EmailFile, Participant, RegistrationForm, Registry},
    store::{self, Snapshot, SnapshotRef, Store},
};

/// Coarse phase of the session
///
/// While `New`, participants register; once `GroupsAssigned`, registration
/// is closed and participants are routed to their group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    /// Registration is open and no groups exist
    #[default]
    New,
    /// Groups have been generated
    GroupsAssigned,
}

/// Errors that can occur during session operations
///
/// All variants except [`Error::Store`], [`Error::Ledger`] and
/// [`Error::Inconsistent`] are rejections of a single request: the state
/// is left exactly as it was. The remaining ones are infrastructure
/// failures, see [`Error::is_fatal`].
#[derive(Error, Debug)]
pub enum Error {
    /// Registration was refused
    #[error(transparent)]
    Registration(#[from] registration::Error),
    /// A question status change was refused
    #[error(transparent)]
    Quiz(#[from] quiz::Error),
    /// Group generation was refused
    #[error(transparent)]
    Partition(#[from] partition::Error),
    /// An answer was refused
    #[error(transparent)]
    Answer(#[from] leaderboard::Error),
    /// A group lookup or rename was refused
    #[error(transparent)]
    Group(#[from] groups::Error),
    /// The operation needs assigned groups
    #[error("groups have not been assigned")]
    GroupsNotAssigned,
    /// Persisting the state failed
    #[error(transparent)]
    Store(#[from] store::Error),
    /// Appending to the e-mail ledger file failed
    #[error("e-mail ledger could not be written: {0}")]
    Ledger(#[source] io::Error),
    /// Generated groups broke a collection invariant
    #[error(transparent)]
    Inconsistent(#[from] groups::RestoreError),
}

impl Error {
    /// Whether the error is an infrastructure failure rather than a
    /// rejected request
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Ledger(_) | Self::Inconsistent(_))
    }
}

/// Where a participant should be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Route {
    /// Groups are not assigned yet: show the registration page
    Registration,
    /// The participant's group
    Group(Group),
    /// Groups are assigned but the participant is in none of them
    Unassigned,
}

/// The active question as groups see it
///
/// Correctness and points are left out so the display cannot leak them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    /// The question id
    pub id: Id,
    /// The question text
    pub text: String,
    /// Option texts in display order
    pub options: Vec<String>,
    /// Number of groups that answered so far
    pub answered: usize,
}

/// One row of the administrator's question list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionOverview {
    /// The question id
    pub id: Id,
    /// The question text
    pub text: String,
    /// Current status
    pub status: QuestionStatus,
    /// Number of groups that answered it
    pub answers: usize,
}

/// Group-related part of the state
#[derive(Debug, Clone, Default)]
struct Board {
    state: GameState,
    groups: Groups,
}

/// One event: participants, questions, groups and their answers
pub struct Session<S> {
    settings: Settings,
    channels: Vec<Channel>,
    email_file: Option<EmailFile>,
    store: S,

    registry: RwLock<Registry>,
    quiz: RwLock<Quiz>,
    board: RwLock<Board>,
}

impl<S: Store> Session<S> {
    /// Opens a session backed by `store`
    ///
    /// If the store holds a snapshot, the session resumes from it and
    /// `quiz` is ignored. Otherwise a fresh session with `quiz` and no
    /// participants is created and committed. Repeated channels are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the stored snapshot cannot be read or the
    /// initial commit fails.
    pub fn open(
        settings: Settings,
        store: S,
        quiz: Quiz,
        channels: Vec<Channel>,
    ) -> Result<Self, Error> {
        let (registry, quiz, board) = match store.load()? {
            Some(Snapshot {
                registry,
                quiz,
                game_state,
                groups,
            }) => {
                info!(
                    participants = registry.len(),
                    questions = quiz.len(),
                    groups = groups.len(),
                    state = ?game_state,
                    "session restored"
                );
                (
                    registry,
                    quiz,
                    Board {
                        state: game_state,
                        groups,
                    },
                )
            }
            None => {
                let registry = Registry::default();
                let board = Board::default();
                store.commit(SnapshotRef {
                    registry: &registry,
                    quiz: &quiz,
                    game_state: board.state,
                    groups: &board.groups,
                })?;
                info!(questions = quiz.len(), "session created");
                (registry, quiz, board)
            }
        };

        Ok(Self {
            email_file: settings.email_file_path.clone().map(EmailFile::new),
            settings,
            channels: channels.into_iter().unique().collect(),
            store,
            registry: RwLock::new(registry),
            quiz: RwLock::new(quiz),
            board: RwLock::new(board),
        })
    }

    /// Commits the given state, logging rejections
    fn commit(&self, registry: &Registry, quiz: &Quiz, board: &Board) -> Result<(), Error> {
        self.store
            .commit(SnapshotRef {
                registry,
                quiz,
                game_state: board.state,
                groups: &board.groups,
            })
            .map_err(|e| {
                warn!(error = %e, "state commit failed");
                Error::Store(e)
            })
    }

    /// The settings the session was opened with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The channel pool groups are bound from
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// The current phase
    pub fn game_state(&self) -> GameState {
        self.board.read().state
    }

    /// Registers a participant from a submitted form
    ///
    /// Once the participant is committed and the locks are released, the
    /// address is appended to the e-mail ledger file (when one is
    /// configured).
    ///
    /// # Returns
    ///
    /// The new participant
    ///
    /// # Errors
    ///
    /// * `registration::Error::Closed` - groups are already assigned
    /// * any error of [`Registry::check_form`] or [`Registry::admit`]
    /// * `Error::Store` - the commit failed
    /// * `Error::Ledger` - the ledger file could not be written; the
    ///   participant is registered but missing from the file
    pub fn register(&self, form: &RegistrationForm) -> Result<Participant, Error> {
        let participant = {
            let mut registry = self.registry.write();
            let quiz = self.quiz.read();
            let board = self.board.read();

            if board.state == GameState::GroupsAssigned {
                return Err(registration::Error::Closed.into());
            }

            let email = Registry::check_form(form, &self.settings.register_token)?;

            let mut next = registry.clone();
            let participant = next.admit(email)?.clone();

            self.commit(&next, &quiz, &board)?;
            *registry = next;

            info!(
                participant = %participant.id,
                participants = registry.len(),
                "registration accepted"
            );

            participant
        };

        if let Some(file) = &self.email_file {
            file.append(&participant.email).map_err(|e| {
                warn!(
                    participant = %participant.id,
                    path = %file.path().display(),
                    error = %e,
                    "e-mail ledger append failed"
                );
                Error::Ledger(e)
            })?;
        }

        Ok(participant)
    }

    /// All participants in registration order
    pub fn participants(&self) -> Vec<Participant> {
        self.registry.read().participants().to_vec()
    }

    /// Decides where a participant should be sent
    pub fn route(&self, participant: Id) -> Route {
        let board = self.board.read();
        match board.state {
            GameState::New => Route::Registration,
            GameState::GroupsAssigned => board
                .groups
                .group_of(participant)
                .cloned()
                .map_or(Route::Unassigned, Route::Group),
        }
    }

    /// Partitions all participants into groups and closes registration
    ///
    /// Any existing groups, and the answers they recorded, are replaced.
    /// On failure the previous groups and phase stay untouched.
    ///
    /// # Returns
    ///
    /// The generated groups in creation order
    ///
    /// # Errors
    ///
    /// * any error of [`partition::partition`]
    /// * `Error::Store` - the commit failed
    pub fn generate_groups(&self, min_group_size: usize) -> Result<Vec<Group>, Error> {
        let registry = self.registry.read();
        let quiz = self.quiz.read();
        let mut board = self.board.write();

        let generated = partition::partition(&registry.ids(), min_group_size, &self.channels)?;

        let next = Board {
            state: GameState::GroupsAssigned,
            groups: Groups::try_from_groups(generated)?,
        };

        self.commit(&registry, &quiz, &next)?;

        if board.state == GameState::GroupsAssigned {
            warn!(
                discarded = board.groups.len(),
                "existing groups replaced by regeneration"
            );
        }
        *board = next;

        info!(
            groups = board.groups.len(),
            sizes = ?board.groups.iter().map(|g| g.members().len()).collect_vec(),
            "groups generated"
        );

        Ok(board.groups.iter().cloned().collect())
    }

    /// Returns the session to `New`, dropping every group and answer
    ///
    /// Participants and questions are kept so the event can be replayed.
    /// Resetting a session that is already `New` does nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the commit failed.
    pub fn reset(&self) -> Result<(), Error> {
        let registry = self.registry.read();
        let quiz = self.quiz.read();
        let mut board = self.board.write();

        if board.state == GameState::New {
            return Ok(());
        }

        let next = Board::default();
        self.commit(&registry, &quiz, &next)?;

        let discarded = std::mem::replace(&mut *board, next);
        info!(discarded = discarded.groups.len(), "session reset");

        Ok(())
    }

    /// Starts a new question cycle
    ///
    /// Every question returns to `New`, the last finished question is
    /// forgotten and all recorded answers are dropped. Groups are kept.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the commit failed.
    pub fn rewind_quiz(&self) -> Result<(), Error> {
        let registry = self.registry.read();
        let mut quiz = self.quiz.write();
        let mut board = self.board.write();

        let mut next_quiz = quiz.clone();
        next_quiz.rewind();
        let mut next_board = board.clone();
        next_board.groups.clear_answers();

        self.commit(&registry, &next_quiz, &next_board)?;
        *quiz = next_quiz;
        *board = next_board;

        info!(questions = quiz.len(), "quiz rewound");

        Ok(())
    }

    /// Moves a question to a new status
    ///
    /// # Errors
    ///
    /// * any error of [`Quiz::set_status`]
    /// * `Error::Store` - the commit failed
    pub fn set_question_status(&self, id: Id, status: QuestionStatus) -> Result<(), Error> {
        let registry = self.registry.read();
        let mut quiz = self.quiz.write();
        let board = self.board.read();

        let mut next = quiz.clone();
        let previous = next.set_status(id, status)?;

        self.commit(&registry, &next, &board)?;
        *quiz = next;

        info!(question = %id, from = ?previous, to = ?status, "question status changed");

        Ok(())
    }

    /// Every question with its status and answer count
    pub fn questions(&self) -> Vec<QuestionOverview> {
        let quiz = self.quiz.read();
        let board = self.board.read();

        quiz.questions()
            .iter()
            .map(|question| QuestionOverview {
                id: question.id(),
                text: question.text().to_owned(),
                status: question.status(),
                answers: leaderboard::answer_count(&board.groups, question.id()),
            })
            .collect()
    }

    /// The active question, without correctness or points
    pub fn active_question(&self) -> Option<QuestionView> {
        let quiz = self.quiz.read();
        let board = self.board.read();

        quiz.get_active().map(|question| QuestionView {
            id: question.id(),
            text: question.text().to_owned(),
            options: question.options().iter().map(|o| o.text.clone()).collect(),
            answered: leaderboard::answer_count(&board.groups, question.id()),
        })
    }

    /// Results of the question that finished most recently
    pub fn last_finished(&self) -> Option<QuestionResults> {
        let quiz = self.quiz.read();
        let board = self.board.read();

        quiz.last_finished()
            .map(|question| leaderboard::question_results(question, &board.groups))
    }

    /// Answer statistics of any question
    ///
    /// # Errors
    ///
    /// Returns `quiz::Error::NotFound` if no question has this id.
    pub fn question_results(&self, id: Id) -> Result<QuestionResults, Error> {
        let quiz = self.quiz.read();
        let board = self.board.read();

        let question = quiz.question(id).ok_or(quiz::Error::NotFound(id))?;

        Ok(leaderboard::question_results(question, &board.groups))
    }

    /// Records a group's answer to the active question
    ///
    /// # Errors
    ///
    /// * any error of [`leaderboard::submit_answer`]
    /// * `Error::Store` - the commit failed
    pub fn submit_answer(&self, group: Id, answer: &str) -> Result<(), Error> {
        let registry = self.registry.read();
        let quiz = self.quiz.read();
        let mut board = self.board.write();

        let mut next = board.clone();
        let question = leaderboard::submit_answer(&quiz, &mut next.groups, group, answer)?;

        self.commit(&registry, &quiz, &next)?;
        *board = next;

        debug!(group = %group, question = %question, answer, "answer recorded");

        Ok(())
    }

    /// Renames a group
    ///
    /// # Returns
    ///
    /// The cleaned name that was stored
    ///
    /// # Errors
    ///
    /// * any error of [`Groups::rename`]
    /// * `Error::Store` - the commit failed
    pub fn rename_group(&self, group: Id, name: &str) -> Result<String, Error> {
        let registry = self.registry.read();
        let quiz = self.quiz.read();
        let mut board = self.board.write();

        let mut next = board.clone();
        let name = next.groups.rename(group, name)?;

        self.commit(&registry, &quiz, &next)?;
        *board = next;

        debug!(group = %group, name = %name, "group renamed");

        Ok(name)
    }

    /// Looks up a group by id
    pub fn group(&self, id: Id) -> Option<Group> {
        self.board.read().groups.get(id).cloned()
    }

    /// All groups in creation order
    pub fn groups(&self) -> Vec<Group> {
        self.board.read().groups.iter().cloned().collect()
    }

    /// Groups ranked by score, ties in creation order
    pub fn scoreboard(&self) -> Vec<ScoreEntry> {
        let quiz = self.quiz.read();
        let board = self.board.read();

        leaderboard::scoreboard(&quiz, &board.groups)
    }

    /// Points a group earned on each finished question
    ///
    /// # Errors
    ///
    /// Returns `groups::Error::UnknownGroup` if no group has this id.
    pub fn group_summary(&self, group: Id) -> Result<Vec<QuestionScore>, Error> {
        let quiz = self.quiz.read();
        let board = self.board.read();

        let group = board
            .groups
            .get(group)
            .ok_or(groups::Error::UnknownGroup(group))?;

        Ok(leaderboard::group_summary(&quiz, group))
    }

    /// Renders one announcement per group
    ///
    /// # Errors
    ///
    /// Returns `Error::GroupsNotAssigned` while the session is `New`.
    pub fn envelopes(&self) -> Result<Vec<Envelope>, Error> {
        let registry = self.registry.read();
        let board = self.board.read();

        if board.state == GameState::New {
            return Err(Error::GroupsNotAssigned);
        }

        Ok(board
            .groups
            .iter()
            .map(|group| mail::render(group, &registry, self.settings.support_email.as_deref()))
            .collect())
    }

    /// Sends every group its announcement
    ///
    /// The envelopes are rendered first and the locks released before any
    /// mail is sent. Failed deliveries are reported per group.
    ///
    /// # Errors
    ///
    /// Returns `Error::GroupsNotAssigned` while the session is `New`.
    pub fn announce_groups<M: Mailer>(&self, mailer: &M) -> Result<Vec<Delivery>, Error> {
        let envelopes = self.envelopes()?;

        let deliveries = mail::dispatch(mailer, &envelopes);

        info!(
            delivered = deliveries.iter().filter(|d| d.is_delivered()).count(),
            failed = deliveries.iter().filter(|d| !d.is_delivered()).count(),
            "group announcements sent"
        );

        Ok(deliveries)
    }
}
