//! Questions and the quiz state machine
//!
//! A quiz is loaded once from a validated [`QuizConfig`]; every question
//! starts out `New`. The administrator then moves questions through
//! `New -> Active -> Finished`. At most one question is `Active` at any
//! time, and `Finished` is terminal for the current game cycle. The quiz
//! also remembers the most recently finished question so displays can keep
//! showing its results after it closes.

use std::collections::{HashMap, HashSet};

use enum_map::{Enum, EnumMap};
use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants, id::Id};

/// Lifecycle status of a question
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum QuestionStatus {
    /// Loaded but not shown yet
    #[default]
    New,
    /// Live: groups may answer it
    Active,
    /// Closed: answers are final and count towards the score
    Finished,
}

impl QuestionStatus {
    /// Whether a question in this status may move to `next`
    ///
    /// The allowed moves are `New -> Active`, `New -> Finished` and
    /// `Active -> Finished`. Everything else, including staying put, is an
    /// invalid transition.
    pub fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Active) | (Self::New | Self::Active, Self::Finished)
        )
    }
}

/// One selectable answer of a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AnswerOption {
    /// The text shown to groups, unique within its question
    #[garde(length(min = 1, max = constants::answer_option::MAX_TEXT_LENGTH))]
    pub text: String,
    /// Whether choosing this option earns points
    #[garde(skip)]
    pub correct: bool,
    /// Points earned when this option is chosen and correct
    #[garde(range(max = constants::answer_option::MAX_POINTS))]
    #[serde(default)]
    pub points: u64,
}

type ValidationResult = garde::Result;

/// Validates that no two options of a question share their text
#[allow(clippy::ptr_arg)]
fn validate_unique_texts(options: &Vec<AnswerOption>, _ctx: &()) -> ValidationResult {
    match options.iter().map(|o| o.text.as_str()).duplicates().next() {
        Some(text) => Err(garde::Error::new(format!(
            "option \"{text}\" appears more than once"
        ))),
        None => Ok(()),
    }
}

/// Definition of a single question as loaded from a quiz document
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuestionConfig {
    /// The question text
    #[garde(length(min = 1, max = constants::quiz::MAX_TEXT_LENGTH))]
    pub text: String,
    /// The answer options, in display order
    #[garde(
        length(min = 1, max = constants::quiz::MAX_OPTION_COUNT),
        custom(validate_unique_texts),
        dive
    )]
    pub options: Vec<AnswerOption>,
}

/// A quiz document: the questions of one event in play order
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct QuizConfig {
    /// All questions of the quiz
    #[garde(length(max = constants::quiz::MAX_QUESTION_COUNT), dive)]
    pub questions: Vec<QuestionConfig>,
}

/// A question with its runtime status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: Id,
    text: String,
    options: Vec<AnswerOption>,
    status: QuestionStatus,
}

impl Question {
    /// The question's id
    pub fn id(&self) -> Id {
        self.id
    }

    /// The question text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The answer options in display order
    pub fn options(&self) -> &[AnswerOption] {
        &self.options
    }

    /// The option whose text is exactly `text`
    pub fn option(&self, text: &str) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.text == text)
    }

    /// The current status
    pub fn status(&self) -> QuestionStatus {
        self.status
    }
}

/// Errors that can occur when changing a question's status
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No question has this id
    #[error("question {0} does not exist")]
    NotFound(Id),
    /// The status change is not part of the lifecycle
    #[error("question {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// The question
        id: Id,
        /// Its current status
        from: QuestionStatus,
        /// The requested status
        to: QuestionStatus,
    },
    /// Another question is already live
    #[error("question {active} is already active")]
    AlreadyActive {
        /// The question that is currently active
        active: Id,
    },
}

/// Reasons a stored quiz cannot be restored
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    /// Two questions share an id
    #[error("question {0} appears twice")]
    DuplicateQuestion(Id),
    /// More than one question is active
    #[error("{0} questions are active at once")]
    MultipleActive(usize),
    /// The last finished pointer names a missing question
    #[error("last finished question {0} does not exist")]
    UnknownLastFinished(Id),
    /// The last finished pointer names a question that is not finished
    #[error("last finished question {0} is not finished")]
    LastFinishedNotFinished(Id),
}

/// Serialization helper for Quiz
#[derive(Deserialize)]
struct QuizSerde {
    questions: Vec<Question>,
    last_finished: Option<Id>,
}

/// The quiz state machine
///
/// Owns every question and is the only place their status changes. A
/// per-status index makes looking up the active question cheap and keeps
/// the single-active rule checkable on every write.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(try_from = "QuizSerde")]
pub struct Quiz {
    /// Questions in load order
    questions: Vec<Question>,
    /// The most recently finished question
    last_finished: Option<Id>,

    /// Question id to position in `questions`
    #[serde(skip_serializing)]
    index: HashMap<Id, usize>,
    /// Question ids grouped by status
    #[serde(skip_serializing)]
    by_status: EnumMap<QuestionStatus, HashSet<Id>>,
}

impl TryFrom<QuizSerde> for Quiz {
    type Error = RestoreError;

    fn try_from(serde: QuizSerde) -> Result<Self, Self::Error> {
        Self::try_from_questions(serde.questions, serde.last_finished)
    }
}

impl Quiz {
    /// Loads a quiz document, giving every question a fresh id and the
    /// `New` status
    ///
    /// # Errors
    ///
    /// Returns the validation report if the document breaks any limit or
    /// repeats an option text within a question.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use huddle::quiz::{AnswerOption, QuestionConfig, QuestionStatus, Quiz, QuizConfig};
    ///
    /// let quiz = Quiz::from_config(QuizConfig {
    ///     questions: vec![QuestionConfig {
    ///         text: "Largest planet?".to_owned(),
    ///         options: vec![
    ///             AnswerOption { text: "Jupiter".to_owned(), correct: true, points: 1 },
    ///             AnswerOption { text: "Mars".to_owned(), correct: false, points: 0 },
    ///         ],
    ///     }],
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(quiz.len(), 1);
    /// assert_eq!(quiz.questions()[0].status(), QuestionStatus::New);
    /// assert!(quiz.get_active().is_none());
    /// ```
    pub fn from_config(config: QuizConfig) -> Result<Self, garde::Report> {
        config.validate()?;

        let questions = config
            .questions
            .into_iter()
            .map(|QuestionConfig { text, options }| Question {
                id: Id::new(),
                text,
                options,
                status: QuestionStatus::New,
            })
            .collect_vec();

        let index = questions
            .iter()
            .enumerate()
            .map(|(position, question)| (question.id, position))
            .collect();
        let mut by_status: EnumMap<QuestionStatus, HashSet<Id>> = EnumMap::default();
        by_status[QuestionStatus::New].extend(questions.iter().map(|q| q.id));

        Ok(Self {
            questions,
            last_finished: None,
            index,
            by_status,
        })
    }

    /// Rebuilds a quiz from stored questions, checking its invariants
    ///
    /// # Errors
    ///
    /// Returns a `RestoreError` if ids repeat, more than one question is
    /// active, or the last finished pointer does not name a finished
    /// question.
    pub fn try_from_questions(
        questions: Vec<Question>,
        last_finished: Option<Id>,
    ) -> Result<Self, RestoreError> {
        let mut index = HashMap::new();
        let mut by_status: EnumMap<QuestionStatus, HashSet<Id>> = EnumMap::default();

        for (position, question) in questions.iter().enumerate() {
            if index.insert(question.id, position).is_some() {
                return Err(RestoreError::DuplicateQuestion(question.id));
            }
            by_status[question.status].insert(question.id);
        }

        let active_count = by_status[QuestionStatus::Active].len();
        if active_count > 1 {
            return Err(RestoreError::MultipleActive(active_count));
        }

        if let Some(id) = last_finished {
            if !index.contains_key(&id) {
                return Err(RestoreError::UnknownLastFinished(id));
            }
            if !by_status[QuestionStatus::Finished].contains(&id) {
                return Err(RestoreError::LastFinishedNotFinished(id));
            }
        }

        Ok(Self {
            questions,
            last_finished,
            index,
            by_status,
        })
    }

    /// All questions in load order
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Number of questions
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the quiz has no questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Looks up a question by id
    pub fn question(&self, id: Id) -> Option<&Question> {
        self.index.get(&id).and_then(|p| self.questions.get(*p))
    }

    /// The question that is currently active, if any
    pub fn get_active(&self) -> Option<&Question> {
        self.by_status[QuestionStatus::Active]
            .iter()
            .next()
            .and_then(|id| self.question(*id))
    }

    /// The question that finished most recently, if any
    pub fn last_finished(&self) -> Option<&Question> {
        self.last_finished.and_then(|id| self.question(id))
    }

    /// Number of questions holding `status`
    pub fn status_count(&self, status: QuestionStatus) -> usize {
        self.by_status[status].len()
    }

    /// Finished questions in load order
    pub fn finished(&self) -> impl Iterator<Item = &Question> {
        self.questions
            .iter()
            .filter(|q| q.status == QuestionStatus::Finished)
    }

    /// Moves a question to a new status
    ///
    /// The single-active rule is checked against the status index in the
    /// same call that writes the new status. Finishing a question makes it
    /// the last finished question.
    ///
    /// # Returns
    ///
    /// The status the question held before the change
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - no question has this id
    /// * `Error::InvalidTransition` - the move is not allowed by
    ///   [`QuestionStatus::allows`]
    /// * `Error::AlreadyActive` - activating while another question is
    ///   active
    pub fn set_status(&mut self, id: Id, status: QuestionStatus) -> Result<QuestionStatus, Error> {
        let position = *self.index.get(&id).ok_or(Error::NotFound(id))?;
        let current = self.questions[position].status;

        if !current.allows(status) {
            return Err(Error::InvalidTransition {
                id,
                from: current,
                to: status,
            });
        }

        if status == QuestionStatus::Active {
            if let Some(active) = self.by_status[QuestionStatus::Active].iter().next() {
                return Err(Error::AlreadyActive { active: *active });
            }
        }

        self.by_status[current].remove(&id);
        self.by_status[status].insert(id);
        self.questions[position].status = status;

        if status == QuestionStatus::Finished {
            self.last_finished = Some(id);
        }

        Ok(current)
    }

    /// Starts a new game cycle: every question becomes `New` again and the
    /// last finished pointer is cleared
    pub fn rewind(&mut self) {
        for question in &mut self.questions {
            question.status = QuestionStatus::New;
        }
        self.last_finished = None;
        self.by_status = EnumMap::default();
        self.by_status[QuestionStatus::New].extend(self.questions.iter().map(|q| q.id));
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn option(text: &str, correct: bool, points: u64) -> AnswerOption {
        AnswerOption {
            text: text.to_owned(),
            correct,
            points,
        }
    }

    fn question_config(text: &str) -> QuestionConfig {
        QuestionConfig {
            text: text.to_owned(),
            options: vec![
                option("a", false, 0),
                option("b", true, 1),
                option("c", false, 0),
            ],
        }
    }

    fn create_test_quiz(count: usize) -> Quiz {
        Quiz::from_config(QuizConfig {
            questions: (0..count)
                .map(|i| question_config(&format!("Question {i}")))
                .collect(),
        })
        .unwrap()
    }

    fn ids(quiz: &Quiz) -> Vec<Id> {
        quiz.questions().iter().map(Question::id).collect()
    }

    #[test]
    fn test_transition_table() {
        use QuestionStatus::*;

        assert!(New.allows(Active));
        assert!(New.allows(Finished));
        assert!(Active.allows(Finished));

        assert!(!New.allows(New));
        assert!(!Active.allows(Active));
        assert!(!Active.allows(New));
        assert!(!Finished.allows(New));
        assert!(!Finished.allows(Active));
        assert!(!Finished.allows(Finished));
    }

    #[test]
    fn test_loaded_questions_are_new() {
        let quiz = create_test_quiz(3);

        assert_eq!(quiz.len(), 3);
        assert_eq!(quiz.status_count(QuestionStatus::New), 3);
        assert!(quiz.get_active().is_none());
        assert!(quiz.last_finished().is_none());
    }

    #[test]
    fn test_activate_and_finish() {
        let mut quiz = create_test_quiz(2);
        let [q1, _] = ids(&quiz)[..] else {
            unreachable!()
        };

        assert_eq!(
            quiz.set_status(q1, QuestionStatus::Active),
            Ok(QuestionStatus::New)
        );
        assert_eq!(quiz.get_active().unwrap().id(), q1);

        assert_eq!(
            quiz.set_status(q1, QuestionStatus::Finished),
            Ok(QuestionStatus::Active)
        );
        assert!(quiz.get_active().is_none());
        assert_eq!(quiz.last_finished().unwrap().id(), q1);
    }

    #[test]
    fn test_second_activation_rejected() {
        let mut quiz = create_test_quiz(2);
        let [q1, q2] = ids(&quiz)[..] else {
            unreachable!()
        };

        quiz.set_status(q1, QuestionStatus::Active).unwrap();

        assert_eq!(
            quiz.set_status(q2, QuestionStatus::Active),
            Err(Error::AlreadyActive { active: q1 })
        );
        assert_eq!(quiz.question(q1).unwrap().status(), QuestionStatus::Active);
        assert_eq!(quiz.question(q2).unwrap().status(), QuestionStatus::New);
        assert_eq!(quiz.status_count(QuestionStatus::Active), 1);
    }

    #[test]
    fn test_finishing_twice_rejected() {
        let mut quiz = create_test_quiz(1);
        let q = ids(&quiz)[0];

        quiz.set_status(q, QuestionStatus::Finished).unwrap();
        let before = quiz.clone();

        assert_eq!(
            quiz.set_status(q, QuestionStatus::Finished),
            Err(Error::InvalidTransition {
                id: q,
                from: QuestionStatus::Finished,
                to: QuestionStatus::Finished,
            })
        );
        assert_eq!(quiz.questions(), before.questions());
        assert_eq!(quiz.last_finished().unwrap().id(), q);
    }

    #[test]
    fn test_reactivation_rejected() {
        let mut quiz = create_test_quiz(1);
        let q = ids(&quiz)[0];

        quiz.set_status(q, QuestionStatus::Active).unwrap();
        quiz.set_status(q, QuestionStatus::Finished).unwrap();

        assert!(matches!(
            quiz.set_status(q, QuestionStatus::Active),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            quiz.set_status(q, QuestionStatus::New),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_unknown_question() {
        let mut quiz = create_test_quiz(1);
        let missing = Id::new();

        assert_eq!(
            quiz.set_status(missing, QuestionStatus::Active),
            Err(Error::NotFound(missing))
        );
    }

    #[test]
    fn test_last_finished_is_overwritten() {
        let mut quiz = create_test_quiz(3);
        let [q1, q2, q3] = ids(&quiz)[..] else {
            unreachable!()
        };

        quiz.set_status(q1, QuestionStatus::Finished).unwrap();
        quiz.set_status(q3, QuestionStatus::Active).unwrap();
        quiz.set_status(q3, QuestionStatus::Finished).unwrap();
        assert_eq!(quiz.last_finished().unwrap().id(), q3);

        quiz.set_status(q2, QuestionStatus::Finished).unwrap();
        assert_eq!(quiz.last_finished().unwrap().id(), q2);
        assert_eq!(
            quiz.finished().map(Question::id).collect_vec(),
            vec![q1, q2, q3]
        );
    }

    #[test]
    fn test_at_most_one_active_through_sequence() {
        let mut quiz = create_test_quiz(4);
        let all = ids(&quiz);

        for (i, id) in all.iter().enumerate() {
            for other in &all {
                let _ = quiz.set_status(*other, QuestionStatus::Active);
                assert!(quiz.status_count(QuestionStatus::Active) <= 1);
            }
            if i % 2 == 0 {
                let _ = quiz.set_status(*id, QuestionStatus::Finished);
            }
            if let Some(active) = quiz.get_active().map(Question::id) {
                quiz.set_status(active, QuestionStatus::Finished).unwrap();
            }
            assert!(quiz.status_count(QuestionStatus::Active) <= 1);
        }
    }

    #[test]
    fn test_rewind() {
        let mut quiz = create_test_quiz(2);
        let [q1, q2] = ids(&quiz)[..] else {
            unreachable!()
        };

        quiz.set_status(q1, QuestionStatus::Finished).unwrap();
        quiz.set_status(q2, QuestionStatus::Active).unwrap();

        quiz.rewind();

        assert_eq!(quiz.status_count(QuestionStatus::New), 2);
        assert!(quiz.get_active().is_none());
        assert!(quiz.last_finished().is_none());
        assert!(quiz.set_status(q1, QuestionStatus::Active).is_ok());
    }

    #[test]
    fn test_option_lookup_is_exact() {
        let quiz = create_test_quiz(1);
        let question = &quiz.questions()[0];

        assert!(question.option("b").unwrap().correct);
        assert!(question.option("B").is_none());
        assert!(question.option(" b").is_none());
    }

    #[test]
    fn test_config_rejects_duplicate_option_texts() {
        let mut config = question_config("Q");
        config.options.push(option("a", true, 3));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_limits() {
        let mut config = question_config("Q");
        config.options.clear();
        assert!(config.validate().is_err());

        let mut config = question_config("");
        assert!(config.validate().is_err());
        config.text = "a".repeat(constants::quiz::MAX_TEXT_LENGTH + 1);
        assert!(config.validate().is_err());

        let config = QuestionConfig {
            text: "Q".to_owned(),
            options: (0..=constants::quiz::MAX_OPTION_COUNT)
                .map(|i| option(&i.to_string(), false, 0))
                .collect(),
        };
        assert!(config.validate().is_err());

        let quiz = QuizConfig {
            questions: vec![question_config("Q"); constants::quiz::MAX_QUESTION_COUNT + 1],
        };
        assert!(Quiz::from_config(quiz).is_err());
    }

    #[test]
    fn test_config_point_limit() {
        let mut config = question_config("Q");
        config.options[1].points = constants::answer_option::MAX_POINTS;
        assert!(config.validate().is_ok());

        config.options[1].points = constants::answer_option::MAX_POINTS + 1;
        assert!(config.validate().is_err());

        config.options[1].points = u64::MAX;
        assert!(
            Quiz::from_config(QuizConfig {
                questions: vec![config]
            })
            .is_err()
        );
    }

    #[test]
    fn test_config_from_json() {
        let config: QuizConfig = serde_json::from_str(
            r#"{"questions":[{"text":"2+2?","options":[
                {"text":"4","correct":true,"points":2},
                {"text":"5","correct":false}
            ]}]}"#,
        )
        .unwrap();

        let quiz = Quiz::from_config(config).unwrap();
        let question = &quiz.questions()[0];
        assert_eq!(question.option("4").unwrap().points, 2);
        assert_eq!(question.option("5").unwrap().points, 0);
    }

    #[test]
    fn test_restore_round_trip() {
        let mut quiz = create_test_quiz(3);
        let [q1, q2, _] = ids(&quiz)[..] else {
            unreachable!()
        };
        quiz.set_status(q1, QuestionStatus::Finished).unwrap();
        quiz.set_status(q2, QuestionStatus::Active).unwrap();

        let json = serde_json::to_string(&quiz).unwrap();
        assert!(!json.contains("by_status"));

        let restored: Quiz = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.get_active().unwrap().id(), q2);
        assert_eq!(restored.last_finished().unwrap().id(), q1);
        assert_eq!(restored.status_count(QuestionStatus::New), 1);
    }

    #[test]
    fn test_restore_rejects_two_active() {
        let quiz = create_test_quiz(2);
        let questions = quiz
            .questions()
            .iter()
            .cloned()
            .map(|mut q| {
                q.status = QuestionStatus::Active;
                q
            })
            .collect_vec();

        assert_eq!(
            Quiz::try_from_questions(questions, None).unwrap_err(),
            RestoreError::MultipleActive(2)
        );
    }

    #[test]
    fn test_restore_rejects_bad_last_finished() {
        let quiz = create_test_quiz(1);
        let q = ids(&quiz)[0];
        let missing = Id::new();

        assert_eq!(
            Quiz::try_from_questions(quiz.questions().to_vec(), Some(missing)).unwrap_err(),
            RestoreError::UnknownLastFinished(missing)
        );
        assert_eq!(
            Quiz::try_from_questions(quiz.questions().to_vec(), Some(q)).unwrap_err(),
            RestoreError::LastFinishedNotFinished(q)
        );
    }
}
