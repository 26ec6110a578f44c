//! Answer recording and scoring
//!
//! This module validates answer submissions against the quiz and reduces
//! the recorded answers of finished questions into scores. Nothing here is
//! cached: the scoreboard, per-group summaries and per-question results are
//! recomputed from the groups and the quiz on every call, so they can never
//! drift from the answers they are derived from.

use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::{
    groups::{Group, Groups},
    id::Id,
    quiz::{Question, QuestionStatus, Quiz},
};

/// Errors that can occur when submitting an answer
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No group has this id
    #[error("group {0} does not exist")]
    UnknownGroup(Id),
    /// No question is currently accepting answers
    #[error("no question is active")]
    NoActiveQuestion,
    /// The answer does not match any option of the active question
    #[error("\"{answer}\" is not an option of question {question}")]
    InvalidAnswer {
        /// The active question
        question: Id,
        /// The rejected answer text
        answer: String,
    },
}

/// Records a group's answer to the active question
///
/// Validation happens in a fixed order: the group must exist, a question
/// must be active, and `answer` must equal the text of one of its options.
/// A previous answer by the same group to the same question is replaced.
///
/// # Arguments
///
/// * `quiz` - the quiz whose active question is being answered
/// * `groups` - the group collection holding the answers
/// * `group` - the answering group
/// * `answer` - text of the chosen option, matched exactly
///
/// # Returns
///
/// The id of the question that was answered
///
/// # Errors
///
/// * `Error::UnknownGroup` - no group has this id
/// * `Error::NoActiveQuestion` - no question is active
/// * `Error::InvalidAnswer` - the text matches none of the options
pub fn submit_answer(
    quiz: &Quiz,
    groups: &mut Groups,
    group: Id,
    answer: &str,
) -> Result<Id, Error> {
    if groups.get(group).is_none() {
        return Err(Error::UnknownGroup(group));
    }

    let question = quiz.get_active().ok_or(Error::NoActiveQuestion)?;

    let option = question.option(answer).ok_or_else(|| Error::InvalidAnswer {
        question: question.id(),
        answer: answer.to_owned(),
    })?;

    groups
        .record_answer(group, question.id(), option.text.clone())
        .map_err(|_| Error::UnknownGroup(group))?;

    Ok(question.id())
}

/// Points a group earned on one question
///
/// Only finished questions score. The group earns the option's points if
/// its recorded answer is a correct option, otherwise nothing.
pub fn points_for(question: &Question, group: &Group) -> u64 {
    if question.status() != QuestionStatus::Finished {
        return 0;
    }

    group
        .answer_for(question.id())
        .and_then(|answer| question.option(&answer.option))
        .filter(|option| option.correct)
        .map_or(0, |option| option.points)
}

/// Total points of a group over every finished question
///
/// The total saturates at `u64::MAX`.
pub fn group_score(quiz: &Quiz, group: &Group) -> u64 {
    quiz.finished()
        .map(|q| points_for(q, group))
        .fold(0, u64::saturating_add)
}

/// One row of the scoreboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreEntry {
    /// The group's id
    pub group: Id,
    /// The group's display name
    pub name: String,
    /// Total points earned
    pub score: u64,
}

/// Ranks every group by total score
///
/// Groups are sorted by descending score. The sort is stable, so groups
/// with equal scores keep their creation order.
///
/// # Examples
///
/// ```rust
/// use huddle::{groups::Groups, leaderboard::scoreboard, quiz::Quiz};
///
/// assert!(scoreboard(&Quiz::default(), &Groups::default()).is_empty());
/// ```
pub fn scoreboard(quiz: &Quiz, groups: &Groups) -> Vec<ScoreEntry> {
    groups
        .iter()
        .map(|group| ScoreEntry {
            group: group.id(),
            name: group.name().to_owned(),
            score: group_score(quiz, group),
        })
        .sorted_by(|a, b| b.score.cmp(&a.score))
        .collect()
}

/// Points a group earned on a single finished question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuestionScore {
    /// The finished question
    pub question: Id,
    /// Points earned on it
    pub points: u64,
}

/// Per-question breakdown of a group's score, in quiz order
///
/// Every finished question is listed, including those the group did not
/// answer or answered wrongly.
pub fn group_summary(quiz: &Quiz, group: &Group) -> Vec<QuestionScore> {
    quiz.finished()
        .map(|question| QuestionScore {
            question: question.id(),
            points: points_for(question, group),
        })
        .collect()
}

/// Number of groups that recorded an answer to `question`
pub fn answer_count(groups: &Groups, question: Id) -> usize {
    groups
        .iter()
        .filter(|g| g.answer_for(question).is_some())
        .count()
}

/// How often one option was chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionResult {
    /// The option text
    pub text: String,
    /// Whether the option is correct
    pub correct: bool,
    /// Points the option is worth when correct
    pub points: u64,
    /// Number of groups whose answer is this option
    pub count: usize,
}

/// Answer statistics of one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionResults {
    /// The question
    pub question: Id,
    /// The question text
    pub text: String,
    /// Per-option counts in display order
    pub options: Vec<OptionResult>,
    /// Number of groups that answered at all
    pub answered: usize,
}

/// Tallies the answers every group gave to `question`
pub fn question_results(question: &Question, groups: &Groups) -> QuestionResults {
    let chosen = groups
        .iter()
        .filter_map(|g| g.answer_for(question.id()))
        .map(|a| a.option.as_str())
        .counts();

    QuestionResults {
        question: question.id(),
        text: question.text().to_owned(),
        options: question
            .options()
            .iter()
            .map(|option| OptionResult {
                text: option.text.clone(),
                correct: option.correct,
                points: option.points,
                count: chosen.get(option.text.as_str()).copied().unwrap_or_default(),
            })
            .collect(),
        answered: chosen.values().sum(),
    }
}
