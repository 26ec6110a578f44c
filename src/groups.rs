//! Groups, channels and recorded answers
//!
//! A group is a fixed set of participants bound to exactly one channel. Each
//! group owns its own answers, at most one per question: recording a new
//! answer for a question replaces the previous one. The `Groups` collection
//! owns every group in creation order and resolves groups by id and by
//! member through index maps rebuilt on restore.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

use crate::{constants, id::Id};

/// A pre-provisioned communication address, such as a chat room link
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    /// The address as text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parses a channel pool, one address per line
///
/// Surrounding whitespace is trimmed; blank lines, overlong addresses and
/// repeated addresses are dropped so that every channel stays unique.
pub fn parse_channels(text: &str) -> Vec<Channel> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && line.chars().count() <= constants::group::MAX_CHANNEL_LENGTH
        })
        .unique()
        .map(|line| Channel(line.to_owned()))
        .collect()
}

/// An answer a group recorded for one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// The question answered
    pub question: Id,
    /// Text of the chosen option
    pub option: String,
    /// When this answer was recorded
    pub submitted_at: SystemTime,
}

/// A group of participants bound to one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    id: Id,
    name: String,
    channel: Channel,
    members: Vec<Id>,
    answers: Vec<Answer>,
}

impl Group {
    /// Creates a group with a fresh id and no answers
    pub fn new(name: String, channel: Channel, members: Vec<Id>) -> Self {
        Self {
            id: Id::new(),
            name,
            channel,
            members,
            answers: Vec::new(),
        }
    }

    /// The group's id
    pub fn id(&self) -> Id {
        self.id
    }

    /// The group's display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The channel bound to this group
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Participants in this group
    pub fn members(&self) -> &[Id] {
        &self.members
    }

    /// Every recorded answer, in the order questions were first answered
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    /// The current answer for `question`, if any
    pub fn answer_for(&self, question: Id) -> Option<&Answer> {
        self.answers.iter().find(|a| a.question == question)
    }

    /// Records `option` as this group's answer to `question`
    ///
    /// An existing answer for the same question is replaced in place.
    ///
    /// # Returns
    ///
    /// The answer that was replaced, if there was one
    pub fn record_answer(&mut self, question: Id, option: String) -> Option<Answer> {
        let answer = Answer {
            question,
            option,
            submitted_at: SystemTime::now(),
        };

        match self.answers.iter_mut().find(|a| a.question == question) {
            Some(existing) => Some(std::mem::replace(existing, answer)),
            None => {
                self.answers.push(answer);
                None
            }
        }
    }
}

/// Errors that can occur when addressing or renaming groups
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No group has this id
    #[error("group {0} does not exist")]
    UnknownGroup(Id),
    /// The name is empty or whitespace
    #[error("name cannot be empty")]
    Empty,
    /// The name exceeds the allowed length
    #[error("name is too long")]
    TooLong,
    /// The name contains inappropriate content
    #[error("name is inappropriate")]
    Inappropriate,
    /// Another group already uses the name
    #[error("name already in-use")]
    Used,
}

/// Reasons a stored group set cannot be restored
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    /// Two groups share an id
    #[error("group {0} appears twice")]
    DuplicateGroup(Id),
    /// Two groups share a channel
    #[error("channel {0} is bound to more than one group")]
    DuplicateChannel(Channel),
    /// A participant belongs to more than one group
    #[error("participant {0} belongs to more than one group")]
    DuplicateMember(Id),
    /// A group holds two answers for one question
    #[error("group {group} has more than one answer for question {question}")]
    DuplicateAnswer {
        /// The offending group
        group: Id,
        /// The question answered twice
        question: Id,
    },
}

/// Serialization helper for Groups
#[derive(Deserialize)]
struct GroupsSerde {
    groups: Vec<Group>,
}

/// The owned collection of all groups of the current game cycle
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(try_from = "GroupsSerde")]
pub struct Groups {
    /// Groups in creation order
    groups: Vec<Group>,

    /// Group id to position in `groups`
    #[serde(skip_serializing)]
    index: HashMap<Id, usize>,
    /// Participant id to the id of their group
    #[serde(skip_serializing)]
    member_to_group: HashMap<Id, Id>,
}

impl TryFrom<GroupsSerde> for Groups {
    type Error = RestoreError;

    fn try_from(serde: GroupsSerde) -> Result<Self, Self::Error> {
        Self::try_from_groups(serde.groups)
    }
}

impl Groups {
    /// Builds the collection, checking that ids, channels and members are
    /// unique and that no group holds two answers for the same question
    ///
    /// # Errors
    ///
    /// Returns the first `RestoreError` found.
    pub fn try_from_groups(groups: Vec<Group>) -> Result<Self, RestoreError> {
        let mut index = HashMap::new();
        let mut member_to_group = HashMap::new();
        let mut channels = HashSet::new();

        for (position, group) in groups.iter().enumerate() {
            if index.insert(group.id, position).is_some() {
                return Err(RestoreError::DuplicateGroup(group.id));
            }
            if !channels.insert(group.channel.clone()) {
                return Err(RestoreError::DuplicateChannel(group.channel.clone()));
            }
            for member in &group.members {
                if member_to_group.insert(*member, group.id).is_some() {
                    return Err(RestoreError::DuplicateMember(*member));
                }
            }
            if let Some(question) = group.answers.iter().map(|a| a.question).duplicates().next() {
                return Err(RestoreError::DuplicateAnswer {
                    group: group.id,
                    question,
                });
            }
        }

        Ok(Self {
            groups,
            index,
            member_to_group,
        })
    }

    /// Looks up a group by id
    pub fn get(&self, id: Id) -> Option<&Group> {
        self.index.get(&id).and_then(|p| self.groups.get(*p))
    }

    fn get_mut(&mut self, id: Id) -> Option<&mut Group> {
        self.index.get(&id).and_then(|p| self.groups.get_mut(*p))
    }

    /// The group a participant was assigned to
    pub fn group_of(&self, participant: Id) -> Option<&Group> {
        self.member_to_group
            .get(&participant)
            .and_then(|group| self.get(*group))
    }

    /// Iterates over groups in creation order
    pub fn iter(&self) -> std::slice::Iter<'_, Group> {
        self.groups.iter()
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Records an answer for a group, replacing any earlier answer to the
    /// same question
    ///
    /// The caller is responsible for checking that the question is live and
    /// the option belongs to it.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownGroup` if no group has this id.
    pub fn record_answer(
        &mut self,
        group: Id,
        question: Id,
        option: String,
    ) -> Result<Option<Answer>, Error> {
        self.get_mut(group)
            .map(|g| g.record_answer(question, option))
            .ok_or(Error::UnknownGroup(group))
    }

    /// Drops every recorded answer of every group
    pub fn clear_answers(&mut self) {
        for group in &mut self.groups {
            group.answers.clear();
        }
    }

    /// Renames a group after validating the new name
    ///
    /// The name is trimmed of surrounding whitespace before it is checked.
    ///
    /// # Returns
    ///
    /// The cleaned name that was stored
    ///
    /// # Errors
    ///
    /// * `Error::UnknownGroup` - no group has this id
    /// * `Error::TooLong` - the name exceeds `MAX_NAME_LENGTH` characters
    /// * `Error::Empty` - the name is empty after trimming
    /// * `Error::Inappropriate` - the name fails the content filter
    /// * `Error::Used` - another group already has this name
    pub fn rename(&mut self, group: Id, name: &str) -> Result<String, Error> {
        if self.get(group).is_none() {
            return Err(Error::UnknownGroup(group));
        }
        let name = rustrict::trim_whitespace(name);
        if name.chars().count() > constants::group::MAX_NAME_LENGTH {
            return Err(Error::TooLong);
        }
        if name.is_empty() {
            return Err(Error::Empty);
        }
        if name.is_inappropriate() {
            return Err(Error::Inappropriate);
        }
        if self.groups.iter().any(|g| g.id != group && g.name == name) {
            return Err(Error::Used);
        }

        let target = self.get_mut(group).ok_or(Error::UnknownGroup(group))?;
        name.clone_into(&mut target.name);

        Ok(name.to_owned())
    }
}

impl<'a> IntoIterator for &'a Groups {
    type Item = &'a Group;
    type IntoIter = std::slice::Iter<'a, Group>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
