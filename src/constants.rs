//! Limits used throughout the engagement core
//!
//! These bounds keep loaded quiz documents, registrations and participant
//! supplied names inside sizes a live event display can handle.

/// Quiz document limits
pub mod quiz {
    /// Maximum number of questions in a single quiz
    pub const MAX_QUESTION_COUNT: usize = 200;
    /// Maximum length of a question text in characters
    pub const MAX_TEXT_LENGTH: usize = 2000;
    /// Maximum number of answer options per question
    pub const MAX_OPTION_COUNT: usize = 16;
}

/// Answer option limits
pub mod answer_option {
    /// Maximum length of an answer option text in characters
    pub const MAX_TEXT_LENGTH: usize = 2000;
    /// Maximum points a single option can be worth
    pub const MAX_POINTS: u64 = 1_000_000;
}

/// Group limits
pub mod group {
    /// Maximum length of a group display name
    pub const MAX_NAME_LENGTH: usize = 30;
    /// Maximum length of a channel address
    pub const MAX_CHANNEL_LENGTH: usize = 200;
}

/// Registration limits
pub mod registration {
    /// Maximum length of a registered e-mail address
    pub const MAX_EMAIL_LENGTH: usize = 254;
    /// Maximum number of participants accepted by the ledger
    pub const MAX_PARTICIPANT_COUNT: usize = 10_000;
}
