//! Group announcement mail
//!
//! Once groups are assigned, every group's members receive one message that
//! names their group and its channel. Sending goes through the [`Mailer`]
//! trait so any transport can be plugged in. Delivery is best effort: a
//! failure for one group is logged and recorded, and the remaining groups
//! are still sent.

use serde::Serialize;

use crate::{groups::Group, id::Id, registration::Registry};

/// A rendered message for the members of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    /// The group the message is about
    pub group: Id,
    /// E-mail addresses of the group's members
    pub recipients: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub body: String,
}

/// Renders the announcement for `group`
///
/// Members missing from `registry` are skipped.
///
/// # Arguments
///
/// * `group` - the group being announced
/// * `registry` - source of the member addresses
/// * `support_email` - contact shown at the end of the body, if any
pub fn render(group: &Group, registry: &Registry, support_email: Option<&str>) -> Envelope {
    let recipients = group
        .members()
        .iter()
        .filter_map(|member| registry.get(*member))
        .map(|participant| participant.email.clone())
        .collect();

    let support = support_email
        .map(|address| format!("\nQuestions? Contact {address}\n"))
        .unwrap_or_default();
    let body = format!(
        "Hello!\n\nYou are a member of {}.\nJoin your group here: {}\n{support}",
        group.name(),
        group.channel()
    );

    Envelope {
        group: group.id(),
        recipients,
        subject: format!("Your group: {}", group.name()),
        body,
    }
}

/// Trait for delivering rendered envelopes
///
/// Implementations might talk SMTP, call a mail API or just collect the
/// envelopes for inspection.
pub trait Mailer {
    /// Error reported when a single envelope cannot be delivered
    type Error: std::error::Error;

    /// Delivers one envelope to all of its recipients
    ///
    /// # Errors
    ///
    /// Returns the transport error if the envelope was not delivered.
    fn send(&self, envelope: &Envelope) -> Result<(), Self::Error>;
}

const NO_RECIPIENTS: &str = "no recipients";

/// Outcome of delivering one envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    /// The group the envelope was for
    pub group: Id,
    /// Number of recipients addressed
    pub recipients: usize,
    /// The failure message, if delivery failed
    pub error: Option<String>,
}

impl Delivery {
    /// Whether the envelope was delivered
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Sends every envelope, continuing past failures
///
/// Envelopes without recipients are not sent and are reported as failed.
pub fn dispatch<M: Mailer>(mailer: &M, envelopes: &[Envelope]) -> Vec<Delivery> {
    envelopes
        .iter()
        .map(|envelope| {
            let error = if envelope.recipients.is_empty() {
                Some(NO_RECIPIENTS.to_owned())
            } else {
                mailer.send(envelope).err().map(|e| e.to_string())
            };

            if let Some(error) = &error {
                tracing::warn!(group = %envelope.group, error = %error, "group announcement failed");
            }

            Delivery {
                group: envelope.group,
                recipients: envelope.recipients.len(),
                error,
            }
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::RefCell;

    use thiserror::Error;

    use super::*;
    use crate::groups::Channel;

    #[derive(Error, Debug)]
    #[error("mailbox unavailable")]
    struct Unavailable;

    #[derive(Default)]
    struct FlakyMailer {
        fail_for: Vec<Id>,
        sent: RefCell<Vec<Envelope>>,
    }

    impl Mailer for FlakyMailer {
        type Error = Unavailable;

        fn send(&self, envelope: &Envelope) -> Result<(), Self::Error> {
            if self.fail_for.contains(&envelope.group) {
                return Err(Unavailable);
            }
            self.sent.borrow_mut().push(envelope.clone());
            Ok(())
        }
    }

    fn registry_and_group(emails: &[&str]) -> (Registry, Group) {
        let mut registry = Registry::default();
        let members = emails
            .iter()
            .map(|email| registry.admit((*email).to_owned()).unwrap().id)
            .collect();
        let group = Group::new(
            "Group 1".to_owned(),
            Channel::from("https://chat.example/1".to_owned()),
            members,
        );
        (registry, group)
    }

    #[test]
    fn test_render() {
        let (registry, group) = registry_and_group(&["ada@example.org", "grace@example.org"]);

        let envelope = render(&group, &registry, Some("help@example.org"));

        assert_eq!(envelope.group, group.id());
        assert_eq!(
            envelope.recipients,
            vec!["ada@example.org", "grace@example.org"]
        );
        assert_eq!(envelope.subject, "Your group: Group 1");
        assert!(envelope.body.contains("https://chat.example/1"));
        assert!(envelope.body.contains("help@example.org"));

        let envelope = render(&group, &registry, None);
        assert!(!envelope.body.contains("Contact"));
    }

    #[test]
    fn test_render_skips_unknown_members() {
        let (_, group) = registry_and_group(&["ada@example.org"]);
        let envelope = render(&group, &Registry::default(), None);
        assert!(envelope.recipients.is_empty());
    }

    #[test]
    fn test_dispatch_continues_after_failure() {
        let envelopes = (0..3)
            .map(|i| Envelope {
                group: Id::new(),
                recipients: vec![format!("member{i}@example.org")],
                subject: "s".to_owned(),
                body: "b".to_owned(),
            })
            .collect::<Vec<_>>();

        let mailer = FlakyMailer {
            fail_for: vec![envelopes[0].group],
            ..FlakyMailer::default()
        };

        let deliveries = dispatch(&mailer, &envelopes);

        assert_eq!(deliveries.len(), 3);
        assert!(!deliveries[0].is_delivered());
        assert_eq!(deliveries[0].error.as_deref(), Some("mailbox unavailable"));
        assert!(deliveries[1].is_delivered());
        assert!(deliveries[2].is_delivered());
        assert_eq!(mailer.sent.borrow().len(), 2);
    }

    #[test]
    fn test_dispatch_reports_empty_envelopes_as_failed() {
        let mailer = FlakyMailer::default();
        let envelope = Envelope {
            group: Id::new(),
            recipients: Vec::new(),
            subject: "s".to_owned(),
            body: "b".to_owned(),
        };

        let deliveries = dispatch(&mailer, &[envelope]);

        assert!(!deliveries[0].is_delivered());
        assert_eq!(deliveries[0].error.as_deref(), Some("no recipients"));
        assert_eq!(deliveries[0].recipients, 0);
        assert!(mailer.sent.borrow().is_empty());
    }
}
