//! Group partitioning
//!
//! Splits the registered participants into balanced groups, each bound to
//! its own channel. Participants are shuffled first so registration order
//! has no influence on who ends up together. Group sizes never differ by
//! more than one, and every group receives between `min_group_size` and
//! `min_group_size + 1` members whenever the overflow (`len % min_group_size`)
//! does not outnumber the groups.

use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::{
    groups::{Channel, Group},
    id::Id,
};

/// Errors that can occur when partitioning participants
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Groups must hold at least one participant
    #[error("minimum group size must be positive")]
    ZeroGroupSize,
    /// Not even one full group can be formed
    #[error("{participants} participants cannot fill a group of {min_group_size}")]
    TooFewParticipants {
        /// Number of participants available
        participants: usize,
        /// Requested minimum group size
        min_group_size: usize,
    },
    /// There are more groups than channels to bind them to
    #[error("{needed} groups need channels but only {available} are available")]
    InsufficientChannels {
        /// Number of groups that would be generated
        needed: usize,
        /// Number of channels in the pool
        available: usize,
    },
}

/// Partitions participants into groups using fresh randomness
///
/// # Errors
///
/// See [`partition_with_rng`].
pub fn partition(
    participants: &[Id],
    min_group_size: usize,
    channels: &[Channel],
) -> Result<Vec<Group>, Error> {
    partition_with_rng(
        &mut fastrand::Rng::new(),
        participants,
        min_group_size,
        channels,
    )
}

/// Partitions participants into groups, drawing the shuffle from `rng`
///
/// After shuffling, the first `len % min_group_size` participants form the
/// overflow and the rest are cut into chunks of exactly `min_group_size`.
/// Overflow participant `i` then joins chunk `i % chunk_count`. Group `i`
/// (zero-based) is named `"Group {i + 1}"` and bound to `channels[i]`.
///
/// Nothing is produced unless every group can be bound to a channel.
///
/// # Errors
///
/// * `Error::ZeroGroupSize` - `min_group_size` is zero
/// * `Error::TooFewParticipants` - fewer participants than `min_group_size`
/// * `Error::InsufficientChannels` - fewer channels than generated groups
pub fn partition_with_rng(
    rng: &mut fastrand::Rng,
    participants: &[Id],
    min_group_size: usize,
    channels: &[Channel],
) -> Result<Vec<Group>, Error> {
    if min_group_size == 0 {
        return Err(Error::ZeroGroupSize);
    }
    if participants.len() < min_group_size {
        return Err(Error::TooFewParticipants {
            participants: participants.len(),
            min_group_size,
        });
    }

    let group_count = participants.len() / min_group_size;
    if channels.len() < group_count {
        return Err(Error::InsufficientChannels {
            needed: group_count,
            available: channels.len(),
        });
    }

    let mut pool = participants.to_vec();
    rng.shuffle(&mut pool);

    let (overflow, rest) = pool.split_at(participants.len() % min_group_size);

    let mut chunks = rest.chunks(min_group_size).map(<[Id]>::to_vec).collect_vec();

    for (i, participant) in overflow.iter().enumerate() {
        chunks[i % group_count].push(*participant);
    }

    Ok(chunks
        .into_iter()
        .zip(channels)
        .enumerate()
        .map(|(i, (members, channel))| {
            Group::new(format!("Group {}", i + 1), channel.clone(), members)
        })
        .collect())
}
