//! # Huddle
//!
//! This library provides the core of a live-event engagement tool.
//! Participants register with their e-mail, are split into balanced groups
//! bound to pre-provisioned chat channels, and then answer quiz questions
//! that an administrator opens and closes one at a time while a display
//! shows the live question, the latest results and the scoreboard.
//!
//! Everything is reached through a [`game::Session`], which owns the state,
//! serializes mutations and persists every change through a
//! [`store::Store`] before publishing it.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]

pub mod config;
pub mod constants;
pub mod game;
pub mod groups;
pub mod id;
pub mod leaderboard;
pub mod mail;
pub mod partition;
pub mod quiz;
pub mod registration;
pub mod store;
