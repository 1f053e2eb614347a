#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

//! Operator console for the workflow-backed accounts API.
//!
//! [`app::ConsoleApp`] owns one [`notification::NotificationChannel`] and mounts an
//! [`synchronizer::AccountListSynchronizer`] on it. Mutations run through
//! [`actions::AccountActions`], which publish a delayed refresh signal on success.

pub mod actions;
pub mod app;
pub mod cli;
pub mod config;
pub mod model;
pub mod notification;
pub mod render;
pub mod synchronizer;

#[cfg(test)]
pub(crate) mod test_support;
