//! merge-assist: automated merge gatekeeper for GitLab
//!
//! Merge requests assigned to an automation user are validated against a
//! fixed set of readiness checks, struck and eventually rejected when they
//! keep failing, and merged one at a time or in batches through a shared
//! integration branch once they are ready.
//!
//! The crate is organised around a few seams:
//!
//! - [`platform::MergeProvider`] - the GitLab API surface
//! - [`annotate::AnnotationSink`] - user-visible feedback (comments, labels)
//! - [`events::EventSource`] - change notifications and the ready set
//! - [`store::Store`] - persisted MR, batch and history state
//!
//! [`reconcile::ProjectLoop`] ties them together per project and
//! [`supervisor::Supervisor`] keeps every loop alive.

pub mod annotate;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod merge;
pub mod platform;
pub mod policy;
pub mod readiness;
pub mod reconcile;
pub mod store;
pub mod supervisor;
pub mod types;

pub use error::{Error, Result};
