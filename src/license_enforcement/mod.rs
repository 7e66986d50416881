//! License enforcement for Content Optimizer
//!
//! This module decides whether the current origin may use premium features,
//! tracks usage against the free tier, and watches for tampering with its own
//! markers.
//!
//! ## Plans
//!
//! **Free** (no license, or a license that does not cover this origin):
//! - Basic analysis only, limited number of articles
//!
//! **Pro / Agency** (valid license listing this origin):
//! - Premium features unlocked according to the plan
//!
//! ## How It Works
//!
//! When a page session starts, an [`EnforcementContext`] derives the session
//! identity, validates the stored license against the origin, records a page
//! view and inserts a hidden watermark. Once started, it re-validates the
//! license every five minutes and runs the tamper detectors:
//!
//! - watermark removal (mutation feed)
//! - protection script presence (every 5 seconds, blocks on failure)
//! - developer tools window-gap heuristic (every 500 milliseconds)
//!
//! Violations are counted per session. Above three, unauthorized usage
//! escalates; above five, each violation stages a report snapshot for later
//! transmission. Nothing is transmitted.
//!
//! None of this is a security boundary: every check runs in an environment
//! controlled by the party being checked.

pub(crate) mod gate;
pub(crate) mod identity;
pub(crate) mod license;
pub(crate) mod messages;
pub(crate) mod plan;
pub(crate) mod state;
pub(crate) mod tamper;
pub(crate) mod tracker;
pub(crate) mod tracking;
pub(crate) mod validator;

pub(crate) use identity::Identity;
pub(crate) use plan::{FeatureRequirements, Plan};
pub(crate) use state::{EnforcementContext, EnforcementDeps};
pub(crate) use validator::ViolationReason;
