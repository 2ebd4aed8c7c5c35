// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0
//! Meridian orchestration core.
//!
//! Coordinates a set of capability-bound workers over an in-process event
//! bus, owns the task lifecycle and routing policy, persists the task log
//! through a ledger-backed store with a content-addressed fallback, and
//! exposes the agent-to-agent task protocol over HTTP.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Task orchestration runtime

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
