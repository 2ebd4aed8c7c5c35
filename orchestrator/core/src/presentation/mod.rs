// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

pub mod api;
pub mod channel;

pub use api::{router, serve, AppState};
pub use channel::CommandEnvelope;
