// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Application services: the task manager, the A2A gateway and the
//! workers that sit behind them.

pub mod a2a;
pub mod task_manager;
pub mod workers;

pub use a2a::{A2aError, A2aGateway, SubmitOutcome, TaskProcessor};
pub use task_manager::{CompletionHook, RoutingTable, TaskManager, TaskOptions, DEFAULT_WORKER};
