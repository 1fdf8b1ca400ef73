// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Commit-log state machine.

pub mod command;
pub mod commit_log;
