// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod api;
pub mod audit;
pub mod backends;
pub mod bft;
pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod network;
pub mod provider;
pub mod raft;
pub mod runtime;
pub mod server;
pub mod service;
pub mod telemetry;
