// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Value types shared by every backend.

pub mod hash;
pub mod state_ref;
pub mod party;
pub mod time_window;

pub use hash::SecureHash;
pub use party::{Party, RequestSignature};
pub use state_ref::{ConsumingTxInfo, StateRef};
pub use time_window::TimeWindow;
