// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod in_memory;
pub mod persistent;
pub mod retry;

pub use in_memory::InMemoryProvider;
pub use persistent::PersistentProvider;
