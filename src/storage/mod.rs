// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store adapters: the [`traits::TaskStore`] capability and its backends.

pub mod traits;
pub mod memory;
pub mod sql;

pub use traits::{StorageError, TaskStore};
pub use memory::InMemoryTaskStore;
pub use sql::{SqlStoreOptions, SqlTaskStore};
