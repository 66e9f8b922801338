// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-call protections around store access: retries at startup, a time
//! bound on every store call, and the primary availability probe.

pub mod probe;
pub mod retry;
pub mod timeout;
