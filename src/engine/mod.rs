// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod runtime;
pub mod sanitizer;

pub use runtime::{Engine, GenerateOptions, UsageRecord};
pub use sanitizer::{OutputSanitizer, SanitizeOutcome};
