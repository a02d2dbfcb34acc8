// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tracked group model.

use serde::{Deserialize, Serialize};

/// A group whose members are held to the activity deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group ID (also used as document ID)
    pub id: String,
    /// Chat reference handed to the notifier (opaque to this crate)
    pub chat_ref: String,
    /// Unapproved groups are ignored by ingestion and the sweep
    pub approved: bool,
}
