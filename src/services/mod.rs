// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod classifier;
pub mod enforcement;
pub mod gate;
pub mod ingest;
pub mod lock;
pub mod normalizer;
pub mod notifier;
pub mod providers;
pub mod rank;
pub mod streak;
pub mod sync;

pub use classifier::Classifier;
pub use enforcement::EnforcementScheduler;
pub use gate::IdempotencyGate;
pub use ingest::ActivityPipeline;
pub use lock::{MemoryTtlStore, TtlStore};
pub use notifier::{ChatBridgeNotifier, LogNotifier, Notifier};
pub use providers::{HttpProviderApi, ProviderApi, ProviderService};
