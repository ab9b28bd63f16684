//! # Comment Ingest Library
//!
//! Quota-aware, resumable ingestion of comment and metadata records from the
//! YouTube Data API. Every channel or playlist is processed as an independent,
//! interruptible unit of work that can be stopped at any page boundary and
//! continued later without re-fetching or double-counting data.
//!
//! ## Features
//!
//! - **Quota Ledger**: per-credential budgets with deterministic rotation
//! - **Retry Engine**: bounded retries with exponential backoff and jitter
//! - **Persistent Cache**: LRU-bounded metadata cache that survives restarts
//! - **Resume Capability**: durable per-unit checkpoints with monotonic cursors
//! - **Idempotent Sinks**: re-delivered records never duplicate stored output
//!
//! ## Quick Start
//!
//! ```no_run
//! use comment_ingest::config::IngestConfig;
//! use comment_ingest::filter::SelectionFilter;
//! use comment_ingest::ingest::Orchestrator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::from_path("ingest.json")?;
//! let orchestrator = Orchestrator::from_config(&config).await?;
//! let summary = orchestrator
//!     .run(config.units.clone(), &SelectionFilter::default())
//!     .await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`store`] - Durable key-value boundary (atomic file store, in-memory store)
//! - [`quota`] - Credential budgets and rotation
//! - [`retry`] - Retry state machine and backoff
//! - [`cache`] - Persistent LRU cache for entity metadata
//! - [`resume`] - Per-unit progress checkpoints
//! - [`remote`] - Remote API boundary and the YouTube client
//! - [`sink`] - Downstream record sinks (CSV, in-memory)
//! - [`filter`] - Unit selection predicates
//! - [`ingest`] - Orchestration of units of work
//! - [`config`] - JSON configuration loading and validation
//! - [`cli`] - Command line parsing and the run command
//! - [`shutdown`] - Graceful and immediate shutdown coordination
//! - [`metrics`] - Prometheus metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Persistent LRU cache for entity metadata
pub mod cache;

/// Command line interface
pub mod cli;

/// Configuration loading and validation
pub mod config;

/// Unit selection predicates
pub mod filter;

/// Unit-of-work orchestration
pub mod ingest;

/// Metrics collection
pub mod metrics;

/// Credential quota ledger
pub mod quota;

/// Remote API boundary
pub mod remote;

/// Resume capability for units of work
pub mod resume;

/// Retry state machine and backoff
pub mod retry;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Downstream record sinks
pub mod sink;

/// Durable key-value storage
pub mod store;

/// Opaque cached payload for an entity (normalized JSON from the remote API)
pub type Blob = serde_json::Value;

/// Kind of remote entity whose metadata can be cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A single video
    Video,
    /// A channel
    Channel,
    /// A playlist
    Playlist,
}

impl EntityType {
    /// Lowercase label used in storage keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Video => "video",
            EntityType::Channel => "channel",
            EntityType::Playlist => "playlist",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(EntityType::Video),
            "channel" => Ok(EntityType::Channel),
            "playlist" => Ok(EntityType::Playlist),
            _ => Err(format!("Invalid entity type: {s}")),
        }
    }
}

/// Cache key: entity type plus the remote entity id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type
    pub entity_type: EntityType,
    /// Remote id (e.g. a video id)
    pub entity_id: String,
}

impl EntityKey {
    /// Create a key for any entity type
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    /// Key for a video
    pub fn video(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Video, entity_id)
    }

    /// Key for a channel
    pub fn channel(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Channel, entity_id)
    }

    /// Key for a playlist
    pub fn playlist(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Playlist, entity_id)
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// Kind of unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Every comment thread related to a channel
    Channel,
    /// Comment threads of every video in a playlist
    Playlist,
}

impl UnitKind {
    fn prefix(&self) -> &'static str {
        match self {
            UnitKind::Channel => "chan",
            UnitKind::Playlist => "playlist",
        }
    }
}

/// Stable identifier of a unit of work, e.g. `chan::UC123`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Build the id for a unit of the given kind and remote id
    pub fn new(kind: UnitKind, remote_id: &str) -> Self {
        Self(format!("{}::{}", kind.prefix(), remote_id))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UnitId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, remote_id) = s
            .split_once("::")
            .ok_or_else(|| format!("Invalid unit id (expected <kind>::<id>): {s}"))?;
        if remote_id.is_empty() {
            return Err(format!("Invalid unit id (empty remote id): {s}"));
        }
        match prefix {
            "chan" => Ok(UnitId::new(UnitKind::Channel, remote_id)),
            "playlist" => Ok(UnitId::new(UnitKind::Playlist, remote_id)),
            _ => Err(format!("Invalid unit kind prefix: {prefix}")),
        }
    }
}

/// A configured unit of work together with its selection tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    /// Human-friendly name (e.g. the channel name)
    pub name: String,
    /// Unit kind
    pub kind: UnitKind,
    /// Remote id of the channel or playlist
    pub remote_id: String,
    /// Free-form selection tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Outdated units are never selected
    #[serde(default)]
    pub outdated: bool,
}

impl UnitDescriptor {
    /// Describe a channel unit
    pub fn channel(name: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: UnitKind::Channel,
            remote_id: remote_id.into(),
            tags: Vec::new(),
            outdated: false,
        }
    }

    /// Describe a playlist unit
    pub fn playlist(name: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: UnitKind::Playlist,
            remote_id: remote_id.into(),
            tags: Vec::new(),
            outdated: false,
        }
    }

    /// Attach tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// The unit's stable id
    pub fn id(&self) -> UnitId {
        UnitId::new(self.kind, &self.remote_id)
    }
}
