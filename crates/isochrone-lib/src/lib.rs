//! Isochrone Library - Core Spatial Interaction Pipeline
//!
//! This library implements everything a map client needs to answer "what can I
//! reach on foot from here, and from there, and what lies in between?":
//! walking-time service areas fetched from a remote network-analysis service,
//! client-side polygon intersection, spatial filtering and counting of a large
//! point-feature collection, and a debounced, cancellation-aware hover picker.
//!
//! # Architecture
//!
//! - **[`geometry`]**: Points, areas and the pure intersection operation
//! - **[`TravelTimeService`]**: Async client for the service-area endpoint
//! - **[`FeatureLayerView`]**: Single-slot spatial filter + count over a [`FeatureSource`]
//! - **[`FeatureIndex`]**: Earth-rooted point quadtree for local queries and hit-testing
//! - **[`PointerTracker`]** + **[`HighlightSession`]**: Debounced hover highlighting
//! - **[`IsochroneWorkflow`]** / **[`OverlapWorkflow`]**: Orchestration over a shared [`Session`]
//!
//! # Concurrency
//!
//! Workflows may run concurrently on any tokio runtime. Shared state lives in the
//! [`Session`] and its locks are only ever held for synchronous mutation, never
//! across a network round-trip.

pub mod config;
mod feature_index;
mod feature_layer;
mod features;
pub mod geometry;
mod graphics;
mod highlight;
mod network_service;
mod picker;
mod rest;
mod session;
pub mod utils;
mod workflow;

// Public API exports
pub use config::Config;
pub use feature_index::{Cluster, FeatureIndex};
pub use feature_layer::{
    DistanceUnits, FeatureFilter, FeatureLayerView, FeatureSource, IndexedFeatureSource,
    RemoteFeatureService, SpatialRelationship,
};
pub use features::{DetailTemplate, FeatureRecord, FieldInfo, ObjectId};
pub use geometry::{Area, MapPoint, SpatialReference, intersect};
pub use graphics::{AreaGraphic, AreaKind, GraphicsLayer};
pub use highlight::{
    Detail, HighlightHandle, HighlightSession, HighlightSet, Highlighter, Transition,
};
pub use network_service::{
    NetworkServiceClient, ServiceAreaParameters, ServiceDescription, TravelMode,
    TravelTimeService, WalkingBufferService,
};
pub use picker::{
    GRAPHICS_LAYER_ID, HitResult, HitTester, LayerInfo, LocalHitTester, PointerTracker,
};
pub use session::{Alert, Session};
pub use workflow::{IsochroneWorkflow, OverlapOutcome, OverlapWorkflow};

/// Error payload returned by a remote ArcGIS-style service
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct RemoteError {
    /// Service error code (HTTP-like), absent for transport failures
    #[serde(default)]
    pub code: Option<i64>,
    /// Human readable message
    #[serde(default)]
    pub message: String,
    /// Additional detail lines
    #[serde(default)]
    pub details: Vec<String>,
}

impl RemoteError {
    /// Wrap a transport-level failure (connection, timeout, bad body)
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: Vec::new(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        if !self.details.is_empty() {
            write!(f, " ({})", self.details.join("; "))?;
        }
        Ok(())
    }
}

/// Error types for the isochrone pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Network service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Travel mode not found: {0}")]
    TravelModeNotFound(String),

    #[error("Service area solve failed: {0}")]
    Solve(RemoteError),

    #[error("Feature query failed: {0}")]
    Query(RemoteError),

    #[error("Operation superseded by a newer request")]
    Cancelled,

    #[error("Precondition not met: {required} areas required, {available} available")]
    PreconditionNotMet { required: usize, available: usize },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Only startup failures abort the session, everything else degrades gracefully
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::TravelModeNotFound(_))
    }

    /// Superseded hit-tests are not failures and must be swallowed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
