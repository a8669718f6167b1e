//! Application state management
//!
//! This module owns the connected services, the shared session, the tree layer
//! and the user actions that start background workflows.

use crate::app::settings::Settings;
use crate::async_runtime;
use geo::Rect;
use isochrone_lib::{
    Config, DetailTemplate, FeatureIndex, FeatureLayerView, FeatureSource, HighlightSet,
    IsochroneWorkflow, LayerInfo, LocalHitTester, MapPoint, NetworkServiceClient, OverlapOutcome,
    OverlapWorkflow, PointerTracker, RemoteFeatureService, Session, TravelTimeService,
    WalkingBufferService,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

/// Identifier of the tree layer in hit-test results
pub const TREE_LAYER_ID: &str = "trees";

/// Everything that talks to the outside world, connected once at startup
pub struct Services {
    pub config: Config,
    pub session: Arc<Session>,
    pub isochrones: Arc<IsochroneWorkflow>,
    pub overlap: Arc<OverlapWorkflow>,
    pub tracker: Arc<PointerTracker>,
    pub features: Arc<dyn FeatureSource>,
    pub highlights: HighlightSet,
}

impl Services {
    /// Fetch the service description and wire the session
    ///
    /// Fails only for fatal startup errors.
    pub async fn connect(settings: &Settings) -> isochrone_lib::Result<Self> {
        let config = settings.to_config();

        let travel_service: Arc<dyn TravelTimeService> = if settings.offline {
            tracing::info!("Offline mode: service areas approximated locally");
            Arc::new(WalkingBufferService::new(
                config.walking_speed_kmh,
                &config.travel_mode_name,
            ))
        } else {
            if config.api_key.is_none() {
                tracing::warn!(
                    "No API key configured; the routing service will likely reject requests"
                );
            }
            Arc::new(NetworkServiceClient::new(
                &config.service_area_url,
                config.api_key.clone(),
                config.request_timeout,
            )?)
        };

        let isochrones = IsochroneWorkflow::bootstrap(travel_service, &config).await?;

        let features: Arc<dyn FeatureSource> = Arc::new(RemoteFeatureService::new(
            config.feature_layer_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
        )?);

        let highlights = HighlightSet::new();
        let session = Arc::new(Session::new(
            config.clone(),
            FeatureLayerView::new(Arc::clone(&features)),
            Arc::new(highlights.clone()),
        ));

        Ok(Self {
            tracker: Arc::new(PointerTracker::new(config.debounce)),
            config,
            session,
            isochrones: Arc::new(isochrones),
            overlap: Arc::new(OverlapWorkflow::new()),
            features,
            highlights,
        })
    }
}

/// Loading state of the tree layer
#[derive(Clone, Default)]
pub enum TreeLayer {
    #[default]
    NotAdded,
    Loading,
    Ready {
        index: Arc<FeatureIndex>,
        hit_tester: Arc<LocalHitTester>,
    },
    Failed(String),
}

impl TreeLayer {
    pub fn index(&self) -> Option<&Arc<FeatureIndex>> {
        match self {
            Self::Ready { index, .. } => Some(index),
            _ => None,
        }
    }
}

/// Pointer input captured by the map plugin during the last frame
#[derive(Clone, Debug, Default)]
pub struct MapInput {
    /// Map position of a click (not a drag)
    pub clicked: Option<MapPoint>,
    /// Map position under the pointer
    pub hovered: Option<MapPoint>,
    /// Hit-test tolerance around the pointer, in Web Mercator meters
    pub tolerance: f64,
}

/// UI-specific settings that can be adjusted at runtime
#[derive(Clone)]
pub struct UiSettings {
    /// Map tiles provider
    pub tiles_provider: TilesProvider,
}

/// Available map tile providers
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TilesProvider {
    OpenStreetMap,
    OpenTopoMap,
}

impl TilesProvider {
    pub fn attribution(&self) -> &'static str {
        match self {
            Self::OpenStreetMap => "© OpenStreetMap contributors",
            Self::OpenTopoMap => "© OpenTopoMap (CC-BY-SA)",
        }
    }

    pub fn all() -> &'static [Self] {
        &[Self::OpenStreetMap, Self::OpenTopoMap]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenStreetMap => "OpenStreetMap",
            Self::OpenTopoMap => "OpenTopoMap",
        }
    }
}

/// Main application state
pub struct AppState {
    pub services: Services,

    /// Current UI settings
    pub ui_settings: UiSettings,

    /// Tree layer (bulk-loaded into a local index once added)
    pub tree_layer: Arc<RwLock<TreeLayer>>,

    /// Input captured by the map plugin, consumed once per frame
    pub map_input: Arc<Mutex<MapInput>>,

    /// Extent the view should move to, set by the overlap workflow
    pub pending_extent: Arc<RwLock<Option<Rect<f64>>>>,

    /// Number of workflows currently running
    pub in_flight: Arc<AtomicUsize>,

    /// Last hovered position sent to the tracker
    last_hover: Option<MapPoint>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            ui_settings: UiSettings {
                tiles_provider: TilesProvider::OpenStreetMap,
            },
            tree_layer: Arc::new(RwLock::new(TreeLayer::NotAdded)),
            map_input: Arc::new(Mutex::new(MapInput::default())),
            pending_extent: Arc::new(RwLock::new(None)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_hover: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Relaxed) > 0
    }

    /// Run a workflow in the background and repaint once it finishes
    fn run_in_background<F>(&self, ctx: &egui::Context, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let ctx = ctx.clone();
        in_flight.fetch_add(1, Ordering::Relaxed);
        async_runtime::spawn(async move {
            future.await;
            in_flight.fetch_sub(1, Ordering::Relaxed);
            ctx.request_repaint();
        });
    }

    /// Consume the input captured during the last frame
    pub fn process_map_input(&mut self, ctx: &egui::Context) {
        let input = std::mem::take(
            &mut *self
                .map_input
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        if let Some(point) = input.clicked {
            self.place_location(ctx, point);
        }

        if let Some(point) = input.hovered
            && self.last_hover != Some(point)
        {
            self.last_hover = Some(point);
            self.track_pointer(ctx, point, input.tolerance);
        }
    }

    /// Click: location marker plus its service areas
    pub fn place_location(&self, ctx: &egui::Context, point: MapPoint) {
        let session = Arc::clone(&self.services.session);
        let isochrones = Arc::clone(&self.services.isochrones);
        self.run_in_background(ctx, async move {
            // Failures are logged by the workflow; a reset discards the result
            let _ = isochrones.run(&session, point).await;
        });
    }

    /// Pointer move: debounced hit-test, only once the tree layer is ready
    fn track_pointer(&self, ctx: &egui::Context, point: MapPoint, tolerance: f64) {
        let hit_tester = match self.tree_layer.try_read() {
            Ok(layer) => match &*layer {
                TreeLayer::Ready { hit_tester, .. } => Arc::clone(hit_tester),
                _ => return,
            },
            Err(_) => return,
        };

        let session = Arc::clone(&self.services.session);
        let tracker = Arc::clone(&self.services.tracker);
        let ctx = ctx.clone();
        async_runtime::spawn(async move {
            match tracker
                .track(&session, hit_tester.as_ref(), point, tolerance)
                .await
            {
                Ok(_) => ctx.request_repaint(),
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!("Hit-test failed: {}", e),
            }
        });
    }

    /// "Add tree layer": bulk-load the features into a local index
    pub fn add_tree_layer(&self, ctx: &egui::Context) {
        match self.tree_layer.try_write() {
            Ok(mut layer) if matches!(*layer, TreeLayer::NotAdded | TreeLayer::Failed(_)) => {
                *layer = TreeLayer::Loading;
            }
            _ => return,
        }

        let features = Arc::clone(&self.services.features);
        let session = Arc::clone(&self.services.session);
        let tree_layer = Arc::clone(&self.tree_layer);
        self.run_in_background(ctx, async move {
            let loaded = match features.query_features(None).await {
                Ok(records) => {
                    let index = Arc::new(FeatureIndex::from_features(records));
                    let hit_tester = LocalHitTester::new().with_graphics(session).with_layer(
                        LayerInfo::new(TREE_LAYER_ID, Some(DetailTemplate::trees())),
                        Arc::clone(&index),
                    );
                    tracing::info!("Tree layer ready with {} features", index.len());
                    TreeLayer::Ready {
                        index,
                        hit_tester: Arc::new(hit_tester),
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to load tree layer: {}", e);
                    TreeLayer::Failed(e.to_string())
                }
            };
            *tree_layer.write().await = loaded;
        });
    }

    /// "Find common area": overlap of the first two areas and a filtered count
    pub fn find_common_area(&self, ctx: &egui::Context) {
        let session = Arc::clone(&self.services.session);
        let overlap = Arc::clone(&self.services.overlap);
        let pending_extent = Arc::clone(&self.pending_extent);
        self.run_in_background(ctx, async move {
            match overlap.run(&session).await {
                Ok(OverlapOutcome::Counted { extent, .. }) => {
                    *pending_extent.write().await = Some(extent);
                }
                Ok(OverlapOutcome::Disjoint) => {}
                Err(e) => tracing::debug!("Common area not computed: {}", e),
            }
        });
    }

    pub fn set_clustering(&self, enabled: bool) {
        self.services.session.set_clustering(enabled);
    }

    /// "Reset": cancel pending hover work and clear the session
    pub fn reset(&mut self, ctx: &egui::Context) {
        self.services.tracker.invalidate();
        self.last_hover = None;
        let session = Arc::clone(&self.services.session);
        self.run_in_background(ctx, async move {
            session.reset().await;
        });
    }

    /// Extent requested by the last overlap, if not yet applied
    pub fn take_pending_extent(&self) -> Option<Rect<f64>> {
        self.pending_extent
            .try_write()
            .ok()
            .and_then(|mut extent| extent.take())
    }
}
