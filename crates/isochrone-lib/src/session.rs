//! Session-scoped state shared by the workflows and the picker
//!
//! Every piece sits behind its own tokio lock. Locks are only held while state
//! is mutated synchronously, never across a network round-trip.

use crate::{Config, FeatureLayerView, GraphicsLayer, HighlightSession, Highlighter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

/// User-facing alert surface
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Alert {
    pub open: bool,
    pub title: String,
}

pub struct Session {
    config: Config,
    graphics: RwLock<GraphicsLayer>,
    highlight: Mutex<HighlightSession>,
    highlighter: Arc<dyn Highlighter>,
    layer_view: FeatureLayerView,
    alert: RwLock<Alert>,
    clustering: AtomicBool,
    /// Bumped by every reset; work started under an older epoch is stale
    epoch: AtomicU64,
}

impl Session {
    pub fn new(config: Config, layer_view: FeatureLayerView, highlighter: Arc<dyn Highlighter>) -> Self {
        Self {
            config,
            graphics: RwLock::new(GraphicsLayer::new()),
            highlight: Mutex::new(HighlightSession::new()),
            highlighter,
            layer_view,
            alert: RwLock::new(Alert::default()),
            clustering: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn graphics(&self) -> &RwLock<GraphicsLayer> {
        &self.graphics
    }

    #[inline]
    pub fn highlight(&self) -> &Mutex<HighlightSession> {
        &self.highlight
    }

    #[inline]
    pub fn highlighter(&self) -> &dyn Highlighter {
        self.highlighter.as_ref()
    }

    #[inline]
    pub fn layer_view(&self) -> &FeatureLayerView {
        &self.layer_view
    }

    #[inline]
    pub fn alert(&self) -> &RwLock<Alert> {
        &self.alert
    }

    pub async fn show_alert(&self, title: impl Into<String>) {
        let mut alert = self.alert.write().await;
        alert.open = true;
        alert.title = title.into();
    }

    pub async fn close_alert(&self) {
        self.alert.write().await.open = false;
    }

    /// Feature reduction (clustering) of the feature layer
    pub fn set_clustering(&self, enabled: bool) {
        self.clustering.store(enabled, Ordering::Relaxed);
    }

    pub fn is_clustering(&self) -> bool {
        self.clustering.load(Ordering::Relaxed)
    }

    /// Current reset epoch, to be compared with [`Session::is_current`]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// No reset happened since `epoch` was read
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Back to a blank session: no graphics, no highlight, no filter, no alert
    ///
    /// The epoch moves first, so a workflow holding the graphics lock either
    /// finishes before the clear or sees itself stale.
    pub async fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.highlight.lock().await.reset();
        self.graphics.write().await.clear();
        self.layer_view.clear_filter().await;
        self.close_alert().await;
        self.set_clustering(false);
        tracing::info!("Session reset");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::feature_index::tests::grid_index;
    use crate::geometry::tests::square;
    use crate::highlight::tests::{RecordingHighlighter, hit};
    use crate::{AreaGraphic, DistanceUnits, FeatureFilter, IndexedFeatureSource};

    /// Session over the 20x20 test grid
    pub(crate) fn test_session(highlighter: Arc<dyn Highlighter>) -> Session {
        let source = Arc::new(IndexedFeatureSource::new(Arc::new(grid_index())));
        Session::new(Config::default(), FeatureLayerView::new(source), highlighter)
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let highlighter = RecordingHighlighter::default();
        let session = test_session(Arc::new(highlighter.clone()));

        session
            .graphics()
            .write()
            .await
            .append_areas([AreaGraphic::service_area(square(0.0, 0.0, 10.0), 15.0)]);
        session
            .highlight()
            .lock()
            .await
            .apply(Some(&hit(1)), session.highlighter());
        session
            .layer_view()
            .apply_filter(FeatureFilter::intersects(square(0.0, 0.0, 10.0), DistanceUnits::Miles))
            .await;
        session.show_alert("There are 4 trees to see.").await;
        session.set_clustering(true);

        session.reset().await;

        assert!(session.graphics().read().await.is_empty());
        assert!(session.highlight().lock().await.is_idle());
        assert!(session.layer_view().filter().await.is_none());
        assert!(!session.alert().read().await.open);
        assert!(!session.is_clustering());
        assert_eq!(*highlighter.active.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_moves_epoch() {
        let session = test_session(Arc::new(RecordingHighlighter::default()));
        let before = session.epoch();
        assert!(session.is_current(before));

        session.reset().await;
        assert!(!session.is_current(before));
        assert!(session.is_current(session.epoch()));
    }
}
