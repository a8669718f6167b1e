//! Debounced hover picking
//!
//! Pointer positions arrive far faster than hit-tests resolve. Each call to
//! [`PointerTracker::track`] takes a new generation; a call whose generation is
//! no longer the latest resolves to [`Error::Cancelled`] and never touches the
//! highlight session.

use crate::{
    DetailTemplate, Error, FeatureIndex, FeatureRecord, MapPoint, ObjectId, Result, Session,
    SpatialReference, Transition,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Identifier of the layer holding session graphics
pub const GRAPHICS_LAYER_ID: &str = "graphics";

/// Layer a hit belongs to
#[derive(Clone, Debug, PartialEq)]
pub struct LayerInfo {
    pub id: String,
    /// Only features of layers with a template are eligible for highlighting
    pub detail_template: Option<DetailTemplate>,
}

impl LayerInfo {
    pub fn new(id: impl Into<String>, detail_template: Option<DetailTemplate>) -> Self {
        Self {
            id: id.into(),
            detail_template,
        }
    }
}

/// One hit-test candidate
#[derive(Clone, Debug, PartialEq)]
pub struct HitResult {
    pub feature: FeatureRecord,
    pub layer: LayerInfo,
}

impl HitResult {
    /// First result, front to back, whose layer declares a detail template
    pub fn topmost_eligible(hits: &[HitResult]) -> Option<&HitResult> {
        hits.iter().find(|hit| hit.layer.detail_template.is_some())
    }
}

/// Resolves what lies under a map position, front to back
#[async_trait]
pub trait HitTester: Send + Sync {
    /// `tolerance` is a radius in the point's map units
    async fn hit_test(&self, point: &MapPoint, tolerance: f64) -> Result<Vec<HitResult>>;
}

/// Hit-tester over the session graphics and locally indexed feature layers
///
/// Session graphics are on top of every feature layer and have no template.
#[derive(Default)]
pub struct LocalHitTester {
    graphics: Option<Arc<Session>>,
    layers: Vec<(LayerInfo, Arc<FeatureIndex>)>,
}

impl LocalHitTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graphics(mut self, session: Arc<Session>) -> Self {
        self.graphics = Some(session);
        self
    }

    /// Register a feature layer; later layers are drawn above earlier ones
    pub fn with_layer(mut self, info: LayerInfo, index: Arc<FeatureIndex>) -> Self {
        self.layers.push((info, index));
        self
    }
}

#[async_trait]
impl HitTester for LocalHitTester {
    async fn hit_test(&self, point: &MapPoint, tolerance: f64) -> Result<Vec<HitResult>> {
        profiling::scope!("picker::hit_test");
        let point = point.project(SpatialReference::WEB_MERCATOR);
        let mut hits = Vec::new();

        if let Some(session) = &self.graphics {
            let graphics = session.graphics().read().await;
            let info = LayerInfo::new(GRAPHICS_LAYER_ID, None);
            // Most recently added graphic is on top
            for (i, graphic) in graphics.areas().iter().enumerate().rev() {
                if graphic.area.intersects_point(&point) {
                    let mut attributes = Map::new();
                    attributes.insert("kind".to_string(), Value::from(format!("{:?}", graphic.kind)));
                    hits.push(HitResult {
                        feature: FeatureRecord::new(ObjectId(i as i64), point, attributes),
                        layer: info.clone(),
                    });
                }
            }
        }

        for (info, index) in self.layers.iter().rev() {
            hits.extend(
                index
                    .nearest_within(&point, tolerance)
                    .into_iter()
                    .map(|feature| HitResult {
                        feature: feature.clone(),
                        layer: info.clone(),
                    }),
            );
        }

        Ok(hits)
    }
}

/// Debounced, cancellation-aware driver of the highlight session
#[derive(Debug)]
pub struct PointerTracker {
    generation: AtomicU64,
    debounce: Duration,
}

impl PointerTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            generation: AtomicU64::new(0),
            debounce,
        }
    }

    /// Supersede every in-flight `track` call
    pub fn invalidate(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[inline]
    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            Err(Error::Cancelled)
        }
    }

    /// Resolve the feature under `point` and apply it to the highlight session
    ///
    /// Waits for the debounce window first; a newer call during the wait or the
    /// hit-test cancels this one. Hit-test failures propagate unchanged.
    pub async fn track(
        &self,
        session: &Session,
        tester: &dyn HitTester,
        point: MapPoint,
        tolerance: f64,
    ) -> Result<Transition> {
        let generation = self.invalidate();

        tokio::time::sleep(self.debounce).await;
        self.ensure_current(generation)?;

        let hits = tester.hit_test(&point, tolerance).await?;
        self.ensure_current(generation)?;

        let candidate = HitResult::topmost_eligible(&hits);
        let mut highlight = session.highlight().lock().await;
        // A newer call may have applied while the lock was contended
        self.ensure_current(generation)?;
        Ok(highlight.apply(candidate, session.highlighter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_index::tests::feature;
    use crate::geometry::tests::square;
    use crate::highlight::tests::{Event, RecordingHighlighter, hit};
    use crate::session::tests::test_session;
    use crate::{AreaGraphic, Highlighter};
    use std::sync::Mutex;

    /// Resolves `x` to feature `x` (0 means nothing), after a per-call delay
    struct FakeHitTester {
        delays: Vec<(i64, Duration)>,
        calls: Mutex<Vec<i64>>,
    }

    impl FakeHitTester {
        fn new(delays: Vec<(i64, Duration)>) -> Self {
            Self {
                delays,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HitTester for FakeHitTester {
        async fn hit_test(&self, point: &MapPoint, _tolerance: f64) -> Result<Vec<HitResult>> {
            let id = point.x() as i64;
            self.calls.lock().unwrap().push(id);
            let delay = self
                .delays
                .iter()
                .find(|(k, _)| *k == id)
                .map(|(_, d)| *d)
                .unwrap_or_default();
            tokio::time::sleep(delay).await;
            Ok(if id == 0 { Vec::new() } else { vec![hit(id)] })
        }
    }

    struct FailingHitTester;

    #[async_trait]
    impl HitTester for FailingHitTester {
        async fn hit_test(&self, _point: &MapPoint, _tolerance: f64) -> Result<Vec<HitResult>> {
            Err(Error::InvalidGeometry("unreadable layer geometry".to_string()))
        }
    }

    fn at(x: f64) -> MapPoint {
        MapPoint::new(x, 0.0, SpatialReference::WEB_MERCATOR)
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_hit_test_is_cancelled() {
        let highlighter = RecordingHighlighter::default();
        let session = test_session(Arc::new(highlighter.clone()));
        let tracker = PointerTracker::new(Duration::from_millis(50));
        let tester = FakeHitTester::new(vec![
            (1, Duration::from_millis(100)),
            (2, Duration::from_millis(10)),
        ]);

        // R1 is mid hit-test when R2 arrives
        let r1 = tracker.track(&session, &tester, at(1.0), 1.0);
        let r2 = async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            tracker.track(&session, &tester, at(2.0), 1.0).await
        };
        let (r1, r2) = tokio::join!(r1, r2);

        assert!(r1.unwrap_err().is_cancelled());
        assert_eq!(
            r2.unwrap(),
            Transition::Acquired {
                feature_id: ObjectId(2),
                released: None
            }
        );
        assert_eq!(highlighter.events(), vec![Event::Acquire(ObjectId(2))]);
        assert_eq!(session.highlight().lock().await.current_feature_id(), Some(ObjectId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_debounced() {
        let highlighter = RecordingHighlighter::default();
        let session = test_session(Arc::new(highlighter.clone()));
        let tracker = PointerTracker::new(Duration::from_millis(50));
        let tester = FakeHitTester::new(Vec::new());

        let step = |x: u64| {
            let (session, tracker, tester) = (&session, &tracker, &tester);
            async move {
                tokio::time::sleep(Duration::from_millis(10 * x)).await;
                tracker.track(session, tester, at(x as f64), 1.0).await
            }
        };
        let (r1, r2, r3) = tokio::join!(step(1), step(2), step(3));

        assert!(r1.unwrap_err().is_cancelled());
        assert!(r2.unwrap_err().is_cancelled());
        assert!(r3.is_ok());
        // Only the last position of the burst reached the hit-tester
        assert_eq!(*tester.calls.lock().unwrap(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_hit_releases() {
        let highlighter = RecordingHighlighter::default();
        let session = test_session(Arc::new(highlighter.clone()));
        let tracker = PointerTracker::new(Duration::from_millis(50));
        let tester = FakeHitTester::new(Vec::new());

        tracker.track(&session, &tester, at(4.0), 1.0).await.unwrap();
        let transition = tracker.track(&session, &tester, at(0.0), 1.0).await.unwrap();
        assert_eq!(
            transition,
            Transition::Released {
                feature_id: ObjectId(4)
            }
        );
        assert!(session.highlight().lock().await.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_test_failure_reaches_caller() {
        let highlighter = RecordingHighlighter::default();
        let session = test_session(Arc::new(highlighter.clone()));
        let tracker = PointerTracker::new(Duration::from_millis(50));

        let err = tracker
            .track(&session, &FailingHitTester, at(1.0), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
        assert!(!err.is_cancelled());
        assert!(session.highlight().lock().await.is_idle());
        assert!(highlighter.events().is_empty());
    }

    #[tokio::test]
    async fn test_local_hit_tester_order() {
        let highlighter: Arc<dyn Highlighter> = Arc::new(RecordingHighlighter::default());
        let session = Arc::new(test_session(highlighter));
        session
            .graphics()
            .write()
            .await
            .append_areas([AreaGraphic::service_area(square(-50.0, -50.0, 100.0), 15.0)]);

        let index = Arc::new(FeatureIndex::from_features([
            feature(1, 0.0, 0.0),
            feature(2, 3.0, 0.0),
            feature(3, 40.0, 0.0),
        ]));
        let tester = LocalHitTester::new()
            .with_graphics(Arc::clone(&session))
            .with_layer(LayerInfo::new("trees", Some(DetailTemplate::trees())), index);

        let hits = tester.hit_test(&at(2.0), 5.0).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].layer.id, GRAPHICS_LAYER_ID);
        // Nearest feature first
        assert_eq!(hits[1].feature.object_id, ObjectId(2));
        assert_eq!(
            HitResult::topmost_eligible(&hits).map(|h| h.feature.object_id),
            Some(ObjectId(2))
        );
    }
}
