//! Highlight handles and the hover state machine
//!
//! At most one highlight handle is alive at any time: the previous handle is
//! always released before a new one is acquired.

use crate::{DetailTemplate, FeatureRecord, HitResult, ObjectId};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Token for an active visual emphasis on one feature
///
/// Releasing is explicit; a handle dropped without release is released too.
pub struct HighlightHandle {
    feature_id: ObjectId,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl HighlightHandle {
    pub fn new(feature_id: ObjectId, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            feature_id,
            release: Some(Box::new(release)),
        }
    }

    #[inline]
    pub fn feature_id(&self) -> ObjectId {
        self.feature_id
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for HighlightHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for HighlightHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightHandle")
            .field("feature_id", &self.feature_id)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Something that can visually emphasise a feature
pub trait Highlighter: Send + Sync {
    fn highlight(&self, feature: &FeatureRecord) -> HighlightHandle;
}

/// Shared set of highlighted feature ids, read by the renderer
#[derive(Clone, Debug, Default)]
pub struct HighlightSet {
    ids: Arc<RwLock<HashSet<ObjectId>>>,
}

impl HighlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self
            .ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Highlighter for HighlightSet {
    fn highlight(&self, feature: &FeatureRecord) -> HighlightHandle {
        let id = feature.object_id;
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);

        let ids = Arc::clone(&self.ids);
        HighlightHandle::new(id, move || {
            ids.write().unwrap_or_else(PoisonError::into_inner).remove(&id);
        })
    }
}

/// Content of the detail display for the tracked feature
#[derive(Clone, Debug, PartialEq)]
pub struct Detail {
    pub feature: FeatureRecord,
    pub template: DetailTemplate,
}

impl Detail {
    pub fn title(&self) -> &str {
        &self.template.title
    }

    pub fn rows(&self) -> Vec<(String, String)> {
        self.template.render(&self.feature)
    }
}

/// Outcome of feeding one resolved hit-test into the session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Same feature (or still nothing) under the pointer
    Unchanged,
    /// Tracked feature released, session is idle
    Released { feature_id: ObjectId },
    /// New feature tracked, after releasing the previous one if any
    Acquired {
        feature_id: ObjectId,
        released: Option<ObjectId>,
    },
}

#[derive(Debug)]
struct Tracked {
    feature_id: ObjectId,
    handle: HighlightHandle,
    detail: Detail,
}

/// `Idle` when nothing is tracked, `Tracking(feature, handle)` otherwise
#[derive(Debug, Default)]
pub struct HighlightSession {
    tracked: Option<Tracked>,
}

impl HighlightSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.tracked.is_none()
    }

    pub fn current_feature_id(&self) -> Option<ObjectId> {
        self.tracked.as_ref().map(|t| t.feature_id)
    }

    pub fn detail(&self) -> Option<&Detail> {
        self.tracked.as_ref().map(|t| &t.detail)
    }

    /// Apply the topmost eligible hit (if any) of a resolved hit-test
    ///
    /// A candidate without a detail template is treated as no candidate.
    pub fn apply(&mut self, candidate: Option<&HitResult>, highlighter: &dyn Highlighter) -> Transition {
        let candidate =
            candidate.and_then(|hit| hit.layer.detail_template.as_ref().map(|t| (hit, t)));

        match candidate {
            None => match self.tracked.take() {
                None => Transition::Unchanged,
                Some(tracked) => {
                    tracked.handle.release();
                    tracing::trace!("Released highlight of feature {}", tracked.feature_id);
                    Transition::Released {
                        feature_id: tracked.feature_id,
                    }
                }
            },
            Some((hit, _)) if self.current_feature_id() == Some(hit.feature.object_id) => {
                Transition::Unchanged
            }
            Some((hit, template)) => {
                let released = self.tracked.take().map(|tracked| {
                    tracked.handle.release();
                    tracked.feature_id
                });

                let feature_id = hit.feature.object_id;
                let handle = highlighter.highlight(&hit.feature);
                self.tracked = Some(Tracked {
                    feature_id,
                    handle,
                    detail: Detail {
                        feature: hit.feature.clone(),
                        template: template.clone(),
                    },
                });
                tracing::trace!("Highlighted feature {}", feature_id);
                Transition::Acquired {
                    feature_id,
                    released,
                }
            }
        }
    }

    /// Release any tracked highlight and return to `Idle`
    pub fn reset(&mut self) {
        if let Some(tracked) = self.tracked.take() {
            tracked.handle.release();
        }
    }
}
