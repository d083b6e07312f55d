// images.rs — image cache contract, placeholder images, deferred updates
//
// Texture loading and residency belong to the image cache; the back end only
// binds handles. Cinematic images are refreshed off the render thread: the
// back end pushes them onto a `DeferredUpdateQueue` and the decode side
// drains it.

use crossbeam::channel::{self, Receiver, Sender};

/// Non-owning reference to an image held by the image cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u32);

/// Result of binding an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindResult {
    Bound,
    /// The image has no displayable content yet (a cinematic that has not
    /// decoded its first frame).
    NotYetReady,
}

/// The image cache as seen by the back end.
pub trait ImageCache {
    /// Bind `image` to the current texture unit.
    fn bind(&mut self, image: ImageHandle) -> BindResult;
    /// Queue `image` for a content update after this frame.
    fn register_for_deferred_update(&mut self, image: ImageHandle);
    /// Earliest time, in milliseconds, the next frame of `image` is needed.
    fn set_cinematic_next_time(&mut self, image: ImageHandle, time_ms: i32);
}

/// Well-known placeholder images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalImages {
    pub default_image: ImageHandle,
    pub black_image: ImageHandle,
    pub white_image: ImageHandle,
    pub flat_normal_map: ImageHandle,
}

impl GlobalImages {
    pub fn is_black(&self, image: ImageHandle) -> bool {
        image == self.black_image
    }
}

// ============================================================
// Deferred update queue
// ============================================================

/// A cinematic image that needs its next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeferredUpdate {
    pub image: ImageHandle,
    pub next_time_ms: i32,
}

/// Sending half, held by the render thread.
#[derive(Clone)]
pub struct DeferredUpdateSender {
    tx: Sender<DeferredUpdate>,
}

impl DeferredUpdateSender {
    /// Returns false once the receiving side is gone.
    pub fn push(&self, update: DeferredUpdate) -> bool {
        self.tx.send(update).is_ok()
    }
}

/// Receiving half, held by the decode thread.
pub struct DeferredUpdateReceiver {
    rx: Receiver<DeferredUpdate>,
}

impl DeferredUpdateReceiver {
    /// Take every pending update. An image queued more than once keeps only
    /// its latest request, in first-queued order.
    pub fn drain(&self) -> Vec<DeferredUpdate> {
        let mut out: Vec<DeferredUpdate> = Vec::new();
        for update in self.rx.try_iter() {
            match out.iter_mut().find(|u| u.image == update.image) {
                Some(existing) => existing.next_time_ms = update.next_time_ms,
                None => out.push(update),
            }
        }
        out
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Create a connected sender / receiver pair.
pub fn deferred_update_queue() -> (DeferredUpdateSender, DeferredUpdateReceiver) {
    let (tx, rx) = channel::unbounded();
    (DeferredUpdateSender { tx }, DeferredUpdateReceiver { rx })
}

// ============================================================
// QueuedImageCache
// ============================================================

/// Image cache front that tracks the bound image and per-image readiness,
/// and forwards deferred updates to a `DeferredUpdateSender`. Suitable for
/// hosts whose real cache lives on another thread.
pub struct QueuedImageCache {
    updates: DeferredUpdateSender,
    ready: std::collections::HashSet<ImageHandle>,
    next_time: std::collections::HashMap<ImageHandle, i32>,
    pending_registration: Vec<ImageHandle>,
    pub bound: Option<ImageHandle>,
}

impl QueuedImageCache {
    pub fn new(updates: DeferredUpdateSender) -> Self {
        Self {
            updates,
            ready: Default::default(),
            next_time: Default::default(),
            pending_registration: Vec::new(),
            bound: None,
        }
    }

    /// Mark `image` as having displayable content.
    pub fn mark_ready(&mut self, image: ImageHandle) {
        self.ready.insert(image);
    }

    /// Mark every image in `images` ready.
    pub fn mark_all_ready(&mut self, images: impl IntoIterator<Item = ImageHandle>) {
        self.ready.extend(images);
    }

    pub fn next_time(&self, image: ImageHandle) -> Option<i32> {
        self.next_time.get(&image).copied()
    }

    /// Push every registered image to the decode side. Called at the end of
    /// the frame.
    pub fn flush(&mut self) {
        for image in self.pending_registration.drain(..) {
            let next_time_ms = self.next_time.get(&image).copied().unwrap_or(0);
            if !self.updates.push(DeferredUpdate { image, next_time_ms }) {
                log::debug!("deferred update queue closed, dropping image {}", image.0);
            }
        }
    }
}

impl ImageCache for QueuedImageCache {
    fn bind(&mut self, image: ImageHandle) -> BindResult {
        if self.ready.contains(&image) {
            self.bound = Some(image);
            BindResult::Bound
        } else {
            BindResult::NotYetReady
        }
    }

    fn register_for_deferred_update(&mut self, image: ImageHandle) {
        if !self.pending_registration.contains(&image) {
            self.pending_registration.push(image);
        }
    }

    fn set_cinematic_next_time(&mut self, image: ImageHandle, time_ms: i32) {
        self.next_time.insert(image, time_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_drain_keeps_latest_time() {
        let (tx, rx) = deferred_update_queue();
        let a = ImageHandle(1);
        let b = ImageHandle(2);
        assert!(tx.push(DeferredUpdate { image: a, next_time_ms: 100 }));
        assert!(tx.push(DeferredUpdate { image: b, next_time_ms: 150 }));
        assert!(tx.push(DeferredUpdate { image: a, next_time_ms: 200 }));
        assert_eq!(rx.pending(), 3);

        let drained = rx.drain();
        assert_eq!(
            drained,
            vec![
                DeferredUpdate { image: a, next_time_ms: 200 },
                DeferredUpdate { image: b, next_time_ms: 150 },
            ]
        );
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_push_after_receiver_dropped() {
        let (tx, rx) = deferred_update_queue();
        drop(rx);
        assert!(!tx.push(DeferredUpdate { image: ImageHandle(1), next_time_ms: 0 }));
    }

    #[test]
    fn test_queued_cache_bind_readiness() {
        let (tx, _rx) = deferred_update_queue();
        let mut cache = QueuedImageCache::new(tx);
        let img = ImageHandle(9);
        assert_eq!(cache.bind(img), BindResult::NotYetReady);
        assert_eq!(cache.bound, None);
        cache.mark_ready(img);
        assert_eq!(cache.bind(img), BindResult::Bound);
        assert_eq!(cache.bound, Some(img));
    }

    #[test]
    fn test_queued_cache_flush_sends_registered_images() {
        let (tx, rx) = deferred_update_queue();
        let mut cache = QueuedImageCache::new(tx);
        let img = ImageHandle(4);
        cache.set_cinematic_next_time(img, 2500);
        cache.register_for_deferred_update(img);
        cache.register_for_deferred_update(img);
        assert_eq!(rx.pending(), 0);

        cache.flush();
        assert_eq!(rx.drain(), vec![DeferredUpdate { image: img, next_time_ms: 2500 }]);
    }

    #[test]
    fn test_global_images_black_check() {
        let globals = GlobalImages {
            default_image: ImageHandle(0),
            black_image: ImageHandle(1),
            white_image: ImageHandle(2),
            flat_normal_map: ImageHandle(3),
        };
        assert!(globals.is_black(ImageHandle(1)));
        assert!(!globals.is_black(ImageHandle(2)));
    }
}
