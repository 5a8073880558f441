//! Frame router - latest-value cache of per-entity pixel buffers
//!
//! The engine pushes one tick per render frame carrying a map of entity id to
//! flat RGB bytes. The router keeps only the newest buffer per entity and
//! wakes renderers watching that entity. Upstream feeds are per physical
//! device and reference counted: many renderers of the same entity, or of
//! virtuals sharing a device, share one upstream subscription.

mod preview;

pub use preview::{color_patches, Patch, PreviewSurface, Rgb};

use crate::engine::{EngineCommands, FrameMap};
use crate::store::{AppState, StateStore};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Shared, immutable pixel buffer (`3 * pixel_count` bytes)
pub type FrameBuffer = Arc<[u8]>;

/// Identifies one subscription issued by [`FrameRouter::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameToken(u64);

#[derive(Default)]
struct Refcounts {
    next_token: u64,
    /// token -> (entity id, device addresses it holds)
    tokens: HashMap<FrameToken, (String, Vec<String>)>,
    entities: HashMap<String, u32>,
    devices: HashMap<String, u32>,
}

struct Inner {
    engine: Arc<dyn EngineCommands>,
    store: StateStore<AppState>,
    refs: Mutex<Refcounts>,
    frames: DashMap<String, watch::Sender<Option<FrameBuffer>>>,
    notify_unchanged: bool,
}

/// Reference-counted frame subscriptions plus the latest-frame cache
#[derive(Clone)]
pub struct FrameRouter {
    inner: Arc<Inner>,
}

/// A renderer's handle on one entity's frames
///
/// Dropping it releases the subscription; call [`FrameSubscription::release`]
/// to release it deterministically and wait for the upstream command.
pub struct FrameSubscription {
    token: FrameToken,
    entity_id: String,
    rx: watch::Receiver<Option<FrameBuffer>>,
    router: Option<FrameRouter>,
}

impl FrameSubscription {
    pub fn token(&self) -> FrameToken {
        self.token
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Current buffer; `None` until the first tick for this entity
    pub fn latest(&self) -> Option<FrameBuffer> {
        self.rx.borrow().clone()
    }

    /// Wait until a new buffer arrives
    ///
    /// Returns `None` once the router is gone.
    pub async fn changed(&mut self) -> Option<FrameBuffer> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }

    pub async fn release(mut self) {
        if let Some(router) = self.router.take() {
            router.unsubscribe(self.token).await;
        }
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        let Some(router) = self.router.take() else {
            return;
        };
        let token = self.token;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { router.unsubscribe(token).await });
            }
            Err(_) => warn!("Frame subscription {:?} dropped outside a runtime", token),
        }
    }
}

impl FrameRouter {
    pub fn new(engine: Arc<dyn EngineCommands>, store: StateStore<AppState>, notify_unchanged: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                store,
                refs: Mutex::new(Refcounts::default()),
                frames: DashMap::new(),
                notify_unchanged,
            }),
        }
    }

    /// Physical device addresses backing an entity
    ///
    /// Entities are virtual ids or raw device addresses. Device-backed
    /// virtuals map to their source device; composite virtuals to every
    /// device they draw from.
    fn device_addresses(&self, entity_id: &str) -> Vec<String> {
        self.inner.store.read(|state| {
            if let Some(v) = state.virtual_by_id(entity_id) {
                v.device_addresses()
            } else if state.device_by_id(entity_id).is_some() {
                vec![entity_id.to_string()]
            } else {
                Vec::new()
            }
        })
    }

    fn sender(&self, entity_id: &str) -> watch::Sender<Option<FrameBuffer>> {
        self.inner
            .frames
            .entry(entity_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    /// Subscribe to an entity's frames
    ///
    /// The first subscriber of a device address requests its upstream feed.
    /// An upstream failure is logged; the local subscription still stands and
    /// renders blank until frames arrive.
    pub async fn subscribe(&self, entity_id: &str) -> FrameSubscription {
        let addresses = self.device_addresses(entity_id);
        let unresolved = addresses.is_empty();
        let (token, first_for_devices) = {
            let mut refs = self.inner.refs.lock();
            refs.next_token += 1;
            let token = FrameToken(refs.next_token);
            *refs.entities.entry(entity_id.to_string()).or_insert(0) += 1;

            let mut first = Vec::new();
            for address in &addresses {
                let count = refs.devices.entry(address.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    first.push(address.clone());
                }
            }
            refs.tokens.insert(token, (entity_id.to_string(), addresses));
            (token, first)
        };

        if unresolved {
            debug!("No devices known for {} yet, feed attaches once it resolves", entity_id);
        }
        self.request_feeds(first_for_devices).await;

        FrameSubscription {
            token,
            entity_id: entity_id.to_string(),
            rx: self.sender(entity_id).subscribe(),
            router: Some(self.clone()),
        }
    }

    async fn request_feeds(&self, addresses: Vec<String>) {
        for address in addresses {
            debug!("Requesting upstream frames for {}", address);
            if let Err(e) = self
                .inner
                .engine
                .subscribe_to_frames(&address)
                .await
                .into_result("subscribe_to_frames")
            {
                warn!("{}", e);
            }
        }
    }

    /// Attach subscriptions whose entity was unknown when they were issued
    ///
    /// Called after devices or virtuals change; tokens that still resolve to
    /// no device stay waiting.
    pub async fn resolve_unattached(&self) {
        let waiting: Vec<(FrameToken, String)> = {
            let refs = self.inner.refs.lock();
            refs.tokens
                .iter()
                .filter(|(_, (_, addresses))| addresses.is_empty())
                .map(|(token, (entity_id, _))| (*token, entity_id.clone()))
                .collect()
        };
        if waiting.is_empty() {
            return;
        }

        let resolved: Vec<(FrameToken, Vec<String>)> = waiting
            .into_iter()
            .map(|(token, entity_id)| (token, self.device_addresses(&entity_id)))
            .filter(|(_, addresses)| !addresses.is_empty())
            .collect();

        let first_for_devices = {
            let mut refs = self.inner.refs.lock();
            let mut first = Vec::new();
            for (token, addresses) in resolved {
                // Released while we were resolving
                let Some(entry) = refs.tokens.get_mut(&token) else {
                    continue;
                };
                if !entry.1.is_empty() {
                    continue;
                }
                entry.1 = addresses.clone();
                for address in addresses {
                    let count = refs.devices.entry(address.clone()).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        first.push(address);
                    }
                }
            }
            first
        };
        self.request_feeds(first_for_devices).await;
    }

    /// Release a token
    ///
    /// Unknown or already released tokens are a no-op; counts never go
    /// below zero.
    pub async fn unsubscribe(&self, token: FrameToken) {
        let last_for_devices = {
            let mut refs = self.inner.refs.lock();
            let Some((entity_id, addresses)) = refs.tokens.remove(&token) else {
                debug!("Ignoring release of unknown frame token {:?}", token);
                return;
            };

            if let Some(count) = refs.entities.get_mut(&entity_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    refs.entities.remove(&entity_id);
                }
            }

            let mut last = Vec::new();
            for address in addresses {
                match refs.devices.get_mut(&address) {
                    Some(count) if *count > 1 => *count -= 1,
                    Some(_) => {
                        refs.devices.remove(&address);
                        last.push(address);
                    }
                    None => debug!("Device feed {} already released", address),
                }
            }
            last
        };

        for address in last_for_devices {
            debug!("Releasing upstream frames for {}", address);
            if let Err(e) = self
                .inner
                .engine
                .unsubscribe_from_frames(&address)
                .await
                .into_result("unsubscribe_from_frames")
            {
                warn!("{}", e);
            }
        }
    }

    /// Absorb one engine tick
    ///
    /// Entities missing from a tick keep their previous buffer.
    pub fn on_tick(&self, frames: FrameMap) {
        trace!("Tick with {} entities", frames.len());
        for (entity_id, bytes) in frames {
            let buffer: FrameBuffer = bytes.into();
            let sender = self.sender(&entity_id);
            if self.inner.notify_unchanged {
                sender.send_replace(Some(buffer));
            } else {
                sender.send_if_modified(|current| {
                    if current.as_deref() == Some(&*buffer) {
                        return false;
                    }
                    *current = Some(buffer);
                    true
                });
            }
        }
    }

    /// Synchronous read of an entity's newest buffer
    pub fn latest(&self, entity_id: &str) -> Option<FrameBuffer> {
        self.inner.frames.get(entity_id).and_then(|tx| tx.borrow().clone())
    }

    pub fn subscriber_count(&self, entity_id: &str) -> u32 {
        self.inner.refs.lock().entities.get(entity_id).copied().unwrap_or(0)
    }

    /// Number of local subscriptions holding a device's upstream feed
    pub fn upstream_count(&self, address: &str) -> u32 {
        self.inner.refs.lock().devices.get(address).copied().unwrap_or(0)
    }
}
