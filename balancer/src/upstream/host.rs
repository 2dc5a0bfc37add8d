use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// An upstream endpoint.
///
/// Cheap to share — hosts are handed out as `Arc<Host>` and stay alive for
/// as long as any published snapshot (or in-flight selection) references
/// them. The membership side flips `healthy` and republishes snapshots; the
/// request lifecycle drives `active_requests`.
pub struct Host {
    address: Arc<str>,
    weight: u32,
    active_requests: AtomicU64,
    healthy: AtomicBool,
}

pub type HostRef = Arc<Host>;

impl Host {
    /// Weights below 1 are clamped up; a zero weight would make a host
    /// unselectable in weighted disciplines.
    pub fn new(address: impl Into<Arc<str>>, weight: u32) -> HostRef {
        Arc::new(Self {
            address: address.into(),
            weight: weight.max(1),
            active_requests: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        })
    }

    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[inline]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    #[inline]
    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn inc_active(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("weight", &self.weight)
            .field("healthy", &self.healthy())
            .finish()
    }
}

/// RAII guard — increments the host's active request counter on creation
/// and decrements it on drop.
pub struct ActiveRequestGuard {
    host: HostRef,
}

impl ActiveRequestGuard {
    pub fn new(host: HostRef) -> Self {
        host.inc_active();
        Self { host }
    }

    pub fn host(&self) -> &HostRef {
        &self.host
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.host.dec_active();
    }
}

/// One published membership view of a priority tier.
///
/// Locality index 0 is the local locality. The healthy lists are
/// order-preserving projections of the full lists; both are built by the
/// membership side so that a selection observes one consistent view.
#[derive(Default)]
pub struct HostSetSnapshot {
    pub hosts: Vec<HostRef>,
    pub healthy_hosts: Vec<HostRef>,
    pub hosts_per_locality: Vec<Vec<HostRef>>,
    pub healthy_hosts_per_locality: Vec<Vec<HostRef>>,
}

impl HostSetSnapshot {
    /// Build a snapshot from full lists, deriving the healthy projections
    /// from each host's health flag.
    pub fn from_hosts(hosts: Vec<HostRef>, hosts_per_locality: Vec<Vec<HostRef>>) -> Self {
        let healthy_hosts = hosts.iter().filter(|h| h.healthy()).cloned().collect();
        let healthy_hosts_per_locality = hosts_per_locality
            .iter()
            .map(|locality| locality.iter().filter(|h| h.healthy()).cloned().collect())
            .collect();
        Self {
            hosts,
            healthy_hosts,
            hosts_per_locality,
            healthy_hosts_per_locality,
        }
    }
}

type MemberUpdateCb = Box<dyn Fn(u32, &[HostRef], &[HostRef]) + Send + Sync>;

/// Registered membership-change callbacks for one priority set.
///
/// Dispatch happens synchronously on the updating thread, while holding the
/// registry lock: callbacks must not register or unregister other
/// callbacks.
#[derive(Default)]
pub(crate) struct CallbackHub {
    callbacks: Mutex<Vec<(u64, MemberUpdateCb)>>,
    next_id: AtomicU64,
}

impl CallbackHub {
    fn add(self: &Arc<Self>, cb: MemberUpdateCb) -> CallbackHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().unwrap().push((id, cb));
        CallbackHandle {
            id,
            hub: Arc::downgrade(self),
        }
    }

    fn run(&self, priority: u32, added: &[HostRef], removed: &[HostRef]) {
        let callbacks = self.callbacks.lock().unwrap();
        for (_, cb) in callbacks.iter() {
            cb(priority, added, removed);
        }
    }
}

/// Scoped subscription to membership-change events.
///
/// Dropping the handle removes the callback; a load balancer going away
/// must never leave a dangling callback behind on the (longer-lived)
/// priority set.
pub struct CallbackHandle {
    id: u64,
    hub: Weak<CallbackHub>,
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.callbacks.lock().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}

/// The set of hosts at one priority tier.
///
/// Membership updates replace the snapshot wholesale and then fire the
/// owning priority set's callbacks; readers that loaded the previous
/// snapshot keep a consistent view until they let go of it.
pub struct HostSet {
    priority: u32,
    snapshot: ArcSwap<HostSetSnapshot>,
    hub: Arc<CallbackHub>,
}

impl HostSet {
    fn new(priority: u32, hub: Arc<CallbackHub>) -> Self {
        Self {
            priority,
            snapshot: ArcSwap::from_pointee(HostSetSnapshot::default()),
            hub,
        }
    }

    #[inline]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn snapshot(&self) -> Arc<HostSetSnapshot> {
        self.snapshot.load_full()
    }

    /// Publish a new membership view and notify subscribers.
    pub fn update_hosts(&self, snapshot: HostSetSnapshot, added: &[HostRef], removed: &[HostRef]) {
        self.snapshot.store(Arc::new(snapshot));
        self.hub.run(self.priority, added, removed);
    }
}

/// Ordered mapping from priority (0 = highest) to [`HostSet`].
///
/// Tiers are created on demand; asking for priority `p` fills any gaps
/// below it with empty host sets so that tier indices stay dense.
#[derive(Default)]
pub struct PrioritySet {
    host_sets: RwLock<Vec<Arc<HostSet>>>,
    hub: Arc<CallbackHub>,
}

impl PrioritySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the host set for `priority`.
    pub fn host_set(&self, priority: u32) -> Arc<HostSet> {
        let mut sets = self.host_sets.write().unwrap();
        while sets.len() <= priority as usize {
            let idx = sets.len() as u32;
            sets.push(Arc::new(HostSet::new(idx, Arc::clone(&self.hub))));
        }
        Arc::clone(&sets[priority as usize])
    }

    /// All host sets in priority order. Creating a tier after this call is
    /// observed on the next call.
    pub fn host_sets(&self) -> Vec<Arc<HostSet>> {
        self.host_sets.read().unwrap().clone()
    }

    /// Subscribe to membership-change events from any tier of this set.
    pub fn add_member_update_cb(
        &self,
        cb: impl Fn(u32, &[HostRef], &[HostRef]) + Send + Sync + 'static,
    ) -> CallbackHandle {
        self.hub.add(Box::new(cb))
    }
}
