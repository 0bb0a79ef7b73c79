//! Per-subscriber subscription groups
//!
//! A logical subscriber registers its handlers in batches under a
//! [`SubscriberKey`] and later tears all of them down at once. The key is a
//! plain value that outlives the subscriber object, so a subscriber that has
//! already been dropped can still be looked up and cancelled cleanly.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::subscription::Subscription;

/// Stable identity of a logical subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Group key: the same subscriber may register independently under
/// different handler sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberKey {
    pub subscriber: SubscriberId,
    pub handler_set: &'static str,
}

impl SubscriberKey {
    pub fn new(subscriber: SubscriberId, handler_set: &'static str) -> Self {
        Self {
            subscriber,
            handler_set,
        }
    }

    /// Key whose handler set is named after `H`
    pub fn of<H: ?Sized>(subscriber: SubscriberId) -> Self {
        Self::new(subscriber, std::any::type_name::<H>())
    }
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subscriber, self.handler_set)
    }
}

/// Liveness flag shared by a group and the gates of its subscriptions
#[derive(Debug)]
pub struct Liveness {
    active: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` for the call that flipped the flag
    pub fn dispose(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

struct SubscriptionGroup {
    liveness: Arc<Liveness>,
    subscriptions: Vec<Subscription>,
}

impl SubscriptionGroup {
    fn new() -> Self {
        Self {
            liveness: Arc::new(Liveness::new()),
            subscriptions: Vec::new(),
        }
    }

    fn is_active(&self) -> bool {
        self.liveness.is_active() && self.subscriptions.iter().any(|s| !s.is_disposed())
    }
}

/// Maps subscriber keys to the subscriptions created for them
#[derive(Default)]
pub struct LifecycleManager {
    groups: DashMap<SubscriberKey, SubscriptionGroup>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Liveness of the group for `key`, creating an empty group if needed
    pub fn open(&self, key: &SubscriberKey) -> Arc<Liveness> {
        let group = self.groups.entry(*key).or_insert_with(SubscriptionGroup::new);
        Arc::clone(&group.liveness)
    }

    /// Append `subscriptions` to the group for `key`, creating it if needed
    pub fn register_group(&self, key: &SubscriberKey, subscriptions: Vec<Subscription>) {
        self.groups
            .entry(*key)
            .or_insert_with(SubscriptionGroup::new)
            .subscriptions
            .extend(subscriptions);
    }

    /// Append to the group only if it is still the one `liveness` came from.
    ///
    /// If the group was cancelled in the meantime the subscriptions are
    /// disposed instead and `false` is returned.
    pub(crate) fn register_opened(
        &self,
        key: &SubscriberKey,
        liveness: &Arc<Liveness>,
        subscriptions: Vec<Subscription>,
    ) -> bool {
        if let Some(mut group) = self.groups.get_mut(key) {
            if Arc::ptr_eq(&group.liveness, liveness) {
                group.subscriptions.extend(subscriptions);
                return true;
            }
        }

        debug!(key = %key, "Group cancelled during registration");
        for subscription in &subscriptions {
            subscription.dispose();
        }
        false
    }

    /// Forget the group for `key` if it is still the one `liveness` came
    /// from and nothing was ever registered in it.
    pub(crate) fn close_if_empty(&self, key: &SubscriberKey, liveness: &Arc<Liveness>) -> bool {
        let removed = self.groups.remove_if(key, |_, group| {
            Arc::ptr_eq(&group.liveness, liveness) && group.subscriptions.is_empty()
        });
        match removed {
            Some((_, group)) => {
                group.liveness.dispose();
                debug!(key = %key, "Empty subscriber group closed");
                true
            }
            None => false,
        }
    }

    /// Dispose every subscription of `key` and forget the group.
    ///
    /// Returns how many subscriptions the group held; 0 if there was none.
    pub fn cancel_group(&self, key: &SubscriberKey) -> usize {
        let Some((_, group)) = self.groups.remove(key) else {
            return 0;
        };

        group.liveness.dispose();
        for subscription in &group.subscriptions {
            subscription.dispose();
        }
        debug!(key = %key, count = group.subscriptions.len(), "Subscriber group cancelled");
        group.subscriptions.len()
    }

    /// Group exists and holds at least one live subscription
    pub fn is_active(&self, key: &SubscriberKey) -> bool {
        self.groups.get(key).is_some_and(|group| group.is_active())
    }

    /// Subscriptions currently held for `key`
    pub fn subscriptions(&self, key: &SubscriberKey) -> Vec<Subscription> {
        self.groups
            .get(key)
            .map(|group| group.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("groups", &self.groups.len())
            .finish()
    }
}
