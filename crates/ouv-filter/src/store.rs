//! Global filter store
//!
//! Holds the canonical active filter set. Mutations schedule a trailing-edge
//! notification on the shared bus; a burst of `apply`/`remove` calls within
//! one debounce window produces exactly one [`FILTERS_CHANGED`] event carrying
//! the final set. `clear` notifies immediately.
//!
//! ```text
//! Idle ──apply/remove/toggle──▶ PendingNotify ──timer──▶ Idle (listeners run)
//!              ▲                    │
//!              └──── re-arm ◀───────┘
//! ```

use crate::events::{DashboardBus, DashboardEvent, FILTERS_CHANGED};
use crate::filter::{Filter, FilterField};
use crate::request::FilterRequest;
use ouv_bus::{Debouncer, Subscription};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Default quiet period before listeners are notified
pub const DEFAULT_FILTER_DEBOUNCE: Duration = Duration::from_millis(200);

struct StoreInner {
    filters: Mutex<Vec<Filter>>,
    bus: DashboardBus,
    debouncer: Debouncer,
}

impl StoreInner {
    fn notify_now(&self) {
        let snapshot = self.filters.lock().clone();
        tracing::debug!(active = snapshot.len(), "notifying filter change");
        self.bus
            .emit(FILTERS_CHANGED, &DashboardEvent::FiltersChanged(snapshot));
    }
}

/// Canonical active filter set
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct GlobalFilterStore {
    inner: Arc<StoreInner>,
}

impl GlobalFilterStore {
    /// Create a store publishing on `bus`
    #[must_use]
    pub fn new(bus: DashboardBus, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                filters: Mutex::new(Vec::new()),
                bus,
                debouncer: Debouncer::new(debounce),
            }),
        }
    }

    /// Create a store with [`DEFAULT_FILTER_DEBOUNCE`]
    #[must_use]
    pub fn with_default_debounce(bus: DashboardBus) -> Self {
        Self::new(bus, DEFAULT_FILTER_DEBOUNCE)
    }

    /// Apply `field = value`
    ///
    /// Single-select replaces every filter on `field`; multi-select adds the
    /// pair unless it is already present. Returns `false` (and schedules no
    /// notification) when the set is unchanged.
    pub fn apply(&self, field: FilterField, value: impl Into<Value>, multi_select: bool) -> bool {
        let value = value.into();
        let changed = {
            let mut filters = self.inner.filters.lock();
            if multi_select {
                add_unique(&mut filters, field, value)
            } else {
                replace_field(&mut filters, field, value)
            }
        };
        if changed {
            self.schedule_notify();
        }
        changed
    }

    /// Remove `field = value` if present, otherwise [`apply`](Self::apply) it
    ///
    /// Returns whether the pair is active afterwards.
    pub fn toggle(&self, field: FilterField, value: impl Into<Value>, multi_select: bool) -> bool {
        let value = value.into();
        let active = {
            let mut filters = self.inner.filters.lock();
            let before = filters.len();
            filters.retain(|f| !f.same_target(field, &value));
            if before != filters.len() {
                false
            } else if multi_select {
                add_unique(&mut filters, field, value)
            } else {
                replace_field(&mut filters, field, value)
            }
        };
        self.schedule_notify();
        active
    }

    /// Remove filters on `field` (only those equal to `value` when given)
    ///
    /// Returns how many filters were removed.
    pub fn remove(&self, field: FilterField, value: Option<&Value>) -> usize {
        let removed = {
            let mut filters = self.inner.filters.lock();
            let before = filters.len();
            filters.retain(|f| match value {
                Some(v) => !f.same_target(field, v),
                None => f.field != field,
            });
            before - filters.len()
        };
        if removed > 0 {
            self.schedule_notify();
        }
        removed
    }

    /// Empty the set and notify immediately, discarding any pending notification
    pub fn clear(&self) {
        self.inner.debouncer.cancel();
        self.inner.filters.lock().clear();
        tracing::info!("filters cleared");
        self.inner.notify_now();
    }

    /// Empty the set without notifying (page navigation)
    pub fn reset(&self) {
        self.inner.debouncer.cancel();
        self.inner.filters.lock().clear();
    }

    /// Deliver a pending notification now
    ///
    /// Returns `false` when nothing was pending.
    pub fn flush(&self) -> bool {
        if self.inner.debouncer.cancel() {
            self.inner.notify_now();
            true
        } else {
            false
        }
    }

    /// Whether a debounced notification is waiting to fire
    #[must_use]
    pub fn has_pending_notification(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// Whether a filter on `field` (equal to `value` when given) is active
    #[must_use]
    pub fn is_active(&self, field: FilterField, value: Option<&Value>) -> bool {
        self.inner.filters.lock().iter().any(|f| match value {
            Some(v) => f.same_target(field, v),
            None => f.field == field,
        })
    }

    /// Snapshot of the active filters in addition order
    #[must_use]
    pub fn filters(&self) -> Vec<Filter> {
        self.inner.filters.lock().clone()
    }

    /// Number of active filters
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.filters.lock().len()
    }

    /// Whether no filter is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.filters.lock().is_empty()
    }

    /// Body for an aggregated filter request against `original_url`
    #[must_use]
    pub fn to_request(&self, original_url: &str) -> FilterRequest {
        FilterRequest::aggregated(self.filters(), original_url)
    }

    /// Listen to change notifications
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[Filter]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.on(FILTERS_CHANGED, move |event| match event {
            DashboardEvent::FiltersChanged(filters) => callback(filters),
            DashboardEvent::ChartClicked { .. } => Ok(()),
        })
    }

    /// Bus the store publishes on
    #[must_use]
    pub fn bus(&self) -> &DashboardBus {
        &self.inner.bus
    }

    /// Debounce window
    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.inner.debouncer.delay()
    }

    fn schedule_notify(&self) {
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        self.inner.debouncer.schedule(move || {
            if let Some(inner) = weak.upgrade() {
                inner.notify_now();
            }
        });
    }
}

impl fmt::Debug for GlobalFilterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalFilterStore")
            .field("filters", &*self.inner.filters.lock())
            .field("debounce", &self.inner.debouncer.delay())
            .finish_non_exhaustive()
    }
}

/// Single-select: the field ends up with exactly `[field = value]`
fn replace_field(filters: &mut Vec<Filter>, field: FilterField, value: Value) -> bool {
    let mut on_field = filters.iter().filter(|f| f.field == field);
    let already = matches!(
        (on_field.next(), on_field.next()),
        (Some(only), None) if only.value == value && only.op == crate::FilterOp::Eq
    );
    if already {
        return false;
    }

    let slot = filters.iter().position(|f| f.field == field);
    filters.retain(|f| f.field != field);
    let filter = Filter::equals(field, value);
    match slot {
        Some(index) => filters.insert(index.min(filters.len()), filter),
        None => filters.push(filter),
    }
    true
}

/// Multi-select: idempotent add
fn add_unique(filters: &mut Vec<Filter>, field: FilterField, value: Value) -> bool {
    if filters.iter().any(|f| f.same_target(field, &value)) {
        return false;
    }
    filters.push(Filter::equals(field, value));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FilterOp;
    use ouv_bus::EventBus;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_with_recorder() -> (GlobalFilterStore, Arc<Mutex<Vec<Vec<Filter>>>>) {
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        store.on_change(move |filters| {
            seen_clone.lock().push(filters.to_vec());
            Ok(())
        });
        (store, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_produces_one_notification_with_final_state() {
        let (store, seen) = store_with_recorder();

        store.apply(FilterField::Tema, "Saneamento", false);
        store.apply(FilterField::Canal, "Telefone", false);
        store.remove(FilterField::Canal, None);
        store.apply(FilterField::Tema, "Saúde", false);
        assert!(store.has_pending_notification());
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![Filter::equals(FilterField::Tema, "Saúde")]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_notify_separately() {
        let (store, seen) = store_with_recorder();

        store.apply(FilterField::Tema, "Saneamento", false);
        tokio::time::sleep(Duration::from_millis(300)).await;
        store.apply(FilterField::Bairro, "Centro", true);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(seen.lock()[1].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_single_select_is_noop() {
        let (store, seen) = store_with_recorder();

        assert!(store.apply(FilterField::Tema, "Saneamento", false));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!store.apply(FilterField::Tema, "Saneamento", false));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn multi_select_duplicate_suppressed() {
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());

        assert!(store.apply(FilterField::Bairro, "Centro", true));
        assert!(!store.apply(FilterField::Bairro, "Centro", true));
        assert!(store.apply(FilterField::Bairro, "Cidade Baixa", true));

        assert_eq!(store.len(), 2);
        assert!(store.is_active(FilterField::Bairro, Some(&json!("Centro"))));
        assert!(store.is_active(FilterField::Bairro, None));
        assert!(!store.is_active(FilterField::Tema, None));
    }

    #[tokio::test(start_paused = true)]
    async fn single_select_replaces_in_place() {
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());
        store.apply(FilterField::Tema, "Saneamento", false);
        store.apply(FilterField::Canal, "Telefone", false);
        store.apply(FilterField::Tema, "Saúde", false);

        assert_eq!(
            store.filters(),
            vec![
                Filter::equals(FilterField::Tema, "Saúde"),
                Filter::equals(FilterField::Canal, "Telefone"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn single_select_collapses_multi_selection() {
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());
        store.apply(FilterField::Bairro, "Centro", true);
        store.apply(FilterField::Bairro, "Cidade Baixa", true);

        assert!(store.apply(FilterField::Bairro, "Centro", false));
        assert_eq!(store.filters(), vec![Filter::equals(FilterField::Bairro, "Centro")]);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_adds_then_removes() {
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());

        assert!(store.toggle(FilterField::Status, "Em aberto", false));
        assert!(store.is_active(FilterField::Status, Some(&json!("Em aberto"))));
        assert!(!store.toggle(FilterField::Status, "Em aberto", false));
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_toggles_alternate() {
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());
        let activated = AtomicUsize::new(0);
        let deactivated = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let counter = if store.toggle(FilterField::Bairro, "Centro", true) {
                            &activated
                        } else {
                            &deactivated
                        };
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(activated.load(Ordering::SeqCst), 200);
        assert_eq!(deactivated.load(Ordering::SeqCst), 200);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_by_value_keeps_siblings() {
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());
        store.apply(FilterField::Bairro, "Centro", true);
        store.apply(FilterField::Bairro, "Cidade Baixa", true);

        assert_eq!(store.remove(FilterField::Bairro, Some(&json!("Centro"))), 1);
        assert_eq!(store.remove(FilterField::Tema, None), 0);
        assert_eq!(
            store.filters(),
            vec![Filter::equals(FilterField::Bairro, "Cidade Baixa")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_notifies_immediately_and_cancels_pending() {
        let (store, seen) = store_with_recorder();

        store.apply(FilterField::Tema, "Saneamento", false);
        store.clear();

        assert_eq!(seen.lock().len(), 1);
        assert!(seen.lock()[0].is_empty());
        assert!(!store.has_pending_notification());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_delivers_pending_now() {
        let (store, seen) = store_with_recorder();

        assert!(!store.flush());
        store.apply(FilterField::Canal, "Internet", false);
        assert!(store.flush());
        assert_eq!(seen.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_is_silent() {
        let (store, seen) = store_with_recorder();
        store.apply(FilterField::Canal, "Internet", false);
        store.reset();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.is_empty());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_listener_does_not_starve_others() {
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));

        store.on_change(|_| anyhow::bail!("page script error"));
        let calls_clone = Arc::clone(&calls);
        store.on_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        store.apply(FilterField::Tema, "Saneamento", false);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn to_request_carries_filters() {
        // No runtime: notifications run inline
        let store = GlobalFilterStore::with_default_debounce(EventBus::new());
        store.apply(FilterField::Tema, "Saneamento", false);

        let request = store.to_request("/api/aggregate/by-theme");
        assert_eq!(request.filters, vec![Filter::equals(FilterField::Tema, "Saneamento")]);
        assert_eq!(request.original_url.as_deref(), Some("/api/aggregate/by-theme"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Apply(usize, u8, bool),
        Toggle(usize, u8, bool),
        Remove(usize, Option<u8>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let field = 0..FilterField::ALL.len();
        prop_oneof![
            (field.clone(), 0..4u8, any::<bool>()).prop_map(|(f, v, m)| Op::Apply(f, v, m)),
            (field.clone(), 0..4u8, any::<bool>()).prop_map(|(f, v, m)| Op::Toggle(f, v, m)),
            (field, proptest::option::of(0..4u8)).prop_map(|(f, v)| Op::Remove(f, v)),
        ]
    }

    proptest! {
        #[test]
        fn prop_no_duplicate_field_value_pairs(ops in proptest::collection::vec(op_strategy(), 0..60)) {
            let store = GlobalFilterStore::new(EventBus::new(), Duration::ZERO);
            for op in ops {
                match op {
                    Op::Apply(f, v, m) => { store.apply(FilterField::ALL[f], u64::from(v), m); }
                    Op::Toggle(f, v, m) => { store.toggle(FilterField::ALL[f], u64::from(v), m); }
                    Op::Remove(f, v) => {
                        let value = v.map(|v| json!(v));
                        store.remove(FilterField::ALL[f], value.as_ref());
                    }
                }
            }

            let filters = store.filters();
            for (i, a) in filters.iter().enumerate() {
                prop_assert_eq!(a.op, FilterOp::Eq);
                for b in &filters[i + 1..] {
                    prop_assert!(!(a.field == b.field && a.value == b.value));
                }
            }
        }

        #[test]
        fn prop_single_select_keeps_one_per_field(
            ops in proptest::collection::vec((0..FilterField::ALL.len(), 0..4u8), 1..40)
        ) {
            let store = GlobalFilterStore::new(EventBus::new(), Duration::ZERO);
            for (f, v) in &ops {
                store.apply(FilterField::ALL[*f], u64::from(*v), false);
                store.apply(FilterField::ALL[*f], u64::from(*v), false);
            }
            let filters = store.filters();
            for field in FilterField::ALL {
                prop_assert!(filters.iter().filter(|f| f.field == field).count() <= 1);
            }
        }
    }
}
