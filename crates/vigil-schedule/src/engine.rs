use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vigil_core::VenueId;
use vigil_venues::VenueStore;

use crate::window::is_in_window;

/// Edge direction reported to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEdge {
    Open,
    Close,
}

type EdgeCallback = Arc<dyn Fn(&VenueId, WindowEdge) + Send + Sync>;

/// Tick-based window edge detector.
///
/// Every 60 s, recompute `is_in_window` for every venue and compare with
/// the remembered value. A rising edge fires every registered callback with
/// [`WindowEdge::Open`], a falling edge with [`WindowEdge::Close`]. A
/// panicking callback is contained and logged — it never takes the engine
/// down with it.
pub struct ScheduleEngine {
    venues: Arc<VenueStore>,
    was_in_window: DashMap<VenueId, bool>,
    callbacks: std::sync::Mutex<Vec<EdgeCallback>>,
}

impl ScheduleEngine {
    pub fn new(venues: Arc<VenueStore>) -> Self {
        Self {
            venues,
            was_in_window: DashMap::new(),
            callbacks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register an edge callback.
    pub fn on_edge(&self, cb: impl Fn(&VenueId, WindowEdge) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().push(Arc::new(cb));
    }

    /// Current window membership for one venue, computed fresh. Used by the
    /// alert pipeline's gating — it must not depend on tick timing.
    pub fn is_in_window(&self, venue_id: &VenueId) -> bool {
        let Ok(Some(venue)) = self.venues.get(venue_id) else {
            return false;
        };
        let maintenance = self.venues.maintenance_for(venue_id).unwrap_or_default();
        is_in_window(&venue, &maintenance, Utc::now())
    }

    /// Main loop. One evaluation pass per minute until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("schedule engine started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("schedule engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One evaluation pass over all venues. Public for tests.
    pub fn tick(&self) {
        let venues = match self.venues.list() {
            Ok(v) => v,
            Err(e) => {
                error!("schedule tick: venue list failed: {e}");
                return;
            }
        };
        let now = Utc::now();

        for venue in venues {
            let maintenance = self.venues.maintenance_for(&venue.id).unwrap_or_default();
            let in_window = is_in_window(&venue, &maintenance, now);
            let prior = self
                .was_in_window
                .insert(venue.id.clone(), in_window)
                .unwrap_or(false);

            let edge = match (prior, in_window) {
                (false, true) => Some(WindowEdge::Open),
                (true, false) => Some(WindowEdge::Close),
                _ => None,
            };
            if let Some(edge) = edge {
                info!(venue_id = %venue.id, ?edge, "service window edge");
                self.fire(&venue.id, edge);
            }
        }
    }

    fn fire(&self, venue_id: &VenueId, edge: WindowEdge) {
        // Clone the list so the lock is released before any callback runs.
        let callbacks: Vec<EdgeCallback> = self.callbacks.lock().unwrap().clone();
        for cb in callbacks {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| cb(venue_id, edge)));
            if result.is_err() {
                warn!(venue_id = %venue_id, ?edge, "window edge callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use vigil_venues::ServiceTime;

    fn engine_with_venue(times: Vec<ServiceTime>) -> (Arc<ScheduleEngine>, VenueId) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let store = Arc::new(VenueStore::new(conn, "secret").unwrap());
        let venue = store.register("Test", None).unwrap();
        store.set_schedule(&venue.id, &times).unwrap();
        (Arc::new(ScheduleEngine::new(store)), venue.id)
    }

    /// An always-on schedule: one entry per weekday covering the whole day.
    fn always_on() -> Vec<ServiceTime> {
        (0..7)
            .map(|day| ServiceTime {
                day_of_week: day,
                start_hour: 0,
                start_min: 0,
                duration_hours: 24.0,
                label: None,
            })
            .collect()
    }

    #[test]
    fn open_edge_fires_exactly_once() {
        let (engine, venue_id) = engine_with_venue(always_on());
        let opens = Arc::new(AtomicI32::new(0));
        let closes = Arc::new(AtomicI32::new(0));
        let (o, c) = (Arc::clone(&opens), Arc::clone(&closes));

        engine.on_edge(move |_, edge| match edge {
            WindowEdge::Open => {
                o.fetch_add(1, Ordering::SeqCst);
            }
            WindowEdge::Close => {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Repeated ticks while in-window: one open, zero closes.
        engine.tick();
        engine.tick();
        engine.tick();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert!(engine.is_in_window(&venue_id));
    }

    #[test]
    fn empty_schedule_never_opens() {
        let (engine, venue_id) = engine_with_venue(vec![]);
        engine.tick();
        assert!(!engine.is_in_window(&venue_id));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let (engine, _venue_id) = engine_with_venue(always_on());
        engine.on_edge(|_, _| panic!("operator wired a bad callback"));
        let after = Arc::new(AtomicI32::new(0));
        let a = Arc::clone(&after);
        engine.on_edge(move |_, _| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        engine.tick();
        // The panic did not stop later callbacks or the tick.
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_venue_is_out_of_window() {
        let (engine, _) = engine_with_venue(vec![]);
        assert!(!engine.is_in_window(&VenueId::from("missing")));
    }
}
