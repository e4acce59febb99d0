//! Per-user location cache with lazy geocoding.
//!
//! Coordinates come from two directions: the glasses push periodic fixes,
//! and the query pipeline asks for a fresh fix when a query needs one.
//! Reverse geocoding is expensive and rate-limited upstream, so it only
//! happens for queries that actually name a place, and results ride the
//! same TTL as the coordinates they describe.

use crate::config::LocationConfig;
use crate::error::Result;
use crate::hardware::{Coordinates, SessionSlot};
use crate::wake::WakeMatcher;
use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Reverse geocoder. External collaborator; the core only needs one call.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve coordinates to a human-readable address or place name.
    async fn reverse(&self, coords: Coordinates) -> Result<String>;
}

/// A point-in-time view of what the core knows about the user's location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSnapshot {
    pub coords: Coordinates,
    pub geocoded: Option<String>,
}

impl LocationSnapshot {
    /// Render for agent context.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.geocoded {
            Some(address) => address.clone(),
            None => format!("{:.5}, {:.5}", self.coords.lat, self.coords.lng),
        }
    }
}

struct Cache {
    coords: Coordinates,
    geocoded: Option<String>,
    fetched_at: Instant,
}

struct LocationInner {
    cache: Option<Cache>,
    timezone: Option<Tz>,
}

/// Per-user location manager.
pub struct LocationManager {
    user_id: String,
    slot: SessionSlot,
    geocoder: Option<Arc<dyn Geocoder>>,
    matcher: Arc<WakeMatcher>,
    ttl: Duration,
    inner: Mutex<LocationInner>,
}

impl LocationManager {
    #[must_use]
    pub fn new(
        user_id: &str,
        slot: SessionSlot,
        geocoder: Option<Arc<dyn Geocoder>>,
        matcher: Arc<WakeMatcher>,
        config: &LocationConfig,
    ) -> Self {
        Self {
            user_id: user_id.to_owned(),
            slot,
            geocoder,
            matcher,
            ttl: Duration::from_secs(config.cache_ttl_secs),
            inner: Mutex::new(LocationInner {
                cache: None,
                timezone: None,
            }),
        }
    }

    /// Whether the query needs coordinates.
    #[must_use]
    pub fn query_needs_location(&self, query: &str) -> bool {
        self.matcher.is_location_query(query)
    }

    /// Whether the query needs a reverse-geocoded address.
    #[must_use]
    pub fn query_needs_geocoding(&self, query: &str) -> bool {
        self.matcher.needs_geocoding(query)
    }

    /// Record a coordinate pushed by the hardware. Resets the cache; any
    /// previous geocoding no longer describes the new fix.
    pub fn note_coordinates(&self, coords: Coordinates) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cache = Some(Cache {
            coords,
            geocoded: None,
            fetched_at: Instant::now(),
        });
    }

    /// Refresh for a query: fetch a fresh fix when needed (and the cache is
    /// stale), geocode when the query calls for it.
    ///
    /// Never fails the caller — on any error the last cache (or nothing) is
    /// returned and the pipeline proceeds.
    pub async fn refresh(&self, query: &str) -> Option<LocationSnapshot> {
        if !self.query_needs_location(query) {
            return self.snapshot();
        }

        let fresh_needed = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match &inner.cache {
                Some(cache) => cache.fetched_at.elapsed() >= self.ttl,
                None => true,
            }
        };

        if fresh_needed {
            match self.fetch_coordinates().await {
                Ok(Some(coords)) => self.note_coordinates(coords),
                Ok(None) => {
                    debug!(user_id = %self.user_id, "no hardware session for location fetch");
                }
                Err(e) => {
                    warn!(user_id = %self.user_id, "location fetch failed: {e}");
                }
            }
        }

        if self.query_needs_geocoding(query) {
            self.geocode_cached().await;
        }

        self.snapshot()
    }

    async fn fetch_coordinates(&self) -> Result<Option<Coordinates>> {
        let Some(session) = self.slot.get() else {
            return Ok(None);
        };
        session.latest_location().await.map(Some)
    }

    /// Geocode the cached coordinate if it has no fresh address yet.
    async fn geocode_cached(&self) {
        let Some(geocoder) = self.geocoder.as_ref() else {
            return;
        };
        let coords = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match &inner.cache {
                Some(cache) if cache.geocoded.is_none() => cache.coords,
                _ => return,
            }
        };

        match geocoder.reverse(coords).await {
            Ok(address) => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(cache) = inner.cache.as_mut() {
                    cache.geocoded = Some(address);
                }
            }
            Err(e) => {
                warn!(user_id = %self.user_id, "reverse geocoding failed: {e}");
            }
        }
    }

    /// Current cached view, if any coordinate is known.
    #[must_use]
    pub fn snapshot(&self) -> Option<LocationSnapshot> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cache.as_ref().map(|cache| LocationSnapshot {
            coords: cache.coords,
            geocoded: cache.geocoded.clone(),
        })
    }

    /// Set the timezone from a device settings value (IANA name).
    ///
    /// Unknown names are ignored; the previous timezone (or the UTC
    /// fallback) stays in effect.
    pub fn set_timezone(&self, name: &str) {
        match name.parse::<Tz>() {
            Ok(tz) => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.timezone = Some(tz);
            }
            Err(_) => {
                warn!(user_id = %self.user_id, timezone = name, "ignoring unknown timezone");
            }
        }
    }

    /// Currently configured timezone, if the device reported one.
    #[must_use]
    pub fn timezone(&self) -> Option<Tz> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .timezone
    }

    /// Human-readable local time in the device timezone, UTC when unknown.
    #[must_use]
    pub fn local_time_string(&self) -> String {
        let now = Utc::now();
        match self.timezone() {
            Some(tz) => now
                .with_timezone(&tz)
                .format("%A %-I:%M %p (%Z)")
                .to_string(),
            None => now.format("%A %-I:%M %p (UTC)").to_string(),
        }
    }
}
