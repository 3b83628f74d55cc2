//! Collaborator seams
//!
//! The engine reads users, venues, preferences and device tokens from the
//! rest of the platform. Each collaborator sits behind a small trait so
//! the backing store can be swapped without touching targeting or
//! rate-limiting logic. The in-memory implementations back the test
//! suites and small deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::geo::GeoPoint;
use crate::time::QuietHours;

/// A user as the targeting pipeline sees one.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub last_location: Option<GeoPoint>,
    /// Venue the user is currently checked in at.
    pub checked_in_venue: Option<String>,
}

/// Venue subscription level, determines the daily dispatch quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueTier {
    Free,
    Basic,
    Premium,
}

#[derive(Debug, Clone)]
pub struct VenueProfile {
    pub id: String,
    pub location: GeoPoint,
    pub tier: VenueTier,
}

/// One page of a directory scan. `next` is an opaque cursor; `None` means
/// the scan is complete.
#[derive(Debug, Default)]
pub struct UserPage {
    pub users: Vec<UserRecord>,
    pub next: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotificationPrefs {
    pub flash_offers_enabled: bool,
    pub quiet_hours: Option<QuietHours>,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            flash_offers_enabled: true,
            quiet_hours: None,
        }
    }
}

/// Paged, read-only view of the platform's users. Paging keeps large
/// audiences out of memory during recipient selection.
pub trait UserDirectory: Send + Sync {
    fn user(&self, user_id: &str) -> anyhow::Result<Option<UserRecord>>;
    fn users_page(&self, cursor: Option<&str>, limit: usize) -> anyhow::Result<UserPage>;
    fn favoriters_page(
        &self,
        venue_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<UserPage>;
}

pub trait VenueDirectory: Send + Sync {
    fn venue(&self, venue_id: &str) -> anyhow::Result<Option<VenueProfile>>;
}

/// Read-only from this engine.
pub trait PreferenceStore: Send + Sync {
    fn prefs(&self, user_id: &str) -> anyhow::Result<NotificationPrefs>;
}

/// Device push tokens. Written to only when a delivery attempt reports the
/// token invalid.
pub trait DeviceTokenStore: Send + Sync {
    fn active_tokens(&self, user_id: &str) -> anyhow::Result<Vec<String>>;
    fn mark_inactive(&self, device_token: &str) -> anyhow::Result<()>;
}

// ── In-memory implementations ──

#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<Vec<UserRecord>>,
    venues: RwLock<HashMap<String, VenueProfile>>,
    /// venue id -> user ids that favorited it, insertion ordered
    favorites: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserRecord) {
        self.users.write().unwrap().push(user);
    }

    pub fn add_venue(&self, venue: VenueProfile) {
        self.venues.write().unwrap().insert(venue.id.clone(), venue);
    }

    pub fn add_favorite(&self, venue_id: &str, user_id: &str) {
        let mut favorites = self.favorites.write().unwrap();
        let list = favorites.entry(venue_id.to_owned()).or_default();
        if !list.iter().any(|u| u == user_id) {
            list.push(user_id.to_owned());
        }
    }

    pub fn set_checked_in(&self, user_id: &str, venue_id: Option<&str>) {
        let mut users = self.users.write().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == user_id) {
            user.checked_in_venue = venue_id.map(str::to_owned);
        }
    }

    fn page_of(ids: &[UserRecord], cursor: Option<&str>, limit: usize) -> UserPage {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + limit).min(ids.len());
        UserPage {
            users: ids[start..end].to_vec(),
            next: (end < ids.len()).then(|| end.to_string()),
        }
    }
}

impl UserDirectory for InMemoryDirectory {
    fn user(&self, user_id: &str) -> anyhow::Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .unwrap()
            .iter()
            .find(|u| u.id == user_id)
            .cloned())
    }

    fn users_page(&self, cursor: Option<&str>, limit: usize) -> anyhow::Result<UserPage> {
        let users = self.users.read().unwrap();
        Ok(Self::page_of(&users, cursor, limit))
    }

    fn favoriters_page(
        &self,
        venue_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<UserPage> {
        let favorites = self.favorites.read().unwrap();
        let users = self.users.read().unwrap();

        let favoriters: Vec<UserRecord> = favorites
            .get(venue_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| users.iter().find(|u| &u.id == id).cloned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self::page_of(&favoriters, cursor, limit))
    }
}

impl VenueDirectory for InMemoryDirectory {
    fn venue(&self, venue_id: &str) -> anyhow::Result<Option<VenueProfile>> {
        Ok(self.venues.read().unwrap().get(venue_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryPreferences {
    prefs: RwLock<HashMap<String, NotificationPrefs>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: &str, prefs: NotificationPrefs) {
        self.prefs.write().unwrap().insert(user_id.to_owned(), prefs);
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn prefs(&self, user_id: &str) -> anyhow::Result<NotificationPrefs> {
        Ok(self
            .prefs
            .read()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryDeviceTokens {
    /// user id -> (device token, active)
    tokens: RwLock<HashMap<String, Vec<(String, bool)>>>,
}

impl InMemoryDeviceTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &str, device_token: &str) {
        self.tokens
            .write()
            .unwrap()
            .entry(user_id.to_owned())
            .or_default()
            .push((device_token.to_owned(), true));
    }

    pub fn is_active(&self, device_token: &str) -> bool {
        self.tokens
            .read()
            .unwrap()
            .values()
            .flatten()
            .any(|(t, active)| t == device_token && *active)
    }
}

impl DeviceTokenStore for InMemoryDeviceTokens {
    fn active_tokens(&self, user_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .tokens
            .read()
            .unwrap()
            .get(user_id)
            .map(|list| {
                list.iter()
                    .filter(|(_, active)| *active)
                    .map(|(t, _)| t.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn mark_inactive(&self, device_token: &str) -> anyhow::Result<()> {
        let mut tokens = self.tokens.write().unwrap();
        for list in tokens.values_mut() {
            for (t, active) in list.iter_mut() {
                if t == device_token {
                    *active = false;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_pages_through_all_users() {
        let dir = InMemoryDirectory::new();
        for i in 0..7 {
            dir.add_user(UserRecord {
                id: format!("user_{i}"),
                last_location: None,
                checked_in_venue: None,
            });
        }

        let mut seen = 0;
        let mut cursor: Option<String> = None;
        loop {
            let page = dir.users_page(cursor.as_deref(), 3).unwrap();
            seen += page.users.len();
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, 7);
    }

    #[test]
    fn marking_a_token_inactive_hides_it() {
        let store = InMemoryDeviceTokens::new();
        store.register("user_a", "tok-1");
        store.register("user_a", "tok-2");

        store.mark_inactive("tok-1").unwrap();

        assert_eq!(store.active_tokens("user_a").unwrap(), vec!["tok-2"]);
        assert!(!store.is_active("tok-1"));
    }
}
