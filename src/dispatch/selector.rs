//! Recipient targeting for a new offer
use tracing::debug;

use crate::geo;
use crate::offer::Offer;
use crate::stores::{UserDirectory, VenueProfile};

/// Candidate audience for an offer: the venue's favoriters for
/// favorites-only offers, otherwise everyone whose last known location is
/// inside the target radius. The directory is read page by page; only the
/// matching ids accumulate.
pub fn select(
    users: &dyn UserDirectory,
    offer: &Offer,
    venue: &VenueProfile,
    page_size: usize,
) -> anyhow::Result<Vec<String>> {
    let mut candidates = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = if offer.favorites_only {
            users.favoriters_page(&offer.venue_id, cursor.as_deref(), page_size)?
        } else {
            users.users_page(cursor.as_deref(), page_size)?
        };

        for user in page.users {
            if offer.favorites_only {
                candidates.push(user.id);
                continue;
            }

            let Some(location) = user.last_location else {
                continue;
            };
            if geo::distance_m(location, venue.location) <= f64::from(offer.radius_m) {
                candidates.push(user.id);
            }
        }

        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    debug!(offer_id = %offer.id, candidates = candidates.len(), favorites_only = offer.favorites_only, "recipient selection complete");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::offer::OfferDetails;
    use crate::stores::{InMemoryDirectory, UserRecord, VenueTier};
    use crate::time::TimeStamp;

    const VENUE_PIN: GeoPoint = GeoPoint {
        lat: 40.7128,
        lon: -74.0060,
    };

    fn venue() -> VenueProfile {
        VenueProfile {
            id: "venue_a".into(),
            location: VENUE_PIN,
            tier: VenueTier::Premium,
        }
    }

    fn offer(favorites_only: bool) -> Offer {
        OfferDetails::new()
            .set_venue("venue_a")
            .set_title("Flash deal")
            .set_max_claims(50)
            .set_window(
                TimeStamp::new_with(2026, 3, 1, 9, 0, 0),
                TimeStamp::new_with(2026, 3, 1, 17, 0, 0),
            )
            .set_radius_m(2_000)
            .set_favorites_only(favorites_only)
            .validate_and_finalise(50_000)
            .unwrap()
    }

    fn user(id: &str, location: Option<GeoPoint>) -> UserRecord {
        UserRecord {
            id: id.into(),
            last_location: location,
            checked_in_venue: None,
        }
    }

    #[test]
    fn radius_targeting_keeps_nearby_users_only() {
        let dir = InMemoryDirectory::new();
        // a few hundred meters away
        dir.add_user(user("user_near", Some(GeoPoint { lat: 40.7150, lon: -74.0060 })));
        // tens of kilometers away
        dir.add_user(user("user_far", Some(GeoPoint { lat: 41.2, lon: -74.0060 })));
        // no known location
        dir.add_user(user("user_unknown", None));

        let got = select(&dir, &offer(false), &venue(), 2).unwrap();
        assert_eq!(got, vec!["user_near".to_string()]);
    }

    #[test]
    fn favorites_only_targets_exactly_the_favoriters() {
        let dir = InMemoryDirectory::new();
        dir.add_user(user("user_fan", None));
        dir.add_user(user("user_near", Some(VENUE_PIN)));
        dir.add_favorite("venue_a", "user_fan");

        let got = select(&dir, &offer(true), &venue(), 10).unwrap();
        assert_eq!(got, vec!["user_fan".to_string()]);
    }
}
