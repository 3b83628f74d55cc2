//! Preference and quiet-hours filtering
use chrono::Utc;
use tracing::warn;

use crate::stores::PreferenceStore;
use crate::time::TimeStamp;

/// Drop candidates who turned flash-offer pushes off or are inside their
/// quiet-hours window at `now`. A preference read failure excludes the
/// user; a missed notification beats an unwanted one.
pub fn filter(
    prefs: &dyn PreferenceStore,
    candidates: Vec<String>,
    now: TimeStamp<Utc>,
) -> Vec<String> {
    let minute = now.minute_of_day();

    candidates
        .into_iter()
        .filter(|user_id| match prefs.prefs(user_id) {
            Ok(p) => {
                p.flash_offers_enabled
                    && !p.quiet_hours.is_some_and(|window| window.contains(minute))
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "preference read failed, excluding user");
                false
            }
        })
        .collect()
}
