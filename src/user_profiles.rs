use dashmap::DashMap;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::utils::get_seed;

/// Behavioural attributes of the user behind a request
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub is_target_audience: bool,
    /// 0.1 to 1.0
    pub purchasing_power: f64,
    /// 0.1 to 1.0
    pub engagement_level: f64,
    pub days_since_last_visit: u32,
    pub days_since_last_interest: u32,
    pub has_previous_conversion: bool,
    pub total_clicks: u64,
    pub total_conversions: u64,
    pub total_pageviews: u64,
}

impl UserProfile {
    pub fn apply(&mut self, event: UserEvent) {
        match event {
            UserEvent::Click => self.total_clicks += 1,
            UserEvent::Conversion => {
                self.total_conversions += 1;
                self.has_previous_conversion = true;
            }
            UserEvent::PageView => {
                self.total_pageviews += 1;
                self.days_since_last_visit = 0;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    Click,
    Conversion,
    PageView,
}

/// Where the decision pipeline gets user data from
/// A missing profile is not an error: prediction uses neutral multipliers instead
pub trait UserProfileSource: Send + Sync {
    fn profile_for(&self, cookie_id: Option<&str>, device_id: Option<&str>) -> Option<UserProfile>;
    fn track_event(&self, cookie_id: Option<&str>, device_id: Option<&str>, event: UserEvent);
}

/// Never knows anyone
pub struct NoUserProfiles;

impl UserProfileSource for NoUserProfiles {
    fn profile_for(&self, _cookie_id: Option<&str>, _device_id: Option<&str>) -> Option<UserProfile> {
        None
    }

    fn track_event(&self, _cookie_id: Option<&str>, _device_id: Option<&str>, _event: UserEvent) {}
}

/// Profile cache that invents a plausible profile the first time an id is seen
pub struct SyntheticUserProfiles {
    profiles: DashMap<String, UserProfile>,
    rng: Mutex<StdRng>,
}

fn non_empty(id: Option<&str>) -> Option<&str> {
    id.filter(|id| !id.is_empty())
}

impl SyntheticUserProfiles {
    pub fn new() -> Self {
        Self::new_advanced(get_seed(0x5345_5253))
    }

    pub fn new_advanced(seed: u64) -> Self {
        Self {
            profiles: DashMap::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn synthesize(&self) -> UserProfile {
        let mut rng = self.rng.lock();
        UserProfile {
            is_target_audience: rng.gen_bool(0.5),
            purchasing_power: rng.gen_range(0.1..=1.0),
            engagement_level: rng.gen_range(0.1..=1.0),
            days_since_last_visit: rng.gen_range(0..30),
            days_since_last_interest: rng.gen_range(0..60),
            has_previous_conversion: rng.gen_bool(0.3),
            total_clicks: 0,
            total_conversions: 0,
            total_pageviews: 0,
        }
    }

    /// Key of an already known profile: cookie first, then device
    fn known_key<'a>(&self, cookie_id: Option<&'a str>, device_id: Option<&'a str>) -> Option<&'a str> {
        [non_empty(cookie_id), non_empty(device_id)]
            .into_iter()
            .flatten()
            .find(|id| self.profiles.contains_key(*id))
    }
}

impl Default for SyntheticUserProfiles {
    fn default() -> Self {
        Self::new()
    }
}

impl UserProfileSource for SyntheticUserProfiles {
    fn profile_for(&self, cookie_id: Option<&str>, device_id: Option<&str>) -> Option<UserProfile> {
        if let Some(key) = self.known_key(cookie_id, device_id) {
            if let Some(profile) = self.profiles.get(key) {
                return Some(profile.clone());
            }
        }
        let key = non_empty(cookie_id).or(non_empty(device_id))?;
        // Two threads seeing the same new id get the same cached profile
        let profile = self
            .profiles
            .entry(key.to_string())
            .or_insert_with(|| self.synthesize())
            .clone();
        Some(profile)
    }

    fn track_event(&self, cookie_id: Option<&str>, device_id: Option<&str>, event: UserEvent) {
        let key = match self.known_key(cookie_id, device_id).or(non_empty(cookie_id)).or(non_empty(device_id)) {
            Some(key) => key,
            None => return,
        };
        self.profiles
            .entry(key.to_string())
            .or_insert_with(|| self.synthesize())
            .apply(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_profile_is_cached_and_in_range() {
        let profiles = SyntheticUserProfiles::new_advanced(3);
        let first = profiles.profile_for(Some("cookie-1"), None).unwrap();
        let second = profiles.profile_for(Some("cookie-1"), Some("device-9")).unwrap();
        assert_eq!(first, second);
        assert_eq!(profiles.len(), 1);

        assert!((0.1..=1.0).contains(&first.purchasing_power));
        assert!((0.1..=1.0).contains(&first.engagement_level));
        assert!(first.days_since_last_visit < 30);
        assert!(first.days_since_last_interest < 60);
    }

    #[test]
    fn test_device_lookup_when_cookie_unknown() {
        let profiles = SyntheticUserProfiles::new_advanced(3);
        let by_device = profiles.profile_for(None, Some("device-1")).unwrap();
        let by_both = profiles.profile_for(Some("new-cookie"), Some("device-1")).unwrap();
        assert_eq!(by_device, by_both);
        assert_eq!(profiles.len(), 1);
    }

    #[test]
    fn test_no_identifiers_means_no_profile() {
        let profiles = SyntheticUserProfiles::new_advanced(3);
        assert!(profiles.profile_for(None, None).is_none());
        assert!(profiles.profile_for(Some(""), None).is_none());
        assert!(profiles.is_empty());
    }

    #[test]
    fn test_track_event_updates_profile() {
        let profiles = SyntheticUserProfiles::new_advanced(3);
        profiles.profile_for(Some("c"), None);
        profiles.track_event(Some("c"), None, UserEvent::Click);
        profiles.track_event(Some("c"), None, UserEvent::Conversion);
        profiles.track_event(Some("c"), None, UserEvent::PageView);

        let profile = profiles.profile_for(Some("c"), None).unwrap();
        assert_eq!(profile.total_clicks, 1);
        assert_eq!(profile.total_conversions, 1);
        assert!(profile.has_previous_conversion);
        assert_eq!(profile.days_since_last_visit, 0);
    }
}
