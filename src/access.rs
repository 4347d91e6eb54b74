use chrono::{DateTime, Utc};

use crate::profile::{DEFAULT_TARIFF, ResolvedProfile, ROLE_USER};

pub const ROLE_CURATOR: &str = "curator";
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_SADMIN: &str = "sadmin";

const LEGACY_OPTIMAL_TARIFF: &str = "Выгодный";
const OPTIMAL_TARIFF: &str = "Оптимальный";

/// Substrings marking a basic / unpurchased tier.
const BASIC_TARIFF_MARKERS: &[&str] = &["баз", "base"];
/// Substrings marking the elevated tiers that unlock curator chat.
const CHAT_TARIFF_MARKERS: &[&str] = &["оптим", "максим", "optimal", "maximum"];

/// Feature gates derived from one profile, consumed uniformly by every
/// call site instead of re-deriving role checks per endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub chat_allowed: bool,
    pub nutrition_locked: bool,
    pub display_tariff: String,
    /// Staff roles never see a tariff expiry date.
    pub show_expiry: bool,
}

pub fn derive_access(profile: &ResolvedProfile) -> Access {
    derive_access_at(profile, Utc::now())
}

/// Pure function of a profile and a clock.
pub fn derive_access_at(profile: &ResolvedProfile, now: DateTime<Utc>) -> Access {
    let is_staff = profile.role == ROLE_ADMIN || profile.role == ROLE_SADMIN;
    let is_curator = profile.role == ROLE_CURATOR || profile.is_curator;

    let active = is_tariff_active(profile.tariff_expires_at.as_ref(), now);
    let tariff = effective_tariff(profile.tariff_name.as_deref(), active);

    let display_tariff = match profile.role.as_str() {
        ROLE_SADMIN => "Владелец".to_string(),
        ROLE_ADMIN => "Админ".to_string(),
        _ if is_curator => "Куратор".to_string(),
        _ => tariff.clone(),
    };

    let chat_allowed = profile.role == ROLE_USER
        && !profile.is_curator
        && active
        && is_chat_tariff(&tariff)
        && profile.curator.is_some();

    Access {
        chat_allowed,
        nutrition_locked: is_basic_tariff(&tariff),
        display_tariff,
        show_expiry: !is_staff && !is_curator,
    }
}

/// A missing expiry means a non-expiring tariff.
pub fn is_tariff_active(
    expires_at: Option<&chrono::DateTime<chrono::FixedOffset>>,
    now: DateTime<Utc>,
) -> bool {
    match expires_at {
        Some(expires_at) => *expires_at > now,
        None => true,
    }
}

/// The label the rest of the system reasons about: the stored name with
/// the legacy tier folded in, or the default tier when nothing active
/// was purchased.
pub fn effective_tariff(stored: Option<&str>, active: bool) -> String {
    if !active {
        return DEFAULT_TARIFF.to_string();
    }
    let name = stored.map(str::trim).unwrap_or("");
    if name.is_empty() {
        return DEFAULT_TARIFF.to_string();
    }
    if name == LEGACY_OPTIMAL_TARIFF {
        return OPTIMAL_TARIFF.to_string();
    }
    name.to_string()
}

fn is_basic_tariff(name: &str) -> bool {
    let lower = name.to_lowercase();
    BASIC_TARIFF_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

fn is_chat_tariff(name: &str) -> bool {
    let lower = name.to_lowercase();
    CHAT_TARIFF_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};

    fn profile(tariff: Option<&str>, role: &str, curator: bool) -> ResolvedProfile {
        ResolvedProfile {
            id: Some(1),
            tg_id: 42,
            username: None,
            first_name: Some("Ann".to_string()),
            last_name: None,
            photo_url: None,
            tariff_name: tariff.map(str::to_string),
            tariff_expires_at: None,
            training_mode: "gym".to_string(),
            height_cm: None,
            weight_kg: None,
            age: None,
            role: role.to_string(),
            is_curator: false,
            curator: curator.then(|| crate::profile::CuratorRef {
                id: 7,
                name: "Coach".to_string(),
                username: None,
            }),
        }
    }

    #[test]
    fn optimal_tariff_with_curator_unlocks_chat() {
        let access = derive_access(&profile(Some("Оптимальный"), "user", true));
        assert!(access.chat_allowed);
        assert!(!access.nutrition_locked);
        assert_eq!(access.display_tariff, "Оптимальный");
    }

    #[test]
    fn basic_tariff_locks_nutrition_but_not_more() {
        let access = derive_access(&profile(Some("Базовый"), "user", true));
        assert!(access.nutrition_locked);
        assert!(!access.chat_allowed);
    }

    #[test]
    fn chat_needs_an_assigned_curator() {
        let access = derive_access(&profile(Some("Максимум"), "user", false));
        assert!(!access.chat_allowed);
    }

    #[test]
    fn legacy_tariff_folds_into_optimal() {
        let access = derive_access(&profile(Some("Выгодный"), "user", true));
        assert!(access.chat_allowed);
        assert_eq!(access.display_tariff, "Оптимальный");
    }

    #[test]
    fn expired_tariff_degrades_to_default() {
        let mut profile = profile(Some("Оптимальный"), "user", true);
        profile.tariff_expires_at = Some(
            (Utc::now() - Duration::days(1)).with_timezone(&FixedOffset::east_opt(0).unwrap()),
        );
        let access = derive_access(&profile);
        assert!(!access.chat_allowed);
        assert!(access.nutrition_locked);
        assert_eq!(access.display_tariff, "Базовый");
    }

    #[test]
    fn staff_roles_override_display() {
        assert_eq!(
            derive_access(&profile(None, "sadmin", false)).display_tariff,
            "Владелец"
        );
        assert_eq!(
            derive_access(&profile(None, "admin", false)).display_tariff,
            "Админ"
        );
        let access = derive_access(&profile(None, "curator", false));
        assert_eq!(access.display_tariff, "Куратор");
        assert!(!access.show_expiry);
        assert!(!access.chat_allowed);
    }

    #[test]
    fn curator_flag_blocks_chat_even_for_user_role() {
        let mut profile = profile(Some("Максимум"), "user", true);
        profile.is_curator = true;
        assert!(!derive_access(&profile).chat_allowed);
    }
}
