//! Phone normalization, bio classification, and the single-target fetch.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bridge::SocketLimiter;
use crate::transport::TransportHandle;

use super::cache::BioCache;

/// Bio text signatures that mark an account as a business profile.
const BUSINESS_BIO_PATTERNS: &[&str] = &[
    "Hello. I'm using WhatsApp Business.",
    "Hola. Estoy usando WhatsApp Business.",
    "WhatsApp Business",
];

/// Strips non-digits and prefixes the country code onto local numbers.
///
/// A number that does not already carry the code, is longer than nine
/// digits, and starts with `8` is treated as a local mobile number and
/// gets the code prepended in place of nothing (`8123...` becomes
/// `628123...` under the default code).
#[must_use]
pub fn format_phone_number(phone: &str, country_code: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if !digits.starts_with(country_code) && digits.len() > 9 && digits.starts_with('8') {
        return format!("{country_code}{digits}");
    }
    digits
}

/// Whether the digits form a plausible international number (10 to 15
/// digits).
#[must_use]
pub fn is_valid_phone_number(phone: &str) -> bool {
    let len = phone.chars().filter(char::is_ascii_digit).count();
    (10..=15).contains(&len)
}

/// Converts a phone number to a transport JID. Inputs already carrying a
/// server part are passed through.
#[must_use]
pub fn to_jid(phone: &str) -> String {
    if phone.contains('@') {
        return phone.to_owned();
    }
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@s.whatsapp.net")
}

/// Extracts normalized, deduplicated phone targets from free-form text.
/// Tokens outside 7 to 15 digits are dropped; input order is preserved.
#[must_use]
pub fn parse_targets(input: &str, country_code: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for token in input.split(|c: char| c.is_whitespace() || c == ',' || c == ';') {
        let digits: String = token.chars().filter(char::is_ascii_digit).collect();
        if !(7..=15).contains(&digits.len()) {
            continue;
        }
        let normalized = format_phone_number(&digits, country_code);
        if seen.insert(normalized.clone()) {
            targets.push(normalized);
        }
    }
    targets
}

/// Classified outcome of a single bio lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioCategory {
    /// Registered with non-blank bio text.
    HasBio,
    /// Registered but the bio is absent or blank.
    NoBio,
    /// The number is not registered on the transport.
    Unregistered,
    /// The transport signalled throttling.
    RateLimit,
    /// Any other lookup failure.
    Error,
}

/// Kind of account behind a registered number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountType {
    #[default]
    Personal,
    Business,
    /// Business account with a transport-verified name.
    OfficialBusiness,
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Personal => f.write_str("Personal"),
            Self::Business => f.write_str("WhatsApp Business"),
            Self::OfficialBusiness => f.write_str("Official Business"),
        }
    }
}

/// Business classification for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusinessInfo {
    pub account_type: AccountType,
    pub verified_name: Option<String>,
}

/// Result of one bio lookup, as cached and bucketed by the orchestrator.
#[derive(Debug, Clone)]
pub struct BioResult {
    pub phone: String,
    pub category: BioCategory,
    pub bio: Option<String>,
    pub set_at: Option<DateTime<Utc>>,
    pub business: BusinessInfo,
    pub error: Option<String>,
}

impl BioResult {
    fn bare(phone: &str, category: BioCategory) -> Self {
        Self {
            phone: phone.to_owned(),
            category,
            bio: None,
            set_at: None,
            business: BusinessInfo::default(),
            error: None,
        }
    }

    #[must_use]
    pub fn has_bio(
        phone: &str,
        bio: String,
        set_at: Option<DateTime<Utc>>,
        business: BusinessInfo,
    ) -> Self {
        Self {
            bio: Some(bio),
            set_at,
            business,
            ..Self::bare(phone, BioCategory::HasBio)
        }
    }

    #[must_use]
    pub fn no_bio(phone: &str, business: BusinessInfo) -> Self {
        Self {
            business,
            ..Self::bare(phone, BioCategory::NoBio)
        }
    }

    #[must_use]
    pub fn unregistered(phone: &str) -> Self {
        Self::bare(phone, BioCategory::Unregistered)
    }

    #[must_use]
    pub fn rate_limited(phone: &str, message: &str) -> Self {
        Self {
            error: Some(message.to_owned()),
            ..Self::bare(phone, BioCategory::RateLimit)
        }
    }

    #[must_use]
    pub fn lookup_error(phone: &str, message: &str) -> Self {
        Self {
            error: Some(message.to_owned()),
            ..Self::bare(phone, BioCategory::Error)
        }
    }
}

/// Determines the account type for a registered JID: a transport business
/// profile wins, otherwise known business signatures in the bio text.
async fn detect_business(
    handle: &Arc<dyn TransportHandle>,
    jid: &str,
    bio_text: &str,
) -> BusinessInfo {
    let profile = match handle.business_profile(jid).await {
        Ok(profile) => profile,
        Err(err) => {
            debug!("Business profile lookup failed for {}: {}", jid, err);
            None
        }
    };

    if let Some(profile) = profile {
        if profile.verified_name.is_some() {
            info!("{} is an official business account", jid);
            return BusinessInfo {
                account_type: AccountType::OfficialBusiness,
                verified_name: profile.verified_name,
            };
        }
        if profile.business_name.is_some() || profile.wid.is_some() {
            info!("{} is a business account", jid);
            return BusinessInfo {
                account_type: AccountType::Business,
                verified_name: None,
            };
        }
    }

    if BUSINESS_BIO_PATTERNS.iter().any(|p| bio_text.contains(p)) {
        info!("{} is a business account (bio signature)", jid);
        return BusinessInfo {
            account_type: AccountType::Business,
            verified_name: None,
        };
    }

    BusinessInfo::default()
}

/// Fetches and classifies the bio for one normalized phone number.
///
/// Checks the cache first. The status fetch itself runs under the user's
/// concurrency limiter; the registration and business-profile probes do
/// not, matching how the transport throttles each call class. Failures
/// never escape: they classify as [`BioCategory::RateLimit`] when the
/// error text carries a throttling signature, otherwise
/// [`BioCategory::Error`], and both are cached briefly.
pub(crate) async fn fetch_bio(
    handle: &Arc<dyn TransportHandle>,
    limiter: &SocketLimiter,
    cache: &BioCache,
    phone: &str,
) -> BioResult {
    if let Some(cached) = cache.get(phone).await {
        return cached;
    }

    let jid = to_jid(phone);

    let registered = match handle.on_whatsapp(&jid).await {
        Ok(checks) => checks.first().map(|c| c.exists),
        Err(err) => {
            warn!("Registration check failed for {}: {}", phone, err);
            None
        }
    };

    if registered == Some(false) {
        debug!("{} is not registered", phone);
        let result = BioResult::unregistered(phone);
        cache.insert(result.clone()).await;
        return result;
    }

    let entries = match limiter.run(|| handle.fetch_status(&jid)).await {
        Ok(entries) => entries,
        Err(err) => {
            let result = if err.is_rate_limited() {
                warn!("Rate limited fetching bio for {}", phone);
                BioResult::rate_limited(phone, &err.to_string())
            } else {
                warn!("Bio fetch failed for {}: {}", phone, err);
                BioResult::lookup_error(phone, &err.to_string())
            };
            cache.insert(result.clone()).await;
            return result;
        }
    };

    let entry = entries.into_iter().next();
    let bio_text = entry
        .as_ref()
        .and_then(|e| e.status.clone())
        .filter(|s| !s.trim().is_empty());

    let result = match bio_text {
        Some(bio) => {
            let business = detect_business(handle, &jid, &bio).await;
            let set_at = entry.and_then(|e| e.set_at);
            BioResult::has_bio(phone, bio, set_at, business)
        }
        None => {
            let business = detect_business(handle, &jid, "").await;
            BioResult::no_bio(phone, business)
        }
    };

    cache.insert(result.clone()).await;
    result
}
