//! # Domain Models
//!
//! These structs represent the entities the ad delivery core works with.
//! Advertisement identifiers are assigned by storage; owners are keyed by
//! their external (Discord) identifier and game accounts by their numeric
//! account id.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DomainError;

/// Storage-assigned advertisement identifier.
pub type AdId = i64;

/// Days an advertisement (row and image) lives before the sweeper removes it.
pub const AD_RETENTION_DAYS: i64 = 7;

/// Retention window shared by the storage sweep and the filesystem sweep.
pub fn ad_retention() -> Duration {
    Duration::days(AD_RETENTION_DAYS)
}

/// Form factor of an ad slot. Serialized as its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotType {
    Banner,
    Square,
    Skyscraper,
}

impl SlotType {
    pub const ALL: [SlotType; 3] = [SlotType::Banner, SlotType::Square, SlotType::Skyscraper];

    /// Wire code used by game clients (`/api/ad?type=2`).
    pub fn code(self) -> i32 {
        match self {
            SlotType::Banner => 1,
            SlotType::Square => 2,
            SlotType::Skyscraper => 3,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, DomainError> {
        match code {
            1 => Ok(SlotType::Banner),
            2 => Ok(SlotType::Square),
            3 => Ok(SlotType::Skyscraper),
            other => Err(DomainError::ValidationError(format!("invalid slot type code {other}"))),
        }
    }

    /// Directory name under the image root, also used in public URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            SlotType::Banner => "banner",
            SlotType::Square => "square",
            SlotType::Skyscraper => "skyscraper",
        }
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SlotType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for SlotType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        SlotType::from_code(code).map_err(de::Error::custom)
    }
}

/// Accepts either the numeric wire code or the slot name.
impl FromStr for SlotType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i32>() {
            return SlotType::from_code(code);
        }
        match s.to_ascii_lowercase().as_str() {
            "banner" => Ok(SlotType::Banner),
            "square" => Ok(SlotType::Square),
            "skyscraper" => Ok(SlotType::Skyscraper),
            _ => Err(DomainError::ValidationError(format!("invalid slot type '{s}'"))),
        }
    }
}

/// One submitted creative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    #[serde(rename = "ad_id")]
    pub id: AdId,
    /// Owning account (Discord user id).
    #[serde(rename = "user_id")]
    pub owner_id: String,
    /// Target level in the game client.
    pub level_id: i64,
    #[serde(rename = "type")]
    pub slot: SlotType,
    /// Public image URL. Empty until the image has been persisted.
    pub image_url: String,
    /// Creation instant; reset to the approval instant on approval.
    pub created_at: DateTime<Utc>,
    /// True until a moderator approves the ad.
    pub pending: bool,
    pub boost_count: u32,
    pub views: u64,
    pub clicks: u64,
}

impl Advertisement {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + ad_retention()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// File name of the stored image (`{owner}-{id}.webp`).
    pub fn image_file_name(&self) -> String {
        image_file_name(&self.owner_id, self.id)
    }

    /// Canonical public URL for the stored image.
    pub fn canonical_image_url(&self, domain: &str) -> String {
        format!(
            "{}/cdn/{}/{}",
            domain.trim_end_matches('/'),
            self.slot,
            self.image_file_name()
        )
    }
}

pub fn image_file_name(owner_id: &str, id: AdId) -> String {
    format!("{owner_id}-{id}.webp")
}

/// Input for a new submission. Storage assigns the id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAdvertisement {
    pub owner_id: String,
    pub level_id: i64,
    pub slot: SlotType,
}

/// An advertiser account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub username: String,
    pub total_views: u64,
    pub total_clicks: u64,
    pub is_admin: bool,
    pub is_staff: bool,
    /// Trusted advertiser.
    pub verified: bool,
    pub banned: bool,
    /// Unspent boosts owned by this account.
    pub boost_count: u32,
}

impl Owner {
    pub fn is_moderator(&self) -> bool {
        self.is_admin || self.is_staff
    }
}

/// View and click counters, per ad or aggregated per owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub views: u64,
    pub clicks: u64,
}

/// Sitewide aggregate engagement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_views: u64,
    pub total_clicks: u64,
    pub ad_count: u64,
}

/// A counted interaction reported by a game client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdEvent {
    View,
    Click,
}

impl AdEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AdEvent::View => "view",
            AdEvent::Click => "click",
        }
    }
}

/// Backing-store record of the last successful remote token validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRecord {
    pub account_id: i64,
    pub token: String,
    pub validated_at: DateTime<Utc>,
}

/// Body returned by the remote token-validation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenVerdict {
    pub valid: bool,
    #[serde(default)]
    pub cause: String,
}

/// Outcome of a token check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid { cause: String },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    /// Failure cause, empty for a valid token.
    pub fn cause(&self) -> &str {
        match self {
            Validation::Valid => "",
            Validation::Invalid { cause } => cause,
        }
    }
}

/// Result of sweeping one image directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSweepReport {
    pub removed: usize,
    pub retained: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ad() -> Advertisement {
        Advertisement {
            id: 42,
            owner_id: "1234".into(),
            level_id: 99,
            slot: SlotType::Square,
            image_url: String::new(),
            created_at: Utc::now(),
            pending: true,
            boost_count: 0,
            views: 0,
            clicks: 0,
        }
    }

    #[test]
    fn slot_type_parses_codes_and_names() {
        assert_eq!("1".parse::<SlotType>().unwrap(), SlotType::Banner);
        assert_eq!("Skyscraper".parse::<SlotType>().unwrap(), SlotType::Skyscraper);
        assert!("4".parse::<SlotType>().is_err());
        assert!("leaderboard".parse::<SlotType>().is_err());
        for slot in SlotType::ALL {
            assert_eq!(SlotType::from_code(slot.code()).unwrap(), slot);
        }
    }

    #[test]
    fn expiry_is_seven_days_after_creation() {
        let ad = sample_ad();
        assert_eq!(ad.expires_at() - ad.created_at, Duration::days(7));
        assert!(!ad.is_expired_at(ad.created_at + Duration::days(7) - Duration::seconds(1)));
        assert!(ad.is_expired_at(ad.created_at + Duration::days(7)));
    }

    #[test]
    fn canonical_image_url_uses_slot_owner_and_id() {
        let ad = sample_ad();
        assert_eq!(
            ad.canonical_image_url("https://ads.example/"),
            "https://ads.example/cdn/square/1234-42.webp"
        );
    }

    #[test]
    fn advertisement_uses_wire_field_names() {
        let json = serde_json::to_value(sample_ad()).unwrap();
        assert_eq!(json["ad_id"], 42);
        assert_eq!(json["user_id"], "1234");
        assert_eq!(json["type"], 2);
    }

    #[test]
    fn slot_type_travels_as_its_code() {
        let slot: SlotType = serde_json::from_str("3").unwrap();
        assert_eq!(slot, SlotType::Skyscraper);
        assert_eq!(serde_json::to_string(&SlotType::Banner).unwrap(), "1");
        assert!(serde_json::from_str::<SlotType>("4").is_err());
        assert!(serde_json::from_str::<SlotType>(r#""banner""#).is_err());
    }

    #[test]
    fn verdict_tolerates_missing_cause() {
        let v: TokenVerdict = serde_json::from_str(r#"{"valid":true}"#).unwrap();
        assert!(v.valid);
        assert!(v.cause.is_empty());
    }
}
