//! Domain records: sites, reception sessions and the items received in them.
//!
//! Field names serialise to the camelCase shape the pickup-point API has
//! always exposed (`pvz`, `receptions`, `products`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidInput;

/// Cities a pickup point may be registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum City {
    #[serde(rename = "Москва")]
    Moscow,
    #[serde(rename = "Санкт-Петербург")]
    SaintPetersburg,
    #[serde(rename = "Казань")]
    Kazan,
}

impl City {
    pub const ALL: [City; 3] = [City::Moscow, City::SaintPetersburg, City::Kazan];

    pub fn as_str(&self) -> &'static str {
        match self {
            City::Moscow => "Москва",
            City::SaintPetersburg => "Санкт-Петербург",
            City::Kazan => "Казань",
        }
    }
}

impl FromStr for City {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        City::ALL
            .into_iter()
            .find(|city| city.as_str() == s)
            .ok_or_else(|| InvalidInput::CityNotAllowed(s.to_string()))
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of goods accepted during a reception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    #[serde(rename = "электроника")]
    Electronics,
    #[serde(rename = "одежда")]
    Clothes,
    #[serde(rename = "обувь")]
    Shoes,
}

impl ItemType {
    pub const ALL: [ItemType; 3] = [ItemType::Electronics, ItemType::Clothes, ItemType::Shoes];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Electronics => "электроника",
            ItemType::Clothes => "одежда",
            ItemType::Shoes => "обувь",
        }
    }
}

impl FromStr for ItemType {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| InvalidInput::ItemTypeNotAllowed(s.to_string()))
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reception status. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::InProgress)
    }
}

/// Unknown status text read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown session status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pickup point. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    #[serde(rename = "registrationDate")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "city")]
    pub name: City,
}

/// A goods-receiving session at one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    #[serde(rename = "dateTime")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "pvzId")]
    pub site_id: Uuid,
    pub status: SessionStatus,
}

/// A single unit received during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    #[serde(rename = "dateTime")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(rename = "receptionId")]
    pub session_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWithItems {
    #[serde(rename = "reception")]
    pub session: Session,
    /// Creation order, oldest first.
    #[serde(rename = "products")]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteWithSessions {
    #[serde(rename = "pvz")]
    pub site: Site,
    #[serde(rename = "receptions")]
    pub sessions: Vec<SessionWithItems>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_lists_parse_exact_names_only() {
        assert_eq!("Казань".parse::<City>().unwrap(), City::Kazan);
        assert_eq!("обувь".parse::<ItemType>().unwrap(), ItemType::Shoes);

        assert_eq!(
            "Лондон".parse::<City>(),
            Err(InvalidInput::CityNotAllowed("Лондон".to_string()))
        );
        assert_eq!(
            "electronics".parse::<ItemType>(),
            Err(InvalidInput::ItemTypeNotAllowed("electronics".to_string()))
        );
    }

    #[test]
    fn test_status_text_matches_storage_values() {
        for status in [SessionStatus::InProgress, SessionStatus::Closed] {
            assert_eq!(status.as_str().parse::<SessionStatus>(), Ok(status));
        }
        assert!("close".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_listing_serialises_to_api_shape() {
        let site_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let listed = SiteWithSessions {
            site: Site {
                id: site_id,
                created_at: now,
                name: City::Moscow,
            },
            sessions: vec![SessionWithItems {
                session: Session {
                    id: session_id,
                    created_at: now,
                    site_id,
                    status: SessionStatus::InProgress,
                },
                items: vec![Item {
                    id: Uuid::new_v4(),
                    created_at: now,
                    item_type: ItemType::Electronics,
                    session_id,
                }],
            }],
        };

        let json = serde_json::to_value(&listed).unwrap();
        assert_eq!(json["pvz"]["city"], "Москва");
        assert_eq!(json["receptions"][0]["reception"]["status"], "in_progress");
        assert_eq!(
            json["receptions"][0]["reception"]["pvzId"],
            site_id.to_string()
        );
        assert_eq!(json["receptions"][0]["products"][0]["type"], "электроника");
        assert_eq!(
            json["receptions"][0]["products"][0]["receptionId"],
            session_id.to_string()
        );
    }
}
