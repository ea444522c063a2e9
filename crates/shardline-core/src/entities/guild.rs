//! Guild entity - a community the client is a member of

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// Guild entity built from a guild-create payload
///
/// Unavailable guilds carry only their id; everything else stays at its
/// default until the guild becomes available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub large: bool,
}

impl Guild {
    /// Create an unavailable placeholder for a guild known only by id
    pub fn unavailable(id: Snowflake) -> Self {
        Self {
            id,
            name: String::new(),
            icon: None,
            owner_id: None,
            unavailable: true,
            member_count: None,
            large: false,
        }
    }

    /// Check if a user is the guild owner
    #[inline]
    pub fn is_owner(&self, user_id: Snowflake) -> bool {
        self.owner_id == Some(user_id)
    }
}
