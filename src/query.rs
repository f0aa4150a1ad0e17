use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Parameters of a calendar request.
///
/// `organizer` and `venue` name the local taxonomy term a request is scoped
/// to, while the `*_id` fields are passed through to the remote API.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct EventQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub organizer_id: Option<String>,
    pub venue_id: Option<String>,
    pub category_id: Option<String>,
    pub subcategory_id: Option<String>,
    pub format_id: Option<String>,
    pub organizer: Option<String>,
    pub venue: Option<String>,
    pub event_id: Option<String>,
    #[serde(rename = "exclude", deserialize_with = "comma_separated")]
    pub exclude_ids: Vec<String>,
    pub allow_custom_events: bool,
    pub disallow_custom_events: bool,
}

impl EventQuery {
    /// True when the remote query is narrowed by a taxonomy the local
    /// events do not share.
    pub fn has_remote_taxonomy(&self) -> bool {
        [
            &self.venue_id,
            &self.category_id,
            &self.subcategory_id,
            &self.format_id,
        ]
        .iter()
        .any(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
    }

    pub fn cache_key(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Joined(String),
        List(Vec<String>),
    }

    let ids = match Raw::deserialize(deserializer)? {
        Raw::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        Raw::List(list) => list,
    };
    Ok(ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect())
}
