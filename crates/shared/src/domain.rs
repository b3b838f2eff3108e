use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DirectoryError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_newtype!(CompanyId);

/// Lowest (best) rank a company can hold.
pub const MIN_RANK: i64 = 1;

/// Coarse quality bucket. `A` is best; anything the backend sends outside
/// `A..=D` is kept verbatim as `Unknown` and sorts after `D`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tier {
    A,
    B,
    C,
    D,
    Unknown(String),
}

impl Tier {
    pub fn as_str(&self) -> &str {
        match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
            Tier::D => "D",
            Tier::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn sort_key(&self) -> u8 {
        match self {
            Tier::A => 0,
            Tier::B => 1,
            Tier::C => 2,
            Tier::D => 3,
            Tier::Unknown(_) => 4,
        }
    }

    pub fn cmp_rank(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Tier::Unknown(_))
    }

    /// Lenient decoding used for backend payloads: never fails.
    pub fn from_wire(raw: &str) -> Self {
        raw.parse()
            .unwrap_or_else(|_| Tier::Unknown(raw.to_string()))
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Unknown(String::new())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Tier::A),
            "B" => Ok(Tier::B),
            "C" => Ok(Tier::C),
            "D" => Ok(Tier::D),
            _ => Err(DirectoryError::Validation(format!(
                "tier must be one of A, B, C, D (got '{s}')"
            ))),
        }
    }
}

impl Serialize for Tier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Tier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|raw| Tier::from_wire(&raw)).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Founder {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    #[serde(default)]
    pub name: String,
    /// Lower is better; `1` is the top of the list.
    #[serde(default = "default_rank")]
    pub rank: i64,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default, deserialize_with = "decode_tags")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "decode_founders")]
    pub founders: Vec<Founder>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founded_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

fn default_rank() -> i64 {
    MIN_RANK
}

impl Company {
    pub fn new(id: CompanyId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rank: MIN_RANK,
            tier: Tier::default(),
            tags: Vec::new(),
            founders: Vec::new(),
            description: None,
            short_description: None,
            website: None,
            company_linkedin: None,
            founded_year: None,
            location: None,
        }
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    pub fn short_description(&self) -> &str {
        self.short_description
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.description())
    }

    /// Four-digit founding year, if the backend supplied a usable one.
    pub fn founded_year_number(&self) -> Option<u16> {
        self.founded_year
            .as_deref()
            .and_then(|year| year.trim().parse::<u16>().ok())
    }

    /// Case-insensitive substring match against name, description and founder
    /// names. A blank query matches everything; otherwise the text is used as
    /// given.
    pub fn matches_query(&self, query: &str) -> bool {
        if query.trim().is_empty() {
            return true;
        }
        let needle = query.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self.description().to_lowercase().contains(&needle)
            || self
                .founders
                .iter()
                .any(|founder| founder.name.to_lowercase().contains(&needle))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Tags may arrive as a JSON array or as a JSON-encoded string. Malformed
/// values never fail the surrounding company: non-string array entries are
/// dropped and anything that is not a list becomes a single tag.
pub fn decode_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.map(tags_from_value).unwrap_or_default())
}

pub fn decode_tags_text(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(entries)) => tags_from_entries(entries),
        Ok(_) | Err(_) => {
            debug!(raw = trimmed, "tags: falling back to single-tag heuristic");
            vec![trimmed.to_string()]
        }
    }
}

fn tags_from_value(value: Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(text) => decode_tags_text(&text),
        Value::Array(entries) => tags_from_entries(entries),
        other => {
            let recovered = DirectoryError::Parse(format!("tags should be a list, got {other}"));
            warn!(error = %recovered, "tags: keeping value as a single tag");
            vec![other.to_string()]
        }
    }
}

fn tags_from_entries(entries: Vec<Value>) -> Vec<String> {
    let total = entries.len();
    let tags: Vec<String> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(tag) => Some(tag),
            _ => None,
        })
        .collect();
    if tags.len() != total {
        let recovered =
            DirectoryError::Parse(format!("{} non-text tag entries", total - tags.len()));
        warn!(error = %recovered, "tags: dropping malformed entries");
    }
    tags
}

/// Founders may arrive as an array or a JSON-encoded string. Entries may be
/// full objects or bare names; anything else is dropped.
fn decode_founders<'de, D>(deserializer: D) -> Result<Vec<Founder>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.map(founders_from_value).unwrap_or_default())
}

fn founders_from_value(value: Value) -> Vec<Founder> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(entries) => founders_from_entries(entries),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(entries)) => founders_from_entries(entries),
                Ok(_) | Err(_) => {
                    let recovered =
                        DirectoryError::Parse(format!("founders text is not a list: {trimmed}"));
                    warn!(error = %recovered, "founders: treating as empty");
                    Vec::new()
                }
            }
        }
        other => {
            let recovered = DirectoryError::Parse(format!("founders should be a list, got {other}"));
            warn!(error = %recovered, "founders: treating as empty");
            Vec::new()
        }
    }
}

fn founders_from_entries(entries: Vec<Value>) -> Vec<Founder> {
    let total = entries.len();
    let founders: Vec<Founder> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(Founder {
                name,
                linkedin: None,
            }),
            other => serde_json::from_value(other).ok(),
        })
        .collect();
    if founders.len() != total {
        let recovered = DirectoryError::Parse(format!(
            "{} founder entries could not be read",
            total - founders.len()
        ));
        warn!(error = %recovered, "founders: dropping malformed entries");
    }
    founders
}
