use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HorizontError;

// =============================================================================
// Enums
// =============================================================================

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The sales representative typing into the chat.
    User,
    /// Text produced by the completion service (or the fallback reply).
    Assistant,
}

impl Role {
    /// Column value used by the `chat_messages.role` CHECK constraint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HorizontError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(HorizontError::Serialization(format!(
                "unknown message role: {}",
                other
            ))),
        }
    }
}

/// Kind of chart embedded in an assistant reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Several products projected side by side.
    Comparison,
    /// Projection of one product.
    Single,
}

// =============================================================================
// Newtype Wrappers - Identity
// =============================================================================

/// Opaque unique identifier of a chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ChatId {
    type Err = HorizontError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(ChatId)
            .map_err(|e| HorizontError::Serialization(format!("invalid chat id {:?}: {}", s, e)))
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in milliseconds since epoch.
///
/// Millisecond resolution keeps consecutive appends distinguishable in
/// `listChats` ordering; ties inside one chat are broken by append sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_datetime().to_rfc3339())
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// A conversation session owned by one representative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub owner_id: String,
    pub title: String,
    pub created_at: Timestamp,
    /// Timestamp of the newest message; set to the creation time on create.
    pub last_message_at: Option<Timestamp>,
}

/// Metadata of a document attached to a user message.
///
/// Only the metadata is persisted; extracted text is sent upstream once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// One turn of a chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned append sequence; strictly increasing across the store.
    pub seq: i64,
    pub chat_id: ChatId,
    pub role: Role,
    pub content: String,
    pub created_at: Timestamp,
    /// Chart extracted from this (assistant) message, when one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Input for an append: everything except the store-assigned fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewMessage {
    pub content: String,
    pub chart: Option<ChartSpec>,
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Listing row for a chat with a short preview of its newest message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    pub title: String,
    pub message_count: u64,
    pub created_at: Timestamp,
    pub last_message_at: Option<Timestamp>,
    pub last_message_preview: String,
}

/// One immutable version of the system prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub content: String,
    pub created_by: String,
    pub updated_by: String,
    pub updated_at: Timestamp,
    pub is_active: bool,
}

// =============================================================================
// Chart data
// =============================================================================

/// Token opening a chart payload inside generated text.
pub const CHART_OPEN_MARKER: &str = "[GRAFICO_DADOS]";
/// Token closing a chart payload inside generated text.
pub const CHART_CLOSE_MARKER: &str = "[/GRAFICO_DADOS]";

/// Growth descriptor of one product in a chart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductRate {
    /// Yearly rate in percent.
    pub rate: f64,
    #[serde(rename = "yearlyMultiplier")]
    pub yearly_multiplier: f64,
    #[serde(
        rename = "monthlyRate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub monthly_rate: Option<f64>,
}

impl ProductRate {
    /// Descriptor for a product quoted by yearly percentage.
    pub fn yearly(rate_percent: f64) -> Self {
        Self {
            rate: rate_percent,
            yearly_multiplier: 1.0 + rate_percent / 100.0,
            monthly_rate: None,
        }
    }

    /// Descriptor for a product quoted by monthly fraction (0.012 = 1.2%/month).
    pub fn monthly(monthly_rate: f64) -> Self {
        Self {
            rate: monthly_rate * 100.0 * 12.0,
            yearly_multiplier: (1.0 + monthly_rate).powi(12),
            monthly_rate: Some(monthly_rate),
        }
    }
}

/// How a single-product projection is quoted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QuotedRate {
    /// Fraction per month, e.g. `0.012`.
    Monthly(f64),
    /// Percent per year, e.g. `19.37`.
    Yearly(f64),
}

/// Structured chart-rendering data carried inside an assistant reply.
///
/// Field names on the wire are `type`, `title`, `years`, `initialValue` and
/// `products`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub title: String,
    pub years: u32,
    #[serde(rename = "initialValue")]
    pub initial_value: f64,
    pub products: BTreeMap<String, ProductRate>,
}

impl ChartSpec {
    /// Comparison chart against the standard product shelf.
    pub fn comparison(
        initial_value: f64,
        years: u32,
        products: Option<BTreeMap<String, ProductRate>>,
    ) -> Self {
        let products = products.unwrap_or_else(default_comparison_products);
        Self {
            kind: ChartKind::Comparison,
            title: "Comparativo de Investimentos".to_string(),
            years,
            initial_value,
            products,
        }
    }

    /// Projection chart for a single product.
    pub fn single(product_name: &str, initial_value: f64, years: u32, rate: QuotedRate) -> Self {
        let descriptor = match rate {
            QuotedRate::Monthly(m) => ProductRate::monthly(m),
            QuotedRate::Yearly(y) => ProductRate::yearly(y),
        };
        let mut products = BTreeMap::new();
        products.insert(product_name.to_string(), descriptor);
        Self {
            kind: ChartKind::Single,
            title: format!("Projeção - {}", product_name),
            years,
            initial_value,
            products,
        }
    }

    /// Render the chart as a marker-delimited block for embedding in text.
    pub fn to_marked_block(&self) -> Result<String, HorizontError> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(format!("{}\n{}\n{}", CHART_OPEN_MARKER, json, CHART_CLOSE_MARKER))
    }
}

/// Products shown when a comparison is requested without explicit rates.
pub fn default_comparison_products() -> BTreeMap<String, ProductRate> {
    let mut products = BTreeMap::new();
    products.insert("Poupança".to_string(), ProductRate::yearly(7.75));
    products.insert("CDI".to_string(), ProductRate::yearly(10.88));
    products.insert(
        "Horizont Smart".to_string(),
        ProductRate {
            rate: 15.39,
            yearly_multiplier: 1.1539,
            monthly_rate: Some(0.012),
        },
    );
    products.insert("Horizont Trend".to_string(), ProductRate::yearly(19.37));
    products
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_str() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_chat_id_parse() {
        let id = ChatId::new();
        let parsed: ChatId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<ChatId>().is_err());
    }

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp(1_700_000_000_000);
        let b = Timestamp(1_700_000_000_001);
        assert!(a < b);
        assert_eq!(a.to_datetime().timestamp_millis(), a.0);
    }

    #[test]
    fn test_chart_spec_wire_names() {
        let spec = ChartSpec::single("A", 1000.0, 5, QuotedRate::Yearly(10.0));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "single");
        assert_eq!(json["initialValue"], 1000.0);
        assert_eq!(json["years"], 5);
        assert!(json["products"]["A"].get("monthlyRate").is_none());
        assert!((json["products"]["A"]["yearlyMultiplier"].as_f64().unwrap() - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_single_monthly_rate_compounds() {
        let spec = ChartSpec::single("Horizont Smart", 500_000.0, 3, QuotedRate::Monthly(0.012));
        let product = &spec.products["Horizont Smart"];
        assert_eq!(product.monthly_rate, Some(0.012));
        assert!((product.rate - 14.4).abs() < 1e-9);
        assert!((product.yearly_multiplier - 1.012f64.powi(12)).abs() < 1e-12);
        assert_eq!(spec.title, "Projeção - Horizont Smart");
    }

    #[test]
    fn test_marked_block_wraps_json() {
        let spec = ChartSpec::comparison(250_000.0, 3, None);
        let block = spec.to_marked_block().unwrap();
        assert!(block.starts_with("[GRAFICO_DADOS]\n{"));
        assert!(block.ends_with("}\n[/GRAFICO_DADOS]"));
        assert!(block.contains("\"initialValue\": 250000.0"));
    }

    #[test]
    fn test_comparison_defaults() {
        let spec = ChartSpec::comparison(500_000.0, 5, None);
        assert_eq!(spec.kind, ChartKind::Comparison);
        assert_eq!(spec.products.len(), 4);
        assert!(spec.products.contains_key("CDI"));
    }
}
