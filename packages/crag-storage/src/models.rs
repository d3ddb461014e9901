/// Payload field names shared by the document and intent collections.
pub mod fields {
	pub const DOCUMENT_ID: &str = "document_id";
	pub const SOURCE_NAME: &str = "source_name";
	pub const PARTITION_NUMBER: &str = "partition_number";
	pub const TEXT: &str = "text";
	pub const INTENT: &str = "intent";
	pub const MAIN_INTENT: &str = "mainintent";
	pub const KEYWORDS: &str = "keywords";
}

/// Tag equality condition. Several conditions are OR'ed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCondition {
	pub key: String,
	pub value: String,
}
impl TagCondition {
	pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self { key: key.into(), value: value.into() }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRecord {
	pub document_id: String,
	pub source_name: String,
	pub partition_number: i64,
	pub text: String,
	pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentRecord {
	pub intents: Vec<String>,
	pub main_intents: Vec<String>,
	pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentExample {
	pub category: String,
	pub subcategory: String,
	pub question: String,
	pub vector: Vec<f32>,
}
