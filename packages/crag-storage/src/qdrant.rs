use std::collections::HashMap;

use qdrant_client::{
	Payload, Qdrant,
	qdrant::{
		Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Filter, PointStruct,
		Query, QueryPointsBuilder, ScrollPointsBuilder, UpsertPointsBuilder, Value,
		VectorParamsBuilder, value::Kind,
	},
};
use uuid::Uuid;

use crate::{
	Error, Result,
	models::{IntentExample, IntentRecord, PartitionRecord, TagCondition, fields},
};

const INTENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d3e_8a4b_5c6d_9e0f_1a2b_3c4d_5e6f);

pub struct QdrantStore {
	pub client: Qdrant,
	pub collection: String,
	pub intent_collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &crag_config::Qdrant) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self {
			client,
			collection: cfg.collection.clone(),
			intent_collection: cfg.intent_collection.clone(),
			vector_dim: cfg.vector_dim,
		})
	}

	/// Nearest document partitions above `min_relevance`, optionally restricted by tags.
	pub async fn search_partitions(
		&self,
		vector: Vec<f32>,
		tags: &[TagCondition],
		min_relevance: f32,
		limit: u32,
	) -> Result<Vec<PartitionRecord>> {
		self.check_dimension(&vector)?;

		let mut search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.score_threshold(min_relevance)
			.limit(limit as u64)
			.with_payload(true);

		if let Some(filter) = tag_filter(tags) {
			search = search.filter(filter);
		}

		let response = self.client.query(search).await?;

		response
			.result
			.into_iter()
			.map(|point| partition_from_payload(&point.payload, point.score))
			.collect()
	}

	pub async fn search_intents(
		&self,
		vector: Vec<f32>,
		min_relevance: f32,
		limit: u32,
	) -> Result<Vec<IntentRecord>> {
		self.check_dimension(&vector)?;

		let search = QueryPointsBuilder::new(self.intent_collection.clone())
			.query(Query::new_nearest(vector))
			.score_threshold(min_relevance)
			.limit(limit as u64)
			.with_payload(true);
		let response = self.client.query(search).await?;

		Ok(response
			.result
			.into_iter()
			.map(|point| IntentRecord {
				intents: payload_strings(&point.payload, fields::INTENT),
				main_intents: payload_strings(&point.payload, fields::MAIN_INTENT),
				score: point.score,
			})
			.collect())
	}

	/// Point lookup by document id and partition number. Scored zero.
	pub async fn partition(
		&self,
		document_id: &str,
		partition_number: i64,
	) -> Result<Option<PartitionRecord>> {
		let filter = Filter::all([
			Condition::matches(fields::DOCUMENT_ID, document_id.to_string()),
			Condition::matches(fields::PARTITION_NUMBER, partition_number),
		]);
		let scroll = ScrollPointsBuilder::new(self.collection.clone())
			.filter(filter)
			.limit(1)
			.with_payload(true);
		let response = self.client.scroll(scroll).await?;
		let Some(point) = response.result.into_iter().next() else {
			return Ok(None);
		};

		partition_from_payload(&point.payload, 0.0).map(Some)
	}

	pub async fn count_document_partitions(&self, document_id: &str) -> Result<u64> {
		if !self.client.collection_exists(self.collection.clone()).await? {
			return Ok(0);
		}

		let count = CountPointsBuilder::new(self.collection.clone())
			.filter(Filter::must([Condition::matches(
				fields::DOCUMENT_ID,
				document_id.to_string(),
			)]))
			.exact(true);
		let response = self.client.count(count).await?;

		Ok(response.result.map(|result| result.count).unwrap_or(0))
	}

	/// Drops both collections. Missing collections are skipped.
	pub async fn delete_collections(&self) -> Result<Vec<String>> {
		let mut deleted = Vec::new();

		for name in [&self.collection, &self.intent_collection] {
			if self.client.collection_exists(name.clone()).await? {
				self.client.delete_collection(name.clone()).await?;
				deleted.push(name.clone());
			}
		}

		Ok(deleted)
	}

	pub async fn ensure_intent_collection(&self) -> Result<()> {
		if self.client.collection_exists(self.intent_collection.clone()).await? {
			return Ok(());
		}

		self.client
			.create_collection(
				CreateCollectionBuilder::new(self.intent_collection.clone()).vectors_config(
					VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine),
				),
			)
			.await?;

		Ok(())
	}

	/// Upserts labelled example questions; ids derive from the question text.
	pub async fn upsert_intent_examples(&self, examples: &[IntentExample]) -> Result<usize> {
		if examples.is_empty() {
			return Ok(0);
		}

		let mut points = Vec::with_capacity(examples.len());

		for example in examples {
			self.check_dimension(&example.vector)?;

			let mut object = serde_json::Map::new();

			object.insert(fields::TEXT.to_string(), example.question.clone().into());
			object.insert(fields::INTENT.to_string(), vec![example.subcategory.clone()].into());
			object.insert(fields::MAIN_INTENT.to_string(), vec![example.category.clone()].into());

			let payload = Payload::try_from(serde_json::Value::Object(object))
				.map_err(|err| Error::InvalidPayload(err.to_string()))?;

			points.push(PointStruct::new(
				intent_point_id(&example.question).to_string(),
				example.vector.clone(),
				payload,
			));
		}

		self.client
			.upsert_points(
				UpsertPointsBuilder::new(self.intent_collection.clone(), points).wait(true),
			)
			.await?;

		Ok(examples.len())
	}

	fn check_dimension(&self, vector: &[f32]) -> Result<()> {
		if vector.len() != self.vector_dim as usize {
			return Err(Error::InvalidPayload(format!(
				"Vector has {} dimensions, expected {}.",
				vector.len(),
				self.vector_dim
			)));
		}

		Ok(())
	}
}

pub fn intent_point_id(question: &str) -> Uuid {
	Uuid::new_v5(&INTENT_NAMESPACE, question.trim().to_lowercase().as_bytes())
}

/// Any-of filter over tag conditions, or `None` when there is nothing to filter on.
pub fn tag_filter(tags: &[TagCondition]) -> Option<Filter> {
	if tags.is_empty() {
		return None;
	}

	Some(Filter::any(
		tags.iter().map(|tag| Condition::matches(tag.key.clone(), tag.value.clone())),
	))
}

pub fn partition_from_payload(
	payload: &HashMap<String, Value>,
	score: f32,
) -> Result<PartitionRecord> {
	let document_id = payload_str(payload, fields::DOCUMENT_ID)
		.ok_or_else(|| Error::InvalidPayload("Partition is missing document_id.".to_string()))?;
	let partition_number = payload_i64(payload, fields::PARTITION_NUMBER).ok_or_else(|| {
		Error::InvalidPayload("Partition is missing partition_number.".to_string())
	})?;
	let source_name =
		payload_str(payload, fields::SOURCE_NAME).unwrap_or_else(|| document_id.clone());
	let text = payload_str(payload, fields::TEXT).unwrap_or_default();

	Ok(PartitionRecord { document_id, source_name, partition_number, text, score })
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::StringValue(text)) => Some(text.clone()),
		_ => None,
	}
}

fn payload_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::IntegerValue(value)) => Some(*value),
		Some(Kind::DoubleValue(value)) => {
			if value.fract() == 0.0 {
				Some(*value as i64)
			} else {
				None
			}
		},
		Some(Kind::StringValue(text)) => text.trim().parse().ok(),
		_ => None,
	}
}

/// String or list-of-strings payload value, flattened.
fn payload_strings(payload: &HashMap<String, Value>, key: &str) -> Vec<String> {
	let Some(value) = payload.get(key) else {
		return Vec::new();
	};

	match &value.kind {
		Some(Kind::StringValue(text)) => vec![text.clone()],
		Some(Kind::ListValue(list)) => list
			.values
			.iter()
			.filter_map(|item| match &item.kind {
				Some(Kind::StringValue(text)) => Some(text.clone()),
				_ => None,
			})
			.collect(),
		_ => Vec::new(),
	}
}
