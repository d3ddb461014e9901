use std::{
	collections::HashMap,
	sync::{Arc, atomic::Ordering},
};

use tokio_util::sync::CancellationToken;

use crag_domain::conversation::Conversation;
use crag_service::{DirectAnswer, IntentTagSet, RetrievedFragment, StandaloneQuestion};

use super::{MemoryStore, ScriptedChat, TableEmbedding, fragment, hit};

fn keys(fragments: &[RetrievedFragment]) -> Vec<(&str, i64)> {
	fragments.iter().map(RetrievedFragment::key).collect()
}

#[tokio::test]
async fn rewrite_orders_questions_by_score() {
	let chat = Arc::new(ScriptedChat::new(
		"```json\n[{\"standaloneQuestion\": \"Who signed it?\", \"score\": 0.4}, \
		 {\"standaloneQuestion\": \"Who signed the lease?\", \"score\": 0.8}]\n```",
		"false",
		"",
	));
	let service = super::service(
		super::test_config(),
		chat,
		Arc::new(TableEmbedding::default()),
		Arc::new(MemoryStore::default()),
	);
	let questions = service
		.rewrite(&Conversation::new("system"), "Who signed it?", &CancellationToken::new())
		.await
		.expect("Rewrite must not fail.");

	assert_eq!(questions[0].text, "Who signed the lease?");
	assert_eq!(questions[1].text, "Who signed it?");
}

#[tokio::test]
async fn rewrite_falls_back_to_the_raw_input() {
	let cancel = CancellationToken::new();
	let conversation = Conversation::new("system");

	for chat in [
		ScriptedChat::new("<think>hmm</think>Sure, here you go.", "false", ""),
		ScriptedChat::new("[]", "false", ""),
		ScriptedChat { rewrite: None, ..ScriptedChat::default() },
	] {
		let service = super::service(
			super::test_config(),
			Arc::new(chat),
			Arc::new(TableEmbedding::default()),
			Arc::new(MemoryStore::default()),
		);
		let questions = service
			.rewrite(&conversation, "What is the rent?", &cancel)
			.await
			.expect("Rewrite must not fail.");

		assert_eq!(questions, vec![StandaloneQuestion::fallback("What is the rent?")]);
	}
}

#[tokio::test]
async fn router_override_wins_over_a_negative_verdict() {
	let chat = Arc::new(ScriptedChat::new("[]", "{\"requiresRAG\": false}", ""));
	let service = super::service(
		super::test_config(),
		chat,
		Arc::new(TableEmbedding::default()),
		Arc::new(MemoryStore::default()),
	);
	let input = "What did the contract say about termination notice?";
	let decision = service
		.route(&Conversation::new("system"), input, input, &CancellationToken::new())
		.await
		.expect("Routing must not fail.");

	assert!(decision.needs_retrieval);
	assert!(!decision.model_verdict);
	assert_eq!(decision.forced_term.as_deref(), Some("contract"));
}

#[tokio::test]
async fn forced_term_inside_a_longer_word_does_not_force_retrieval() {
	let chat = Arc::new(ScriptedChat::new("[]", "{\"requiresRAG\": false}", ""));
	let service = super::service(
		super::test_config(),
		chat,
		Arc::new(TableEmbedding::default()),
		Arc::new(MemoryStore::default()),
	);
	let input = "A subcontractor called about the weather.";
	let decision = service
		.route(&Conversation::new("system"), input, input, &CancellationToken::new())
		.await
		.expect("Routing must not fail.");

	assert!(!decision.needs_retrieval);
	assert_eq!(decision.forced_term, None);
}

#[tokio::test]
async fn router_failure_means_no_retrieval() {
	let chat = Arc::new(ScriptedChat { router: None, ..ScriptedChat::default() });
	let service = super::service(
		super::test_config(),
		chat,
		Arc::new(TableEmbedding::default()),
		Arc::new(MemoryStore::default()),
	);
	let decision = service
		.route(&Conversation::new("system"), "Hi!", "Hi!", &CancellationToken::new())
		.await
		.expect("Routing must not fail.");

	assert!(!decision.needs_retrieval);
}

#[tokio::test]
async fn classification_merges_intents_and_keywords() {
	let mut intent = hit("", 0, "", 0.9);

	intent.tags.insert("intent".to_string(), vec!["Contracts".to_string()]);
	intent.tags.insert("mainintent".to_string(), vec!["Legal".to_string(), "none".to_string()]);

	let store = Arc::new(MemoryStore { intent_hits: vec![intent], ..MemoryStore::default() });
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		Arc::new(TableEmbedding::default()),
		store,
	);
	let tags = service
		.classify("What did the contract say about termination notice?", &CancellationToken::new())
		.await
		.expect("Classification must not fail.");

	assert_eq!(tags.intents, vec!["Contracts".to_string(), "Legal".to_string()]);
	assert!(tags.keywords.iter().any(|keyword| keyword == "contract"));
}

#[tokio::test]
async fn failed_question_keeps_its_siblings_tags_in_order() {
	let questions = ["Who signed the lease?", "What is the monthly rent?", "When is the invoice due?"];
	let mut lease = hit("", 0, "", 0.9);
	let mut invoice = hit("", 0, "", 0.9);

	lease.tags.insert("intent".to_string(), vec!["Contracts".to_string()]);
	invoice.tags.insert("intent".to_string(), vec!["Invoices".to_string()]);

	let store = Arc::new(MemoryStore {
		intents_by_question: HashMap::from([
			(questions[0].to_string(), vec![lease]),
			(questions[2].to_string(), vec![invoice]),
		]),
		failing_questions: vec![questions[1].to_string()],
		..MemoryStore::default()
	});
	let mut cfg = super::test_config();

	cfg.intents.max_questions = 3;

	let service = super::service(
		cfg,
		Arc::new(ScriptedChat::default()),
		Arc::new(TableEmbedding::default()),
		store.clone(),
	);
	let questions: Vec<StandaloneQuestion> =
		questions.iter().map(|text| StandaloneQuestion::fallback(text)).collect();
	let tags = service
		.classify_all(&questions, &CancellationToken::new())
		.await
		.expect("Classification must not fail.");

	assert_eq!(tags.intents, vec!["Contracts".to_string(), "Invoices".to_string()]);
	assert_eq!(store.searches.lock().expect("Lock must not be poisoned.").len(), 3);
}

#[tokio::test]
async fn adjacent_partitions_follow_their_anchor() {
	let store = Arc::new(MemoryStore {
		document_hits: vec![hit("D", 5, "anchor", 0.8)],
		partitions: vec![
			fragment("D", 4, "before"),
			fragment("D", 6, "after"),
			fragment("E", 4, "other document"),
			fragment("E", 6, "other document"),
		],
		..MemoryStore::default()
	});
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		Arc::new(TableEmbedding::default()),
		store,
	);
	let outcome = service
		.retrieve("anchor", &IntentTagSet::default(), &CancellationToken::new())
		.await
		.expect("Retrieval must not fail.");

	assert_eq!(keys(&outcome.fragments), vec![("D", 5), ("D", 4), ("D", 6)]);
	assert!(outcome.fragments.iter().all(|fragment| fragment.relevance_score == 0.8));
	assert!(outcome.direct_answer.is_none());
}

#[tokio::test]
async fn tags_become_filters_on_the_document_search() {
	let store = Arc::new(MemoryStore {
		document_hits: vec![hit("D", 0, "first partition", 0.7)],
		..MemoryStore::default()
	});
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		Arc::new(TableEmbedding::default()),
		store.clone(),
	);
	let tags = IntentTagSet {
		intents: vec!["Contracts".to_string()],
		keywords: vec!["termination".to_string(), "notice".to_string()],
	};

	service.retrieve("termination notice", &tags, &CancellationToken::new()).await.expect("Retrieval must not fail.");

	let searches = store.document_searches();

	assert_eq!(searches.len(), 1);
	assert_eq!(searches[0].filters.len(), 3);
	assert_eq!(searches[0].filters[0].key, "intent");
	assert_eq!(searches[0].limit, 3);
	assert!((searches[0].min_relevance - 0.4).abs() < f32::EPSILON);
}

#[tokio::test]
async fn empty_search_falls_back_to_direct_recall() {
	let store = Arc::new(MemoryStore {
		direct: Some(DirectAnswer {
			text: "Three months.".to_string(),
			found: true,
			sources: vec![fragment("lease", 2, "The notice period is three months.")],
		}),
		..MemoryStore::default()
	});
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		Arc::new(TableEmbedding::default()),
		store.clone(),
	);
	let outcome = service
		.retrieve("notice period", &IntentTagSet::default(), &CancellationToken::new())
		.await
		.expect("Retrieval must not fail.");

	assert_eq!(store.ask_calls.load(Ordering::SeqCst), 1);
	assert_eq!(outcome.direct_answer.as_deref(), Some("Three months."));
	assert_eq!(keys(&outcome.fragments), vec![("lease", 2)]);
}

#[tokio::test]
async fn failed_search_also_falls_back_to_direct_recall() {
	let store = Arc::new(MemoryStore { fail_search: true, ..MemoryStore::default() });
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		Arc::new(TableEmbedding::default()),
		store.clone(),
	);
	let outcome = service
		.retrieve("notice period", &IntentTagSet::default(), &CancellationToken::new())
		.await
		.expect("Retrieval must not fail.");

	assert_eq!(store.ask_calls.load(Ordering::SeqCst), 1);
	assert!(outcome.has_no_context());
}

#[tokio::test]
async fn rerank_blends_similarity_and_retrieval_scores() {
	let near = (1.0_f32 - 0.81).sqrt();
	let far = (1.0_f32 - 0.01).sqrt();
	let embedding = Arc::new(TableEmbedding::with(&[
		("query", vec![1.0, 0.0]),
		("similar", vec![0.9, near]),
		("distant", vec![0.1, far]),
	]));
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		embedding.clone(),
		Arc::new(MemoryStore::default()),
	);
	let mut similar = fragment("D", 1, "similar");
	let mut distant = fragment("D", 2, "distant");

	similar.relevance_score = 0.1;
	distant.relevance_score = 0.9;

	let reranked = service
		.rerank("query", vec![distant, similar], &CancellationToken::new())
		.await
		.expect("Rerank must not fail.");

	assert_eq!(embedding.count(), 1);
	assert_eq!(reranked[0].text, "similar");
	assert!((reranked[0].relevance_score - 0.66).abs() < 1e-4);
	assert!((reranked[1].relevance_score - 0.34).abs() < 1e-4);
}

#[tokio::test]
async fn rerank_leaves_trivial_inputs_alone() {
	let embedding = Arc::new(TableEmbedding::default());
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		embedding.clone(),
		Arc::new(MemoryStore::default()),
	);
	let cancel = CancellationToken::new();
	let single = vec![fragment("D", 1, "only")];
	let pair = vec![fragment("D", 1, "a"), fragment("D", 2, "b")];

	assert_eq!(service.rerank("query", single.clone(), &cancel).await.expect("No-op."), single);
	assert_eq!(service.rerank("   ", pair.clone(), &cancel).await.expect("No-op."), pair);
	assert_eq!(embedding.count(), 0);
}

#[tokio::test]
async fn rerank_failure_keeps_retrieval_order() {
	let embedding = Arc::new(TableEmbedding { fail: true, ..TableEmbedding::default() });
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		embedding,
		Arc::new(MemoryStore::default()),
	);
	let fragments = vec![fragment("D", 1, "a"), fragment("D", 2, "b")];
	let reranked = service
		.rerank("query", fragments.clone(), &CancellationToken::new())
		.await
		.expect("Rerank must not fail.");

	assert_eq!(reranked, fragments);
}
