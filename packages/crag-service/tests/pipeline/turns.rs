use std::sync::{Arc, atomic::Ordering};

use tokio_util::sync::CancellationToken;

use crag_config::Taxonomy;
use crag_domain::conversation::{Conversation, Role};
use crag_service::{GroundingVerdict, TurnOutcome, directive, prompts};

use super::{MemoryStore, ScriptedChat, SpyMaintenance, TableEmbedding, fragment, hit};

const CONTRACT_QUESTION: &str = "What did the contract say about termination notice?";
const CONTRACT_CHUNK: &str = "The termination notice period of the contract is three months.";
const BANNER: &str = "[Warning: This answer is not based on the retrieved documents.]";

fn contract_chat(answer: &str) -> ScriptedChat {
	ScriptedChat::new(
		&format!("[{{\"standaloneQuestion\": \"{CONTRACT_QUESTION}\", \"score\": 0.9}}]"),
		"{\"requiresRAG\": false}",
		answer,
	)
}

fn contract_store() -> MemoryStore {
	MemoryStore { document_hits: vec![hit("lease", 3, CONTRACT_CHUNK, 0.8)], ..MemoryStore::default() }
}

#[tokio::test]
async fn contract_question_is_answered_from_the_documents() {
	let chat = Arc::new(contract_chat("The contract sets a termination notice period of three months."));
	let store = Arc::new(contract_store());
	let service = super::service(
		super::test_config(),
		chat.clone(),
		Arc::new(TableEmbedding::default()),
		store.clone(),
	);
	let mut conversation = Conversation::new("system");
	let outcome = service
		.handle_user_turn(&mut conversation, CONTRACT_QUESTION, &CancellationToken::new(), None)
		.await;
	let TurnOutcome::Responded(candidate) = outcome else {
		panic!("Expected a response, got {outcome:?}.");
	};

	assert_eq!(candidate.verdict, GroundingVerdict::Grounded);
	assert_eq!(candidate.text, "The contract sets a termination notice period of three months.");

	let searches = store.document_searches();

	assert_eq!(searches.len(), 1);
	assert!(!searches[0].filters.is_empty());

	let prompt = chat.last_answer_messages();
	let last = prompt.last().expect("Expected a user message.");

	assert!(last.content.starts_with("Context:\n[lease.pdf:3]\n"));
	assert!(last.content.ends_with(&format!("Question: {CONTRACT_QUESTION}")));
	assert_eq!(conversation.len(), 3);
	assert_eq!(conversation.messages()[1].content, CONTRACT_QUESTION);
	assert_eq!(conversation.messages()[2].role, Role::Assistant);
}

#[tokio::test]
async fn ungrounded_answer_carries_the_warning_banner() {
	let chat = Arc::new(contract_chat("Paris is lovely in spring."));
	let service = super::service(
		super::test_config(),
		chat,
		Arc::new(TableEmbedding::default()),
		Arc::new(contract_store()),
	);
	let mut conversation = Conversation::new("system");
	let outcome = service
		.handle_user_turn(&mut conversation, CONTRACT_QUESTION, &CancellationToken::new(), None)
		.await;
	let TurnOutcome::Responded(candidate) = outcome else {
		panic!("Expected a response, got {outcome:?}.");
	};

	assert_eq!(candidate.verdict, GroundingVerdict::Ungrounded);
	assert!(candidate.text.starts_with(BANNER));
	assert!(candidate.text.contains("Paris is lovely in spring."));
	assert_eq!(conversation.messages()[2].content, candidate.text);
	assert!(conversation.messages()[2].content.starts_with(BANNER));
}

#[tokio::test]
async fn fact_check_can_overrule_lexical_overlap() {
	let mut cfg = super::test_config();

	cfg.grounding.policy = "both".to_string();

	let chat = Arc::new(ScriptedChat {
		fact_check: Some("The facts give three months, not six.\nScore: NO".to_string()),
		..contract_chat("The contract termination notice period is six months.")
	});
	let service =
		super::service(cfg, chat, Arc::new(TableEmbedding::default()), Arc::new(contract_store()));
	let outcome = service
		.handle_user_turn(
			&mut Conversation::new("system"),
			CONTRACT_QUESTION,
			&CancellationToken::new(),
			None,
		)
		.await;
	let TurnOutcome::Responded(candidate) = outcome else {
		panic!("Expected a response, got {outcome:?}.");
	};

	assert_eq!(candidate.verdict, GroundingVerdict::Ungrounded);
	assert_eq!(candidate.explanation.as_deref(), Some("The facts give three months, not six."));
	assert!(candidate.text.contains("[Fact check: The facts give three months, not six.]"));
}

#[tokio::test]
async fn small_talk_skips_retrieval() {
	let chat = Arc::new(ScriptedChat::new("[]", "false", "Hello! How can I help?"));
	let store = Arc::new(contract_store());
	let service = super::service(
		super::test_config(),
		chat.clone(),
		Arc::new(TableEmbedding::default()),
		store.clone(),
	);
	let outcome = service
		.handle_user_turn(&mut Conversation::new("system"), "Hello there!", &CancellationToken::new(), None)
		.await;
	let TurnOutcome::Responded(candidate) = outcome else {
		panic!("Expected a response, got {outcome:?}.");
	};

	assert_eq!(candidate.verdict, GroundingVerdict::Grounded);
	assert!(store.searches.lock().expect("Lock must not be poisoned.").is_empty());
	assert!(
		chat.last_answer_messages()
			.iter()
			.any(|message| message.role == Role::System && message.content == prompts::NO_RETRIEVAL_NOTE)
	);
}

#[tokio::test]
async fn retrieval_without_context_is_unknown() {
	let chat = Arc::new(contract_chat("I could not find anything about that."));
	let service = super::service(
		super::test_config(),
		chat,
		Arc::new(TableEmbedding::default()),
		Arc::new(MemoryStore::default()),
	);
	let outcome = service
		.handle_user_turn(
			&mut Conversation::new("system"),
			CONTRACT_QUESTION,
			&CancellationToken::new(),
			None,
		)
		.await;
	let TurnOutcome::Responded(candidate) = outcome else {
		panic!("Expected a response, got {outcome:?}.");
	};

	assert_eq!(candidate.verdict, GroundingVerdict::Unknown);
	assert!(!candidate.text.starts_with(BANNER));
}

#[tokio::test]
async fn answer_failure_leaves_the_conversation_untouched() {
	let chat = Arc::new(ScriptedChat { answer: None, ..contract_chat("") });
	let service = super::service(
		super::test_config(),
		chat,
		Arc::new(TableEmbedding::default()),
		Arc::new(contract_store()),
	);
	let mut conversation = Conversation::new("system");
	let outcome = service
		.handle_user_turn(&mut conversation, CONTRACT_QUESTION, &CancellationToken::new(), None)
		.await;

	assert!(matches!(outcome, TurnOutcome::Failed { .. }));
	assert_eq!(conversation.len(), 1);
}

#[tokio::test]
async fn cancelled_turn_commits_nothing() {
	let chat = Arc::new(contract_chat("Three months."));
	let service = super::service(
		super::test_config(),
		chat.clone(),
		Arc::new(TableEmbedding::default()),
		Arc::new(contract_store()),
	);
	let mut conversation = Conversation::new("system");
	let cancel = CancellationToken::new();

	cancel.cancel();

	let outcome = service.handle_user_turn(&mut conversation, CONTRACT_QUESTION, &cancel, None).await;

	assert_eq!(outcome, TurnOutcome::Cancelled);
	assert_eq!(conversation.len(), 1);
	assert_eq!(chat.answer_count(), 0);
}

#[tokio::test]
async fn cancelling_a_pending_answer_commits_nothing() {
	let chat = Arc::new(ScriptedChat { hang_answer: true, ..contract_chat("Three months.") });
	let service = super::service(
		super::test_config(),
		chat.clone(),
		Arc::new(TableEmbedding::default()),
		Arc::new(contract_store()),
	);
	let mut conversation = Conversation::new("system");
	let cancel = CancellationToken::new();
	let (outcome, ()) = tokio::join!(
		service.handle_user_turn(&mut conversation, CONTRACT_QUESTION, &cancel, None),
		async {
			while chat.answer_count() == 0 {
				tokio::task::yield_now().await;
			}

			cancel.cancel();
		},
	);

	assert_eq!(outcome, TurnOutcome::Cancelled);
	assert_eq!(chat.answer_count(), 1);
	assert_eq!(conversation.len(), 1);
}

#[tokio::test]
async fn streamed_answer_arrives_in_pieces() {
	let mut cfg = super::test_config();

	cfg.chat.stream = true;

	let chat = Arc::new(contract_chat("The contract sets a termination notice period of three months."));
	let service =
		super::service(cfg, chat, Arc::new(TableEmbedding::default()), Arc::new(contract_store()));
	let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
	let outcome = service
		.handle_user_turn(
			&mut Conversation::new("system"),
			CONTRACT_QUESTION,
			&CancellationToken::new(),
			Some(&sender),
		)
		.await;
	let mut streamed = String::new();
	let mut pieces = 0;

	while let Ok(delta) = receiver.try_recv() {
		streamed.push_str(&delta);
		pieces += 1;
	}

	assert!(pieces > 1);
	assert_eq!(
		outcome,
		TurnOutcome::Responded(crag_service::AnswerCandidate {
			text: streamed,
			verdict: GroundingVerdict::Grounded,
			explanation: None,
		})
	);
}

#[tokio::test]
async fn clear_directive_resets_the_conversation() {
	let chat = Arc::new(contract_chat("The contract sets a termination notice period of three months."));
	let service = super::service(
		super::test_config(),
		chat,
		Arc::new(TableEmbedding::default()),
		Arc::new(contract_store()),
	);
	let cancel = CancellationToken::new();
	let mut conversation = Conversation::new("system");

	service.handle_user_turn(&mut conversation, CONTRACT_QUESTION, &cancel, None).await;

	assert_eq!(conversation.len(), 3);

	let outcome = service.handle_user_turn(&mut conversation, "/clear", &cancel, None).await;

	assert_eq!(outcome, TurnOutcome::Directive { report: "Conversation cleared.".to_string() });
	assert_eq!(conversation, Conversation::new("system"));
}

#[tokio::test]
async fn maintenance_directives_reach_the_collaborator() {
	let maintenance = Arc::new(SpyMaintenance::default());
	let taxonomy: Taxonomy = serde_json::from_str(
		r#"{"Legal": {"Contracts": ["When can I cancel my lease?", "Who signed the contract?"]}}"#,
	)
	.expect("Taxonomy must parse.");
	let store = Arc::new(MemoryStore {
		partitions: vec![fragment("lease", 0, CONTRACT_CHUNK)],
		..MemoryStore::default()
	});
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		Arc::new(TableEmbedding::default()),
		store,
	)
	.with_maintenance(maintenance.clone())
	.with_taxonomy(taxonomy);
	let cancel = CancellationToken::new();
	let mut conversation = Conversation::new("system");

	conversation.commit_exchange("hello", "hi");

	let outcome = service.handle_user_turn(&mut conversation, "/ri", &cancel, None).await;

	assert!(matches!(outcome, TurnOutcome::Directive { .. }));
	assert_eq!(maintenance.cleared.load(Ordering::SeqCst), 1);
	assert_eq!(conversation.len(), 1);

	let outcome = service.handle_user_turn(&mut conversation, "/gi", &cancel, None).await;

	assert_eq!(
		outcome,
		TurnOutcome::Directive { report: "Intent index rebuilt with 2 example questions.".to_string() }
	);

	let outcome = service.handle_user_turn(&mut conversation, "/status lease", &cancel, None).await;

	assert_eq!(outcome, TurnOutcome::Directive { report: "Document lease is ready.".to_string() });

	let outcome = service.handle_user_turn(&mut conversation, "/im", &cancel, None).await;

	assert!(matches!(outcome, TurnOutcome::Failed { .. }));
}

#[tokio::test]
async fn directives_without_collaborators_fail_softly() {
	let service = super::service(
		super::test_config(),
		Arc::new(ScriptedChat::default()),
		Arc::new(TableEmbedding::default()),
		Arc::new(MemoryStore::default()),
	);
	let cancel = CancellationToken::new();
	let mut conversation = Conversation::new("system");

	assert!(matches!(
		service.handle_user_turn(&mut conversation, "/removeindex", &cancel, None).await,
		TurnOutcome::Failed { .. }
	));
	assert!(matches!(
		service.handle_user_turn(&mut conversation, "/generateintents", &cancel, None).await,
		TurnOutcome::Failed { .. }
	));
	assert_eq!(
		service.handle_user_turn(&mut conversation, "/frobnicate", &cancel, None).await,
		TurnOutcome::Directive { report: directive::UNKNOWN.to_string() }
	);
	assert_eq!(service.handle_user_turn(&mut conversation, "/q", &cancel, None).await, TurnOutcome::Exit);
}
