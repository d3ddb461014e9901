use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::{
	AnswerCandidate, Error, IntentTagSet, RagService, Result, RetrievalOutcome, RetrievedFragment,
	RoutingDecision, StandaloneQuestion,
	directive::{self, Directive},
	grounding,
};
use crag_domain::conversation::Conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
	Idle,
	Rewriting,
	Routing,
	RoutedNoRag,
	RoutedRag,
	Classifying,
	Retrieving,
	Reranking,
	Answering,
	GroundingCheck,
	Responded,
	Exit,
}

/// Step results driving the turn state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
	InputReceived { input: String },
	QuitRequested,
	Rewritten { questions: Vec<StandaloneQuestion> },
	RetrievalSkipped { decision: RoutingDecision },
	RetrievalRequested { decision: RoutingDecision },
	AnswerRequested,
	ClassificationRequested,
	Classified { tags: IntentTagSet },
	Retrieved { outcome: RetrievalOutcome },
	Reranked { fragments: Vec<RetrievedFragment> },
	Answered { text: String },
	AnswerFailed { message: String },
	Checked { candidate: AnswerCandidate },
	ResponseEmitted,
}
impl TurnEvent {
	pub fn name(&self) -> &'static str {
		match self {
			Self::InputReceived { .. } => "InputReceived",
			Self::QuitRequested => "QuitRequested",
			Self::Rewritten { .. } => "Rewritten",
			Self::RetrievalSkipped { .. } => "RetrievalSkipped",
			Self::RetrievalRequested { .. } => "RetrievalRequested",
			Self::AnswerRequested => "AnswerRequested",
			Self::ClassificationRequested => "ClassificationRequested",
			Self::Classified { .. } => "Classified",
			Self::Retrieved { .. } => "Retrieved",
			Self::Reranked { .. } => "Reranked",
			Self::Answered { .. } => "Answered",
			Self::AnswerFailed { .. } => "AnswerFailed",
			Self::Checked { .. } => "Checked",
			Self::ResponseEmitted => "ResponseEmitted",
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
	Responded(AnswerCandidate),
	Failed { message: String },
	Directive { report: String },
	Cancelled,
	Exit,
}

/// The turn transition table. Any pair not listed is an error.
pub fn transition(state: TurnState, event: &TurnEvent) -> Result<TurnState> {
	use TurnEvent as E;
	use TurnState as S;

	let next = match (state, event) {
		(S::Idle, E::InputReceived { .. }) => S::Rewriting,
		(S::Idle, E::QuitRequested) => S::Exit,
		(S::Rewriting, E::Rewritten { .. }) => S::Routing,
		(S::Routing, E::RetrievalSkipped { .. }) => S::RoutedNoRag,
		(S::Routing, E::RetrievalRequested { .. }) => S::RoutedRag,
		(S::RoutedNoRag, E::AnswerRequested) => S::Answering,
		(S::RoutedRag, E::ClassificationRequested) => S::Classifying,
		(S::Classifying, E::Classified { .. }) => S::Retrieving,
		(S::Retrieving, E::Retrieved { .. }) => S::Reranking,
		(S::Reranking, E::Reranked { .. }) => S::Answering,
		(S::Answering, E::Answered { .. }) => S::GroundingCheck,
		(S::Answering, E::AnswerFailed { .. }) => S::Responded,
		(S::GroundingCheck, E::Checked { .. }) => S::Responded,
		(S::Responded, E::ResponseEmitted) => S::Idle,
		(state, event) => return Err(Error::Transition { state, event: event.name() }),
	};

	Ok(next)
}

/// Data accumulated across one turn.
#[derive(Debug, Default)]
struct Turn {
	questions: Vec<StandaloneQuestion>,
	routing: Option<RoutingDecision>,
	tags: IntentTagSet,
	retrieval: Option<RetrievalOutcome>,
	answer: Option<String>,
	outcome: Option<TurnOutcome>,
}
impl Turn {
	fn absorb(&mut self, event: TurnEvent) {
		match event {
			TurnEvent::Rewritten { questions } => self.questions = questions,
			TurnEvent::RetrievalSkipped { decision } | TurnEvent::RetrievalRequested { decision } => {
				self.routing = Some(decision);
			},
			TurnEvent::Classified { tags } => self.tags = tags,
			TurnEvent::Retrieved { outcome } => self.retrieval = Some(outcome),
			TurnEvent::Reranked { fragments } => {
				if let Some(retrieval) = &mut self.retrieval {
					retrieval.fragments = fragments;
				}
			},
			TurnEvent::Answered { text } => self.answer = Some(text),
			TurnEvent::AnswerFailed { message } => {
				self.outcome = Some(TurnOutcome::Failed { message });
			},
			TurnEvent::Checked { candidate } => {
				self.outcome = Some(TurnOutcome::Responded(candidate));
			},
			TurnEvent::InputReceived { .. }
			| TurnEvent::QuitRequested
			| TurnEvent::AnswerRequested
			| TurnEvent::ClassificationRequested
			| TurnEvent::ResponseEmitted => {},
		}
	}

	fn top_question<'a>(&'a self, input: &'a str) -> &'a str {
		self.questions.first().map(|question| question.text.as_str()).unwrap_or(input)
	}
}

impl RagService {
	/// Runs one user turn to completion.
	///
	/// Directives are handled out of band. Only a `Responded` turn appends to `conversation`;
	/// failures and cancellations leave it untouched.
	pub async fn handle_user_turn(
		&self,
		conversation: &mut Conversation,
		input: &str,
		cancel: &CancellationToken,
		sink: Option<&UnboundedSender<String>>,
	) -> TurnOutcome {
		if let Some(directive) = directive::parse_directive(input) {
			return self.handle_directive(&directive, conversation, cancel).await;
		}
		if input.trim().is_empty() {
			return TurnOutcome::Failed { message: "Please enter a question.".to_string() };
		}

		match self.run_turn(conversation, input.trim(), cancel, sink).await {
			Ok(outcome) => outcome,
			Err(Error::Cancelled) => {
				tracing::info!("Turn cancelled.");

				TurnOutcome::Cancelled
			},
			Err(err) => {
				tracing::error!(error = %err, "Turn failed.");

				TurnOutcome::Failed { message: err.to_string() }
			},
		}
	}

	async fn handle_directive(
		&self,
		directive: &Directive,
		conversation: &mut Conversation,
		cancel: &CancellationToken,
	) -> TurnOutcome {
		if *directive == Directive::Exit {
			return match transition(TurnState::Idle, &TurnEvent::QuitRequested) {
				Ok(_) => TurnOutcome::Exit,
				Err(err) => TurnOutcome::Failed { message: err.to_string() },
			};
		}

		match self.run_directive(directive, conversation, cancel).await {
			Ok(report) => TurnOutcome::Directive { report },
			Err(Error::Cancelled) => TurnOutcome::Cancelled,
			Err(err) => {
				tracing::warn!(error = %err, ?directive, "Directive failed.");

				TurnOutcome::Failed { message: err.to_string() }
			},
		}
	}

	async fn run_turn(
		&self,
		conversation: &mut Conversation,
		input: &str,
		cancel: &CancellationToken,
		sink: Option<&UnboundedSender<String>>,
	) -> Result<TurnOutcome> {
		let mut turn = Turn::default();
		let mut state = TurnState::Idle;
		let mut event = TurnEvent::InputReceived { input: input.to_string() };

		loop {
			if cancel.is_cancelled() {
				return Err(Error::Cancelled);
			}

			let next = transition(state, &event)?;

			tracing::debug!(from = ?state, to = ?next, event = event.name(), "Turn transition.");

			state = next;

			turn.absorb(event);

			event = match state {
				TurnState::Rewriting => {
					TurnEvent::Rewritten { questions: self.rewrite(conversation, input, cancel).await? }
				},
				TurnState::Routing => {
					let decision =
						self.route(conversation, turn.top_question(input), input, cancel).await?;

					if decision.needs_retrieval {
						TurnEvent::RetrievalRequested { decision }
					} else {
						TurnEvent::RetrievalSkipped { decision }
					}
				},
				TurnState::RoutedNoRag => TurnEvent::AnswerRequested,
				TurnState::RoutedRag => TurnEvent::ClassificationRequested,
				TurnState::Classifying => {
					TurnEvent::Classified { tags: self.classify_all(&turn.questions, cancel).await? }
				},
				TurnState::Retrieving => TurnEvent::Retrieved {
					outcome: self.retrieve(turn.top_question(input), &turn.tags, cancel).await?,
				},
				TurnState::Reranking => {
					let fragments =
						turn.retrieval.as_ref().map(|retrieval| retrieval.fragments.clone()).unwrap_or_default();

					TurnEvent::Reranked {
						fragments: self.rerank(turn.top_question(input), fragments, cancel).await?,
					}
				},
				TurnState::Answering => {
					let answer = self
						.generate_answer(
							conversation,
							turn.top_question(input),
							turn.retrieval.as_ref(),
							sink,
							cancel,
						)
						.await;

					match answer {
						Ok(text) => TurnEvent::Answered { text },
						Err(Error::Cancelled) => return Err(Error::Cancelled),
						Err(err) => {
							tracing::error!(error = %err, "Answer generation failed.");

							TurnEvent::AnswerFailed {
								message: format!("Sorry, no answer could be generated: {err}"),
							}
						},
					}
				},
				TurnState::GroundingCheck => {
					let answer = turn.answer.clone().unwrap_or_default();
					let check =
						self.check_grounding(&answer, turn.retrieval.as_ref(), cancel).await?;

					TurnEvent::Checked {
						candidate: grounding::apply_banner(
							&answer,
							check,
							&self.cfg.grounding.warning_banner,
						),
					}
				},
				TurnState::Responded => {
					// History keeps the text the user saw, banner included.
					if let Some(TurnOutcome::Responded(candidate)) = &turn.outcome {
						conversation.commit_exchange(input, candidate.text.as_str());
					}

					TurnEvent::ResponseEmitted
				},
				TurnState::Idle => {
					return turn.outcome.ok_or_else(|| Error::InvalidRequest {
						message: "Turn finished without a response.".to_string(),
					});
				},
				TurnState::Exit => return Ok(TurnOutcome::Exit),
			};
		}
	}
}
