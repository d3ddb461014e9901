use tokio::{
	io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
	sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crag_domain::conversation::Conversation;
use crag_service::{RagService, TurnOutcome};

const STREAMED_SEPARATOR: &str = "----";
const STREAMED_LABEL: &str = "About the answer above:";

/// Reads one turn per line until EOF or an exit directive.
///
/// Ctrl-C cancels the turn in flight; the session continues with the next line.
pub async fn run<R, W>(service: &RagService, input: R, mut output: W) -> color_eyre::Result<()>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut conversation = Conversation::new(service.cfg.chat.system_prompt.clone());
	let mut lines = input.lines();

	if let Some(greeting) = &service.cfg.chat.greeting {
		output.write_all(format!("{greeting}\n").as_bytes()).await?;
	}

	loop {
		output.write_all(b"> ").await?;
		output.flush().await?;

		let Some(line) = lines.next_line().await? else {
			break;
		};

		if line.trim().is_empty() {
			continue;
		}

		let cancel = CancellationToken::new();
		let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
		let mut streamed = String::new();
		let turn = service.handle_user_turn(&mut conversation, &line, &cancel, Some(&sender));

		tokio::pin!(turn);

		let outcome = loop {
			tokio::select! {
				outcome = &mut turn => break outcome,
				Some(delta) = receiver.recv() => {
					output.write_all(delta.as_bytes()).await?;
					output.flush().await?;
					streamed.push_str(&delta);
				},
				_ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
					tracing::info!("Interrupt received. Cancelling the current turn.");

					cancel.cancel();
				},
			}
		};

		while let Ok(delta) = receiver.try_recv() {
			output.write_all(delta.as_bytes()).await?;
			streamed.push_str(&delta);
		}

		if !streamed.is_empty() {
			output.write_all(b"\n").await?;
		}

		let exit = outcome == TurnOutcome::Exit;

		output.write_all(render(&outcome, &streamed).as_bytes()).await?;
		output.flush().await?;

		if exit {
			break;
		}
	}

	Ok(())
}

/// Text printed after a turn.
///
/// Streamed answer text is not repeated. Its banner follows under a separator that points back at
/// the streamed text.
pub fn render(outcome: &TurnOutcome, streamed: &str) -> String {
	match outcome {
		TurnOutcome::Responded(candidate) => {
			if streamed.is_empty() {
				return format!("{}\n", candidate.text);
			}

			match candidate.text.strip_suffix(streamed).map(str::trim_end) {
				Some(prefix) if !prefix.is_empty() => {
					format!("{STREAMED_SEPARATOR}\n{STREAMED_LABEL}\n{prefix}\n")
				},
				_ => String::new(),
			}
		},
		TurnOutcome::Failed { message } => format!("{message}\n"),
		TurnOutcome::Directive { report } => format!("{report}\n"),
		TurnOutcome::Cancelled => "Cancelled.\n".to_string(),
		TurnOutcome::Exit => "Goodbye.\n".to_string(),
	}
}
