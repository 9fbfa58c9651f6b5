use async_trait::async_trait;
use guild_account::SignaturePrompt;
use guild_types::SignRequest;
use std::io::{BufRead, Write};

/// Asks on the terminal before every fresh signature.
pub struct StdinPrompt;

fn is_approval(answer: &str) -> bool {
	matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl SignaturePrompt for StdinPrompt {
	async fn confirm(&self, request: &SignRequest) -> bool {
		let question = format!(
			"Sign request as {} ({}) at {}?\n{}\n[y/N] ",
			request.identity, request.backend, request.timestamp, request.payload
		);
		let answer = tokio::task::spawn_blocking(move || {
			let mut stderr = std::io::stderr();
			let _ = write!(stderr, "{}", question);
			let _ = stderr.flush();
			let mut line = String::new();
			std::io::stdin().lock().read_line(&mut line).map(|_| line)
		})
		.await;

		match answer {
			Ok(Ok(line)) => is_approval(&line),
			_ => false,
		}
	}
}
