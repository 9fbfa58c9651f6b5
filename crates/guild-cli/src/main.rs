//! Command-line client for the Guild platform API.
//!
//! Loads the configuration, builds a [`guild_fetcher::GuildClient`] with the
//! configured wallet, clock source and storage, and issues plain or signed
//! requests from the terminal.

use clap::{Parser, Subcommand};
use guild_account::{AutoApprove, SignaturePrompt};
use guild_config::Config;
use guild_fetcher::{FetchError, FetchOptions, GuildClient, ResponseBody, SignOptions};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

mod factory_registry;
mod prompt;

use factory_registry::build_client_from_config;
use prompt::StdinPrompt;

/// Command-line arguments for the Guild client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "guild.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Send an unsigned request
	Fetch {
		#[command(flatten)]
		request: RequestArgs,
	},
	/// Sign the body with the connected wallet and send it
	Signed {
		#[command(flatten)]
		request: RequestArgs,
		/// Always produce a fresh signature
		#[arg(long)]
		force_prompt: bool,
		/// Ask on the terminal before signing
		#[arg(long)]
		confirm: bool,
	},
	/// Print the current clock skew in milliseconds
	Skew,
	/// Recompute the clock skew from the time source
	Resync,
	/// Print the connected wallet identity
	Whoami,
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
	/// Resource path relative to the API base, or an absolute URL
	resource: String,

	/// HTTP method (defaults to POST with a body, GET without)
	#[arg(short = 'X', long)]
	method: Option<String>,

	/// JSON body
	#[arg(short = 'd', long)]
	body: Option<String>,

	/// Extra header as `Name: value`, repeatable
	#[arg(short = 'H', long = "header")]
	headers: Vec<String>,
}

impl RequestArgs {
	fn to_options(&self) -> Result<FetchOptions, Box<dyn Error>> {
		let mut options = FetchOptions::default();

		if let Some(method) = &self.method {
			options.method = Some(Method::from_bytes(method.to_ascii_uppercase().as_bytes())?);
		}
		if let Some(body) = &self.body {
			options.body = Some(serde_json::from_str(body)?);
		}

		let mut headers = HeaderMap::new();
		for header in &self.headers {
			let (name, value) = header
				.split_once(':')
				.ok_or_else(|| format!("Header '{}' must look like 'Name: value'", header))?;
			headers.insert(
				HeaderName::from_bytes(name.trim().as_bytes())?,
				HeaderValue::from_str(value.trim())?,
			);
		}
		options.headers = headers;

		Ok(options)
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	// stdout carries the response
	fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();

	let config = Config::from_file(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.api.base_url);

	let prompt: Arc<dyn SignaturePrompt> = match &args.command {
		Command::Signed { confirm: true, .. } => Arc::new(StdinPrompt),
		_ => Arc::new(AutoApprove),
	};
	let client = build_client_from_config(config, prompt).await?;

	if let Err(e) = run(&client, args.command).await {
		if let Some(FetchError::Api(api)) = e.downcast_ref::<FetchError>() {
			if let Some(id) = &api.correlation_id {
				eprintln!("Support reference: {}", id);
			}
		}
		return Err(e);
	}
	Ok(())
}

async fn run(client: &GuildClient, command: Command) -> Result<(), Box<dyn Error>> {
	match command {
		Command::Fetch { request } => {
			let body = client.fetch(&request.resource, request.to_options()?).await?;
			print_body(&body)?;
		},
		Command::Signed {
			request,
			force_prompt,
			..
		} => {
			let body = client
				.fetch_with_sign(
					&request.resource,
					request.to_options()?,
					SignOptions { force_prompt },
				)
				.await?;
			print_body(&body)?;
		},
		Command::Skew => {
			println!("{}", client.clock().current_skew().await);
		},
		Command::Resync => {
			let skew = client.clock().resync().await?;
			println!("{}", skew);
		},
		Command::Whoami => match client.identity().await {
			Some(identity) => println!("{}", identity),
			None => println!("No wallet connected"),
		},
	}
	Ok(())
}

fn print_body(body: &ResponseBody) -> Result<(), Box<dyn Error>> {
	match body {
		ResponseBody::Json(value) => println!("{}", serde_json::to_string_pretty(value)?),
		ResponseBody::Text(text) => println!("{}", text),
	}
	Ok(())
}
