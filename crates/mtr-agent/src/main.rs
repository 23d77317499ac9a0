use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use mtr_core::push::{
	AgentLogPayload, ClientEvent, RegisterPayload, ReportProfilesPayload, ServerEvent,
};
use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};
use tokio::{net::TcpStream, process::Command};
use tokio_tungstenite::{
	connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const RESTART_DELAY: Duration = Duration::from_secs(2);

type WsSink = futures_util::stream::SplitSink<
	WebSocketStream<MaybeTlsStream<TcpStream>>,
	Message,
>;

#[derive(Parser, Debug)]
#[command(name = "mtr-agent")]
#[command(about = "Terminal management agent: registers with the relay hub and restarts the trading terminal on command")]
struct Args {
	#[arg(long, default_value = "")]
	server: String,
	#[arg(long, default_value = "")]
	name: String,
	#[arg(long, default_value = "")]
	terminal_path: String,
	#[arg(long, default_value = "")]
	profiles_dir: String,
}

#[derive(Clone, Debug)]
struct Config {
	server_url: String,
	name: String,
	terminal_path: PathBuf,
	profiles_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();

	let config = load_config();
	info!(
		event = "agent_start",
		name = %config.name,
		server = %config.server_url,
		terminal = %config.terminal_path.display()
	);

	loop {
		if let Err(err) = run_session(&config).await {
			warn!(event = "session_error", error = %format!("{err:#}"));
		}
		info!(event = "reconnect_wait", delay_secs = RECONNECT_DELAY.as_secs());
		tokio::time::sleep(RECONNECT_DELAY).await;
	}
}

async fn run_session(config: &Config) -> Result<()> {
	let url = Url::parse(&config.server_url).context("invalid server url")?;
	let (ws, _) = connect_async(url).await.context("connect to hub")?;
	info!(event = "connected", server = %config.server_url);
	let (mut sink, mut stream) = ws.split();

	send_event(
		&mut sink,
		&ClientEvent::Register(RegisterPayload {
			name: config.name.clone(),
		}),
	)
	.await?;

	let profiles = available_profiles(&config.terminal_path, config.profiles_dir.as_deref());
	info!(event = "profiles_found", count = profiles.len());
	send_event(
		&mut sink,
		&ClientEvent::ReportProfiles(ReportProfilesPayload {
			agent: config.name.clone(),
			profiles,
		}),
	)
	.await?;

	while let Some(result) = stream.next().await {
		let msg = result.context("read from hub")?;
		let text = match msg {
			Message::Text(text) => text,
			Message::Close(_) => break,
			_ => continue,
		};
		let event: ServerEvent = match serde_json::from_str(&text) {
			Ok(value) => value,
			Err(err) => {
				debug!(event = "unknown_event", error = %err);
				continue;
			}
		};
		// Start commands are targeted, but every broadcast reaches us
		// too; only act on a start_profile addressed to this agent.
		if let ServerEvent::StartProfile(payload) = event {
			if payload.agent != config.name {
				continue;
			}
			info!(event = "start_profile", profile = %payload.profile);
			let outcome = match start_terminal_with_profile(config, &payload.profile).await {
				Ok(()) => format!("Successfully switched to profile: {}", payload.profile),
				Err(err) => format!("Error starting terminal: {err:#}"),
			};
			send_event(
				&mut sink,
				&ClientEvent::AgentLog(AgentLogPayload {
					agent: config.name.clone(),
					data: outcome,
				}),
			)
			.await?;
		}
	}

	Ok(())
}

async fn send_event(sink: &mut WsSink, event: &ClientEvent) -> Result<()> {
	let text = serde_json::to_string(event).context("serialize event")?;
	sink.send(Message::Text(text)).await.context("send to hub")?;
	Ok(())
}

// Kill any running terminal, wait for it to let go of its data files,
// then relaunch with the /profile switch.
async fn start_terminal_with_profile(config: &Config, profile: &str) -> Result<()> {
	kill_terminal(&config.terminal_path).await;
	tokio::time::sleep(RESTART_DELAY).await;
	Command::new(&config.terminal_path)
		.arg(format!("/profile:{profile}"))
		.spawn()
		.with_context(|| {
			format!("spawn terminal at {}", config.terminal_path.display())
		})?;
	Ok(())
}

#[cfg(windows)]
async fn kill_terminal(terminal_path: &Path) {
	let image = terminal_path
		.file_name()
		.map(|name| name.to_string_lossy().to_string())
		.unwrap_or_else(|| "terminal.exe".to_string());
	// A nonzero exit just means no instance was running.
	let result = Command::new("taskkill")
		.args(["/F", "/IM", &image])
		.output()
		.await;
	if let Err(err) = result {
		warn!(event = "kill_error", error = %err);
	}
}

#[cfg(not(windows))]
async fn kill_terminal(terminal_path: &Path) {
	let result = Command::new("pkill")
		.arg("-f")
		.arg(terminal_path.as_os_str())
		.output()
		.await;
	if let Err(err) = result {
		warn!(event = "kill_error", error = %err);
	}
}

// The `default` and `tester` system profiles never show up in the
// terminal's own profile menu, so they are excluded here too.
fn available_profiles(terminal_path: &Path, profiles_dir: Option<&Path>) -> Vec<String> {
	let dir = match profiles_dir {
		Some(dir) => dir.to_path_buf(),
		None => match terminal_path.parent().and_then(Path::parent) {
			Some(install_root) => install_root.join("profiles"),
			None => return Vec::new(),
		},
	};
	let entries = match fs::read_dir(&dir) {
		Ok(entries) => entries,
		Err(err) => {
			warn!(event = "profiles_dir_error", dir = %dir.display(), error = %err);
			return Vec::new();
		}
	};
	let mut profiles: Vec<String> = entries
		.filter_map(|entry| entry.ok())
		.filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
		.map(|entry| entry.file_name().to_string_lossy().to_string())
		.filter(|name| {
			let lowered = name.to_lowercase();
			lowered != "default" && lowered != "tester"
		})
		.collect();
	profiles.sort();
	profiles
}

fn load_config() -> Config {
	let args = Args::parse();
	let terminal_path = PathBuf::from(resolve_setting(
		&args.terminal_path,
		"MTR_TERMINAL_PATH",
		"C:\\Program Files (x86)\\MetaTrader 4\\terminal.exe",
	));
	let profiles_dir = {
		let value = resolve_setting(&args.profiles_dir, "MTR_PROFILES_DIR", "");
		if value.is_empty() {
			None
		} else {
			Some(PathBuf::from(value))
		}
	};
	Config {
		server_url: resolve_setting(&args.server, "MTR_SERVER_URL", "ws://127.0.0.1:5001/ws"),
		name: resolve_setting(
			&args.name,
			"MTR_AGENT_NAME",
			&format!("agent-{}", std::process::id()),
		),
		terminal_path,
		profiles_dir,
	}
}

fn resolve_setting(flag: &str, env_key: &str, default: &str) -> String {
	if !flag.trim().is_empty() {
		return flag.to_string();
	}
	if let Ok(value) = std::env::var(env_key) {
		if !value.trim().is_empty() {
			return value;
		}
	}
	default.to_string()
}
