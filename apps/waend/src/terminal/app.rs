use std::sync::Arc;

use serde_json::Value;
use signal_bus::{Bus, BusError, next};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::bind::{Binder, Store};
use crate::commands;
use crate::config::ClientConfig;
use crate::semaphore::{self, Notice, Semaphore};
use crate::shell::Shell;
use crate::stream::Entry;
use crate::sync::SyncChannel;
use crate::terminal::cli::Cli;
use crate::terminal::error::CliError;
use crate::transport::{HttpClient, ReqwestTransport};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = client_config(&cli)?;

    let bus = semaphore::shared();
    let sync = SyncChannel::new(Arc::clone(&bus));
    let pushes = sync.pushes();
    if let Some(url) = config.notify_url() {
        sync.configure(url.as_str())?;
    }
    let http = HttpClient::new(Arc::new(ReqwestTransport::new(&config)?));
    let binder = Arc::new(Binder::new(
        http,
        config.api_base(),
        Arc::new(Store::new()),
        sync,
        Arc::clone(&bus),
    ));
    binder.spawn_sync_listener(pushes);
    spawn_notice_log(&bus);

    let shell = Shell::new(binder);
    commands::install(&shell);
    shell.spawn_switch_listener();

    match shell.binder().get_me().await {
        Ok(user) => shell.login_user(user),
        Err(err) => info!(target: "waend::terminal", error = %err, "not logged in"),
    }
    let start = start_path(cli.path.as_deref(), shell.user().is_some());
    if let Err(err) = shell.switch_context(&start).await {
        eprintln!("{err}");
    }

    if !cli.commands.is_empty() {
        for line in &cli.commands {
            let _ = shell.exec(line).await;
            flush(&shell).await?;
        }
        return Ok(());
    }
    repl(&shell).await
}

/// Environment first, then whatever the command line sets on top.
fn client_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = cli.api_url.as_deref() {
        config = config.with_api_url(api_url)?;
    }
    if cli.token.is_some() {
        config = config.with_bearer_token(cli.token.clone());
    }
    if let Some(notify) = cli.notify_url.as_deref() {
        config = config.with_notify_url(notify)?;
    }
    Ok(config)
}

async fn repl(shell: &Arc<Shell>) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let prompt = format!("waend:/{}> ", shell.current_path().join("/"));
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            line => {
                let _ = shell.exec(line).await;
            }
        }
        flush(shell).await?;
    }
    Ok(())
}

/// Prints whatever the shell buffered on stdout and stderr.
async fn flush(shell: &Shell) -> Result<(), CliError> {
    let mut stdout = tokio::io::stdout();
    for entry in shell.stdout().dump() {
        stdout.write_all(render_entry(&entry).as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;

    let mut stderr = tokio::io::stderr();
    for entry in shell.stderr().dump() {
        stderr.write_all(render_entry(&entry).as_bytes()).await?;
        stderr.write_all(b"\n").await?;
    }
    stderr.flush().await?;
    Ok(())
}

fn render_entry(entry: &Entry) -> String {
    entry
        .iter()
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `--path` split on `/`; without one the logged-in user's context.
fn start_path(path: Option<&str>, logged_in: bool) -> Vec<String> {
    match path {
        Some(path) => path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect(),
        None if logged_in => vec!["me".to_string()],
        None => Vec::new(),
    }
}

fn spawn_notice_log(bus: &Arc<Semaphore>) {
    let topics = [
        semaphore::START_LOADER,
        semaphore::STOP_LOADER,
        semaphore::REGION_PUSH,
        semaphore::USER_LOGIN,
        semaphore::USER_LOGOUT,
        semaphore::SWITCH_REQUEST,
    ];
    for topic in topics {
        let mut rx = bus.subscribe(topic);
        tokio::spawn(async move {
            loop {
                match next(&mut rx).await {
                    Ok(message) => log_notice(&message.payload),
                    Err(BusError::Lagged(skipped)) => {
                        warn!(target: "waend::terminal", topic, skipped, "notice log lagged");
                    }
                    Err(BusError::Closed) => break,
                }
            }
        });
    }
}

fn log_notice(notice: &Notice) {
    match notice {
        Notice::StartLoader(message) => {
            debug!(target: "waend::terminal", message = %message, "loading")
        }
        Notice::StopLoader => debug!(target: "waend::terminal", "loaded"),
        Notice::RegionPush(extent) => {
            info!(target: "waend::terminal", extent = ?extent.to_array(), "region")
        }
        Notice::UserLogin(id) => info!(target: "waend::terminal", user = %id, "user login"),
        other => debug!(target: "waend::terminal", topic = other.topic(), "notice"),
    }
}
