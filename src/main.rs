use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use promptwatch::cli::{Cli, Command};
use promptwatch::config::{self, ProjectConfig, Settings, WrapOverrides};
use promptwatch::notify::{self, AlertContext, Notifier};
use promptwatch::remote::tunnel::Tunnel;
use promptwatch::remote::{CommandQueue, RelayServer};
use promptwatch::supervisor::{self, IoMode, Passthrough, SessionConfig};
use promptwatch::{paths, serve, setup, sound_check, term};

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            term::notice_warn(&format!("error: {e:#}"));
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let quiet = matches!(&cli.command, Command::Wrap { .. } | Command::Config { .. });

    let filter = match cli.verbose {
        0 if quiet => "promptwatch=warn",
        0 => "promptwatch=info",
        1 => "promptwatch=debug",
        _ => "promptwatch=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;
    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .promptwatch/config.toml found, using defaults"),
    }
    let env = |var: &str| std::env::var(var).ok();

    match cli.command {
        Command::Wrap {
            preset,
            mode,
            program,
            channels,
            test,
            args,
        } => {
            let overrides = WrapOverrides {
                preset,
                mode,
                program,
                channels: (!channels.is_empty()).then_some(channels),
            };
            let settings = Settings::resolve(&config, config_path, &overrides, env);
            wrap(&settings, args, test)
        }
        Command::Setup => {
            let settings = Settings::resolve(&config, config_path, &WrapOverrides::default(), env);
            print!("{}", setup::render(&settings.credentials));
            Ok(0)
        }
        Command::Serve { dir, bind, port } => {
            let defaults = config.serve;
            let opts = serve::ServeOptions {
                dir: dir.unwrap_or(defaults.dir),
                bind: bind.unwrap_or(defaults.bind),
                port: port.unwrap_or(defaults.port),
            };
            serve::run(&opts)?;
            Ok(0)
        }
        Command::SoundCheck { loud } => {
            let mut stdout = io::stdout();
            sound_check::run(loud, Duration::from_secs(1), &mut stdout)?;
            Ok(0)
        }
        Command::Config { json } => {
            let settings = Settings::resolve(&config, config_path, &WrapOverrides::default(), env);
            if json {
                println!("{}", config::render_json(&settings)?);
            } else {
                print!("{}", config::render_human(&settings));
            }
            Ok(0)
        }
    }
}

fn wrap(settings: &Settings, args: Vec<String>, test: bool) -> Result<i32> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let built = notify::build_channels(
        &settings.channels,
        &settings.credentials,
        &settings.channel_options(&session_id),
    );
    for (kind, reason) in &built.disabled {
        term::notice_warn(&format!("{} disabled: {reason}", kind.label()));
    }
    if let Some(key) = &built.generated_key {
        term::notice_warn("generated a payload encryption key; keep it to decrypt relayed alerts:");
        term::notice_warn(&format!("export CLAUDE_ENCRYPTION_KEY='{key}'"));
    }
    let notifier = Arc::new(Notifier::new(built.channels, settings.strategy));
    if notifier.is_empty() {
        term::notice_warn("no notification channel is available; run `promptwatch setup`");
    }

    if settings.remote.is_some() && settings.mode == IoMode::Pipe {
        term::notice_warn("remote commands are only typed into the session in pty mode");
    }
    let commands = settings.remote.as_ref().map(|_| CommandQueue::default());
    let (relay, tunnel) = match (&settings.remote, &commands) {
        (Some(remote), Some(queue)) => {
            let relay = RelayServer::start(&remote.bind, remote.port, queue.clone())?;
            term::notice(&format!("command relay listening on {}", relay.local_addr()));
            let tunnel = if remote.tunnel {
                match Tunnel::start(relay.local_addr().port(), remote.tunnel_wait) {
                    Ok(tunnel) => {
                        term::notice(&format!("public command URL: {}/command", tunnel.public_url()));
                        Some(tunnel)
                    }
                    Err(e) => {
                        warn!(error = %e, "tunnel unavailable");
                        term::notice_warn(&format!("no tunnel, replies only work locally: {e:#}"));
                        None
                    }
                }
            } else {
                None
            };
            (Some(relay), tunnel)
        }
        _ => (None, None),
    };
    let reply_url = match (&tunnel, &relay) {
        (Some(tunnel), _) => Some(tunnel.public_url().to_string()),
        (None, Some(relay)) => Some(format!("http://{}", relay.local_addr())),
        _ => None,
    };

    if test {
        term::notice(&format!(
            "sending a test notification through: {}",
            notifier.channel_names().join(", ")
        ));
        let ctx = AlertContext::sample(&session_id, reply_url);
        let report = notifier.dispatch(&settings.alert, &ctx);
        return Ok(if report.delivered() { 0 } else { 1 });
    }

    let program = paths::resolve_program(&settings.program)?;
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed)).ok();
    }

    term::notice(&format!(
        "watching {} (preset {}, {} mode, session {})",
        program.display(),
        settings.preset.label(),
        settings.mode.label(),
        &session_id[..8]
    ));

    let session = SessionConfig {
        program,
        args,
        mode: settings.mode,
        monitor: settings.monitor.clone(),
        notify_delay: settings.notify_delay,
        alert: settings.alert.clone(),
        session_id,
        reply_url,
        commands,
        forward_stdin: true,
        stop,
    };
    let result = supervisor::run_session(session, notifier, Passthrough::stdio());

    drop(tunnel);
    if let Some(relay) = relay {
        relay.shutdown();
    }
    Ok(result?.exit_code())
}
