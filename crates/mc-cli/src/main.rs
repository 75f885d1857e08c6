mod config;
mod terminal;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use machines_api::{MachinesClient, Reply};
use mc_client::{MachineController, Phase, PollOutcome, SessionContext, SubmissionAdapter};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::terminal::TerminalSink;

#[derive(Parser)]
#[command(name = "machinectl")]
#[command(about = "Start, watch and terminate on-demand challenge machines")]
struct Cli {
    /// Challenge whose machine to act on
    #[arg(long, global = true, env = "MACHINES_CHALLENGE_ID")]
    challenge_id: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Resync with the backend and follow the machine until Ctrl-C
    Watch,
    /// Deploy a machine and wait until it runs
    Start,
    /// Check the machine once, polling while it provisions
    Status,
    /// Terminate the running machine
    Terminate,
    /// Submit a flag attempt
    Submit {
        submission: String,
        /// Check the flag without recording the attempt
        #[arg(long)]
        preview: bool,
    },
    /// Check the machines service is reachable
    Ping,
    /// Terminate machines by id (admin)
    BulkTerminate {
        #[arg(required = true)]
        machine_ids: Vec<i64>,
    },
}

impl Cli {
    fn challenge_id(&self) -> anyhow::Result<i64> {
        self.challenge_id
            .context("--challenge-id (or MACHINES_CHALLENGE_ID) is required for this command")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let mut client = MachinesClient::new(config.api_root.clone(), config.csrf_token.clone());
    if let Some(cookie) = &config.session_cookie {
        client = client.with_session_cookie(cookie.clone());
    }
    let client = Arc::new(client);
    tracing::debug!(api_root = %client.api_root(), "machines client ready");

    match &cli.command {
        Command::Ping => {
            if !client.ping().await? {
                bail!("machines service did not answer pong");
            }
            println!("pong");
        }
        Command::BulkTerminate { machine_ids } => {
            let reply = client.terminate_machines(machine_ids).await?;
            if !reply.is_success() {
                bail!(
                    "bulk terminate failed ({}): {}",
                    reply.status,
                    reply.error_message().unwrap_or_default()
                );
            }
            println!("terminated {} machine(s)", machine_ids.len());
        }
        Command::Submit { submission, preview } => {
            let adapter = SubmissionAdapter::new(client.clone());
            let reply = adapter.submit(cli.challenge_id()?, submission, *preview).await?;
            print_attempt(&reply);
        }
        Command::Watch => {
            let controller = controller(&cli, &config, client)?;
            watch(&controller).await?;
        }
        Command::Start => {
            let controller = controller(&cli, &config, client)?;
            start(&controller).await?;
        }
        Command::Status => {
            let controller = controller(&cli, &config, client)?;
            match controller.check_status(false).await {
                PollOutcome::Running { expires_at } => println!("running until {expires_at}"),
                PollOutcome::NoMachine => println!("no active machine"),
                PollOutcome::Failed => bail!("status check failed"),
                PollOutcome::Superseded => {}
            }
        }
        Command::Terminate => {
            let controller = controller(&cli, &config, client)?;
            match controller.check_status(true).await {
                PollOutcome::Running { .. } => controller.terminate().await?,
                PollOutcome::NoMachine => println!("no active machine"),
                PollOutcome::Failed | PollOutcome::Superseded => {
                    bail!("could not determine machine status")
                }
            }
        }
    }

    Ok(())
}

fn controller(
    cli: &Cli,
    config: &AppConfig,
    client: Arc<MachinesClient>,
) -> anyhow::Result<MachineController> {
    Ok(MachineController::new(
        cli.challenge_id()?,
        client,
        Arc::new(TerminalSink::stdout()),
        SessionContext::new(),
        config.controller_settings(),
    ))
}

/// Follow the machine until it goes away after having run, or Ctrl-C.
async fn watch(controller: &MachineController) -> anyhow::Result<()> {
    let mut phases = controller.subscribe();
    let init = controller.initialize();
    if init.await? == PollOutcome::Failed {
        tracing::warn!("initial status check failed; waiting for changes");
    }

    let mut seen_running = controller.phase() == Phase::Running;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            changed = phases.changed() => {
                if changed.is_err() {
                    break;
                }
                let phase = *phases.borrow_and_update();
                match phase {
                    Phase::Running => seen_running = true,
                    Phase::Idle if seen_running => break,
                    _ => {}
                }
            }
        }
    }
    println!();
    Ok(())
}

async fn start(controller: &MachineController) -> anyhow::Result<()> {
    let mut phases = controller.subscribe();
    controller.start().await?;

    let phase = *phases
        .wait_for(|p| !matches!(p, Phase::Starting | Phase::Polling))
        .await?;
    println!();
    if phase != Phase::Running {
        bail!("machine did not reach running state");
    }
    Ok(())
}

fn print_attempt(reply: &Reply) {
    let data = reply.body.data.as_ref();
    let field = |name: &str| {
        data.and_then(|d| d.get(name))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string()
    };
    println!("{} {} {}", reply.status.as_u16(), field("status"), field("message"));
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use clap::error::ErrorKind;

    use super::{Cli, Command};

    #[test]
    fn cli_requires_subcommand() {
        let err = match Cli::try_parse_from(["machinectl"]) {
            Ok(_) => panic!("expected missing subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn submit_takes_preview_flag() {
        let cli = Cli::try_parse_from([
            "machinectl",
            "submit",
            "flag{x}",
            "--preview",
            "--challenge-id",
            "7",
        ])
        .unwrap();
        assert_eq!(cli.challenge_id, Some(7));
        match cli.command {
            Command::Submit { submission, preview } => {
                assert_eq!(submission, "flag{x}");
                assert!(preview);
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn bulk_terminate_needs_ids() {
        let err = match Cli::try_parse_from(["machinectl", "bulk-terminate"]) {
            Ok(_) => panic!("expected missing ids"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from(["machinectl", "bulk-terminate", "3", "4"]).unwrap();
        assert!(matches!(cli.command, Command::BulkTerminate { machine_ids } if machine_ids == vec![3, 4]));
    }

    #[test]
    fn missing_challenge_id_is_an_error() {
        let cli = Cli::try_parse_from(["machinectl", "ping"]).unwrap();
        if std::env::var_os("MACHINES_CHALLENGE_ID").is_none() {
            assert!(cli.challenge_id().is_err());
        }
    }
}
