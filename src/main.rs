use std::process::ExitCode;

use tracing::error;
use uuid::Uuid;

use nodewatch::application::Application;
use nodewatch::config::AppConfig;
use nodewatch::{logging, server};

const USAGE: &str = "usage: nodewatch serve [--in-memory] | nodewatch sync <node-uuid>";

enum Command {
    Serve { in_memory: bool },
    Sync { node_id: Uuid },
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    match args.first().map(String::as_str) {
        Some("serve") => {
            let mut in_memory = false;
            for flag in &args[1..] {
                match flag.as_str() {
                    "--in-memory" => in_memory = true,
                    other => return Err(format!("unknown flag '{}'", other)),
                }
            }
            Ok(Command::Serve { in_memory })
        }
        Some("sync") => {
            let raw = args.get(1).ok_or("missing node id")?;
            let node_id = Uuid::parse_str(raw).map_err(|e| format!("bad node id '{}': {}", raw, e))?;
            Ok(Command::Sync { node_id })
        }
        Some(other) => Err(format!("unknown command '{}'", other)),
        None => Err("missing command".to_string()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(2);
        }
    };
    logging::init(config.server.log_format);

    let outcome = match command {
        Command::Serve { in_memory } => serve(config, in_memory).await,
        Command::Sync { node_id } => sync(config, node_id).await,
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "nodewatch failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: AppConfig, in_memory: bool) -> Result<(), Box<dyn std::error::Error>> {
    let app = if in_memory {
        Application::in_memory(config)
    } else {
        Application::connect(config).await?
    };
    app.seed_nodes().await?;
    let background = app.spawn_background();
    let listener = server::bind(app.config.server.listen_addr).await?;
    let served = server::serve(listener, app.liveness.clone()).await;
    background.abort();
    Ok(served?)
}

async fn sync(config: AppConfig, node_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
    let app = Application::connect(config).await?;
    let report = app.synchronizer.synchronize(node_id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands() {
        assert!(matches!(
            parse_args(&args(&["serve", "--in-memory"])),
            Ok(Command::Serve { in_memory: true })
        ));
        assert!(matches!(parse_args(&args(&["serve"])), Ok(Command::Serve { in_memory: false })));
        assert!(parse_args(&args(&["sync", "nope"])).is_err());
        assert!(parse_args(&args(&["sync"])).is_err());
        assert!(parse_args(&args(&[])).is_err());
    }
}
