use std::{error::Error, io, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use log::warn;
use remote_naming::{
    CacheRegistry, ClientConfig,
    cli::{Command, CommandError, execute, prompt},
    client::{Properties, config::PROVIDER_URL},
    transport::PasswordAuthenticator,
};

#[derive(Debug, Parser)]
#[command(version, about = "Interactive shell over a remote directory")]
struct Cli {
    /// Comma separated server list, e.g. `remote://localhost:7999,localhost:8999`
    #[arg(long, required_unless_present = "properties")]
    url: Option<String>,
    /// Properties file with `remote.naming.*` settings
    #[arg(long)]
    properties: Option<PathBuf>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long, requires = "user")]
    password: Option<String>,
    /// Request timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Start with a randomly chosen server
    #[arg(long)]
    random: bool,
}

fn config(cli: &Cli) -> Result<ClientConfig, Box<dyn Error>> {
    let mut config = match (&cli.properties, &cli.url) {
        (Some(path), url) => {
            let mut properties = Properties::load(path)?;
            if let Some(url) = url {
                properties.set(PROVIDER_URL, url.as_str());
            }
            ClientConfig::from_properties(&properties)?
        }
        (None, Some(url)) => ClientConfig::new(url)?,
        (None, None) => return Err("either --url or --properties is required".into()),
    };
    if let Some(user) = &cli.user {
        config = config.with_authenticator(Arc::new(PasswordAuthenticator::new(
            user.as_str(),
            cli.password.as_deref().unwrap_or_default(),
        )));
    }
    if let Some(millis) = cli.timeout {
        config = config.with_request_timeout(Duration::from_millis(millis));
    }
    if cli.random {
        config = config.with_random_server(true);
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = config(&cli)?;

    let registry = CacheRegistry::new();
    if let Err(e) = registry.install_signal_handler() {
        warn!("{e}");
    }
    let context = registry.context(&config)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        let command = match prompt(stdin.lock(), &mut stdout) {
            Ok(command) => command,
            Err(e @ CommandError::Io(_)) => {
                eprintln!("{e}");
                break;
            }
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        if command == Command::Exit {
            break;
        }
        match execute(&context, command) {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => {}
            Err(e) => eprintln!("error: {e}"),
        }
    }

    if let Err(e) = context.close() {
        eprintln!("failed to close context: {e}");
    }
    registry.shutdown();
    Ok(())
}
