use std::{collections::HashMap, error::Error, net::SocketAddr, sync::Arc};

use clap::Parser;
use log::info;
use remote_naming::{
    Name, NamingError,
    cli::parse_object,
    directory::{Directory, InMemoryDirectory},
    protocol::{NamingService, SERVICE_NAME},
    transport::{AllowAnonymous, AuthenticationHandler, PasswordRealm, Service, TransportServer},
};

#[derive(Debug, Parser)]
#[command(version, about = "Serves an in-memory directory over the naming protocol")]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Initial binding, as `name=value`; missing parent contexts are created
    #[arg(long = "bind", value_name = "NAME=VALUE")]
    bindings: Vec<String>,
    /// Accepted user, as `name:password`; anonymous access when none is given
    #[arg(long = "user", value_name = "NAME:PASSWORD")]
    users: Vec<String>,
    /// Threads running directory commands
    #[arg(long, default_value_t = 8)]
    workers: usize,
}

fn populate(directory: &InMemoryDirectory, bindings: &[String]) -> Result<(), Box<dyn Error>> {
    for binding in bindings {
        let (name, value) = binding
            .split_once('=')
            .ok_or_else(|| format!("invalid binding '{binding}', expected name=value"))?;
        let name = Name::from(name);
        let Some((parent, _)) = name.split_last() else {
            return Err(format!("invalid binding '{binding}', empty name").into());
        };
        let mut context = Name::root();
        for component in parent.components() {
            context = context.child(component);
            match directory.create_subcontext(&context) {
                Ok(_) | Err(NamingError::NameAlreadyBound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        directory.rebind(&name, parse_object(value))?;
        info!("bound '{name}'");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let directory = InMemoryDirectory::new();
    populate(&directory, &cli.bindings)?;

    let handler: Arc<dyn AuthenticationHandler> = if cli.users.is_empty() {
        Arc::new(AllowAnonymous)
    } else {
        let mut realm = PasswordRealm::new();
        for user in &cli.users {
            let (name, password) = user
                .split_once(':')
                .ok_or_else(|| format!("invalid user '{user}', expected name:password"))?;
            realm = realm.with_user(name, password);
        }
        Arc::new(realm)
    };

    let service: Arc<dyn Service> = Arc::new(NamingService::new(Arc::new(directory), cli.workers));
    let services = HashMap::from([(SERVICE_NAME.to_string(), service)]);
    let server = Arc::new(TransportServer::bind(cli.address, handler, services)?);

    let stopper = Arc::clone(&server);
    ctrlc::set_handler(move || {
        info!("shutting down");
        stopper.close();
    })?;

    server.wait();
    Ok(())
}
