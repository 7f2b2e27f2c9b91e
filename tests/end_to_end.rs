use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use remote_naming::{
    CacheRegistry, ClientConfig, Entry, Error, NamingError, Object,
    cli::{self, Command},
    directory::{Directory, InMemoryDirectory},
    protocol::{NamingService, SERVICE_NAME, server_handshake},
    transport::{
        AllowAnonymous, AuthenticationHandler, Channel, PasswordAuthenticator, PasswordRealm,
        Service, TransportServer,
    },
};

const LOCALHOST: &str = "127.0.0.1:0";

fn serve(
    address: SocketAddr,
    handler: Arc<dyn AuthenticationHandler>,
    service: Arc<dyn Service>,
) -> TransportServer {
    let services = HashMap::from([(SERVICE_NAME.to_string(), service)]);
    TransportServer::bind(address, handler, services).unwrap()
}

fn naming_server(address: SocketAddr, directory: Arc<InMemoryDirectory>) -> TransportServer {
    serve(
        address,
        Arc::new(AllowAnonymous),
        Arc::new(NamingService::new(directory, 4)),
    )
}

/// Server whose directory binds `name` to its own label.
fn labelled_server(address: SocketAddr, label: &str) -> TransportServer {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.bind(&"name".into(), label.into()).unwrap();
    naming_server(address, directory)
}

fn url(servers: &[&TransportServer]) -> String {
    let list = servers
        .iter()
        .map(|s| s.local_addr().to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("remote://{list}")
}

fn config(servers: &[&TransportServer]) -> ClientConfig {
    ClientConfig::new(&url(servers))
        .unwrap()
        .with_request_timeout(Duration::from_secs(5))
}

fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Completes the handshake, then swallows every request.
struct Silent;

impl Service for Silent {
    fn serve(&self, channel: Channel) {
        if server_handshake(&channel).is_err() {
            return;
        }
        while channel.receive().is_ok() {}
    }
}

#[test]
fn lookup_of_a_remotely_bound_value() {
    let directory = Arc::new(InMemoryDirectory::new());
    let server = naming_server(LOCALHOST.parse().unwrap(), Arc::clone(&directory));
    let registry = CacheRegistry::new();
    let context = registry.context(&config(&[&server])).unwrap();

    context.bind("test", "TestValue").unwrap();

    assert_eq!(
        context.lookup_object("test").unwrap(),
        Object::Text("TestValue".into())
    );
    assert_eq!(
        directory.lookup(&"test".into()).unwrap(),
        Entry::Object("TestValue".into())
    );

    context.close().unwrap();
    registry.shutdown();
}

#[test]
fn domain_errors_pass_through_unchanged() {
    let server = naming_server(LOCALHOST.parse().unwrap(), Arc::default());
    let registry = CacheRegistry::new();
    let context = registry.context(&config(&[&server])).unwrap();

    let err = context.lookup("missing").unwrap_err();
    assert!(
        matches!(err, Error::Naming(NamingError::NameNotFound { ref name }) if name == "missing"),
        "{err:?}"
    );

    context.bind("taken", 1i64).unwrap();
    assert!(matches!(
        context.bind("taken", 2i64),
        Err(Error::Naming(NamingError::NameAlreadyBound { .. }))
    ));

    // the store keeps working after a domain failure
    assert_eq!(context.lookup_object("taken").unwrap(), Object::Integer(1));
    context.close().unwrap();
}

#[test]
fn unanswered_request_times_out() {
    let server = serve(
        LOCALHOST.parse().unwrap(),
        Arc::new(AllowAnonymous),
        Arc::new(Silent),
    );
    let timeout = Duration::from_millis(300);
    let registry = CacheRegistry::new();
    let context = registry
        .context(&config(&[&server]).with_request_timeout(timeout))
        .unwrap();

    let started = Instant::now();
    let err = context.lookup("anything").unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Timeout(t) if t == timeout), "{err:?}");
    assert!(elapsed >= timeout, "gave up after {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_secs(2), "took {elapsed:?}");
    context.close().unwrap();
}

#[test]
fn failover_moves_forward_through_the_list() {
    let first = labelled_server(LOCALHOST.parse().unwrap(), "server-1");
    let second = labelled_server(LOCALHOST.parse().unwrap(), "server-2");
    let third = labelled_server(LOCALHOST.parse().unwrap(), "server-3");
    let first_address = first.local_addr();

    let registry = CacheRegistry::new();
    let context = registry.context(&config(&[&first, &second, &third])).unwrap();
    assert_eq!(context.lookup_object("name").unwrap(), Object::from("server-1"));

    first.close();
    assert_eq!(context.lookup_object("name").unwrap(), Object::from("server-2"));

    // a restarted first server is not preferred over the next one in line
    drop(first);
    let first = labelled_server(first_address, "server-1");
    second.close();
    assert_eq!(context.lookup_object("name").unwrap(), Object::from("server-3"));

    third.close();
    assert_eq!(context.lookup_object("name").unwrap(), Object::from("server-1"));

    context.close().unwrap();
    drop(first);
}

#[test]
fn no_reachable_server_reports_every_attempt() {
    let first = labelled_server(LOCALHOST.parse().unwrap(), "server-1");
    let second = labelled_server(LOCALHOST.parse().unwrap(), "server-2");
    let config = config(&[&first, &second]);
    let expected = [first.local_addr(), second.local_addr()];
    first.close();
    second.close();

    let registry = CacheRegistry::new();
    let context = registry.context(&config).unwrap();

    match context.lookup("name") {
        Err(Error::Communication { attempts, .. }) => {
            assert_eq!(attempts.len(), expected.len());
            for (attempt, address) in attempts.iter().zip(expected) {
                assert!(attempt.starts_with(&format!("remote://{address} (")), "{attempt}");
            }
        }
        other => panic!("expected a communication failure, got {other:?}"),
    }
    context.close().unwrap();
}

#[test]
fn rejected_credentials_are_an_authentication_failure() {
    let directory = Arc::new(InMemoryDirectory::new());
    let service: Arc<dyn Service> = Arc::new(NamingService::new(directory, 2));
    let server = serve(
        LOCALHOST.parse().unwrap(),
        Arc::new(PasswordRealm::new().with_user("admin", "secret")),
        service,
    );
    let registry = CacheRegistry::new();

    let wrong = config(&[&server])
        .with_authenticator(Arc::new(PasswordAuthenticator::new("admin", "guess")));
    let context = registry.context(&wrong).unwrap();
    assert!(
        matches!(context.lookup("x"), Err(Error::Authentication { .. })),
        "wrong password accepted"
    );
    context.close().unwrap();

    let right = config(&[&server])
        .with_authenticator(Arc::new(PasswordAuthenticator::new("admin", "secret")));
    let context = registry.context(&right).unwrap();
    context.bind("x", true).unwrap();
    assert_eq!(context.lookup_object("x").unwrap(), Object::Bool(true));
    context.close().unwrap();
}

#[test]
fn subcontexts_over_the_wire() {
    let server = naming_server(LOCALHOST.parse().unwrap(), Arc::default());
    let registry = CacheRegistry::new();
    let root = registry.context(&config(&[&server])).unwrap();

    let apps = root.create_subcontext("apps").unwrap();
    assert_eq!(apps.name().to_string(), "apps");
    apps.bind("db", "jdbc://db").unwrap();
    apps.bind("alias", Object::Link("apps/db".into())).unwrap();
    root.bind("top", 7i64).unwrap();

    assert_eq!(root.lookup_object("apps/db").unwrap(), Object::from("jdbc://db"));
    assert_eq!(apps.lookup_object("alias").unwrap(), Object::from("jdbc://db"));
    assert_eq!(
        apps.lookup_link("alias").unwrap(),
        Entry::Object(Object::Link("apps/db".into()))
    );

    let mut bindings = root.list_bindings("").unwrap();
    bindings.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0].name, "apps");
    let Entry::Context(ref nested) = bindings[0].value else {
        panic!("expected a context, got {:?}", bindings[0].value);
    };
    assert_eq!(nested, &apps);
    assert_eq!(bindings[1].value, Entry::Object(Object::Integer(7)));

    let mut names: Vec<_> = apps.list("").unwrap().into_iter().map(|p| p.name).collect();
    names.sort();
    assert_eq!(names, ["alias", "db"]);

    assert!(matches!(
        root.destroy_subcontext("apps"),
        Err(Error::Naming(NamingError::ContextNotEmpty { .. }))
    ));
    apps.rename("db", "primary").unwrap();
    apps.unbind("alias").unwrap();
    apps.unbind("primary").unwrap();
    root.destroy_subcontext("apps").unwrap();
    assert!(matches!(
        root.lookup("apps"),
        Err(Error::Naming(NamingError::NameNotFound { .. }))
    ));

    root.close().unwrap();
}

#[test]
fn concurrent_requests_share_one_channel() {
    let directory = Arc::new(InMemoryDirectory::new());
    for i in 0..16i64 {
        directory.bind(&format!("n{i}").as_str().into(), i.into()).unwrap();
    }
    let server = naming_server(LOCALHOST.parse().unwrap(), directory);
    let registry = CacheRegistry::new();
    let context = registry.context(&config(&[&server])).unwrap();

    thread::scope(|s| {
        for i in 0..16i64 {
            let context = &context;
            s.spawn(move || {
                for _ in 0..20 {
                    let value = context.lookup_object(format!("n{i}").as_str()).unwrap();
                    assert_eq!(value, Object::Integer(i));
                }
            });
        }
    });

    assert_eq!(registry.connections().len(), 1);
    context.close().unwrap();
}

#[test]
fn equal_configuration_shares_resources() {
    let server = naming_server(LOCALHOST.parse().unwrap(), Arc::default());
    let registry = CacheRegistry::new();
    let config = config(&[&server]);

    let first = registry.context(&config).unwrap();
    let second = registry.context(&config).unwrap();
    first.bind("shared", "yes").unwrap();
    assert_eq!(second.lookup_object("shared").unwrap(), Object::from("yes"));
    assert_eq!(registry.stores().len(), 1);
    assert_eq!(registry.endpoints().len(), 1);
    assert_eq!(registry.connections().len(), 1);

    first.close().unwrap();
    assert_eq!(second.lookup_object("shared").unwrap(), Object::from("yes"));
    assert_eq!(registry.stores().len(), 1);

    second.close().unwrap();
    assert!(registry.stores().is_empty());
    assert!(eventually(|| registry.connections().is_empty()));
    assert!(eventually(|| registry.endpoints().is_empty()));
}

#[test]
fn shell_commands_against_a_server() {
    let server = naming_server(LOCALHOST.parse().unwrap(), Arc::default());
    let registry = CacheRegistry::new();
    let context = registry.context(&config(&[&server])).unwrap();

    let run = |line: &str| cli::execute(&context, Command::try_from(line).unwrap()).unwrap();

    assert_eq!(run("mkctx env"), None);
    assert_eq!(run("bind env/mode production"), None);
    assert_eq!(run("bind env/retries 3"), None);
    assert_eq!(run("lookup env/mode"), Some("\"production\"".to_string()));
    assert_eq!(run("list env"), Some("mode: text\nretries: integer".to_string()));
    assert_eq!(run("rebind env/retries 5"), None);
    assert_eq!(run("lookup env/retries"), Some("5".to_string()));
    assert_eq!(run("list"), Some("env: context".to_string()));

    context.close().unwrap();
}
