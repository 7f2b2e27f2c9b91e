use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
        mpsc::RecvTimeoutError,
    },
    thread,
    time::Duration,
};

use log::{debug, trace, warn};

use crate::{
    client::{Closeable, DirectoryStore, RemoteContext},
    directory::{Binding, Entry, Name, NameClassPair, Object},
    error::Error,
    transport::{Channel, TransportError},
};

use super::{
    client_handshake,
    codec::{FrameReader, FrameWriter, Marshaller, marshaller_for},
    command::{Command, Param, Reply},
    correlation::CorrelationTable,
    thread::ThreadPool,
};

/// Workers decoding responses off the receiver thread.
const RESPONSE_WORKERS: usize = 4;

/// Client proxy for one naming channel.
///
/// Any number of threads may issue requests concurrently; each waits only
/// for the response carrying its own correlation id.
pub struct RemoteStore {
    channel: Arc<Channel>,
    marshaller: Arc<dyn Marshaller>,
    table: Arc<CorrelationTable>,
    timeout: Duration,
    closed: AtomicBool,
    disconnected: Arc<AtomicBool>,
    this: Weak<RemoteStore>,
}

impl RemoteStore {
    /// Runs the client handshake on `channel` and starts reading responses.
    ///
    /// `timeout` bounds every request made through the store.
    pub fn connect(
        channel: Channel,
        timeout: Duration,
        handshake_timeout: Duration,
    ) -> Result<Arc<Self>, TransportError> {
        let version = client_handshake(&channel, handshake_timeout)?;
        let marshaller = marshaller_for(version).ok_or(TransportError::UnsupportedVersion {
            offered: vec![version],
        })?;

        let channel = Arc::new(channel);
        let table = Arc::new(CorrelationTable::new());
        let disconnected = Arc::new(AtomicBool::new(false));
        {
            let channel = Arc::clone(&channel);
            let marshaller = Arc::clone(&marshaller);
            let table = Arc::clone(&table);
            let disconnected = Arc::clone(&disconnected);
            thread::Builder::new()
                .name(format!("naming-receiver-{}", channel.peer()))
                .spawn(move || receive(&channel, marshaller, table, &disconnected))?;
        }

        Ok(Arc::new_cyclic(|this| Self {
            channel,
            marshaller,
            table,
            timeout,
            closed: AtomicBool::new(false),
            disconnected,
            this: this.clone(),
        }))
    }

    pub fn peer(&self) -> &str {
        self.channel.peer()
    }

    /// Sends one request and blocks until its response, a channel failure
    /// or the request timeout. `capture` is handed back to the response
    /// handler to name any context in the result.
    pub fn invoke(
        &self,
        command: Command,
        capture: Option<&Name>,
        write: impl FnOnce(&mut FrameWriter<'_>) -> Result<(), TransportError>,
    ) -> Result<Reply, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let reservation = self.table.reserve(capture.cloned());
        // checked after reserving so a concurrent disconnect still fails this request
        if self.disconnected.load(Ordering::Acquire) {
            return Err(TransportError::ChannelClosed.into());
        }

        let mut frame = FrameWriter::new(self.marshaller.as_ref(), command.id(), reservation.id());
        write(&mut frame)?;
        self.channel.send(frame.finish())?;
        trace!(
            "sent {} request, correlation id {}",
            command.operation(),
            reservation.id()
        );

        match reservation.receiver().recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                debug!(
                    "{} request {} timed out after {:?}",
                    command.operation(),
                    reservation.id(),
                    self.timeout
                );
                Err(Error::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ChannelClosed.into()),
        }
    }

    fn execute(&self, command: Command, params: &[Param<'_>]) -> Result<Reply, Error> {
        (command.entry().execute)(self, params)
    }

    fn context(&self, name: Name) -> Result<RemoteContext, Error> {
        let store: Arc<dyn DirectoryStore> = self.this.upgrade().ok_or(Error::Closed)?;
        Ok(RemoteContext::new(name, store))
    }

    fn entry(&self, entry: Entry<Name>) -> Result<Entry<RemoteContext>, Error> {
        match entry {
            Entry::Object(object) => Ok(Entry::Object(object)),
            Entry::Context(name) => Ok(Entry::Context(self.context(name)?)),
        }
    }
}

fn unexpected(command: Command, reply: Reply) -> Error {
    TransportError::protocol(format!(
        "unexpected result for {}: {reply:?}",
        command.operation()
    ))
    .into()
}

impl Closeable for RemoteStore {
    fn close(&self) -> Result<(), Error> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("closing naming channel to {}", self.channel.peer());
            self.channel.close();
        }
        Ok(())
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.channel.close();
    }
}

impl DirectoryStore for RemoteStore {
    fn lookup(&self, name: &Name) -> Result<Entry<RemoteContext>, Error> {
        match self.execute(Command::Lookup, &[Param::Name(name)])? {
            Reply::Entry(entry) => self.entry(entry),
            other => Err(unexpected(Command::Lookup, other)),
        }
    }

    fn bind(&self, name: &Name, object: &Object) -> Result<(), Error> {
        self.execute(Command::Bind, &[Param::Name(name), Param::Object(object)])
            .map(drop)
    }

    fn rebind(&self, name: &Name, object: &Object) -> Result<(), Error> {
        self.execute(Command::Rebind, &[Param::Name(name), Param::Object(object)])
            .map(drop)
    }

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, Error> {
        match self.execute(Command::List, &[Param::Name(name)])? {
            Reply::Pairs(pairs) => Ok(pairs),
            other => Err(unexpected(Command::List, other)),
        }
    }

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding<Entry<RemoteContext>>>, Error> {
        match self.execute(Command::ListBindings, &[Param::Name(name)])? {
            Reply::Bindings(bindings) => bindings
                .into_iter()
                .map(|binding| {
                    Ok(Binding {
                        name: binding.name,
                        class_name: binding.class_name,
                        value: self.entry(binding.value)?,
                    })
                })
                .collect(),
            other => Err(unexpected(Command::ListBindings, other)),
        }
    }

    fn unbind(&self, name: &Name) -> Result<(), Error> {
        self.execute(Command::Unbind, &[Param::Name(name)]).map(drop)
    }

    fn rename(&self, name: &Name, new_name: &Name) -> Result<(), Error> {
        self.execute(Command::Rename, &[Param::Name(name), Param::Name(new_name)])
            .map(drop)
    }

    fn create_subcontext(&self, name: &Name) -> Result<RemoteContext, Error> {
        match self.execute(Command::CreateSubcontext, &[Param::Name(name)])? {
            Reply::Entry(Entry::Context(name)) => self.context(name),
            other => Err(unexpected(Command::CreateSubcontext, other)),
        }
    }

    fn destroy_subcontext(&self, name: &Name) -> Result<(), Error> {
        self.execute(Command::DestroySubcontext, &[Param::Name(name)])
            .map(drop)
    }

    fn lookup_link(&self, name: &Name) -> Result<Entry<RemoteContext>, Error> {
        match self.execute(Command::LookupLink, &[Param::Name(name)])? {
            Reply::Entry(entry) => self.entry(entry),
            other => Err(unexpected(Command::LookupLink, other)),
        }
    }
}

/// Reads responses until the channel ends, handing each to the request
/// waiting on its correlation id. Pending requests fail once it ends.
fn receive(
    channel: &Channel,
    marshaller: Arc<dyn Marshaller>,
    table: Arc<CorrelationTable>,
    disconnected: &AtomicBool,
) {
    let pool = ThreadPool::new("naming-response", RESPONSE_WORKERS);
    loop {
        let message = match channel.receive() {
            Ok(message) => message,
            Err(e) => {
                debug!("naming channel to {} ended: {e}", channel.peer());
                break;
            }
        };

        let (id, correlation_id) = match FrameReader::new(&message, marshaller.as_ref()).header()
        {
            Ok(header) => header,
            Err(e) => {
                warn!("discarding malformed response from {}: {e}", channel.peer());
                continue;
            }
        };
        let Some(entry) = Command::for_id(id) else {
            warn!("discarding response for unknown command {id:#04x}");
            continue;
        };
        trace!(
            "received {} response, correlation id {correlation_id}",
            entry.command.operation()
        );

        let marshaller = Arc::clone(&marshaller);
        let table = Arc::clone(&table);
        pool.execute(move || {
            let mut reader = FrameReader::new(&message, marshaller.as_ref());
            let resolved = table.complete(correlation_id, |name| {
                reader.header()?;
                (entry.handle_response)(&mut reader, name)
            });
            if !resolved {
                debug!("no request waiting on correlation id {correlation_id}");
            }
        });
    }

    disconnected.store(true, Ordering::Release);
    table.fail_all(|| TransportError::ChannelClosed.into());
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex, thread, time::Instant};

    use super::*;
    use crate::{
        protocol::{SERVICE_NAME, server_handshake},
        transport::{
            AllowAnonymous, Anonymous, Destination, Endpoint, OptionMap, Service, TransportServer,
        },
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Completes the handshake, then keeps every request without answering.
    #[derive(Default)]
    struct Recorder {
        received: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Service for Recorder {
        fn serve(&self, channel: Channel) {
            if server_handshake(&channel).is_err() {
                return;
            }
            while let Ok(message) = channel.receive() {
                self.received.lock().unwrap().push(message);
            }
        }
    }

    #[test]
    fn invalid_arguments_never_reach_the_wire() {
        let recorder = Recorder::default();
        let received = Arc::clone(&recorder.received);
        let services: HashMap<String, Arc<dyn Service>> =
            HashMap::from([(SERVICE_NAME.to_string(), Arc::new(recorder) as Arc<dyn Service>)]);
        let server = TransportServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(AllowAnonymous),
            services,
        )
        .unwrap();

        let endpoint = Endpoint::new("test", OptionMap::new());
        let connection = endpoint
            .connect(
                &Destination::new("127.0.0.1", server.local_addr().port()),
                &OptionMap::new(),
                &Anonymous,
                TIMEOUT,
            )
            .unwrap();
        let channel = connection
            .open_channel(SERVICE_NAME, &OptionMap::new(), TIMEOUT)
            .unwrap();
        let store = RemoteStore::connect(channel, Duration::from_millis(200), TIMEOUT).unwrap();

        let name = Name::from("a");
        let object = Object::Integer(1);
        let calls: [(Command, &[Param<'_>]); 4] = [
            (Command::Lookup, &[]),
            (Command::Bind, &[Param::Name(&name)]),
            (Command::Rename, &[Param::Name(&name), Param::Object(&object)]),
            (Command::List, &[Param::Name(&name), Param::Name(&name)]),
        ];
        for (command, params) in calls {
            let err = (command.entry().execute)(&store, params).unwrap_err();
            assert!(
                matches!(err, Error::Argument { operation, .. } if operation == command.operation()),
                "{err:?}"
            );
        }
        assert!(store.table.is_empty());

        // a well-formed request goes out and is left unanswered
        let err = (Command::Lookup.entry().execute)(&store, &[Param::Name(&name)]).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "{err:?}");

        let deadline = Instant::now() + TIMEOUT;
        while received.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0][0], Command::Lookup.id());
    }
}
