use log::warn;

use crate::{
    directory::{Binding, Directory, Entry, Name, NameClassPair, NamingError, Object},
    error::Error,
    transport::TransportError,
};

use super::{
    codec::{FAILURE, FrameReader, FrameWriter, Marshalled, SUCCESS, Tag},
    store::RemoteStore,
};

/// The closed set of operations understood by the protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Lookup = 0x01,
    Bind = 0x02,
    Rebind = 0x03,
    List = 0x04,
    ListBindings = 0x05,
    Unbind = 0x06,
    Rename = 0x07,
    CreateSubcontext = 0x08,
    DestroySubcontext = 0x09,
    LookupLink = 0x10,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Command::Lookup,
        Command::Bind,
        Command::Rebind,
        Command::List,
        Command::ListBindings,
        Command::Unbind,
        Command::Rename,
        Command::CreateSubcontext,
        Command::DestroySubcontext,
        Command::LookupLink,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn operation(self) -> &'static str {
        match self {
            Command::Lookup => "lookup",
            Command::Bind => "bind",
            Command::Rebind => "rebind",
            Command::List => "list",
            Command::ListBindings => "listBindings",
            Command::Unbind => "unbind",
            Command::Rename => "rename",
            Command::CreateSubcontext => "createSubcontext",
            Command::DestroySubcontext => "destroySubcontext",
            Command::LookupLink => "lookupLink",
        }
    }

    pub fn entry(self) -> &'static CommandEntry {
        let index = match self {
            Command::Lookup => 0,
            Command::Bind => 1,
            Command::Rebind => 2,
            Command::List => 3,
            Command::ListBindings => 4,
            Command::Unbind => 5,
            Command::Rename => 6,
            Command::CreateSubcontext => 7,
            Command::DestroySubcontext => 8,
            Command::LookupLink => 9,
        };
        &COMMANDS[index]
    }

    /// Looks up the table entry for a command id read off the wire.
    pub fn for_id(id: u8) -> Option<&'static CommandEntry> {
        Command::try_from(id).ok().map(Command::entry)
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Command::ALL
            .into_iter()
            .find(|command| command.id() == value)
            .ok_or(value)
    }
}

/// Argument of a client-side command invocation.
#[derive(Debug, Clone, Copy)]
pub enum Param<'a> {
    Name(&'a Name),
    Object(&'a Object),
}

/// Decoded result of a command, before contexts are rebuilt on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Void,
    Entry(Entry<Name>),
    Pairs(Vec<NameClassPair>),
    Bindings(Vec<Binding<Entry<Name>>>),
}

/// Sends the command and waits for its result.
pub type Execute = fn(&RemoteStore, &[Param<'_>]) -> Result<Reply, Error>;

/// Decodes a request, runs it against the directory and writes the response
/// after the frame header already present in the writer.
pub type HandleRequest =
    fn(&mut FrameReader<'_>, &dyn Directory, &mut FrameWriter<'_>) -> Result<(), TransportError>;

/// Decodes a response. The name is the one captured when the request was sent.
pub type HandleResponse = fn(&mut FrameReader<'_>, Option<&Name>) -> Result<Reply, Error>;

pub struct CommandEntry {
    pub command: Command,
    pub execute: Execute,
    pub handle_request: HandleRequest,
    pub handle_response: HandleResponse,
}

static COMMANDS: [CommandEntry; 10] = [
    CommandEntry {
        command: Command::Lookup,
        execute: execute_lookup,
        handle_request: lookup_request,
        handle_response: entry_response,
    },
    CommandEntry {
        command: Command::Bind,
        execute: execute_bind,
        handle_request: bind_request,
        handle_response: void_response,
    },
    CommandEntry {
        command: Command::Rebind,
        execute: execute_rebind,
        handle_request: rebind_request,
        handle_response: void_response,
    },
    CommandEntry {
        command: Command::List,
        execute: execute_list,
        handle_request: list_request,
        handle_response: list_response,
    },
    CommandEntry {
        command: Command::ListBindings,
        execute: execute_list_bindings,
        handle_request: list_bindings_request,
        handle_response: list_bindings_response,
    },
    CommandEntry {
        command: Command::Unbind,
        execute: execute_unbind,
        handle_request: unbind_request,
        handle_response: void_response,
    },
    CommandEntry {
        command: Command::Rename,
        execute: execute_rename,
        handle_request: rename_request,
        handle_response: void_response,
    },
    CommandEntry {
        command: Command::CreateSubcontext,
        execute: execute_create_subcontext,
        handle_request: create_subcontext_request,
        handle_response: context_response,
    },
    CommandEntry {
        command: Command::DestroySubcontext,
        execute: execute_destroy_subcontext,
        handle_request: destroy_subcontext_request,
        handle_response: void_response,
    },
    CommandEntry {
        command: Command::LookupLink,
        execute: execute_lookup_link,
        handle_request: lookup_link_request,
        handle_response: link_response,
    },
];

// Client side: argument validation and request encoding.

fn one_name<'a>(command: Command, params: &[Param<'a>]) -> Result<&'a Name, Error> {
    match params {
        [Param::Name(name)] => Ok(*name),
        _ => Err(Error::argument(
            command.operation(),
            "requires a single name argument",
        )),
    }
}

fn name_and_object<'a>(
    command: Command,
    params: &[Param<'a>],
) -> Result<(&'a Name, &'a Object), Error> {
    match params {
        [Param::Name(name), Param::Object(object)] => Ok((*name, *object)),
        _ => Err(Error::argument(
            command.operation(),
            "requires a name and an object argument",
        )),
    }
}

fn execute_lookup(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let name = one_name(Command::Lookup, params)?;
    store.invoke(Command::Lookup, Some(name), |frame| frame.name(name))
}

fn execute_bind(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let (name, object) = name_and_object(Command::Bind, params)?;
    store.invoke(Command::Bind, None, |frame| {
        frame.name(name)?;
        frame.object(object)
    })
}

fn execute_rebind(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let (name, object) = name_and_object(Command::Rebind, params)?;
    store.invoke(Command::Rebind, None, |frame| {
        frame.name(name)?;
        frame.object(object)
    })
}

fn execute_list(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let name = one_name(Command::List, params)?;
    store.invoke(Command::List, None, |frame| frame.name(name))
}

fn execute_list_bindings(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let name = one_name(Command::ListBindings, params)?;
    store.invoke(Command::ListBindings, Some(name), |frame| frame.name(name))
}

fn execute_unbind(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let name = one_name(Command::Unbind, params)?;
    store.invoke(Command::Unbind, None, |frame| frame.name(name))
}

fn execute_rename(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let [Param::Name(name), Param::Name(new_name)] = params else {
        return Err(Error::argument(
            Command::Rename.operation(),
            "requires two name arguments",
        ));
    };
    store.invoke(Command::Rename, None, |frame| {
        frame.name(name)?;
        frame.name(new_name)
    })
}

fn execute_create_subcontext(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let name = one_name(Command::CreateSubcontext, params)?;
    store.invoke(Command::CreateSubcontext, Some(name), |frame| {
        frame.name(name)
    })
}

fn execute_destroy_subcontext(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let name = one_name(Command::DestroySubcontext, params)?;
    store.invoke(Command::DestroySubcontext, None, |frame| frame.name(name))
}

fn execute_lookup_link(store: &RemoteStore, params: &[Param<'_>]) -> Result<Reply, Error> {
    let name = one_name(Command::LookupLink, params)?;
    store.invoke(Command::LookupLink, Some(name), |frame| frame.name(name))
}

// Server side: decode, run against the directory, encode the outcome.

fn respond<T>(
    out: &mut FrameWriter<'_>,
    result: Result<T, NamingError>,
    write: impl FnOnce(&mut FrameWriter<'_>, T) -> Result<(), TransportError>,
) -> Result<(), TransportError> {
    match result {
        Ok(value) => {
            out.byte(SUCCESS);
            write(out, value)
        }
        Err(e) => {
            out.byte(FAILURE);
            out.value(Tag::Exception, &Marshalled::Exception(e))
        }
    }
}

fn write_void(out: &mut FrameWriter<'_>, _: ()) -> Result<(), TransportError> {
    out.tag(Tag::Void);
    Ok(())
}

fn write_context<C>(out: &mut FrameWriter<'_>, _: C) -> Result<(), TransportError> {
    out.tag(Tag::Context);
    Ok(())
}

fn read_name(input: &mut FrameReader<'_>) -> Result<Name, TransportError> {
    input.expect_tag(Tag::Name)?;
    input.name()
}

fn read_object(input: &mut FrameReader<'_>) -> Result<Object, TransportError> {
    input.expect_tag(Tag::Object)?;
    input.object()
}

fn list_length(len: usize) -> Result<u32, TransportError> {
    u32::try_from(len).map_err(|_| TransportError::protocol("too many results"))
}

fn lookup_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    respond(out, directory.lookup(&name), |out, entry| match entry {
        Entry::Context(_) => write_context(out, ()),
        Entry::Object(object) => out.value(Tag::Object, &Marshalled::Object(object)),
    })
}

fn bind_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    let object = read_object(input)?;
    respond(out, directory.bind(&name, object), write_void)
}

fn rebind_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    let object = read_object(input)?;
    respond(out, directory.rebind(&name, object), write_void)
}

fn list_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    respond(out, directory.list(&name), |out, pairs| {
        out.tag(Tag::List);
        out.u32(list_length(pairs.len())?);
        for pair in pairs {
            out.value(Tag::Object, &Marshalled::NameClassPair(pair))?;
        }
        Ok(())
    })
}

fn list_bindings_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    respond(out, directory.list_bindings(&name), |out, bindings| {
        out.tag(Tag::List);
        out.u32(list_length(bindings.len())?);
        for binding in bindings {
            match binding.value {
                // contexts travel by name only
                Entry::Context(_) => {
                    out.tag(Tag::Context);
                    out.utf(&binding.name)?;
                }
                Entry::Object(object) => {
                    let binding = Binding {
                        name: binding.name,
                        class_name: binding.class_name,
                        value: object,
                    };
                    out.value(Tag::Binding, &Marshalled::Binding(binding))?;
                }
            }
        }
        Ok(())
    })
}

fn unbind_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    respond(out, directory.unbind(&name), write_void)
}

fn rename_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    let new_name = read_name(input)?;
    respond(out, directory.rename(&name, &new_name), write_void)
}

fn create_subcontext_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    respond(out, directory.create_subcontext(&name), write_context)
}

fn destroy_subcontext_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    respond(out, directory.destroy_subcontext(&name), write_void)
}

fn lookup_link_request(
    input: &mut FrameReader<'_>,
    directory: &dyn Directory,
    out: &mut FrameWriter<'_>,
) -> Result<(), TransportError> {
    let name = read_name(input)?;
    respond(out, directory.lookup_link(&name), |out, entry| match entry {
        Entry::Context(_) => write_context(out, ()),
        Entry::Object(object) => out.value(Tag::Binding, &Marshalled::Object(object)),
    })
}

// Client side: response decoding.

/// Reads the outcome byte, turning a FAILURE frame into the remote exception.
fn read_outcome(input: &mut FrameReader<'_>) -> Result<(), Error> {
    match input.byte()? {
        SUCCESS => Ok(()),
        FAILURE => match input.tag()? {
            Tag::Exception => Err(Error::Naming(input.exception()?)),
            other => Err(unexpected_response(other)),
        },
        _ => Err(TransportError::protocol("Outcome not understood").into()),
    }
}

fn unexpected_response(tag: Tag) -> Error {
    TransportError::protocol(format!("unexpected response parameter {tag:?}")).into()
}

fn requested(name: Option<&Name>) -> Result<Name, Error> {
    name.cloned()
        .ok_or_else(|| TransportError::protocol("context result for an unnamed request").into())
}

fn bounded_capacity(count: u32) -> usize {
    usize::try_from(count).unwrap_or(0).min(1024)
}

fn entry_response(input: &mut FrameReader<'_>, name: Option<&Name>) -> Result<Reply, Error> {
    read_outcome(input)?;
    match input.tag()? {
        Tag::Object => Ok(Reply::Entry(Entry::Object(input.object()?))),
        Tag::Context => Ok(Reply::Entry(Entry::Context(requested(name)?))),
        other => Err(unexpected_response(other)),
    }
}

fn link_response(input: &mut FrameReader<'_>, name: Option<&Name>) -> Result<Reply, Error> {
    read_outcome(input)?;
    match input.tag()? {
        Tag::Binding => Ok(Reply::Entry(Entry::Object(input.object()?))),
        Tag::Context => Ok(Reply::Entry(Entry::Context(requested(name)?))),
        other => Err(unexpected_response(other)),
    }
}

fn context_response(input: &mut FrameReader<'_>, name: Option<&Name>) -> Result<Reply, Error> {
    read_outcome(input)?;
    match input.tag()? {
        Tag::Context => Ok(Reply::Entry(Entry::Context(requested(name)?))),
        other => Err(unexpected_response(other)),
    }
}

fn void_response(input: &mut FrameReader<'_>, _: Option<&Name>) -> Result<Reply, Error> {
    read_outcome(input)?;
    if input.remaining() > 0 {
        let tag = input.tag()?;
        if tag != Tag::Void {
            warn!("unexpected parameter type - expected: {:?}, received: {tag:?}", Tag::Void);
        }
    }
    Ok(Reply::Void)
}

fn list_response(input: &mut FrameReader<'_>, _: Option<&Name>) -> Result<Reply, Error> {
    read_outcome(input)?;
    match input.tag()? {
        Tag::List => {}
        other => return Err(unexpected_response(other)),
    }
    let count = input.u32()?;
    let mut pairs = Vec::with_capacity(bounded_capacity(count));
    for _ in 0..count {
        input.expect_tag(Tag::Object)?;
        pairs.push(input.name_class_pair()?);
    }
    Ok(Reply::Pairs(pairs))
}

fn list_bindings_response(
    input: &mut FrameReader<'_>,
    name: Option<&Name>,
) -> Result<Reply, Error> {
    read_outcome(input)?;
    match input.tag()? {
        Tag::List => {}
        other => return Err(unexpected_response(other)),
    }
    let count = input.u32()?;
    let mut bindings = Vec::with_capacity(bounded_capacity(count));
    for _ in 0..count {
        match input.tag()? {
            Tag::Binding => {
                let binding = input.binding()?;
                bindings.push(Binding {
                    name: binding.name,
                    class_name: binding.class_name,
                    value: Entry::Object(binding.value),
                });
            }
            Tag::Context => {
                let child = input.utf()?;
                let context = requested(name)?.child(&child);
                bindings.push(Binding::new(child, Entry::Context(context)));
            }
            other => return Err(unexpected_response(other)),
        }
    }
    Ok(Reply::Bindings(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        directory::InMemoryDirectory,
        protocol::codec::BincodeMarshaller,
    };

    fn directory() -> InMemoryDirectory {
        let dir = InMemoryDirectory::new();
        dir.bind(&"test".into(), "TestValue".into()).unwrap();
        dir.create_subcontext(&"ctx".into()).unwrap();
        dir.bind(&"ctx/leaf".into(), 1i64.into()).unwrap();
        dir.bind(&"alias".into(), Object::Link("test".into())).unwrap();
        dir
    }

    /// Runs one request through the server handler and decodes the response
    /// with the client handler, the way the two peers would.
    fn round_trip(
        command: Command,
        name: Option<&Name>,
        args: impl FnOnce(&mut FrameWriter<'_>) -> Result<(), TransportError>,
        dir: &dyn Directory,
    ) -> Result<Reply, Error> {
        let marshaller = BincodeMarshaller::new();
        let mut request = FrameWriter::new(&marshaller, command.id(), 9);
        args(&mut request).unwrap();
        let request = request.finish();

        let mut input = FrameReader::new(&request, &marshaller);
        let (id, correlation_id) = input.header().unwrap();
        let entry = Command::for_id(id).unwrap();
        let mut response = FrameWriter::new(&marshaller, id, correlation_id);
        (entry.handle_request)(&mut input, dir, &mut response).unwrap();
        let response = response.finish();

        let mut output = FrameReader::new(&response, &marshaller);
        assert_eq!(output.header().unwrap(), (command.id(), 9));
        (entry.handle_response)(&mut output, name)
    }

    #[test]
    fn command_ids_are_stable() {
        let ids: Vec<u8> = Command::ALL.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0x10]);
        for command in Command::ALL {
            assert_eq!(command.entry().command, command);
            assert_eq!(Command::try_from(command.id()), Ok(command));
        }
        assert!(Command::for_id(0x0a).is_none());
        assert!(Command::for_id(0).is_none());
    }

    #[test]
    fn lookup_object_and_context() {
        let dir = directory();
        let name = Name::from("test");
        let reply = round_trip(Command::Lookup, Some(&name), |f| f.name(&name), &dir);
        assert_eq!(reply.unwrap(), Reply::Entry(Entry::Object("TestValue".into())));

        let ctx = Name::from("ctx");
        let reply = round_trip(Command::Lookup, Some(&ctx), |f| f.name(&ctx), &dir);
        assert_eq!(reply.unwrap(), Reply::Entry(Entry::Context(ctx.clone())));
    }

    #[test]
    fn lookup_link_returns_link() {
        let dir = directory();
        let name = Name::from("alias");
        let reply = round_trip(Command::LookupLink, Some(&name), |f| f.name(&name), &dir);
        assert_eq!(
            reply.unwrap(),
            Reply::Entry(Entry::Object(Object::Link("test".into())))
        );
    }

    #[test]
    fn domain_errors_come_back_verbatim() {
        let dir = directory();
        let name = Name::from("missing");
        let err = round_trip(Command::Lookup, Some(&name), |f| f.name(&name), &dir).unwrap_err();
        assert!(matches!(
            err,
            Error::Naming(NamingError::NameNotFound { ref name }) if name == "missing"
        ));
    }

    #[test]
    fn bind_rename_unbind() {
        let dir = directory();
        let name = Name::from("new");
        let object = Object::Integer(5);
        let reply = round_trip(
            Command::Bind,
            None,
            |f| {
                f.name(&name)?;
                f.object(&object)
            },
            &dir,
        );
        assert_eq!(reply.unwrap(), Reply::Void);

        let target = Name::from("ctx/renamed");
        let reply = round_trip(
            Command::Rename,
            None,
            |f| {
                f.name(&name)?;
                f.name(&target)
            },
            &dir,
        );
        assert_eq!(reply.unwrap(), Reply::Void);
        assert_eq!(dir.lookup(&target).unwrap(), Entry::Object(object));

        let reply = round_trip(Command::Unbind, None, |f| f.name(&target), &dir);
        assert_eq!(reply.unwrap(), Reply::Void);
    }

    #[test]
    fn list_and_list_bindings() {
        let dir = directory();
        let root = Name::root();
        let reply = round_trip(Command::List, None, |f| f.name(&root), &dir).unwrap();
        let Reply::Pairs(pairs) = reply else {
            panic!("unexpected reply {reply:?}");
        };
        let names: Vec<&str> = pairs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alias", "ctx", "test"]);

        let reply = round_trip(Command::ListBindings, Some(&root), |f| f.name(&root), &dir).unwrap();
        let Reply::Bindings(bindings) = reply else {
            panic!("unexpected reply {reply:?}");
        };
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[1].value, Entry::Context(Name::from("ctx")));
        assert_eq!(bindings[1].class_name, "context");
        assert_eq!(bindings[2].value, Entry::Object("TestValue".into()));
    }

    #[test]
    fn list_bindings_contexts_are_relative_to_request() {
        let dir = directory();
        dir.create_subcontext(&"ctx/inner".into()).unwrap();
        let ctx = Name::from("ctx");
        let reply = round_trip(Command::ListBindings, Some(&ctx), |f| f.name(&ctx), &dir).unwrap();
        let Reply::Bindings(bindings) = reply else {
            panic!("unexpected reply {reply:?}");
        };
        assert_eq!(bindings[0].name, "inner");
        assert_eq!(bindings[0].value, Entry::Context(Name::from("ctx/inner")));
    }

    #[test]
    fn subcontext_lifecycle() {
        let dir = directory();
        let name = Name::from("fresh");
        let reply = round_trip(Command::CreateSubcontext, Some(&name), |f| f.name(&name), &dir);
        assert_eq!(reply.unwrap(), Reply::Entry(Entry::Context(name.clone())));

        let reply = round_trip(Command::DestroySubcontext, None, |f| f.name(&name), &dir);
        assert_eq!(reply.unwrap(), Reply::Void);
    }

    #[test]
    fn unknown_outcome_is_rejected() {
        let marshaller = BincodeMarshaller::new();
        let mut frame = FrameWriter::new(&marshaller, Command::Unbind.id(), 1);
        frame.byte(0x7f);
        let bytes = frame.finish();

        let mut input = FrameReader::new(&bytes, &marshaller);
        input.header().unwrap();
        let err = void_response(&mut input, None).unwrap_err();
        assert!(err.to_string().contains("Outcome not understood"));
    }

    #[test]
    fn failure_without_exception_is_a_protocol_error() {
        let marshaller = BincodeMarshaller::new();
        let mut frame = FrameWriter::new(&marshaller, Command::Lookup.id(), 1);
        frame.byte(FAILURE);
        frame.tag(Tag::Void);
        let bytes = frame.finish();

        let mut input = FrameReader::new(&bytes, &marshaller);
        input.header().unwrap();
        assert!(matches!(
            entry_response(&mut input, None),
            Err(Error::Transport(TransportError::Protocol(_)))
        ));
    }

    #[test]
    fn mistagged_request_is_still_served() {
        let dir = directory();
        let marshaller = BincodeMarshaller::new();
        let mut request = FrameWriter::new(&marshaller, Command::Lookup.id(), 3);
        request
            .value(Tag::Object, &Marshalled::Name(Name::from("test")))
            .unwrap();
        let request = request.finish();

        let mut input = FrameReader::new(&request, &marshaller);
        input.header().unwrap();
        let mut response = FrameWriter::new(&marshaller, Command::Lookup.id(), 3);
        lookup_request(&mut input, &dir, &mut response).unwrap();
        let response = response.finish();

        let mut output = FrameReader::new(&response, &marshaller);
        output.header().unwrap();
        assert_eq!(
            entry_response(&mut output, None).unwrap(),
            Reply::Entry(Entry::Object("TestValue".into()))
        );
    }
}
