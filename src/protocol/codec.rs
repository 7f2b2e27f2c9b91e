use std::sync::Arc;

use bincode::{Decode, Encode};
use log::warn;

use crate::{
    directory::{Binding, Name, NameClassPair, NamingError, Object},
    transport::{TransportError, WireConfig, wire_config},
};

use super::VERSION_ONE;

pub const SUCCESS: u8 = 0x00;
pub const FAILURE: u8 = 0x01;

/// Marker preceding every value written to a frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Name = 0x00,
    Object = 0x01,
    Exception = 0x02,
    Void = 0x03,
    Binding = 0x04,
    Context = 0x05,
    List = 0x06,
}

impl TryFrom<u8> for Tag {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Tag::Name,
            0x01 => Tag::Object,
            0x02 => Tag::Exception,
            0x03 => Tag::Void,
            0x04 => Tag::Binding,
            0x05 => Tag::Context,
            0x06 => Tag::List,
            other => {
                return Err(TransportError::protocol(format!(
                    "unknown parameter type {other:#04x}"
                )));
            }
        })
    }
}

/// Every value a marshaller knows how to carry.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Marshalled {
    Name(Name),
    Object(Object),
    Exception(NamingError),
    Binding(Binding<Object>),
    NameClassPair(NameClassPair),
}

/// Object-serialization strategy, chosen by the negotiated protocol version.
pub trait Marshaller: Send + Sync {
    fn marshal(&self, value: &Marshalled, out: &mut Vec<u8>) -> Result<(), TransportError>;

    /// Reads one value from the front of `input`, returning it with the
    /// number of bytes consumed.
    fn unmarshal(&self, input: &[u8]) -> Result<(Marshalled, usize), TransportError>;
}

/// Values are bounded by [`MAX_FRAME`](crate::transport::MAX_FRAME) bytes and
/// [`MAX_NESTING`](crate::directory::MAX_NESTING) levels of lists.
pub struct BincodeMarshaller {
    config: WireConfig,
}

impl BincodeMarshaller {
    pub fn new() -> Self {
        Self {
            config: wire_config(),
        }
    }
}

impl Default for BincodeMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshaller for BincodeMarshaller {
    fn marshal(&self, value: &Marshalled, out: &mut Vec<u8>) -> Result<(), TransportError> {
        bincode::encode_into_std_write(value, out, self.config)?;
        Ok(())
    }

    fn unmarshal(&self, input: &[u8]) -> Result<(Marshalled, usize), TransportError> {
        Ok(bincode::decode_from_slice(input, self.config)?)
    }
}

/// Marshaller spoken by a given protocol version.
pub fn marshaller_for(version: u8) -> Option<Arc<dyn Marshaller>> {
    match version {
        VERSION_ONE => Some(Arc::new(BincodeMarshaller::new())),
        _ => None,
    }
}

/// Builds one frame: `[command][correlation id][payload...]`.
pub struct FrameWriter<'a> {
    buf: Vec<u8>,
    marshaller: &'a dyn Marshaller,
}

impl<'a> FrameWriter<'a> {
    pub fn new(marshaller: &'a dyn Marshaller, command: u8, correlation_id: i32) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(command);
        buf.extend_from_slice(&correlation_id.to_be_bytes());
        Self { buf, marshaller }
    }

    pub fn byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn tag(&mut self, tag: Tag) {
        self.byte(tag as u8);
    }

    pub fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a string prefixed by its `u16` byte length.
    pub fn utf(&mut self, value: &str) -> Result<(), TransportError> {
        let len = u16::try_from(value.len())
            .map_err(|_| TransportError::protocol("string too long for frame"))?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Writes `tag` followed by the marshalled `value`.
    pub fn value(&mut self, tag: Tag, value: &Marshalled) -> Result<(), TransportError> {
        self.tag(tag);
        self.marshaller.marshal(value, &mut self.buf)
    }

    pub fn name(&mut self, name: &Name) -> Result<(), TransportError> {
        self.value(Tag::Name, &Marshalled::Name(name.clone()))
    }

    pub fn object(&mut self, object: &Object) -> Result<(), TransportError> {
        self.value(Tag::Object, &Marshalled::Object(object.clone()))
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over one received frame.
pub struct FrameReader<'a> {
    input: &'a [u8],
    marshaller: &'a dyn Marshaller,
}

impl<'a> FrameReader<'a> {
    pub fn new(input: &'a [u8], marshaller: &'a dyn Marshaller) -> Self {
        Self { input, marshaller }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], TransportError> {
        let Some((head, rest)) = self.input.split_first_chunk::<N>() else {
            return Err(TransportError::protocol("truncated frame"));
        };
        self.input = rest;
        Ok(*head)
    }

    /// Reads the command id and correlation id opening every frame.
    pub fn header(&mut self) -> Result<(u8, i32), TransportError> {
        let [command] = self.take::<1>()?;
        let correlation_id = i32::from_be_bytes(self.take::<4>()?);
        Ok((command, correlation_id))
    }

    pub fn byte(&mut self) -> Result<u8, TransportError> {
        let [value] = self.take::<1>()?;
        Ok(value)
    }

    pub fn u32(&mut self) -> Result<u32, TransportError> {
        Ok(u32::from_be_bytes(self.take::<4>()?))
    }

    pub fn utf(&mut self) -> Result<String, TransportError> {
        let len = usize::from(u16::from_be_bytes(self.take::<2>()?));
        if self.input.len() < len {
            return Err(TransportError::protocol("truncated frame"));
        }
        let (bytes, rest) = self.input.split_at(len);
        self.input = rest;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TransportError::protocol("string is not valid UTF-8"))
    }

    pub fn tag(&mut self) -> Result<Tag, TransportError> {
        Tag::try_from(self.byte()?)
    }

    /// Reads a tag, logging rather than failing when it is not `expected`.
    pub fn expect_tag(&mut self, expected: Tag) -> Result<Tag, TransportError> {
        let tag = self.tag()?;
        if tag != expected {
            warn!("unexpected parameter type - expected: {expected:?}, received: {tag:?}");
        }
        Ok(tag)
    }

    pub fn value(&mut self) -> Result<Marshalled, TransportError> {
        let (value, read) = self.marshaller.unmarshal(self.input)?;
        self.input = &self.input[read.min(self.input.len())..];
        Ok(value)
    }

    pub fn name(&mut self) -> Result<Name, TransportError> {
        match self.value()? {
            Marshalled::Name(name) => Ok(name),
            other => Err(unexpected("a name", &other)),
        }
    }

    pub fn object(&mut self) -> Result<Object, TransportError> {
        match self.value()? {
            Marshalled::Object(object) => Ok(object),
            other => Err(unexpected("an object", &other)),
        }
    }

    pub fn exception(&mut self) -> Result<NamingError, TransportError> {
        match self.value()? {
            Marshalled::Exception(e) => Ok(e),
            other => Err(unexpected("an exception", &other)),
        }
    }

    pub fn binding(&mut self) -> Result<Binding<Object>, TransportError> {
        match self.value()? {
            Marshalled::Binding(binding) => Ok(binding),
            other => Err(unexpected("a binding", &other)),
        }
    }

    pub fn name_class_pair(&mut self) -> Result<NameClassPair, TransportError> {
        match self.value()? {
            Marshalled::NameClassPair(pair) => Ok(pair),
            other => Err(unexpected("a name/class pair", &other)),
        }
    }

    pub fn remaining(&self) -> usize {
        self.input.len()
    }
}

fn unexpected(expected: &str, found: &Marshalled) -> TransportError {
    TransportError::protocol(format!("expected {expected}, found {found:?}"))
}
