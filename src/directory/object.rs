use std::{fmt, mem};

use bincode::{
    Decode, Encode,
    de::Decoder,
    error::{AllowedEnumVariants, DecodeError},
};

use super::Name;

/// Deepest nesting of [`Object::List`] values accepted when decoding.
pub const MAX_NESTING: usize = 64;

/// Class name reported for bindings whose value is a context.
pub const CONTEXT_CLASS: &str = "context";

/// Value that can be bound in a directory and marshalled across the wire.
#[derive(Debug, Clone, PartialEq, Eq, Encode)]
pub enum Object {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Object>),
    /// Symbolic link to another name; `lookup` follows it, `lookup_link` does not.
    Link(Name),
}

impl Object {
    pub fn class_name(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Bool(_) => "bool",
            Object::Integer(_) => "integer",
            Object::Text(_) => "text",
            Object::Bytes(_) => "bytes",
            Object::List(_) => "list",
            Object::Link(_) => "link",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Object::Text(s) => Some(s),
            _ => None,
        }
    }
}

// Decoded by hand so that nesting depth is bounded.
impl<Context> Decode<Context> for Object {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        decode_object(decoder, 0)
    }
}

bincode::impl_borrow_decode!(Object);

fn decode_object<D: Decoder>(decoder: &mut D, depth: usize) -> Result<Object, DecodeError> {
    // variant indices follow declaration order, as the derived encoder writes them
    let object = match u32::decode(decoder)? {
        0 => Object::Null,
        1 => Object::Bool(bool::decode(decoder)?),
        2 => Object::Integer(i64::decode(decoder)?),
        3 => Object::Text(String::decode(decoder)?),
        4 => Object::Bytes(Vec::<u8>::decode(decoder)?),
        5 => {
            if depth >= MAX_NESTING {
                return Err(DecodeError::Other("lists nested too deeply"));
            }
            let len = u64::decode(decoder)?;
            let len = usize::try_from(len).map_err(|_| DecodeError::OutsideUsizeRange(len))?;
            decoder.claim_container_read::<Object>(len)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                decoder.unclaim_bytes_read(mem::size_of::<Object>());
                items.push(decode_object(decoder, depth + 1)?);
            }
            Object::List(items)
        }
        6 => Object::Link(Name::decode(decoder)?),
        found => {
            return Err(DecodeError::UnexpectedVariant {
                type_name: "Object",
                allowed: &AllowedEnumVariants::Range { min: 0, max: 6 },
                found,
            });
        }
    };
    Ok(object)
}

impl From<&str> for Object {
    fn from(value: &str) -> Self {
        Object::Text(value.to_string())
    }
}

impl From<String> for Object {
    fn from(value: String) -> Self {
        Object::Text(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Integer(value)
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Bool(value)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Null => write!(f, "null"),
            Object::Bool(b) => write!(f, "{b}"),
            Object::Integer(i) => write!(f, "{i}"),
            Object::Text(s) => write!(f, "{s:?}"),
            Object::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Object::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Object::Link(name) => write!(f, "@{name}"),
        }
    }
}

/// Result of resolving a name: either a plain object or a context.
///
/// A server identifies contexts by their absolute [`Name`]; a client holds
/// a [`RemoteContext`](crate::client::RemoteContext) for them instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry<C> {
    Object(Object),
    Context(C),
}

impl<C> Entry<C> {
    pub fn object(&self) -> Option<&Object> {
        match self {
            Entry::Object(o) => Some(o),
            Entry::Context(_) => None,
        }
    }

    pub fn into_object(self) -> Option<Object> {
        match self {
            Entry::Object(o) => Some(o),
            Entry::Context(_) => None,
        }
    }

    pub fn context(&self) -> Option<&C> {
        match self {
            Entry::Context(c) => Some(c),
            Entry::Object(_) => None,
        }
    }

    pub fn into_context(self) -> Option<C> {
        match self {
            Entry::Context(c) => Some(c),
            Entry::Object(_) => None,
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, Entry::Context(_))
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Entry::Object(o) => o.class_name(),
            Entry::Context(_) => CONTEXT_CLASS,
        }
    }

    pub fn map_context<D>(self, f: impl FnOnce(C) -> D) -> Entry<D> {
        match self {
            Entry::Object(o) => Entry::Object(o),
            Entry::Context(c) => Entry::Context(f(c)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct NameClassPair {
    pub name: String,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Binding<T> {
    pub name: String,
    pub class_name: String,
    pub value: T,
}

impl<C> Binding<Entry<C>> {
    pub fn new(name: impl Into<String>, value: Entry<C>) -> Self {
        Self {
            name: name.into(),
            class_name: value.class_name().to_string(),
            value,
        }
    }
}
