use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::trace;

use super::{Binding, Directory, Entry, Name, NameClassPair, NamingError, Object};

const MAX_LINK_DEPTH: usize = 8;

type Bindings = BTreeMap<String, Node>;

#[derive(Debug, Clone)]
enum Node {
    Object(Object),
    Context(Bindings),
}

/// Thread-safe, tree-backed [`Directory`].
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    root: Mutex<Bindings>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn root(&self) -> MutexGuard<'_, Bindings> {
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Walks `name` from `root`, requiring every component to be a context.
fn context<'a>(root: &'a Bindings, name: &Name) -> Result<&'a Bindings, NamingError> {
    let mut current = root;
    for (depth, component) in name.components().iter().enumerate() {
        current = match current.get(component) {
            Some(Node::Context(bindings)) => bindings,
            Some(Node::Object(_)) => {
                return Err(NamingError::not_context(&Name::new(
                    name.components()[..=depth].iter().cloned(),
                )));
            }
            None => return Err(NamingError::not_found(name)),
        };
    }
    Ok(current)
}

fn context_mut<'a>(root: &'a mut Bindings, name: &Name) -> Result<&'a mut Bindings, NamingError> {
    let mut current = root;
    for (depth, component) in name.components().iter().enumerate() {
        current = match current.get_mut(component) {
            Some(Node::Context(bindings)) => bindings,
            Some(Node::Object(_)) => {
                return Err(NamingError::not_context(&Name::new(
                    name.components()[..=depth].iter().cloned(),
                )));
            }
            None => return Err(NamingError::not_found(name)),
        };
    }
    Ok(current)
}

fn split<'a>(name: &'a Name) -> Result<(Name, &'a str), NamingError> {
    name.split_last()
        .ok_or_else(|| NamingError::invalid(name, "an empty name cannot be bound"))
}

fn resolve(
    root: &Bindings,
    name: &Name,
    follow_links: bool,
    depth: usize,
) -> Result<Entry<Name>, NamingError> {
    let Some((parent, last)) = name.split_last() else {
        return Ok(Entry::Context(Name::root()));
    };

    match context(root, &parent)?.get(last) {
        None => Err(NamingError::not_found(name)),
        Some(Node::Context(_)) => Ok(Entry::Context(name.clone())),
        Some(Node::Object(Object::Link(target))) if follow_links => {
            if depth >= MAX_LINK_DEPTH {
                return Err(NamingError::Other {
                    message: format!("too many link hops resolving '{name}'"),
                });
            }
            trace!("following link '{name}' -> '{target}'");
            resolve(root, target, true, depth + 1)
        }
        Some(Node::Object(object)) => Ok(Entry::Object(object.clone())),
    }
}

impl Directory for InMemoryDirectory {
    fn lookup(&self, name: &Name) -> Result<Entry<Name>, NamingError> {
        resolve(&self.root(), name, true, 0)
    }

    fn bind(&self, name: &Name, object: Object) -> Result<(), NamingError> {
        let (parent, last) = split(name)?;
        let mut root = self.root();
        let bindings = context_mut(&mut root, &parent)?;
        if bindings.contains_key(last) {
            return Err(NamingError::already_bound(name));
        }
        bindings.insert(last.to_string(), Node::Object(object));
        Ok(())
    }

    fn rebind(&self, name: &Name, object: Object) -> Result<(), NamingError> {
        let (parent, last) = split(name)?;
        let mut root = self.root();
        context_mut(&mut root, &parent)?.insert(last.to_string(), Node::Object(object));
        Ok(())
    }

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, NamingError> {
        let root = self.root();
        let bindings = context(&root, name)?;
        Ok(bindings
            .iter()
            .map(|(key, node)| NameClassPair {
                name: key.clone(),
                class_name: match node {
                    Node::Object(o) => o.class_name().to_string(),
                    Node::Context(_) => super::CONTEXT_CLASS.to_string(),
                },
            })
            .collect())
    }

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding<Entry<Name>>>, NamingError> {
        let root = self.root();
        let bindings = context(&root, name)?;
        Ok(bindings
            .iter()
            .map(|(key, node)| {
                let value = match node {
                    Node::Object(o) => Entry::Object(o.clone()),
                    Node::Context(_) => Entry::Context(name.child(key)),
                };
                Binding::new(key.clone(), value)
            })
            .collect())
    }

    fn unbind(&self, name: &Name) -> Result<(), NamingError> {
        let (parent, last) = split(name)?;
        let mut root = self.root();
        match context_mut(&mut root, &parent)?.remove(last) {
            Some(_) => Ok(()),
            None => Err(NamingError::not_found(name)),
        }
    }

    fn rename(&self, name: &Name, new_name: &Name) -> Result<(), NamingError> {
        let (parent, last) = split(name)?;
        let (new_parent, new_last) = split(new_name)?;
        if new_name.starts_with(name) {
            return Err(NamingError::invalid(
                new_name,
                "a binding cannot be moved beneath itself",
            ));
        }

        let mut root = self.root();
        if !context(&root, &parent)?.contains_key(last) {
            return Err(NamingError::not_found(name));
        }
        if context(&root, &new_parent)?.contains_key(new_last) {
            return Err(NamingError::already_bound(new_name));
        }

        let node = context_mut(&mut root, &parent)?
            .remove(last)
            .ok_or_else(|| NamingError::not_found(name))?;
        context_mut(&mut root, &new_parent)?.insert(new_last.to_string(), node);
        Ok(())
    }

    fn create_subcontext(&self, name: &Name) -> Result<Name, NamingError> {
        let (parent, last) = split(name)?;
        let mut root = self.root();
        let bindings = context_mut(&mut root, &parent)?;
        if bindings.contains_key(last) {
            return Err(NamingError::already_bound(name));
        }
        bindings.insert(last.to_string(), Node::Context(Bindings::new()));
        Ok(name.clone())
    }

    fn destroy_subcontext(&self, name: &Name) -> Result<(), NamingError> {
        let (parent, last) = split(name)?;
        let mut root = self.root();
        let bindings = context_mut(&mut root, &parent)?;
        match bindings.get(last) {
            None => Err(NamingError::not_found(name)),
            Some(Node::Object(_)) => Err(NamingError::not_context(name)),
            Some(Node::Context(children)) if !children.is_empty() => {
                Err(NamingError::ContextNotEmpty {
                    name: name.to_string(),
                })
            }
            Some(Node::Context(_)) => {
                bindings.remove(last);
                Ok(())
            }
        }
    }

    fn lookup_link(&self, name: &Name) -> Result<Entry<Name>, NamingError> {
        resolve(&self.root(), name, false, 0)
    }
}
