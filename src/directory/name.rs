use std::{convert::Infallible, fmt, str::FromStr};

use bincode::{Decode, Encode};

const SEPARATOR: char = '/';

/// Composite name made of string components, written as `a/b/c`.
///
/// The empty name designates the root context of a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct Name {
    components: Vec<String>,
}

impl Name {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components
                .into_iter()
                .map(Into::into)
                .filter(|c: &String| !c.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Appends every component of `other` to a copy of this name.
    pub fn join(&self, other: &Name) -> Name {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        Name { components }
    }

    pub fn child(&self, component: &str) -> Name {
        self.join(&Name::from(component))
    }

    /// Splits the name into its parent and final component.
    pub fn split_last(&self) -> Option<(Name, &str)> {
        let (last, parent) = self.components.split_last()?;
        Some((
            Name {
                components: parent.to_vec(),
            },
            last.as_str(),
        ))
    }

    pub fn last(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn starts_with(&self, prefix: &Name) -> bool {
        self.components.starts_with(&prefix.components)
    }
}

impl FromStr for Name {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Name::new(s.trim().split(SEPARATOR)))
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        let Ok(name) = value.parse::<Name>();
        name
    }
}

impl From<&Name> for Name {
    fn from(value: &Name) -> Self {
        value.clone()
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::from(value.as_str())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}
