use std::{collections::BTreeMap, fmt, fs, path::Path, sync::Arc, time::Duration};

use log::info;

use crate::{
    error::Error,
    protocol::DEFAULT_TIMEOUT,
    transport::{
        Anonymous, Authenticator, Destination, OptionMap, PasswordAuthenticator, TCP_NODELAY,
    },
};

use super::ConnectionDescriptor;

pub const PROVIDER_URL: &str = "remote.naming.provider.url";
pub const ENDPOINT_NAME: &str = "remote.naming.endpoint.name";
pub const CONNECT_TIMEOUT: &str = "remote.naming.connect.timeout";
pub const CHANNEL_TIMEOUT: &str = "remote.naming.channel.timeout";
pub const REQUEST_TIMEOUT: &str = "remote.naming.request.timeout";
pub const RANDOM_SERVER: &str = "remote.naming.random.server";
pub const PRINCIPAL: &str = "remote.naming.security.principal";
pub const CREDENTIALS: &str = "remote.naming.security.credentials";
pub const REALM: &str = "remote.naming.security.realm";

pub const ENDPOINT_OPTIONS_PREFIX: &str = "remote.naming.endpoint.create.options.";
pub const CONNECT_OPTIONS_PREFIX: &str = "remote.naming.connect.options.";
pub const PROVIDER_OPTIONS_PREFIX: &str = "remote.naming.remote.connectionprovider.create.options.";
pub const CHANNEL_OPTIONS_PREFIX: &str = "remote.naming.channel.options.";

pub const DEFAULT_ENDPOINT_NAME: &str = "config-based-naming-client-endpoint";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Flat `key=value` settings, as read from a properties file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value` lines. Blank lines and lines starting with `#`
    /// or `!` are skipped; a line without `=` sets the key to "".
    pub fn parse(text: &str) -> Self {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .map(|line| match line.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (line, ""),
            })
            .collect()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Entries under `prefix`, with the prefix stripped.
    pub fn options(&self, prefix: &str) -> OptionMap {
        self.0
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(prefix)
                    .filter(|key| !key.is_empty())
                    .map(|key| (key, value.as_str()))
            })
            .collect()
    }

    fn timeout(&self, key: &str, default: Duration) -> Duration {
        match self.get(key).map(str::parse::<u64>) {
            None => default,
            Some(Ok(millis)) => Duration::from_millis(millis),
            Some(Err(_)) => {
                info!(
                    "incorrect value {:?} for {key}, falling back to {} ms",
                    self.get(key).unwrap_or_default(),
                    default.as_millis()
                );
                default
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Everything needed to build a root context.
#[derive(Clone)]
pub struct ClientConfig {
    pub destinations: Vec<Destination>,
    pub endpoint_name: String,
    pub endpoint_options: OptionMap,
    pub provider_options: OptionMap,
    pub connect_options: OptionMap,
    pub connect_timeout: Duration,
    pub channel_options: OptionMap,
    pub channel_timeout: Duration,
    pub request_timeout: Duration,
    pub random_server: bool,
    pub authenticator: Arc<dyn Authenticator>,
}

impl ClientConfig {
    /// Configuration for the comma separated server list `urls`.
    pub fn new(urls: &str) -> Result<Self, Error> {
        let destinations = Destination::parse_list(urls)
            .map_err(|e| Error::Config(format!("invalid provider url '{urls}': {e}")))?;
        if destinations.is_empty() {
            return Err(Error::Config("no provider url given".into()));
        }
        Ok(Self {
            destinations,
            endpoint_name: DEFAULT_ENDPOINT_NAME.to_string(),
            endpoint_options: OptionMap::new(),
            provider_options: OptionMap::new(),
            connect_options: OptionMap::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_options: OptionMap::new(),
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            random_server: false,
            authenticator: Arc::new(Anonymous),
        })
    }

    pub fn from_properties(properties: &Properties) -> Result<Self, Error> {
        let urls = properties
            .get(PROVIDER_URL)
            .ok_or_else(|| Error::Config(format!("{PROVIDER_URL} is not set")))?;
        let mut config = Self::new(urls)?;

        if let Some(name) = properties.get(ENDPOINT_NAME) {
            config.endpoint_name = name.to_string();
        }
        config.endpoint_options = properties.options(ENDPOINT_OPTIONS_PREFIX);
        config.provider_options = properties.options(PROVIDER_OPTIONS_PREFIX);
        config.connect_options = properties.options(CONNECT_OPTIONS_PREFIX);
        config.channel_options = properties.options(CHANNEL_OPTIONS_PREFIX);
        config.connect_timeout = properties.timeout(CONNECT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT);
        config.channel_timeout = properties.timeout(CHANNEL_TIMEOUT, DEFAULT_CHANNEL_TIMEOUT);
        config.request_timeout = properties.timeout(REQUEST_TIMEOUT, DEFAULT_TIMEOUT);
        config.random_server = properties
            .get(RANDOM_SERVER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        if let Some(principal) = properties.get(PRINCIPAL) {
            let mut authenticator = PasswordAuthenticator::new(
                principal,
                properties.get(CREDENTIALS).unwrap_or_default(),
            );
            if let Some(realm) = properties.get(REALM) {
                authenticator = authenticator.with_realm(realm);
            }
            config.authenticator = Arc::new(authenticator);
        }
        Ok(config)
    }

    pub fn with_endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = name.into();
        self
    }

    pub fn with_connect_option(mut self, key: &str, value: &str) -> Self {
        self.connect_options.insert(key, value);
        self
    }

    pub fn with_channel_option(mut self, key: &str, value: &str) -> Self {
        self.channel_options.insert(key, value);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_random_server(mut self, random: bool) -> Self {
        self.random_server = random;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// One descriptor per server, in configuration order.
    pub fn descriptors(&self) -> Result<Vec<ConnectionDescriptor>, Error> {
        if self.destinations.is_empty() {
            return Err(Error::Config("no provider url given".into()));
        }
        let connect_options = OptionMap::new()
            .with(TCP_NODELAY, "true")
            .merged(&self.connect_options);
        Ok(self
            .destinations
            .iter()
            .map(|destination| ConnectionDescriptor {
                destination: destination.clone(),
                connect_options: connect_options.clone(),
                authenticator: Arc::clone(&self.authenticator),
                connect_timeout: self.connect_timeout,
                channel_options: self.channel_options.clone(),
                channel_timeout: self.channel_timeout,
            })
            .collect())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("destinations", &self.destinations)
            .field("endpoint_name", &self.endpoint_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("channel_timeout", &self.channel_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("random_server", &self.random_server)
            .field("authenticator", &self.authenticator.identity())
            .finish_non_exhaustive()
    }
}
