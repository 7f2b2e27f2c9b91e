use std::sync::Arc;

use log::{debug, error, trace, warn};

use crate::{
    directory::{Directory, NamingError},
    transport::{Channel, Service},
};

use super::{
    codec::{FAILURE, FrameReader, FrameWriter, Marshalled, Marshaller, Tag, marshaller_for},
    command::Command,
    server_handshake,
    thread::ThreadPool,
};

/// Serves the naming protocol on every channel opened to it.
pub struct NamingService {
    directory: Arc<dyn Directory>,
    pool: ThreadPool,
}

impl NamingService {
    /// `workers` threads run commands for all channels.
    pub fn new(directory: Arc<dyn Directory>, workers: usize) -> Self {
        Self {
            directory,
            pool: ThreadPool::new("naming-server", workers),
        }
    }
}

impl Service for NamingService {
    fn serve(&self, channel: Channel) {
        let version = match server_handshake(&channel) {
            Ok(version) => version,
            Err(e) => {
                warn!("handshake with {} failed: {e}", channel.peer());
                return;
            }
        };
        let Some(marshaller) = marshaller_for(version) else {
            warn!("no marshaller for protocol version {version:#04x}");
            return;
        };

        let channel = Arc::new(channel);
        while let Ok(message) = channel.receive() {
            let directory = Arc::clone(&self.directory);
            let marshaller = Arc::clone(&marshaller);
            let channel = Arc::clone(&channel);
            self.pool.execute(move || {
                let Some(response) = dispatch(&message, directory.as_ref(), marshaller.as_ref())
                else {
                    return;
                };
                if let Err(e) = channel.send(response) {
                    debug!("failed to send response to {}: {e}", channel.peer());
                }
            });
        }
        debug!("naming channel from {} closed", channel.peer());
    }
}

/// Runs one request frame against `directory`, returning the response frame
/// to send back, if any.
pub fn dispatch(
    message: &[u8],
    directory: &dyn Directory,
    marshaller: &dyn Marshaller,
) -> Option<Vec<u8>> {
    let mut input = FrameReader::new(message, marshaller);
    let (id, correlation_id) = match input.header() {
        Ok(header) => header,
        Err(e) => {
            warn!("discarding malformed request: {e}");
            return None;
        }
    };
    let Some(entry) = Command::for_id(id) else {
        warn!("unsupported command id {id:#04x}, correlation id {correlation_id}");
        return None;
    };
    trace!(
        "running {} request, correlation id {correlation_id}",
        entry.command.operation()
    );

    let mut out = FrameWriter::new(marshaller, id, correlation_id);
    match (entry.handle_request)(&mut input, directory, &mut out) {
        Ok(()) => Some(out.finish()),
        // id 0 has nobody waiting for a reply
        Err(e) if correlation_id == 0 => {
            error!("failed to process {} request: {e}", entry.command.operation());
            None
        }
        Err(e) => {
            warn!(
                "failed to process {} request {correlation_id}: {e}",
                entry.command.operation()
            );
            let mut out = FrameWriter::new(marshaller, id, correlation_id);
            out.byte(FAILURE);
            let error = NamingError::Internal {
                message: e.to_string(),
            };
            match out.value(Tag::Exception, &Marshalled::Exception(error)) {
                Ok(()) => Some(out.finish()),
                Err(e) => {
                    error!("failed to encode failure response: {e}");
                    None
                }
            }
        }
    }
}
