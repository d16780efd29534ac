use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use may::sync::mpsc::Sender;
use tracing::{debug, error};

use crate::cache::{Cache, SharedCache};
use crate::context::TcpContext;
use crate::encoding::Encoding;
use crate::error::Error;
use crate::stream::{SharedConn, StreamBuffer};

/// User callback run against one TCP connection.
pub type TcpAction = Arc<dyn Fn(&mut TcpContext) -> Result<(), Error> + Send + Sync>;

/// A named group of actions bound to a connection lifecycle.
///
/// Each accepted connection runs every registered handler; within one
/// handler the actions run sequentially in registration order, each with a
/// fresh [`TcpContext`] over the shared stream buffer.
pub struct TcpHandler {
    name: String,
    actions: Vec<(String, TcpAction)>,
    error_tx: Option<Sender<Error>>,
    handler_cache: SharedCache,
}

impl std::fmt::Debug for TcpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpHandler")
            .field("name", &self.name)
            .field("action_names", &self.action_names())
            .finish()
    }
}

impl TcpHandler {
    pub fn builder() -> TcpHandlerBuilder {
        TcpHandlerBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the registered actions, in execution order.
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Runs the handler against one connection.
    ///
    /// Blocks until data starts arriving on the buffer, then runs each
    /// action in order. Action panics are caught and logged; action errors
    /// go to the error channel when one is installed.
    pub(crate) fn handle(
        &self,
        conn: SharedConn,
        buffer: StreamBuffer,
        encoding: Encoding,
        server_cache: SharedCache,
    ) {
        debug!(handler = %self.name, "waiting for data read");
        buffer.wait();
        debug!(handler = %self.name, "data has been read");
        for (action_name, action) in &self.actions {
            let mut ctx = TcpContext::new(
                conn.clone(),
                buffer.clone(),
                encoding,
                Arc::clone(&self.handler_cache),
                Arc::clone(&server_cache),
            );
            let outcome = catch_unwind(AssertUnwindSafe(|| action(&mut ctx)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(handler = %self.name, action = %action_name, error = %err, "action failed");
                    if let Some(tx) = &self.error_tx {
                        let _ = tx.send(err);
                    }
                }
                Err(_) => {
                    error!(handler = %self.name, action = %action_name, "action panicked");
                }
            }
        }
    }
}

/// Builder for [`TcpHandler`].
#[derive(Default)]
pub struct TcpHandlerBuilder {
    name: String,
    actions: Vec<(String, TcpAction)>,
    error_tx: Option<Sender<Error>>,
}

impl TcpHandlerBuilder {
    /// Mandatory handler group name.
    pub fn with_name(mut self, name: impl Into<String>) -> TcpHandlerBuilder {
        self.name = name.into();
        self
    }

    /// Appends a named action to the execution list.
    pub fn with_action<F>(mut self, name: impl Into<String>, action: F) -> TcpHandlerBuilder
    where
        F: Fn(&mut TcpContext) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.actions.push((name.into(), Arc::new(action)));
        self
    }

    /// Installs a channel receiving asynchronous action errors.
    pub fn with_error_channel(mut self, tx: Sender<Error>) -> TcpHandlerBuilder {
        self.error_tx = Some(tx);
        self
    }

    pub fn build(self) -> Result<TcpHandler, Error> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("handler has an empty name".to_string()));
        }
        if self.actions.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "handler {} has no actions",
                self.name
            )));
        }
        Ok(TcpHandler {
            name: self.name,
            actions: self.actions,
            error_tx: self.error_tx,
            handler_cache: Cache::shared(),
        })
    }
}
