use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use http::Method;
use may::sync::mpsc::Sender;
use tracing::{debug, error};

use crate::cache::{Cache, SharedCache};
use crate::context::ApiContext;
use crate::error::Error;

/// User callback bound to one HTTP method of a path.
pub type ApiAction = Arc<dyn Fn(&mut ApiContext) -> Result<(), Error> + Send + Sync>;

/// A path-bound group of method-keyed actions.
///
/// Built with [`ApiHandler::builder`]; registered on a server with
/// `add_path`. The handler owns the handler-tier cache, which lives as long
/// as the server holding it.
pub struct ApiHandler {
    path: String,
    actions: HashMap<Method, ApiAction>,
    error_tx: Option<Sender<Error>>,
    handler_cache: SharedCache,
}

impl std::fmt::Debug for ApiHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiHandler")
            .field("path", &self.path)
            .field("methods", &self.methods())
            .finish()
    }
}

impl ApiHandler {
    pub fn builder() -> ApiHandlerBuilder {
        ApiHandlerBuilder::default()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn methods(&self) -> Vec<Method> {
        self.actions.keys().cloned().collect()
    }

    pub(crate) fn handler_cache(&self) -> SharedCache {
        Arc::clone(&self.handler_cache)
    }

    /// Runs the action registered for the context's method.
    ///
    /// Returns false when no action is registered for the method, so the
    /// caller can answer 404. Action panics are caught and logged; action
    /// errors go to the error channel when one is installed.
    pub(crate) fn handle(&self, ctx: &mut ApiContext) -> bool {
        let action = match self.actions.get(&ctx.method) {
            Some(action) => action,
            None => return false,
        };
        debug!(request_id = %ctx.id, path = %self.path, method = %ctx.method, "dispatching action");
        let outcome = catch_unwind(AssertUnwindSafe(|| action(&mut *ctx)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(request_id = %ctx.id, path = %self.path, error = %err, "action failed");
                if let Some(tx) = &self.error_tx {
                    let _ = tx.send(err);
                }
            }
            Err(_) => {
                error!(request_id = %ctx.id, path = %self.path, "action panicked");
            }
        }
        true
    }
}

/// Builder for [`ApiHandler`].
#[derive(Default)]
pub struct ApiHandlerBuilder {
    path: String,
    actions: HashMap<Method, ApiAction>,
    error_tx: Option<Sender<Error>>,
}

impl ApiHandlerBuilder {
    /// Path filter for this handler, e.g. `/` or `/users/{id}`.
    pub fn with_path(mut self, path: impl Into<String>) -> ApiHandlerBuilder {
        self.path = path.into();
        self
    }

    /// Registers `action` for `method` on this path.
    pub fn on<F>(mut self, method: Method, action: F) -> ApiHandlerBuilder
    where
        F: Fn(&mut ApiContext) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.actions.insert(method, Arc::new(action));
        self
    }

    /// Installs a channel receiving asynchronous action errors.
    pub fn with_error_channel(mut self, tx: Sender<Error>) -> ApiHandlerBuilder {
        self.error_tx = Some(tx);
        self
    }

    pub fn build(self) -> Result<ApiHandler, Error> {
        if self.path.is_empty() {
            return Err(Error::InvalidConfig("handler has an empty path".to_string()));
        }
        if self.actions.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "handler for path {} has no method actions",
                self.path
            )));
        }
        Ok(ApiHandler {
            path: self.path,
            actions: self.actions,
            error_tx: self.error_tx,
            handler_cache: Cache::shared(),
        })
    }
}
