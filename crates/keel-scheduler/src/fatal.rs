use log::error;

use crate::error::TaskError;

/// Receives every uncaught task failure.
///
/// The runtime never restarts an actor on its own; the handler is where an
/// owning subsystem decides whether to tear the actor down and resubmit it.
pub trait FatalErrorHandler: Send + Sync {
    fn on_fatal_error(&self, actor: &str, error: &TaskError);
}

/// Default handler: logs and carries on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFatalErrorHandler;

impl FatalErrorHandler for LogFatalErrorHandler {
    fn on_fatal_error(&self, actor: &str, error: &TaskError) {
        error!("Uncaught failure in actor {}: {}", actor, error);
    }
}

impl<F> FatalErrorHandler for F
where
    F: Fn(&str, &TaskError) + Send + Sync,
{
    fn on_fatal_error(&self, actor: &str, error: &TaskError) {
        self(actor, error)
    }
}
