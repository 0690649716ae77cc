//! Command dispatcher.
//!
//! Resolves a [`TokenList`] against a [`CommandTable`] snapshot, runs the
//! handler, and renders the outcome for the connection's [`OutputMode`].
//!
//! Resolution failures ([`AppError::UnknownCommand`],
//! [`AppError::InvalidHandler`]) are returned as `Err` and end the
//! connection. Handler failures, including panics, are rendered as ordinary
//! output so the connection keeps serving requests.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, debug_span, warn, Instrument};

use crate::command::{CommandTable, Handler};
use crate::mode::OutputMode;
use crate::protocol::{Output, TokenList, ERROR_PREFIX};
use crate::{AppError, Result};

/// Name of the synthetic help command.
pub const HELP_COMMAND: &str = "help";

/// Construction options for a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// How outcomes are rendered.
    pub output: OutputMode,
    /// Provide `help` when the table does not register one.
    pub help: bool,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            output: OutputMode::Text,
            help: true,
        }
    }
}

/// Result of running one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Ordered result values.
    Success(Vec<String>),
    /// Failure message reported by the handler.
    Failure(String),
}

/// Resolved dispatch target.
enum Target {
    Help,
    Handler(Arc<dyn Handler>),
}

/// Per-connection command dispatcher.
pub struct Dispatcher {
    commands: Arc<CommandTable>,
    output: OutputMode,
    /// Help listing rendered at construction; `None` when help is not synthesised.
    help: Option<String>,
}

impl Dispatcher {
    /// Build a dispatcher over a table snapshot.
    #[must_use]
    pub fn new(commands: Arc<CommandTable>, options: DispatcherOptions) -> Self {
        let help = (options.help && !commands.contains(HELP_COMMAND))
            .then(|| help_listing(&commands));
        Self {
            commands,
            output: options.output,
            help,
        }
    }

    /// Resolve, run, and render one request.
    ///
    /// Consumes the command name from the front of `tokens`; the remaining
    /// tokens become positional arguments.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::UnknownCommand`] for an empty or unregistered
    /// name and [`AppError::InvalidHandler`] for a command without a bound
    /// handler. No handler runs in either case.
    pub async fn dispatch(&self, mut tokens: TokenList) -> Result<Output> {
        let name = if tokens.is_empty() {
            String::new()
        } else {
            tokens.remove(0)
        };
        let outcome = self.invoke(&name, tokens).await?;
        Ok(self.render(outcome))
    }

    /// Resolve `name` and run it with `args`.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn invoke(&self, name: &str, args: Vec<String>) -> Result<Outcome> {
        let target = self.resolve(name)?;
        let span = debug_span!("cmd_dispatch", command = %name);
        let outcome = match target {
            Target::Help => Outcome::Success(vec![self.help.clone().unwrap_or_default()]),
            Target::Handler(handler) => run_handler(handler, args).instrument(span).await,
        };

        if let Outcome::Failure(ref message) = outcome {
            warn!(command = %name, error = %message, "command failed");
        } else {
            debug!(command = %name, "command completed");
        }
        Ok(outcome)
    }

    /// Render an outcome according to the output mode.
    #[must_use]
    pub fn render(&self, outcome: Outcome) -> Output {
        match (self.output, outcome) {
            (OutputMode::Text, Outcome::Success(values)) => {
                let mut line = values.join(" ");
                line.push('\n');
                Output::Text(line)
            }
            (OutputMode::Text, Outcome::Failure(message)) => {
                Output::Text(format!("{ERROR_PREFIX}{message}\n"))
            }
            (OutputMode::Structured, Outcome::Success(values)) => Output::Values(values),
            (OutputMode::Structured, Outcome::Failure(message)) => Output::Failure { error: message },
        }
    }

    fn resolve(&self, name: &str) -> Result<Target> {
        match self.commands.get(name) {
            Some(command) => command
                .handler()
                .map(|handler| Target::Handler(Arc::clone(handler)))
                .ok_or_else(|| AppError::InvalidHandler(name.to_owned())),
            None if name == HELP_COMMAND && self.help.is_some() => Ok(Target::Help),
            None => Err(AppError::UnknownCommand(name.to_owned())),
        }
    }
}

/// Run a handler on its own task and fold every way it can end into an
/// [`Outcome`].
///
/// The task is not aborted when the caller goes away; a result produced
/// after the connection closed is dropped.
async fn run_handler(handler: Arc<dyn Handler>, args: Vec<String>) -> Outcome {
    let task = tokio::spawn(async move { handler.call(args).await });
    match task.await {
        Ok(Ok(values)) => Outcome::Success(values),
        Ok(Err(err)) => Outcome::Failure(err.to_string()),
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            Outcome::Failure(format!("handler panicked: {}", panic_message(&*payload)))
        }
        Err(err) => Outcome::Failure(format!("handler cancelled: {err}")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Render the help listing: one line per command, names padded to a common
/// column, followed by the declared argument names.
#[must_use]
pub fn help_listing(commands: &CommandTable) -> String {
    let width = commands.names().map(str::len).max().unwrap_or(0);
    commands
        .iter()
        .map(|command| {
            let line = format!(
                "{:<width$}  {}",
                command.name(),
                command.arguments().join(" ")
            );
            line.trim_end().to_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
