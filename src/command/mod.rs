//! Command table and handler abstraction.
//!
//! A [`Handler`] is the unit of work bound to a command name. It receives
//! the positional arguments of one request and resolves, exactly once, to
//! either an ordered list of result values or an error. Any
//! `Fn(Vec<String>) -> impl Future<Output = Result<Vec<String>>>` closure is
//! a handler.
//!
//! Handlers are registered together with their argument names so that the
//! synthetic `help` command can describe them without introspection.

pub mod dispatcher;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{AppError, Result};

pub use dispatcher::{Dispatcher, DispatcherOptions, Outcome, HELP_COMMAND};

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'static>>;

/// Unit of work invoked for one request.
///
/// The returned future runs detached from the connection that issued the
/// request; it must therefore own everything it needs. Handlers are shared
/// by every connection and may be called concurrently.
pub trait Handler: Send + Sync {
    /// Start the command with its positional arguments.
    ///
    /// # Errors
    ///
    /// The future resolves to an error when the command fails. The message
    /// is reported to the caller and the connection stays open.
    fn call(&self, args: Vec<String>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
{
    fn call(&self, args: Vec<String>) -> HandlerFuture {
        Box::pin(self(args))
    }
}

/// A command table entry: name, declared argument names, and handler.
#[derive(Clone)]
pub struct Command {
    name: String,
    arguments: Vec<String>,
    handler: Option<Arc<dyn Handler>>,
}

impl Command {
    /// Describe a command backed by `handler`.
    pub fn new<H, I, S>(name: impl Into<String>, arguments: I, handler: H) -> Self
    where
        H: Handler + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            handler: Some(Arc::new(handler)),
        }
    }

    /// Describe a command whose handler has not been bound.
    ///
    /// Dispatching it fails with [`AppError::InvalidHandler`].
    pub fn declared<I, S>(name: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            handler: None,
        }
    }

    /// Command name as typed by callers.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared positional argument names, in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Bound handler, if any.
    #[must_use]
    pub fn handler(&self) -> Option<&Arc<dyn Handler>> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("bound", &self.handler.is_some())
            .finish()
    }
}

/// Mapping from case-sensitive command name to [`Command`].
///
/// Iteration is ordered by name, which keeps the help listing stable.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: BTreeMap<String, Command>,
}

impl CommandTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a command, returning the entry it replaced.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the command name is empty.
    pub fn register(&mut self, command: Command) -> Result<Option<Command>> {
        if command.name.is_empty() {
            return Err(AppError::Config("command name must not be empty".into()));
        }
        Ok(self.commands.insert(command.name.clone(), command))
    }

    /// Remove a command by name.
    pub fn unregister(&mut self, name: &str) -> Option<Command> {
        self.commands.remove(name)
    }

    /// Look up a command by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Whether a command with `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered names in listing order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Registered commands in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
