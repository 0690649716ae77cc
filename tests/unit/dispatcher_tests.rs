//! Unit tests for command resolution, handler outcomes, and rendering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cmdsock::command::dispatcher::help_listing;
use cmdsock::command::{
    Command, CommandTable, Dispatcher, DispatcherOptions, Handler, HandlerFuture, Outcome,
};
use cmdsock::protocol::Output;
use cmdsock::{AppError, OutputMode};

fn text() -> DispatcherOptions {
    DispatcherOptions {
        output: OutputMode::Text,
        help: true,
    }
}

fn structured() -> DispatcherOptions {
    DispatcherOptions {
        output: OutputMode::Structured,
        help: true,
    }
}

fn tokens(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|token| (*token).to_owned()).collect()
}

/// Table with a counting `test` echo handler, a failing handler, and an
/// unbound declaration.
fn sample_table(calls: &Arc<AtomicUsize>) -> CommandTable {
    let mut table = CommandTable::new();
    let counter = Arc::clone(calls);
    table
        .register(Command::new(
            "test",
            ["text"],
            move |args: Vec<String>| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, AppError>(args) }
            },
        ))
        .expect("register test");
    table
        .register(Command::new("three", Vec::<String>::new(), |_args: Vec<String>| async {
            Ok::<_, AppError>(vec!["one".to_owned(), "two".to_owned(), "three".to_owned()])
        }))
        .expect("register three");
    table
        .register(Command::new("fail", Vec::<String>::new(), |_args: Vec<String>| async {
            Err::<Vec<String>, _>(AppError::Handler("boom".into()))
        }))
        .expect("register fail");
    table
        .register(Command::declared("unbound", ["target"]))
        .expect("register unbound");
    table
}

fn dispatcher(options: DispatcherOptions) -> (Dispatcher, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let table = sample_table(&calls);
    (Dispatcher::new(Arc::new(table), options), calls)
}

#[tokio::test]
async fn unknown_command_fails_without_invoking_any_handler() {
    let (dispatcher, calls) = dispatcher(text());

    let result = dispatcher.dispatch(tokens(&["nope", "x"])).await;

    assert_eq!(result, Err(AppError::UnknownCommand("nope".into())));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_command_name_is_unknown() {
    let (dispatcher, calls) = dispatcher(text());

    let result = dispatcher.dispatch(vec![String::new()]).await;

    assert_eq!(result, Err(AppError::UnknownCommand(String::new())));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_token_list_is_unknown() {
    let (dispatcher, _calls) = dispatcher(text());

    let result = dispatcher.dispatch(Vec::new()).await;

    assert_eq!(result, Err(AppError::UnknownCommand(String::new())));
}

#[tokio::test]
async fn command_names_are_case_sensitive() {
    let (dispatcher, calls) = dispatcher(text());

    let result = dispatcher.dispatch(tokens(&["TEST", "x"])).await;

    assert_eq!(result, Err(AppError::UnknownCommand("TEST".into())));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unbound_command_is_an_invalid_handler() {
    let (dispatcher, _calls) = dispatcher(text());

    let result = dispatcher.dispatch(tokens(&["unbound", "x"])).await;

    assert_eq!(result, Err(AppError::InvalidHandler("unbound".into())));
}

#[tokio::test]
async fn arguments_follow_the_command_name() {
    let (dispatcher, calls) = dispatcher(text());

    let output = dispatcher
        .dispatch(tokens(&["test", "Wonderland Forever"]))
        .await
        .expect("dispatch");

    assert_eq!(output, Output::Text("Wonderland Forever\n".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn text_mode_joins_results_with_spaces() {
    let (dispatcher, _calls) = dispatcher(text());

    let output = dispatcher
        .dispatch(tokens(&["three"]))
        .await
        .expect("dispatch");

    assert_eq!(output, Output::Text("one two three\n".into()));
}

#[tokio::test]
async fn structured_mode_keeps_result_order() {
    let (dispatcher, _calls) = dispatcher(structured());

    let output = dispatcher
        .dispatch(tokens(&["three"]))
        .await
        .expect("dispatch");

    assert_eq!(
        output,
        Output::Values(vec!["one".into(), "two".into(), "three".into()])
    );
}

#[tokio::test]
async fn handler_error_is_rendered_not_escalated() {
    let (dispatcher, _calls) = dispatcher(text());

    let output = dispatcher
        .dispatch(tokens(&["fail"]))
        .await
        .expect("handler errors must not fail dispatch");

    assert_eq!(output, Output::Text("ERROR: boom\n".into()));
}

#[tokio::test]
async fn handler_error_in_structured_mode_is_an_error_object() {
    let (dispatcher, _calls) = dispatcher(structured());

    let output = dispatcher
        .dispatch(tokens(&["fail"]))
        .await
        .expect("dispatch");

    assert_eq!(
        output,
        Output::Failure {
            error: "boom".into()
        }
    );
}

#[tokio::test]
async fn panic_while_running_becomes_handler_failure() {
    let mut table = CommandTable::new();
    table
        .register(Command::new("explode", Vec::<String>::new(), |_args: Vec<String>| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, AppError>(Vec::new())
        }))
        .expect("register");
    let dispatcher = Dispatcher::new(Arc::new(table), text());

    let outcome = dispatcher
        .invoke("explode", Vec::new())
        .await
        .expect("panics are handler failures, not dispatch errors");

    assert_eq!(outcome, Outcome::Failure("handler panicked: kaboom".into()));
}

/// Handler that panics before producing a future.
struct PanicsOnCall;

impl Handler for PanicsOnCall {
    fn call(&self, _args: Vec<String>) -> HandlerFuture {
        panic!("refused to start")
    }
}

#[tokio::test]
async fn panic_while_starting_becomes_handler_failure() {
    let mut table = CommandTable::new();
    table
        .register(Command::new("refuse", Vec::<String>::new(), PanicsOnCall))
        .expect("register");
    let dispatcher = Dispatcher::new(Arc::new(table), text());

    let output = dispatcher
        .dispatch(tokens(&["refuse"]))
        .await
        .expect("dispatch");

    assert_eq!(
        output,
        Output::Text("ERROR: handler panicked: refused to start\n".into())
    );
}

#[tokio::test]
async fn asynchronous_handler_result_is_awaited() {
    let mut table = CommandTable::new();
    table
        .register(Command::new("later", Vec::<String>::new(), |_args: Vec<String>| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, AppError>(vec!["done".to_owned()])
        }))
        .expect("register");
    let dispatcher = Dispatcher::new(Arc::new(table), text());

    let output = dispatcher
        .dispatch(tokens(&["later"]))
        .await
        .expect("dispatch");

    assert_eq!(output, Output::Text("done\n".into()));
}

#[tokio::test]
async fn synthetic_help_lists_commands_with_arguments() {
    let mut table = CommandTable::new();
    let noop = |_args: Vec<String>| async { Ok::<_, AppError>(Vec::new()) };
    table
        .register(Command::new("resetPassword", ["email"], noop))
        .expect("register resetPassword");
    table
        .register(Command::new("ping", Vec::<String>::new(), noop))
        .expect("register ping");
    table
        .register(Command::new("grant", ["user", "role"], noop))
        .expect("register grant");
    let dispatcher = Dispatcher::new(Arc::new(table), text());

    let output = dispatcher
        .dispatch(tokens(&["help"]))
        .await
        .expect("help is synthesised");

    let expected = format!(
        "{:<13}  user role\n{:<13}\n{:<13}  email\n",
        "grant", "ping", "resetPassword"
    );
    let expected = expected
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        + "\n";
    assert_eq!(output, Output::Text(expected));
}

#[tokio::test]
async fn help_listing_has_one_line_per_registered_command() {
    let calls = Arc::new(AtomicUsize::new(0));
    let table = sample_table(&calls);

    let listing = help_listing(&table);

    assert_eq!(listing.lines().count(), table.len());
    for name in table.names() {
        assert!(
            listing.lines().any(|line| line.starts_with(name)),
            "listing must mention {name}: {listing}"
        );
    }
    assert!(
        !listing.lines().any(|line| line.starts_with("help")),
        "synthetic help does not list itself"
    );
    assert!(listing.contains(&format!("{:<7}  text", "test")));
    assert!(listing.contains(&format!("{:<7}  target", "unbound")));
}

#[tokio::test]
async fn help_can_be_disabled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(
        Arc::new(sample_table(&calls)),
        DispatcherOptions {
            output: OutputMode::Text,
            help: false,
        },
    );

    let result = dispatcher.dispatch(tokens(&["help"])).await;

    assert_eq!(result, Err(AppError::UnknownCommand("help".into())));
}

#[tokio::test]
async fn registered_help_takes_precedence() {
    let mut table = CommandTable::new();
    table
        .register(Command::new("help", Vec::<String>::new(), |_args: Vec<String>| async {
            Ok::<_, AppError>(vec!["custom".to_owned()])
        }))
        .expect("register help");
    let dispatcher = Dispatcher::new(Arc::new(table), text());

    let output = dispatcher
        .dispatch(tokens(&["help"]))
        .await
        .expect("dispatch");

    assert_eq!(output, Output::Text("custom\n".into()));
}

#[tokio::test]
async fn help_reflects_the_table_snapshot() {
    let calls = Arc::new(AtomicUsize::new(0));
    let snapshot = Arc::new(sample_table(&calls));
    let dispatcher = Dispatcher::new(Arc::clone(&snapshot), text());

    let mut newer = (*snapshot).clone();
    newer
        .register(Command::declared("added_later", Vec::<String>::new()))
        .expect("register");

    let output = dispatcher
        .dispatch(tokens(&["help"]))
        .await
        .expect("dispatch");
    let Output::Text(listing) = output else {
        panic!("text mode renders text");
    };
    assert!(!listing.contains("added_later"));
}
