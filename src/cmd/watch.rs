//! Live change feed — `tasklane watch`.
//!
//! Tails both table feeds and prints one line per remote mutation until
//! interrupted. Useful for watching another device edit the same account.

use anyhow::Result;
use console::style;

use tasklane::app::App;
use tasklane::models::{ChangeEvent, EventType, List, Task};

pub async fn cmd_watch(app: &App) -> Result<()> {
    super::ensure_session(app).await?;

    let mut lists_feed = app.gateway.subscribe_lists();
    let mut tasks_feed = app.gateway.subscribe_tasks(None);
    println!("Watching for changes. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = lists_feed.recv() => match event {
                Some(event) => print_list_event(&event),
                None => {
                    println!("{}", style("lists feed closed").yellow());
                    break;
                }
            },
            event = tasks_feed.recv() => match event {
                Some(event) => print_task_event(&event),
                None => {
                    println!("{}", style("tasks feed closed").yellow());
                    break;
                }
            },
        }
    }
    Ok(())
}

fn print_list_event(event: &ChangeEvent<List>) {
    let name = event
        .new
        .as_ref()
        .or(event.old.as_ref())
        .map(|l| l.name.as_str())
        .unwrap_or("?");
    println!("{} list {}", marker(event.event_type), style(name).bold());
}

fn print_task_event(event: &ChangeEvent<Task>) {
    let title = event
        .new
        .as_ref()
        .or(event.old.as_ref())
        .map(|t| t.title.as_str())
        .unwrap_or("?");
    println!("{} task {}", marker(event.event_type), style(title).bold());
}

fn marker(event_type: EventType) -> console::StyledObject<&'static str> {
    match event_type {
        EventType::Insert => style("+").green(),
        EventType::Update => style("~").yellow(),
        EventType::Delete => style("-").red(),
    }
}
