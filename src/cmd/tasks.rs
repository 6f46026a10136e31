//! Task commands — `tasklane tasks <list> [add|done|edit|rm|move]` and
//! `tasklane search`.

use anyhow::Result;
use console::style;

use tasklane::app::App;
use tasklane::models::{Task, TaskPatch};
use tasklane::store::tasks::CreateTask;

use crate::TaskCommands;

pub async fn cmd_tasks(app: &App, list: &str, command: Option<TaskCommands>) -> Result<()> {
    super::ensure_session(app).await?;

    app.lists.fetch().await?;
    let list_id = super::resolve_list(&app.lists.snapshot().lists, list)?;
    app.tasks.fetch(list_id).await?;

    match command {
        None => {
            show_tasks(&app.tasks.snapshot().tasks);
            Ok(())
        }
        Some(TaskCommands::Add {
            title,
            description,
            priority,
        }) => {
            let task = app
                .tasks
                .create(CreateTask {
                    title,
                    description,
                    priority,
                })
                .await?;
            println!(
                "{} Added {} ({})",
                style("✓").green(),
                style(&task.title).bold(),
                task.priority.as_str()
            );
            Ok(())
        }
        Some(TaskCommands::Done { task }) => {
            let id = super::resolve_task(&app.tasks.snapshot().tasks, &task)?;
            let updated = app.tasks.toggle_complete(id).await?;
            let mark = if updated.completed { "done" } else { "reopened" };
            println!("{} {} — {}", style("✓").green(), style(&updated.title).bold(), mark);
            Ok(())
        }
        Some(TaskCommands::Edit {
            task,
            title,
            description,
            priority,
        }) => {
            let id = super::resolve_task(&app.tasks.snapshot().tasks, &task)?;
            let updated = app
                .tasks
                .update(id, TaskPatch {
                    title,
                    description,
                    priority,
                    completed: None,
                    position: None,
                })
                .await?;
            println!("{} Updated {}", style("✓").green(), style(updated.title).bold());
            Ok(())
        }
        Some(TaskCommands::Rm { task }) => {
            let id = super::resolve_task(&app.tasks.snapshot().tasks, &task)?;
            app.tasks.delete(id).await?;
            println!("{} Deleted", style("✓").green());
            Ok(())
        }
        Some(TaskCommands::Move { from, to }) => {
            app.tasks
                .move_task(from.saturating_sub(1), to.saturating_sub(1))
                .await?;
            show_tasks(&app.tasks.snapshot().tasks);
            Ok(())
        }
    }
}

pub async fn cmd_search(app: &App, query: &str) -> Result<()> {
    super::ensure_session(app).await?;
    let hits = app.tasks.search(query).await?;
    if hits.is_empty() {
        println!("No tasks matching '{}'.", query);
        return Ok(());
    }
    show_tasks(&hits);
    Ok(())
}

fn show_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks here. Add one with `tasklane tasks <list> add <title>`.");
        return;
    }
    for (index, task) in tasks.iter().enumerate() {
        let check = if task.completed {
            style("[x]").green()
        } else {
            style("[ ]").dim()
        };
        let title = if task.completed {
            style(task.title.as_str()).dim().strikethrough()
        } else {
            style(task.title.as_str()).bold()
        };
        println!(
            "{:>3}. {} {}  {}",
            index + 1,
            check,
            title,
            style(task.priority.as_str()).dim()
        );
        if let Some(description) = &task.description {
            println!("         {}", style(description).dim());
        }
    }
}
