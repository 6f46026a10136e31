//! List commands — `tasklane lists [add|edit|rm|move|select]`.

use anyhow::Result;
use console::style;

use tasklane::app::App;
use tasklane::models::ListPatch;
use tasklane::store::lists::CreateList;

use crate::ListCommands;

pub async fn cmd_lists(app: &App, command: Option<ListCommands>) -> Result<()> {
    super::ensure_session(app).await?;

    match command {
        None => show_lists(app).await,
        Some(ListCommands::Add {
            name,
            description,
            color,
        }) => {
            let list = app
                .lists
                .create(CreateList {
                    name,
                    description,
                    color,
                })
                .await?;
            println!(
                "{} Created list {} at position {}",
                style("✓").green(),
                style(&list.name).bold(),
                list.position + 1
            );
            Ok(())
        }
        Some(ListCommands::Edit {
            list,
            name,
            description,
            color,
        }) => {
            app.lists.fetch().await?;
            let id = super::resolve_list(&app.lists.snapshot().lists, &list)?;
            let updated = app
                .lists
                .update(id, ListPatch {
                    name,
                    description,
                    color,
                    position: None,
                })
                .await?;
            println!("{} Updated {}", style("✓").green(), style(updated.name).bold());
            Ok(())
        }
        Some(ListCommands::Rm { list }) => {
            app.lists.fetch().await?;
            let id = super::resolve_list(&app.lists.snapshot().lists, &list)?;
            app.lists.delete(id).await?;
            println!("{} Deleted", style("✓").green());
            Ok(())
        }
        Some(ListCommands::Move { from, to }) => {
            app.lists.fetch().await?;
            // CLI positions are 1-based, matching the listing.
            app.lists.move_list(from.saturating_sub(1), to.saturating_sub(1)).await?;
            show_lists(app).await
        }
    }
}

async fn show_lists(app: &App) -> Result<()> {
    let lists = app.lists.fetch().await?;
    if lists.is_empty() {
        println!("No lists yet. Create one with `tasklane lists add <name>`.");
        return Ok(());
    }
    for (index, list) in lists.iter().enumerate() {
        let count = match list.task_count {
            1 => "1 task".to_string(),
            n => format!("{} tasks", n),
        };
        println!(
            "{:>3}. {}  {}  {}",
            index + 1,
            style(&list.name).bold(),
            style(&count).dim(),
            style(&list.color).dim()
        );
        if let Some(description) = &list.description {
            println!("     {}", style(description).dim());
        }
    }
    Ok(())
}
