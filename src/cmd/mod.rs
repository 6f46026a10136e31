//! CLI command implementations.
//!
//! Each submodule owns one group of subcommands:
//!
//! | Module  | Commands handled                                  |
//! |---------|----------------------------------------------------|
//! | `auth`  | `login`, `signup`, `logout`, `whoami`, `reset-password` |
//! | `lists` | `lists` and its subcommands                        |
//! | `tasks` | `tasks`, its subcommands, and `search`             |
//! | `watch` | `watch`                                            |

pub mod auth;
pub mod lists;
pub mod tasks;
pub mod watch;

pub use auth::{cmd_login, cmd_logout, cmd_reset_password, cmd_signup, cmd_whoami};
pub use lists::cmd_lists;
pub use tasks::{cmd_search, cmd_tasks};
pub use watch::cmd_watch;

use anyhow::{Result, bail};

use tasklane::app::App;
use tasklane::models::{List, Task};
use uuid::Uuid;

/// Restore a persisted session and refuse to continue without one. Data
/// commands call this first; the backend would reject them anyway, but the
/// message here is friendlier.
pub(crate) async fn ensure_session(app: &App) -> Result<()> {
    // Transport errors during restore are not fatal here; the actual data
    // call will surface them with full context.
    let _ = app.auth.initialize().await;
    if !app.auth.is_authenticated() {
        bail!("Not signed in. Run `tasklane login <email>` first.");
    }
    Ok(())
}

/// Resolve a list selector: a UUID, a 1-based position as shown by
/// `tasklane lists`, or a case-insensitive name.
pub(crate) fn resolve_list(lists: &[List], selector: &str) -> Result<Uuid> {
    if let Ok(id) = selector.parse::<Uuid>() {
        if lists.iter().any(|l| l.id == id) {
            return Ok(id);
        }
        bail!("No list with id {}", id);
    }
    if let Ok(index) = selector.parse::<usize>() {
        if index >= 1 && index <= lists.len() {
            return Ok(lists[index - 1].id);
        }
        bail!("List position {} is out of range (1..={})", index, lists.len());
    }
    let matches: Vec<&List> = lists
        .iter()
        .filter(|l| l.name.eq_ignore_ascii_case(selector))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.id),
        [] => bail!("No list named '{}'", selector),
        _ => bail!("More than one list named '{}'; use its id", selector),
    }
}

/// Resolve a task selector the same way: UUID, 1-based position, or title.
pub(crate) fn resolve_task(tasks: &[Task], selector: &str) -> Result<Uuid> {
    if let Ok(id) = selector.parse::<Uuid>() {
        if tasks.iter().any(|t| t.id == id) {
            return Ok(id);
        }
        bail!("No task with id {}", id);
    }
    if let Ok(index) = selector.parse::<usize>() {
        if index >= 1 && index <= tasks.len() {
            return Ok(tasks[index - 1].id);
        }
        bail!("Task position {} is out of range (1..={})", index, tasks.len());
    }
    let matches: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.title.eq_ignore_ascii_case(selector))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.id),
        [] => bail!("No task titled '{}'", selector),
        _ => bail!("More than one task titled '{}'; use its id", selector),
    }
}
