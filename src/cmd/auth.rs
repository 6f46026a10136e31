//! Account commands — `tasklane login`, `signup`, `logout`, `whoami`,
//! `reset-password`.

use anyhow::{Context, Result};
use console::style;
use dialoguer::Password;

use tasklane::app::App;

pub async fn cmd_login(app: &App, email: &str) -> Result<()> {
    let password = Password::new()
        .with_prompt(format!("Password for {}", email))
        .interact()
        .context("Failed to read password")?;

    app.auth.sign_in(email, &password).await?;

    let state = app.auth.snapshot();
    let name = state
        .profile
        .as_ref()
        .and_then(|p| p.full_name.clone())
        .unwrap_or_else(|| email.to_string());
    println!("{} Signed in as {}", style("✓").green(), style(name).bold());
    Ok(())
}

pub async fn cmd_signup(app: &App, email: &str, full_name: Option<&str>) -> Result<()> {
    let password = Password::new()
        .with_prompt("Choose a password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()
        .context("Failed to read password")?;

    let user = app.auth.sign_up(email, &password, full_name).await?;
    println!(
        "{} Account created for {}. Check your inbox to confirm the address, then run `tasklane login {}`.",
        style("✓").green(),
        style(&user.email).bold(),
        user.email
    );
    Ok(())
}

pub async fn cmd_logout(app: &App) -> Result<()> {
    let _ = app.auth.initialize().await;
    if !app.auth.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }
    app.auth.sign_out().await?;
    println!("{} Signed out", style("✓").green());
    Ok(())
}

pub async fn cmd_whoami(app: &App) -> Result<()> {
    super::ensure_session(app).await?;
    let state = app.auth.snapshot();
    let Some(user) = state.user else {
        anyhow::bail!("Not signed in. Run `tasklane login <email>` first.");
    };
    println!("{}", style(&user.email).bold());
    if let Some(profile) = state.profile {
        if let Some(full_name) = profile.full_name {
            println!("  name: {}", full_name);
        }
    }
    println!("  id:   {}", user.id);
    Ok(())
}

pub async fn cmd_reset_password(app: &App, email: &str) -> Result<()> {
    app.auth.reset_password(email).await?;
    println!(
        "{} If an account exists for {}, a reset mail is on its way.",
        style("✓").green(),
        email
    );
    Ok(())
}
