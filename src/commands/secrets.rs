use anyhow::{Context, Result};

use crate::api::client::AuthClient;
use crate::cli::{AppArgs, SecretSelector, SecretsCommand};
use crate::config::Config;
use crate::models::secret::Secret;
use crate::ui::Ui;

pub async fn run(config: &Config, command: SecretsCommand, ui: &dyn Ui) -> Result<()> {
    let client = config.client()?;

    match command {
        SecretsCommand::List { app } => {
            let secrets = client
                .list_secrets(&app.group_id, &app.app_id)
                .await
                .context("Failed to list secrets")?;
            if secrets.is_empty() {
                ui.info("No secrets");
            }
            for secret in secrets {
                ui.info(&format!("{}\t{}", secret.id, secret.name));
            }
        }
        SecretsCommand::Add { app, name, value } => {
            let secret = client
                .add_secret(&app.group_id, &app.app_id, &name, &value)
                .await
                .context("Failed to add secret")?;
            ui.info(&format!("Added secret {} ({})", secret.name, secret.id));
        }
        SecretsCommand::Update { app, secret, value } => {
            let existing = resolve(&client, &app, &secret).await?;
            client
                .update_secret(&app.group_id, &app.app_id, &existing.id, &existing.name, &value)
                .await
                .context("Failed to update secret")?;
            ui.info(&format!("Updated secret {}", existing.name));
        }
        SecretsCommand::Remove { app, secret } => {
            let existing = resolve(&client, &app, &secret).await?;
            client
                .remove_secret(&app.group_id, &app.app_id, &existing.id)
                .await
                .context("Failed to remove secret")?;
            ui.info(&format!("Removed secret {}", existing.name));
        }
    }

    Ok(())
}

/// Find the secret named by `--id` or `--name`.
async fn resolve(client: &AuthClient, app: &AppArgs, selector: &SecretSelector) -> Result<Secret> {
    let secrets = client
        .list_secrets(&app.group_id, &app.app_id)
        .await
        .context("Failed to list secrets")?;

    find_secret(secrets, selector)
}

fn find_secret(secrets: Vec<Secret>, selector: &SecretSelector) -> Result<Secret> {
    let wanted = selector
        .id
        .as_deref()
        .or(selector.name.as_deref())
        .unwrap_or_default();

    secrets
        .into_iter()
        .find(|secret| match (&selector.id, &selector.name) {
            (Some(id), _) => &secret.id == id,
            (None, Some(name)) => &secret.name == name,
            (None, None) => false,
        })
        .with_context(|| format!("Secret '{wanted}' not found"))
}
