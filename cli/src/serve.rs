use std::sync::Arc;

use anyhow::Result;
use mailroom::{Config, Database, Mailer, SmtpMailer};
use tokio_util::sync::CancellationToken;

pub fn cmd() -> clap::Command {
    clap::Command::new("serve")
        .display_order(10)
        .about("Start the http server and the campaign scheduler")
}

pub async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    let db = Database::new(&config.db)?;
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(&config)?);
    mailroom::axum::start_with(db, mailer, config, cancel).await?;
    Ok(())
}
