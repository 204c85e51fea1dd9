//! Shortest path to a running instance.
//!
//! Uses a throwaway database filled with mock subscribers and contacts, and a
//! transport that prints messages instead of sending them. Try:
//!
//! ```text
//! curl -H 'Authorization: Bearer dev' localhost:8001/newsletter/stats
//! ```

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mailroom::email::Outgoing;
use mailroom::{config, Config, Database, Mailer, Result};

struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, message: Outgoing) -> Result<String> {
        println!("to: {} | subject: {}", message.to, message.subject);
        Ok(format!("<{}@console>", uuid::Uuid::new_v4()))
    }

    async fn verify(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let config = Config {
        address: std::net::SocketAddr::from_str("127.0.0.1:8001").unwrap(),
        frontend_url: "http://127.0.0.1:8001".to_string(),
        admins: vec![config::Admin {
            name: "Dev".to_string(),
            email: "dev@localhost.test".to_string(),
            token: "dev".to_string(),
        }],
        dev: config::DevMode {
            enabled: true,
            mock: true,
        },
        ..Default::default()
    };

    let db = Database::temporary().expect("failed opening temporary db");
    mailroom::axum::start_with(db, Arc::new(ConsoleMailer), config, CancellationToken::new())
        .await
        .expect("failed")
}
