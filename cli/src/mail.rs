use anyhow::{Error, Result};
use clap::{Arg, ArgMatches, Command};

use mailroom::email::list;
use mailroom::email_log::EmailLog;
use mailroom::query::ListQuery;
use mailroom::{Campaign, Config, Database, Mailer, SmtpMailer};

pub fn cmds() -> Vec<Command> {
    vec![
        Command::new("subscribers")
            .display_order(20)
            .about("List newsletter subscribers")
            .arg(
                Arg::new("status")
                    .long("status")
                    .short('s')
                    .value_parser(["all", "active", "unsubscribed", "bounced"])
                    .help("Only show subscribers with the given status"),
            )
            .arg(limit_arg()),
        Command::new("campaigns")
            .display_order(21)
            .about("List newsletter campaigns with their stats")
            .arg(limit_arg()),
        Command::new("logs")
            .display_order(22)
            .about("List bulk email send logs")
            .arg(limit_arg()),
        Command::new("test-connection")
            .display_order(30)
            .about("Check that the smtp server accepts the configured credentials"),
    ]
}

fn limit_arg() -> Arg {
    Arg::new("limit")
        .long("limit")
        .short('n')
        .value_parser(clap::value_parser!(usize))
        .default_value("20")
        .help("Number of entries to show")
}

fn query(matches: &ArgMatches) -> ListQuery {
    ListQuery {
        limit: matches.get_one::<usize>("limit").copied(),
        status: matches.get_one::<String>("status").cloned(),
        ..Default::default()
    }
}

pub async fn run(name: &str, matches: &ArgMatches, config: &Config) -> Result<()> {
    if name == "test-connection" {
        let mailer = SmtpMailer::new(config)?;
        return match mailer.verify().await {
            Ok(()) => {
                println!("smtp server {} is reachable", config.email.smtp_server);
                Ok(())
            }
            Err(e) => Err(Error::msg(format!("smtp connection failed: {}", e.kind))),
        };
    }

    let db = Database::new(&config.db)?;
    match name {
        "subscribers" => {
            let page = list::list(&db, &query(matches))?;
            for s in &page.items {
                println!(
                    "{:<36} {:<14} {:<10} {}",
                    s.email,
                    s.status,
                    s.source,
                    s.subscribed_at.format("%Y-%m-%d")
                );
            }
            println!("showing {} of {}", page.items.len(), page.pagination.total);
        }
        "campaigns" => {
            let page = Campaign::list(&db, &query(matches))?;
            for c in &page.items {
                println!(
                    "{} {:<10} {:>5} sent {:>5} failed {:>5} opened  {}",
                    c.id, c.status, c.stats.sent, c.stats.failed, c.stats.opened, c.title
                );
            }
            println!("showing {} of {}", page.items.len(), page.pagination.total);
        }
        "logs" => {
            let page = EmailLog::list(&db, &query(matches))?;
            for l in &page.items {
                println!(
                    "{} {:<9} {:>4}/{:<4} {}{}",
                    l.id,
                    l.status,
                    l.success_count,
                    l.total_recipients,
                    if l.is_test_email { "[test] " } else { "" },
                    l.subject
                );
            }
            println!("showing {} of {}", page.items.len(), page.pagination.total);
        }
        _ => return Err(Error::msg(format!("unknown command: {name}"))),
    }

    Ok(())
}
