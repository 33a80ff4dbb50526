use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Reference day as YYYY-MM-DD. Activities starting the day after are reminded. Defaults to now.
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let report = process::send_reminders(args.date).await?;

    println!("Reminders for activities on {}: {}", report.date, report.reminders.len());
    for reminder in &report.reminders {
        println!("{}", process::summary_line(reminder));
    }

    Ok(())
}
