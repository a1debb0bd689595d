use std::{error::Error, sync::Arc};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{
    Engine, LogFilter, MoneyCents, NewAccountCmd, TransactionRequest,
    queue::{DbJobStore, JobId, TransactionQueue, Worker},
};
use migration::{Migrator, MigratorTrait};
use serde::Serialize;
use uuid::Uuid;

mod settings;

type AppResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "moneta")]
#[command(about = "Transactional money movement between accounts")]
struct Cli {
    /// Configuration file, without extension.
    #[arg(long, default_value = "settings")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process queued transactions until Ctrl-C.
    Worker,
    User(User),
    Account(Account),
    Tx(Tx),
    Job(Job),
    /// Query the ledger, newest first.
    Logs(LogsArgs),
}

#[derive(Args, Debug)]
struct User {
    #[command(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    Create {
        #[arg(long)]
        username: String,
    },
}

#[derive(Args, Debug)]
struct Account {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Create {
        #[arg(long)]
        number: String,
        #[arg(long, default_value = "0")]
        balance: MoneyCents,
        /// Owner user id; repeat for joint accounts.
        #[arg(long = "owner")]
        owners: Vec<Uuid>,
    },
    Show {
        #[arg(long, conflicts_with = "number", required_unless_present = "number")]
        id: Option<Uuid>,
        #[arg(long)]
        number: Option<String>,
    },
}

#[derive(Args, Debug)]
struct Tx {
    #[command(subcommand)]
    command: TxCommand,
}

#[derive(Args, Debug)]
struct TxOptions {
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    idempotency_key: Option<String>,
    /// Enqueue the request and print the job id instead of settling it now.
    #[arg(long)]
    queued: bool,
}

#[derive(Subcommand, Debug)]
enum TxCommand {
    Deposit {
        #[arg(long)]
        account: Uuid,
        #[arg(long)]
        amount: MoneyCents,
        #[command(flatten)]
        options: TxOptions,
    },
    Withdraw {
        #[arg(long)]
        account: Uuid,
        #[arg(long)]
        amount: MoneyCents,
        #[command(flatten)]
        options: TxOptions,
    },
    Transfer {
        #[arg(long)]
        from: Uuid,
        #[arg(long)]
        to: Uuid,
        #[arg(long)]
        amount: MoneyCents,
        #[command(flatten)]
        options: TxOptions,
    },
    Show {
        id: Uuid,
    },
}

#[derive(Args, Debug)]
struct Job {
    #[command(subcommand)]
    command: JobCommand,
}

#[derive(Subcommand, Debug)]
enum JobCommand {
    Status { id: JobId },
    Cancel { id: JobId },
}

#[derive(Args, Debug)]
struct LogsArgs {
    #[arg(long)]
    account_number: Option<String>,
    /// Inclusive lower bound, RFC 3339.
    #[arg(long)]
    from: Option<DateTime<Utc>>,
    /// Inclusive upper bound, RFC 3339.
    #[arg(long)]
    to: Option<DateTime<Utc>>,
    #[arg(long, default_value_t = 50)]
    limit: u64,
    #[arg(long)]
    cursor: Option<String>,
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    let settings = settings::Settings::new(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "moneta={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let database = sea_orm::Database::connect(&settings.database.url).await?;
    Migrator::up(&database, None).await?;

    let engine = Engine::builder()
        .database(database.clone())
        .retry(settings.retry.clone())
        .build()
        .await?;
    let store = Arc::new(DbJobStore::new(database));
    let queue = TransactionQueue::new(store.clone(), settings.queue.clone());

    match cli.command {
        Command::Worker => {
            let worker = Worker::new(engine, store, settings.queue.clone());
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = tokio::spawn(worker.run(shutdown_rx));
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown requested");
            shutdown_tx.send(true)?;
            handle.await??;
        }
        Command::User(User {
            command: UserCommand::Create { username },
        }) => print_json(&engine.create_user(&username).await?)?,
        Command::Account(Account { command }) => match command {
            AccountCommand::Create {
                number,
                balance,
                owners,
            } => {
                let cmd = owners
                    .into_iter()
                    .fold(NewAccountCmd::new(number).initial_balance(balance), |cmd, owner| {
                        cmd.owner(owner)
                    });
                print_json(&engine.create_account(cmd).await?)?;
            }
            AccountCommand::Show { id, number } => {
                let account = match (id, number) {
                    (Some(id), _) => engine.account(id).await?,
                    (None, Some(number)) => engine.account_by_number(&number).await?,
                    (None, None) => return Err("either --id or --number is required".into()),
                };
                print_json(&account)?;
            }
        },
        Command::Tx(Tx { command }) => match command {
            TxCommand::Deposit {
                account,
                amount,
                options,
            } => submit(&engine, &queue, TransactionRequest::deposit(account, amount), options).await?,
            TxCommand::Withdraw {
                account,
                amount,
                options,
            } => {
                submit(&engine, &queue, TransactionRequest::withdrawal(account, amount), options)
                    .await?
            }
            TxCommand::Transfer {
                from,
                to,
                amount,
                options,
            } => {
                submit(&engine, &queue, TransactionRequest::transfer(from, to, amount), options)
                    .await?
            }
            TxCommand::Show { id } => print_json(&engine.transaction(id).await?)?,
        },
        Command::Job(Job { command }) => match command {
            JobCommand::Status { id } => print_json(&queue.status(id).await?)?,
            JobCommand::Cancel { id } => {
                if queue.cancel(id).await? {
                    println!("cancelled {id}");
                } else {
                    return Err(format!("job {id} is not pending").into());
                }
            }
        },
        Command::Logs(args) => {
            let filter = LogFilter {
                account_number: args.account_number,
                from: args.from,
                to: args.to,
            };
            let (logs, next) = engine
                .query_logs_page(&filter, args.limit, args.cursor.as_deref())
                .await?;
            print_json(&logs)?;
            if let Some(next) = next {
                println!("next cursor: {next}");
            }
        }
    }

    Ok(())
}

async fn submit(
    engine: &Engine,
    queue: &TransactionQueue,
    mut request: TransactionRequest,
    options: TxOptions,
) -> AppResult<()> {
    request.description = options.description;
    request.idempotency_key = options.idempotency_key;
    if options.queued {
        let job_id = queue.enqueue(request).await?;
        println!("{job_id}");
    } else {
        print_json(&engine.create_transaction_with_retry(request).await?)?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
