//! Atelier CLI - Database migrations and order management.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! atelier migrate
//!
//! # Show an order with its status history and notification log
//! atelier order show ord_0f3c...
//!
//! # Move an order forward (shell access is the operator's authorization)
//! atelier order transition ord_0f3c... READY_FOR_PICKUP --tracking SHELF-12
//!
//! # Send the current status email again
//! atelier notify resend ord_0f3c...
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use atelier_core::{OrderId, OrderStatus};

mod commands;

#[derive(Parser)]
#[command(name = "atelier")]
#[command(author, version, about = "Atelier CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Inspect and change orders
    Order {
        #[command(subcommand)]
        action: OrderAction,
    },
    /// Customer notifications
    Notify {
        #[command(subcommand)]
        action: NotifyAction,
    },
}

#[derive(Subcommand)]
enum OrderAction {
    /// Print an order, its status history and notifications as JSON
    Show {
        /// Order id
        order_id: String,
    },
    /// Request a status transition as an operator
    Transition {
        /// Order id
        order_id: String,

        /// Target status (`PROCESSING`, `READY_FOR_PICKUP`, `COMPLETED`, `CANCELLED`)
        status: String,

        /// Tracking or pickup reference to include in the email
        #[arg(short, long)]
        tracking: Option<String>,
    },
}

#[derive(Subcommand)]
enum NotifyAction {
    /// Re-send the email for the order's current status
    Resend {
        /// Order id
        order_id: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Order { action } => match action {
            OrderAction::Show { order_id } => {
                commands::order::show(&OrderId::new(order_id)).await?;
            }
            OrderAction::Transition {
                order_id,
                status,
                tracking,
            } => {
                let status = status
                    .parse::<OrderStatus>()
                    .map_err(commands::CliError::InvalidStatus)?;
                commands::order::transition(&OrderId::new(order_id), status, tracking.as_deref())
                    .await?;
            }
        },
        Commands::Notify { action } => match action {
            NotifyAction::Resend { order_id } => {
                commands::notify::resend(&OrderId::new(order_id)).await?;
            }
        },
    }
    Ok(())
}
