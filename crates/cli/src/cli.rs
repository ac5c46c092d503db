use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "mess",
    about = "Hostel mess ledger: seats, meals, groceries and bills",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file; overrides the config
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum HostelKind {
    Boys,
    Girls,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or migrate the database
    Init,
    /// Register users
    #[command(subcommand)]
    User(UserCommand),
    /// Create and inspect hostels
    #[command(subcommand)]
    Hostel(HostelCommand),
    /// Seat maintenance
    #[command(subcommand)]
    Seats(SeatsCommand),
    /// Close billing periods
    #[command(subcommand)]
    Period(PeriodCommand),
    /// Compute the bill for a date range
    Bill(RangeArgs),
    /// List meal records for a date range
    Meals(RangeArgs),
    /// Show the price history of a grocery item
    Prices(PricesArgs),
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user without a password
    Register(RegisterArgs),
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum HostelCommand {
    /// Create a hostel
    Create(CreateHostelArgs),
    /// Show a hostel by short code
    Show { code: String },
}

#[derive(Args, Debug)]
pub struct CreateHostelArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub code: String,
    #[arg(long = "type", value_enum)]
    pub kind: HostelKind,
    #[arg(long)]
    pub address: String,
    #[arg(long)]
    pub total: u32,
    #[arg(long)]
    pub owner: Uuid,
    #[arg(long)]
    pub manager: Option<Uuid>,
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    pub longitude: Option<f64>,
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    pub latitude: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum SeatsCommand {
    /// Recount the seat breakdown from seat records
    Reconcile { code: String },
}

#[derive(Subcommand, Debug)]
pub enum PeriodCommand {
    /// Close a date range for edits
    Close(ClosePeriodArgs),
}

#[derive(Args, Debug)]
pub struct ClosePeriodArgs {
    pub code: String,
    #[arg(long)]
    pub from: NaiveDate,
    #[arg(long)]
    pub to: NaiveDate,
    /// User closing the period
    #[arg(long)]
    pub by: Uuid,
}

#[derive(Args, Debug)]
pub struct RangeArgs {
    pub code: String,
    #[arg(long)]
    pub from: NaiveDate,
    #[arg(long)]
    pub to: NaiveDate,
}

#[derive(Args, Debug)]
pub struct PricesArgs {
    pub name: String,
    /// Limit to one hostel
    #[arg(long)]
    pub hostel: Option<String>,
    /// Limit to one market
    #[arg(long)]
    pub market: Option<String>,
}
