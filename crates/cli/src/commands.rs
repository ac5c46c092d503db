use std::sync::Arc;

use anyhow::Context;
use mess_core::{
    Bill, GeoPoint, HostelType, MealRecord, MessConfig, MessService, NewHostel, NewUser,
    PricePoint, SystemClock,
};
use serde::Serialize;
use tracing::info;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => MessConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MessConfig::default(),
    };
    if let Some(db) = cli.db {
        config.database.path = Some(db);
    }

    let mess = MessService::open(config, Arc::new(SystemClock))?;
    let format = cli.format;
    info!(command = ?cli.command, ?format, "Running command");
    match cli.command {
        Command::Init => cmd_init(&mess, format),
        Command::User(UserCommand::Register(args)) => cmd_register(&mess, args, format),
        Command::Hostel(HostelCommand::Create(args)) => cmd_hostel_create(&mess, args, format),
        Command::Hostel(HostelCommand::Show { code }) => cmd_hostel_show(&mess, &code, format),
        Command::Seats(SeatsCommand::Reconcile { code }) => cmd_reconcile(&mess, &code, format),
        Command::Period(PeriodCommand::Close(args)) => cmd_close_period(&mess, args, format),
        Command::Bill(args) => cmd_bill(&mess, args, format),
        Command::Meals(args) => cmd_meals(&mess, args, format),
        Command::Prices(args) => cmd_prices(&mess, args, format),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(mess: &MessService, format: OutputFormat) -> anyhow::Result<()> {
    let version = mess.database().schema_version();
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "schema_version": version })),
        OutputFormat::Text => {
            println!("Database ready (schema version {version})");
            Ok(())
        }
    }
}

fn cmd_register(mess: &MessService, args: RegisterArgs, format: OutputFormat) -> anyhow::Result<()> {
    let user = mess.users().register_user(NewUser {
        name: args.name,
        phone: args.phone,
        email: args.email,
        password: None,
    })?;
    match format {
        OutputFormat::Json => print_json(&user),
        OutputFormat::Text => {
            println!("Registered {} ({})", user.name, user.id);
            Ok(())
        }
    }
}

fn cmd_hostel_create(
    mess: &MessService,
    args: CreateHostelArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let location = match (args.longitude, args.latitude) {
        (Some(longitude), Some(latitude)) => Some(GeoPoint::new(longitude, latitude)),
        _ => None,
    };
    let hostel = mess.create_hostel(NewHostel {
        name: args.name,
        short_code: args.code,
        hostel_type: match args.kind {
            HostelKind::Boys => HostelType::Boys,
            HostelKind::Girls => HostelType::Girls,
        },
        address: args.address,
        location,
        total_seats: args.total,
        owner_id: args.owner,
        manager_id: args.manager,
    })?;
    match format {
        OutputFormat::Json => print_json(&hostel),
        OutputFormat::Text => {
            println!("Created hostel {} [{}] ({})", hostel.name, hostel.short_code, hostel.id);
            Ok(())
        }
    }
}

fn cmd_hostel_show(mess: &MessService, code: &str, format: OutputFormat) -> anyhow::Result<()> {
    let hostel = mess.hostels().find_by_short_code(code)?;
    if format == OutputFormat::Json {
        return print_json(&hostel);
    }

    println!("{} [{}]", hostel.name, hostel.short_code);
    println!("  Type: {}", hostel.hostel_type.as_str());
    if let Some(address) = &hostel.address {
        println!("  Address: {address}");
    }
    let seats = hostel.seats;
    println!(
        "  Seats: {} total, {} occupied, {} available, {} in maintenance",
        seats.total, seats.occupied, seats.available_for_rent, seats.in_maintenance
    );
    let w = hostel.meal_weights;
    println!(
        "  Meal weights: breakfast {}, lunch {}, dinner {} (hundredths)",
        w.breakfast, w.lunch, w.dinner
    );
    if let Some(suspension) = &hostel.suspension {
        println!(
            "  Suspended {} to {}: {}",
            suspension.from, suspension.until, suspension.reason
        );
    }
    for rule in &hostel.rules {
        let fine = rule.fine.as_deref().unwrap_or("-");
        println!("  Rule {} [{}] {} (fine: {fine})", rule.order, rule.level.as_str(), rule.title);
    }
    Ok(())
}

fn cmd_reconcile(mess: &MessService, code: &str, format: OutputFormat) -> anyhow::Result<()> {
    let hostel = mess.hostels().find_by_short_code(code)?;
    let result = mess.seats().reconcile_hostel_seat_counts(hostel.id)?;
    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            let (b, a) = (result.before, result.after);
            println!(
                "Before: occupied {}, available {}, maintenance {} (total {})",
                b.occupied, b.available_for_rent, b.in_maintenance, b.total
            );
            println!(
                "After:  occupied {}, available {}, maintenance {} (total {})",
                a.occupied, a.available_for_rent, a.in_maintenance, a.total
            );
            if !result.drifted() {
                println!("No drift.");
            }
            Ok(())
        }
    }
}

fn cmd_close_period(
    mess: &MessService,
    args: ClosePeriodArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let hostel = mess.hostels().find_by_short_code(&args.code)?;
    let period = mess.close_billing_period(hostel.id, args.from, args.to, args.by)?;
    match format {
        OutputFormat::Json => print_json(&period),
        OutputFormat::Text => {
            println!("Closed {} to {} for {}", period.start, period.end, hostel.short_code);
            Ok(())
        }
    }
}

fn cmd_bill(mess: &MessService, args: RangeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let hostel = mess.hostels().find_by_short_code(&args.code)?;
    let bill = mess.compute_bill(hostel.id, args.from, args.to)?;
    match format {
        OutputFormat::Json => print_json(&bill),
        OutputFormat::Text => {
            print_bill(&bill);
            Ok(())
        }
    }
}

fn print_bill(bill: &Bill) {
    let status = if bill.is_final { "final" } else { "provisional" };
    println!("Bill {} to {} ({status})", bill.start, bill.end);
    println!(
        "  Grocery cost: {}  Meal units: {}.{:02}  Per unit: {:.2}",
        bill.total_grocery_cost,
        bill.total_meal_units / 100,
        bill.total_meal_units % 100,
        bill.cost_per_meal_unit / 100.0
    );
    for line in &bill.members {
        println!(
            "  {}  meals {:>10}  rent {:>10}  fines {:>8}  total {:>10}",
            line.user_id,
            line.meal_cost.to_string(),
            line.seat_rent.to_string(),
            line.fines.to_string(),
            line.total.to_string()
        );
    }
}

fn cmd_meals(mess: &MessService, args: RangeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let hostel = mess.hostels().find_by_short_code(&args.code)?;
    let records: Vec<MealRecord> = mess
        .meals()
        .meals_for_period(hostel.id, args.from, args.to)?
        .collect::<mess_core::Result<_>>()?;
    match format {
        OutputFormat::Json => print_json(&records),
        OutputFormat::Text => {
            for record in &records {
                let c = record.counts;
                println!(
                    "{}  {}  B{} L{} D{}  guests B{} L{} D{}",
                    record.date,
                    record.user_id,
                    c.breakfast,
                    c.lunch,
                    c.dinner,
                    c.breakfast_guests,
                    c.lunch_guests,
                    c.dinner_guests
                );
            }
            println!("{} records", records.len());
            Ok(())
        }
    }
}

fn cmd_prices(mess: &MessService, args: PricesArgs, format: OutputFormat) -> anyhow::Result<()> {
    let hostel_id = match &args.hostel {
        Some(code) => Some(mess.hostels().find_by_short_code(code)?.id),
        None => None,
    };
    let market_id = match &args.market {
        Some(name) => Some(
            mess.markets()
                .find_by_name(name)?
                .with_context(|| format!("market {name:?} not found"))?
                .id,
        ),
        None => None,
    };
    let points: Vec<PricePoint> = mess
        .grocery()
        .price_history(&args.name, hostel_id, market_id)
        .collect::<mess_core::Result<_>>()?;
    match format {
        OutputFormat::Json => print_json(&points),
        OutputFormat::Text => {
            for point in &points {
                println!("{}  {} / {}", point.date, point.price_per_unit, point.unit.as_str());
            }
            if points.is_empty() {
                println!("No purchases of {:?}", args.name);
            }
            Ok(())
        }
    }
}
