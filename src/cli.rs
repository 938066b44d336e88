use crate::{
    api::StorefrontApi,
    cache::{LoadOutcome, ReferenceCache, Snapshot},
    config::Config,
    error::ApiError,
    models::{NewOrder, OrderLine, OrderStatus, Role},
    session::SessionStore,
};
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

/// Consecutive auth failures tolerated before the session is dropped
const MAX_AUTH_FAILURES: u32 = 3;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and persist the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ATELIER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create a customer account and log in
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "ATELIER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Clear the stored session
    Logout,
    /// Show the active identity
    Whoami,
    /// Catalogue items (cached)
    Items,
    /// Registered users (cached, admin)
    Users,
    /// Orders (cached, admin)
    Orders,
    /// Refetch all cached collections
    Refresh,
    /// Cache and session status
    Status,
    /// Rate a catalogue item from 1 to 5
    Rate { item_id: u64, rating: u8 },
    /// Change an order's status (admin)
    OrderStatus { order_id: u64, status: String },
    /// Place an order, e.g. `buy --item 4:2 --item 7 --address "1 Rue du Bois"`
    Buy {
        #[arg(long = "item", value_parser = parse_order_line, required = true)]
        items: Vec<OrderLine>,
        #[arg(long)]
        address: String,
        #[arg(long)]
        charity: Option<u64>,
    },
    /// Start payment for an order
    Pay { order_id: u64 },
    /// Contact form messages (admin)
    Contacts,
    /// Newsletter subscribers (admin)
    Newsletters,
    /// Subscribe an address to the newsletter
    Subscribe { email: String },
    /// Charities customers can donate to
    Charities,
    /// Interactive back-office console (default)
    Console,
}

/// One console line, parsed with the same grammar as the subcommands
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: Command,
}

pub struct Context {
    pub config: Config,
    pub api: Arc<StorefrontApi>,
    pub session: RefCell<SessionStore>,
    pub cache: ReferenceCache,
    auth_failures: Cell<u32>,
}

impl Context {
    pub fn new(
        config: Config,
        api: Arc<StorefrontApi>,
        session: SessionStore,
        cache: ReferenceCache,
    ) -> Self {
        Self {
            config,
            api,
            session: RefCell::new(session),
            cache,
            auth_failures: Cell::new(0),
        }
    }

    fn token(&self) -> Option<String> {
        self.session.borrow().get_token()
    }

    /// Count an auth failure; past the cap the session is dropped
    fn note_failure(&self, err: &ApiError) -> Result<()> {
        if !err.is_auth() {
            return Ok(());
        }
        let failures = self.auth_failures.get() + 1;
        self.auth_failures.set(failures);
        if failures >= MAX_AUTH_FAILURES {
            self.auth_failures.set(0);
            let route = self.session.borrow_mut().logout()?;
            self.cache.clear();
            println!("Too many authentication failures, session cleared. Log in again ({}).", route);
        }
        Ok(())
    }

    /// Turn an API failure into an application error, updating the auth-failure count
    fn fail(&self, err: ApiError) -> anyhow::Error {
        if let Err(e) = self.note_failure(&err) {
            return e;
        }
        anyhow!(describe(&err))
    }
}

/// User-facing text for an API failure
pub fn describe(err: &ApiError) -> String {
    match err {
        ApiError::AuthRequired => {
            format!("{}. Please log in again with `atelier login`.", err)
        }
        ApiError::AlreadyDone { message } => format!("Already done: {}", message),
        ApiError::ValidationFailed { message, fields } if !fields.is_empty() => {
            let mut out = message.clone();
            for (field, messages) in fields {
                out.push_str(&format!("\n  {}: {}", field, messages.join(" ")));
            }
            out
        }
        _ => err.to_string(),
    }
}

pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

pub fn run_once(ctx: &Context, command: Command) -> Result<()> {
    dispatch(ctx, command)
}

pub fn run_console(ctx: &Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("atelier - type help for commands, exit to quit");

    loop {
        let prompt = match ctx.session.borrow().current() {
            Some(identity) if identity.role == Role::Admin => "admin> ",
            Some(_) => "shop> ",
            None => "> ",
        };
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                // The idle check runs before this line resets the timer
                if let Some(route) = ctx.session.borrow_mut().expire_if_idle()? {
                    ctx.cache.clear();
                    println!("Session expired after inactivity. Log in again ({}).", route);
                }
                ctx.session.borrow_mut().touch();

                let words = match shell_words::split(line.trim_start_matches('/')) {
                    Ok(words) => words,
                    Err(e) => {
                        eprintln!("Input error: {}", e);
                        continue;
                    }
                };
                if matches!(words.first().map(String::as_str), Some("exit" | "quit")) {
                    break;
                }

                match ConsoleLine::try_parse_from(words) {
                    Ok(ConsoleLine {
                        command: Command::Console,
                    }) => println!("Already in the console."),
                    Ok(parsed) => match dispatch(ctx, parsed.command) {
                        Ok(()) => ctx.auth_failures.set(0),
                        Err(e) => eprintln!("Error: {}", e),
                    },
                    Err(e) => {
                        let _ = e.print();
                    }
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let (identity, token) = ctx.api.login(&email, &password).map_err(|e| ctx.fail(e))?;
            ctx.session.borrow_mut().login(identity, &token)?;
            ctx.auth_failures.set(0);
            print_whoami(ctx);
        }
        Command::Signup {
            name,
            email,
            password,
        } => {
            let (identity, token) = ctx
                .api
                .signup(&name, &email, &password)
                .map_err(|e| ctx.fail(e))?;
            ctx.session.borrow_mut().login(identity, &token)?;
            print_whoami(ctx);
        }
        Command::Logout => {
            let route = ctx.session.borrow_mut().logout()?;
            ctx.cache.clear();
            println!("Logged out ({}).", route);
        }
        Command::Whoami => print_whoami(ctx),
        Command::Items => {
            let outcome = ctx.cache.ensure_loaded(&ctx.session.borrow());
            show(ctx, &outcome, ctx.cache.items(), "items", |item| {
                format!(
                    "{:>5}  {:<32} {:>10.2}  {}",
                    item.id,
                    item.name,
                    item.price,
                    item.category.as_deref().unwrap_or("-")
                )
            })?;
        }
        Command::Users => {
            require_admin(ctx)?;
            let outcome = ctx.cache.ensure_loaded(&ctx.session.borrow());
            show(ctx, &outcome, ctx.cache.users(), "users", |user| {
                format!(
                    "{:>5}  {:<32} {:<6} {}",
                    user.id,
                    user.email,
                    user.role.as_str(),
                    user.name.as_deref().unwrap_or("")
                )
            })?;
        }
        Command::Orders => {
            require_admin(ctx)?;
            let outcome = ctx.cache.ensure_loaded(&ctx.session.borrow());
            show(ctx, &outcome, ctx.cache.orders(), "orders", |order| {
                format!(
                    "{:>5}  {:<12} {:>10.2}  {}",
                    order.id,
                    order.status,
                    order.total,
                    order.user_email.as_deref().unwrap_or("")
                )
            })?;
        }
        Command::Refresh => {
            let outcome = ctx.cache.refresh(&ctx.session.borrow());
            report_outcome(ctx, &outcome)?;
            print_status(ctx);
        }
        Command::Status => print_status(ctx),
        Command::Rate { item_id, rating } => {
            let token = ctx.token();
            let result = ctx
                .api
                .rate_item(item_id, rating, token.as_deref())
                .map_err(|e| ctx.fail(e))?;
            println!("{}", message_of(&result, "Thanks for rating!"));
        }
        Command::OrderStatus { order_id, status } => {
            require_admin(ctx)?;
            let status = OrderStatus::from_str(&status).ok_or_else(|| {
                anyhow!(
                    "Unknown status '{}'. Use pending, processing, shipped, delivered or cancelled",
                    status
                )
            })?;
            let token = ctx.token();
            ctx.api
                .update_order_status(order_id, status, token.as_deref())
                .map_err(|e| ctx.fail(e))?;
            println!("Order {} is now {}.", order_id, status.as_str());
            // Every view sees the change without fetching on its own
            let outcome = ctx.cache.refresh(&ctx.session.borrow());
            report_outcome(ctx, &outcome)?;
        }
        Command::Buy {
            items,
            address,
            charity,
        } => {
            let order = NewOrder {
                items,
                shipping_address: address,
                charity_id: charity,
            };
            let token = ctx.token();
            let created = ctx
                .api
                .create_order(&order, token.as_deref())
                .map_err(|e| ctx.fail(e))?;
            match created.get("id").and_then(|id| id.as_u64()) {
                Some(id) => println!("Order {} created. Pay with `pay {}`.", id, id),
                None => println!("{}", message_of(&created, "Order created.")),
            }
            if ctx.session.borrow().is_admin() {
                ctx.cache.invalidate();
            }
        }
        Command::Pay { order_id } => {
            let token = ctx.token();
            let receipt = ctx
                .api
                .pay(order_id, token.as_deref())
                .map_err(|e| ctx.fail(e))?;
            if let Some(url) = &receipt.payment_url {
                println!("Complete the payment at {}", url);
            } else {
                println!(
                    "Payment {}.",
                    receipt
                        .status
                        .as_deref()
                        .or(receipt.message.as_deref())
                        .unwrap_or("submitted")
                );
            }
        }
        Command::Contacts => {
            require_admin(ctx)?;
            let token = ctx.token();
            let contacts = ctx
                .api
                .list_contacts(token.as_deref())
                .map_err(|e| ctx.fail(e))?;
            for c in &contacts {
                println!(
                    "{:>5}  {:<28} {:<24} {}",
                    c.id,
                    c.email,
                    c.subject.as_deref().unwrap_or(""),
                    c.message.lines().next().unwrap_or("")
                );
            }
            println!("{} contacts", contacts.len());
        }
        Command::Newsletters => {
            require_admin(ctx)?;
            let token = ctx.token();
            let subs = ctx
                .api
                .list_newsletters(token.as_deref())
                .map_err(|e| ctx.fail(e))?;
            for s in &subs {
                println!(
                    "{:>5}  {:<32} {}",
                    s.id,
                    s.email,
                    s.subscribed_at.as_deref().unwrap_or("")
                );
            }
            println!("{} subscribers", subs.len());
        }
        Command::Subscribe { email } => {
            let result = ctx
                .api
                .subscribe_newsletter(&email)
                .map_err(|e| ctx.fail(e))?;
            println!("{}", message_of(&result, "Subscribed."));
        }
        Command::Charities => {
            let token = ctx.token();
            let charities = ctx
                .api
                .list_charities(token.as_deref())
                .map_err(|e| ctx.fail(e))?;
            for c in &charities {
                println!("{:>5}  {:<32} {}", c.id, c.name, c.description);
            }
        }
        Command::Console => run_console(ctx)?,
    }
    Ok(())
}

fn require_admin(ctx: &Context) -> Result<()> {
    if ctx.session.borrow().is_admin() {
        Ok(())
    } else {
        Err(anyhow!("Admin access required. Log in with an admin account."))
    }
}

/// A batch rejected for auth counts as one failure, however many collections it hit
fn report_outcome(ctx: &Context, outcome: &LoadOutcome) -> Result<()> {
    match outcome.errors().iter().find(|e| e.is_auth()) {
        Some(err) => {
            ctx.note_failure(err)?;
            Err(anyhow!(describe(err)))
        }
        None => Ok(()),
    }
}

/// Render one cached collection, flagging outdated data
fn show<T>(
    ctx: &Context,
    outcome: &LoadOutcome,
    snapshot: Snapshot<T>,
    name: &str,
    row: impl Fn(&T) -> String,
) -> Result<()> {
    report_outcome(ctx, outcome)?;
    for line in render(&snapshot, name, row)? {
        println!("{}", line);
    }
    Ok(())
}

fn render<T>(snapshot: &Snapshot<T>, name: &str, row: impl Fn(&T) -> String) -> Result<Vec<String>> {
    let Some(data) = snapshot.data() else {
        return match snapshot {
            Snapshot::Empty(Some(error)) => Err(anyhow!(
                "Could not load {}: {} (retry with refresh)",
                name,
                error
            )),
            _ => Ok(vec![format!("No {} loaded yet.", name)]),
        };
    };
    let mut lines: Vec<String> = data.iter().map(row).collect();
    match snapshot {
        Snapshot::Stale(_, error) => lines.push(format!(
            "{} {} (may be outdated: {}; retry with refresh)",
            data.len(),
            name,
            error
        )),
        _ => lines.push(format!("{} {}", data.len(), name)),
    }
    Ok(lines)
}

fn print_whoami(ctx: &Context) {
    let session = ctx.session.borrow();
    match session.current() {
        Some(identity) => {
            println!("{} ({}), id {}", identity.email, identity.role.as_str(), identity.id);
            if let Some(at) = identity.logged_in_at {
                println!("Logged in at {}", at.to_rfc3339());
            }
        }
        None if session.is_authenticated() => println!("Token present, identity not loaded."),
        None => println!("Not logged in."),
    }
}

fn print_status(ctx: &Context) {
    println!("API: {}", ctx.api.http().base_url());
    println!(
        "Header schemes: {}",
        ctx.api
            .http()
            .policy()
            .schemes()
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Session file: {} (idle logout after {}m)",
        ctx.config.session_path().display(),
        ctx.session.borrow().inactivity_timeout().as_secs() / 60
    );
    println!(
        "Cache window: {}s{}",
        ctx.cache.staleness_window().as_secs(),
        if ctx.cache.is_loading() { " (loading)" } else { "" }
    );
    for status in ctx.cache.status() {
        let age = status.age.map(format_age).unwrap_or_else(|| "never".to_string());
        let len = status
            .len
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        let loading = if status.loading { " (loading)" } else { "" };
        match status.error {
            Some(error) => println!(
                "  {:<7} {:>5} loaded {}{}  error: {}",
                status.name, len, age, loading, error
            ),
            None => println!("  {:<7} {:>5} loaded {}{}", status.name, len, age, loading),
        }
    }
}

/// `ITEM_ID[:QUANTITY]`
fn parse_order_line(s: &str) -> Result<OrderLine, String> {
    let (id, quantity) = match s.split_once(':') {
        Some((id, qty)) => (id, qty),
        None => (s, "1"),
    };
    let item_id = id
        .trim()
        .parse()
        .map_err(|_| format!("invalid item id '{}'", id))?;
    let quantity: u32 = quantity
        .trim()
        .parse()
        .map_err(|_| format!("invalid quantity '{}'", quantity))?;
    if quantity == 0 {
        return Err("quantity must be at least 1".to_string());
    }
    Ok(OrderLine { item_id, quantity })
}

/// Server-supplied `message`, or a default when the body has none
fn message_of(value: &serde_json::Value, default: &str) -> String {
    value
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or(default)
        .to_string()
}
