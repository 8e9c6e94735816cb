mod admin;
mod availability;
mod calendar;
mod commands;
mod config;
mod error;
mod models;
mod portal;
mod session;
mod slots;
mod store;
mod web;
mod wizard;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::App;
use models::{AnswerType, IntakeQuestionChanges, NewService, ServiceChanges};
use store::Store;

/// Studio booking: schedule slots, take appointments, run the studio dashboard.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log every backend request and response
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug, Clone)]
struct Access {
    /// Path to config file
    #[arg(short = 'c', long, default_value = "config.toml")]
    config: PathBuf,

    /// Override login from config (email or WhatsApp number)
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Override password from config
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Use built-in sample data instead of the backend
    #[arg(long)]
    demo: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the studio dashboard (administrators only)
    Serve {
        #[command(flatten)]
        access: Access,

        /// Listen address (e.g. "0.0.0.0:3000")
        #[arg(short = 'a', long, default_value = "0.0.0.0:3009")]
        addr: String,
    },

    /// Manage bookable time slots
    Slots {
        #[command(flatten)]
        access: Access,

        #[command(subcommand)]
        action: SlotsAction,
    },

    /// Show the free times on a date (YYYY-MM-DD)
    Availability {
        #[command(flatten)]
        access: Access,

        date: String,
    },

    /// Request an appointment
    ///
    /// Examples:
    ///   book Haircut 2024-03-04 14:00
    ///   book "Lash lifting" 2024-03-04 10:00 -a "1=no" -a "Medication=none"
    Book {
        #[command(flatten)]
        access: Access,

        /// Service name or ID
        service: String,

        /// YYYY-MM-DD
        date: String,

        /// HH:MM
        time: String,

        /// Intake answer as "question=value"; the question may be its number
        #[arg(short = 'a', long = "answer")]
        answers: Vec<String>,
    },

    /// List appointments or change their status
    Appointments {
        #[command(flatten)]
        access: Access,

        #[command(subcommand)]
        action: Option<AppointmentsAction>,
    },

    /// Manage the service catalog
    Services {
        #[command(flatten)]
        access: Access,

        #[command(subcommand)]
        action: Option<ServicesAction>,
    },

    /// Manage intake questions
    Questions {
        #[command(flatten)]
        access: Access,

        #[command(subcommand)]
        action: Option<QuestionsAction>,
    },

    /// List clients with their appointment counts
    Clients {
        #[command(flatten)]
        access: Access,

        /// Filter by name or WhatsApp number
        #[arg(short = 's', long)]
        search: Option<String>,
    },

    /// Dashboard figures and recent activity
    Stats {
        #[command(flatten)]
        access: Access,
    },

    /// Your upcoming and past appointments
    Home {
        #[command(flatten)]
        access: Access,
    },

    /// Your profile
    Profile {
        #[command(flatten)]
        access: Access,
    },

    /// Updates on your appointments
    Notifications {
        #[command(flatten)]
        access: Access,
    },

    /// Show the signed-in account
    Whoami {
        #[command(flatten)]
        access: Access,
    },

    /// Create a client account
    Signup {
        /// Path to config file
        #[arg(short = 'c', long, default_value = "config.toml")]
        config: PathBuf,

        #[arg(long)]
        name: String,

        #[arg(long)]
        whatsapp: String,

        #[arg(long)]
        password: String,
    },
}

#[derive(Subcommand, Debug)]
enum SlotsAction {
    /// Open slots from today on, by date
    List,
    /// Add one slot
    Add { date: String, time: String },
    /// Create slots for every matching weekday in a date range
    Bulk {
        start: String,
        end: String,

        /// Weekdays, e.g. "monday,wednesday" or "1,3" (0 = Sunday); defaults from config
        #[arg(short = 'w', long)]
        weekdays: Option<String>,

        /// Times, e.g. "09:00,14:30"; defaults from config
        #[arg(short = 't', long)]
        times: Option<String>,
    },
    /// Take a slot off the schedule
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum AppointmentsAction {
    List,
    /// Set status: requested, confirmed, completed or cancelled
    Status { id: String, status: String },
}

#[derive(Subcommand, Debug)]
enum ServicesAction {
    /// List services (active only unless --all)
    List {
        #[arg(long)]
        all: bool,
    },
    Add {
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Minutes
        #[arg(long, default_value_t = 60)]
        duration: u32,

        #[arg(long)]
        price: Option<f64>,

        /// Keep the price off the client screens
        #[arg(long)]
        hide_price: bool,

        /// Ask the intake questions when booking
        #[arg(long)]
        intake: bool,
    },
    Update {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        duration: Option<u32>,

        #[arg(long)]
        price: Option<f64>,

        #[arg(long)]
        show_price: Option<bool>,

        #[arg(long)]
        intake: Option<bool>,

        /// Bring a removed service back
        #[arg(long)]
        activate: bool,
    },
    /// Retire a service
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum QuestionsAction {
    List,
    Add {
        text: String,

        /// Answered with yes or no instead of free text
        #[arg(long)]
        yes_no: bool,

        #[arg(long)]
        order: Option<i32>,
    },
    Update {
        id: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        yes_no: Option<bool>,

        #[arg(long)]
        order: Option<i32>,
    },
    Remove { id: String },
}

impl Command {
    fn access(&self) -> Option<&Access> {
        match self {
            Command::Serve { access, .. }
            | Command::Slots { access, .. }
            | Command::Availability { access, .. }
            | Command::Book { access, .. }
            | Command::Appointments { access, .. }
            | Command::Services { access, .. }
            | Command::Questions { access, .. }
            | Command::Clients { access, .. }
            | Command::Stats { access }
            | Command::Home { access }
            | Command::Profile { access }
            | Command::Notifications { access }
            | Command::Whoami { access } => Some(access),
            Command::Signup { .. } => None,
        }
    }
}

fn answer_type(yes_no: bool) -> AnswerType {
    if yes_no {
        AnswerType::YesNo
    } else {
        AnswerType::Text
    }
}

async fn run<S: Store>(command: &Command, app: &App<S>) -> Result<()> {
    match command {
        Command::Slots { action, .. } => match action {
            SlotsAction::List => commands::run_slots_list(app).await,
            SlotsAction::Add { date, time } => commands::run_slot_add(app, date, time).await,
            SlotsAction::Bulk {
                start,
                end,
                weekdays,
                times,
            } => {
                commands::run_bulk(app, start, end, weekdays.as_deref(), times.as_deref()).await
            }
            SlotsAction::Remove { id } => commands::run_slot_remove(app, id).await,
        },
        Command::Availability { date, .. } => commands::run_availability(app, date).await,
        Command::Book {
            service,
            date,
            time,
            answers,
            ..
        } => commands::run_book(app, service, date, time, answers).await,
        Command::Appointments { action, .. } => match action {
            None | Some(AppointmentsAction::List) => commands::run_appointments(app).await,
            Some(AppointmentsAction::Status { id, status }) => {
                commands::run_set_status(app, id, status).await
            }
        },
        Command::Services { action, .. } => match action {
            None => commands::run_services(app, false).await,
            Some(ServicesAction::List { all }) => commands::run_services(app, *all).await,
            Some(ServicesAction::Add {
                name,
                description,
                duration,
                price,
                hide_price,
                intake,
            }) => {
                let service = NewService {
                    name: name.clone(),
                    description: description.clone(),
                    duration_minutes: *duration,
                    price: *price,
                    show_price: !hide_price,
                    requires_intake: *intake,
                };
                commands::run_service_add(app, service).await
            }
            Some(ServicesAction::Update {
                id,
                name,
                description,
                duration,
                price,
                show_price,
                intake,
                activate,
            }) => {
                let changes = ServiceChanges {
                    name: name.clone(),
                    description: description.clone().map(Some),
                    duration_minutes: *duration,
                    price: price.map(Some),
                    show_price: *show_price,
                    requires_intake: *intake,
                    active: activate.then_some(true),
                };
                commands::run_service_update(app, id, changes).await
            }
            Some(ServicesAction::Remove { id }) => commands::run_service_remove(app, id).await,
        },
        Command::Questions { action, .. } => match action {
            None | Some(QuestionsAction::List) => commands::run_questions(app).await,
            Some(QuestionsAction::Add {
                text,
                yes_no,
                order,
            }) => commands::run_question_add(app, text, answer_type(*yes_no), *order).await,
            Some(QuestionsAction::Update {
                id,
                text,
                yes_no,
                order,
            }) => {
                let changes = IntakeQuestionChanges {
                    text: text.clone(),
                    answer_type: yes_no.map(answer_type),
                    order: *order,
                    active: None,
                };
                commands::run_question_update(app, id, changes).await
            }
            Some(QuestionsAction::Remove { id }) => commands::run_question_remove(app, id).await,
        },
        Command::Clients { search, .. } => commands::run_clients(app, search.as_deref()).await,
        Command::Stats { .. } => commands::run_stats(app).await,
        Command::Home { .. } => commands::run_home(app).await,
        Command::Profile { .. } => commands::run_profile(app).await,
        Command::Notifications { .. } => commands::run_notifications(app).await,
        Command::Whoami { .. } => commands::run_whoami(app),
        Command::Serve { .. } | Command::Signup { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Command::Signup {
        config,
        name,
        whatsapp,
        password,
    } = &cli.command
    {
        let cfg = config::load_config(config)?;
        return commands::run_signup(&cfg, name, whatsapp, password).await;
    }

    let Some(access) = cli.command.access() else {
        return Ok(());
    };

    if access.demo {
        let app = commands::demo(config::demo_config()).await?;
        return match &cli.command {
            Command::Serve { addr, .. } => web::serve(app, addr).await,
            command => run(command, &app).await,
        };
    }

    let cfg = config::load_config(&access.config)?;
    let app = commands::connect(cfg, access.user.as_deref(), access.password.as_deref()).await?;
    match &cli.command {
        Command::Serve { addr, .. } => web::serve(app, addr).await,
        command => {
            let result = run(command, &app).await;
            commands::disconnect(app).await?;
            result
        }
    }
}
