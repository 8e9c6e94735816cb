use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::calendar::{self, format_time};
use crate::error::{BookingError, BookingResult};
use crate::models::{
    AnswerType, AppointmentStatus, Config, IntakeAnswer, IntakeQuestion, IntakeQuestionChanges,
    NewIntakeQuestion, NewService, Service, ServiceChanges, Slot,
};
use crate::session::{self, format_whatsapp, AuthGrant, SessionContext};
use crate::slots::{BulkPlan, BulkRequest};
use crate::store::{MemoryStore, RestStore, Store};
use crate::wizard::{BookingWizard, Rejected, Step, StepOptions};
use crate::{admin, availability, portal, slots};

const DEMO_ADMIN: &str = "demo-admin";

/// A store plus the signed-in user, for one CLI invocation.
pub struct App<S> {
    pub store: S,
    pub session: SessionContext,
    pub config: Config,
    pub tz: Tz,
}

impl<S: Store> App<S> {
    pub fn today(&self) -> NaiveDate {
        calendar::today(self.tz)
    }

    fn user_id(&self) -> Result<String> {
        Ok(self.session.require_client()?.user_id.clone())
    }

    fn admin(&self) -> Result<()> {
        self.session.require_admin()?;
        Ok(())
    }
}

/// Resolve login/password from CLI flags or the `[account]` section.
pub fn resolve_credentials<'a>(
    user_flag: Option<&'a str>,
    pass_flag: Option<&'a str>,
    config: &'a Config,
) -> Result<(&'a str, &'a str)> {
    let account = config.account.as_ref();
    let login = match user_flag {
        Some(u) => u,
        None => account
            .map(|a| a.login.as_str())
            .ok_or_else(|| anyhow!("No [account] in config and no --user provided"))?,
    };
    let pass = match pass_flag {
        Some(p) => p,
        None => account
            .map(|a| a.password.as_str())
            .ok_or_else(|| anyhow!("No [account] in config and no --password provided"))?,
    };
    Ok((login, pass))
}

pub async fn connect(
    config: Config,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<App<RestStore>> {
    let tz = calendar::parse_timezone(&config.studio.timezone)?;
    let auth = RestStore::new(&config.backend.url, &config.backend.anon_key)?;
    let (login, pass) = resolve_credentials(user, password, &config)?;

    let mut session = SessionContext::new();
    let token = session
        .sign_in(&auth, login, pass)
        .await
        .with_context(|| format!("Failed to sign in as {login}"))?
        .access_token()
        .map(str::to_string);
    let store = match token {
        Some(t) => auth.with_token(&t),
        None => auth,
    };
    Ok(App {
        store,
        session,
        config,
        tz,
    })
}

/// An in-memory studio with sample data, signed in as its administrator.
pub async fn demo(config: Config) -> Result<App<MemoryStore>> {
    let tz = calendar::parse_timezone(&config.studio.timezone)?;
    let store = MemoryStore::new();
    store.seed_demo(calendar::today(tz), DEMO_ADMIN)?;

    let mut session = SessionContext::new();
    session
        .resolve(
            &store,
            AuthGrant {
                user_id: DEMO_ADMIN.to_string(),
                email: "admin@demo.local".to_string(),
                access_token: None,
            },
        )
        .await?;
    info!("Running against demo data");
    Ok(App {
        store,
        session,
        config,
        tz,
    })
}

pub async fn disconnect(mut app: App<RestStore>) -> Result<()> {
    if let Err(e) = app.session.sign_out(&app.store).await {
        warn!("Sign-out failed: {}", e);
    }
    Ok(())
}

pub async fn run_signup(config: &Config, name: &str, whatsapp: &str, password: &str) -> Result<()> {
    let auth = RestStore::new(&config.backend.url, &config.backend.anon_key)?;
    let email = session::sign_up(&auth, name, whatsapp, password).await?;
    println!(
        "Account created for {} ({}). Sign in with your WhatsApp number.",
        name.trim(),
        format_whatsapp(whatsapp)
    );
    info!("Registered {}", email);
    Ok(())
}

pub fn run_whoami<S: Store>(app: &App<S>) -> Result<()> {
    let session = app.session.require_client()?;
    println!("{} ({:?})", session.email, session.role);
    println!("  user_id: {}", session.user_id);
    Ok(())
}

// ---- schedule ----

pub async fn run_slots_list<S: Store>(app: &App<S>) -> Result<()> {
    app.admin()?;
    let schedule = availability::schedule_by_date(&app.store, app.today()).await?;
    if schedule.is_empty() {
        println!("No open slots from {} on.", app.today());
        return Ok(());
    }
    for (date, day) in &schedule {
        println!("{} ({})", date, date.format("%A"));
        for slot in day {
            println!("  {}  [{}]", format_time(slot.time), slot.id);
        }
    }
    Ok(())
}

pub async fn run_slot_add<S: Store>(app: &App<S>, date: &str, time: &str) -> Result<()> {
    app.admin()?;
    let date = calendar::parse_date(date)?;
    let time = calendar::parse_time(time)?;
    let slot = slots::add_slot(&app.store, date, time).await?;
    println!("Added {} {} (ID: {})", slot.date, format_time(slot.time), slot.id);
    Ok(())
}

pub async fn run_slot_remove<S: Store>(app: &App<S>, id: &str) -> Result<()> {
    app.admin()?;
    slots::remove_slot(&app.store, id).await?;
    println!("Removed slot {}", id);
    Ok(())
}

pub async fn run_bulk<S: Store>(
    app: &App<S>,
    start: &str,
    end: &str,
    weekdays: Option<&str>,
    times: Option<&str>,
) -> Result<()> {
    app.admin()?;
    let weekdays = match weekdays {
        Some(list) => calendar::parse_weekday_list(list)?,
        None => app.config.bulk.weekdays.clone(),
    };
    let times = match times {
        Some(list) => list.split(',').map(|t| t.trim().to_string()).collect(),
        None => app.config.bulk.times.clone(),
    };
    let plan = BulkPlan::parse(&BulkRequest {
        start: Some(start.to_string()),
        end: Some(end.to_string()),
        weekdays,
        times,
    })?;
    let outcome = slots::create_bulk(&app.store, &plan).await?;
    println!(
        "Generated {} slots, {} new ({} already existed)",
        outcome.generated,
        outcome.created,
        outcome.generated - outcome.created
    );
    Ok(())
}

pub async fn run_availability<S: Store>(app: &App<S>, date: &str) -> Result<()> {
    app.user_id()?;
    let date = calendar::parse_date(date)?;
    let open = availability::available_slots(&app.store, date).await?;
    if open.is_empty() {
        println!("No available times on {}.", date);
        return Ok(());
    }
    println!("Available on {}:", date);
    for slot in open {
        println!("  {}", format_time(slot.time));
    }
    Ok(())
}

// ---- booking ----

/// Split a `question=value` argument.
pub fn split_answer(arg: &str) -> Result<(&str, &str)> {
    arg.split_once('=')
        .map(|(q, v)| (q.trim(), v.trim()))
        .ok_or_else(|| anyhow!("Answers look like \"question=value\", got '{}'", arg))
}

/// Match an answer to a question by text (case-insensitive) or 1-based number.
pub fn find_question<'a>(questions: &'a [IntakeQuestion], key: &str) -> Option<&'a IntakeQuestion> {
    if let Ok(n) = key.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| questions.get(i));
    }
    questions.iter().find(|q| q.text.eq_ignore_ascii_case(key))
}

pub fn parse_answer(question: &IntakeQuestion, raw: &str) -> Result<IntakeAnswer> {
    match question.answer_type {
        AnswerType::Text => Ok(IntakeAnswer::Text(raw.to_string())),
        AnswerType::YesNo => match raw.to_lowercase().as_str() {
            "yes" | "y" | "true" | "sim" | "s" => Ok(IntakeAnswer::YesNo(true)),
            "no" | "n" | "false" | "não" | "nao" => Ok(IntakeAnswer::YesNo(false)),
            _ => bail!("'{}' needs a yes or no", question.text),
        },
    }
}

fn find_service<'a>(services: &'a [Service], key: &str) -> Option<&'a Service> {
    services
        .iter()
        .find(|s| s.id == key || s.name.eq_ignore_ascii_case(key))
}

/// Walk the booking wizard from service selection to commit.
pub async fn run_book<S: Store>(
    app: &App<S>,
    service: &str,
    date: &str,
    time: &str,
    answers: &[String],
) -> Result<()> {
    let user_id = app.user_id()?;
    let today = app.today();
    let mut wizard = BookingWizard::new(&user_id);

    let StepOptions::Services(services) = wizard.options(&app.store, today).await? else {
        bail!("Booking did not start at service selection");
    };
    let chosen = find_service(&services, service)
        .cloned()
        .ok_or_else(|| anyhow!("No active service named '{}'", service))?;
    wizard.select_service(chosen)?;
    wizard.next()?;

    let date = calendar::parse_date(date)?;
    if let StepOptions::Dates(dates) = wizard.options(&app.store, today).await? {
        if !dates.contains(&date) {
            bail!("No open times on {}", date);
        }
    }
    wizard.select_date(date)?;
    wizard.next()?;

    let time = calendar::parse_time(time)?;
    let StepOptions::Times(open) = wizard.options(&app.store, today).await? else {
        bail!("Expected the time step");
    };
    let slot = open
        .into_iter()
        .find(|s| s.time == time)
        .ok_or_else(|| anyhow!("{} at {} is not available", date, format_time(time)))?;
    wizard.select_slot(slot)?;

    if wizard.next()? == Step::IntakeForm {
        if let StepOptions::Questions(questions) = wizard.options(&app.store, today).await? {
            for arg in answers {
                let (key, raw) = split_answer(arg)?;
                let question = find_question(&questions, key)
                    .ok_or_else(|| anyhow!("Unknown question '{}'", key))?;
                let answer = parse_answer(question, raw)?;
                wizard.answer(&question.text, answer)?;
            }
        }
        wizard.next()?;
    } else if !answers.is_empty() {
        warn!("This service has no intake form; ignoring answers");
    }

    if let StepOptions::Summary(draft) = wizard.options(&app.store, today).await? {
        let (step, steps) = wizard.progress();
        info!("Step {}/{}: confirming {} {}", step, steps, draft.date, format_time(draft.time));
    }
    match wizard.commit(&app.store).await {
        Ok(apt) => {
            println!(
                "Requested {} on {} at {} (ID: {})",
                service,
                apt.date,
                format_time(apt.time),
                apt.id
            );
            Ok(())
        }
        Err(Rejected { mut wizard, error }) => {
            if matches!(error, BookingError::Conflict(_)) {
                let open = times_still_open(&mut wizard, &app.store, today).await?;
                if !open.is_empty() {
                    let times: Vec<String> = open.iter().map(|s| format_time(s.time)).collect();
                    println!("Still open on {}: {}", date, times.join(", "));
                }
            }
            Err(error.into())
        }
    }
}

/// Step a rejected booking back to time selection and list what is left.
async fn times_still_open<S: Store>(
    wizard: &mut BookingWizard,
    store: &S,
    today: NaiveDate,
) -> BookingResult<Vec<Slot>> {
    while wizard.step() > Step::TimeSelection {
        wizard.back();
    }
    match wizard.options(store, today).await? {
        StepOptions::Times(slots) => Ok(slots),
        _ => Ok(Vec::new()),
    }
}

// ---- appointments ----

pub async fn run_appointments<S: Store>(app: &App<S>) -> Result<()> {
    app.admin()?;
    let rows = admin::list_appointments(&app.store).await?;
    if rows.is_empty() {
        println!("No appointments.");
        return Ok(());
    }
    for row in rows {
        print!(
            "  {} {}  {:<10} {} - {}",
            row.date,
            format_time(row.time),
            row.status,
            row.client_name,
            row.service_name
        );
        if let Some(wa) = &row.client_whatsapp {
            print!(" ({})", format_whatsapp(wa));
        }
        println!("  [{}]", row.id);
    }
    Ok(())
}

pub async fn run_set_status<S: Store>(app: &App<S>, id: &str, status: &str) -> Result<()> {
    app.admin()?;
    let status = AppointmentStatus::parse(status).ok_or_else(|| {
        let known: Vec<String> = AppointmentStatus::ALL
            .iter()
            .map(|s| s.meta().label.to_lowercase())
            .collect();
        anyhow!("Unknown status '{}', expected one of: {}", status, known.join(", "))
    })?;
    admin::set_status(&app.store, id, status).await?;
    println!("Appointment {} is now {}", id, status);
    Ok(())
}

// ---- services and intake questions ----

pub async fn run_services<S: Store>(app: &App<S>, all: bool) -> Result<()> {
    let services = if all {
        app.admin()?;
        admin::list_services(&app.store, true).await?
    } else {
        app.user_id()?;
        admin::list_services(&app.store, false).await?
    };
    for s in services {
        let price = match s.visible_price() {
            Some(p) => format!("R$ {:.2}", p),
            None => "-".to_string(),
        };
        let mut flags = Vec::new();
        if s.requires_intake {
            flags.push("intake");
        }
        if !s.active {
            flags.push("inactive");
        }
        println!(
            "  {:<24} {:>4} min  {:>10}  {}  [{}]",
            s.name,
            s.duration_minutes,
            price,
            flags.join(","),
            s.id
        );
    }
    Ok(())
}

pub async fn run_service_add<S: Store>(app: &App<S>, service: NewService) -> Result<()> {
    app.admin()?;
    let created = admin::create_service(&app.store, service).await?;
    println!("Created service {} (ID: {})", created.name, created.id);
    Ok(())
}

pub async fn run_service_update<S: Store>(app: &App<S>, id: &str, changes: ServiceChanges) -> Result<()> {
    app.admin()?;
    admin::update_service(&app.store, id, changes).await?;
    println!("Updated service {}", id);
    Ok(())
}

pub async fn run_service_remove<S: Store>(app: &App<S>, id: &str) -> Result<()> {
    app.admin()?;
    admin::delete_service(&app.store, id).await?;
    println!("Removed service {}", id);
    Ok(())
}

pub async fn run_questions<S: Store>(app: &App<S>) -> Result<()> {
    app.admin()?;
    for (i, q) in admin::list_questions(&app.store).await?.iter().enumerate() {
        let kind = match q.answer_type {
            AnswerType::YesNo => "yes/no",
            AnswerType::Text => "text",
        };
        println!("  {}. {} ({})  [{}]", i + 1, q.text, kind, q.id);
    }
    Ok(())
}

/// `order` defaults to after the last active question.
pub async fn run_question_add<S: Store>(
    app: &App<S>,
    text: &str,
    answer_type: AnswerType,
    order: Option<i32>,
) -> Result<()> {
    app.admin()?;
    let order = match order {
        Some(o) => o,
        None => admin::list_questions(&app.store)
            .await?
            .iter()
            .map(|q| q.order)
            .max()
            .map_or(1, |o| o + 1),
    };
    let question = NewIntakeQuestion {
        text: text.trim().to_string(),
        answer_type,
        order,
    };
    let created = admin::create_question(&app.store, question).await?;
    println!("Added question {} (ID: {})", created.text, created.id);
    Ok(())
}

pub async fn run_question_update<S: Store>(
    app: &App<S>,
    id: &str,
    changes: IntakeQuestionChanges,
) -> Result<()> {
    app.admin()?;
    admin::update_question(&app.store, id, changes).await?;
    println!("Updated question {}", id);
    Ok(())
}

pub async fn run_question_remove<S: Store>(app: &App<S>, id: &str) -> Result<()> {
    app.admin()?;
    admin::deactivate_question(&app.store, id).await?;
    println!("Removed question {}", id);
    Ok(())
}

// ---- clients and reports ----

pub async fn run_clients<S: Store>(app: &App<S>, search: Option<&str>) -> Result<()> {
    app.admin()?;
    let rows = admin::list_clients(&app.store, search).await?;
    if rows.is_empty() {
        println!("No clients found.");
    }
    for row in rows {
        println!(
            "  {:<28} {:<18} {} appointment(s)",
            row.profile.full_name(),
            format_whatsapp(&row.profile.whatsapp),
            row.appointment_count
        );
    }
    Ok(())
}

pub async fn run_stats<S: Store>(app: &App<S>) -> Result<()> {
    app.admin()?;
    let stats = admin::dashboard_stats(&app.store).await?;
    println!("Appointments:     {}", stats.total_appointments);
    println!("Clients:          {}", stats.total_clients);
    println!("Revenue:          R$ {:.2}", stats.revenue);
    println!("Completion rate:  {}%", stats.completion_rate);

    println!("\nRecent activity:");
    let recent = admin::recent_activity(&app.store).await?;
    if recent.is_empty() {
        println!("  nothing yet");
    }
    for row in recent {
        println!(
            "  {} {}  {} - {} ({})",
            row.date,
            format_time(row.time),
            row.client_name,
            row.service_name,
            row.status
        );
    }
    Ok(())
}

// ---- client portal ----

pub async fn run_home<S: Store>(app: &App<S>) -> Result<()> {
    let user_id = app.user_id()?;
    let home = portal::home(&app.store, &user_id, app.today()).await?;
    println!("Hello, {}!", home.first_name.as_deref().unwrap_or("there"));

    println!("\nUpcoming:");
    if home.upcoming.is_empty() {
        println!("  no upcoming appointments");
    }
    for item in &home.upcoming {
        let apt = &item.appointment;
        println!("  {} {}  {} ({})", apt.date, format_time(apt.time), item.service_name, apt.status);
    }

    println!("\nHistory:");
    if home.history.is_empty() {
        println!("  nothing yet");
    }
    for item in &home.history {
        let apt = &item.appointment;
        println!("  {} {}  {} ({})", apt.date, format_time(apt.time), item.service_name, apt.status);
    }
    Ok(())
}

pub async fn run_profile<S: Store>(app: &App<S>) -> Result<()> {
    let user_id = app.user_id()?;
    let summary = portal::profile(&app.store, &user_id).await?;
    match &summary.profile {
        Some(p) => {
            println!("{}", p.full_name());
            println!("  WhatsApp:      {}", format_whatsapp(&p.whatsapp));
        }
        None => println!("No profile on file."),
    }
    println!("  Appointments:  {}", summary.total_appointments);
    Ok(())
}

pub async fn run_notifications<S: Store>(app: &App<S>) -> Result<()> {
    let user_id = app.user_id()?;
    let notes = portal::notifications(&app.store, &user_id).await?;
    if notes.is_empty() {
        println!("No notifications.");
    }
    for n in notes {
        let marker = if n.read { " " } else { "*" };
        println!("{} {}: {}", marker, n.title, n.message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, IntakeAnswers};
    use crate::store::AppointmentQuery;

    fn question(text: &str, answer_type: AnswerType) -> IntakeQuestion {
        IntakeQuestion {
            id: text.to_lowercase(),
            text: text.to_string(),
            answer_type,
            order: 0,
            active: true,
        }
    }

    #[test]
    fn test_resolve_credentials_prefers_flags() {
        let mut cfg = crate::config::demo_config();
        assert!(resolve_credentials(None, None, &cfg).is_err());

        cfg.account = Some(Account {
            login: "admin@studio.local".into(),
            password: "pw".into(),
        });
        assert_eq!(
            resolve_credentials(None, None, &cfg).unwrap(),
            ("admin@studio.local", "pw")
        );
        assert_eq!(
            resolve_credentials(Some("11987654321"), None, &cfg).unwrap(),
            ("11987654321", "pw")
        );
    }

    #[test]
    fn test_answer_parsing() {
        let questions = vec![
            question("Do you have any allergies?", AnswerType::YesNo),
            question("Medication", AnswerType::Text),
        ];
        let (key, raw) = split_answer("medication = none").unwrap();
        assert_eq!((key, raw), ("medication", "none"));
        let q = find_question(&questions, key).unwrap();
        assert_eq!(parse_answer(q, raw).unwrap(), IntakeAnswer::Text("none".into()));

        let q = find_question(&questions, "1").unwrap();
        assert_eq!(parse_answer(q, "Sim").unwrap(), IntakeAnswer::YesNo(true));
        assert!(parse_answer(q, "maybe").is_err());
        assert!(find_question(&questions, "3").is_none());
        assert!(split_answer("no separator").is_err());
    }

    #[tokio::test]
    async fn test_book_walks_intake_form() {
        let app = demo(crate::config::demo_config()).await.unwrap();
        let date = app
            .store
            .open_slots(app.today())
            .await
            .unwrap()
            .first()
            .map(|s| s.date)
            .unwrap();
        let answers = vec![
            "1=no".to_string(),
            "Are you taking any medication?=none".to_string(),
        ];
        run_book(&app, "lash lifting", &date.to_string(), "10:00", &answers)
            .await
            .unwrap();

        let booked = app
            .store
            .appointments(&AppointmentQuery::for_user(DEMO_ADMIN))
            .await
            .unwrap();
        assert_eq!(booked.len(), 1);
        let intake: &IntakeAnswers = booked[0].intake.as_ref().unwrap();
        assert_eq!(
            intake.get("Do you have any allergies?"),
            Some(&IntakeAnswer::YesNo(false))
        );

        let again = run_book(&app, "haircut", &date.to_string(), "10:00", &[]).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_book_requires_every_answer() {
        let app = demo(crate::config::demo_config()).await.unwrap();
        let date = app.store.open_slots(app.today()).await.unwrap()[0].date;
        let err = run_book(&app, "Lash lifting", &date.to_string(), "09:00", &["1=yes".into()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Please answer"));
    }

    #[tokio::test]
    async fn test_unknown_status_lists_the_known_ones() {
        let app = demo(crate::config::demo_config()).await.unwrap();
        let err = run_set_status(&app, "a1", "maybe").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown status 'maybe', expected one of: requested, confirmed, completed, cancelled"
        );
    }

    #[tokio::test]
    async fn test_taken_time_steps_back_to_remaining_times() {
        let app = demo(crate::config::demo_config()).await.unwrap();
        let today = app.today();
        let date = app.store.open_slots(today).await.unwrap()[0].date;

        let mut wizard = BookingWizard::new(DEMO_ADMIN);
        let StepOptions::Services(services) = wizard.options(&app.store, today).await.unwrap() else {
            panic!("expected services");
        };
        let haircut = find_service(&services, "haircut").cloned().unwrap();
        wizard.select_service(haircut).unwrap();
        wizard.next().unwrap();
        wizard.select_date(date).unwrap();
        wizard.next().unwrap();
        let StepOptions::Times(open) = wizard.options(&app.store, today).await.unwrap() else {
            panic!("expected times");
        };
        wizard.select_slot(open[0].clone()).unwrap();
        assert_eq!(wizard.next().unwrap(), Step::Confirmation);

        run_book(&app, "Eyebrow design", &date.to_string(), "09:00", &[])
            .await
            .unwrap();
        let mut wizard = wizard.commit(&app.store).await.unwrap_err().wizard;

        let left = times_still_open(&mut wizard, &app.store, today).await.unwrap();
        assert_eq!(wizard.step(), Step::TimeSelection);
        assert_eq!(left.len(), open.len() - 1);
        assert!(left.iter().all(|s| format_time(s.time) != "09:00"));
    }
}
