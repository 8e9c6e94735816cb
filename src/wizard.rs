//! Client booking flow: service → date → time → (intake form) → confirmation.
//!
//! The intake form is only part of the flow when the chosen service requires
//! it. Which step follows which is decided in one place, [`Step::next`] and
//! [`Step::previous`]; the rest of the wizard never does index arithmetic.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::availability;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    AnswerType, Appointment, AppointmentStatus, IntakeAnswer, IntakeAnswers, IntakeQuestion,
    NewAppointment, Service, Slot,
};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    ServiceSelection,
    DateSelection,
    TimeSelection,
    IntakeForm,
    Confirmation,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::ServiceSelection,
        Step::DateSelection,
        Step::TimeSelection,
        Step::IntakeForm,
        Step::Confirmation,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Step::ServiceSelection => "Service",
            Step::DateSelection => "Date",
            Step::TimeSelection => "Time",
            Step::IntakeForm => "Intake form",
            Step::Confirmation => "Confirmation",
        }
    }

    pub fn next(self, requires_intake: bool) -> Step {
        match (self, requires_intake) {
            (Step::ServiceSelection, _) => Step::DateSelection,
            (Step::DateSelection, _) => Step::TimeSelection,
            (Step::TimeSelection, true) => Step::IntakeForm,
            (Step::TimeSelection, false) => Step::Confirmation,
            (Step::IntakeForm, _) | (Step::Confirmation, _) => Step::Confirmation,
        }
    }

    pub fn previous(self, requires_intake: bool) -> Step {
        match (self, requires_intake) {
            (Step::ServiceSelection, _) | (Step::DateSelection, _) => Step::ServiceSelection,
            (Step::TimeSelection, _) => Step::DateSelection,
            (Step::IntakeForm, _) => Step::TimeSelection,
            (Step::Confirmation, true) => Step::IntakeForm,
            (Step::Confirmation, false) => Step::TimeSelection,
        }
    }
}

/// What the current step offers to choose from.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOptions {
    Services(Vec<Service>),
    Dates(Vec<NaiveDate>),
    Times(Vec<Slot>),
    Questions(Vec<IntakeQuestion>),
    Summary(NewAppointment),
}

/// A commit the backend refused. The wizard is handed back, still at
/// confirmation, so the client can retry.
#[derive(Debug)]
pub struct Rejected {
    pub wizard: BookingWizard,
    pub error: BookingError,
}

#[derive(Debug, Clone)]
pub struct BookingWizard {
    user_id: String,
    step: Step,
    service: Option<Service>,
    date: Option<NaiveDate>,
    slot: Option<Slot>,
    /// `None` until the intake questions have been loaded for this service.
    questions: Option<Vec<IntakeQuestion>>,
    answers: IntakeAnswers,
}

impl BookingWizard {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            step: Step::ServiceSelection,
            service: None,
            date: None,
            slot: None,
            questions: None,
            answers: IntakeAnswers::new(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn slot(&self) -> Option<&Slot> {
        self.slot.as_ref()
    }

    pub fn answers(&self) -> &IntakeAnswers {
        &self.answers
    }

    pub fn requires_intake(&self) -> bool {
        self.service.as_ref().is_some_and(|s| s.requires_intake)
    }

    /// Steps shown to the client; the intake form only when required.
    pub fn visible_steps(&self) -> Vec<Step> {
        let requires_intake = self.requires_intake();
        Step::ALL
            .into_iter()
            .filter(|s| *s != Step::IntakeForm || requires_intake)
            .collect()
    }

    /// 1-based position of the current step among the visible ones, and their count.
    pub fn progress(&self) -> (usize, usize) {
        let visible = self.visible_steps();
        let position = visible
            .iter()
            .position(|s| *s == self.step)
            .map_or(1, |p| p + 1);
        (position, visible.len())
    }

    fn expect_step(&self, step: Step) -> BookingResult<()> {
        if self.step != step {
            return Err(BookingError::validation(format!(
                "Cannot do that at the {} step",
                self.step.title().to_lowercase()
            )));
        }
        Ok(())
    }

    /// Choosing a different service discards the later choices.
    pub fn select_service(&mut self, service: Service) -> BookingResult<()> {
        self.expect_step(Step::ServiceSelection)?;
        if self.service.as_ref().map(|s| &s.id) != Some(&service.id) {
            self.date = None;
            self.slot = None;
            self.questions = None;
            self.answers.clear();
        }
        self.service = Some(service);
        Ok(())
    }

    pub fn select_date(&mut self, date: NaiveDate) -> BookingResult<()> {
        self.expect_step(Step::DateSelection)?;
        if self.date != Some(date) {
            self.slot = None;
        }
        self.date = Some(date);
        Ok(())
    }

    pub fn select_slot(&mut self, slot: Slot) -> BookingResult<()> {
        self.expect_step(Step::TimeSelection)?;
        if self.date != Some(slot.date) {
            return Err(BookingError::validation("That time is not on the selected date"));
        }
        self.slot = Some(slot);
        Ok(())
    }

    /// Questions the intake form asks; normally loaded by [`options`](Self::options).
    pub fn set_questions(&mut self, questions: Vec<IntakeQuestion>) {
        self.answers
            .retain(|text, _| questions.iter().any(|q| &q.text == text));
        self.questions = Some(questions);
    }

    fn questions(&self) -> &[IntakeQuestion] {
        self.questions.as_deref().unwrap_or(&[])
    }

    pub fn answer(&mut self, question: &str, answer: IntakeAnswer) -> BookingResult<()> {
        self.expect_step(Step::IntakeForm)?;
        let q = self
            .questions()
            .iter()
            .find(|q| q.text == question)
            .ok_or_else(|| BookingError::validation(format!("Unknown question '{question}'")))?;
        match (q.answer_type, &answer) {
            (AnswerType::YesNo, IntakeAnswer::YesNo(_)) | (AnswerType::Text, IntakeAnswer::Text(_)) => {}
            (AnswerType::YesNo, _) => {
                return Err(BookingError::validation(format!("'{question}' needs a yes or no")))
            }
            (AnswerType::Text, _) => {
                return Err(BookingError::validation(format!("'{question}' needs a written answer")))
            }
        }
        self.answers.insert(q.text.clone(), answer);
        Ok(())
    }

    fn unanswered(&self) -> Option<&IntakeQuestion> {
        self.questions().iter().find(|q| match self.answers.get(&q.text) {
            Some(IntakeAnswer::Text(t)) => t.trim().is_empty(),
            Some(IntakeAnswer::YesNo(_)) => false,
            None => true,
        })
    }

    /// Advance, checking the current step's selection first.
    pub fn next(&mut self) -> BookingResult<Step> {
        match self.step {
            Step::ServiceSelection if self.service.is_none() => {
                return Err(BookingError::validation("Select a service"))
            }
            Step::DateSelection if self.date.is_none() => {
                return Err(BookingError::validation("Select a date"))
            }
            Step::TimeSelection if self.slot.is_none() => {
                return Err(BookingError::validation("Select a time"))
            }
            Step::IntakeForm => {
                if self.questions.is_none() {
                    return Err(BookingError::validation(
                        "The intake form has not been loaded yet",
                    ));
                }
                if let Some(q) = self.unanswered() {
                    return Err(BookingError::validation(format!("Please answer: {}", q.text)));
                }
            }
            _ => {}
        }
        self.step = self.step.next(self.requires_intake());
        Ok(self.step)
    }

    pub fn back(&mut self) -> Step {
        self.step = self.step.previous(self.requires_intake());
        self.step
    }

    /// The appointment a commit would write.
    pub fn draft(&self) -> BookingResult<NewAppointment> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| BookingError::validation("Select a service"))?;
        let date = self
            .date
            .ok_or_else(|| BookingError::validation("Select a date"))?;
        let slot = self
            .slot
            .as_ref()
            .ok_or_else(|| BookingError::validation("Select a time"))?;

        Ok(NewAppointment {
            user_id: self.user_id.clone(),
            service_id: service.id.clone(),
            date,
            time: slot.time,
            status: AppointmentStatus::Requested,
            intake: service.requires_intake.then(|| self.answers.clone()),
        })
    }

    /// Load what the current step needs from the store.
    pub async fn options<S: Store>(&mut self, store: &S, today: NaiveDate) -> BookingResult<StepOptions> {
        Ok(match self.step {
            Step::ServiceSelection => StepOptions::Services(store.services(true).await?),
            Step::DateSelection => StepOptions::Dates(availability::open_dates(store, today).await?),
            Step::TimeSelection => {
                let date = self
                    .date
                    .ok_or_else(|| BookingError::validation("Select a date"))?;
                StepOptions::Times(availability::available_slots(store, date).await?)
            }
            Step::IntakeForm => {
                let questions = store.intake_questions(true).await?;
                self.set_questions(questions.clone());
                StepOptions::Questions(questions)
            }
            Step::Confirmation => StepOptions::Summary(self.draft()?),
        })
    }

    /// Write the appointment. The chosen time is re-checked first; the store
    /// also refuses a second open appointment on the same date and time.
    pub async fn commit<S: Store>(self, store: &S) -> Result<Appointment, Rejected> {
        match self.try_commit(store).await {
            Ok(appointment) => Ok(appointment),
            Err(error) => {
                warn!("Booking for {} not saved: {}", self.user_id, error);
                Err(Rejected { wizard: self, error })
            }
        }
    }

    async fn try_commit<S: Store>(&self, store: &S) -> BookingResult<Appointment> {
        self.expect_step(Step::Confirmation)?;
        let draft = self.draft()?;
        const TAKEN: &str = "This time is no longer available";

        let still_open = availability::available_slots(store, draft.date)
            .await?
            .iter()
            .any(|s| s.time == draft.time);
        if !still_open {
            return Err(BookingError::Conflict(TAKEN.into()));
        }

        let appointment = store
            .insert_appointment(&draft)
            .await
            .map_err(|e| match e {
                BookingError::Conflict(_) => BookingError::Conflict(TAKEN.into()),
                BookingError::Backend(msg) => {
                    BookingError::Backend(format!("Failed to create appointment: {msg}"))
                }
                other => other,
            })?;
        info!(
            "Booked {} on {} at {} for {}",
            appointment.service_id, appointment.date, appointment.time, appointment.user_id
        );
        Ok(appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewIntakeQuestion, NewService, NewSlot};
    use crate::store::MemoryStore;
    use chrono::NaiveTime;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn time(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    async fn studio(requires_intake: bool) -> (MemoryStore, Service) {
        let store = MemoryStore::new();
        let service = store
            .insert_service(&NewService {
                name: "Lash lifting".into(),
                requires_intake,
                ..Default::default()
            })
            .await
            .unwrap();
        for h in [9, 10] {
            store.insert_slot(NewSlot { date: date(2), time: time(h) }).await.unwrap();
        }
        store
            .insert_intake_question(&NewIntakeQuestion {
                text: "Any allergies?".into(),
                answer_type: AnswerType::YesNo,
                order: 1,
            })
            .await
            .unwrap();
        store
            .insert_intake_question(&NewIntakeQuestion {
                text: "Medication".into(),
                answer_type: AnswerType::Text,
                order: 2,
            })
            .await
            .unwrap();
        (store, service)
    }

    async fn walk_to_time(store: &MemoryStore, service: Service) -> BookingWizard {
        let mut wizard = BookingWizard::new("client-1");
        wizard.select_service(service).unwrap();
        wizard.next().unwrap();
        match wizard.options(store, date(1)).await.unwrap() {
            StepOptions::Dates(dates) => assert_eq!(dates, vec![date(2)]),
            other => panic!("unexpected options {other:?}"),
        }
        wizard.select_date(date(2)).unwrap();
        wizard.next().unwrap();
        let slot = match wizard.options(store, date(1)).await.unwrap() {
            StepOptions::Times(slots) => slots[0].clone(),
            other => panic!("unexpected options {other:?}"),
        };
        wizard.select_slot(slot).unwrap();
        wizard
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(Step::TimeSelection.next(false), Step::Confirmation);
        assert_eq!(Step::TimeSelection.next(true), Step::IntakeForm);
        assert_eq!(Step::Confirmation.previous(false), Step::TimeSelection);
        assert_eq!(Step::Confirmation.previous(true), Step::IntakeForm);
        assert_eq!(Step::ServiceSelection.previous(true), Step::ServiceSelection);
    }

    #[test]
    fn test_guards_block_without_selection() {
        let mut wizard = BookingWizard::new("client-1");
        assert_eq!(wizard.next(), Err(BookingError::validation("Select a service")));
        assert_eq!(wizard.step(), Step::ServiceSelection);
    }

    #[tokio::test]
    async fn test_date_and_time_guards() {
        let (_store, service) = studio(false).await;
        let mut wizard = BookingWizard::new("client-1");
        wizard.select_service(service).unwrap();
        wizard.next().unwrap();
        assert_eq!(wizard.next(), Err(BookingError::validation("Select a date")));
        wizard.select_date(date(2)).unwrap();
        wizard.next().unwrap();
        assert_eq!(wizard.next(), Err(BookingError::validation("Select a time")));
        assert_eq!(wizard.step(), Step::TimeSelection);
    }

    #[tokio::test]
    async fn test_no_intake_skips_form_both_ways() {
        let (store, service) = studio(false).await;
        let mut wizard = walk_to_time(&store, service).await;

        assert_eq!(wizard.next().unwrap(), Step::Confirmation);
        assert_eq!(wizard.visible_steps().len(), 4);
        assert_eq!(wizard.progress(), (4, 4));
        assert_eq!(wizard.back(), Step::TimeSelection);
        assert_eq!(wizard.progress(), (3, 4));
        wizard.next().unwrap();

        let appointment = wizard.commit(&store).await.unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Requested);
        assert_eq!(appointment.time, time(9));
        assert!(appointment.intake.is_none());
    }

    #[tokio::test]
    async fn test_intake_required_before_confirmation() {
        let (store, service) = studio(true).await;
        let mut wizard = walk_to_time(&store, service).await;

        assert_eq!(wizard.next().unwrap(), Step::IntakeForm);
        assert_eq!(wizard.progress(), (4, 5));
        let questions = match wizard.options(&store, date(1)).await.unwrap() {
            StepOptions::Questions(q) => q,
            other => panic!("unexpected options {other:?}"),
        };
        assert_eq!(questions.len(), 2);

        wizard.answer("Any allergies?", IntakeAnswer::YesNo(false)).unwrap();
        assert!(wizard
            .answer("Any allergies?", IntakeAnswer::Text("no".into()))
            .is_err());
        assert_eq!(
            wizard.next(),
            Err(BookingError::validation("Please answer: Medication"))
        );
        wizard
            .answer("Medication", IntakeAnswer::Text("None".into()))
            .unwrap();
        assert_eq!(wizard.next().unwrap(), Step::Confirmation);
        assert_eq!(wizard.back(), Step::IntakeForm);
        wizard.next().unwrap();

        let appointment = wizard.commit(&store).await.unwrap();
        let intake = appointment.intake.unwrap();
        assert_eq!(intake.len(), 2);
        assert_eq!(intake["Any allergies?"], IntakeAnswer::YesNo(false));
    }

    #[tokio::test]
    async fn test_intake_form_must_be_loaded_before_leaving_it() {
        let (store, service) = studio(true).await;
        let mut wizard = walk_to_time(&store, service).await;

        assert_eq!(wizard.next().unwrap(), Step::IntakeForm);
        assert_eq!(
            wizard.next(),
            Err(BookingError::validation("The intake form has not been loaded yet"))
        );
        assert_eq!(wizard.step(), Step::IntakeForm);
        assert!(wizard.answer("Medication", IntakeAnswer::Text("None".into())).is_err());

        wizard.options(&store, date(1)).await.unwrap();
        assert_eq!(
            wizard.next(),
            Err(BookingError::validation("Please answer: Any allergies?"))
        );
    }

    #[tokio::test]
    async fn test_taken_time_keeps_wizard_at_confirmation() {
        let (store, service) = studio(false).await;
        let mut wizard = walk_to_time(&store, service.clone()).await;
        wizard.next().unwrap();

        // Someone else books 09:00 first.
        let mut rival = walk_to_time(&store, service).await;
        rival.next().unwrap();
        rival.commit(&store).await.unwrap();

        let rejected = wizard.commit(&store).await.unwrap_err();
        assert_eq!(
            rejected.error,
            BookingError::Conflict("This time is no longer available".into())
        );
        assert_eq!(rejected.wizard.step(), Step::Confirmation);
        let claimed = store.claimed_times(date(2)).await.unwrap();
        assert_eq!(claimed, vec![time(9)]);

        // Pick another time and retry.
        let mut wizard = rejected.wizard;
        wizard.back();
        let open = match wizard.options(&store, date(1)).await.unwrap() {
            StepOptions::Times(slots) => slots,
            other => panic!("unexpected options {other:?}"),
        };
        assert_eq!(open.len(), 1);
        wizard.select_slot(open[0].clone()).unwrap();
        wizard.next().unwrap();
        assert_eq!(wizard.commit(&store).await.unwrap().time, time(10));
    }

    #[tokio::test]
    async fn test_changing_service_resets_later_choices() {
        let (store, service) = studio(false).await;
        let mut wizard = walk_to_time(&store, service).await;
        wizard.back();
        wizard.back();
        let other = store
            .insert_service(&NewService {
                name: "Brows".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        wizard.select_service(other).unwrap();
        assert!(wizard.date().is_none());
        assert!(wizard.slot().is_none());
    }

    #[test]
    fn test_commit_requires_confirmation_step() {
        let wizard = BookingWizard::new("client-1");
        assert!(wizard.draft().is_err());
    }
}
