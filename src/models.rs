use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub studio: StudioConfig,
    #[serde(default)]
    pub account: Option<Account>,
    #[serde(default)]
    pub bulk: BulkDefaults,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StudioConfig {
    pub name: String,
    pub timezone: String,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            name: "Studio".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Account {
    /// Email address or WhatsApp number
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BulkDefaults {
    pub times: Vec<String>,
    pub weekdays: Vec<u8>,
}

impl Default for BulkDefaults {
    fn default() -> Self {
        Self {
            times: ["09:00", "10:00", "11:00", "14:00", "15:00", "16:00"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            weekdays: vec![1, 2, 3, 4, 5],
        }
    }
}

/// One bookable (date, time) unit of schedule inventory (`available_times`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Slot {
    pub id: String,
    #[serde(rename = "data")]
    pub date: NaiveDate,
    #[serde(rename = "hora")]
    pub time: NaiveTime,
    #[serde(rename = "ativo", default = "default_true", deserialize_with = "null_as_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct NewSlot {
    #[serde(rename = "data")]
    pub date: NaiveDate,
    #[serde(rename = "hora")]
    pub time: NaiveTime,
}

/// Appointment lifecycle. Wire names are the backend enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AppointmentStatus {
    #[serde(rename = "pendente")]
    Requested,
    #[serde(rename = "confirmado")]
    Confirmed,
    #[serde(rename = "concluido")]
    Completed,
    #[serde(rename = "cancelado")]
    Cancelled,
}

/// Display metadata for a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMeta {
    pub label: &'static str,
    pub css_class: &'static str,
    pub notification: NotificationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    New,
    Confirmed,
    Cancelled,
}

impl NotificationKind {
    pub fn title(self) -> &'static str {
        match self {
            NotificationKind::New => "New appointment",
            NotificationKind::Confirmed => "Appointment confirmed",
            NotificationKind::Cancelled => "Appointment cancelled",
        }
    }
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Requested,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    /// Statuses that hold on to their (date, time) slot.
    pub const CLAIMING: [AppointmentStatus; 2] =
        [AppointmentStatus::Requested, AppointmentStatus::Confirmed];

    pub fn claims_slot(self) -> bool {
        Self::CLAIMING.contains(&self)
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            AppointmentStatus::Requested => "pendente",
            AppointmentStatus::Confirmed => "confirmado",
            AppointmentStatus::Completed => "concluido",
            AppointmentStatus::Cancelled => "cancelado",
        }
    }

    /// Accepts the wire name or the English name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pendente" | "requested" | "pending" => Some(AppointmentStatus::Requested),
            "confirmado" | "confirmed" => Some(AppointmentStatus::Confirmed),
            "concluido" | "completed" => Some(AppointmentStatus::Completed),
            "cancelado" | "cancelled" | "canceled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn meta(self) -> StatusMeta {
        match self {
            AppointmentStatus::Requested => StatusMeta {
                label: "Requested",
                css_class: "status-pending",
                notification: NotificationKind::New,
            },
            AppointmentStatus::Confirmed => StatusMeta {
                label: "Confirmed",
                css_class: "status-booked",
                notification: NotificationKind::Confirmed,
            },
            AppointmentStatus::Completed => StatusMeta {
                label: "Completed",
                css_class: "status-active",
                notification: NotificationKind::New,
            },
            AppointmentStatus::Cancelled => StatusMeta {
                label: "Cancelled",
                css_class: "status-error",
                notification: NotificationKind::Cancelled,
            },
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.meta().label)
    }
}

/// A single intake answer: yes/no or free text.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum IntakeAnswer {
    YesNo(bool),
    Text(String),
}

/// Question text → answer, as stored in `anamnese_json`.
pub type IntakeAnswers = BTreeMap<String, IntakeAnswer>;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Appointment {
    pub id: String,
    pub user_id: String,
    pub service_id: String,
    #[serde(rename = "data")]
    pub date: NaiveDate,
    #[serde(rename = "hora")]
    pub time: NaiveTime,
    #[serde(default = "default_status", deserialize_with = "null_as_requested")]
    pub status: AppointmentStatus,
    #[serde(rename = "anamnese_json", default)]
    pub intake: Option<IntakeAnswers>,
    #[serde(rename = "criado_em", default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAppointment {
    pub user_id: String,
    pub service_id: String,
    #[serde(rename = "data")]
    pub date: NaiveDate,
    #[serde(rename = "hora")]
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    #[serde(rename = "anamnese_json")]
    pub intake: Option<IntakeAnswers>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "descricao", default)]
    pub description: Option<String>,
    #[serde(rename = "duracao")]
    pub duration_minutes: u32,
    #[serde(rename = "valor", default)]
    pub price: Option<f64>,
    #[serde(rename = "exibir_valor", default = "default_true", deserialize_with = "null_as_true")]
    pub show_price: bool,
    #[serde(rename = "requer_anamnese", default, deserialize_with = "null_as_default")]
    pub requires_intake: bool,
    #[serde(rename = "ativo", default = "default_true", deserialize_with = "null_as_true")]
    pub active: bool,
}

impl Service {
    /// Price as shown to clients, if the service publishes it.
    pub fn visible_price(&self) -> Option<f64> {
        self.price.filter(|p| self.show_price && *p > 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewService {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "descricao")]
    pub description: Option<String>,
    #[serde(rename = "duracao")]
    pub duration_minutes: u32,
    #[serde(rename = "valor")]
    pub price: Option<f64>,
    #[serde(rename = "exibir_valor")]
    pub show_price: bool,
    #[serde(rename = "requer_anamnese")]
    pub requires_intake: bool,
}

impl Default for NewService {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            duration_minutes: 60,
            price: None,
            show_price: true,
            requires_intake: false,
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceChanges {
    #[serde(rename = "nome", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "descricao", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(rename = "duracao", skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(rename = "valor", skip_serializing_if = "Option::is_none")]
    pub price: Option<Option<f64>>,
    #[serde(rename = "exibir_valor", skip_serializing_if = "Option::is_none")]
    pub show_price: Option<bool>,
    #[serde(rename = "requer_anamnese", skip_serializing_if = "Option::is_none")]
    pub requires_intake: Option<bool>,
    #[serde(rename = "ativo", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientProfile {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "nome")]
    pub first_name: String,
    #[serde(rename = "sobrenome", default)]
    pub last_name: Option<String>,
    pub whatsapp: String,
    #[serde(rename = "criado_em", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ClientProfile {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "String")]
pub enum AnswerType {
    #[serde(rename = "boolean")]
    YesNo,
    #[default]
    #[serde(rename = "text")]
    Text,
}

impl From<String> for AnswerType {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("boolean") {
            AnswerType::YesNo
        } else {
            AnswerType::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IntakeQuestion {
    pub id: String,
    #[serde(rename = "pergunta")]
    pub text: String,
    #[serde(rename = "tipo", default, deserialize_with = "null_as_default")]
    pub answer_type: AnswerType,
    #[serde(rename = "ordem", default, deserialize_with = "null_as_default")]
    pub order: i32,
    #[serde(rename = "ativo", default = "default_true", deserialize_with = "null_as_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewIntakeQuestion {
    #[serde(rename = "pergunta")]
    pub text: String,
    #[serde(rename = "tipo")]
    pub answer_type: AnswerType,
    #[serde(rename = "ordem")]
    pub order: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntakeQuestionChanges {
    #[serde(rename = "pergunta", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "tipo", skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<AnswerType>,
    #[serde(rename = "ordem", skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
    #[serde(rename = "ativo", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Client,
}

fn default_true() -> bool {
    true
}

fn default_status() -> AppointmentStatus {
    AppointmentStatus::Requested
}

// Nullable backend columns fall back to the same value as a missing one.
fn null_as_true<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(d)?.unwrap_or(true))
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn null_as_requested<'de, D: Deserializer<'de>>(d: D) -> Result<AppointmentStatus, D::Error> {
    Ok(Option::<AppointmentStatus>::deserialize(d)?.unwrap_or_else(default_status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&AppointmentStatus::Confirmed).unwrap();
        assert_eq!(json, "\"confirmado\"");
        let parsed: AppointmentStatus = serde_json::from_str("\"cancelado\"").unwrap();
        assert_eq!(parsed, AppointmentStatus::Cancelled);
        for status in AppointmentStatus::ALL {
            assert_eq!(AppointmentStatus::parse(status.as_wire()), Some(status));
        }
    }

    #[test]
    fn test_status_parse_english() {
        assert_eq!(
            AppointmentStatus::parse("Requested"),
            Some(AppointmentStatus::Requested)
        );
        assert_eq!(AppointmentStatus::parse("done"), None);
    }

    #[test]
    fn test_only_open_statuses_claim_slot() {
        assert!(AppointmentStatus::Requested.claims_slot());
        assert!(AppointmentStatus::Confirmed.claims_slot());
        assert!(!AppointmentStatus::Completed.claims_slot());
        assert!(!AppointmentStatus::Cancelled.claims_slot());
    }

    #[test]
    fn test_appointment_row_from_backend() {
        let row = serde_json::json!({
            "id": "a1",
            "user_id": "u1",
            "service_id": "s1",
            "data": "2024-01-01",
            "hora": "09:00:00",
            "status": "confirmado",
            "anamnese_json": {"Allergies?": true, "Medication": "none"},
            "criado_em": "2023-12-20T10:00:00Z"
        });
        let apt: Appointment = serde_json::from_value(row).unwrap();
        assert_eq!(apt.time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        let intake = apt.intake.unwrap();
        assert_eq!(intake["Allergies?"], IntakeAnswer::YesNo(true));
        assert_eq!(intake["Medication"], IntakeAnswer::Text("none".into()));
    }

    #[test]
    fn test_appointment_without_intake_serializes_null() {
        let apt = NewAppointment {
            user_id: "u1".into(),
            service_id: "s1".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            status: AppointmentStatus::Requested,
            intake: None,
        };
        let value = serde_json::to_value(&apt).unwrap();
        assert_eq!(value["anamnese_json"], serde_json::Value::Null);
        assert_eq!(value["status"], "pendente");
        assert_eq!(value["hora"], "10:00:00");
    }

    #[test]
    fn test_service_changes_skip_untouched() {
        let changes = ServiceChanges {
            active: Some(false),
            ..Default::default()
        };
        let value = serde_json::to_value(&changes).unwrap();
        assert_eq!(value, serde_json::json!({"ativo": false}));
    }

    #[test]
    fn test_visible_price() {
        let mut svc = Service {
            id: "s1".into(),
            name: "Cut".into(),
            description: None,
            duration_minutes: 60,
            price: Some(80.0),
            show_price: true,
            requires_intake: false,
            active: true,
        };
        assert_eq!(svc.visible_price(), Some(80.0));
        svc.show_price = false;
        assert_eq!(svc.visible_price(), None);
    }

    #[test]
    fn test_question_type_defaults_to_text() {
        let q: IntakeQuestion =
            serde_json::from_value(serde_json::json!({"id": "q1", "pergunta": "Notes"})).unwrap();
        assert_eq!(q.answer_type, AnswerType::Text);
        assert!(q.active);
        let q: IntakeQuestion = serde_json::from_value(
            serde_json::json!({"id": "q2", "pergunta": "Pregnant?", "tipo": "boolean", "ordem": 1}),
        )
        .unwrap();
        assert_eq!(q.answer_type, AnswerType::YesNo);
    }

    #[test]
    fn test_null_columns_use_defaults() {
        let svc: Service = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "nome": "Brows",
            "duracao": 30,
            "valor": null,
            "exibir_valor": null,
            "requer_anamnese": null,
            "ativo": null
        }))
        .unwrap();
        assert!(svc.show_price);
        assert!(!svc.requires_intake);
        assert!(svc.active);
    }
}
