use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AppointmentOrder, AppointmentQuery, Store};
use crate::error::{BookingError, BookingResult};
use crate::models::{
    Appointment, AppointmentStatus, ClientProfile, IntakeQuestion, IntakeQuestionChanges,
    NewAppointment, NewIntakeQuestion, NewService, NewSlot, Role,
    Service, ServiceChanges, Slot,
};
use crate::session::{self, AuthGrant};

const SLOTS: &str = "available_times";
const APPOINTMENTS: &str = "appointments";
const SERVICES: &str = "services";
const PROFILES: &str = "profiles";
const QUESTIONS: &str = "anamnese_questions";
const ROLES: &str = "user_roles";

/// Client for the hosted backend: PostgREST tables under `/rest/v1` and the
/// auth service under `/auth/v1`.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, alias = "msg", alias = "error_description")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct TimeRow {
    hora: NaiveTime,
}

#[derive(Deserialize)]
struct RoleRow {
    role: Role,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    user: Option<AuthUser>,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Render query parameters, percent-encoding values.
pub(crate) fn query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Map a failed response to the error taxonomy. Unique violations arrive as
/// HTTP 409 and/or Postgres code 23505.
pub(crate) fn classify_error(status: StatusCode, body: &str) -> BookingError {
    let parsed: Option<ApiError> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|e| e.code.as_ref())
        .map(|c| c.as_str().map(str::to_string).unwrap_or_else(|| c.to_string()));
    let message = parsed
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::CONFLICT || code.as_deref() == Some("23505") {
        return BookingError::Conflict(message);
    }
    if message.to_lowercase().contains("already registered") {
        return BookingError::Conflict(message);
    }
    match status {
        StatusCode::NOT_FOUND => BookingError::NotFound(message),
        StatusCode::UNAUTHORIZED => BookingError::Unauthorized(message),
        StatusCode::FORBIDDEN => BookingError::Forbidden(message),
        _ => BookingError::Backend(format!("{status}: {message}")),
    }
}

pub(crate) fn appointment_params(query: &AppointmentQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("select", "*".to_string())];
    if let Some(user_id) = &query.user_id {
        params.push(("user_id", format!("eq.{user_id}")));
    }
    if let Some(date) = query.date {
        params.push(("data", format!("eq.{date}")));
    }
    if let Some(from) = query.from {
        params.push(("data", format!("gte.{from}")));
    }
    if !query.statuses.is_empty() {
        let list: Vec<&str> = query.statuses.iter().map(|s| s.as_wire()).collect();
        params.push(("status", format!("in.({})", list.join(","))));
    }
    let order = match query.order {
        AppointmentOrder::Schedule => "data.asc,hora.asc",
        AppointmentOrder::ScheduleDesc => "data.desc,hora.desc",
        AppointmentOrder::Newest => "criado_em.desc",
    };
    params.push(("order", order.to_string()));
    if let Some(limit) = query.limit {
        params.push(("limit", limit.to_string()));
    }
    params
}

impl RestStore {
    pub fn new(base_url: &str, anon_key: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        })
    }

    /// A copy of this store that acts on behalf of a signed-in user.
    pub fn with_token(&self, access_token: &str) -> Self {
        Self {
            access_token: Some(access_token.to_string()),
            ..self.clone()
        }
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(val) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", val);
        }
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert(AUTHORIZATION, val);
        }
        headers
    }

    fn table_url(&self, table: &str, params: &[(&str, String)]) -> String {
        if params.is_empty() {
            format!("{}/rest/v1/{}", self.base_url, table)
        } else {
            format!("{}/rest/v1/{}?{}", self.base_url, table, query_string(params))
        }
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        prefer: Option<&'static str>,
        body: Option<&B>,
    ) -> BookingResult<String> {
        let mut req = self
            .client
            .request(method.clone(), url)
            .headers(self.default_headers());
        if let Some(prefer) = prefer {
            req = req.header("Prefer", prefer);
        }
        if let Some(body) = body {
            req = req.body(serde_json::to_string(body)?);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!("{} {} (status {}): {}", method, url, status, text);

        if !status.is_success() {
            return Err(classify_error(status, &text));
        }
        Ok(text)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> BookingResult<Vec<T>> {
        let url = self.table_url(table, params);
        let text = self.send::<()>(Method::GET, &url, None, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn insert<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
        prefer: &'static str,
        rows: &B,
    ) -> BookingResult<Vec<T>> {
        let url = self.table_url(table, params);
        let text = self.send(Method::POST, &url, Some(prefer), Some(rows)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn insert_one<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        table: &str,
        row: &B,
    ) -> BookingResult<T> {
        let rows: Vec<T> = self
            .insert(table, &[], "return=representation", &[row])
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BookingError::backend(format!("insert into {table} returned no row")))
    }

    /// PATCH the row with `id`; a filter that matches nothing is `NotFound`.
    async fn patch_by_id<B: Serialize + Sync>(
        &self,
        table: &str,
        id: &str,
        changes: &B,
    ) -> BookingResult<()> {
        let url = self.table_url(table, &[("id", format!("eq.{id}"))]);
        let text = self
            .send(Method::PATCH, &url, Some("return=representation"), Some(changes))
            .await?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&text)?;
        if rows.is_empty() {
            return Err(BookingError::NotFound(format!("{table} {id}")));
        }
        Ok(())
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// Password sign-in. The user id comes from the token's `sub` claim.
    pub async fn sign_in(&self, email: &str, password: &str) -> BookingResult<AuthGrant> {
        let url = self.auth_url("token?grant_type=password");
        let body = serde_json::json!({ "email": email, "password": password });
        let text = self
            .send(Method::POST, &url, None, Some(&body))
            .await
            .map_err(|e| match e {
                BookingError::Backend(msg) if msg.starts_with("400") => {
                    BookingError::Unauthorized("Invalid login or password".into())
                }
                BookingError::Unauthorized(_) => {
                    BookingError::Unauthorized("Invalid login or password".into())
                }
                other => other,
            })?;
        let token: TokenResponse = serde_json::from_str(&text)?;

        let claims = session::decode_claims(&token.access_token);
        let user_id = claims
            .as_ref()
            .map(|c| c.sub.clone())
            .or_else(|| token.user.as_ref().map(|u| u.id.clone()))
            .ok_or_else(|| BookingError::backend("sign-in response carried no user id"))?;
        let email = token
            .user
            .and_then(|u| u.email)
            .or_else(|| claims.and_then(|c| c.email))
            .unwrap_or_else(|| email.to_string());

        info!("Signed in as {} (user_id: {})", email, user_id);
        Ok(AuthGrant {
            user_id,
            email,
            access_token: Some(token.access_token),
        })
    }

    /// Create an account; the profile row is filled from the metadata by the backend.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        whatsapp: &str,
    ) -> BookingResult<()> {
        let url = self.auth_url("signup");
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "nome": first_name, "whatsapp": whatsapp },
        });
        self.send(Method::POST, &url, None, Some(&body)).await?;
        info!("Created account {}", email);
        Ok(())
    }

    pub async fn sign_out(&self) -> BookingResult<()> {
        let url = self.auth_url("logout");
        self.send::<()>(Method::POST, &url, None, None).await?;
        Ok(())
    }
}

impl Store for RestStore {
    async fn open_slots(&self, from: NaiveDate) -> BookingResult<Vec<Slot>> {
        self.select(
            SLOTS,
            &[
                ("select", "*".into()),
                ("ativo", "eq.true".into()),
                ("data", format!("gte.{from}")),
                ("order", "data.asc,hora.asc".into()),
            ],
        )
        .await
    }

    async fn slots_on(&self, date: NaiveDate) -> BookingResult<Vec<Slot>> {
        self.select(
            SLOTS,
            &[
                ("select", "*".into()),
                ("data", format!("eq.{date}")),
                ("ativo", "eq.true".into()),
                ("order", "hora.asc".into()),
            ],
        )
        .await
    }

    async fn claimed_times(&self, date: NaiveDate) -> BookingResult<Vec<NaiveTime>> {
        let claiming: Vec<&str> = AppointmentStatus::CLAIMING
            .iter()
            .map(|s| s.as_wire())
            .collect();
        let rows: Vec<TimeRow> = self
            .select(
                APPOINTMENTS,
                &[
                    ("select", "hora".into()),
                    ("data", format!("eq.{date}")),
                    ("status", format!("in.({})", claiming.join(","))),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.hora).collect())
    }

    async fn insert_slot(&self, slot: NewSlot) -> BookingResult<Slot> {
        let row = self.insert_one(SLOTS, &slot).await?;
        info!("Created slot {} {}", slot.date, slot.time);
        Ok(row)
    }

    async fn upsert_slots(&self, slots: &[NewSlot]) -> BookingResult<usize> {
        if slots.is_empty() {
            return Ok(0);
        }
        // Ignored duplicates are left out of the returned representation.
        let rows: Vec<Slot> = self
            .insert(
                SLOTS,
                &[("on_conflict", "data,hora".into())],
                "resolution=ignore-duplicates,return=representation",
                &slots,
            )
            .await?;
        info!("Upserted {} slots, {} new", slots.len(), rows.len());
        Ok(rows.len())
    }

    async fn deactivate_slot(&self, id: &str) -> BookingResult<()> {
        self.patch_by_id(SLOTS, id, &serde_json::json!({ "ativo": false }))
            .await?;
        info!("Deactivated slot {}", id);
        Ok(())
    }

    async fn insert_appointment(&self, appointment: &NewAppointment) -> BookingResult<Appointment> {
        let row: Appointment = self.insert_one(APPOINTMENTS, appointment).await?;
        info!(
            "Created appointment {} for {} at {} {}",
            row.id, row.user_id, row.date, row.time
        );
        Ok(row)
    }

    async fn update_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
    ) -> BookingResult<()> {
        self.patch_by_id(APPOINTMENTS, id, &serde_json::json!({ "status": status }))
            .await?;
        info!("Appointment {} is now {}", id, status.as_wire());
        Ok(())
    }

    async fn appointments(&self, query: &AppointmentQuery) -> BookingResult<Vec<Appointment>> {
        self.select(APPOINTMENTS, &appointment_params(query)).await
    }

    async fn services(&self, active_only: bool) -> BookingResult<Vec<Service>> {
        let mut params = vec![("select", "*".to_string())];
        if active_only {
            params.push(("ativo", "eq.true".into()));
        }
        params.push(("order", "nome.asc".into()));
        self.select(SERVICES, &params).await
    }

    async fn insert_service(&self, service: &NewService) -> BookingResult<Service> {
        let row: Service = self.insert_one(SERVICES, service).await?;
        info!("Created service {} ({})", row.name, row.id);
        Ok(row)
    }

    async fn update_service(&self, id: &str, changes: &ServiceChanges) -> BookingResult<()> {
        self.patch_by_id(SERVICES, id, changes).await?;
        info!("Updated service {}", id);
        Ok(())
    }

    async fn profiles(&self) -> BookingResult<Vec<ClientProfile>> {
        self.select(
            PROFILES,
            &[("select", "*".into()), ("order", "criado_em.desc".into())],
        )
        .await
    }

    async fn profile_for_user(&self, user_id: &str) -> BookingResult<Option<ClientProfile>> {
        let rows: Vec<ClientProfile> = self
            .select(
                PROFILES,
                &[
                    ("select", "*".into()),
                    ("user_id", format!("eq.{user_id}")),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn intake_questions(&self, active_only: bool) -> BookingResult<Vec<IntakeQuestion>> {
        let mut params = vec![("select", "*".to_string())];
        if active_only {
            params.push(("ativo", "eq.true".into()));
        }
        params.push(("order", "ordem.asc".into()));
        self.select(QUESTIONS, &params).await
    }

    async fn insert_intake_question(
        &self,
        question: &NewIntakeQuestion,
    ) -> BookingResult<IntakeQuestion> {
        self.insert_one(QUESTIONS, question).await
    }

    async fn update_intake_question(
        &self,
        id: &str,
        changes: &IntakeQuestionChanges,
    ) -> BookingResult<()> {
        self.patch_by_id(QUESTIONS, id, changes).await
    }

    async fn role_of(&self, user_id: &str) -> BookingResult<Role> {
        let rows: Vec<RoleRow> = self
            .select(
                ROLES,
                &[("select", "role".into()), ("user_id", format!("eq.{user_id}"))],
            )
            .await?;
        Ok(if rows.iter().any(|r| r.role == Role::Admin) {
            Role::Admin
        } else {
            Role::Client
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_encodes_values() {
        let qs = query_string(&[
            ("status", "in.(pendente,confirmado)".into()),
            ("data", "eq.2024-01-01".into()),
        ]);
        assert_eq!(qs, "status=in.%28pendente%2Cconfirmado%29&data=eq.2024-01-01");
    }

    #[test]
    fn test_table_url() {
        let store = RestStore::new("https://demo.supabase.co/", "anon").unwrap();
        assert_eq!(
            store.table_url("services", &[]),
            "https://demo.supabase.co/rest/v1/services"
        );
        assert_eq!(
            store.table_url("services", &[("order", "nome.asc".into())]),
            "https://demo.supabase.co/rest/v1/services?order=nome.asc"
        );
    }

    #[test]
    fn test_bearer_falls_back_to_anon_key() {
        let store = RestStore::new("https://demo.supabase.co", "anon").unwrap();
        assert_eq!(store.default_headers()[AUTHORIZATION], "Bearer anon");
        let authed = store.with_token("jwt");
        assert_eq!(authed.default_headers()[AUTHORIZATION], "Bearer jwt");
        assert_eq!(authed.default_headers()["apikey"], "anon");
    }

    #[test]
    fn test_classify_unique_violation() {
        let body = r#"{"code":"23505","details":null,"hint":null,"message":"duplicate key value violates unique constraint"}"#;
        assert!(matches!(
            classify_error(StatusCode::CONFLICT, body),
            BookingError::Conflict(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::BAD_REQUEST, body),
            BookingError::Conflict(_)
        ));
    }

    #[test]
    fn test_classify_other_failures() {
        let err = classify_error(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert_eq!(err, BookingError::Backend("500 Internal Server Error: oops".into()));

        let body = r#"{"code":"42501","message":"permission denied for table services"}"#;
        assert!(matches!(
            classify_error(StatusCode::FORBIDDEN, body),
            BookingError::Forbidden(_)
        ));

        let body = r#"{"code":422,"msg":"User already registered"}"#;
        assert!(matches!(
            classify_error(StatusCode::UNPROCESSABLE_ENTITY, body),
            BookingError::Conflict(_)
        ));
    }

    #[test]
    fn test_appointment_params() {
        let query = AppointmentQuery {
            user_id: Some("u1".into()),
            statuses: AppointmentStatus::CLAIMING.to_vec(),
            order: AppointmentOrder::Newest,
            limit: Some(20),
            ..Default::default()
        };
        let params = appointment_params(&query);
        assert!(params.contains(&("user_id", "eq.u1".to_string())));
        assert!(params.contains(&("status", "in.(pendente,confirmado)".to_string())));
        assert!(params.contains(&("order", "criado_em.desc".to_string())));
        assert!(params.contains(&("limit", "20".to_string())));
    }
}
