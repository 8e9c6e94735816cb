use base64::prelude::*;
use serde::Deserialize;
use tracing::info;

use crate::error::{BookingError, BookingResult};
use crate::models::Role;
use crate::store::{RestStore, Store};

const WHATSAPP_DOMAIN: &str = "whatsapp.local";

/// What the auth service hands back on sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthGrant {
    pub user_id: String,
    pub email: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = BASE64_URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Keep only the digits of a phone number.
pub fn normalize_whatsapp(number: &str) -> String {
    number.chars().filter(char::is_ascii_digit).collect()
}

/// `(DD) DDDDD-DDDD` for 11-digit numbers, unchanged otherwise.
pub fn format_whatsapp(number: &str) -> String {
    let digits = normalize_whatsapp(number);
    if digits.len() == 11 {
        format!("({}) {}-{}", &digits[..2], &digits[2..7], &digits[7..])
    } else {
        number.to_string()
    }
}

/// Accounts are keyed by email; clients sign in with their WhatsApp number,
/// which maps to a synthetic address.
pub fn login_email(login: &str) -> String {
    let login = login.trim();
    if login.contains('@') {
        login.to_string()
    } else {
        format!("{}@{}", normalize_whatsapp(login), WHATSAPP_DOMAIN)
    }
}

pub fn validate_sign_up(first_name: &str, whatsapp: &str, password: &str) -> BookingResult<()> {
    if first_name.trim().is_empty() {
        return Err(BookingError::validation("Please enter your name"));
    }
    if normalize_whatsapp(whatsapp).len() < 10 {
        return Err(BookingError::validation("Please enter a valid WhatsApp number"));
    }
    if password.is_empty() {
        return Err(BookingError::validation("Please choose a password"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    access_token: Option<String>,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

/// Holds the signed-in user, if any. Created empty, filled by [`resolve`],
/// emptied by [`clear`] on sign-out.
///
/// [`resolve`]: SessionContext::resolve
/// [`clear`]: SessionContext::clear
#[derive(Debug, Default)]
pub struct SessionContext {
    current: Option<Session>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn an auth grant into the current session, looking up the user's role.
    pub async fn resolve<S: Store>(&mut self, store: &S, grant: AuthGrant) -> BookingResult<&Session> {
        let role = store.role_of(&grant.user_id).await?;
        info!("Session started for {} as {:?}", grant.email, role);
        Ok(self.current.insert(Session {
            user_id: grant.user_id,
            email: grant.email,
            role,
            access_token: grant.access_token,
        }))
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) -> Option<Session> {
        let previous = self.current.take();
        if let Some(s) = &previous {
            info!("Session ended for {}", s.email);
        }
        previous
    }

    pub fn require_client(&self) -> BookingResult<&Session> {
        self.current
            .as_ref()
            .ok_or_else(|| BookingError::Unauthorized("please sign in".into()))
    }

    pub fn require_admin(&self) -> BookingResult<&Session> {
        let session = self.require_client()?;
        if !session.is_admin() {
            return Err(BookingError::Forbidden(format!(
                "{} is not an administrator",
                session.email
            )));
        }
        Ok(session)
    }

    /// Sign in with an email or WhatsApp number against the auth service.
    pub async fn sign_in(
        &mut self,
        auth: &RestStore,
        login: &str,
        password: &str,
    ) -> BookingResult<&Session> {
        let grant = auth.sign_in(&login_email(login), password).await?;
        let store = match &grant.access_token {
            Some(token) => auth.with_token(token),
            None => auth.clone(),
        };
        self.resolve(&store, grant).await
    }

    /// Revoke the current token, if any, and drop the session.
    pub async fn sign_out(&mut self, auth: &RestStore) -> BookingResult<()> {
        let Some(session) = self.clear() else {
            return Ok(());
        };
        if let Some(token) = session.access_token() {
            auth.with_token(token).sign_out().await?;
        }
        Ok(())
    }
}

/// Register a client account keyed by WhatsApp number.
pub async fn sign_up(
    auth: &RestStore,
    first_name: &str,
    whatsapp: &str,
    password: &str,
) -> BookingResult<String> {
    validate_sign_up(first_name, whatsapp, password)?;
    let email = login_email(whatsapp);
    auth.sign_up(&email, password, first_name.trim(), &normalize_whatsapp(whatsapp))
        .await
        .map_err(|e| e.on_conflict("This WhatsApp number is already registered"))?;
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn grant(user_id: &str) -> AuthGrant {
        AuthGrant {
            user_id: user_id.into(),
            email: format!("{user_id}@studio.local"),
            access_token: None,
        }
    }

    #[test]
    fn test_decode_claims() {
        let payload = BASE64_URL_SAFE_NO_PAD
            .encode(r#"{"sub":"8d1c","email":"ana@studio.local","exp":1700000000}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig");
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.sub, "8d1c");
        assert_eq!(claims.email.as_deref(), Some("ana@studio.local"));
        assert!(decode_claims("not-a-jwt").is_none());
    }

    #[test]
    fn test_whatsapp_helpers() {
        assert_eq!(normalize_whatsapp("(11) 98765-4321"), "11987654321");
        assert_eq!(format_whatsapp("11987654321"), "(11) 98765-4321");
        assert_eq!(format_whatsapp("12345"), "12345");
        assert_eq!(login_email("(11) 98765-4321"), "11987654321@whatsapp.local");
        assert_eq!(login_email("admin@studio.local"), "admin@studio.local");
    }

    #[test]
    fn test_validate_sign_up() {
        assert!(validate_sign_up("Ana", "11987654321", "secret").is_ok());
        assert_eq!(
            validate_sign_up("  ", "11987654321", "secret"),
            Err(BookingError::validation("Please enter your name"))
        );
        assert!(validate_sign_up("Ana", "123", "secret").is_err());
    }

    #[tokio::test]
    async fn test_guards_follow_lifecycle() {
        let store = MemoryStore::new();
        store.grant_role("boss", Role::Admin).unwrap();
        let mut ctx = SessionContext::new();

        assert!(matches!(ctx.require_client(), Err(BookingError::Unauthorized(_))));

        ctx.resolve(&store, grant("ana")).await.unwrap();
        assert!(ctx.require_client().is_ok());
        assert!(matches!(ctx.require_admin(), Err(BookingError::Forbidden(_))));

        ctx.resolve(&store, grant("boss")).await.unwrap();
        assert!(ctx.require_admin().is_ok());

        let ended = ctx.clear().unwrap();
        assert_eq!(ended.user_id, "boss");
        assert!(ctx.current().is_none());
        assert!(matches!(ctx.require_admin(), Err(BookingError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_sign_out_without_session_is_a_no_op() {
        let auth = RestStore::new("http://127.0.0.1:9", "anon").unwrap();
        let mut ctx = SessionContext::new();
        ctx.sign_out(&auth).await.unwrap();
        assert!(ctx.current().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_validates_before_calling_backend() {
        let auth = RestStore::new("http://127.0.0.1:9", "anon").unwrap();
        let err = sign_up(&auth, "  ", "11987654321", "pw").await.unwrap_err();
        assert_eq!(err, BookingError::validation("Please enter your name"));
    }
}
