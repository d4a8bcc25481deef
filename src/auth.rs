use crate::error::ChefError;
use std::sync::{Arc, RwLock};

/// Minimum password length accepted by the sign-in form
const MIN_PASSWORD_LEN: usize = 6;

/// An established identity. Created on login, discarded on logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    pub email: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            email: None,
        }
    }

    /// Attach the sign-in form's email once the form input passes validation
    pub fn with_credentials(mut self, email: &str, password: &str) -> Result<Self, ChefError> {
        validate_credentials(email, password)?;
        self.email = Some(email.trim().to_string());
        Ok(self)
    }
}

/// Shared handle over the current session
///
/// Adapters and the store hold a clone and call `current()` before building
/// any request, so a signed-out client never reaches the network.
#[derive(Debug, Clone, Default)]
pub struct AuthGate {
    session: Arc<RwLock<Option<Session>>>,
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(session: Session) -> Self {
        let gate = Self::new();
        gate.sign_in(session);
        gate
    }

    pub fn sign_in(&self, session: Session) {
        log::info!("Session established for user {}", session.user_id);
        match self.session.write() {
            Ok(mut guard) => *guard = Some(session),
            Err(poisoned) => *poisoned.into_inner() = Some(session),
        }
    }

    pub fn sign_out(&self) {
        log::info!("Session discarded");
        match self.session.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    /// Current session, or `Authentication` when nobody is signed in
    pub fn current(&self) -> Result<Session, ChefError> {
        let guard = match self.session.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().ok_or(ChefError::Authentication)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current().is_ok()
    }
}

/// Check sign-in form input before it is handed to the identity provider
pub fn validate_credentials(email: &str, password: &str) -> Result<(), ChefError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(ChefError::Validation("Заполните все поля".to_string()));
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ChefError::Validation(
            "Пароль должен быть не менее 6 символов".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_signed_out() {
        let gate = AuthGate::new();
        assert!(matches!(gate.current(), Err(ChefError::Authentication)));
    }

    #[test]
    fn test_sign_in_and_out_shared_across_clones() {
        let gate = AuthGate::new();
        let adapter_view = gate.clone();

        gate.sign_in(Session::new("user-1", "token"));
        assert_eq!(adapter_view.current().unwrap().user_id, "user-1");

        gate.sign_out();
        assert!(!adapter_view.is_signed_in());
    }

    #[test]
    fn test_credentials_validation() {
        assert!(validate_credentials("", "secret1").is_err());
        assert!(validate_credentials("cook@example.com", "").is_err());
        assert!(validate_credentials("cook@example.com", "12345").is_err());
        assert!(validate_credentials("cook@example.com", "123456").is_ok());
    }

    #[test]
    fn test_session_with_credentials() {
        let session = Session::new("user-1", "token")
            .with_credentials(" cook@example.com ", "secret1")
            .unwrap();
        assert_eq!(session.email.as_deref(), Some("cook@example.com"));

        let short = Session::new("user-1", "token").with_credentials("cook@example.com", "123");
        assert!(matches!(short, Err(ChefError::Validation(_))));
    }
}
