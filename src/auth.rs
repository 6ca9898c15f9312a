use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{PgWireError, PgWireResult};

/// Cleartext auth with one shared password. Any user name is accepted, but
/// the startup message must carry one.
#[derive(Debug)]
pub struct RoomBookAuthSource {
    password: String,
}

impl RoomBookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }

    fn password_for(&self, user: Option<&str>) -> PgWireResult<Password> {
        let Some(user) = user else {
            return Err(PgWireError::UserNameRequired);
        };
        tracing::debug!("password login for user {user:?}");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[async_trait]
impl AuthSource for RoomBookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        self.password_for(login.user())
    }
}
