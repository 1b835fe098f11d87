//! Authentication collaborators.
//!
//! An [`Authenticator`] is invoked once for every `CONNECT` frame. It may
//! read external material (credential files, signing keys) to answer the
//! server's nonce; the connection treats the resulting [`Credentials`] as
//! opaque fields to copy into `CONNECT`.

use std::sync::Arc;

use crate::{error::ClientError, proto::ConnectInfo};

/// Authentication fields placed into `CONNECT`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub pass: Option<String>,
    /// Bearer token.
    pub auth_token: Option<String>,
    /// User JWT.
    pub jwt: Option<String>,
    /// Public nkey.
    pub nkey: Option<String>,
    /// Signature of the server nonce.
    pub sig: Option<String>,
}

impl Credentials {
    /// Reject combinations the server cannot interpret.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidAuth`] when a user and a token are both
    /// present, or a password is given without a user.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.user.is_some() && self.auth_token.is_some() {
            return Err(ClientError::InvalidAuth(
                "user and token cannot both be supplied",
            ));
        }
        if self.pass.is_some() && self.user.is_none() {
            return Err(ClientError::InvalidAuth("password supplied without user"));
        }
        Ok(())
    }

    /// Whether no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool { *self == Self::default() }

    pub(crate) fn apply_to(self, connect: &mut ConnectInfo) {
        connect.user = self.user;
        connect.pass = self.pass;
        connect.auth_token = self.auth_token;
        connect.jwt = self.jwt;
        connect.nkey = self.nkey;
        connect.sig = self.sig;
    }
}

/// Produces credentials for a `CONNECT` frame.
pub trait Authenticator: Send + Sync + 'static {
    /// Build credentials, optionally signing the server `nonce`.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when credentials cannot be produced; the
    /// connect attempt then fails.
    fn authenticate(&self, nonce: Option<&str>) -> Result<Credentials, ClientError>;
}

/// Shared handle to an [`Authenticator`].
pub type SharedAuthenticator = Arc<dyn Authenticator>;

impl<F> Authenticator for F
where
    F: Fn(Option<&str>) -> Result<Credentials, ClientError> + Send + Sync + 'static,
{
    fn authenticate(&self, nonce: Option<&str>) -> Result<Credentials, ClientError> { self(nonce) }
}

/// User and password authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPassword {
    user: String,
    pass: String,
}

impl UserPassword {
    /// Authenticate as `user` with `pass`.
    #[must_use]
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }
}

impl Authenticator for UserPassword {
    fn authenticate(&self, _nonce: Option<&str>) -> Result<Credentials, ClientError> {
        Ok(Credentials {
            user: Some(self.user.clone()),
            pass: Some(self.pass.clone()),
            ..Credentials::default()
        })
    }
}

/// Bearer token authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenAuth(String);

impl TokenAuth {
    /// Authenticate with `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self { Self(token.into()) }
}

impl Authenticator for TokenAuth {
    fn authenticate(&self, _nonce: Option<&str>) -> Result<Credentials, ClientError> {
        Ok(Credentials {
            auth_token: Some(self.0.clone()),
            ..Credentials::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_token_together_are_rejected() {
        let credentials = Credentials {
            user: Some("a".into()),
            auth_token: Some("t".into()),
            ..Credentials::default()
        };
        assert!(matches!(
            credentials.validate(),
            Err(ClientError::InvalidAuth(_))
        ));
    }

    #[test]
    fn password_requires_user() {
        let credentials = Credentials {
            pass: Some("secret".into()),
            ..Credentials::default()
        };
        assert!(credentials.validate().is_err());
    }

    #[test]
    fn closures_receive_the_nonce() {
        let signer = |nonce: Option<&str>| {
            Ok(Credentials {
                nkey: Some("UKEY".into()),
                sig: nonce.map(|n| format!("signed-{n}")),
                ..Credentials::default()
            })
        };
        let credentials = signer.authenticate(Some("abc")).expect("sign nonce");
        assert_eq!(credentials.sig.as_deref(), Some("signed-abc"));
    }

    #[test]
    fn credentials_fill_connect_fields() {
        let mut connect = ConnectInfo::default();
        UserPassword::new("derek", "pw")
            .authenticate(None)
            .expect("credentials")
            .apply_to(&mut connect);
        assert_eq!(connect.user.as_deref(), Some("derek"));
        assert_eq!(connect.pass.as_deref(), Some("pw"));
        assert_eq!(connect.auth_token, None);
    }
}
