// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bearer-token authentication for the dispatch service.
//
// Tokens are HS256 JWTs issued by the account backend.  The subject is the
// account id; the `role` claim decides who may submit print jobs.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use printrelay_core::error::{PrintRelayError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: String,
    pub exp: usize,
}

/// Account role carried by a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Admin,
    Attendant,
    Other(String),
}

impl Role {
    pub fn parse(text: &str) -> Self {
        match text.to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "attendant" => Self::Attendant,
            _ => Self::Other(text.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Attendant => "attendant",
            Self::Other(s) => s,
        }
    }

    pub fn can_print(&self) -> bool {
        matches!(self, Self::Admin | Self::Attendant)
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

impl Caller {
    /// Fail with `Forbidden` unless this caller may submit print jobs.
    pub fn require_print_role(&self) -> Result<()> {
        if self.role.can_print() {
            Ok(())
        } else {
            Err(PrintRelayError::Forbidden(format!(
                "role '{}' may not print",
                self.role.as_str()
            )))
        }
    }
}

/// Verifies (and, for tooling and tests, issues) bearer tokens.
#[derive(Clone)]
pub struct Authenticator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl Authenticator {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(PrintRelayError::Config(
                "dispatch.jwt_secret must be set".into(),
            ));
        }
        Ok(Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        })
    }

    /// Authenticate an `Authorization` header value.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Caller> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(PrintRelayError::Unauthenticated)?;
        self.verify(token)
    }

    pub fn verify(&self, token: &str) -> Result<Caller> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            PrintRelayError::Unauthenticated
        })?;
        Ok(Caller {
            user_id: data.claims.sub,
            role: Role::parse(&data.claims.role),
        })
    }

    pub fn issue(&self, user_id: &str, role: &str, ttl: Duration) -> Result<String> {
        let exp = chrono::Utc::now().timestamp() as usize + ttl.as_secs() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| PrintRelayError::Config(format!("signing token: {e}")))
    }
}
