//! Connect-string handling.
//!
//! The wire format is `user/password@//host:port/service`, read either from
//! a literal string or from the `FEED_DB_*` environment variables.

use std::env;
use std::fmt;

use crate::error::DbError;

/// Environment variables holding the connection coordinates.
pub const ENV_USER: &str = "FEED_DB_USER";
pub const ENV_PASSWORD: &str = "FEED_DB_PASSWORD";
pub const ENV_HOST: &str = "FEED_DB_HOST";
pub const ENV_PORT: &str = "FEED_DB_PORT";
pub const ENV_SVC: &str = "FEED_DB_SVC";

/// Parsed connection coordinates for the event store database.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectSpec {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub service: String,
}

impl fmt::Debug for ConnectSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectSpec")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service", &self.service)
            .finish()
    }
}

impl fmt::Display for ConnectSpec {
    /// Renders the canonical `user/password@//host:port/service` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@//{}:{}/{}",
            self.user, self.password, self.host, self.port, self.service
        )
    }
}

impl ConnectSpec {
    /// Parse a `user/password@//host:port/service` connect string.
    pub fn parse(s: &str) -> Result<Self, DbError> {
        let invalid = || DbError::InvalidConnectString(s.to_string());

        let (user, rest) = s.split_once('/').ok_or_else(invalid)?;
        let (password, rest) = rest.split_once("@//").ok_or_else(invalid)?;
        let (hostport, service) = rest.split_once('/').ok_or_else(invalid)?;
        let (host, port) = hostport.split_once(':').ok_or_else(invalid)?;

        if user.is_empty() || host.is_empty() || service.is_empty() {
            return Err(invalid());
        }

        let port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            service: service.to_string(),
        })
    }

    /// Build the spec from the `FEED_DB_*` environment variables.
    /// Every missing variable is reported, not just the first.
    pub fn from_env() -> Result<Self, DbError> {
        let mut missing = Vec::new();
        let mut read = |name: &str| match env::var(name) {
            Ok(v) if !v.is_empty() => v,
            _ => {
                missing.push(name.to_string());
                String::new()
            }
        };

        let user = read(ENV_USER);
        let password = read(ENV_PASSWORD);
        let host = read(ENV_HOST);
        let port = read(ENV_PORT);
        let service = read(ENV_SVC);

        if !missing.is_empty() {
            return Err(DbError::MissingConfig(missing.join(", ")));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| DbError::MissingConfig(format!("{} must be a port number", ENV_PORT)))?;

        Ok(Self {
            user,
            password,
            host,
            port,
            service,
        })
    }

    /// The PostgreSQL URL the driver consumes.
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.service
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_through_display() {
        let raw = "esusr/secret@//db.internal:5432/eventstore";
        let spec = ConnectSpec::parse(raw).unwrap();
        assert_eq!(spec.user, "esusr");
        assert_eq!(spec.password, "secret");
        assert_eq!(spec.host, "db.internal");
        assert_eq!(spec.port, 5432);
        assert_eq!(spec.service, "eventstore");
        assert_eq!(spec.to_string(), raw);
    }

    #[test]
    fn parse_rejects_malformed_strings() {
        for bad in [
            "",
            "useronly",
            "user/pass@host:5432/svc",
            "user/pass@//host/svc",
            "user/pass@//host:notaport/svc",
            "/pass@//host:5432/svc",
        ] {
            assert!(ConnectSpec::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn database_url_targets_postgres() {
        let spec = ConnectSpec::parse("u/p@//localhost:5432/es").unwrap();
        assert_eq!(spec.database_url(), "postgres://u:p@localhost:5432/es");
    }

    #[test]
    fn debug_redacts_password() {
        let spec = ConnectSpec::parse("u/hunter2@//localhost:5432/es").unwrap();
        let debug = format!("{:?}", spec);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    #[serial_test::serial]
    fn from_env_collects_all_missing_variables() {
        for var in [ENV_USER, ENV_PASSWORD, ENV_HOST, ENV_PORT, ENV_SVC] {
            std::env::remove_var(var);
        }
        std::env::set_var(ENV_USER, "esusr");

        let err = ConnectSpec::from_env().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(ENV_PASSWORD));
        assert!(msg.contains(ENV_HOST));
        assert!(msg.contains(ENV_PORT));
        assert!(msg.contains(ENV_SVC));
        assert!(!msg.contains("FEED_DB_USER,"));

        std::env::remove_var(ENV_USER);
    }

    #[test]
    #[serial_test::serial]
    fn from_env_builds_spec() {
        std::env::set_var(ENV_USER, "esusr");
        std::env::set_var(ENV_PASSWORD, "password");
        std::env::set_var(ENV_HOST, "localhost");
        std::env::set_var(ENV_PORT, "5432");
        std::env::set_var(ENV_SVC, "eventstore");

        let spec = ConnectSpec::from_env().unwrap();
        assert_eq!(spec.to_string(), "esusr/password@//localhost:5432/eventstore");

        for var in [ENV_USER, ENV_PASSWORD, ENV_HOST, ENV_PORT, ENV_SVC] {
            std::env::remove_var(var);
        }
    }
}
