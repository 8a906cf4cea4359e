//! Connection-related data models.
//!
//! A [`Connection`] is the persisted record of a database the user has opened.
//! Its identity is derived from the URL alone, so the same URL always maps to
//! the same [`ConnectionId`], across restarts and machines.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported database backends, discriminated by URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Includes MariaDB
    MySql,
    Postgres,
    Sqlite,
}

impl Backend {
    /// Parse the backend from a connection URL's scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.trim_start().to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }

    /// The short tag used to key dialect-specific templates.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Human readable dialect name, as used in prompts.
    pub fn dialect_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    /// Quote an identifier (table or column name).
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", name.replace('`', "``")),
            Self::Postgres | Self::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Stable identifier of a connection: a name-based UUID over the URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn from_url(url: &str) -> Self {
        Self(
            Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
                .simple()
                .to_string(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted connection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Contains credentials - log through [`mask_url`] only
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Connection {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            alias: None,
            tags: Vec::new(),
        }
    }

    /// Identity of this record; changes whenever the URL changes.
    pub fn id(&self) -> ConnectionId {
        ConnectionId::from_url(&self.url)
    }

    pub fn backend(&self) -> Option<Backend> {
        Backend::from_url(&self.url)
    }

    /// Alias if set, otherwise the masked URL.
    pub fn display_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| mask_url(&self.url))
    }
}

/// Replace the password of a URL with `****` so it can be logged or listed.
pub fn mask_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_ok() {
                parsed.to_string()
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}

/// Database name from the URL path, if the URL targets one.
pub fn database_name(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let name = parsed.path().trim_start_matches('/');
    if name.is_empty() || name.contains('/') {
        None
    } else {
        Some(name.to_string())
    }
}
