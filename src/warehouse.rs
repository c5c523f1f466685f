//! ClickHouse warehouse client.
//!
//! The statement warehouses are reached over ClickHouse's HTTP interface:
//! queries are posted with `FORMAT JSONEachRow` appended and each response
//! line is deserialized into a typed row. Analytics SQL is assembled as
//! strings (the queries lean heavily on ClickHouse-specific functions), so
//! every interpolated literal must go through [`quote`]/[`quote_list`].

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::WarehouseConfig;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("warehouse request failed")]
    Request(#[from] reqwest::Error),
    #[error("warehouse query returned {status}: {body}")]
    Query { status: u16, body: String },
    #[error("failed to parse warehouse row")]
    Parse(#[source] anyhow::Error),
}

/// One ClickHouse connection (there are two: current and pre-2025).
#[derive(Debug, Clone)]
pub struct Warehouse {
    name: &'static str,
    client: reqwest::Client,
    url: Url,
    user: Option<String>,
    password: Option<String>,
}

impl Warehouse {
    pub fn new(name: &'static str, config: &WarehouseConfig) -> Result<Self> {
        let mut url = Url::parse(&config.url)?;
        if let Some(database) = &config.database {
            url.query_pairs_mut().append_pair("database", database);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            name,
            client,
            url,
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Identifies this warehouse in logs and status payloads.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run a SELECT and deserialize every row.
    pub async fn fetch_all<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>, WarehouseError> {
        let body = self.execute(sql).await?;
        let mut rows = Vec::new();
        for line in body.lines() {
            if line.is_empty() {
                continue;
            }
            rows.push(parse_row(line).map_err(WarehouseError::Parse)?);
        }
        Ok(rows)
    }

    /// Run a SELECT expected to produce at most one row.
    pub async fn fetch_optional<T: DeserializeOwned>(
        &self,
        sql: &str,
    ) -> Result<Option<T>, WarehouseError> {
        Ok(self.fetch_all(sql).await?.into_iter().next())
    }

    async fn execute(&self, sql: &str) -> Result<String, WarehouseError> {
        let query = format!("{sql} FORMAT JSONEachRow");
        debug!(warehouse = self.name, bytes = query.len(), "executing warehouse query");

        let mut request = self.client.post(self.url.clone()).body(query);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(warehouse = self.name, status = status.as_u16(), "warehouse query failed");
            return Err(WarehouseError::Query {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        Ok(body)
    }
}

/// Parse one JSONEachRow line, reporting the serde path on failure.
fn parse_row<T: DeserializeOwned>(line: &str) -> Result<T> {
    let jd = &mut serde_json::Deserializer::from_str(line);
    match serde_path_to_error::deserialize(jd) {
        Ok(value) => Ok(value),
        Err(err) => {
            let path = err.path().to_string();
            Err(anyhow::anyhow!("at path '{path}': {}", err.inner()))
        }
    }
}

/// Escape a string for use inside a single-quoted ClickHouse literal.
pub fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Quote a string as a ClickHouse literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", escape(value))
}

/// Quote a list of strings for an `IN (...)` clause. Empty lists become
/// `('')` so the clause stays syntactically valid and matches nothing.
pub fn quote_list<S: AsRef<str>>(values: &[S]) -> String {
    if values.is_empty() {
        return "('')".to_string();
    }
    let quoted: Vec<String> = values.iter().map(|v| quote(v.as_ref())).collect();
    format!("({})", quoted.join(", "))
}

/// Deserialize ClickHouse 64-bit integers, which arrive quoted in JSON
/// output formats (`output_format_json_quote_64bit_integers`).
pub mod ch_u64 {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Deserialize ClickHouse `DateTime` values ("YYYY-MM-DD HH:MM:SS[.ffffff]").
pub mod ch_datetime {
    use super::*;
    use serde::{Deserialize, Deserializer};

    pub fn parse(value: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
            .ok()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad DateTime '{raw}'")))
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            match raw {
                None => Ok(None),
                Some(raw) if raw.is_empty() => Ok(None),
                Some(raw) => parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("bad DateTime '{raw}'"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("o'clock"), "o\\'clock");
        assert_eq!(escape("a\\b"), "a\\\\b");
    }

    #[test]
    fn quote_list_is_never_empty() {
        assert_eq!(quote_list::<&str>(&[]), "('')");
        assert_eq!(quote_list(&["a", "b'c"]), "('a', 'b\\'c')");
    }

    #[test]
    fn parses_datetimes_with_and_without_fraction() {
        assert!(ch_datetime::parse("2024-04-01 09:30:00").is_some());
        assert!(ch_datetime::parse("2024-04-01 09:30:00.123456").is_some());
        assert!(ch_datetime::parse("2024-04-01T09:30:00").is_none());
    }
}
