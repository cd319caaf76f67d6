//! Blocking client for the queryset service.
//!
//! Endpoints, relative to the queryset base URL:
//! - `GET querysets`, `GET|DELETE querysets/{name}`, `POST querysets?overwrite=..`
//! - `GET data/{name}?start_date=..&end_date=..` returns Parquet once the
//!   service has compiled the data, and `202 Accepted` with a status message
//!   while it is still working.

use crate::config::Config;
use crate::drift::{DriftOverrides, DriftReport, InputGate};
use crate::error::{Error, Result};
use crate::queryset::{Queryset, QuerysetDetail, QuerysetList};
use chrono::NaiveDate;
use polars::prelude::*;
use reqwest::blocking::{Client, RequestBuilder};
use std::io::Cursor;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const PARQUET_MAGIC: &[u8] = b"PAR1";
const MAX_MESSAGE_LEN: usize = 500;
const PANDAS_METADATA_KEY: &str = "pandas";

/// Where the drift gate gets its data from.
pub trait DataSource {
    fn fetch(
        &self,
        name: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame>;
}

#[derive(Debug, Clone)]
pub struct QuerysetClient {
    base_url: Url,
    http: Client,
    max_retries: u32,
    retry_frequency: Duration,
}

impl QuerysetClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid queryset URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(format!("{base_url} cannot be used as a base URL")));
        }
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url,
            http,
            max_retries: 500,
            retry_frequency: Duration::from_secs(5),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(&config.queryset_url()?)?
            .with_max_retries(config.max_retries()?)
            .with_retry_frequency(config.retry_frequency()?))
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_retry_frequency(mut self, retry_frequency: Duration) -> Self {
        self.retry_frequency = retry_frequency;
        self
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn send(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let response = request.send()?;
        let status = response.status().as_u16();
        let url = response.url().clone();
        let body = response.bytes()?.to_vec();
        debug!(%url, status, bytes = body.len(), "Queryset service responded");
        check_status(status, &body)?;
        Ok(body)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let body = self.send(self.http.get(self.endpoint(&["querysets"])))?;
        let list: QuerysetList = serde_json::from_slice(&body)?;
        Ok(list.querysets)
    }

    pub fn show(&self, name: &str) -> Result<QuerysetDetail> {
        let body = self.send(self.http.get(self.endpoint(&["querysets", name])))?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub fn publish(&self, queryset: &Queryset, overwrite: bool) -> Result<()> {
        queryset.validate()?;
        info!(queryset = %queryset.name, overwrite, "Publishing queryset");
        let request = self
            .http
            .post(self.endpoint(&["querysets"]))
            .query(&[("overwrite", overwrite)])
            .json(queryset);
        self.send(request)?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        info!(queryset = name, "Deleting queryset");
        self.send(self.http.delete(self.endpoint(&["querysets", name])))?;
        Ok(())
    }

    /// Fetch compiled data, waiting while the service compiles it.
    pub fn fetch(
        &self,
        name: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame> {
        let mut url = self.endpoint(&["data", name]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(start) = start {
                query.append_pair("start_date", &start.format("%Y-%m-%d").to_string());
            }
            if let Some(end) = end {
                query.append_pair("end_date", &end.format("%Y-%m-%d").to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                thread::sleep(self.retry_frequency);
            }
            let message = match self.send(self.http.get(url.clone())) {
                Ok(body) if body.starts_with(PARQUET_MAGIC) => {
                    let df = read_parquet(body)?;
                    info!(queryset = name, rows = df.height(), "Queryset read successfully");
                    return Ok(df);
                }
                Ok(body) => status_message(&body),
                Err(Error::Pending(message)) => message,
                Err(err) => return Err(err),
            };

            if message.contains("failed") {
                return Err(Error::remote(format!(
                    "compiling queryset {name} failed: {message}"
                )));
            }
            attempt += 1;
            if attempt > self.max_retries {
                return Err(Error::pending(format!(
                    "max attempts to retrieve queryset {name} exceeded ({}): {message}",
                    self.max_retries
                )));
            }
            info!(queryset = name, attempt, "{message}");
        }
    }

    /// Fetch, then run the input gate on the result.
    pub fn fetch_with_drift_detection(
        &self,
        name: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        overrides: Option<&DriftOverrides>,
    ) -> Result<(DataFrame, DriftReport)> {
        let df = self.fetch(name, start, end)?;
        let report = InputGate::new(&df, overrides, None)?.assemble_alerts();
        for alarm in report.alarms() {
            warn!(queryset = name, severity = alarm.severity, "{}", alarm.message);
        }
        Ok((df, report))
    }
}

impl DataSource for QuerysetClient {
    fn fetch(
        &self,
        name: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame> {
        Self::fetch(self, name, start, end)
    }
}

fn check_status(status: u16, body: &[u8]) -> Result<()> {
    match status {
        200..=201 | 204 => Ok(()),
        202 => Err(Error::pending(status_message(body))),
        404 => Err(Error::not_found(remote_message(body))),
        500..=599 => Err(Error::remote(format!("{status}: {}", remote_message(body)))),
        _ => Err(Error::http(status, remote_message(body))),
    }
}

/// Extract the service's error title when the body is a JSON error.
fn remote_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            let title = value.get("title")?.as_str()?.to_string();
            Some(match value.get("detail").and_then(|d| d.as_str()) {
                Some(detail) => format!("{title}: {detail}"),
                None => title,
            })
        })
        .unwrap_or_else(|| status_message(body))
}

fn status_message(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.chars().count() > MAX_MESSAGE_LEN {
        let truncated: String = text.chars().take(MAX_MESSAGE_LEN).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

/// Decode a Parquet body. Frames written from pandas keep their index levels
/// as trailing columns and list them in the `pandas` file metadata; those
/// columns are moved to the front so the time and space identifiers lead.
pub fn read_parquet(bytes: Vec<u8>) -> Result<DataFrame> {
    let mut reader = ParquetReader::new(Cursor::new(bytes));
    let index = reader
        .get_metadata()?
        .key_value_metadata
        .as_ref()
        .and_then(|entries| entries.iter().find(|entry| entry.key == PANDAS_METADATA_KEY))
        .and_then(|entry| entry.value.as_deref())
        .map(pandas_index_columns)
        .unwrap_or_default();
    index_first(reader.finish()?, &index)
}

/// Named index columns from a pandas Parquet metadata document. Range indexes
/// are described by objects rather than names and are skipped.
fn pandas_index_columns(metadata: &str) -> Vec<String> {
    serde_json::from_str::<serde_json::Value>(metadata)
        .ok()
        .and_then(|doc| {
            doc.get("index_columns")?.as_array().map(|columns| {
                columns
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
        })
        .unwrap_or_default()
}

/// Reorder `df` so the `index` columns come first, in the given order.
///
/// The frame is returned as is when `index` is empty or names a column the
/// frame does not have.
pub fn index_first(df: DataFrame, index: &[String]) -> Result<DataFrame> {
    if index.is_empty() {
        return Ok(df);
    }
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    if let Some(missing) = index.iter().find(|column| !names.contains(column)) {
        debug!(column = %missing, "Index column not in frame, keeping column order");
        return Ok(df);
    }
    let order: Vec<String> = index
        .iter()
        .cloned()
        .chain(names.into_iter().filter(|name| !index.contains(name)))
        .collect();
    debug!(index = ?index, "Moving index columns to the front");
    Ok(df.select(order)?)
}

/// Serialize a frame as Parquet, for `queryset fetch` output files.
pub fn write_parquet(df: &mut DataFrame, writer: impl std::io::Write) -> Result<()> {
    ParquetWriter::new(writer).finish(df)?;
    Ok(())
}
