//! Search criteria for connection discovery.

use crate::constants::AUTOPILOT_PATH;
use bp_common::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A recognized search dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKey {
    Pid,
    ConnectionName,
    ApplicationName,
    ObjectPath,
}

impl SearchKey {
    pub const ALL: [SearchKey; 4] = [
        SearchKey::Pid,
        SearchKey::ConnectionName,
        SearchKey::ApplicationName,
        SearchKey::ObjectPath,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SearchKey::Pid => "pid",
            SearchKey::ConnectionName => "connection_name",
            SearchKey::ApplicationName => "application_name",
            SearchKey::ObjectPath => "object_path",
        }
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SearchKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| Error::UnknownSearchKey { key: s.to_string() })
    }
}

/// What to look for on the bus.
///
/// `object_path` falls back to the well-known introspection path, so the
/// path check always takes part in a search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    application_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    object_path: Option<String>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    pub fn with_object_path(mut self, path: impl Into<String>) -> Self {
        self.object_path = Some(path.into());
        self
    }

    /// Set the object path unless one was given explicitly.
    pub fn or_object_path(mut self, path: impl Into<String>) -> Self {
        if self.object_path.is_none() {
            self.object_path = Some(path.into());
        }
        self
    }

    /// Parse `key=value` style pairs.
    ///
    /// Unknown keys are rejected with `UnknownSearchKey`.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut criteria = SearchCriteria::new();
        for (key, value) in pairs {
            criteria = match key.parse::<SearchKey>()? {
                SearchKey::Pid => {
                    let pid = value.trim().parse::<u32>().map_err(|_| {
                        Error::Config(format!("pid must be a positive integer, got '{value}'"))
                    })?;
                    criteria.with_pid(pid)
                }
                SearchKey::ConnectionName => criteria.with_connection_name(value),
                SearchKey::ApplicationName => criteria.with_application_name(value),
                SearchKey::ObjectPath => criteria.with_object_path(value),
            };
        }
        Ok(criteria)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection_name.as_deref()
    }

    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    /// The object path to search, defaulting to the introspection path.
    pub fn object_path(&self) -> &str {
        self.object_path.as_deref().unwrap_or(AUTOPILOT_PATH)
    }

    /// Keys taking part in the search, in rendering order.
    pub fn keys(&self) -> Vec<SearchKey> {
        SearchKey::ALL
            .into_iter()
            .filter(|key| match key {
                SearchKey::Pid => self.pid.is_some(),
                SearchKey::ConnectionName => self.connection_name.is_some(),
                SearchKey::ApplicationName => self.application_name.is_some(),
                SearchKey::ObjectPath => true,
            })
            .collect()
    }

    /// Replace the pid, used once a process handle has been reconciled.
    pub(crate) fn set_pid(&mut self, pid: u32) {
        self.pid = Some(pid);
    }
}

/// `pid = 1234, application name = 'calc', object path = '/x'`
impl fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .keys()
            .into_iter()
            .map(|key| {
                let name = key.as_str().replace('_', " ");
                match key {
                    SearchKey::Pid => format!("{} = {}", name, self.pid.unwrap_or_default()),
                    SearchKey::ConnectionName => {
                        format!("{} = {}", name, quoted(self.connection_name().unwrap_or_default()))
                    }
                    SearchKey::ApplicationName => {
                        format!("{} = {}", name, quoted(self.application_name().unwrap_or_default()))
                    }
                    SearchKey::ObjectPath => format!("{} = {}", name, quoted(self.object_path())),
                }
            })
            .collect();
        f.write_str(&rendered.join(", "))
    }
}

fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
