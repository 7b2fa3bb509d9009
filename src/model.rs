//! Core data types for dependency tracking
//!
//! - Surrogate keys (`TsKey`, `CompId`, `GroupId`, `AlgorithmId`, `AppId`)
//! - `Computation` and its `CompParm` list
//! - `Algorithm` (parameter roles and type codes)
//! - `TsGroup` (a saved selector that expands to time series)
//! - `TimeSeriesIdentifier` and `DependsRecord`

use crate::cache::CacheObject;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

macro_rules! db_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn value(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                $name(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

db_key!(
    /// Surrogate key of one time series
    TsKey
);
db_key!(
    /// Surrogate key of a computation
    CompId
);
db_key!(
    /// Surrogate key of a time-series group
    GroupId
);
db_key!(
    /// Surrogate key of an algorithm
    AlgorithmId
);
db_key!(
    /// Surrogate key of the application that owns a computation
    AppId
);

/// Direction of a parameter, encoded as the leading character of its type code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParmDirection {
    Input,
    Output,
}

impl ParmDirection {
    /// Decode a type code such as `"i"`, `"id"` or `"o"`
    pub fn from_type_code(code: &str) -> Option<Self> {
        match code.chars().next() {
            Some('i') => Some(ParmDirection::Input),
            Some('o') => Some(ParmDirection::Output),
            _ => None,
        }
    }
}

/// A parameter role declared by an algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgoParm {
    pub role_name: String,
    pub parm_type: String,
}

/// Reusable definition of a computation's parameter roles and types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Algorithm {
    pub id: AlgorithmId,
    pub name: String,
    #[serde(default)]
    pub parms: Vec<AlgoParm>,
}

impl Algorithm {
    pub fn new(id: AlgorithmId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parms: Vec::new(),
        }
    }

    /// Builder method: declare a parameter role
    pub fn with_parm(mut self, role_name: impl Into<String>, parm_type: impl Into<String>) -> Self {
        self.parms.push(AlgoParm {
            role_name: role_name.into(),
            parm_type: parm_type.into(),
        });
        self
    }

    /// Find a role by name (role names are case-insensitive)
    pub fn find_parm(&self, role_name: &str) -> Option<&AlgoParm> {
        self.parms
            .iter()
            .find(|p| p.role_name.eq_ignore_ascii_case(role_name))
    }
}

impl CacheObject for Algorithm {
    type Key = AlgorithmId;

    fn key(&self) -> AlgorithmId {
        self.id
    }

    fn unique_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// A parameter of one computation
///
/// Either bound to a concrete time series or left open to be resolved
/// through the computation's group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompParm {
    pub role_name: String,
    /// Type code copied from the algorithm, when known
    #[serde(default)]
    pub parm_type: Option<String>,
    #[serde(default)]
    pub ts_key: Option<TsKey>,
}

impl CompParm {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            parm_type: None,
            ts_key: None,
        }
    }

    /// An input parameter with its type code already attached
    pub fn input(role_name: impl Into<String>) -> Self {
        Self::new(role_name).parm_type("i")
    }

    /// An output parameter with its type code already attached
    pub fn output(role_name: impl Into<String>) -> Self {
        Self::new(role_name).parm_type("o")
    }

    /// Builder method: set the type code
    pub fn parm_type(mut self, parm_type: impl Into<String>) -> Self {
        self.parm_type = Some(parm_type.into());
        self
    }

    /// Builder method: bind to a concrete time series
    pub fn bound_to(mut self, ts_key: TsKey) -> Self {
        self.ts_key = Some(ts_key);
        self
    }

    /// Type code of this parameter, falling back to the algorithm's role
    pub fn type_code<'a>(&'a self, algorithm: Option<&'a Algorithm>) -> Option<&'a str> {
        match &self.parm_type {
            Some(code) => Some(code.as_str()),
            None => algorithm
                .and_then(|a| a.find_parm(&self.role_name))
                .map(|p| p.parm_type.as_str()),
        }
    }

    pub fn is_input(&self, algorithm: Option<&Algorithm>) -> bool {
        self.type_code(algorithm)
            .and_then(ParmDirection::from_type_code)
            == Some(ParmDirection::Input)
    }
}

/// A configured unit of derived-value processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    pub id: CompId,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub algorithm_id: Option<AlgorithmId>,
    /// Algorithm already attached to this instance, if any
    #[serde(skip)]
    pub algorithm: Option<Arc<Algorithm>>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    /// Loading application that owns this computation
    #[serde(default)]
    pub app_id: Option<AppId>,
    /// Set for computations run on a timer rather than triggered by input
    #[serde(default)]
    pub timed_interval: Option<String>,
    #[serde(default)]
    pub parms: Vec<CompParm>,
}

impl Computation {
    /// Create an enabled computation with no parameters
    pub fn new(id: CompId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
            algorithm_id: None,
            algorithm: None,
            group_id: None,
            app_id: None,
            timed_interval: None,
            parms: Vec::new(),
        }
    }

    /// Builder method: set the enabled flag
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder method: reference an algorithm by id
    pub fn algorithm_id(mut self, id: AlgorithmId) -> Self {
        self.algorithm_id = Some(id);
        self
    }

    /// Builder method: attach a resolved algorithm
    pub fn with_algorithm(mut self, algorithm: Arc<Algorithm>) -> Self {
        self.algorithm_id = Some(algorithm.id);
        self.algorithm = Some(algorithm);
        self
    }

    /// Builder method: scope by a group
    pub fn group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Builder method: set the owning application
    pub fn app(mut self, app_id: AppId) -> Self {
        self.app_id = Some(app_id);
        self
    }

    /// Builder method: make this a timed computation
    pub fn timed(mut self, interval: impl Into<String>) -> Self {
        self.timed_interval = Some(interval.into());
        self
    }

    /// Builder method: append a parameter
    pub fn parm(mut self, parm: CompParm) -> Self {
        self.parms.push(parm);
        self
    }

    pub fn is_timed(&self) -> bool {
        self.timed_interval.is_some()
    }

    /// Keys bound directly to parameters (any direction)
    pub fn bound_keys(&self) -> impl Iterator<Item = TsKey> + '_ {
        self.parms.iter().filter_map(|p| p.ts_key)
    }
}

/// A saved selector that expands to a concrete list of time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Expanded member list, once computed
    #[serde(default)]
    pub expanded: Option<Vec<TsKey>>,
}

impl TsGroup {
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            expanded: None,
        }
    }

    /// Builder method: attach an already-computed expansion
    pub fn with_expansion(mut self, members: Vec<TsKey>) -> Self {
        self.expanded = Some(members);
        self
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded.is_some()
    }

    pub fn expanded_list(&self) -> Option<&[TsKey]> {
        self.expanded.as_deref()
    }
}

impl CacheObject for TsGroup {
    type Key = GroupId;

    fn key(&self) -> GroupId {
        self.id
    }

    fn unique_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// Fully resolved identity of a time series
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSeriesIdentifier {
    pub key: TsKey,
    /// Path-style name, e.g. `Site.Param.Inst.1Hour.0.raw`
    pub unique_string: String,
}

impl TimeSeriesIdentifier {
    pub fn new(key: TsKey, unique_string: impl Into<String>) -> Self {
        Self {
            key,
            unique_string: unique_string.into(),
        }
    }
}

impl CacheObject for TimeSeriesIdentifier {
    type Key = TsKey;

    fn key(&self) -> TsKey {
        self.key
    }

    fn unique_name(&self) -> Option<&str> {
        Some(&self.unique_string)
    }
}

impl fmt::Display for TimeSeriesIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.unique_string, self.key)
    }
}

/// One row of the dependency index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependsRecord {
    pub ts_key: TsKey,
    pub comp_id: CompId,
}

impl DependsRecord {
    pub fn new(ts_key: TsKey, comp_id: CompId) -> Self {
        Self { ts_key, comp_id }
    }
}
