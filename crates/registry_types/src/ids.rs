use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

/// Monotonic version of a data center's snapshot for one `DataInfoId`.
pub type PushVersion = u64;

/// Monotonic sequence number stamped by the fetch pipeline. A snapshot is
/// identified by a closed range `[start, end]` of these.
pub type FetchSeq = u64;

/// Identifies the logical data set a client subscribes to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataInfoId(String);

impl DataInfoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataInfoId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DataInfoId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Logical source of data. The same `DataInfoId` can have distinct snapshots
/// per data center.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataCenter(String);

impl DataCenter {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataCenter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DataCenter {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

/// Registration id of one subscriber interest on a connection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Visibility scope of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    Zone,
    DataCenter,
    Global,
}

/// How entries are assembled into the pushed view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssembleType {
    Sub,
    Pub,
    All,
}

/// Wire protocol generation spoken by the subscribing client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClientVersion {
    V1,
    V2,
}

/// Correlates one push intent across log lines as it moves through the
/// pending buffer, the dispatcher, and the transport callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
