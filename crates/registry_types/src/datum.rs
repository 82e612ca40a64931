use std::collections::BTreeMap;

use bytes::Bytes;

use crate::ids::{
    DataCenter,
    DataInfoId,
    PushVersion,
};

/// One published entry inside a snapshot, carried opaquely by the push core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataEntry {
    pub version: u64,
    pub payload: Bytes,
}

/// A data-center-scoped snapshot of the entries backing a `DataInfoId`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datum {
    pub data_info_id: DataInfoId,
    pub data_center: DataCenter,
    pub version: PushVersion,
    pub entries: BTreeMap<String, DataEntry>,
}

impl Datum {
    pub fn new(data_info_id: DataInfoId, data_center: DataCenter, version: PushVersion) -> Self {
        Self {
            data_info_id,
            data_center,
            version,
            entries: BTreeMap::new(),
        }
    }

    /// The per-entry version vector acknowledged by a subscriber once a push
    /// of this snapshot succeeds.
    pub fn entry_versions(&self) -> BTreeMap<String, u64> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.version))
            .collect()
    }
}
