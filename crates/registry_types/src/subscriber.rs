use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    net::SocketAddr,
};

use parking_lot::Mutex;

use crate::ids::{
    AssembleType,
    ClientVersion,
    DataCenter,
    DataInfoId,
    FetchSeq,
    PushVersion,
    Scope,
    SubscriberId,
};

/// The highest snapshot a subscriber has acknowledged for one data center.
#[derive(Clone, Debug, PartialEq, Eq)]
struct AckedVersion {
    push_version: PushVersion,
    fetch_seq_start: FetchSeq,
    fetch_seq_end: FetchSeq,
    entry_versions: BTreeMap<String, u64>,
}

/// A client interest registered on a connection.
///
/// The identity tuple (`data_info_id`, `scope`, `assemble_type`,
/// `client_version`, `source_address`) is immutable; the per-data-center
/// acknowledged-version table advances as pushes succeed. Both version
/// operations take `&self` and are safe to call from any thread.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    data_info_id: DataInfoId,
    scope: Scope,
    assemble_type: AssembleType,
    client_version: ClientVersion,
    source_address: SocketAddr,

    versions: Mutex<HashMap<DataCenter, AckedVersion>>,
}

impl Subscriber {
    pub fn new(
        id: SubscriberId,
        data_info_id: DataInfoId,
        scope: Scope,
        assemble_type: AssembleType,
        client_version: ClientVersion,
        source_address: SocketAddr,
    ) -> Self {
        Self {
            id,
            data_info_id,
            scope,
            assemble_type,
            client_version,
            source_address,
            versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn data_info_id(&self) -> &DataInfoId {
        &self.data_info_id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn assemble_type(&self) -> AssembleType {
        self.assemble_type
    }

    pub fn client_version(&self) -> ClientVersion {
        self.client_version
    }

    pub fn source_address(&self) -> SocketAddr {
        self.source_address
    }

    /// Returns false if this subscriber has already acknowledged a snapshot
    /// strictly newer than one starting at `fetch_seq_start`.
    pub fn check_version(&self, data_center: &DataCenter, fetch_seq_start: FetchSeq) -> bool {
        match self.versions.lock().get(data_center) {
            None => true,
            Some(acked) => fetch_seq_start >= acked.fetch_seq_end,
        }
    }

    /// Advance the acknowledged version for `data_center`, but only if the
    /// candidate is at least as new on both the push version and the fetch
    /// sequence axis. Returns false when another delivery already moved the
    /// subscriber past this snapshot.
    pub fn check_and_update_version(
        &self,
        data_center: &DataCenter,
        push_version: PushVersion,
        entry_versions: &BTreeMap<String, u64>,
        fetch_seq_start: FetchSeq,
        fetch_seq_end: FetchSeq,
    ) -> bool {
        let mut versions = self.versions.lock();
        if let Some(acked) = versions.get(data_center) {
            if push_version < acked.push_version || fetch_seq_start < acked.fetch_seq_end {
                return false;
            }
        }
        versions.insert(
            data_center.clone(),
            AckedVersion {
                push_version,
                fetch_seq_start,
                fetch_seq_end,
                entry_versions: entry_versions.clone(),
            },
        );
        true
    }

    /// Snapshot of the acknowledged push version, if any. Test and
    /// introspection surface.
    pub fn acked_push_version(&self, data_center: &DataCenter) -> Option<PushVersion> {
        self.versions
            .lock()
            .get(data_center)
            .map(|acked| acked.push_version)
    }

    /// Snapshot of the acknowledged fetch sequence range, if any.
    pub fn acked_fetch_seq(&self, data_center: &DataCenter) -> Option<(FetchSeq, FetchSeq)> {
        self.versions
            .lock()
            .get(data_center)
            .map(|acked| (acked.fetch_seq_start, acked.fetch_seq_end))
    }
}
