//! Value types shared across the registry session server: identifiers,
//! data snapshots, and the subscriber records that track what each client
//! has acknowledged.

mod datum;
mod ids;
mod subscriber;

pub use datum::{
    DataEntry,
    Datum,
};
pub use ids::{
    AssembleType,
    ClientVersion,
    DataCenter,
    DataInfoId,
    FetchSeq,
    PushVersion,
    Scope,
    SubscriberId,
    TraceId,
};
pub use subscriber::Subscriber;
