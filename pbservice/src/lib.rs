#![deny(missing_docs)]
#![deny(clippy::all)]
//! Key-value store replicated by a primary and a backup chosen by the view service.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use viewservice::View;

/// Outcome of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Done.
    Ok,
    /// `Get` on a key that was never written.
    NoKey,
    /// Not the right server for this request right now; refresh the view and retry.
    WrongServer,
}

/// Kind of a client operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// Read a key.
    Get,
    /// Overwrite a key.
    Put,
    /// Concatenate onto a key, treating a missing key as empty.
    Append,
}

/// Arguments of `operation`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpArgs {
    /// What to do.
    pub op: OpKind,
    /// Target key.
    pub key: String,
    /// Ignored by `Get`.
    pub value: String,
    /// Issuer of the request.
    pub client: String,
    /// Per-client sequence number; a retry reuses it.
    pub seq: u64,
    /// Empty for client calls, the primary's ID for forwarded writes.
    pub source: String,
}

/// Reply of `operation`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpReply {
    /// Outcome.
    pub status: Status,
    /// Value read by `Get`, empty otherwise.
    pub value: String,
}

impl OpReply {
    fn ok(value: String) -> Self {
        Self {
            status: Status::Ok,
            value,
        }
    }

    fn with_status(status: Status) -> Self {
        Self {
            status,
            value: String::new(),
        }
    }
}

/// Replies already sent, per client and sequence number.
pub type DedupTable = HashMap<String, HashMap<u64, OpReply>>;

/// Full state sent by a primary to its backup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushArgs {
    /// View the primary is in.
    pub view: View,
    /// Whole key-value map.
    pub store: HashMap<String, String>,
    /// Whole dedup table.
    pub dedup: DedupTable,
}

labrpc::service! {
    service pb_svc {
        fn operation(args: OpArgs) -> OpReply;
        fn push(args: PushArgs) -> Status;
        fn kill() -> ();
    }
}

pub use pb_svc::{Client as PbClient, Server as PbServer, Service as PbService};

/// Replica server.
pub mod server;

/// Client retrying until the primary answers.
pub mod client;


pub use client::Clerk;
pub use server::Replica;
