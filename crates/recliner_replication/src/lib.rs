//! # Recliner Replication
//!
//! Checkpointed, resumable replication between Recliner databases.
//!
//! This crate provides:
//! - [`ReplicationRequest`] and its stable replication id
//! - topology classification: local-to-local, push to a remote, pull
//!   from a remote
//! - [`Checkpoint`]s stored on both sides under the replication id, with a
//!   bounded session history
//! - the [`Peer`] abstraction over local databases and remote ones reached
//!   through an [`HttpClient`]
//! - [`ReclinerServer`], HTTP-shaped handlers that let one instance act as
//!   the remote of another (see [`LoopbackClient`])
//!
//! ## Session flow
//!
//! 1. Load both checkpoints and agree on a start sequence
//! 2. Page through the source change feed up to its current sequence
//! 3. Diff revisions against the target, fetch what is missing and write
//!    it with the source's revisions
//! 4. Checkpoint both sides after every page
//!
//! A replication with nothing new to copy writes nothing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod error;
mod http;
mod peer;
mod remote;
mod replicator;
mod request;
mod server;

pub use checkpoint::{Checkpoint, ReplicationResponse, SessionEntry};
pub use config::ReplicationConfig;
pub use error::{ReplicationError, ReplicationResult};
pub use http::{url_path, HttpClient, HttpResponse, LoopbackClient, LoopbackServer, Method};
pub use peer::{LocalPeer, Peer};
pub use remote::RemotePeer;
pub use replicator::{ReplicationStats, Replicator};
pub use request::{local_db_name, Endpoint, ReplicationRequest, Topology, ViewReplication};
pub use server::ReclinerServer;
