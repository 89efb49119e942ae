#![forbid(unsafe_code)]
//! dpgraph-remote: operate on objects held by another party.
//!
//! A [`Client`] never sees remote data. Each operation on a [`RemoteHandle`]
//! infers the result's public metadata locally, ships one execute-command to
//! the owning [`Party`], and returns a new handle straight away. Parties keep
//! their objects in a private [`ObjectRegistry`] and only execute commands on
//! their [`CommandGuard`] allow-list.

pub mod address_book;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod guard;
pub mod handle;
pub mod infer;
pub mod message;
pub mod op;
pub mod party;
pub mod registry;
pub mod sharing;
pub mod transport;

pub use address_book::AddressBook;
pub use client::{Client, RemoteOperand};
pub use codec::{decode_message, decode_response, encode_message, encode_response};
pub use config::PartyConfig;
pub use error::{RemoteError, Result};
pub use guard::CommandGuard;
pub use handle::{HandleStatus, RemoteHandle};
pub use infer::{infer, infer_reflected, OperandMeta, PublicMeta};
pub use message::{Arg, Command, HandleMeta, Message, Response, WireError};
pub use op::RemoteOp;
pub use party::Party;
pub use registry::{ObjectRegistry, StoredObject};
pub use sharing::{RemoteValue, SecretSharing, SharedTensor};
pub use transport::{Ticket, Transport, VirtualNetwork};
