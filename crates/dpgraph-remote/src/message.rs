//! Wire envelopes exchanged between a client and a party.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dpgraph_core::id::{ObjectId, PartyId};

use crate::error::RemoteError;
use crate::infer::PublicMeta;

/// A command argument. Array operands are uploaded first and travel as
/// [`Arg::Object`]; literals travel by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    Object(ObjectId),
    Scalar(f64),
    Int(i64),
    Bool(bool),
    Shape(Vec<usize>),
}

impl Arg {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Arg::Scalar(v) => Some(v),
            Arg::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match *self {
            Arg::Int(v) => usize::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Arg::Bool(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Fully qualified operation name, e.g. `tensor.add`.
    pub op: String,
    pub self_id: ObjectId,
    pub args: Vec<Arg>,
    pub kwargs: BTreeMap<String, Arg>,
    /// Where the party registers the result.
    pub result_id: ObjectId,
    /// Evaluate `arg op self` instead of `self op arg`.
    #[serde(default)]
    pub reflected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    StoreObject { id: ObjectId, payload: Vec<u8> },
    RequestObject { id: ObjectId },
    DeleteObject { id: ObjectId },
    ExecuteCommand(Command),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StoreObject { .. } => "store_object",
            Message::RequestObject { .. } => "request_object",
            Message::DeleteObject { .. } => "delete_object",
            Message::ExecuteCommand(_) => "execute_command",
        }
    }
}

/// Public metadata of an object a party registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleMeta {
    pub id: ObjectId,
    pub meta: PublicMeta,
}

/// A party-side failure, carried back over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum WireError {
    UnknownObject { id: ObjectId },
    UnknownParty { party: PartyId },
    DisallowedCommand { op: String },
    BadArgument { message: String },
    Failed { message: String },
}

impl From<&RemoteError> for WireError {
    fn from(e: &RemoteError) -> Self {
        match e {
            RemoteError::UnknownObject(id) => WireError::UnknownObject { id: *id },
            RemoteError::UnknownParty(party) => WireError::UnknownParty {
                party: party.clone(),
            },
            RemoteError::DisallowedCommand(op) => WireError::DisallowedCommand { op: op.clone() },
            RemoteError::BadArgument(message) => WireError::BadArgument {
                message: message.clone(),
            },
            other => WireError::Failed {
                message: other.to_string(),
            },
        }
    }
}

impl From<WireError> for RemoteError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::UnknownObject { id } => RemoteError::UnknownObject(id),
            WireError::UnknownParty { party } => RemoteError::UnknownParty(party),
            WireError::DisallowedCommand { op } => RemoteError::DisallowedCommand(op),
            WireError::BadArgument { message } => RemoteError::BadArgument(message),
            WireError::Failed { message } => RemoteError::Remote(message),
        }
    }
}

/// Every handler's reply. Handlers with nothing to return answer `Ack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Ack,
    Object { payload: Vec<u8> },
    Handle(HandleMeta),
    Error(WireError),
}

impl Response {
    pub fn into_result(self) -> Result<Response, RemoteError> {
        match self {
            Response::Error(e) => Err(e.into()),
            other => Ok(other),
        }
    }
}
