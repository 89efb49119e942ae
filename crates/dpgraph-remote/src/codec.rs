//! JSON codec for envelopes and object payloads.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::message::{Message, Response};
use crate::registry::StoredObject;

fn encode<T: Serialize>(v: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(v)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    encode(msg)
}

pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    decode(bytes)
}

pub fn encode_response(resp: &Response) -> Result<Vec<u8>> {
    encode(resp)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    decode(bytes)
}

/// Payload of a store-object message or a request-object reply.
pub fn encode_object(obj: &StoredObject) -> Result<Vec<u8>> {
    encode(obj)
}

pub fn decode_object(bytes: &[u8]) -> Result<StoredObject> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use dpgraph_core::id::ObjectId;
    use dpgraph_core::tensor::Tensor;

    use super::*;
    use crate::error::RemoteError;
    use crate::message::{Arg, Command};

    #[test]
    fn command_envelope_is_tagged() {
        let msg = Message::ExecuteCommand(Command {
            op: "tensor.add".into(),
            self_id: ObjectId::new(1),
            args: vec![Arg::Scalar(2.0)],
            kwargs: BTreeMap::new(),
            result_id: ObjectId::new(2),
            reflected: false,
        });
        let bytes = encode_message(&msg).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["kind"], "execute_command");
        assert_eq!(json["op"], "tensor.add");
        assert_eq!(decode_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn tensor_payload_survives_transfer() {
        let obj = StoredObject::Tensor(Tensor::new([2], vec![1.5, -2.0]).unwrap());
        let back = decode_object(&encode_object(&obj).unwrap()).unwrap();
        assert!(matches!(back, StoredObject::Tensor(t) if t.data() == [1.5, -2.0]));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(decode_message(b"{not json"), Err(RemoteError::Codec(_))));
    }
}
