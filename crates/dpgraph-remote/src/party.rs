//! A party: owns one object registry and routes the four message kinds.

use std::sync::{Mutex, MutexGuard};

use dpgraph_core::dtype::DType;
use dpgraph_core::id::{ObjectId, PartyId};
use dpgraph_core::tensor::Tensor;
use dpgraph_lazy::{BinaryOp, Operand};

use crate::codec::{decode_message, decode_object, encode_object, encode_response};
use crate::config::PartyConfig;
use crate::error::{RemoteError, Result};
use crate::guard::CommandGuard;
use crate::message::{Arg, Command, HandleMeta, Message, Response, WireError};
use crate::op::RemoteOp;
use crate::registry::{ObjectRegistry, StoredObject};

/// A resolved positional argument.
enum Value {
    Object(StoredObject),
    Literal(Tensor),
}

#[derive(Debug)]
pub struct Party {
    id: PartyId,
    guard: CommandGuard,
    registry: Mutex<ObjectRegistry>,
}

impl Party {
    /// A party that executes every tensor op.
    pub fn new(id: impl Into<PartyId>) -> Self {
        Self {
            id: id.into(),
            guard: CommandGuard::default(),
            registry: Mutex::new(ObjectRegistry::new()),
        }
    }

    pub fn from_config(config: &PartyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: config.party_id.clone(),
            guard: config.guard()?,
            registry: Mutex::new(ObjectRegistry::new()),
        })
    }

    pub fn id(&self) -> &PartyId {
        &self.id
    }

    pub fn guard(&self) -> &CommandGuard {
        &self.guard
    }

    fn registry(&self) -> Result<MutexGuard<'_, ObjectRegistry>> {
        self.registry
            .lock()
            .map_err(|_| RemoteError::Remote(format!("registry of {} poisoned", self.id)))
    }

    /// Number of objects currently held.
    pub fn object_count(&self) -> Result<usize> {
        Ok(self.registry()?.len())
    }

    pub fn holds(&self, id: ObjectId) -> Result<bool> {
        Ok(self.registry()?.contains(id))
    }

    /// Wire entry point: decode, route, encode. Handler failures are encoded
    /// into the reply rather than returned.
    pub fn receive(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let response = match decode_message(bytes) {
            Ok(msg) => self.handle(msg),
            Err(e) => Err(e),
        };
        let response = response.unwrap_or_else(|e| Response::Error(WireError::from(&e)));
        encode_response(&response)
    }

    /// Route one message to its handler.
    pub fn handle(&self, msg: Message) -> Result<Response> {
        #[cfg(feature = "tracing")]
        tracing::trace!(party = %self.id, kind = msg.kind(), "routing message");
        match msg {
            Message::StoreObject { id, payload } => self.store_object(id, &payload),
            Message::RequestObject { id } => self.request_object(id),
            Message::DeleteObject { id } => self.delete_object(id),
            Message::ExecuteCommand(cmd) => self.execute_command(cmd),
        }
    }

    fn store_object(&self, id: ObjectId, payload: &[u8]) -> Result<Response> {
        let obj = decode_object(payload)?;
        self.registry()?.insert(id, obj);
        Ok(Response::Ack)
    }

    fn request_object(&self, id: ObjectId) -> Result<Response> {
        let obj = self.registry()?.take(id)?;
        Ok(Response::Object {
            payload: encode_object(&obj)?,
        })
    }

    fn delete_object(&self, id: ObjectId) -> Result<Response> {
        self.registry()?.remove(id);
        Ok(Response::Ack)
    }

    fn execute_command(&self, cmd: Command) -> Result<Response> {
        self.guard.check(&cmd.op)?;
        let op = RemoteOp::parse(&cmd.op, &cmd.kwargs)?;

        let mut registry = self.registry()?;
        let target = registry.get(cmd.self_id)?;
        let operand = match (&op, cmd.args.as_slice()) {
            (RemoteOp::Binary(_), [arg]) => Some(resolve(&registry, arg)?),
            (RemoteOp::Binary(_), args) => {
                return Err(RemoteError::BadArgument(format!(
                    "`{}` takes one argument, got {}",
                    cmd.op,
                    args.len()
                )))
            }
            (_, []) => None,
            (_, args) => {
                return Err(RemoteError::BadArgument(format!(
                    "`{}` takes no arguments, got {}",
                    cmd.op,
                    args.len()
                )))
            }
        };
        let result = match operand {
            Some(arg) if cmd.reflected => match &op {
                RemoteOp::Binary(op) => reflected(*op, target, arg)?,
                _ => {
                    return Err(RemoteError::BadArgument(format!(
                        "`{}` has no reflected form",
                        cmd.op
                    )))
                }
            },
            operand => invoke(&op, target, operand)?,
        };
        let meta = result.meta();
        registry.insert(cmd.result_id, result);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            party = %self.id,
            op = %cmd.op,
            self_id = %cmd.self_id,
            result_id = %cmd.result_id,
            "executed command"
        );
        Ok(Response::Handle(HandleMeta {
            id: cmd.result_id,
            meta,
        }))
    }
}

fn resolve(registry: &ObjectRegistry, arg: &Arg) -> Result<Value> {
    Ok(match arg {
        Arg::Object(id) => Value::Object(registry.get(*id)?.clone()),
        Arg::Scalar(v) => Value::Literal(Tensor::scalar_of(*v, DType::DEFAULT_FLOAT)),
        Arg::Int(v) => Value::Literal(Tensor::scalar_of(*v as f64, DType::DEFAULT_INT)),
        Arg::Bool(v) => Value::Literal(Tensor::scalar_of(f64::from(u8::from(*v)), DType::Bool)),
        Arg::Shape(_) => {
            return Err(RemoteError::BadArgument(
                "a shape is only valid as a keyword argument".into(),
            ))
        }
    })
}

fn invoke(op: &RemoteOp, target: &StoredObject, operand: Option<Value>) -> Result<StoredObject> {
    let out = match (op, target, operand) {
        (RemoteOp::Unary(op), StoredObject::Node(n), None) => n.unary(op.clone())?.into(),
        (RemoteOp::Unary(op), StoredObject::Tensor(t), None) => op.eval(t)?.into(),
        (RemoteOp::Reduce(op), StoredObject::Node(n), None) => n.reduce(*op)?.into(),
        (RemoteOp::Reduce(op), StoredObject::Tensor(t), None) => op.eval(t)?.into(),
        (RemoteOp::Binary(op), lhs, Some(rhs)) => binary(*op, lhs, rhs)?,
        (op, _, _) => {
            return Err(RemoteError::BadArgument(format!(
                "operand arity mismatch for `{}`",
                op.qualified_name()
            )))
        }
    };
    Ok(out)
}

fn binary(op: BinaryOp, lhs: &StoredObject, rhs: Value) -> Result<StoredObject> {
    let out = match (lhs, rhs) {
        (StoredObject::Node(a), Value::Object(StoredObject::Node(b))) => a.apply_binary(op, &b)?.into(),
        (StoredObject::Node(a), Value::Object(StoredObject::Tensor(t))) => {
            a.apply_binary(op, Operand::Array(t))?.into()
        }
        (StoredObject::Node(a), Value::Literal(s)) => match op {
            BinaryOp::Concat(axis) => a.concatenate(Operand::Scalar(s), axis)?.into(),
            _ => a.apply_binary(op, Operand::Scalar(s))?.into(),
        },
        (StoredObject::Tensor(t), Value::Object(StoredObject::Node(b))) => {
            b.apply_reflected(op, Operand::Array(t.clone()))?.into()
        }
        (StoredObject::Tensor(t), Value::Object(StoredObject::Tensor(u))) => op.eval(t, &u)?.into(),
        (StoredObject::Tensor(t), Value::Literal(s)) => {
            let s = s.cast(t.dtype().absorb_scalar(s.dtype()));
            op.eval(t, &s)?.into()
        }
    };
    Ok(out)
}

/// `operand op target`.
fn reflected(op: BinaryOp, target: &StoredObject, operand: Value) -> Result<StoredObject> {
    let out = match (target, operand) {
        (StoredObject::Node(b), Value::Object(StoredObject::Node(a))) => a.apply_binary(op, b)?.into(),
        (StoredObject::Node(b), Value::Object(StoredObject::Tensor(t))) => {
            b.apply_reflected(op, Operand::Array(t))?.into()
        }
        (StoredObject::Node(b), Value::Literal(s)) => b.apply_reflected(op, Operand::Scalar(s))?.into(),
        (StoredObject::Tensor(t), Value::Object(StoredObject::Node(a))) => {
            a.apply_binary(op, Operand::Array(t.clone()))?.into()
        }
        (StoredObject::Tensor(t), Value::Object(StoredObject::Tensor(u))) => op.eval(&u, t)?.into(),
        (StoredObject::Tensor(t), Value::Literal(s)) => {
            let s = s.cast(t.dtype().absorb_scalar(s.dtype()));
            op.eval(&s, t)?.into()
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use dpgraph_core::id::DataSubject;
    use dpgraph_lazy::LazyNode;

    use super::*;
    use crate::codec::{decode_response, encode_message};

    fn node(data: &[f64]) -> StoredObject {
        let t = Tensor::new([data.len()], data.to_vec()).unwrap();
        LazyNode::leaf_in_range(t, 0.0, 10.0, DataSubject::from("alice"))
            .unwrap()
            .into()
    }

    fn store(party: &Party, id: u64, obj: &StoredObject) {
        let msg = Message::StoreObject {
            id: ObjectId::new(id),
            payload: encode_object(obj).unwrap(),
        };
        assert_eq!(party.handle(msg).unwrap(), Response::Ack);
    }

    fn command(op: &str, self_id: u64, args: Vec<Arg>, result_id: u64) -> Message {
        Message::ExecuteCommand(Command {
            op: op.into(),
            self_id: ObjectId::new(self_id),
            args,
            kwargs: BTreeMap::new(),
            result_id: ObjectId::new(result_id),
            reflected: false,
        })
    }

    #[test]
    fn request_transfers_ownership() {
        let party = Party::new("bob");
        store(&party, 7, &node(&[1.0]));
        let first = party.handle(Message::RequestObject { id: ObjectId::new(7) }).unwrap();
        assert!(matches!(first, Response::Object { .. }));
        let err = party
            .handle(Message::RequestObject { id: ObjectId::new(7) })
            .unwrap_err();
        assert!(matches!(err, RemoteError::UnknownObject(_)));
    }

    #[test]
    fn delete_is_idempotent() {
        let party = Party::new("bob");
        store(&party, 1, &node(&[1.0]));
        let del = Message::DeleteObject { id: ObjectId::new(1) };
        assert_eq!(party.handle(del.clone()).unwrap(), Response::Ack);
        assert_eq!(party.handle(del).unwrap(), Response::Ack);
        assert_eq!(party.object_count().unwrap(), 0);
    }

    #[test]
    fn execute_registers_result_with_metadata() {
        let party = Party::new("bob");
        store(&party, 1, &node(&[1.0, 2.0]));
        store(&party, 2, &node(&[3.0, 4.0]));
        let resp = party
            .handle(command("tensor.add", 1, vec![Arg::Object(ObjectId::new(2))], 3))
            .unwrap();
        let Response::Handle(meta) = resp else {
            panic!("expected a handle, got {resp:?}");
        };
        assert_eq!(meta.id, ObjectId::new(3));
        assert_eq!(meta.meta.bounds.max.as_scalar(), Some(20.0));
        let reg = party.registry().unwrap();
        assert_eq!(reg.get(ObjectId::new(3)).unwrap().value().data(), &[4.0, 6.0]);
    }

    #[test]
    fn public_tensor_on_the_left_uses_reflected_op() {
        let party = Party::new("bob");
        store(&party, 1, &StoredObject::Tensor(Tensor::new([2], vec![10.0, 20.0]).unwrap()));
        store(&party, 2, &node(&[1.0, 2.0]));
        party
            .handle(command("tensor.sub", 1, vec![Arg::Object(ObjectId::new(2))], 3))
            .unwrap();
        let reg = party.registry().unwrap();
        let out = reg.get(ObjectId::new(3)).unwrap();
        assert_eq!(out.value().data(), &[9.0, 18.0]);
        assert!(out.as_node().unwrap().is_linear());
    }

    #[test]
    fn disallowed_command_leaves_registry_untouched() {
        let config = PartyConfig {
            allowed_commands: Some(vec!["tensor.add".into()]),
            ..PartyConfig::new("bob")
        };
        let party = Party::from_config(&config).unwrap();
        store(&party, 1, &node(&[1.0]));
        let err = party
            .handle(command("tensor.mul", 1, vec![Arg::Scalar(2.0)], 2))
            .unwrap_err();
        assert!(matches!(err, RemoteError::DisallowedCommand(op) if op == "tensor.mul"));
        assert_eq!(party.object_count().unwrap(), 1);
        assert!(!party.holds(ObjectId::new(2)).unwrap());
    }

    #[test]
    fn unknown_argument_object_is_reported() {
        let party = Party::new("bob");
        store(&party, 1, &node(&[1.0]));
        let err = party
            .handle(command("tensor.add", 1, vec![Arg::Object(ObjectId::new(99))], 2))
            .unwrap_err();
        assert!(matches!(err, RemoteError::UnknownObject(id) if id == ObjectId::new(99)));
    }

    #[test]
    fn wire_errors_come_back_encoded() {
        let party = Party::new("bob");
        let bytes = encode_message(&Message::RequestObject { id: ObjectId::new(5) }).unwrap();
        let resp = decode_response(&party.receive(&bytes).unwrap()).unwrap();
        assert!(matches!(
            resp.into_result(),
            Err(RemoteError::UnknownObject(id)) if id == ObjectId::new(5)
        ));
    }

    #[test]
    fn short_tensor_payload_is_refused_and_party_stays_usable() {
        let party = Party::new("bob");
        let payload = br#"{"type":"tensor","value":{"shape":[4],"dtype":"float64","data":[1.0]}}"#;
        let err = party
            .handle(Message::StoreObject {
                id: ObjectId::new(1),
                payload: payload.to_vec(),
            })
            .unwrap_err();
        assert!(matches!(err, RemoteError::Codec(_)));
        assert!(!party.holds(ObjectId::new(1)).unwrap());

        let err = party.handle(command("tensor.sum", 1, vec![], 2)).unwrap_err();
        assert!(matches!(err, RemoteError::UnknownObject(_)));
        store(&party, 1, &node(&[1.0, 2.0]));
        assert!(party.handle(command("tensor.sum", 1, vec![], 2)).is_ok());
    }

    #[test]
    fn reflected_command_puts_the_argument_on_the_left() {
        let party = Party::new("bob");
        store(&party, 1, &node(&[1.0, 4.0]));
        let Message::ExecuteCommand(mut cmd) = command("tensor.sub", 1, vec![Arg::Scalar(10.0)], 2)
        else {
            unreachable!()
        };
        cmd.reflected = true;
        party.handle(Message::ExecuteCommand(cmd)).unwrap();
        let reg = party.registry().unwrap();
        let out = reg.get(ObjectId::new(2)).unwrap();
        assert_eq!(out.value().data(), &[9.0, 6.0]);
        assert!(out.as_node().unwrap().is_linear());
    }
}
