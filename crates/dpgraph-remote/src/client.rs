//! Requester side: turns operations on handles into commands.

use std::sync::Arc;

use dpgraph_core::dtype::DType;
use dpgraph_core::id::{ObjectId, PartyId};
use dpgraph_core::tensor::Tensor;

use crate::codec::{decode_object, decode_response, encode_message, encode_object};
use crate::error::{RemoteError, Result};
use crate::handle::{HandleStatus, RemoteHandle};
use crate::infer::{infer, infer_reflected, OperandMeta, PublicMeta};
use crate::message::{Arg, Command, Message, Response};
use crate::op::RemoteOp;
use crate::registry::StoredObject;
use crate::sharing::{RemoteValue, SecretSharing};
use crate::transport::Transport;

/// Right-hand operand of [`Client::apply`].
#[derive(Debug, Clone)]
pub enum RemoteOperand<'a> {
    Handle(&'a RemoteHandle),
    Scalar(f64),
    Int(i64),
    Bool(bool),
    /// A public array; uploaded to the target party before the command.
    Array(Tensor),
}

impl<'a> From<&'a RemoteHandle> for RemoteOperand<'a> {
    fn from(h: &'a RemoteHandle) -> Self {
        RemoteOperand::Handle(h)
    }
}

impl From<f64> for RemoteOperand<'_> {
    fn from(v: f64) -> Self {
        RemoteOperand::Scalar(v)
    }
}

impl From<i64> for RemoteOperand<'_> {
    fn from(v: i64) -> Self {
        RemoteOperand::Int(v)
    }
}

impl From<bool> for RemoteOperand<'_> {
    fn from(v: bool) -> Self {
        RemoteOperand::Bool(v)
    }
}

impl From<Tensor> for RemoteOperand<'_> {
    fn from(t: Tensor) -> Self {
        RemoteOperand::Array(t)
    }
}

impl RemoteOperand<'_> {
    fn literal(&self) -> Option<Tensor> {
        match *self {
            RemoteOperand::Scalar(v) => Some(Tensor::scalar_of(v, DType::DEFAULT_FLOAT)),
            RemoteOperand::Int(v) => Some(Tensor::scalar_of(v as f64, DType::DEFAULT_INT)),
            RemoteOperand::Bool(v) => Some(Tensor::scalar_of(f64::from(u8::from(v)), DType::Bool)),
            _ => None,
        }
    }
}

pub struct Client {
    id: PartyId,
    transport: Arc<dyn Transport>,
    sharing: Option<Arc<dyn SecretSharing>>,
}

impl Client {
    pub fn new(id: impl Into<PartyId>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            transport,
            sharing: None,
        }
    }

    pub fn with_sharing(mut self, sharing: Arc<dyn SecretSharing>) -> Self {
        self.sharing = Some(sharing);
        self
    }

    pub fn id(&self) -> &PartyId {
        &self.id
    }

    fn request(&self, to: &PartyId, msg: &Message) -> Result<Response> {
        let reply = self.transport.request(to, encode_message(msg)?)?;
        decode_response(&reply)?.into_result()
    }

    fn expect_ack(&self, to: &PartyId, msg: &Message) -> Result<()> {
        match self.request(to, msg)? {
            Response::Ack => Ok(()),
            other => Err(RemoteError::Codec(format!("expected ack, got {other:?}"))),
        }
    }

    /// Upload `obj` to `to` under a fresh id.
    pub fn send(&self, to: &PartyId, obj: impl Into<StoredObject>) -> Result<RemoteHandle> {
        let obj = obj.into();
        let id = ObjectId::random();
        let meta = obj.meta();
        let msg = Message::StoreObject {
            id,
            payload: encode_object(&obj)?,
        };
        self.expect_ack(to, &msg)?;
        Ok(RemoteHandle::ready(to.clone(), id, meta))
    }

    /// Fetch the object; the party gives it up.
    pub fn get(&self, handle: RemoteHandle) -> Result<StoredObject> {
        let msg = Message::RequestObject {
            id: handle.id_at_location(),
        };
        match self.request(handle.owner(), &msg)? {
            Response::Object { payload } => decode_object(&payload),
            other => Err(RemoteError::Codec(format!("expected object, got {other:?}"))),
        }
    }

    pub fn delete(&self, handle: RemoteHandle) -> Result<()> {
        let msg = Message::DeleteObject {
            id: handle.id_at_location(),
        };
        self.expect_ack(handle.owner(), &msg)
    }

    /// Apply `op` remotely. Metadata is inferred locally and the returned
    /// handle is `Processing` until [`Client::refresh`] sees the reply.
    pub fn apply<'a>(
        &self,
        op: RemoteOp,
        handle: &RemoteHandle,
        operand: Option<RemoteOperand<'a>>,
    ) -> Result<RemoteValue> {
        self.dispatch(op, handle, operand, false)
    }

    /// `operand op handle`: the reflected form of a binary op, for a public
    /// operand on the left (`10 - x`, `w @ x`).
    pub fn apply_reflected<'a>(
        &self,
        op: RemoteOp,
        handle: &RemoteHandle,
        operand: RemoteOperand<'a>,
    ) -> Result<RemoteValue> {
        self.dispatch(op, handle, Some(operand), true)
    }

    fn dispatch(
        &self,
        op: RemoteOp,
        handle: &RemoteHandle,
        operand: Option<RemoteOperand<'_>>,
        reflected: bool,
    ) -> Result<RemoteValue> {
        let literal = operand.as_ref().and_then(RemoteOperand::literal);
        let array_meta = match &operand {
            Some(RemoteOperand::Array(t)) => Some(PublicMeta::of_tensor(t)),
            _ => None,
        };
        let other_meta = match (&operand, &literal, &array_meta) {
            (Some(RemoteOperand::Handle(h)), _, _) => Some(OperandMeta::Public(h.meta())),
            (_, Some(lit), _) => Some(OperandMeta::Literal(lit)),
            (_, _, Some(meta)) => Some(OperandMeta::Public(meta)),
            _ => None,
        };
        let meta = match other_meta {
            Some(lhs) if reflected => infer_reflected(&op, handle.meta(), lhs)?,
            rhs => infer(&op, handle.meta(), rhs)?,
        };

        let owner = handle.owner();
        let mut scratch = None;
        let args = match operand {
            None => Vec::new(),
            Some(RemoteOperand::Handle(other)) if other.owner() != owner => {
                return if reflected {
                    self.cross_party(op, other, handle, meta)
                } else {
                    self.cross_party(op, handle, other, meta)
                };
            }
            Some(RemoteOperand::Handle(other)) => vec![Arg::Object(other.id_at_location())],
            Some(RemoteOperand::Array(t)) => {
                let id = self.send(owner, t)?.id_at_location();
                scratch = Some(id);
                vec![Arg::Object(id)]
            }
            Some(RemoteOperand::Scalar(v)) => vec![Arg::Scalar(v)],
            Some(RemoteOperand::Int(v)) => vec![Arg::Int(v)],
            Some(RemoteOperand::Bool(v)) => vec![Arg::Bool(v)],
        };

        let result_id = ObjectId::random();
        let cmd = Command {
            op: op.qualified_name(),
            self_id: handle.id_at_location(),
            args,
            kwargs: op.kwargs(),
            result_id,
            reflected,
        };
        let ticket = self
            .transport
            .post(owner, encode_message(&Message::ExecuteCommand(cmd))?)?;
        let mut out = RemoteHandle::processing(owner.clone(), result_id, meta, ticket);
        out.scratch = scratch;
        Ok(RemoteValue::Handle(out))
    }

    fn cross_party(
        &self,
        op: RemoteOp,
        lhs: &RemoteHandle,
        rhs: &RemoteHandle,
        meta: PublicMeta,
    ) -> Result<RemoteValue> {
        match &self.sharing {
            Some(sharing) => Ok(RemoteValue::Shared(sharing.apply(&op, lhs, rhs, meta)?)),
            None => Err(RemoteError::CrossPartyUnsupported {
                op: op.qualified_name(),
                lhs: lhs.owner().clone(),
                rhs: rhs.owner().clone(),
            }),
        }
    }

    /// Pick up the reply for a `Processing` handle, if it has arrived.
    pub fn refresh(&self, handle: &mut RemoteHandle) -> Result<HandleStatus> {
        let Some(ticket) = handle.pending else {
            return Ok(handle.status().clone());
        };
        let Some(bytes) = self.transport.poll(ticket)? else {
            return Ok(HandleStatus::Processing);
        };
        let status = match decode_response(&bytes)? {
            Response::Handle(h) if h.id == handle.id_at_location() => HandleStatus::Ready,
            Response::Error(e) => HandleStatus::Failed(RemoteError::from(e).to_string()),
            other => HandleStatus::Failed(format!("unexpected reply {other:?}")),
        };
        handle.resolve(status.clone());
        if let Some(id) = handle.scratch.take() {
            self.expect_ack(handle.owner(), &Message::DeleteObject { id })?;
        }
        Ok(status)
    }

    /// Deliver every queued command.
    pub fn sync(&self) -> Result<usize> {
        self.transport.flush()
    }
}

#[cfg(test)]
mod tests {
    use dpgraph_core::id::DataSubject;
    use dpgraph_core::shape::Shape;
    use dpgraph_lazy::{BinaryOp, LazyNode, UnaryOp};

    use super::*;
    use crate::config::PartyConfig;
    use crate::party::Party;
    use crate::transport::VirtualNetwork;

    fn setup() -> (Arc<VirtualNetwork>, Arc<Party>, Client) {
        let net = Arc::new(VirtualNetwork::new());
        let bob = Arc::new(Party::new("bob"));
        net.add_party(Arc::clone(&bob)).unwrap();
        let client = Client::new("alice", net.clone());
        (net, bob, client)
    }

    fn private(dims: &[usize]) -> LazyNode {
        let n = dims.iter().product();
        let t = Tensor::new(Shape::from(dims), (0..n).map(|i| i as f64).collect()).unwrap();
        LazyNode::leaf_in_range(t, 0.0, 100.0, DataSubject::from("carol")).unwrap()
    }

    #[test]
    fn apply_returns_processing_handle_then_ready() {
        let (net, bob, client) = setup();
        let to = PartyId::from("bob");
        let a = client.send(&to, private(&[3, 4])).unwrap();
        let b = client.send(&to, private(&[4, 5])).unwrap();

        let mut c = client
            .apply(RemoteOp::Binary(BinaryOp::MatMul), &a, Some((&b).into()))
            .unwrap()
            .into_handle()
            .unwrap();
        assert_eq!(c.shape(), &Shape::from([3, 5]));
        assert_eq!(c.status(), &HandleStatus::Processing);
        assert_eq!(client.refresh(&mut c).unwrap(), HandleStatus::Processing);

        assert_eq!(net.pump().unwrap(), 1);
        assert_eq!(client.refresh(&mut c).unwrap(), HandleStatus::Ready);
        assert!(bob.holds(c.id_at_location()).unwrap());

        let StoredObject::Node(n) = client.get(c).unwrap() else {
            panic!("expected a node");
        };
        assert_eq!(n.shape(), &Shape::from([3, 5]));
        assert!(!n.is_linear());
    }

    #[test]
    fn shape_errors_send_nothing() {
        let (net, bob, client) = setup();
        let to = PartyId::from("bob");
        let a = client.send(&to, private(&[3, 4])).unwrap();
        let before = bob.object_count().unwrap();
        let err = client
            .apply(
                RemoteOp::Binary(BinaryOp::Add),
                &a,
                Some(Tensor::zeros([5, 4], DType::Float64).into()),
            )
            .unwrap_err();
        assert!(matches!(err, RemoteError::Core(dpgraph_core::Error::ShapeMismatch { .. })));
        assert_eq!(net.pending().unwrap(), 0);
        assert_eq!(bob.object_count().unwrap(), before);
    }

    #[test]
    fn array_operand_is_uploaded_first() {
        let (net, bob, client) = setup();
        let to = PartyId::from("bob");
        let a = client.send(&to, private(&[2])).unwrap();
        let mut out = client
            .apply(
                RemoteOp::Binary(BinaryOp::Mul),
                &a,
                Some(Tensor::new([2], vec![2.0, 3.0]).unwrap().into()),
            )
            .unwrap()
            .into_handle()
            .unwrap();
        assert_eq!(bob.object_count().unwrap(), 2);
        net.pump().unwrap();
        assert_eq!(bob.object_count().unwrap(), 3);
        client.refresh(&mut out).unwrap();
        // The uploaded operand is gone once the command resolved.
        assert_eq!(bob.object_count().unwrap(), 2);
        let value = client.get(out).unwrap();
        assert_eq!(value.value().data(), &[0.0, 3.0]);
        assert_eq!(bob.object_count().unwrap(), 1);
    }

    #[test]
    fn reflected_ops_put_the_operand_on_the_left() {
        let (_net, _bob, client) = setup();
        let to = PartyId::from("bob");
        let x = client.send(&to, private(&[4, 5])).unwrap();

        let w = Tensor::ones([3, 4], DType::Float64);
        let mut wx = client
            .apply_reflected(RemoteOp::Binary(BinaryOp::MatMul), &x, w.into())
            .unwrap()
            .into_handle()
            .unwrap();
        assert_eq!(wx.shape(), &Shape::from([3, 5]));

        let mut rsub = client
            .apply_reflected(RemoteOp::Binary(BinaryOp::Sub), &x, 100.0.into())
            .unwrap()
            .into_handle()
            .unwrap();
        assert_eq!(rsub.min_vals().as_scalar(), Some(0.0));

        client.sync().unwrap();
        assert_eq!(client.refresh(&mut wx).unwrap(), HandleStatus::Ready);
        assert_eq!(client.refresh(&mut rsub).unwrap(), HandleStatus::Ready);
        let StoredObject::Node(n) = client.get(rsub).unwrap() else {
            panic!("expected a node");
        };
        assert_eq!(n.value().data()[..3], [100.0, 99.0, 98.0]);
        assert!(n.is_linear());
        let StoredObject::Node(m) = client.get(wx).unwrap() else {
            panic!("expected a node");
        };
        // Column sums of 0..20 laid out as 4x5.
        assert_eq!(m.value().data()[..5], [30.0, 34.0, 38.0, 42.0, 46.0]);
    }

    #[test]
    fn rejected_command_marks_handle_failed() {
        let net = Arc::new(VirtualNetwork::new());
        let config = PartyConfig {
            allowed_commands: Some(vec!["tensor.add".into()]),
            ..PartyConfig::new("bob")
        };
        net.add_party(Arc::new(Party::from_config(&config).unwrap())).unwrap();
        let client = Client::new("alice", net.clone());
        let a = client.send(&PartyId::from("bob"), private(&[2])).unwrap();
        let mut h = client
            .apply(RemoteOp::Unary(UnaryOp::Neg), &a, None)
            .unwrap()
            .into_handle()
            .unwrap();
        client.sync().unwrap();
        let status = client.refresh(&mut h).unwrap();
        assert!(matches!(status, HandleStatus::Failed(msg) if msg.contains("allow-list")));
    }

    #[test]
    fn cross_party_without_sharing_is_refused() {
        let (net, _bob, client) = setup();
        net.add_party(Arc::new(Party::new("dave"))).unwrap();
        let a = client.send(&PartyId::from("bob"), private(&[2])).unwrap();
        let b = client.send(&PartyId::from("dave"), private(&[2])).unwrap();
        let err = client
            .apply(RemoteOp::Binary(BinaryOp::Add), &a, Some((&b).into()))
            .unwrap_err();
        assert!(matches!(err, RemoteError::CrossPartyUnsupported { .. }));
        assert_eq!(net.pending().unwrap(), 0);
    }

    #[test]
    fn get_transfers_and_delete_forgets() {
        let (_net, bob, client) = setup();
        let to = PartyId::from("bob");
        let a = client.send(&to, Tensor::scalar(4.0)).unwrap();
        let b = client.send(&to, Tensor::scalar(5.0)).unwrap();
        let id = a.id_at_location();
        assert_eq!(client.get(a.clone()).unwrap().value().item(), Some(4.0));
        assert!(matches!(client.get(a), Err(RemoteError::UnknownObject(i)) if i == id));
        client.delete(b).unwrap();
        assert_eq!(bob.object_count().unwrap(), 0);
    }
}
