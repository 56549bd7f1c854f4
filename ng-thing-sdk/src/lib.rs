//! Device-side request/reply engine over a publish/subscribe transport.
//!
//! [`ThingOp`] is the entry point: it hands out correlation tokens, posts one-way
//! messages and creates bindings (consumer-style [`Binder`] or call-style [`Caller`])
//! on top of any [`Transport`].

pub mod binding;
pub mod config;
pub mod connect;
pub mod dispatch;
pub mod error;
pub mod path;
pub mod pipeline;
pub mod protocol;
pub mod thing;
pub mod token;
pub mod topic;
pub mod transport;

pub use binding::{BindGroup, Binder, BinderGroup, BinderStatistics, Caller, OpBind};
pub use crate::config::{CallOptions, DispatchConfig, ThingOpConfig};
pub use connect::{ConnectPolicy, ConnectStrategy, ConnectionState, LinearBackoff};
pub use dispatch::DispatchPool;
pub use error::{DecodeError, EncodeError, OpError, OpResult, OperationError, TransportError};
pub use path::DevicePath;
pub use pipeline::{codecs, Codec, Decoded, Decoder, Encoder};
pub use protocol::{
    Ack, CallReply, OperationReply, OperationRequest, Tokened, CODE_OK, OPERATION_VERSION,
};
pub use thing::ThingOp;
pub use token::TokenGenerator;
pub use topic::{TopicFilter, TopicFilterError};
pub use transport::{
    ConnectOptions, ConnectionLostHandler, MessageHandler, Qos, SubscriptionId, Transport,
    TransportResult,
};
