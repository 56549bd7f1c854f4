//! Operation envelope carried on the wire.
//!
//! Request: `{"id", "version", "method", "sys": {"ack": 0|1}, "params"}`
//! Reply:   `{"id", "code", "message", "data"}`

use crate::error::OperationError;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Protocol version placed on every request.
pub const OPERATION_VERSION: &str = "1.0";

/// Reply code marking success.
pub const CODE_OK: i32 = 200;

/// Anything that carries a correlation token.
pub trait Tokened {
    fn token(&self) -> &str;

    /// Whether the sender waits for a reply carrying the same token.
    fn expects_reply(&self) -> bool {
        true
    }
}

/// Whether the sender expects a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Ack {
    /// Fire-and-forget
    None = 0,
    #[default]
    Required = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestExt {
    #[serde(default)]
    pub ack: Ack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest<T> {
    #[serde(rename = "id")]
    pub token: String,
    pub version: String,
    pub method: String,
    #[serde(rename = "sys", default)]
    pub ext: RequestExt,
    pub params: T,
}

impl<T> OperationRequest<T> {
    pub fn new(token: impl Into<String>, method: impl Into<String>, params: T) -> Self {
        Self {
            token: token.into(),
            version: OPERATION_VERSION.to_string(),
            method: method.into(),
            ext: RequestExt::default(),
            params,
        }
    }

    /// Mark the request fire-and-forget (`ack = 0`).
    pub fn without_reply(mut self) -> Self {
        self.ext.ack = Ack::None;
        self
    }
}

impl<T> Tokened for OperationRequest<T> {
    #[inline]
    fn token(&self) -> &str {
        &self.token
    }

    #[inline]
    fn expects_reply(&self) -> bool {
        self.ext.ack == Ack::Required
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReply<T> {
    #[serde(rename = "id")]
    pub token: String,
    pub code: i32,
    #[serde(rename = "message", default)]
    pub desc: String,
    pub data: T,
}

impl<T> OperationReply<T> {
    pub fn success(token: impl Into<String>, data: T) -> Self {
        Self {
            token: token.into(),
            code: CODE_OK,
            desc: "success".to_string(),
            data,
        }
    }

    pub fn failure(token: impl Into<String>, code: i32, desc: impl Into<String>, data: T) -> Self {
        Self {
            token: token.into(),
            code,
            desc: desc.into(),
            data,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// Split into the payload on success, or a typed failure for any other code.
    pub fn into_result(self) -> Result<T, OperationError> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(OperationError {
                token: self.token,
                code: self.code,
                desc: self.desc,
            })
        }
    }

    pub fn map<R>(self, f: impl FnOnce(T) -> R) -> OperationReply<R> {
        OperationReply {
            token: self.token,
            code: self.code,
            desc: self.desc,
            data: f(self.data),
        }
    }
}

impl<T> Tokened for OperationReply<T> {
    #[inline]
    fn token(&self) -> &str {
        &self.token
    }
}

/// Inbound reply as handed to a waiting call.
///
/// Unlike [`OperationReply`], the payload only exists for [`CODE_OK`]; an error reply
/// needs no `data` that fits the expected type.
#[derive(Debug, Clone, PartialEq)]
pub struct CallReply<T> {
    pub token: String,
    pub outcome: Result<T, OperationError>,
}

impl<T> CallReply<T> {
    pub fn success(token: impl Into<String>, data: T) -> Self {
        Self {
            token: token.into(),
            outcome: Ok(data),
        }
    }

    pub fn failure(token: impl Into<String>, code: i32, desc: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            outcome: Err(OperationError {
                token: token.clone(),
                code,
                desc: desc.into(),
            }),
            token,
        }
    }
}

impl<T> From<OperationReply<T>> for CallReply<T> {
    fn from(reply: OperationReply<T>) -> Self {
        Self {
            token: reply.token.clone(),
            outcome: reply.into_result(),
        }
    }
}

impl<T> Tokened for CallReply<T> {
    #[inline]
    fn token(&self) -> &str {
        &self.token
    }
}
