//! Built-in codecs: bytes <-> UTF-8 text <-> JSON <-> typed values and operation
//! envelopes.

use super::{Codec, Decoder, Encoder};
use crate::{
    error::DecodeError,
    protocol::{CallReply, OperationReply, OperationRequest, CODE_OK},
};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Raw bytes <-> UTF-8 text.
pub fn bytes_text() -> Codec<Bytes, String> {
    Codec::new(
        Encoder::new(|text: String| Ok(Bytes::from(text))),
        Decoder::from_fn(|_, bytes: Bytes| Ok(std::str::from_utf8(&bytes)?.to_owned())),
    )
}

/// UTF-8 text <-> JSON document.
pub fn text_json() -> Codec<String, Value> {
    Codec::new(
        Encoder::new(|value: Value| Ok(serde_json::to_string(&value)?)),
        Decoder::from_fn(|_, text: String| Ok(serde_json::from_str(&text)?)),
    )
}

/// Raw bytes <-> JSON document, without the intermediate string.
pub fn bytes_json() -> Codec<Bytes, Value> {
    Codec::new(
        Encoder::new(|value: Value| Ok(Bytes::from(serde_json::to_vec(&value)?))),
        Decoder::from_fn(|_, bytes: Bytes| Ok(serde_json::from_slice(&bytes)?)),
    )
}

/// JSON document <-> any serde type.
pub fn json_typed<T>() -> Codec<Value, T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    Codec::new(
        Encoder::new(|value: T| Ok(serde_json::to_value(value)?)),
        Decoder::from_fn(|_, value: Value| Ok(serde_json::from_value(value)?)),
    )
}

/// JSON document <-> `OperationRequest<T>`.
pub fn json_request<T>() -> Codec<Value, OperationRequest<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    json_typed::<OperationRequest<T>>()
}

/// Reply as it may appear on the wire: `message` and `data` are optional there.
#[derive(Deserialize)]
struct WireReply {
    id: String,
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// JSON document <-> `OperationReply<T>`.
///
/// A reply without `data` decodes as JSON `null` into `T`, so `Option<_>` and `()`
/// payloads accept error replies that carry no body.
pub fn json_reply<T>() -> Codec<Value, OperationReply<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    Codec::new(
        Encoder::new(|reply: OperationReply<T>| Ok(serde_json::to_value(reply)?)),
        Decoder::from_fn(|_, value: Value| {
            let wire: WireReply = serde_json::from_value(value)?;
            let data = reply_data(&wire.id, wire.data)?;
            Ok(OperationReply {
                token: wire.id,
                code: wire.code,
                desc: wire.message,
                data,
            })
        }),
    )
}

/// JSON document -> [`CallReply`].
///
/// `data` is only decoded for [`CODE_OK`]; any other code yields the operation failure
/// whatever `data` holds.
pub fn json_call_reply<T>() -> Decoder<Value, CallReply<T>>
where
    T: DeserializeOwned + 'static,
{
    Decoder::from_fn(|_, value: Value| {
        let wire: WireReply = serde_json::from_value(value)?;
        if wire.code != CODE_OK {
            return Ok(CallReply::failure(wire.id, wire.code, wire.message));
        }
        let data = reply_data(&wire.id, wire.data)?;
        Ok(CallReply::success(wire.id, data))
    })
}

fn reply_data<T: DeserializeOwned>(id: &str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|e| DecodeError::Invalid {
        reason: format!("reply '{id}' carries unexpected data: {e}"),
    })
}

/// Serialize-only JSON encoder for one-way payloads.
pub fn json_encoder<T>() -> Encoder<T, Bytes>
where
    T: Serialize + 'static,
{
    Encoder::new(|value: T| Ok(Bytes::from(serde_json::to_vec(&value)?)))
}

/// Raw bytes <-> any serde type via JSON.
pub fn typed<T>() -> Codec<Bytes, T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    bytes_json().chain(json_typed())
}

/// Raw bytes <-> `OperationRequest<T>`.
pub fn request<T>() -> Codec<Bytes, OperationRequest<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    bytes_json().chain(json_request())
}

/// Raw bytes <-> `OperationReply<T>`.
pub fn reply<T>() -> Codec<Bytes, OperationReply<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    bytes_json().chain(json_reply())
}

/// Raw bytes -> [`CallReply<T>`], the reply decoder of call-style bindings.
pub fn call_reply<T>() -> Decoder<Bytes, CallReply<T>>
where
    T: DeserializeOwned + 'static,
{
    bytes_json().decoder().then(json_call_reply())
}
