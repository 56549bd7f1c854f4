//! Composable transform pipeline between wire bytes and application types.
//!
//! Every stage returns [`Decoded`]:
//! - `Ok(Some(v))` continues the chain with `v`
//! - `Ok(None)` skips the message (filter rejection), not an error
//! - `Err(e)` is a genuine decode failure
//!
//! Pipelines are immutable values: `then`/`filter`/`map` return a new pipeline and
//! leave the receiver untouched, so bindings derived from the same base never share
//! mutable state.

pub mod codecs;

use crate::error::{DecodeError, EncodeError};
use std::sync::Arc;

/// Outcome of one decode stage.
pub type Decoded<R> = Result<Option<R>, DecodeError>;

type DecodeFn<T, R> = dyn Fn(&str, T) -> Decoded<R> + Send + Sync;
type EncodeFn<U, T> = dyn Fn(U) -> Result<T, EncodeError> + Send + Sync;

/// Maps `(topic, T)` to `R`, possibly skipping the message.
pub struct Decoder<T, R> {
    f: Arc<DecodeFn<T, R>>,
}

impl<T, R> Clone for Decoder<T, R> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<T: 'static, R: 'static> Decoder<T, R> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, T) -> Decoded<R> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Stage that never skips.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, T) -> Result<R, DecodeError> + Send + Sync + 'static,
    {
        Self::new(move |topic, input| f(topic, input).map(Some))
    }

    #[inline]
    pub fn decode(&self, topic: &str, input: T) -> Decoded<R> {
        (self.f)(topic, input)
    }

    /// `Decoder<T, R>.then(Decoder<R, V>) -> Decoder<T, V>`.
    ///
    /// A skip or failure in `self` short-circuits `next`.
    pub fn then<V: 'static>(&self, next: Decoder<R, V>) -> Decoder<T, V> {
        let first = self.clone();
        Decoder::new(move |topic, input| match first.decode(topic, input)? {
            Some(mid) => next.decode(topic, mid),
            None => Ok(None),
        })
    }

    /// Keep only values accepted by `predicate`.
    pub fn filter<P>(&self, predicate: P) -> Decoder<T, R>
    where
        P: Fn(&str, &R) -> bool + Send + Sync + 'static,
    {
        self.then(Decoder::filtering(predicate))
    }

    pub fn map<V, F>(&self, f: F) -> Decoder<T, V>
    where
        V: 'static,
        F: Fn(&str, R) -> V + Send + Sync + 'static,
    {
        self.then(Decoder::new(move |topic, input| Ok(Some(f(topic, input)))))
    }

    pub fn try_map<V, F>(&self, f: F) -> Decoder<T, V>
    where
        V: 'static,
        F: Fn(&str, R) -> Result<V, DecodeError> + Send + Sync + 'static,
    {
        self.then(Decoder::from_fn(f))
    }
}

impl<T: 'static> Decoder<T, T> {
    pub fn identity() -> Self {
        Self::new(|_, input| Ok(Some(input)))
    }

    /// Stage that passes values accepted by `predicate` and skips the rest.
    pub fn filtering<P>(predicate: P) -> Self
    where
        P: Fn(&str, &T) -> bool + Send + Sync + 'static,
    {
        Self::new(move |topic, input| {
            if predicate(topic, &input) {
                Ok(Some(input))
            } else {
                Ok(None)
            }
        })
    }
}

/// Maps `U` to `T`.
pub struct Encoder<U, T> {
    f: Arc<EncodeFn<U, T>>,
}

impl<U, T> Clone for Encoder<U, T> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<U: 'static, T: 'static> Encoder<U, T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(U) -> Result<T, EncodeError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    #[inline]
    pub fn encode(&self, input: U) -> Result<T, EncodeError> {
        (self.f)(input)
    }

    /// Mirror of [`Decoder::then`]: `Encoder<U, T>.compose(Encoder<V, U>) -> Encoder<V, T>`.
    pub fn compose<V: 'static>(&self, before: Encoder<V, U>) -> Encoder<V, T> {
        let last = self.clone();
        Encoder::new(move |input| last.encode(before.encode(input)?))
    }

    /// Forward composition: `Encoder<U, T>.and_then(Encoder<T, W>) -> Encoder<U, W>`.
    pub fn and_then<W: 'static>(&self, after: Encoder<T, W>) -> Encoder<U, W> {
        after.compose(self.clone())
    }
}

impl<T: 'static> Encoder<T, T> {
    pub fn identity() -> Self {
        Self::new(Ok)
    }
}

/// Paired encoder/decoder between a wire type `W` and an application type `A`.
pub struct Codec<W, A> {
    encoder: Encoder<A, W>,
    decoder: Decoder<W, A>,
}

impl<W, A> Clone for Codec<W, A> {
    fn clone(&self) -> Self {
        Self {
            encoder: self.encoder.clone(),
            decoder: self.decoder.clone(),
        }
    }
}

impl<W: 'static, A: 'static> Codec<W, A> {
    pub fn new(encoder: Encoder<A, W>, decoder: Decoder<W, A>) -> Self {
        Self { encoder, decoder }
    }

    /// End-to-end composition: `Codec<W, A>.chain(Codec<A, B>) -> Codec<W, B>`.
    pub fn chain<B: 'static>(&self, next: Codec<A, B>) -> Codec<W, B> {
        Codec {
            encoder: self.encoder.compose(next.encoder),
            decoder: self.decoder.then(next.decoder),
        }
    }

    #[inline]
    pub fn encoder(&self) -> Encoder<A, W> {
        self.encoder.clone()
    }

    #[inline]
    pub fn decoder(&self) -> Decoder<W, A> {
        self.decoder.clone()
    }

    #[inline]
    pub fn encode(&self, value: A) -> Result<W, EncodeError> {
        self.encoder.encode(value)
    }

    #[inline]
    pub fn decode(&self, topic: &str, wire: W) -> Decoded<A> {
        self.decoder.decode(topic, wire)
    }
}
