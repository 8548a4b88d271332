// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-type encode and decode strategies.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use stratum_tier::SerializationError;

/// A value that can be stored in a [`HybridCache`](crate::HybridCache).
///
/// Every `Serialize + DeserializeOwned` type is cacheable and is stored as JSON unless a
/// [`Codec`] is registered for it. Other types opt in with an empty implementation and are
/// stored through the codec registered for them; without one, storing or reading them
/// fails with a [`SerializationError`].
pub trait Cacheable: Clone + Send + Sync + 'static {
    /// Encodes `self` when no codec is registered for the type.
    ///
    /// # Errors
    ///
    /// The default implementation always fails.
    fn encode_unregistered(&self) -> Result<Vec<u8>, SerializationError> {
        Err(SerializationError::encode::<Self>(MissingCodec))
    }

    /// Decodes a value when no codec is registered for the type.
    ///
    /// # Errors
    ///
    /// The default implementation always fails.
    fn decode_unregistered(bytes: &[u8]) -> Result<Self, SerializationError> {
        let _ = bytes;
        Err(SerializationError::decode::<Self>(MissingCodec))
    }
}

impl<T> Cacheable for T
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn encode_unregistered(&self) -> Result<Vec<u8>, SerializationError> {
        <JsonCodec as Codec<T>>::encode(&JsonCodec, self)
    }

    fn decode_unregistered(bytes: &[u8]) -> Result<Self, SerializationError> {
        <JsonCodec as Codec<T>>::decode(&JsonCodec, bytes)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("no codec is registered for this type")]
struct MissingCodec;

/// Converts values of type `T` to and from bytes.
///
/// Register an implementation with
/// [`HybridCacheBuilder::serializer`](crate::HybridCacheBuilder::serializer) to override
/// the default JSON encoding for one type, or to cache a type that has no serde support.
///
/// # Examples
///
/// ```
/// use stratum::{Cacheable, Codec, HybridCache};
/// use stratum_tier::SerializationError;
///
/// #[derive(Clone)]
/// struct Celsius(f32);
///
/// impl Cacheable for Celsius {}
///
/// struct CelsiusCodec;
///
/// impl Codec<Celsius> for CelsiusCodec {
///     fn encode(&self, value: &Celsius) -> Result<Vec<u8>, SerializationError> {
///         Ok(value.0.to_le_bytes().to_vec())
///     }
///
///     fn decode(&self, bytes: &[u8]) -> Result<Celsius, SerializationError> {
///         let raw = bytes.try_into().map_err(SerializationError::decode::<Celsius>)?;
///         Ok(Celsius(f32::from_le_bytes(raw)))
///     }
/// }
///
/// let _cache = HybridCache::builder()
///     .serializer::<Celsius, _>(CelsiusCodec)
///     .build();
/// ```
pub trait Codec<T>: Send + Sync + 'static {
    /// Encodes `value`.
    ///
    /// # Errors
    ///
    /// Returns a [`SerializationError`] if the value cannot be represented.
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    /// Decodes a value previously produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns a [`SerializationError`] if the bytes are not a valid encoding.
    fn decode(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// The default codec: JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(SerializationError::encode::<T>)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(SerializationError::decode::<T>)
    }
}

/// Stores strings as their raw UTF-8 bytes instead of quoted JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn encode(&self, value: &String) -> Result<Vec<u8>, SerializationError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, SerializationError> {
        String::from_utf8(bytes.to_vec()).map_err(SerializationError::decode::<String>)
    }
}

/// Maps a value type to the codec used for it.
///
/// Types without a registered codec fall back to [`Cacheable`]'s own encoding, which is
/// [`JsonCodec`] for serde types.
#[derive(Default, Clone)]
pub struct SerializerRegistry {
    // Each value is an `Arc<dyn Codec<T>>` for the `T` named by its key.
    codecs: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("registered", &self.codecs.len())
            .finish()
    }
}

impl SerializerRegistry {
    /// Creates a registry with no custom codecs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `codec` for values of type `T`, replacing any codec registered before.
    pub fn register<T, C>(&mut self, codec: C) -> &mut Self
    where
        T: 'static,
        C: Codec<T>,
    {
        let codec: Arc<dyn Codec<T>> = Arc::new(codec);
        self.codecs.insert(TypeId::of::<T>(), Arc::new(codec));
        self
    }

    /// Returns `true` if a custom codec is registered for `T`.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.codecs.contains_key(&TypeId::of::<T>())
    }

    /// Encodes `value` with the codec registered for `T`, or its fallback encoding.
    ///
    /// # Errors
    ///
    /// Returns the codec's [`SerializationError`], or one naming `T` when `T` has neither a
    /// codec nor a fallback encoding.
    pub fn encode<T>(&self, value: &T) -> Result<Bytes, SerializationError>
    where
        T: Cacheable,
    {
        let bytes = match self.codec::<T>() {
            Some(codec) => codec.encode(value)?,
            None => value.encode_unregistered()?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decodes a `T` with the codec registered for it, or its fallback encoding.
    ///
    /// # Errors
    ///
    /// As [`encode`](Self::encode).
    pub fn decode<T>(&self, bytes: &[u8]) -> Result<T, SerializationError>
    where
        T: Cacheable,
    {
        match self.codec::<T>() {
            Some(codec) => codec.decode(bytes),
            None => T::decode_unregistered(bytes),
        }
    }

    fn codec<T: 'static>(&self) -> Option<&Arc<dyn Codec<T>>> {
        self.codecs
            .get(&TypeId::of::<T>())
            .and_then(|codec| codec.downcast_ref::<Arc<dyn Codec<T>>>())
    }
}
