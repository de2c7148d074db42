//! Length-capped collections for wire payloads.
//!
//! Decoding enforces the cap while elements stream in, so a hostile
//! length prefix never commits more than `N` elements of memory. The
//! per-message caps themselves live in `super::types`.

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Vector holding at most `N` elements, checked at construction and at
/// deserialization. The inner vector is private; every path in goes
/// through the cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedVec<T, const N: usize> {
    items: Vec<T>,
}

impl<T, const N: usize> BoundedVec<T, N> {
    /// Wrap `items`, or None when over the cap.
    pub fn new(items: Vec<T>) -> Option<Self> {
        (items.len() <= N).then_some(Self { items })
    }

    /// Wrap without checking; caller guarantees `items.len() <= N`.
    #[inline]
    pub fn new_unchecked(items: Vec<T>) -> Self {
        debug_assert!(items.len() <= N);
        Self { items }
    }

    /// Keeps the first N elements, dropping the rest.
    pub fn truncated(mut items: Vec<T>) -> Self {
        items.truncate(N);
        Self { items }
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T, const N: usize> std::ops::Deref for BoundedVec<T, N> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl<T: Serialize, const N: usize> Serialize for BoundedVec<T, N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}

impl<'de, T: Deserialize<'de>, const N: usize> Deserialize<'de> for BoundedVec<T, N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CappedSeq<T, const N: usize>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>, const N: usize> Visitor<'de> for CappedSeq<T, N> {
            type Value = Vec<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "at most {} sequence elements", N)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                // Never reserve past the cap, whatever the prefix claims.
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(N));
                while let Some(item) = seq.next_element::<T>()? {
                    if items.len() == N {
                        return Err(de::Error::custom(format_args!(
                            "sequence exceeds cap of {} elements",
                            N
                        )));
                    }
                    items.push(item);
                }
                Ok(items)
            }
        }

        deserializer
            .deserialize_seq(CappedSeq::<T, N>(PhantomData))
            .map(|items| Self { items })
    }
}

/// Deserialize with postcard and buffer size validation
pub fn from_bytes<'de, T: Deserialize<'de>>(data: &'de [u8]) -> Result<T, postcard::Error> {
    postcard::from_bytes(data)
}

/// Serialize with postcard
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_vec_within_limit() {
        let data = vec![1u32, 2, 3];
        let bounded: BoundedVec<u32, 10> = BoundedVec::new(data.clone()).unwrap();
        assert_eq!(bounded.len(), 3);
        assert_eq!(bounded.into_inner(), data);
    }

    #[test]
    fn bounded_vec_exceeds_limit() {
        let data: Vec<u32> = (0..11).collect();
        assert!(BoundedVec::<u32, 10>::new(data.clone()).is_none());
        assert_eq!(BoundedVec::<u32, 10>::truncated(data).len(), 10);
    }

    #[test]
    fn bounded_vec_deserialize_ok() {
        let original: Vec<u8> = vec![1, 2, 3];
        let serialized = to_bytes(&original).unwrap();
        let bounded: BoundedVec<u8, 100> = from_bytes(&serialized).unwrap();
        assert_eq!(bounded.as_slice(), original.as_slice());
    }

    #[test]
    fn bounded_vec_deserialize_exceeds() {
        let original: Vec<u8> = vec![1, 2, 3, 4, 5];
        let serialized = to_bytes(&original).unwrap();
        let result: Result<BoundedVec<u8, 3>, _> = from_bytes(&serialized);
        assert!(result.is_err());
    }

    #[test]
    fn bounded_vec_roundtrips_as_plain_seq() {
        // Wire form is indistinguishable from a plain vector.
        let bounded: BoundedVec<u16, 8> = BoundedVec::new(vec![10, 20, 30]).unwrap();
        let bytes = to_bytes(&bounded).unwrap();
        assert_eq!(bytes, to_bytes(&vec![10u16, 20, 30]).unwrap());
        let back: BoundedVec<u16, 8> = from_bytes(&bytes).unwrap();
        assert_eq!(back, bounded);
    }
}
