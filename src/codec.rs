//! Length-prefixed frame encoding and decoding.
//!
//! A frame is a 4-byte length prefix followed by exactly that many payload
//! bytes. The prefix counts payload bytes only and is written in network
//! byte order; fixing the byte order (rather than leaving it host-native) is
//! a compatibility decision. The codec performs no I/O and holds no
//! connection state.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Width of the length prefix preceding each frame.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Maximum payload size accepted by the default codec (64 MiB).
///
/// Payload bounds passed to [`FrameCodec::new`] are clamped to at most this
/// value so a length prefix always fits the 4-byte header.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Error produced when a payload does not fit the wire format.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Payload length exceeds the configured maximum.
    #[error("payload of {size} bytes exceeds limit of {max}")]
    OversizedPayload {
        /// Offending payload length in bytes.
        size: usize,
        /// Maximum payload length the codec accepts.
        max: usize,
    },
}

/// Encoder and decoder for the `[length][payload]` wire format.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_payload: usize,
}

impl FrameCodec {
    /// Construct a codec accepting payloads up to `max_payload` bytes,
    /// clamped to [`MAX_MESSAGE_SIZE`].
    #[must_use]
    pub const fn new(max_payload: usize) -> Self {
        let max_payload = if max_payload > MAX_MESSAGE_SIZE {
            MAX_MESSAGE_SIZE
        } else {
            max_payload
        };
        Self { max_payload }
    }

    /// Return the maximum payload size accepted by this codec.
    #[must_use]
    pub const fn max_payload(&self) -> usize { self.max_payload }

    /// Append `prefix ++ payload` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::OversizedPayload`] without touching `dst` if the
    /// payload exceeds the configured maximum.
    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() > self.max_payload {
            return Err(FrameError::OversizedPayload {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        // The bound is clamped to MAX_MESSAGE_SIZE, so the length fits the prefix.
        let len = u32::try_from(payload.len()).map_err(|_| FrameError::OversizedPayload {
            size: payload.len(),
            max: self.max_payload,
        })?;
        dst.reserve(LENGTH_HEADER_SIZE + payload.len());
        dst.put_u32(len);
        dst.extend_from_slice(payload);
        Ok(())
    }

    /// Decode a length prefix read off the wire.
    ///
    /// The send side never produces a prefix above the maximum, so an
    /// oversized value here means a corrupt or hostile peer. It is rejected
    /// before any payload buffer is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::OversizedPayload`] if the prefix exceeds the
    /// configured maximum.
    pub fn decode_len(&self, header: [u8; LENGTH_HEADER_SIZE]) -> Result<usize, FrameError> {
        let len = u32::from_be_bytes(header);
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        if len > self.max_payload {
            tracing::debug!(len, max = self.max_payload, "rejecting oversized length prefix");
            return Err(FrameError::OversizedPayload {
                size: len,
                max: self.max_payload,
            });
        }
        Ok(len)
    }
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new(MAX_MESSAGE_SIZE) }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn round_trip(codec: &FrameCodec, payload: &[u8]) -> Vec<u8> {
        let mut dst = BytesMut::new();
        codec.encode(payload, &mut dst).expect("encode");
        let header: [u8; LENGTH_HEADER_SIZE] =
            dst[..LENGTH_HEADER_SIZE].try_into().expect("header");
        let len = codec.decode_len(header).expect("decode");
        assert_eq!(len, payload.len());
        dst[LENGTH_HEADER_SIZE..].to_vec()
    }

    #[rstest]
    #[case::empty(b"" as &[u8])]
    #[case::small(b"ping" as &[u8])]
    #[case::binary(&[0u8, 255, 1, 254, 0])]
    fn encodes_prefix_then_payload(#[case] payload: &[u8]) {
        let codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(payload, &mut dst).expect("encode");
        assert_eq!(dst.len(), LENGTH_HEADER_SIZE + payload.len());
        let expected = u32::try_from(payload.len()).expect("fits").to_be_bytes();
        assert_eq!(&dst[..LENGTH_HEADER_SIZE], &expected[..]);
        assert_eq!(&dst[LENGTH_HEADER_SIZE..], payload);
    }

    #[test]
    fn oversized_encode_leaves_destination_untouched() {
        let codec = FrameCodec::new(4);
        let mut dst = BytesMut::from(&b"seed"[..]);
        let err = codec.encode(b"hello", &mut dst).expect_err("must reject");
        assert_eq!(err, FrameError::OversizedPayload { size: 5, max: 4 });
        assert_eq!(&dst[..], b"seed");
    }

    #[test]
    fn oversized_prefix_rejected_on_decode() {
        let codec = FrameCodec::new(1024);
        let header = 4096u32.to_be_bytes();
        let err = codec.decode_len(header).expect_err("must reject");
        assert_eq!(
            err,
            FrameError::OversizedPayload {
                size: 4096,
                max: 1024
            }
        );
    }

    #[test]
    fn bound_is_clamped_to_the_wire_maximum() {
        let codec = FrameCodec::new(usize::MAX);
        assert_eq!(codec.max_payload(), MAX_MESSAGE_SIZE);
    }

    proptest! {
        #[test]
        fn round_trips_any_payload_within_bound(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let codec = FrameCodec::new(2048);
            prop_assert_eq!(round_trip(&codec, &payload), payload);
        }
    }
}
