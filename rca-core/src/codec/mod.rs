//! `tokio_util` framing for [`Packet`].

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::RcaError;
use crate::packet::Packet;

/// Stateless packet codec for [`Framed`](tokio_util::codec::Framed) streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct RcaCodec;

impl Decoder for RcaCodec {
    type Item = Packet;
    type Error = RcaError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match Packet::peek_len(src)? {
            Some(len) => {
                let frame = src.split_to(len).freeze();
                Packet::from_bytes(frame).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Packet> for RcaCodec {
    type Error = RcaError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst)
    }
}
