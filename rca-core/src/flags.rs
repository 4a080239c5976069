//! Packet header flags.

use bitflags::bitflags;

bitflags! {
    /// Bit set carried in every [`PacketHeader`](crate::PacketHeader).
    ///
    /// Unknown bits are preserved on decode so newer peers can add flags
    /// without breaking older ones.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u16 {
        /// One or more binary attachments follow the JSON body.
        const HAS_ATTACHMENTS = 0x0001;
    }
}
