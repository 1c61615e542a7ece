//! Reference-counted resources transferred out of band from the shapes that
//! use them.
//!
//! A resource (currently meshes; materials are reserved) is large, stateful
//! and shared: many shapes may instance one mesh. Resources transfer
//! incrementally - `create`, component chunks, `finalise` - with progress
//! recorded in a plain [`TransferProgress`] record the caller advances in a
//! loop, so transfer amortises across frames under a byte budget without
//! any coroutine machinery.

use sceneframe_proto::{PacketWriter, ProtocolError};

/// Resumable progress through a resource transfer.
///
/// `phase` holds the mesh message id of the component currently streaming,
/// zero before the first call. `progress` counts elements already sent
/// within that phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    /// Current transfer phase; zero before the transfer starts.
    pub phase: u16,
    /// Elements completed within the current phase.
    pub progress: u32,
    /// Set once the finalise message has been written.
    pub complete: bool,
    /// Set when the transfer cannot continue.
    pub failed: bool,
}

impl TransferProgress {
    /// Reset to the initial state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A transferable, reference-counted resource.
///
/// Implementations must be shareable across producer threads; the registry
/// holds them behind `Arc`.
pub trait Resource: Send + Sync + std::fmt::Debug {
    /// Resource id, unique within [`Resource::type_id`].
    fn id(&self) -> u32;

    /// Routing id of the handler consuming this resource.
    fn type_id(&self) -> u16;

    /// Combined registry key.
    fn key(&self) -> u64 {
        (u64::from(self.type_id()) << 32) | u64::from(self.id())
    }

    /// Write the creation message for this resource.
    fn write_create(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError>;

    /// Write the destruction message for this resource.
    fn write_destroy(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError>;

    /// Write the next transfer packet, advancing `progress`.
    ///
    /// Each call emits one packet of the current phase bounded by
    /// `byte_limit` (zero = unbounded) and the packet capacity. When every
    /// phase is exhausted the implementation writes its finalise message and
    /// sets `progress.complete`.
    fn transfer(
        &self,
        packet: &mut PacketWriter<'_>,
        byte_limit: u32,
        progress: &mut TransferProgress,
    ) -> Result<(), ProtocolError>;
}

/// Elements of `element_size` bytes that fit a transfer packet under
/// `byte_limit`, accounting for `overhead` bytes of message prefix and the
/// packet ceiling. Always at least one.
#[must_use]
pub fn estimate_transfer_count(element_size: usize, byte_limit: u32, overhead: usize) -> u16 {
    let ceiling = (0xFFFF - (sceneframe_proto::PacketHeader::SIZE + overhead + 2)) / element_size;
    let count = if byte_limit > 0 {
        (byte_limit as usize / element_size).min(ceiling)
    } else {
        ceiling
    };
    count.max(1) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_respects_budget_and_ceiling() {
        // 12-byte vertices under a 1024 byte budget.
        assert_eq!(estimate_transfer_count(12, 1024, 16), 85);
        // Unbounded budget clamps to the packet ceiling.
        let unbounded = estimate_transfer_count(12, 0, 16);
        assert!(usize::from(unbounded) * 12 <= 0xFFFF);
        // Oversized elements still move one element per packet.
        assert_eq!(estimate_transfer_count(0x2_0000, 64, 16), 1);
    }
}
