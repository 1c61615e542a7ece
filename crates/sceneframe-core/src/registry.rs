//! Per-connection resource registry: reference counts and the transfer
//! queue.
//!
//! The first reference to a resource enqueues it for transfer; releasing
//! the last reference removes it and reports it for a destroy emission.
//! [`ResourceRegistry::update_transfers`] drains the queue under a byte
//! budget, with partial progress surviving to the next call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use sceneframe_proto::PacketWriter;

use crate::errors::Result;
use crate::resource::{Resource, TransferProgress};

/// Per-packet payload ceiling for resource transfer.
const TRANSFER_PACKET_CEILING: u32 = 0xFFFE;

struct Entry {
    resource: Arc<dyn Resource>,
    references: usize,
    progress: TransferProgress,
    started: bool,
}

/// Reference-counted resources pending or completing transfer on one
/// connection.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: HashMap<u64, Entry>,
    queue: VecDeque<u64>,
    scratch: Vec<u8>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resources still queued for transfer.
    #[must_use]
    pub fn pending_transfers(&self) -> usize {
        self.queue.len()
    }

    /// Add a reference to `resource`. The 0 to 1 transition queues it for
    /// transfer. Returns the reference count after the addition.
    pub fn reference(&mut self, resource: &Arc<dyn Resource>) -> usize {
        let key = resource.key();
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            resource: Arc::clone(resource),
            references: 0,
            progress: TransferProgress::default(),
            started: false,
        });
        entry.references += 1;
        if entry.references == 1 {
            self.queue.push_back(key);
            tracing::debug!(key = format_args!("{key:#018x}"), "resource queued for transfer");
        }
        entry.references
    }

    /// Release a reference to `resource`. On the 1 to 0 transition the
    /// entry is removed and the resource returned so the caller can emit
    /// its destroy message. Returns the remaining count.
    pub fn release(&mut self, resource: &Arc<dyn Resource>) -> (usize, Option<Arc<dyn Resource>>) {
        let key = resource.key();
        let Some(entry) = self.entries.get_mut(&key) else {
            tracing::warn!(
                key = format_args!("{key:#018x}"),
                "release of unknown resource ignored"
            );
            return (0, None);
        };
        entry.references -= 1;
        if entry.references > 0 {
            return (entry.references, None);
        }
        let removed = self.entries.remove(&key).map(|entry| entry.resource);
        self.queue.retain(|&queued| queued != key);
        (0, removed)
    }

    /// Drop every entry and queued transfer.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
    }

    /// Progress queued transfers, sending each produced packet through
    /// `send`. A zero `byte_limit` transfers everything now; otherwise the
    /// call stops once the budget is spent, leaving progress for the next
    /// call. Returns bytes sent.
    pub fn update_transfers(
        &mut self,
        byte_limit: u32,
        send: &mut dyn FnMut(&[u8]) -> Result<usize>,
    ) -> Result<usize> {
        let packet_limit = if byte_limit == 0 {
            0
        } else {
            byte_limit.min(TRANSFER_PACKET_CEILING)
        };
        if self.scratch.len() < 0xFFFF {
            self.scratch.resize(0xFFFF, 0);
        }
        let mut sent = 0usize;

        while let Some(&key) = self.queue.front() {
            let Some(entry) = self.entries.get_mut(&key) else {
                self.queue.pop_front();
                continue;
            };

            if !entry.started {
                let mut packet = PacketWriter::new(&mut self.scratch, 0, 0)?;
                entry.resource.write_create(&mut packet)?;
                packet.finalise()?;
                sent += send(packet.data())?;
                entry.started = true;
            }

            while !entry.progress.complete {
                let mut packet = PacketWriter::new(&mut self.scratch, 0, 0)?;
                entry.resource.transfer(&mut packet, packet_limit, &mut entry.progress)?;
                packet.finalise()?;
                sent += send(packet.data())?;
                if byte_limit != 0 && sent >= byte_limit as usize {
                    break;
                }
            }

            if entry.progress.complete {
                self.queue.pop_front();
            }
            if byte_limit != 0 && sent >= byte_limit as usize {
                break;
            }
        }
        Ok(sent)
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("entries", &self.entries.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_resource::MeshResource;
    use sceneframe_proto::{DataBuffer, DrawType, MeshMessageId, PacketReader, RoutingId};

    fn mesh(id: u32) -> Arc<dyn Resource> {
        Arc::new(MeshResource::new(
            id,
            DrawType::Triangles,
            DataBuffer::new(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 3),
        ))
    }

    fn collect_message_ids(registry: &mut ResourceRegistry, byte_limit: u32) -> Vec<u16> {
        let mut ids = Vec::new();
        registry
            .update_transfers(byte_limit, &mut |bytes| {
                let reader = PacketReader::new(bytes).unwrap();
                assert_eq!(reader.routing_id(), RoutingId::Mesh.to_u16());
                ids.push(reader.message_id());
                Ok(bytes.len())
            })
            .unwrap();
        ids
    }

    #[test]
    fn reference_counting_single_transfer_single_destroy() {
        let mut registry = ResourceRegistry::new();
        let resource = mesh(10);

        assert_eq!(registry.reference(&resource), 1);
        assert_eq!(registry.reference(&resource), 2);
        assert_eq!(registry.pending_transfers(), 1);

        // The pump visits the resource exactly once.
        let ids = collect_message_ids(&mut registry, 0);
        assert_eq!(ids.first(), Some(&MeshMessageId::Create.to_u16()));
        assert_eq!(ids.last(), Some(&MeshMessageId::Finalise.to_u16()));
        assert!(collect_message_ids(&mut registry, 0).is_empty());

        // First release: no destroy. Second: destroy exactly once.
        let (count, destroy) = registry.release(&resource);
        assert_eq!(count, 1);
        assert!(destroy.is_none());
        let (count, destroy) = registry.release(&resource);
        assert_eq!(count, 0);
        assert!(destroy.is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn release_before_transfer_cancels_queue() {
        let mut registry = ResourceRegistry::new();
        let resource = mesh(4);
        registry.reference(&resource);
        registry.release(&resource);
        assert_eq!(registry.pending_transfers(), 0);
        assert!(collect_message_ids(&mut registry, 0).is_empty());
    }

    #[test]
    fn budget_splits_transfer_across_calls() {
        let vertices: Vec<f32> = (0..3000).map(|i| i as f32).collect();
        let resource: Arc<dyn Resource> = Arc::new(MeshResource::new(
            2,
            DrawType::Points,
            DataBuffer::new(vertices, 3),
        ));
        let mut registry = ResourceRegistry::new();
        registry.reference(&resource);

        // 1000 vertices at 12 bytes: a 2048-byte budget cannot finish.
        let first = collect_message_ids(&mut registry, 2048);
        assert!(!first.is_empty());
        assert_eq!(registry.pending_transfers(), 1);

        // Unbounded follow-up completes with a finalise.
        let rest = collect_message_ids(&mut registry, 0);
        assert_eq!(rest.last(), Some(&MeshMessageId::Finalise.to_u16()));
        assert_eq!(registry.pending_transfers(), 0);
    }

    #[test]
    fn unknown_release_is_ignored() {
        let mut registry = ResourceRegistry::new();
        let (count, destroy) = registry.release(&mesh(99));
        assert_eq!(count, 0);
        assert!(destroy.is_none());
    }
}
