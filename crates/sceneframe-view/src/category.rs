//! Category handler: the labelled visibility tree.
//!
//! Categories are additive on the wire (there is no destroy) and form a
//! forest rooted at id zero. A category is effectively active only when it
//! and every ancestor is active. Creates that would introduce a parent
//! cycle are rejected; visibility queries additionally treat a revisited
//! id as inactive so they terminate even on corrupted state.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use sceneframe_core::Connection;
use sceneframe_proto::{
    CategoryId, CategoryNameMessage, PacketReader, PacketWriter, RoutingId,
};

use crate::errors::{Result, ViewError};
use crate::handler::{FrameStamp, MessageHandler};

/// One category definition plus its runtime active state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryInfo {
    /// Category id.
    pub id: u16,
    /// Parent category id; zero for roots.
    pub parent_id: u16,
    /// Display name.
    pub name: String,
    /// Whether the category starts active.
    pub default_active: bool,
    /// Current active state (viewer-toggled).
    pub active: bool,
}

/// Handler for [`RoutingId::Category`] messages.
#[derive(Default)]
pub struct CategoryHandler {
    categories: Mutex<HashMap<u16, CategoryInfo>>,
}

impl CategoryHandler {
    /// Create an empty category handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a category definition.
    #[must_use]
    pub fn category(&self, id: u16) -> Option<CategoryInfo> {
        self.categories.lock().ok()?.get(&id).cloned()
    }

    /// Toggle a category's active state. Returns false for unknown ids.
    pub fn set_active(&self, id: u16, active: bool) -> bool {
        let Ok(mut categories) = self.categories.lock() else {
            return false;
        };
        match categories.get_mut(&id) {
            Some(info) => {
                info.active = active;
                true
            }
            None => false,
        }
    }

    /// Whether `id` is effectively active: it and every ancestor up to the
    /// root must be active. Unknown ids are active (uncategorised shapes
    /// always draw); a broken parent link terminates the walk as a root.
    #[must_use]
    pub fn is_active(&self, id: u16) -> bool {
        let Ok(categories) = self.categories.lock() else {
            return true;
        };
        let mut visited = HashSet::new();
        let mut at = id;
        loop {
            if !visited.insert(at) {
                // Cycle in the parent chain: fail closed.
                return false;
            }
            let Some(info) = categories.get(&at) else {
                return true;
            };
            if !info.active {
                return false;
            }
            if at == 0 || info.parent_id == at {
                return true;
            }
            at = info.parent_id;
        }
    }

    /// Whether inserting `id` with `parent_id` would close a parent cycle.
    fn creates_cycle(categories: &HashMap<u16, CategoryInfo>, id: u16, parent_id: u16) -> bool {
        if id == 0 || parent_id == 0 {
            return false;
        }
        let mut at = parent_id;
        let mut visited = HashSet::new();
        while at != 0 {
            if at == id {
                return true;
            }
            if !visited.insert(at) {
                return true;
            }
            match categories.get(&at) {
                Some(info) => at = info.parent_id,
                None => return false,
            }
        }
        false
    }
}

impl MessageHandler for CategoryHandler {
    fn routing_id(&self) -> u16 {
        RoutingId::Category.to_u16()
    }

    fn name(&self) -> &'static str {
        "category"
    }

    fn reset(&self) {
        if let Ok(mut categories) = self.categories.lock() {
            categories.clear();
        }
    }

    fn read_message(&self, packet: &mut PacketReader<'_>) -> Result<()> {
        if packet.message_id() != CategoryId::Name as u16 {
            tracing::warn!(message_id = packet.message_id(), "unknown category message skipped");
            return Ok(());
        }
        let message = CategoryNameMessage::read(packet)?;
        let mut categories = self.categories.lock().map_err(|_| ViewError::Poisoned)?;

        if Self::creates_cycle(&categories, message.category_id, message.parent_id) {
            return Err(ViewError::CategoryCycle { category_id: message.category_id });
        }

        // Preserve a viewer's active toggle across redefinition.
        let active = categories
            .get(&message.category_id)
            .map(|existing| existing.active)
            .unwrap_or(message.default_active);
        categories.insert(
            message.category_id,
            CategoryInfo {
                id: message.category_id,
                parent_id: message.parent_id,
                name: message.name,
                default_active: message.default_active,
                active,
            },
        );
        Ok(())
    }

    fn end_frame(&self, _stamp: &FrameStamp, _flush: bool) {
        // Categories are additive and apply immediately.
    }

    fn prepare_frame(&self, _stamp: &FrameStamp) {}

    fn serialise(&self, out: &dyn Connection) -> Result<()> {
        let mut entries: Vec<CategoryInfo> = self
            .categories
            .lock()
            .map(|categories| categories.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|info| info.id);

        let mut scratch = vec![0u8; 0xFFFF];
        for info in entries {
            let mut packet = PacketWriter::new(
                &mut scratch,
                self.routing_id(),
                CategoryId::Name as u16,
            )?;
            CategoryNameMessage {
                category_id: info.id,
                parent_id: info.parent_id,
                default_active: info.default_active,
                name: info.name,
            }
            .write(&mut packet)?;
            packet.finalise()?;
            out.send(packet.data(), true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(handler: &CategoryHandler, id: u16, parent: u16, active: bool, name: &str) -> Result<()> {
        let mut scratch = vec![0u8; 1024];
        let mut packet = PacketWriter::new(
            &mut scratch,
            RoutingId::Category.to_u16(),
            CategoryId::Name as u16,
        )
        .unwrap();
        CategoryNameMessage {
            category_id: id,
            parent_id: parent,
            default_active: active,
            name: name.to_string(),
        }
        .write(&mut packet)
        .unwrap();
        packet.finalise().unwrap();
        let bytes = packet.data().to_vec();
        let mut reader = PacketReader::new(&bytes).unwrap();
        handler.read_message(&mut reader)
    }

    #[test]
    fn effective_visibility_ascends_ancestors() {
        let handler = CategoryHandler::new();
        feed(&handler, 1, 0, true, "physics").unwrap();
        feed(&handler, 2, 1, true, "contacts").unwrap();
        assert!(handler.is_active(2));

        handler.set_active(1, false);
        assert!(!handler.is_active(2));
        assert!(handler.is_active(3), "unknown categories draw");
    }

    #[test]
    fn inactive_default_applies() {
        let handler = CategoryHandler::new();
        feed(&handler, 4, 0, false, "verbose").unwrap();
        assert!(!handler.is_active(4));
    }

    #[test]
    fn cycle_creation_rejected() {
        let handler = CategoryHandler::new();
        feed(&handler, 1, 0, true, "a").unwrap();
        feed(&handler, 2, 1, true, "b").unwrap();
        // Reparenting 1 under 2 closes a cycle.
        let result = feed(&handler, 1, 2, true, "a");
        assert!(matches!(result, Err(ViewError::CategoryCycle { category_id: 1 })));
        // The original definition survives and queries terminate.
        assert!(handler.is_active(2));
    }

    #[test]
    fn serialise_round_trip() {
        let handler = CategoryHandler::new();
        feed(&handler, 1, 0, true, "root").unwrap();
        feed(&handler, 5, 1, false, "leaf").unwrap();

        let sink = sceneframe_core::CollatedConnection::new(false);
        handler.serialise(&sink).unwrap();
        let outer = sink.finalise().unwrap();

        let replay = CategoryHandler::new();
        let mut decoder = sceneframe_proto::CollatedPacketDecoder::new();
        decoder.set_packet(&outer).unwrap();
        while let Some(packet) = decoder.next_packet().unwrap() {
            let mut reader = PacketReader::new(&packet).unwrap();
            replay.read_message(&mut reader).unwrap();
        }
        assert_eq!(replay.category(5), handler.category(5));
    }
}
