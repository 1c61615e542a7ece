//! The generic shape handler: object lifecycle with deferred frame commit.
//!
//! One instance serves each shape routing id. Messages append to a pending
//! queue; a frame boundary applies the queue in insertion order - destroys,
//! updates, then create promotion - and drops expired transients. The
//! renderer observes only the view published by `prepare_frame`, so the
//! data thread can run arbitrarily far ahead of drawing.

use std::collections::HashMap;
use std::sync::Mutex;

use sceneframe_core::Connection;
use sceneframe_core::shapes::apply_update;
use sceneframe_proto::{
    CreateMessage, DataMessage, DestroyMessage, ObjectAttributes, ObjectId, PacketReader,
    PacketWriter, UpdateMessage, object_flag,
};

use crate::errors::Result;
use crate::handler::{FrameStamp, MessageHandler};

/// A decoded shape as held by the viewer.
///
/// The shape-specific payload rides along as raw bytes: the renderer works
/// from the attribute set, and the bytes replay verbatim when the handler
/// serialises its state for a late joiner.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShapeRecord {
    /// Shape id; zero for transients.
    pub id: u32,
    /// Visibility category.
    pub category: u16,
    /// [`object_flag`] values from creation.
    pub flags: u16,
    /// Transform and colour.
    pub attributes: ObjectAttributes,
    /// Shape-specific creation payload following the attributes.
    pub payload: Vec<u8>,
    /// Payloads of data messages received for this shape, in order.
    pub data: Vec<Vec<u8>>,
}

enum PendingOp {
    Create(ShapeRecord),
    Update { id: u32, flags: u16, attributes: ObjectAttributes },
    Destroy { id: u32 },
    Data { id: u32, payload: Vec<u8> },
}

#[derive(Default)]
struct State {
    pending: Vec<PendingOp>,
    persistent: HashMap<u32, ShapeRecord>,
    transient: Vec<ShapeRecord>,
    staged_view: Option<Vec<ShapeRecord>>,
}

/// Message handler for one shape routing id.
pub struct ShapeHandler {
    routing_id: u16,
    name: &'static str,
    state: Mutex<State>,
    visible: Mutex<Vec<ShapeRecord>>,
}

impl ShapeHandler {
    /// Create a handler for `routing_id`, e.g.
    /// `ShapeHandler::new(RoutingId::Sphere.to_u16(), "sphere")`.
    #[must_use]
    pub fn new(routing_id: u16, name: &'static str) -> Self {
        Self {
            routing_id,
            name,
            state: Mutex::new(State::default()),
            visible: Mutex::new(Vec::new()),
        }
    }

    /// The shapes visible to the renderer as of the last prepared frame.
    #[must_use]
    pub fn shapes(&self) -> Vec<ShapeRecord> {
        self.visible.lock().map(|visible| visible.clone()).unwrap_or_default()
    }

    /// Committed persistent shape by id (data-thread view).
    #[must_use]
    pub fn shape(&self, id: u32) -> Option<ShapeRecord> {
        self.state.lock().ok()?.persistent.get(&id).cloned()
    }

    fn apply(state: &mut State, op: PendingOp) {
        match op {
            PendingOp::Create(record) => {
                if record.id == 0 {
                    state.transient.push(record);
                    return;
                }
                if state.persistent.contains_key(&record.id)
                    && record.flags & object_flag::REPLACE == 0
                {
                    tracing::warn!(id = record.id, "duplicate shape create ignored");
                    return;
                }
                state.persistent.insert(record.id, record);
            }
            PendingOp::Update { id, flags, attributes } => {
                let Some(record) = state.persistent.get_mut(&id) else {
                    tracing::warn!(id, "update for unknown shape ignored");
                    return;
                };
                apply_update(&mut record.attributes, flags, &attributes);
            }
            PendingOp::Destroy { id } => {
                if state.persistent.remove(&id).is_none() {
                    tracing::warn!(id, "destroy for unknown shape ignored");
                }
            }
            PendingOp::Data { id, payload } => {
                if let Some(record) = state.persistent.get_mut(&id) {
                    record.data.push(payload);
                } else if let Some(record) =
                    state.transient.iter_mut().rev().find(|record| record.id == id)
                {
                    record.data.push(payload);
                } else {
                    tracing::warn!(id, "data for unknown shape ignored");
                }
            }
        }
    }
}

impl MessageHandler for ShapeHandler {
    fn routing_id(&self) -> u16 {
        self.routing_id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = State::default();
        }
        if let Ok(mut visible) = self.visible.lock() {
            visible.clear();
        }
    }

    fn read_message(&self, packet: &mut PacketReader<'_>) -> Result<()> {
        let op = match ObjectId::from_u16(packet.message_id()) {
            Some(ObjectId::Create) => {
                let (message, attributes) = CreateMessage::read(packet)?;
                let payload = packet.payload()[usize::from(packet.tell())..].to_vec();
                PendingOp::Create(ShapeRecord {
                    id: message.id,
                    category: message.category,
                    flags: message.flags,
                    attributes,
                    payload,
                    data: Vec::new(),
                })
            }
            Some(ObjectId::Update) => {
                let (message, attributes) = UpdateMessage::read(packet)?;
                PendingOp::Update { id: message.id, flags: message.flags, attributes }
            }
            Some(ObjectId::Destroy) => {
                let message = DestroyMessage::read(packet)?;
                PendingOp::Destroy { id: message.id }
            }
            Some(ObjectId::Data) => {
                let message = DataMessage::read(packet)?;
                let payload = packet.payload()[usize::from(packet.tell())..].to_vec();
                PendingOp::Data { id: message.id, payload }
            }
            _ => {
                tracing::warn!(
                    routing_id = self.routing_id,
                    message_id = packet.message_id(),
                    "unknown shape message id skipped"
                );
                return Ok(());
            }
        };

        if let Ok(mut state) = self.state.lock() {
            state.pending.push(op);
        }
        Ok(())
    }

    fn end_frame(&self, _stamp: &FrameStamp, flush: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if flush {
            state.transient.clear();
        }
        let pending = std::mem::take(&mut state.pending);
        for op in pending {
            Self::apply(&mut state, op);
        }

        let mut view: Vec<ShapeRecord> = state.persistent.values().cloned().collect();
        view.sort_by_key(|record| record.id);
        view.extend(state.transient.iter().cloned());
        state.staged_view = Some(view);
    }

    fn prepare_frame(&self, _stamp: &FrameStamp) {
        let staged = self.state.lock().ok().and_then(|mut state| state.staged_view.take());
        if let (Some(staged), Ok(mut visible)) = (staged, self.visible.lock()) {
            *visible = staged;
        }
    }

    fn serialise(&self, out: &dyn Connection) -> Result<()> {
        let records: Vec<ShapeRecord> = self
            .state
            .lock()
            .map(|state| {
                let mut records: Vec<_> = state.persistent.values().cloned().collect();
                records.sort_by_key(|record| record.id);
                records
            })
            .unwrap_or_default();

        let mut scratch = vec![0u8; 0xFFFF];
        for record in records {
            let mut packet =
                PacketWriter::new(&mut scratch, self.routing_id, ObjectId::Create.to_u16())?;
            CreateMessage {
                id: record.id,
                category: record.category,
                flags: record.flags,
                reserved: 0,
            }
            .write(&mut packet, &record.attributes)?;
            if packet.write_raw(&record.payload) != record.payload.len() {
                tracing::warn!(id = record.id, "shape payload too large to serialise");
                continue;
            }
            packet.finalise()?;
            out.send(packet.data(), true)?;

            for data in &record.data {
                let mut packet =
                    PacketWriter::new(&mut scratch, self.routing_id, ObjectId::Data.to_u16())?;
                if packet.write_raw(data) != data.len() {
                    tracing::warn!(id = record.id, "shape data too large to serialise");
                    continue;
                }
                packet.finalise()?;
                out.send(packet.data(), true)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use sceneframe_core::shapes::{Shape as _, Sphere};
    use sceneframe_proto::{RoutingId, update_flag};

    proptest! {
        /// Applying an update in update mode only ever changes the flagged
        /// sub-fields, whatever the flag combination.
        #[test]
        fn update_mode_is_exactly_selective(selector in 0u16..16) {
            let flags = update_flag::UPDATE_MODE
                | if selector & 1 != 0 { update_flag::POSITION } else { 0 }
                | if selector & 2 != 0 { update_flag::ROTATION } else { 0 }
                | if selector & 4 != 0 { update_flag::SCALE } else { 0 }
                | if selector & 8 != 0 { update_flag::COLOUR } else { 0 };

            let base = ObjectAttributes::identity();
            let incoming = ObjectAttributes {
                colour: 0x0102_0304,
                position: [9.0, 9.0, 9.0],
                rotation: [1.0, 0.0, 0.0, 0.0],
                scale: [3.0, 3.0, 3.0],
            };
            let mut applied = base;
            apply_update(&mut applied, flags, &incoming);

            let expect = |on: bool, new: [f64; 3], old: [f64; 3]| if on { new } else { old };
            prop_assert_eq!(
                applied.position,
                expect(selector & 1 != 0, incoming.position, base.position)
            );
            prop_assert_eq!(
                applied.scale,
                expect(selector & 4 != 0, incoming.scale, base.scale)
            );
            prop_assert_eq!(
                applied.colour,
                if selector & 8 != 0 { incoming.colour } else { base.colour }
            );
        }
    }

    fn handler() -> ShapeHandler {
        ShapeHandler::new(RoutingId::Sphere.to_u16(), "sphere")
    }

    fn feed_create(handler: &ShapeHandler, id: u32, position: [f64; 3]) {
        let mut sphere = Sphere::new(id);
        sphere.core_mut().attributes.position = position;
        let mut scratch = vec![0u8; 512];
        let mut packet = PacketWriter::new(&mut scratch, 0, 0).unwrap();
        sphere.write_create(&mut packet).unwrap();
        packet.finalise().unwrap();
        let bytes = packet.data().to_vec();
        let mut reader = PacketReader::new(&bytes).unwrap();
        handler.read_message(&mut reader).unwrap();
    }

    fn commit(handler: &ShapeHandler, frame: u64, flush: bool) {
        let stamp = FrameStamp { frame_number: frame, render_mark: frame };
        handler.end_frame(&stamp, flush);
        handler.prepare_frame(&stamp);
    }

    #[test]
    fn pending_state_invisible_until_frame() {
        let handler = handler();
        feed_create(&handler, 1, [1.0, 2.0, 3.0]);
        assert!(handler.shapes().is_empty());

        commit(&handler, 1, true);
        let shapes = handler.shapes();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].attributes.position, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn transients_live_exactly_one_frame() {
        let handler = handler();
        feed_create(&handler, 0, [5.0, 0.0, 0.0]);
        commit(&handler, 1, true);
        assert_eq!(handler.shapes().len(), 1);

        // Next flushing frame with no new messages drops the transient.
        commit(&handler, 2, true);
        assert!(handler.shapes().is_empty());
    }

    #[test]
    fn persistent_frame_keeps_transients() {
        let handler = handler();
        feed_create(&handler, 0, [5.0, 0.0, 0.0]);
        commit(&handler, 1, true);
        commit(&handler, 2, false);
        assert_eq!(handler.shapes().len(), 1);
    }

    #[test]
    fn later_updates_override_earlier_within_a_frame() {
        let handler = handler();
        feed_create(&handler, 4, [0.0, 0.0, 0.0]);
        commit(&handler, 1, true);

        for x in [1.0, 2.0] {
            let message = UpdateMessage {
                id: 4,
                flags: update_flag::UPDATE_MODE | update_flag::POSITION,
            };
            let attributes =
                ObjectAttributes { position: [x, 0.0, 0.0], ..ObjectAttributes::identity() };
            let mut scratch = vec![0u8; 256];
            let mut packet = PacketWriter::new(
                &mut scratch,
                RoutingId::Sphere.to_u16(),
                ObjectId::Update.to_u16(),
            )
            .unwrap();
            message.write(&mut packet, &attributes).unwrap();
            packet.finalise().unwrap();
            let bytes = packet.data().to_vec();
            let mut reader = PacketReader::new(&bytes).unwrap();
            handler.read_message(&mut reader).unwrap();
        }

        commit(&handler, 2, true);
        assert_eq!(handler.shapes()[0].attributes.position, [2.0, 0.0, 0.0]);
        // Colour untouched by the position-only update.
        assert_eq!(handler.shapes()[0].attributes.colour, 0xFFFF_FFFF);
    }

    #[test]
    fn serialise_rebuilds_state() {
        let handler = handler();
        feed_create(&handler, 1, [1.0, 0.0, 0.0]);
        feed_create(&handler, 2, [2.0, 0.0, 0.0]);
        commit(&handler, 1, true);

        let sink = sceneframe_core::CollatedConnection::new(false);
        handler.serialise(&sink).unwrap();
        let outer = sink.finalise().unwrap();

        let replay = ShapeHandler::new(RoutingId::Sphere.to_u16(), "sphere");
        let mut decoder = sceneframe_proto::CollatedPacketDecoder::new();
        decoder.set_packet(&outer).unwrap();
        while let Some(packet) = decoder.next_packet().unwrap() {
            let mut reader = PacketReader::new(&packet).unwrap();
            replay.read_message(&mut reader).unwrap();
        }
        commit(&replay, 1, true);
        assert_eq!(replay.shapes(), handler.shapes());
    }
}
