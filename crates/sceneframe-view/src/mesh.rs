//! Mesh resource handler: accumulates chunked mesh transfers and promotes
//! finished meshes at frame boundaries.
//!
//! A mesh is not drawable until its finalise message arrives; a redefine
//! reopens the definition by cloning the accepted mesh into a fresh
//! pending copy. Promotion to the renderer-visible set happens on the next
//! frame commit, so a mesh mid-redefinition keeps drawing its previous
//! incarnation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sceneframe_core::{Colour, Connection, MeshResource, Resource as _, TransferProgress};
use sceneframe_proto::mesh::{self, MeshComponent, mesh_finalise_flag};
use sceneframe_proto::{
    DataBuffer, DrawType, ElementType, MeshCreateMessage, MeshDestroyMessage, MeshFinaliseMessage,
    MeshMessageId, ObjectAttributes, PacketReader, PacketWriter, RoutingId,
};

use crate::errors::{Result, ViewError};
use crate::handler::{FrameStamp, MessageHandler};

/// A fully accumulated mesh as exposed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    /// Resource id.
    pub mesh_id: u32,
    /// Declared vertex count from the create message.
    pub vertex_count: u32,
    /// Declared index count from the create message.
    pub index_count: u32,
    /// Topology.
    pub draw_type: DrawType,
    /// Mesh transform and tint.
    pub attributes: ObjectAttributes,
    /// Vertex positions.
    pub vertices: DataBuffer,
    /// Indices.
    pub indices: DataBuffer,
    /// Vertex colours.
    pub colours: DataBuffer,
    /// Normals (possibly calculated at finalise).
    pub normals: DataBuffer,
    /// UV coordinates.
    pub uvs: DataBuffer,
}

impl MeshData {
    fn new(create: &MeshCreateMessage, attributes: ObjectAttributes, draw_type: DrawType) -> Self {
        Self {
            mesh_id: create.mesh_id,
            vertex_count: create.vertex_count,
            index_count: create.index_count,
            draw_type,
            attributes,
            vertices: DataBuffer::empty(ElementType::Float32, 3),
            indices: DataBuffer::empty(ElementType::UInt32, 1),
            colours: DataBuffer::empty(ElementType::UInt32, 1),
            normals: DataBuffer::empty(ElementType::Float32, 3),
            uvs: DataBuffer::empty(ElementType::Float32, 2),
        }
    }

    fn stream_mut(&mut self, component: MeshComponent) -> &mut DataBuffer {
        match component {
            MeshComponent::Vertex => &mut self.vertices,
            MeshComponent::Index => &mut self.indices,
            MeshComponent::VertexColour => &mut self.colours,
            MeshComponent::Normal => &mut self.normals,
            MeshComponent::Uv => &mut self.uvs,
        }
    }
}

struct MeshEntry {
    pending: MeshData,
    ready: bool,
    current: Option<Arc<MeshData>>,
}

#[derive(Default)]
struct State {
    meshes: HashMap<u32, MeshEntry>,
    staged_view: Option<HashMap<u32, Arc<MeshData>>>,
}

/// Handler for [`RoutingId::Mesh`] messages.
#[derive(Default)]
pub struct MeshHandler {
    state: Mutex<State>,
    visible: Mutex<HashMap<u32, Arc<MeshData>>>,
}

impl MeshHandler {
    /// Create an empty mesh handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The drawable mesh with `mesh_id`, as of the last prepared frame.
    #[must_use]
    pub fn mesh(&self, mesh_id: u32) -> Option<Arc<MeshData>> {
        self.visible.lock().ok()?.get(&mesh_id).cloned()
    }

    /// All drawable meshes as of the last prepared frame.
    #[must_use]
    pub fn meshes(&self) -> Vec<Arc<MeshData>> {
        self.visible
            .lock()
            .map(|visible| visible.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl MessageHandler for MeshHandler {
    fn routing_id(&self) -> u16 {
        RoutingId::Mesh.to_u16()
    }

    fn name(&self) -> &'static str {
        "mesh"
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
        let message_id = MeshMessageId::from_u16(packet.message_id());
        let mut state = self.state.lock().map_err(|_| ViewError::Poisoned)?;

        match message_id {
            Some(MeshMessageId::Create) => {
                let (create, attributes) = MeshCreateMessage::read(packet)?;
                let draw_type = DrawType::from_u8(create.draw_type).unwrap_or_default();
                let entry = MeshEntry {
                    pending: MeshData::new(&create, attributes, draw_type),
                    ready: false,
                    current: None,
                };
                if state.meshes.insert(create.mesh_id, entry).is_some() {
                    tracing::warn!(mesh_id = create.mesh_id, "mesh create replaced existing mesh");
                }
            }
            Some(MeshMessageId::Redefine) => {
                let (create, attributes) = MeshCreateMessage::read(packet)?;
                let draw_type = DrawType::from_u8(create.draw_type).unwrap_or_default();
                match state.meshes.get_mut(&create.mesh_id) {
                    Some(entry) => {
                        // Clone the accepted mesh as the editing base and
                        // clear readiness until the next finalise.
                        let mut pending = entry
                            .current
                            .as_deref()
                            .cloned()
                            .unwrap_or_else(|| MeshData::new(&create, attributes, draw_type));
                        pending.vertex_count = create.vertex_count;
                        pending.index_count = create.index_count;
                        pending.draw_type = draw_type;
                        pending.attributes = attributes;
                        entry.pending = pending;
                        entry.ready = false;
                    }
                    None => {
                        return Err(ViewError::UnknownMesh { mesh_id: create.mesh_id });
                    }
                }
            }
            Some(MeshMessageId::Destroy) => {
                let destroy = MeshDestroyMessage::read(packet)?;
                if state.meshes.remove(&destroy.mesh_id).is_none() {
                    tracing::warn!(mesh_id = destroy.mesh_id, "destroy for unknown mesh ignored");
                }
            }
            Some(MeshMessageId::Finalise) => {
                let finalise = MeshFinaliseMessage::read(packet)?;
                let entry = state
                    .meshes
                    .get_mut(&finalise.mesh_id)
                    .ok_or(ViewError::UnknownMesh { mesh_id: finalise.mesh_id })?;
                if finalise.flags & mesh_finalise_flag::CALCULATE_NORMALS != 0
                    && entry.pending.draw_type == DrawType::Triangles
                {
                    entry.pending.normals =
                        calculate_normals(&entry.pending.vertices, &entry.pending.indices);
                }
                if finalise.flags & mesh_finalise_flag::COLOUR_BY_AXIS != 0 {
                    entry.pending.colours = colour_by_axis(&entry.pending.vertices, 2);
                }
                entry.ready = true;
            }
            Some(id) => {
                let Some(component) = MeshComponent::from_message_id(id) else {
                    tracing::warn!(message_id = id.to_u16(), "unsupported mesh message skipped");
                    return Ok(());
                };
                let (message, block) = mesh::read_component(packet, component)?;
                let entry = state
                    .meshes
                    .get_mut(&message.mesh_id)
                    .ok_or(ViewError::UnknownMesh { mesh_id: message.mesh_id })?;
                let target = entry.pending.stream_mut(component);
                if target.is_empty() && target.element_type() != block.element_type() {
                    *target = DataBuffer::empty(block.element_type(), block.component_count());
                }
                target.splice(message.offset, &block)?;
            }
            None => {
                tracing::warn!(
                    message_id = packet.message_id(),
                    "unknown mesh message id skipped"
                );
            }
        }
        Ok(())
    }

    fn end_frame(&self, _stamp: &FrameStamp, _flush: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        for entry in state.meshes.values_mut() {
            if entry.ready {
                entry.current = Some(Arc::new(entry.pending.clone()));
                entry.ready = false;
            }
        }
        let view: HashMap<u32, Arc<MeshData>> = state
            .meshes
            .iter()
            .filter_map(|(&id, entry)| entry.current.clone().map(|mesh| (id, mesh)))
            .collect();
        state.staged_view = Some(view);
    }

    fn prepare_frame(&self, _stamp: &FrameStamp) {
        let staged = self.state.lock().ok().and_then(|mut state| state.staged_view.take());
        if let (Some(staged), Ok(mut visible)) = (staged, self.visible.lock()) {
            *visible = staged;
        }
    }

    fn serialise(&self, out: &dyn Connection) -> Result<()> {
        let meshes: Vec<Arc<MeshData>> = self
            .state
            .lock()
            .map(|state| {
                let mut meshes: Vec<_> = state
                    .meshes
                    .values()
                    .filter_map(|entry| entry.current.clone())
                    .collect();
                meshes.sort_by_key(|mesh| mesh.mesh_id);
                meshes
            })
            .unwrap_or_default();

        let mut scratch = vec![0u8; 0xFFFF];
        for mesh in meshes {
            // Rebuild a resource and drive the standard transfer pump.
            let mut resource =
                MeshResource::new(mesh.mesh_id, mesh.draw_type, mesh.vertices.clone())
                    .with_attributes(mesh.attributes);
            if !mesh.indices.is_empty() {
                resource = resource.with_indices(mesh.indices.clone());
            }
            if !mesh.colours.is_empty() {
                resource = resource.with_colours(mesh.colours.clone());
            }
            if !mesh.normals.is_empty() {
                resource = resource.with_normals(mesh.normals.clone());
            }
            if !mesh.uvs.is_empty() {
                resource = resource.with_uvs(mesh.uvs.clone());
            }

            let mut packet = PacketWriter::new(&mut scratch, 0, 0)?;
            resource.write_create(&mut packet)?;
            packet.finalise()?;
            out.send(packet.data(), true)?;

            let mut progress = TransferProgress::default();
            while !progress.complete {
                let mut packet = PacketWriter::new(&mut scratch, 0, 0)?;
                resource.transfer(&mut packet, 0, &mut progress)?;
                packet.finalise()?;
                out.send(packet.data(), true)?;
            }
        }
        Ok(())
    }
}

/// Face-normal accumulation for triangle meshes: each vertex normal is the
/// normalised sum of the normals of the faces it participates in.
#[must_use]
pub fn calculate_normals(vertices: &DataBuffer, indices: &DataBuffer) -> DataBuffer {
    let vertex_count = vertices.count() as usize;
    let mut accumulated = vec![0.0f64; vertex_count * 3];

    let triangle_count = if indices.is_empty() {
        vertex_count / 3
    } else {
        indices.count() as usize / 3
    };

    let corner = |triangle: usize, corner: usize| -> usize {
        if indices.is_empty() {
            triangle * 3 + corner
        } else {
            indices.u32_at(triangle * 3 + corner, 0).unwrap_or(0) as usize
        }
    };

    for triangle in 0..triangle_count {
        let a = corner(triangle, 0);
        let b = corner(triangle, 1);
        let c = corner(triangle, 2);
        let read = |vertex: usize| -> [f64; 3] {
            [
                vertices.f64_at(vertex, 0).unwrap_or(0.0),
                vertices.f64_at(vertex, 1).unwrap_or(0.0),
                vertices.f64_at(vertex, 2).unwrap_or(0.0),
            ]
        };
        let pa = read(a);
        let pb = read(b);
        let pc = read(c);
        let ab = [pb[0] - pa[0], pb[1] - pa[1], pb[2] - pa[2]];
        let ac = [pc[0] - pa[0], pc[1] - pa[1], pc[2] - pa[2]];
        let normal = [
            ab[1] * ac[2] - ab[2] * ac[1],
            ab[2] * ac[0] - ab[0] * ac[2],
            ab[0] * ac[1] - ab[1] * ac[0],
        ];
        for vertex in [a, b, c] {
            if vertex < vertex_count {
                for axis in 0..3 {
                    accumulated[vertex * 3 + axis] += normal[axis];
                }
            }
        }
    }

    let mut normals = Vec::with_capacity(vertex_count * 3);
    for vertex in 0..vertex_count {
        let n = &accumulated[vertex * 3..vertex * 3 + 3];
        let length = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        if length > 0.0 {
            normals.extend([n[0] / length, n[1] / length, n[2] / length].map(|v| v as f32));
        } else {
            normals.extend([0.0f32, 0.0, 1.0]);
        }
    }
    DataBuffer::new(normals, 3)
}

/// Low end of the axis colouring ramp.
const AXIS_COLOUR_LOW: Colour = Colour::rgb(32, 32, 32);
/// High end of the axis colouring ramp.
const AXIS_COLOUR_HIGH: Colour = Colour::rgb(224, 224, 224);

/// Colour vertices by their position along `axis`: a linear blend from a
/// dark to a light grey over the mesh extent.
#[must_use]
pub fn colour_by_axis(vertices: &DataBuffer, axis: usize) -> DataBuffer {
    let count = vertices.count() as usize;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for vertex in 0..count {
        let value = vertices.f64_at(vertex, axis).unwrap_or(0.0);
        min = min.min(value);
        max = max.max(value);
    }
    let extent = (max - min).max(f64::EPSILON);

    let mut colours = Vec::with_capacity(count);
    for vertex in 0..count {
        let value = vertices.f64_at(vertex, axis).unwrap_or(0.0);
        let t = (value - min) / extent;
        colours.push(AXIS_COLOUR_LOW.lerp(AXIS_COLOUR_HIGH, t).to_u32());
    }
    DataBuffer::new(colours, 1)
}
