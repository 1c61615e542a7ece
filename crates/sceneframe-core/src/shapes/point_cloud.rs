//! A point cloud shape referencing a points-mode mesh resource.

use std::sync::Arc;

use sceneframe_proto::{ObjectId, PacketReader, PacketWriter, ProtocolError, RoutingId};

use crate::resource::Resource;

use super::{Shape, ShapeCore};

/// Renders a points-mode mesh resource with an optional point scale
/// override.
#[derive(Debug, Clone)]
pub struct PointCloudShape {
    core: ShapeCore,
    mesh_id: u32,
    point_scale: f32,
    resource: Option<Arc<dyn Resource>>,
}

impl PointCloudShape {
    /// Create with the given id, referencing `resource` for the points.
    #[must_use]
    pub fn new(id: u32, resource: Arc<dyn Resource>) -> Self {
        Self {
            core: ShapeCore::new(id),
            mesh_id: resource.id(),
            point_scale: 0.0,
            resource: Some(resource),
        }
    }

    /// Create referencing a mesh by id only, as on the decode side where
    /// resources arrive separately.
    #[must_use]
    pub fn from_mesh_id(id: u32, mesh_id: u32) -> Self {
        Self { core: ShapeCore::new(id), mesh_id, point_scale: 0.0, resource: None }
    }

    /// Set the rendered point scale; zero selects the viewer default.
    #[must_use]
    pub fn with_point_scale(mut self, point_scale: f32) -> Self {
        self.point_scale = point_scale;
        self
    }

    /// Resource id of the referenced points mesh.
    #[must_use]
    pub fn mesh_id(&self) -> u32 {
        self.mesh_id
    }

    /// The rendered point scale.
    #[must_use]
    pub fn point_scale(&self) -> f32 {
        self.point_scale
    }
}

impl Shape for PointCloudShape {
    fn routing_id(&self) -> u16 {
        RoutingId::PointCloud.to_u16()
    }

    fn core(&self) -> &ShapeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ShapeCore {
        &mut self.core
    }

    fn resources(&self) -> Vec<Arc<dyn Resource>> {
        self.resource.iter().map(Arc::clone).collect()
    }

    fn write_create(&self, packet: &mut PacketWriter<'_>) -> Result<(), ProtocolError> {
        packet.reset(self.routing_id(), ObjectId::Create.to_u16());
        self.core.write_create(packet)?;
        packet.write(self.mesh_id)?;
        packet.write(self.point_scale)?;
        Ok(())
    }

    fn read_create(&mut self, packet: &mut PacketReader<'_>) -> Result<(), ProtocolError> {
        self.core.read_create(packet)?;
        self.mesh_id = packet.read()?;
        self.point_scale = packet.read()?;
        self.resource = None;
        Ok(())
    }
}
