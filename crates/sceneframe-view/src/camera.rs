//! Camera handler: remote camera placements with frame-commit semantics.

use std::collections::HashMap;
use std::sync::Mutex;

use sceneframe_core::Connection;
use sceneframe_proto::{CameraMessage, PacketReader, PacketWriter, RoutingId};

use crate::errors::{Result, ViewError};
use crate::handler::{FrameStamp, MessageHandler};

#[derive(Default)]
struct State {
    pending: Vec<CameraMessage>,
    committed: HashMap<u8, CameraMessage>,
    staged_view: Option<HashMap<u8, CameraMessage>>,
}

/// Handler for [`RoutingId::Camera`] messages.
#[derive(Default)]
pub struct CameraHandler {
    state: Mutex<State>,
    visible: Mutex<HashMap<u8, CameraMessage>>,
}

impl CameraHandler {
    /// Create an empty camera handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The camera with `camera_id`, as of the last prepared frame.
    #[must_use]
    pub fn camera(&self, camera_id: u8) -> Option<CameraMessage> {
        self.visible.lock().ok()?.get(&camera_id).copied()
    }

    /// Ids of all known cameras, as of the last prepared frame.
    #[must_use]
    pub fn camera_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self
            .visible
            .lock()
            .map(|visible| visible.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

impl MessageHandler for CameraHandler {
    fn routing_id(&self) -> u16 {
        RoutingId::Camera.to_u16()
    }

    fn name(&self) -> &'static str {
        "camera"
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
        if packet.message_id() != 0 {
            tracing::warn!(message_id = packet.message_id(), "unknown camera message skipped");
            return Ok(());
        }
        let message = CameraMessage::read(packet)?;
        let mut state = self.state.lock().map_err(|_| ViewError::Poisoned)?;
        state.pending.push(message);
        Ok(())
    }

    fn end_frame(&self, _stamp: &FrameStamp, _flush: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let pending = std::mem::take(&mut state.pending);
        for message in pending {
            // Later messages for the same camera override earlier ones.
            state.committed.insert(message.camera_id, message);
        }
        state.staged_view = Some(state.committed.clone());
    }

    fn prepare_frame(&self, _stamp: &FrameStamp) {
        let staged = self.state.lock().ok().and_then(|mut state| state.staged_view.take());
        if let (Some(staged), Ok(mut visible)) = (staged, self.visible.lock()) {
            *visible = staged;
        }
    }

    fn serialise(&self, out: &dyn Connection) -> Result<()> {
        let cameras: Vec<CameraMessage> = self
            .state
            .lock()
            .map(|state| {
                let mut cameras: Vec<_> = state.committed.values().copied().collect();
                cameras.sort_by_key(|camera| camera.camera_id);
                cameras
            })
            .unwrap_or_default();

        let mut scratch = [0u8; 128];
        for camera in cameras {
            let mut packet = PacketWriter::new(&mut scratch, self.routing_id(), 0)?;
            camera.write(&mut packet)?;
            packet.finalise()?;
            out.send(packet.data(), true)?;
        }
        Ok(())
    }
}

/// Extract pitch and yaw (radians) from a camera's forward and up vectors
/// against the world axes.
///
/// Pitch is negative looking up (toward `world_up`). Near the singular case
/// of a forward vector parallel to the up axis, pitch pins to +/- 90
/// degrees and yaw derives from the camera's up vector instead, which
/// remains well conditioned there.
#[must_use]
pub fn calculate_pitch_yaw(
    camera_fwd: [f64; 3],
    camera_up: [f64; 3],
    world_fwd: [f64; 3],
    world_up: [f64; 3],
) -> (f64, f64) {
    let up_dot = dot(camera_fwd, world_up);
    let world_right = cross(world_fwd, world_up);

    let (pitch, yaw_reference) = if (up_dot.abs() - 1.0).abs() > 1.0e-6 {
        (-up_dot.clamp(-1.0, 1.0).asin(), camera_fwd)
    } else {
        // Forward is (anti)parallel to the world up axis.
        (-up_dot.signum() * std::f64::consts::FRAC_PI_2, camera_up)
    };

    // Yaw from the horizontal projection of the reference vector.
    let horizontal = [
        yaw_reference[0] - world_up[0] * dot(yaw_reference, world_up),
        yaw_reference[1] - world_up[1] * dot(yaw_reference, world_up),
        yaw_reference[2] - world_up[2] * dot(yaw_reference, world_up),
    ];
    let yaw = dot(horizontal, world_right).atan2(dot(horizontal, world_fwd));
    (pitch, yaw)
}

/// World forward and up axes for a coordinate frame, for use with
/// [`calculate_pitch_yaw`].
#[must_use]
pub fn frame_axes(frame: sceneframe_proto::CoordinateFrame) -> ([f64; 3], [f64; 3]) {
    use sceneframe_proto::CoordinateFrame as Cf;
    let x = [1.0, 0.0, 0.0];
    let y = [0.0, 1.0, 0.0];
    let z = [0.0, 0.0, 1.0];
    let neg = |v: [f64; 3]| [-v[0], -v[1], -v[2]];
    match frame {
        Cf::Xyz => (y, z),
        Cf::XzyNeg => (z, neg(y)),
        Cf::YxzNeg => (x, neg(z)),
        Cf::Yzx => (z, x),
        Cf::Zxy => (x, y),
        Cf::ZyxNeg => (y, neg(x)),
        Cf::XyzNeg => (y, neg(z)),
        Cf::Xzy => (z, y),
        Cf::Yxz => (x, z),
        Cf::YzxNeg => (z, neg(x)),
        Cf::ZxyNeg => (x, neg(y)),
        Cf::Zyx => (y, x),
    }
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const WORLD_FWD: [f64; 3] = [0.0, 1.0, 0.0];
    const WORLD_UP: [f64; 3] = [0.0, 0.0, 1.0];

    #[test]
    fn level_forward_camera_has_zero_pitch_yaw() {
        let (pitch, yaw) =
            calculate_pitch_yaw(WORLD_FWD, WORLD_UP, WORLD_FWD, WORLD_UP);
        assert!(pitch.abs() < 1.0e-9);
        assert!(yaw.abs() < 1.0e-9);
    }

    #[test]
    fn looking_right_yields_quarter_turn_yaw() {
        let (pitch, yaw) =
            calculate_pitch_yaw([1.0, 0.0, 0.0], WORLD_UP, WORLD_FWD, WORLD_UP);
        assert!(pitch.abs() < 1.0e-9);
        assert!((yaw - FRAC_PI_2).abs() < 1.0e-9);
    }

    #[test]
    fn looking_up_picks_the_correct_hemisphere() {
        // Slightly short of straight up: pitch approaches -90 degrees and
        // yaw stays stable, with no hemisphere flip.
        let almost_up = {
            let v: [f64; 3] = [0.0, 0.01, 0.9999];
            let len = (v[1] * v[1] + v[2] * v[2]).sqrt();
            [0.0, v[1] / len, v[2] / len]
        };
        let (pitch, yaw) =
            calculate_pitch_yaw(almost_up, [0.0, -1.0, 0.0], WORLD_FWD, WORLD_UP);
        assert!(pitch < -1.5 && pitch > -FRAC_PI_2 - 1.0e-6);
        assert!(yaw.abs() < 1.0e-6);

        // Exactly up: the singular path uses the camera up vector for yaw.
        let (pitch, yaw) =
            calculate_pitch_yaw([0.0, 0.0, 1.0], [0.0, -1.0, 0.0], WORLD_FWD, WORLD_UP);
        assert!((pitch + FRAC_PI_2).abs() < 1.0e-9);
        assert!((yaw.abs() - std::f64::consts::PI).abs() < 1.0e-9);
    }

    #[test]
    fn camera_commit_semantics() {
        let handler = CameraHandler::new();
        let mut scratch = [0u8; 128];
        for z in [1.0f32, 2.0] {
            let message = CameraMessage {
                camera_id: 1,
                position: [0.0, 0.0, z],
                direction: [0.0, 1.0, 0.0],
                up: [0.0, 0.0, 1.0],
                ..CameraMessage::default()
            };
            let mut packet =
                PacketWriter::new(&mut scratch, handler.routing_id(), 0).unwrap();
            message.write(&mut packet).unwrap();
            packet.finalise().unwrap();
            let bytes = packet.data().to_vec();
            let mut reader = PacketReader::new(&bytes).unwrap();
            handler.read_message(&mut reader).unwrap();
        }

        assert!(handler.camera(1).is_none());
        let stamp = FrameStamp::default();
        handler.end_frame(&stamp, true);
        handler.prepare_frame(&stamp);
        // The later message wins.
        assert_eq!(handler.camera(1).unwrap().position[2], 2.0);
    }
}
