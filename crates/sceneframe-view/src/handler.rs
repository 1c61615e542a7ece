//! The message handler contract and frame stamps.

use sceneframe_core::Connection;
use sceneframe_proto::{PacketReader, ServerInfo};

use crate::errors::Result;

/// Identifies a logical frame and a render pass within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStamp {
    /// The logical frame delimited by frame control messages.
    pub frame_number: u64,
    /// Monotonic render counter; increases with every prepared view.
    pub render_mark: u64,
}

/// A viewer-side message handler bound to one routing id.
///
/// # Thread safety
///
/// Handlers straddle two threads. The data thread calls
/// [`MessageHandler::read_message`] and [`MessageHandler::end_frame`]; the
/// main (render) thread calls [`MessageHandler::prepare_frame`] and reads
/// the committed view. `read_message` must only enqueue pending work - the
/// sole publication points are `end_frame`, which commits pending state,
/// and `prepare_frame`, which makes the committed state visible to the
/// renderer. The two never overlap for one handler; together they act as a
/// release/acquire handshake. Implementations hold a mutex over their
/// pending and committed sets.
pub trait MessageHandler: Send + Sync {
    /// The routing id this handler consumes.
    fn routing_id(&self) -> u16;

    /// Handler name for diagnostics.
    fn name(&self) -> &'static str;

    /// One-time initialisation after registration.
    fn initialise(&self) {}

    /// Drop all state, returning to the initialised state.
    fn reset(&self);

    /// Observe a server info change.
    fn update_server_info(&self, info: &ServerInfo) {
        let _ = info;
    }

    /// Decode one message, enqueueing its effects. Data thread.
    fn read_message(&self, packet: &mut PacketReader<'_>) -> Result<()>;

    /// Commit pending effects at a frame boundary. Data thread.
    ///
    /// `flush` false (a persistent frame) keeps transient shapes alive
    /// through the boundary.
    fn end_frame(&self, stamp: &FrameStamp, flush: bool);

    /// Publish the committed state for the next draw calls. Main thread.
    fn prepare_frame(&self, stamp: &FrameStamp);

    /// Re-emit enough messages to rebuild this handler's committed state on
    /// a fresh connection.
    fn serialise(&self, out: &dyn Connection) -> Result<()>;
}
