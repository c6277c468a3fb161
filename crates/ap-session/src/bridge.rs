use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::pipeline::{OutputEvent, Subscription};
use crate::registry::Session;
use crate::resize::{ResizeChannel, ResizeOutcome, ResizeRequest};

/// Inbound message from a remote terminal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Keystrokes, forwarded verbatim.
    Input(Vec<u8>),
    /// Geometry change, never forwarded to the shell.
    Resize(ResizeRequest),
}

/// Outbound event for the remote client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Output(Vec<u8>),
    Exited(Option<u32>),
}

/// Duplex pump between one remote connection and one session.
///
/// Output arrives through a pipeline subscription registered ahead of the
/// rolling buffer, so a chunk is handed to the connection before it becomes
/// visible to agent snapshots. All methods take `&self`; one task can pump
/// output while another feeds input.
pub struct IoBridge {
    session: Arc<Session>,
    subscription: Subscription,
    resize: ResizeChannel,
    detached: AtomicBool,
}

impl IoBridge {
    pub fn attach(session: Arc<Session>) -> Self {
        let subscription = session.pipeline().subscribe();
        let resize = ResizeChannel::new(session.process().clone());
        debug!(session = %session.id(), "io bridge attached");
        Self {
            session,
            subscription,
            resize,
            detached: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Next thing to send to the client. `None` after exit or detach.
    pub async fn next_event(&self) -> Option<BridgeEvent> {
        if self.is_detached() {
            return None;
        }
        match self.subscription.recv().await? {
            OutputEvent::Data(bytes) => Some(BridgeEvent::Output(bytes)),
            OutputEvent::Exited { code } => Some(BridgeEvent::Exited(code)),
        }
    }

    pub fn send_input(&self, data: &[u8]) -> Result<()> {
        self.session.process().write(data)
    }

    pub fn resize(&self, req: ResizeRequest) -> ResizeOutcome {
        self.resize.apply(req)
    }

    /// Route one client message. Only input can fail (the shell is gone).
    pub fn handle_inbound(&self, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::Input(data) => self.send_input(&data),
            ClientMessage::Resize(req) => {
                self.resize(req);
                Ok(())
            }
        }
    }

    /// Stop forwarding output. The shell keeps running.
    pub fn detach(&self) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            self.subscription.unsubscribe();
            debug!(session = %self.session.id(), "io bridge detached");
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for IoBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBridge")
            .field("session", &self.session.id())
            .field("detached", &self.is_detached())
            .finish()
    }
}
