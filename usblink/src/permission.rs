//! Permission negotiation.
//!
//! Access is either already held, or requested from the host with a
//! [`PermissionResponder`]. The responder carries a request token so that a
//! decision arriving after the request was cancelled (for example by a
//! detach) is recognized as stale and ignored by the worker.

use std::fmt;
use std::sync::mpsc::Sender;

use log::{debug, info};

use crate::catalog;
use crate::device::DeviceDescriptor;
use crate::error::Error;
use crate::host::UsbHost;
use crate::manager::Command;
use crate::pending::Reply;

/// One-shot handle the host uses to report a permission decision.
pub struct PermissionResponder {
    device_id: String,
    token: u64,
    tx: Sender<Command>,
}

impl PermissionResponder {
    pub(crate) fn new(device_id: String, token: u64, tx: Sender<Command>) -> Self {
        Self {
            device_id,
            token,
            tx,
        }
    }

    /// Device the prompt is for.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Report the decision. Safe to call from any thread.
    ///
    /// Returns `false` if the session has already shut down.
    pub fn resolve(self, granted: bool) -> bool {
        self.tx
            .send(Command::PermissionDecision {
                token: self.token,
                device_id: self.device_id,
                granted,
            })
            .is_ok()
    }
}

impl fmt::Debug for PermissionResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionResponder")
            .field("device_id", &self.device_id)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// The single outstanding permission request.
pub(crate) struct PendingPermissionRequest {
    pub(crate) device_id: String,
    pub(crate) baud: u32,
    pub(crate) token: u64,
    reply: Reply<()>,
}

impl PendingPermissionRequest {
    /// Resolve the waiting caller with an error.
    pub(crate) fn fail(self, error: Error) {
        self.reply.send(Err(error));
    }

    /// Whether a decision belongs to this request.
    pub(crate) fn matches(&self, token: u64, device_id: &str) -> bool {
        self.token == token && self.device_id == device_id
    }
}

/// Outcome of [`PermissionNegotiator::ensure_access`].
pub(crate) enum Access {
    /// Access is held; continue opening with the caller's reply.
    Granted(Reply<()>),
    /// A prompt was issued; park this until the decision arrives.
    Suspended(PendingPermissionRequest),
}

/// A granted request, ready for the open sequence.
pub(crate) struct Resumed {
    pub(crate) device: DeviceDescriptor,
    pub(crate) baud: u32,
    pub(crate) reply: Reply<()>,
}

/// Issues permission prompts and interprets their decisions.
pub(crate) struct PermissionNegotiator {
    tx: Sender<Command>,
    next_token: u64,
}

impl PermissionNegotiator {
    pub(crate) fn new(tx: Sender<Command>) -> Self {
        Self { tx, next_token: 0 }
    }

    /// Check for access and prompt the host if it is not held yet.
    ///
    /// The caller guarantees no other request is outstanding.
    pub(crate) fn ensure_access(
        &mut self,
        host: &dyn UsbHost,
        device: &DeviceDescriptor,
        baud: u32,
        reply: Reply<()>,
    ) -> Access {
        if host.has_permission(device) {
            return Access::Granted(reply);
        }

        self.next_token += 1;
        let token = self.next_token;
        info!("Requesting USB permission for {}", device.id);
        host.request_permission(
            device,
            PermissionResponder::new(device.id.clone(), token, self.tx.clone()),
        );

        Access::Suspended(PendingPermissionRequest {
            device_id: device.id.clone(),
            baud,
            token,
            reply,
        })
    }

    /// Apply a decision to its request.
    ///
    /// Denials fail the caller. Grants re-resolve the device, since it may
    /// have been replaced or removed while the prompt was showing.
    pub(crate) fn resolve(
        &self,
        host: &dyn UsbHost,
        pending: PendingPermissionRequest,
        granted: bool,
    ) -> Option<Resumed> {
        let PendingPermissionRequest {
            device_id,
            baud,
            reply,
            ..
        } = pending;

        if !granted {
            info!("USB permission denied for {device_id}");
            reply.send(Err(Error::PermissionDenied(device_id)));
            return None;
        }

        match catalog::find(host, &device_id) {
            Some(device) => {
                debug!("USB permission granted for {device_id}");
                Some(Resumed {
                    device,
                    baud,
                    reply,
                })
            },
            None => {
                reply.send(Err(Error::DeviceMissing(device_id)));
                None
            },
        }
    }
}
