//! Device round-trips relayed through the browser.
//!
//! The browser owns the HID connection. A request goes out on the UI
//! broadcast channel as
//!   {"type": "device_request", "id": 7, "op": "center_begin", "args": ...}
//! and the browser answers with a `DEVICE_REPLY` command carrying the same
//! id, which the web layer hands to [`PendingReplies::resolve`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use super::{CalibrationDevice, LockState, RangeCalibrationResult};
use crate::error::{CalibError, Result};
use crate::finetune::params::ParameterSet;

/// Reply to a `device_request`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceReply {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// Requests awaiting a reply, keyed by id.
#[derive(Clone, Default)]
pub struct PendingReplies {
    inner: Arc<Mutex<HashMap<u64, oneshot::Sender<DeviceReply>>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: u64) -> oneshot::Receiver<DeviceReply> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Deliver a reply. Returns false for unknown (late or duplicate) ids.
    pub fn resolve(&self, reply: DeviceReply) -> bool {
        let id = reply.id;
        match self.lock().remove(&id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                warn!("[DEVICE] Reply for unknown request {id}");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<DeviceReply>>> {
        // A poisoned map only means a panicking holder; the map itself is intact.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct RemoteDevice {
    outbound: broadcast::Sender<String>,
    pending: PendingReplies,
    next_id: u64,
    timeout: Duration,
}

impl RemoteDevice {
    pub fn new(outbound: broadcast::Sender<String>, pending: PendingReplies, timeout: Duration) -> Self {
        Self {
            outbound,
            pending,
            next_id: 1,
            timeout,
        }
    }

    async fn request(&mut self, op: &'static str, args: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let mut msg = json!({ "type": "device_request", "id": id, "op": op });
        if let Some(args) = args {
            msg["args"] = args;
        }

        let rx = self.pending.register(id);
        if self.outbound.send(msg.to_string()).is_err() {
            self.pending.forget(id);
            return Err(CalibError::DeviceUnavailable("no UI client connected".into()));
        }
        debug!("[DEVICE] -> {op} (#{id}, {} pending)", self.pending.len());

        let reply = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(CalibError::DeviceUnavailable(format!("{op}: request dropped")));
            }
            Err(_) => {
                self.pending.forget(id);
                return Err(CalibError::DeviceUnavailable(format!("{op}: timed out")));
            }
        };

        debug!("[DEVICE] <- {op} (#{id}) ok={}", reply.ok);
        if reply.ok {
            Ok(reply.result)
        } else {
            let reason = reply.error.unwrap_or_else(|| "failed".into());
            Err(CalibError::DeviceUnavailable(format!("{op}: {reason}")))
        }
    }

    async fn request_as<T: serde::de::DeserializeOwned>(
        &mut self,
        op: &'static str,
        args: Option<Value>,
    ) -> Result<T> {
        let value = self.request(op, args).await?;
        serde_json::from_value(value)
            .map_err(|e| CalibError::DeviceUnavailable(format!("{op}: bad reply: {e}")))
    }
}

impl CalibrationDevice for RemoteDevice {
    async fn read_parameter_set(&mut self) -> Result<Vec<u32>> {
        self.request_as("params_read", None).await
    }

    async fn write_parameter_set(&mut self, set: &ParameterSet) -> Result<()> {
        self.request("params_write", Some(json!(set.values()))).await?;
        Ok(())
    }

    async fn begin_center_calibration(&mut self) -> Result<()> {
        self.request("center_begin", None).await?;
        Ok(())
    }

    async fn sample_center_calibration(&mut self) -> Result<()> {
        self.request("center_sample", None).await?;
        Ok(())
    }

    async fn end_center_calibration(&mut self) -> Result<()> {
        self.request("center_end", None).await?;
        Ok(())
    }

    async fn begin_range_calibration(&mut self) -> Result<()> {
        self.request("range_begin", None).await?;
        Ok(())
    }

    async fn end_range_calibration(&mut self) -> Result<RangeCalibrationResult> {
        let value = self.request("range_end", None).await?;
        if value.is_null() {
            return Ok(RangeCalibrationResult::default());
        }
        serde_json::from_value(value)
            .map_err(|e| CalibError::DeviceUnavailable(format!("range_end: bad reply: {e}")))
    }

    async fn query_lock_state(&mut self) -> Result<LockState> {
        self.request_as("lock_query", None).await
    }

    async fn set_lock(&mut self, locked: bool) -> Result<()> {
        self.request("lock_set", Some(json!({ "locked": locked }))).await?;
        Ok(())
    }

    async fn max_parameter_value(&mut self) -> Result<u32> {
        self.request_as("max_value", None).await
    }
}
