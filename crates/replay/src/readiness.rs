//! Waiting for the display server to pick up virtual devices.
//!
//! Creating a uinput device and having the X server expose it as an input
//! device are separated by udev and server-side hotplug handling. Injecting
//! events before the server knows the device loses them, so playback waits
//! until the expected `/dev/input/event*` nodes show up in the server's
//! device list.

use std::sync::Arc;

use x11rb::connection::Connection;
use x11rb::protocol::xinput::{self, ConnectionExt as _, XIEventMask};
use x11rb::protocol::xproto::{
    AtomEnum, ConnectionExt as _, CreateWindowAux, EventMask, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use battbench_common::error::{BattbenchError, BattbenchResult};

/// Watches the X server's input hierarchy until a set of device nodes
/// is known to the server.
pub struct DeviceReadinessWaiter {
    conn: Arc<RustConnection>,
    window: u32,
    node_atom: u32,
}

/// Cancels an in-flight wait from another task.
#[derive(Clone)]
pub struct CancelHandle {
    conn: Arc<RustConnection>,
    window: u32,
}

impl CancelHandle {
    /// Abort the wait. The waiter returns a cancellation error.
    pub fn cancel(&self) {
        // Destroying the window produces a DestroyNotify that unblocks
        // the waiter's event loop.
        let _ = self.conn.destroy_window(self.window);
        let _ = self.conn.flush();
    }
}

impl DeviceReadinessWaiter {
    /// Connect to the display and subscribe to hierarchy changes.
    pub fn open() -> BattbenchResult<(Self, CancelHandle)> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(|e| BattbenchError::replay(format!("Can't open display: {e}")))?;

        conn.xinput_xi_query_version(2, 0)
            .map_err(x11_error)?
            .reply()
            .map_err(|e| BattbenchError::replay(format!("Server lacks XInput 2: {e}")))?;

        let root = conn.setup().roots[screen_num].root;
        let window = conn.generate_id().map_err(x11_error)?;
        conn.create_window(
            0,
            window,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            0,
            &CreateWindowAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
        )
        .map_err(x11_error)?;

        conn.xinput_xi_select_events(
            window,
            &[xinput::EventMask {
                deviceid: 0,
                mask: vec![XIEventMask::HIERARCHY],
            }],
        )
        .map_err(x11_error)?;

        let node_atom = conn
            .intern_atom(false, b"Device Node")
            .map_err(x11_error)?
            .reply()
            .map_err(x11_error)?
            .atom;

        conn.flush().map_err(x11_error)?;

        let conn = Arc::new(conn);
        let cancel = CancelHandle {
            conn: Arc::clone(&conn),
            window,
        };
        Ok((
            Self {
                conn,
                window,
                node_atom,
            },
            cancel,
        ))
    }

    /// Block until every node in `nodes` appears in the server's device
    /// list, or until cancelled. Runs on the blocking pool.
    pub async fn wait(self, nodes: Vec<String>) -> BattbenchResult<()> {
        tokio::task::spawn_blocking(move || self.wait_blocking(&nodes))
            .await
            .map_err(|e| BattbenchError::replay(format!("Readiness wait panicked: {e}")))?
    }

    fn wait_blocking(&self, nodes: &[String]) -> BattbenchResult<()> {
        loop {
            if self.nodes_present(nodes)? {
                let _ = self.conn.destroy_window(self.window);
                let _ = self.conn.flush();
                return Ok(());
            }

            loop {
                let event = self.conn.wait_for_event().map_err(x11_error)?;
                match event {
                    Event::DestroyNotify(e) if e.window == self.window => {
                        return Err(BattbenchError::Cancelled);
                    }
                    // Re-scan on any hierarchy change.
                    Event::XinputHierarchy(_) => break,
                    _ => continue,
                }
            }
        }
    }

    fn nodes_present(&self, nodes: &[String]) -> BattbenchResult<bool> {
        let devices = self
            .conn
            .xinput_xi_query_device(0u16)
            .map_err(x11_error)?
            .reply()
            .map_err(x11_error)?;

        let mut found = vec![false; nodes.len()];
        for info in &devices.infos {
            let reply = self
                .conn
                .xinput_xi_get_property(
                    info.deviceid,
                    false,
                    self.node_atom,
                    u32::from(AtomEnum::ANY),
                    0,
                    128,
                )
                .map_err(x11_error)?
                .reply()
                .map_err(x11_error)?;

            if let xinput::XIGetPropertyItems::Data8(bytes) = &reply.items {
                for (i, node) in nodes.iter().enumerate() {
                    if node_matches(node, bytes) {
                        found[i] = true;
                    }
                }
            }
        }
        Ok(found.iter().all(|f| *f))
    }
}

fn node_matches(expected: &str, property: &[u8]) -> bool {
    let trimmed = property
        .split(|b| *b == 0)
        .next()
        .unwrap_or(property);
    trimmed == expected.as_bytes()
}

fn x11_error(e: impl std::fmt::Display) -> BattbenchError {
    BattbenchError::replay(format!("X connection error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_matches_nul_terminated_property() {
        assert!(node_matches("/dev/input/event7", b"/dev/input/event7\0"));
        assert!(node_matches("/dev/input/event7", b"/dev/input/event7"));
        assert!(!node_matches("/dev/input/event7", b"/dev/input/event17\0"));
    }
}
