/*!
The `virt` module provides an in-memory [`RawMidi`] port wired to a scripted
device. Whatever the host writes is split into messages and handed to a
responder function; the frames the responder returns become the port's
receive stream. Integration tests drive the full protocol stack through this
port, and it is the reference for what the engine expects from a transport.
!*/

use super::{PortResult, RawMidi};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Produces zero or more reply frames for one message sent by the host.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// An in-memory port backed by a responder function.
pub struct VirtualPort {
    responder: Responder,
    pending: VecDeque<u8>,
    accum: Vec<u8>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl VirtualPort {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            accum: Vec::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every message the host has sent, in order. SysEx frames are complete
    /// `F0 … F7` messages; other traffic is recorded write by write.
    pub fn sent(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.sent)
    }

    /// Queues bytes for the host to receive, outside of any request.
    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
    }

    fn dispatch(&mut self, message: Vec<u8>) {
        self.sent.lock().unwrap().push(message.clone());
        for reply in (self.responder)(&message) {
            self.pending.extend(reply);
        }
    }
}

impl RawMidi for VirtualPort {
    fn tx_raw(&mut self, data: &[u8]) -> PortResult<usize> {
        for &byte in data {
            self.accum.push(byte);
            if byte == 0xF7 {
                let message = std::mem::take(&mut self.accum);
                self.dispatch(message);
            }
        }
        // Anything that is not (part of) a SysEx frame is a complete short
        // message once the write returns.
        if !self.accum.is_empty() && self.accum[0] != 0xF0 {
            let message = std::mem::take(&mut self.accum);
            self.dispatch(message);
        }
        Ok(data.len())
    }

    fn rx_raw(&mut self, buf: &mut [u8], _timeout: Duration) -> PortResult<usize> {
        let mut count = 0;
        while count < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn drain(&mut self) -> PortResult<()> {
        self.pending.clear();
        Ok(())
    }
}
