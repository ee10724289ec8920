//! The sans-IO chain driver.

use super::{Flow, PacketTransformer, TransformEngine};
use crate::TaggedUnit;
use crate::compound;
use crate::wire_unit::WireUnit;
use log::trace;
use shared::error::{Error, Result};
use std::collections::VecDeque;
use std::time::Instant;

/// An ordered list of engines plus the read/write queues of the sans-IO
/// driver.
///
/// `handle_write` runs units through [`transform`](TransformChain::transform)
/// and queues them for `poll_write`; `handle_read` runs them through
/// [`reverse_transform`](TransformChain::reverse_transform) and queues them
/// for `poll_read`. Units are classified into RTP or RTCP with RFC 5761
/// demultiplexing.
pub struct TransformChain {
    engines: Vec<Box<dyn TransformEngine>>,
    split_compound: bool,
    read_queue: VecDeque<TaggedUnit>,
    write_queue: VecDeque<TaggedUnit>,
    closed: bool,
}

fn select(engine: &mut dyn TransformEngine, flow: Flow) -> Option<&mut dyn PacketTransformer> {
    match flow {
        Flow::Rtp => engine.rtp_transformer(),
        Flow::Rtcp => engine.rtcp_transformer(),
    }
}

impl TransformChain {
    pub(crate) fn new(engines: Vec<Box<dyn TransformEngine>>, split_compound: bool) -> Self {
        Self {
            engines,
            split_compound,
            read_queue: VecDeque::new(),
            write_queue: VecDeque::new(),
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Outgoing path: engines first to last.
    pub fn transform(&mut self, flow: Flow, unit: WireUnit) -> Option<WireUnit> {
        let mut unit = unit;
        for (i, engine) in self.engines.iter_mut().enumerate() {
            if let Some(t) = select(engine.as_mut(), flow) {
                match t.transform(unit) {
                    Some(u) => unit = u,
                    None => {
                        trace!("{flow:?} unit dropped by engine {i} on transform");
                        return None;
                    }
                }
            }
        }
        Some(unit)
    }

    /// Incoming path: engines last to first.
    pub fn reverse_transform(&mut self, flow: Flow, unit: WireUnit) -> Option<WireUnit> {
        let mut unit = unit;
        for (i, engine) in self.engines.iter_mut().enumerate().rev() {
            if let Some(t) = select(engine.as_mut(), flow) {
                match t.reverse_transform(unit) {
                    Some(u) => unit = u,
                    None => {
                        trace!("{flow:?} unit dropped by engine {i} on reverse_transform");
                        return None;
                    }
                }
            }
        }
        Some(unit)
    }

    /// Incoming path for a batch of datagrams of one sub-flow. RTCP batches
    /// are split first when compound splitting is enabled.
    pub fn reverse_transform_batch(&mut self, flow: Flow, batch: Vec<WireUnit>) -> Vec<WireUnit> {
        let batch = if flow == Flow::Rtcp && self.split_compound {
            compound::split(batch)
        } else {
            batch
        };
        batch
            .into_iter()
            .filter_map(|unit| self.reverse_transform(flow, unit))
            .collect()
    }

    /// Closes every engine once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for engine in self.engines.iter_mut() {
            engine.close();
        }
        self.read_queue.clear();
        self.write_queue.clear();
    }
}

impl sansio::Protocol<TaggedUnit, TaggedUnit, ()> for TransformChain {
    type Rout = TaggedUnit;
    type Wout = TaggedUnit;
    type Eout = ();
    type Error = Error;
    type Time = Instant;

    fn handle_read(&mut self, msg: TaggedUnit) -> Result<()> {
        if self.closed {
            return Err(Error::ErrAlreadyClosed);
        }

        let flow = Flow::of(&msg.message);
        let (now, transport) = (msg.now, msg.transport);
        for unit in self.reverse_transform_batch(flow, vec![msg.message]) {
            self.read_queue.push_back(TaggedUnit {
                now,
                transport,
                message: unit,
            });
        }
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        self.read_queue.pop_front()
    }

    fn handle_write(&mut self, msg: TaggedUnit) -> Result<()> {
        if self.closed {
            return Err(Error::ErrAlreadyClosed);
        }

        let flow = Flow::of(&msg.message);
        let (now, transport) = (msg.now, msg.transport);
        if let Some(unit) = self.transform(flow, msg.message) {
            self.write_queue.push_back(TaggedUnit {
                now,
                transport,
                message: unit,
            });
        }
        Ok(())
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.write_queue.pop_front()
    }

    fn close(&mut self) -> Result<()> {
        TransformChain::close(self);
        Ok(())
    }
}

impl Drop for TransformChain {
    fn drop(&mut self) {
        self.close();
    }
}
