use super::PacketTransformer;
use crate::wire_unit::WireUnit;
use log::trace;

/// Runs the inner transformer only for units whose bytes satisfy the gate;
/// everything else passes through untouched.
pub struct Gated<T> {
    inner: T,
    gate: Box<dyn Fn(&[u8]) -> bool + Send>,
}

impl<T: PacketTransformer> Gated<T> {
    pub fn new<F>(inner: T, gate: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + 'static,
    {
        Self {
            inner,
            gate: Box::new(gate),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: PacketTransformer> PacketTransformer for Gated<T> {
    fn transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        if (self.gate)(unit.as_bytes()) {
            self.inner.transform(unit)
        } else {
            trace!("gated out {} outgoing bytes", unit.length());
            Some(unit)
        }
    }

    fn reverse_transform(&mut self, unit: WireUnit) -> Option<WireUnit> {
        if (self.gate)(unit.as_bytes()) {
            self.inner.reverse_transform(unit)
        } else {
            trace!("gated out {} incoming bytes", unit.length());
            Some(unit)
        }
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
