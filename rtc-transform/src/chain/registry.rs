//! Registry - ordered builder for transform chains.

use super::TransformEngine;
use super::pipeline::TransformChain;

/// Builder collecting engines in chain order.
///
/// The first engine added sits closest to the application, the last one
/// closest to the network.
///
/// # Example
///
/// ```ignore
/// use rtc_transform::{Registry, DelayLine, Flow, RedFilterBuilder};
///
/// let chain = Registry::new()
///     .with(RedFilterBuilder::new().with_payload_type(63).build())
///     .with(DelayLine::new(Flow::Rtp, 2))
///     .with_compound_splitting()
///     .build();
/// ```
#[derive(Default)]
pub struct Registry {
    engines: Vec<Box<dyn TransformEngine>>,
    split_compound: bool,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an engine after the ones already registered.
    pub fn with<E>(mut self, engine: E) -> Self
    where
        E: TransformEngine + 'static,
    {
        self.engines.push(Box::new(engine));
        self
    }

    /// Append an already boxed engine.
    pub fn with_boxed(mut self, engine: Box<dyn TransformEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    /// Split incoming RTCP compound datagrams so each engine sees one RTCP
    /// packet per unit.
    pub fn with_compound_splitting(mut self) -> Self {
        self.split_compound = true;
        self
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Build and return the chain.
    pub fn build(self) -> TransformChain {
        TransformChain::new(self.engines, self.split_compound)
    }
}
