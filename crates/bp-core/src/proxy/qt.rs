//! Qt signal and slot access.
//!
//! Available on nodes whose tree advertised the Qt extension interface.
//! Signals are named by their C++ signature (`clicked(bool)`); slots are
//! exposed by bare name and invoked by full signature.

use super::node::ProxyNode;
use crate::address::BusAddress;
use crate::bus::WireValue;
use bp_common::{Error, Result};

/// Qt view of one [`ProxyNode`].
#[derive(Debug, Clone, Copy)]
pub struct QtExtension<'a> {
    node: &'a ProxyNode,
}

impl<'a> QtExtension<'a> {
    pub(crate) fn new(node: &'a ProxyNode) -> Self {
        QtExtension { node }
    }

    /// Signal signatures the object can emit.
    pub fn signals(&self) -> Result<Vec<String>> {
        self.node.address().list_signals(self.node.id())
    }

    /// Slot names, without their argument signature.
    pub fn slots(&self) -> Result<Vec<String>> {
        Ok(self
            .methods()?
            .iter()
            .map(|method| slot_name(method).to_string())
            .collect())
    }

    fn methods(&self) -> Result<Vec<String>> {
        self.node.address().list_methods(self.node.id())
    }

    fn ensure_signal(&self, signal: &str) -> Result<()> {
        if self.signals()?.iter().any(|s| s == signal) {
            Ok(())
        } else {
            Err(Error::InvalidSignal {
                signal: signal.to_string(),
                type_name: self.node.type_name().to_string(),
            })
        }
    }

    /// Start recording emissions of `signal`.
    ///
    /// Nothing is recorded until this is called once per signal.
    pub fn watch_signal(&self, signal: &str) -> Result<SignalWatcher> {
        self.ensure_signal(signal)?;
        let address = self.node.address();
        address.register_signal_interest(self.node.id(), signal)?;
        Ok(SignalWatcher {
            address: address.clone(),
            object_id: self.node.id(),
            signal: signal.to_string(),
        })
    }

    /// Argument lists of every recorded emission of `signal`.
    pub fn emissions(&self, signal: &str) -> Result<Vec<Vec<WireValue>>> {
        self.ensure_signal(signal)?;
        self.node
            .address()
            .get_signal_emissions(self.node.id(), signal)
    }

    /// Invoke `slot` (bare name or full signature) with `args`.
    pub fn invoke(&self, slot: &str, args: &[WireValue]) -> Result<()> {
        let methods = self.methods()?;
        let method = methods
            .iter()
            .find(|method| method.as_str() == slot || slot_name(method) == slot)
            .ok_or_else(|| Error::InvalidSlot {
                slot: slot.to_string(),
                type_name: self.node.type_name().to_string(),
            })?;
        self.node
            .address()
            .invoke_method(self.node.id(), method, args)
    }
}

fn slot_name(method: &str) -> &str {
    method.split('(').next().unwrap_or(method)
}

/// Emission counter for one watched signal.
#[derive(Debug, Clone)]
pub struct SignalWatcher {
    address: BusAddress,
    object_id: i64,
    signal: String,
}

impl SignalWatcher {
    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Emissions recorded since the watch started.
    pub fn num_emissions(&self) -> Result<usize> {
        Ok(self
            .address
            .get_signal_emissions(self.object_id, &self.signal)?
            .len())
    }

    pub fn was_emitted(&self) -> Result<bool> {
        Ok(self.num_emissions()? > 0)
    }
}
