//! The root proxy of an application tree.

use super::node::ProxyNode;
use crate::process::{terminate_pid, MonitoredProcess};
use bp_common::Result;
use std::ops::Deref;

/// Root node plus the OS process it fronts.
///
/// Only the root of a tree carries process tracking; descendants are plain
/// [`ProxyNode`]s.
#[derive(Debug)]
pub struct ApplicationProxy {
    root: ProxyNode,
    process: Option<Box<dyn MonitoredProcess>>,
}

impl ApplicationProxy {
    pub fn new(root: ProxyNode) -> Self {
        ApplicationProxy {
            root,
            process: None,
        }
    }

    /// Attach a locally spawned process handle.
    pub fn set_process(&mut self, process: Box<dyn MonitoredProcess>) {
        self.process = Some(process);
    }

    pub fn with_process(mut self, process: Box<dyn MonitoredProcess>) -> Self {
        self.set_process(process);
        self
    }

    /// Pid of the application: the tracked handle's, else the owner of the
    /// bus connection.
    pub fn process_pid(&self) -> Result<u32> {
        match &self.process {
            Some(process) => Ok(process.pid()),
            None => self.root.address().owner_pid(),
        }
    }

    /// Ask the application to terminate.
    pub fn kill_application(&mut self) -> Result<()> {
        match self.process.as_mut() {
            Some(process) => process.kill()?,
            None => {
                let pid = self.root.address().owner_pid()?;
                tracing::info!(pid, "sending SIGTERM to application");
                terminate_pid(pid)?;
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &ProxyNode {
        &self.root
    }

    pub fn into_root(self) -> ProxyNode {
        self.root
    }
}

impl Deref for ApplicationProxy {
    type Target = ProxyNode;

    fn deref(&self) -> &ProxyNode {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{BusAddress, VersionCheckCache};
    use crate::backend::Backend;
    use crate::constants::AUTOPILOT_PATH;
    use crate::mock_bus::{MockBus, MockEndpoint};
    use crate::mock_process::MockProcess;
    use crate::proxy::node::TreeContext;
    use crate::proxy::registry::{EmulatorBase, ObjectClassRegistry};
    use crate::query::Query;
    use std::sync::Arc;

    fn app(bus: &Arc<MockBus>) -> ApplicationProxy {
        let address = BusAddress::new(
            bus.clone(),
            ":1.5",
            AUTOPILOT_PATH,
            Arc::new(VersionCheckCache::new()),
        );
        let tree = Arc::new(TreeContext::new(
            Backend::new(address),
            Arc::new(ObjectClassRegistry::new()),
            EmulatorBase::default(),
        ));
        let root = ProxyNode::execute(&tree, &Query::pseudo_tree_root())
            .unwrap()
            .pop()
            .expect("root");
        ApplicationProxy::new(root)
    }

    #[test]
    fn pid_falls_back_to_connection_owner() {
        let bus = Arc::new(
            MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 4321).application("calc")),
        );
        let app = app(&bus);
        assert_eq!(app.process_pid().unwrap(), 4321);
        assert_eq!(app.type_name(), "calc");
    }

    #[test]
    fn tracked_process_wins_and_is_killed() {
        let bus = Arc::new(
            MockBus::new().with_endpoint(MockEndpoint::new(":1.5", 4321).application("calc")),
        );
        let handle = MockProcess::running(77);
        let mut app = app(&bus).with_process(Box::new(handle.clone()));

        assert_eq!(app.process_pid().unwrap(), 77);
        app.kill_application().unwrap();
        assert!(handle.was_killed());
    }

    #[test]
    fn unknown_owner_cannot_be_killed() {
        let bus = Arc::new(MockBus::new().with_endpoint(
            MockEndpoint::new(":1.5", 4321).application("calc").without_pid(),
        ));
        let mut app = app(&bus);
        assert!(app.process_pid().is_err());
        assert!(app.kill_application().is_err());
    }
}
