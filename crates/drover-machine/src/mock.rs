//! Scripted in-process node API for tests.
//!
//! Every call is recorded; responses are popped from per-method queues and
//! fall back to a benign default when the queue is empty.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use drover_domain::{MachineStage, TalosConfig};

use crate::api::MachineApi;
use crate::error::MachineError;
use crate::provider::{Client, ClientProvider, ConnectMode};
use crate::types::{
    ApplyRequestMode, ApplyResponse, AppliedMode, NodeStatus, ResetRequest, UpgradeRequest,
    VersionInfo,
};

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Version,
    ApplyConfiguration { data: Vec<u8>, mode: ApplyRequestMode },
    Upgrade(UpgradeRequest),
    Reset(ResetRequest),
    MetaWrite { key: u32 },
    MetaDelete { key: u32 },
    EtcdForfeitLeadership,
    EtcdLeaveCluster,
    MachineStatus,
}

#[derive(Default)]
pub struct MockMachine {
    calls: Mutex<Vec<MockCall>>,
    version_queue: Mutex<VecDeque<Result<VersionInfo, MachineError>>>,
    apply_queue: Mutex<VecDeque<Result<ApplyResponse, MachineError>>>,
    upgrade_queue: Mutex<VecDeque<Result<(), MachineError>>>,
    reset_queue: Mutex<VecDeque<Result<(), MachineError>>>,
    meta_write_queue: Mutex<VecDeque<Result<(), MachineError>>>,
    meta_delete_queue: Mutex<VecDeque<Result<(), MachineError>>>,
    etcd_forfeit_queue: Mutex<VecDeque<Result<(), MachineError>>>,
    etcd_leave_queue: Mutex<VecDeque<Result<(), MachineError>>>,
    status_queue: Mutex<VecDeque<Result<NodeStatus, MachineError>>>,
}

impl MockMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<MockCall> {
        std::mem::take(&mut self.calls.lock().unwrap())
    }

    pub fn queue_version(&self, response: Result<VersionInfo, MachineError>) {
        self.version_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_apply(&self, response: Result<ApplyResponse, MachineError>) {
        self.apply_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_upgrade(&self, response: Result<(), MachineError>) {
        self.upgrade_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_reset(&self, response: Result<(), MachineError>) {
        self.reset_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_meta_write(&self, response: Result<(), MachineError>) {
        self.meta_write_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_meta_delete(&self, response: Result<(), MachineError>) {
        self.meta_delete_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_etcd_forfeit(&self, response: Result<(), MachineError>) {
        self.etcd_forfeit_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_etcd_leave(&self, response: Result<(), MachineError>) {
        self.etcd_leave_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_status(&self, response: Result<NodeStatus, MachineError>) {
        self.status_queue.lock().unwrap().push_back(response);
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn pop<T>(
        queue: &Mutex<VecDeque<Result<T, MachineError>>>,
        default: T,
    ) -> Result<T, MachineError> {
        queue.lock().unwrap().pop_front().unwrap_or(Ok(default))
    }
}

#[async_trait]
impl MachineApi for MockMachine {
    async fn version(&self) -> Result<VersionInfo, MachineError> {
        self.record(MockCall::Version);
        Self::pop(&self.version_queue, VersionInfo { tag: "v1.0.0".into() })
    }

    async fn apply_configuration(
        &self,
        data: Vec<u8>,
        mode: ApplyRequestMode,
    ) -> Result<ApplyResponse, MachineError> {
        self.record(MockCall::ApplyConfiguration { data, mode });
        Self::pop(
            &self.apply_queue,
            ApplyResponse { mode: AppliedMode::NoReboot, details: String::new() },
        )
    }

    async fn upgrade(&self, request: UpgradeRequest) -> Result<(), MachineError> {
        self.record(MockCall::Upgrade(request));
        Self::pop(&self.upgrade_queue, ())
    }

    async fn reset(&self, request: ResetRequest) -> Result<(), MachineError> {
        self.record(MockCall::Reset(request));
        Self::pop(&self.reset_queue, ())
    }

    async fn meta_write(&self, key: u32, _value: Vec<u8>) -> Result<(), MachineError> {
        self.record(MockCall::MetaWrite { key });
        Self::pop(&self.meta_write_queue, ())
    }

    async fn meta_delete(&self, key: u32) -> Result<(), MachineError> {
        self.record(MockCall::MetaDelete { key });
        Self::pop(&self.meta_delete_queue, ())
    }

    async fn etcd_forfeit_leadership(&self) -> Result<(), MachineError> {
        self.record(MockCall::EtcdForfeitLeadership);
        Self::pop(&self.etcd_forfeit_queue, ())
    }

    async fn etcd_leave_cluster(&self) -> Result<(), MachineError> {
        self.record(MockCall::EtcdLeaveCluster);
        Self::pop(&self.etcd_leave_queue, ())
    }

    async fn machine_status(&self) -> Result<NodeStatus, MachineError> {
        self.record(MockCall::MachineStatus);
        Self::pop(&self.status_queue, NodeStatus { stage: MachineStage::Running, ready: true })
    }
}

/// Provider handing out one shared [`MockMachine`] per address and recording
/// the mode of every connection.
#[derive(Default)]
pub struct MockProvider {
    machines: Mutex<HashMap<String, Arc<MockMachine>>>,
    connects: Mutex<Vec<(String, ConnectMode)>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The machine behind `address`, created on first use.
    pub fn machine(&self, address: &str) -> Arc<MockMachine> {
        self.machines
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MockMachine::new()))
            .clone()
    }

    pub fn connects(&self) -> Vec<(String, ConnectMode)> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientProvider for MockProvider {
    async fn maintenance(&self, address: &str) -> Result<Client, MachineError> {
        self.connects.lock().unwrap().push((address.to_string(), ConnectMode::Maintenance));
        Ok(self.machine(address))
    }

    async fn cluster(&self, _pki: &TalosConfig, address: &str) -> Result<Client, MachineError> {
        self.connects.lock().unwrap().push((address.to_string(), ConnectMode::Cluster));
        Ok(self.machine(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MachineErrorKind;

    #[tokio::test]
    async fn scripted_responses_pop_in_order() {
        let machine = MockMachine::new();
        machine.queue_version(Err(MachineError::new(MachineErrorKind::Unavailable, "down")));
        machine.queue_version(Ok(VersionInfo { tag: "v1.9.3".into() }));

        assert!(machine.version().await.unwrap_err().is_transient());
        assert_eq!(machine.version().await.unwrap().tag, "v1.9.3");
        // Queue exhausted: default response.
        assert_eq!(machine.version().await.unwrap().tag, "v1.0.0");
        assert_eq!(machine.calls().len(), 3);
    }

    #[tokio::test]
    async fn provider_shares_machines_by_address_and_records_mode() {
        let provider = MockProvider::new();
        let a = provider.maintenance("10.0.0.1:50000").await.unwrap();
        let _ = a.version().await.unwrap();

        let same = provider.machine("10.0.0.1:50000");
        assert_eq!(same.calls(), vec![MockCall::Version]);
        assert_eq!(
            provider.connects(),
            vec![("10.0.0.1:50000".to_string(), ConnectMode::Maintenance)]
        );
    }
}
