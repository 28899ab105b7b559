//! Mock compute fabric

use super::{CallJournal, Failures, lock};
use crate::error::FabricError;
use crate::fabric_trait::ComputeClient;
use node_config::{BladeAssigned, BladeSpec, NodeConfig, PowerState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Service profile held by [`MockCompute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockServer {
    pub sp_dn: String,
    pub blade: BladeAssigned,
    pub power: PowerState,
    pub description: String,
    pub label: String,
    pub macaddr: String,
    /// OS halted the server; power is still on but the blade reports `power-off`
    pub halted: bool,
}

/// In-memory compute fabric keyed by hostname
#[derive(Debug, Clone)]
pub struct MockCompute {
    servers: Arc<Mutex<HashMap<String, MockServer>>>,
    next_blade: Arc<Mutex<BladeAssigned>>,
    halting_boots: Arc<Mutex<u32>>,
    journal: CallJournal,
    failures: Failures,
}

impl MockCompute {
    /// Create a mock recording into `journal`
    #[must_use]
    pub fn new(journal: CallJournal) -> Self {
        Self {
            servers: Arc::new(Mutex::new(HashMap::new())),
            next_blade: Arc::new(Mutex::new(default_blade())),
            halting_boots: Arc::new(Mutex::new(0)),
            journal,
            failures: Failures::default(),
        }
    }

    /// Register an existing service profile bound to the default blade
    pub fn add_server(&self, hostname: &str, power: PowerState) {
        let blade = lock(&self.next_blade).clone();
        lock(&self.servers).insert(hostname.to_string(), new_server(hostname, blade, power));
    }

    /// Blade handed out by the next create/update
    pub fn set_next_blade(&self, blade: BladeAssigned) {
        *lock(&self.next_blade) = blade;
    }

    /// Replace the blade bound to an existing profile
    pub fn set_blade(&self, hostname: &str, blade: BladeAssigned) {
        if let Some(server) = lock(&self.servers).get_mut(hostname) {
            server.blade = blade;
        }
    }

    pub fn set_power(&self, hostname: &str, power: PowerState) {
        if let Some(server) = lock(&self.servers).get_mut(hostname) {
            server.power = power;
        }
    }

    #[must_use]
    pub fn server(&self, hostname: &str) -> Option<MockServer> {
        lock(&self.servers).get(hostname).cloned()
    }

    /// The next `boots` power-ons run an OS that halts the server by itself,
    /// as an installer does once it has finished
    pub fn halt_after_boots(&self, boots: u32) {
        *lock(&self.halting_boots) = boots;
    }

    /// Fail every call to `method` with `message`
    pub fn fail_on(&self, method: &str, message: &str) {
        self.failures.set(method, message);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    fn enter(&self, method: &str) -> Result<(), FabricError> {
        self.journal.record(format!("compute.{method}"));
        self.failures.check(method, FabricError::Compute)
    }

    fn with_server<T>(&self, config: &NodeConfig, f: impl FnOnce(&mut MockServer) -> T) -> Result<T, FabricError> {
        let host = &config.compute.host_name;
        let mut servers = lock(&self.servers);
        let server = servers
            .get_mut(host)
            .ok_or_else(|| FabricError::NotFound(format!("service profile for {host}")))?;
        Ok(f(server))
    }

    fn fill(config: &mut NodeConfig, server: &MockServer) {
        config.compute.sp_dn.clone_from(&server.sp_dn);
        config.compute.blade_assigned = server.blade.clone();
        config.compute.power_state = server.power;
        for nic in &mut config.network.node {
            nic.macaddr.clone_from(&server.macaddr);
        }
    }
}

fn default_blade() -> BladeAssigned {
    BladeAssigned {
        spec: BladeSpec {
            dn: "sys/chassis-1/blade-1".to_string(),
            model: "UCSB-B200-M5".to_string(),
            num_of_cpus: "2".to_string(),
            num_of_cores: "36".to_string(),
            num_of_threads: "72".to_string(),
            total_memory: "262144".to_string(),
        },
        serial: "FCH0000001".to_string(),
    }
}

fn new_server(hostname: &str, blade: BladeAssigned, power: PowerState) -> MockServer {
    MockServer {
        sp_dn: format!("org-root/ls-{hostname}"),
        blade,
        power,
        description: String::new(),
        label: String::new(),
        macaddr: "00:25:b5:00:00:01".to_string(),
        halted: false,
    }
}

#[async_trait::async_trait]
impl ComputeClient for MockCompute {
    async fn discover_server(&self, config: &mut NodeConfig) -> Result<bool, FabricError> {
        self.enter("discover_server")?;
        let server = self.server(&config.compute.host_name);
        Ok(server.is_some_and(|server| {
            Self::fill(config, &server);
            true
        }))
    }

    async fn create_server_preflight(&self, _config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("create_server_preflight")
    }

    async fn create_server(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        self.enter("create_server")?;
        let blade = lock(&self.next_blade).clone();
        let mut server = new_server(&config.compute.host_name, blade, PowerState::Down);
        server.description.clone_from(&config.compute.description);
        server.label.clone_from(&config.compute.label);
        Self::fill(config, &server);
        lock(&self.servers).insert(config.compute.host_name.clone(), server);
        Ok(())
    }

    async fn update_server_preflight(&self, _config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("update_server_preflight")
    }

    async fn update_server(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        self.enter("update_server")?;
        let blade = lock(&self.next_blade).clone();
        let server = self.with_server(config, |server| {
            server.blade = blade;
            server.clone()
        })?;
        Self::fill(config, &server);
        Ok(())
    }

    async fn update_server_attributes(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("update_server_attributes")?;
        self.with_server(config, |server| {
            server.description.clone_from(&config.compute.description);
            server.label.clone_from(&config.compute.label);
        })
    }

    async fn delete_server(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("delete_server")?;
        lock(&self.servers).remove(&config.compute.host_name);
        Ok(())
    }

    async fn get_power_state(&self, config: &NodeConfig) -> Result<PowerState, FabricError> {
        self.failures.check("get_power_state", FabricError::Compute)?;
        self.with_server(config, |server| server.power)
    }

    async fn set_power_state(&self, config: &NodeConfig, state: PowerState) -> Result<(), FabricError> {
        self.enter(&format!("set_power_state({state})"))?;
        self.failures.check("set_power_state", FabricError::Compute)?;
        let halts = state.is_up() && {
            let mut boots = lock(&self.halting_boots);
            let halts = *boots > 0;
            *boots = boots.saturating_sub(1);
            halts
        };
        self.with_server(config, |server| {
            server.power = state;
            server.halted = halts;
        })
    }

    async fn get_operational_state(&self, config: &NodeConfig) -> Result<String, FabricError> {
        self.failures.check("get_operational_state", FabricError::Compute)?;
        self.with_server(config, |server| {
            let state = if server.power.is_up() && !server.halted { "ok" } else { "power-off" };
            state.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.compute.host_name = host.to_string();
        config
    }

    #[tokio::test]
    async fn test_create_discover_delete() {
        let journal = CallJournal::new();
        let compute = MockCompute::new(journal.clone());
        let mut cfg = config("node1");

        assert!(!compute.discover_server(&mut cfg).await.unwrap());
        compute.create_server(&mut cfg).await.unwrap();
        assert_eq!(cfg.compute.sp_dn, "org-root/ls-node1");
        assert_eq!(cfg.compute.power_state, PowerState::Down);

        compute.set_power_state(&cfg, PowerState::Up).await.unwrap();
        assert_eq!(compute.get_power_state(&cfg).await.unwrap(), PowerState::Up);
        assert_eq!(compute.get_operational_state(&cfg).await.unwrap(), "ok");

        compute.delete_server(&cfg).await.unwrap();
        assert!(compute.server("node1").is_none());
        assert_eq!(
            journal.calls(),
            vec![
                "compute.discover_server",
                "compute.create_server",
                "compute.set_power_state(up)",
                "compute.delete_server",
            ]
        );
    }

    #[tokio::test]
    async fn test_installer_halts_first_boot_only() {
        let compute = MockCompute::new(CallJournal::new());
        let cfg = config("hv1");
        compute.add_server("hv1", PowerState::Down);
        compute.halt_after_boots(1);

        compute.set_power_state(&cfg, PowerState::Up).await.unwrap();
        assert_eq!(compute.get_power_state(&cfg).await.unwrap(), PowerState::Up);
        assert_eq!(compute.get_operational_state(&cfg).await.unwrap(), "power-off");

        compute.set_power_state(&cfg, PowerState::Down).await.unwrap();
        compute.set_power_state(&cfg, PowerState::Up).await.unwrap();
        assert_eq!(compute.get_operational_state(&cfg).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_fail_on() {
        let compute = MockCompute::new(CallJournal::new());
        compute.fail_on("create_server_preflight", "no blade matches");
        let err = compute.create_server_preflight(&config("node1")).await.unwrap_err();
        assert!(err.to_string().contains("no blade matches"));
    }

    #[tokio::test]
    async fn test_power_state_of_missing_server() {
        let compute = MockCompute::new(CallJournal::new());
        let err = compute.get_power_state(&config("ghost")).await.unwrap_err();
        assert!(matches!(err, FabricError::NotFound(_)));
    }
}
