//! In-memory compute control plane for reconcile tests.
//!
//! Applies requests the way the real control plane does, keeps a log of
//! mutating calls, and counts reads so tests can bound polling.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::{Future, ready};
use std::sync::Mutex;
use std::time::Duration;

use stratus_api::Error;
use stratus_api::types::{
    AttachmentTarget, CreateInstanceRequest, FlavorResponse, FloatingIpResponse,
    InstanceResponse, InterfaceFloatingIp, InterfaceResponse, UpdateInstanceRequest,
};
use stratus_core::{CloudApi, ReconcileSettings, Timeouts, ValidationPolicy};

pub const FIP_1: &str = "0d7c5c57-1b3e-4c8b-9f0e-6a1d2b3c4d5e";
pub const FIP_2: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";

/// How a freshly created instance leaves `BUILD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boot {
    /// `ACTIVE` after this many reads.
    ActiveAfter(u32),
    ErrorAfter(u32),
    Never,
}

#[derive(Default)]
struct State {
    instances: BTreeMap<String, InstanceResponse>,
    floating_ips: BTreeMap<String, FloatingIpResponse>,
    booting: HashMap<String, (Boot, u32)>,
    faulty_fips: HashSet<String>,
    next_id: u32,
    calls: Vec<String>,
    reads: usize,
    fail: HashMap<&'static str, u16>,
}

pub struct FakeCloud {
    state: Mutex<State>,
    boot: Boot,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            boot: Boot::ActiveAfter(1),
        }
    }

    pub fn with_boot(mut self, boot: Boot) -> Self {
        self.boot = boot;
        self
    }

    /// Make every call named `call` fail with HTTP `status`.
    pub fn fail_on(&self, call: &'static str, status: u16) {
        self.state.lock().unwrap().fail.insert(call, status);
    }

    pub fn add_floating_ip(&self, id: &str, address: &str) {
        self.state.lock().unwrap().floating_ips.insert(
            id.to_owned(),
            FloatingIpResponse {
                id: id.to_owned(),
                address: Some(address.to_owned()),
                status: Some("DOWN".into()),
                instance_id: None,
                network_id: None,
                extra: HashMap::new(),
            },
        );
    }

    /// Accept later associate and disassociate requests for `id`, but leave
    /// its binding untouched and report it in `ERROR`.
    pub fn fault_floating_ip(&self, id: &str) {
        self.state.lock().unwrap().faulty_fips.insert(id.to_owned());
    }

    /// Seed an existing, active instance.
    pub fn seed_instance(&self, instance: InstanceResponse) {
        let mut state = self.state.lock().unwrap();
        for iface in &instance.interfaces {
            if let Some(fip_id) = iface.floating_ip.as_ref().and_then(|f| f.id.clone()) {
                if let Some(fip) = state.floating_ips.get_mut(&fip_id) {
                    fip.instance_id = Some(instance.id.clone());
                    fip.network_id = Some(iface.network_id.clone());
                    fip.status = Some("ACTIVE".into());
                }
            }
        }
        state.instances.insert(instance.id.clone(), instance);
    }

    /// Bind a floating IP to an instance outside of any reconcile.
    pub fn bind_elsewhere(&self, fip_id: &str, instance_id: &str, network_id: &str) {
        let mut state = self.state.lock().unwrap();
        let fip = state.floating_ips.get_mut(fip_id).unwrap();
        fip.instance_id = Some(instance_id.to_owned());
        fip.network_id = Some(network_id.to_owned());
    }

    pub fn instance(&self, id: &str) -> Option<InstanceResponse> {
        self.state.lock().unwrap().instances.get(id).cloned()
    }

    pub fn floating_ip(&self, id: &str) -> Option<FloatingIpResponse> {
        self.state.lock().unwrap().floating_ips.get(id).cloned()
    }

    /// Mutating calls in the order they arrived.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn reset_counters(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.clear();
        state.reads = 0;
    }

    // ── Request handling ─────────────────────────────────────────────

    fn injected(state: &State, call: &str) -> Result<(), Error> {
        match state.fail.get(call) {
            Some(status) => Err(Error::api(*status, format!("injected failure in {call}"))),
            None => Ok(()),
        }
    }

    fn enter_error(state: &mut State, id: &str) {
        if let Some(fip) = state.floating_ips.get_mut(id) {
            fip.status = Some("ERROR".into());
        }
    }

    fn do_create(&self, body: &CreateInstanceRequest) -> Result<InstanceResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create {}", body.name));
        Self::injected(&state, "create")?;

        state.next_id += 1;
        let id = format!("i-{}", state.next_id);
        let instance = InstanceResponse {
            id: id.clone(),
            name: Some(body.name.clone()),
            description: body.description.clone(),
            flavor: FlavorResponse {
                id: body.flavor_id.clone(),
                vcpus: Some(2),
                ram: Some(2048),
            },
            image_id: body.image_id.clone(),
            status: Some("BUILD".into()),
            created: Some("2026-10-19T08:00:00Z".into()),
            interfaces: body
                .interfaces
                .iter()
                .map(|i| InterfaceResponse {
                    network_id: i.network_id.clone(),
                    fixed_ip: Some(i.fixed_ip.clone().unwrap_or_else(|| "10.0.0.10".into())),
                    primary: Some(i.primary),
                    security_groups: i.security_groups.clone(),
                    floating_ip: None,
                })
                .collect(),
            extra: HashMap::new(),
        };
        state.booting.insert(id.clone(), (self.boot, 0));
        state.instances.insert(id, instance.clone());
        Ok(instance)
    }

    fn do_get(&self, id: &str) -> Result<InstanceResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        Self::injected(&state, "get")?;

        if let Some((boot, reads)) = state.booting.get_mut(id) {
            *reads += 1;
            let next = match *boot {
                Boot::ActiveAfter(n) if *reads >= n => Some("ACTIVE"),
                Boot::ErrorAfter(n) if *reads >= n => Some("ERROR"),
                _ => None,
            };
            if let Some(status) = next {
                state.booting.remove(id);
                if let Some(instance) = state.instances.get_mut(id) {
                    instance.status = Some(status.into());
                }
            }
        }

        state
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| Error::api(404, format!("instance {id} not found")))
    }

    fn do_update(&self, id: &str, body: &UpdateInstanceRequest) -> Result<InstanceResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update {}", serde_json::to_string(body).unwrap()));
        Self::injected(&state, "update")?;

        let mut released = Vec::new();
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| Error::api(404, format!("instance {id} not found")))?;

        if let Some(name) = &body.name {
            instance.name = Some(name.clone());
        }
        if let Some(description) = &body.description {
            instance.description.clone_from(description);
        }
        for network in &body.remove_interfaces {
            instance.interfaces.retain(|i| {
                if &i.network_id == network {
                    released.extend(i.floating_ip.as_ref().and_then(|f| f.id.clone()));
                    false
                } else {
                    true
                }
            });
        }
        for add in &body.add_interfaces {
            instance.interfaces.push(InterfaceResponse {
                network_id: add.network_id.clone(),
                fixed_ip: Some(add.fixed_ip.clone().unwrap_or_else(|| "10.1.0.10".into())),
                primary: Some(add.primary),
                security_groups: add.security_groups.clone(),
                floating_ip: None,
            });
        }
        for change in &body.update_interfaces {
            let iface = instance
                .interfaces
                .iter_mut()
                .find(|i| i.network_id == change.network_id)
                .ok_or_else(|| Error::api(404, format!("interface {} not found", change.network_id)))?;
            if let Some(fixed_ip) = &change.fixed_ip {
                iface.fixed_ip.clone_from(fixed_ip);
            }
            if let Some(primary) = change.primary {
                iface.primary = Some(primary);
            }
            iface
                .security_groups
                .retain(|g| !change.remove_security_groups.contains(g));
            for group in &change.add_security_groups {
                if !iface.security_groups.contains(group) {
                    iface.security_groups.push(group.clone());
                }
            }
        }

        let updated = instance.clone();
        for fip_id in released {
            if let Some(fip) = state.floating_ips.get_mut(&fip_id) {
                fip.instance_id = None;
                fip.network_id = None;
            }
        }
        Ok(updated)
    }

    fn do_delete(&self, id: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete {id}"));
        Self::injected(&state, "delete")?;

        state.instances.remove(id);
        state.booting.remove(id);
        for fip in state.floating_ips.values_mut() {
            if fip.instance_id.as_deref() == Some(id) {
                fip.instance_id = None;
                fip.network_id = None;
                fip.status = Some("DOWN".into());
            }
        }
        Ok(())
    }

    fn do_get_floating_ip(&self, id: &str) -> Result<FloatingIpResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        Self::injected(&state, "get floating ip")?;
        state
            .floating_ips
            .get(id)
            .cloned()
            .ok_or_else(|| Error::api(404, format!("floating IP {id} not found")))
    }

    fn do_associate(&self, id: &str, target: &AttachmentTarget) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("associate {id} {}", target.network_id));
        Self::injected(&state, "associate")?;

        let fip = state
            .floating_ips
            .get(id)
            .cloned()
            .ok_or_else(|| Error::api(404, format!("floating IP {id} not found")))?;
        if state.faulty_fips.contains(id) {
            Self::enter_error(&mut state, id);
            return Ok(());
        }
        if fip.instance_id.is_some() {
            return Err(Error::Api {
                message: format!("floating IP {id} is already associated"),
                code: Some("FloatingIpInUse".into()),
                status: 409,
            });
        }

        let iface = state
            .instances
            .get_mut(&target.instance_id)
            .and_then(|i| {
                i.interfaces
                    .iter_mut()
                    .find(|f| f.network_id == target.network_id)
            })
            .ok_or_else(|| Error::api(404, "interface not found"))?;
        iface.floating_ip = Some(InterfaceFloatingIp {
            id: Some(id.to_owned()),
            address: fip.address.clone(),
        });

        if let Some(fip) = state.floating_ips.get_mut(id) {
            fip.instance_id = Some(target.instance_id.clone());
            fip.network_id = Some(target.network_id.clone());
            fip.status = Some("ACTIVE".into());
        }
        Ok(())
    }

    fn do_disassociate(&self, id: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("disassociate {id}"));
        Self::injected(&state, "disassociate")?;
        if state.faulty_fips.contains(id) {
            Self::enter_error(&mut state, id);
            return Ok(());
        }

        let fip = state
            .floating_ips
            .get_mut(id)
            .ok_or_else(|| Error::api(404, format!("floating IP {id} not found")))?;
        let bound = fip.instance_id.take().zip(fip.network_id.take());
        fip.status = Some("DOWN".into());

        if let Some((instance_id, network_id)) = bound {
            if let Some(iface) = state
                .instances
                .get_mut(&instance_id)
                .and_then(|i| i.interfaces.iter_mut().find(|f| f.network_id == network_id))
            {
                iface.floating_ip = None;
            }
        }
        Ok(())
    }
}

impl CloudApi for FakeCloud {
    fn create_instance(
        &self,
        body: &CreateInstanceRequest,
    ) -> impl Future<Output = Result<InstanceResponse, Error>> + Send {
        ready(self.do_create(body))
    }

    fn get_instance(&self, id: &str) -> impl Future<Output = Result<InstanceResponse, Error>> + Send {
        ready(self.do_get(id))
    }

    fn update_instance(
        &self,
        id: &str,
        body: &UpdateInstanceRequest,
    ) -> impl Future<Output = Result<InstanceResponse, Error>> + Send {
        ready(self.do_update(id, body))
    }

    fn delete_instance(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send {
        ready(self.do_delete(id))
    }

    fn get_floating_ip(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<FloatingIpResponse, Error>> + Send {
        ready(self.do_get_floating_ip(id))
    }

    fn associate_floating_ip(
        &self,
        id: &str,
        target: &AttachmentTarget,
    ) -> impl Future<Output = Result<(), Error>> + Send {
        ready(self.do_associate(id, target))
    }

    fn disassociate_floating_ip(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send {
        ready(self.do_disassociate(id))
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub fn settings() -> ReconcileSettings {
    ReconcileSettings {
        timeouts: Timeouts {
            create: Duration::from_secs(60),
            update: Duration::from_secs(30),
            delete: Duration::from_secs(60),
            associate: Duration::from_secs(20),
            disassociate: Duration::from_secs(20),
        },
        poll_interval: Duration::from_secs(2),
        validation: ValidationPolicy::default(),
    }
}

pub fn interface(network: &str, primary: bool, groups: &[&str]) -> InterfaceResponse {
    InterfaceResponse {
        network_id: network.to_owned(),
        fixed_ip: Some("10.0.0.5".into()),
        primary: Some(primary),
        security_groups: groups.iter().map(|g| (*g).to_owned()).collect(),
        floating_ip: None,
    }
}

pub fn active_instance(id: &str, interfaces: Vec<InterfaceResponse>) -> InstanceResponse {
    InstanceResponse {
        id: id.to_owned(),
        name: Some("web-1".into()),
        description: None,
        flavor: FlavorResponse {
            id: "m1.small".into(),
            vcpus: Some(2),
            ram: Some(2048),
        },
        image_id: "debian-12".into(),
        status: Some("ACTIVE".into()),
        created: Some("2026-10-01T08:00:00Z".into()),
        interfaces,
        extra: HashMap::new(),
    }
}
