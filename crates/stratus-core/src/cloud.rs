// ── Cloud API seam ──
//
// The reconciliation core talks to the control plane only through this
// trait. `ComputeClient` implements it for real deployments; tests supply
// in-memory fakes. Calls are cancelled by dropping their futures.

use std::future::Future;

use stratus_api::types::{
    AttachmentTarget, CreateInstanceRequest, FloatingIpResponse, InstanceResponse,
    UpdateInstanceRequest,
};
use stratus_api::{ComputeClient, Error};

/// Operations the core consumes from the compute control plane.
///
/// `get_instance` and `get_floating_ip` must report a missing resource as an
/// error for which [`Error::is_not_found`] holds. `delete_instance` must
/// succeed when the instance is already gone.
pub trait CloudApi: Send + Sync {
    fn create_instance(
        &self,
        body: &CreateInstanceRequest,
    ) -> impl Future<Output = Result<InstanceResponse, Error>> + Send;

    fn get_instance(&self, id: &str)
    -> impl Future<Output = Result<InstanceResponse, Error>> + Send;

    fn update_instance(
        &self,
        id: &str,
        body: &UpdateInstanceRequest,
    ) -> impl Future<Output = Result<InstanceResponse, Error>> + Send;

    fn delete_instance(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn get_floating_ip(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<FloatingIpResponse, Error>> + Send;

    fn associate_floating_ip(
        &self,
        id: &str,
        target: &AttachmentTarget,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn disassociate_floating_ip(&self, id: &str)
    -> impl Future<Output = Result<(), Error>> + Send;
}

impl CloudApi for ComputeClient {
    fn create_instance(
        &self,
        body: &CreateInstanceRequest,
    ) -> impl Future<Output = Result<InstanceResponse, Error>> + Send {
        ComputeClient::create_instance(self, body)
    }

    fn get_instance(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<InstanceResponse, Error>> + Send {
        ComputeClient::get_instance(self, id)
    }

    fn update_instance(
        &self,
        id: &str,
        body: &UpdateInstanceRequest,
    ) -> impl Future<Output = Result<InstanceResponse, Error>> + Send {
        ComputeClient::update_instance(self, id, body)
    }

    fn delete_instance(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send {
        ComputeClient::delete_instance(self, id)
    }

    fn get_floating_ip(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<FloatingIpResponse, Error>> + Send {
        ComputeClient::get_floating_ip(self, id)
    }

    fn associate_floating_ip(
        &self,
        id: &str,
        target: &AttachmentTarget,
    ) -> impl Future<Output = Result<(), Error>> + Send {
        ComputeClient::associate_floating_ip(self, id, target)
    }

    fn disassociate_floating_ip(&self, id: &str) -> impl Future<Output = Result<(), Error>> + Send {
        ComputeClient::disassociate_floating_ip(self, id)
    }
}
