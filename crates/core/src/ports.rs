//! Port resolution for a tunnel target.
//!
//! Requests use kubectl's `[LOCAL:]REMOTE` notation. A remote port may be a number or a
//! name; names are resolved against the pod's container ports, or first through the
//! service's `port -> targetPort` mapping when the target is a service.

use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, TcpListener};

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use log::debug;

use crate::error::{Error, Result};

const CLUSTER_IP_NONE: &str = "None";

/// The object whose declared ports a request is resolved against.
#[derive(Debug, Clone)]
pub enum PortSource {
    Pod,
    Service(Box<Service>),
}

/// A fully numeric `local:remote` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub local: u16,
    pub remote: u16,
}

impl Display for PortMapping {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}:{}", self.local, self.remote)
    }
}

/// A resolved tunnel target: the pod to connect to and the ports to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub pod: String,
    pub namespace: String,
    pub ports: PortMapping,
}

/// Splits `[LOCAL:]REMOTE`; a bare port is used for both sides.
///
/// # Errors
///
/// Returns [`Error::PortFormat`] for empty parts or more than one `:`.
pub fn split_port(port: &str) -> Result<(&str, &str)> {
    let (local, remote) = match port.split_once(':') {
        Some((local, remote)) => (local, remote),
        None => (port, port),
    };

    if local.is_empty() || remote.is_empty() || remote.contains(':') {
        return Err(Error::PortFormat(port.to_string()));
    }

    Ok((local, remote))
}

/// Asks the OS for a currently unused local port. The port is not reserved afterwards.
pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(Error::FreePort)?;
    let port = listener.local_addr().map_err(Error::FreePort)?.port();

    Ok(port)
}

fn object_name(metadata_name: Option<&String>) -> String {
    metadata_name.cloned().unwrap_or_default()
}

fn lookup_service_port_by_name(service: &Service, name: &str) -> Result<i32> {
    service
        .spec
        .iter()
        .flat_map(|spec| spec.ports.iter().flatten())
        .find(|port| port.name.as_deref() == Some(name))
        .map(|port| port.port)
        .ok_or_else(|| Error::ServicePortName {
            service: object_name(service.metadata.name.as_ref()),
            port: name.to_string(),
        })
}

fn lookup_container_port_by_name(pod: &Pod, name: &str) -> Result<i32> {
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .flat_map(|container| container.ports.iter().flatten())
        .find(|port| port.name.as_deref() == Some(name))
        .map(|port| port.container_port)
        .ok_or_else(|| Error::ContainerPortName {
            pod: object_name(pod.metadata.name.as_ref()),
            port: name.to_string(),
        })
}

/// Follows a service port to the port it targets on `pod`.
fn lookup_container_port_by_service_port(service: &Service, pod: &Pod, port: i32) -> Result<i32> {
    let spec = service.spec.as_ref();
    let headless = spec
        .and_then(|spec| spec.cluster_ip.as_deref())
        .is_some_and(|ip| ip == CLUSTER_IP_NONE);

    let service_port = spec
        .into_iter()
        .flat_map(|spec| spec.ports.iter().flatten())
        .find(|service_port| service_port.port == port)
        .ok_or_else(|| Error::ServicePortNumber {
            service: object_name(service.metadata.name.as_ref()),
            port,
        })?;

    if headless {
        return Ok(port);
    }

    match &service_port.target_port {
        None | Some(IntOrString::Int(0)) => Ok(service_port.port),
        Some(IntOrString::Int(target)) => Ok(*target),
        Some(IntOrString::String(name)) => lookup_container_port_by_name(pod, name),
    }
}

fn translate_service_port(port: &str, service: &Service, pod: &Pod) -> Result<String> {
    let (local, remote) = split_port(port)?;
    let mut local = local.to_string();

    let service_port = match remote.parse::<i32>() {
        Ok(number) => number,
        Err(_) => {
            let number = lookup_service_port_by_name(service, remote)?;
            if local == remote {
                local = number.to_string();
            }
            number
        }
    };

    let container_port = lookup_container_port_by_service_port(service, pod, service_port)?;
    let remote = container_port.to_string();

    if local == remote {
        Ok(remote)
    } else {
        Ok(format!("{local}:{remote}"))
    }
}

fn translate_pod_port(port: &str, pod: &Pod) -> Result<String> {
    let (local, remote) = split_port(port)?;

    let container_port = match remote.parse::<i32>() {
        Ok(_) => remote.to_string(),
        Err(_) => lookup_container_port_by_name(pod, remote)?.to_string(),
    };

    if local == remote {
        Ok(container_port)
    } else {
        Ok(format!("{local}:{container_port}"))
    }
}

/// Translates a port request into numeric kubectl notation for `pod`.
///
/// When both sides end up equal the bare number is returned, so `"3000"` against a
/// service whose port 3000 targets 4000 becomes `"3000:4000"`, while a service whose port
/// equals its target port keeps `"3000"`. A local port of `0` is replaced by a free port.
///
/// # Errors
///
/// Returns an error naming the service or pod when a port name or number is not declared.
pub fn translate(port: &str, source: &PortSource, pod: &Pod) -> Result<String> {
    let (local, remote) = split_port(port)?;

    let allocated;
    let port = if local == "0" {
        allocated = format!("{}:{remote}", free_port()?);
        allocated.as_str()
    } else {
        port
    };

    match source {
        PortSource::Service(service) => translate_service_port(port, service, pod),
        PortSource::Pod => translate_pod_port(port, pod),
    }
}

fn parse_port_number(value: &str, request: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .map_err(|_| Error::PortFormat(request.to_string()))
}

/// Resolves a request to a numeric mapping.
///
/// An explicit local port is used as is. When the request gives only the remote port,
/// `default_local` is used, and when that is `0` too a free local port is allocated.
///
/// # Errors
///
/// Returns an error if the request is malformed, a port is not declared by the target or
/// no free local port could be found.
pub fn resolve(
    request: &str,
    source: &PortSource,
    pod: &Pod,
    default_local: u16,
) -> Result<PortMapping> {
    let (local, remote) = match request.split_once(':') {
        Some((local, remote)) => (parse_port_number(local, request)?, remote),
        None => (default_local, request),
    };

    let local = if local == 0 { free_port()? } else { local };
    let translated = translate(&format!("{local}:{remote}"), source, pod)?;
    let (_, remote) = split_port(&translated)?;

    let mapping = PortMapping {
        local,
        remote: parse_port_number(remote, request)?,
    };
    debug!("Resolved port request `{request}` to {mapping}");

    Ok(mapping)
}
