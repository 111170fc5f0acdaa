//! Core-level limits (§6 "Configuration"). The binary's CLI/file loading
//! lives in `profile-server`; this is just the plain data the handlers and
//! engines read from.

use profile_protocol::model::ServerId;

#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub max_hosted_identities: u32,
    pub max_follower_servers: u32,
    pub neighborhood_initialization_parallelism: u32,
    pub max_identity_relations: u32,
    pub test_mode: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_hosted_identities: 10_000,
            max_follower_servers: 1_000,
            neighborhood_initialization_parallelism: 4,
            max_identity_relations: 50,
            test_mode: false,
        }
    }
}

/// One entry of the `ListRoles` table (§4.C, §6): the port a role is served
/// on, and whether it is reachable over plain TCP and/or TLS.
#[derive(Clone, Copy, Debug)]
pub struct RoleEndpoint {
    pub role_bit: u32,
    pub port: u16,
    pub tcp: bool,
    pub tls: bool,
}

/// The `{role, port, tcp, tls}` advertisement table a `Primary` connection's
/// `ListRoles` answers with (§6). Every role is served on its own TLS port
/// except `Primary` itself, which is plain TCP role discovery.
#[derive(Clone, Debug)]
pub struct RolePorts {
    pub primary: u16,
    pub cl_customer: u16,
    pub cl_non_customer: u16,
    pub cl_app_service: u16,
    pub sr_neighbor: u16,
}

impl RolePorts {
    pub fn table(&self) -> Vec<RoleEndpoint> {
        use profile_protocol::roles::role;
        vec![
            RoleEndpoint { role_bit: role::PRIMARY, port: self.primary, tcp: true, tls: false },
            RoleEndpoint { role_bit: role::CL_CUSTOMER, port: self.cl_customer, tcp: true, tls: true },
            RoleEndpoint { role_bit: role::CL_NON_CUSTOMER, port: self.cl_non_customer, tcp: true, tls: true },
            RoleEndpoint { role_bit: role::CL_APP_SERVICE, port: self.cl_app_service, tcp: true, tls: true },
            RoleEndpoint { role_bit: role::SR_NEIGHBOR, port: self.sr_neighbor, tcp: true, tls: true },
        ]
    }
}

/// This server's own identity, used to stamp `hosting_server_id` on hosted
/// profiles and as the `covered_server_ids` entry for local search results.
#[derive(Clone, Debug)]
pub struct ServerIdentity {
    pub server_id: ServerId,
}
